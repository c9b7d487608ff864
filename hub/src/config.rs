use std::net::SocketAddr;
use std::time::Duration;

/// What a room hub does when the backup hub's mailbox is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandoffPolicy {
    /// Wait for room. A stalled replica stalls every room's broadcasts, but
    /// no record is ever lost between the log and the replica.
    #[default]
    Blocking,
    /// Drop the record and count it. Replica queues that overflow are cut
    /// off. Replicas notice the sequence gap and resynchronise.
    DropOnFull,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Role {
    #[default]
    Primary,
    /// Mirror a primary and take over once it cannot be reached.
    Standby,
}

/// Keepalive and queue settings for a replication link. Both ends use the
/// same values.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Frames queued for one replica before the policy kicks in.
    pub queue_capacity: usize,
    /// Time allowed for a single frame write.
    pub write_wait: Duration,
    /// Silence tolerated from the peer before the link is declared dead.
    pub pong_wait: Duration,
    /// Interval between pings. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    pub max_frame_len: usize,
}

impl LinkConfig {
    /// Derives the ping period as 9/10 of `pong_wait`.
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = pong_wait * 9 / 10;
        self
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            max_frame_len: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Messages queued for one chat client, history replay included.
    pub queue_capacity: usize,
    pub max_line_len: usize,
    pub write_wait: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_line_len: 4096,
            write_wait: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StandbyConfig {
    /// `host:port` of the primary.
    pub primary_addr: String,
    /// Failed connects tolerated before promotion.
    pub connect_attempts: u32,
    /// First retry delay, doubled after every failure.
    pub retry_backoff: Duration,
    pub connect_timeout: Duration,
}

impl StandbyConfig {
    const MAX_BACKOFF: Duration = Duration::from_secs(30);

    /// Delay before retrying after the `failures`-th failed connect.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(factor)
            .min(Self::MAX_BACKOFF)
    }
}

impl Default for StandbyConfig {
    fn default() -> Self {
        Self {
            primary_addr: "localhost:8080".to_string(),
            connect_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub listen: SocketAddr,
    pub role: Role,
    pub standby: StandbyConfig,
    pub handoff: HandoffPolicy,
    pub link: LinkConfig,
    pub client: ClientConfig,
    pub handshake_timeout: Duration,
    pub room_mailbox: usize,
    pub backup_mailbox: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            role: Role::Primary,
            standby: StandbyConfig::default(),
            handoff: HandoffPolicy::Blocking,
            link: LinkConfig::default(),
            client: ClientConfig::default(),
            handshake_timeout: Duration::from_secs(10),
            room_mailbox: 256,
            backup_mailbox: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let standby = StandbyConfig {
            retry_backoff: Duration::from_millis(100),
            ..StandbyConfig::default()
        };
        assert_eq!(standby.backoff(1), Duration::from_millis(100));
        assert_eq!(standby.backoff(2), Duration::from_millis(200));
        assert_eq!(standby.backoff(4), Duration::from_millis(800));
        assert_eq!(standby.backoff(40), Duration::from_secs(30));
    }

    #[test]
    fn ping_period_follows_pong_wait() {
        let link = LinkConfig::default().with_pong_wait(Duration::from_secs(10));
        assert_eq!(link.ping_period, Duration::from_secs(9));
    }
}
