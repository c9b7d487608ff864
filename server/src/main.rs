//! Roomcast node.
//!
//! Runs as primary by default. With `--backup` it mirrors the primary at
//! `--master-addr` and takes over once that primary stops answering.
//!
//! ```text
//! roomcast --addr 0.0.0.0:8080
//! roomcast --addr 0.0.0.0:8081 --backup --master-addr localhost:8080
//! ```

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use roomcast_hub::{HandoffPolicy, NodeConfig, Role, StandbyConfig};
use roomcast_rt::tasks as rt;

#[derive(Parser, Debug)]
#[command(name = "roomcast", version, about)]
struct Args {
    /// Address to serve chat clients and standbys on
    #[arg(long, default_value = "0.0.0.0:8080")]
    addr: SocketAddr,
    /// Start as a standby of `--master-addr`
    #[arg(long)]
    backup: bool,
    /// Primary to mirror when running with `--backup`
    #[arg(long, default_value = "localhost:8080")]
    master_addr: String,
    /// What a room does when the replication hand-off is full
    #[arg(long, value_enum, default_value_t = Handoff::Blocking)]
    handoff: Handoff,
    /// Failed connects to the primary before promotion
    #[arg(long, default_value_t = 3)]
    connect_attempts: u32,
    /// First delay between connect attempts, doubled after each failure
    #[arg(long, default_value_t = 500)]
    retry_backoff_ms: u64,
    /// Messages queued per chat client
    #[arg(long, default_value_t = 1024)]
    client_queue: usize,
    /// Frames queued per standby
    #[arg(long, default_value_t = 256)]
    replica_queue: usize,
    /// Silence tolerated on a replication link; pings go out at 9/10 of it
    #[arg(long, default_value_t = 60)]
    pong_wait_secs: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Handoff {
    Blocking,
    DropOnFull,
}

impl From<Handoff> for HandoffPolicy {
    fn from(handoff: Handoff) -> Self {
        match handoff {
            Handoff::Blocking => HandoffPolicy::Blocking,
            Handoff::DropOnFull => HandoffPolicy::DropOnFull,
        }
    }
}

impl Args {
    fn into_config(self) -> NodeConfig {
        let defaults = NodeConfig::default();
        let mut link = defaults
            .link
            .clone()
            .with_pong_wait(Duration::from_secs(self.pong_wait_secs.max(1)));
        link.queue_capacity = self.replica_queue;
        let mut client = defaults.client.clone();
        client.queue_capacity = self.client_queue;

        NodeConfig {
            listen: self.addr,
            role: if self.backup {
                Role::Standby
            } else {
                Role::Primary
            },
            standby: StandbyConfig {
                primary_addr: self.master_addr,
                connect_attempts: self.connect_attempts,
                retry_backoff: Duration::from_millis(self.retry_backoff_ms),
                ..StandbyConfig::default()
            },
            handoff: self.handoff.into(),
            link,
            client,
            ..defaults
        }
    }
}

fn main() -> ExitCode {
    let config = Args::parse().into_config();
    rt::run(async move {
        tracing::info!(?config, "starting roomcast");
        match roomcast_hub::run(config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(error) => {
                tracing::error!(%error, "roomcast stopped");
                ExitCode::FAILURE
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_library() {
        let config = Args::parse_from(["roomcast"]).into_config();
        assert_eq!(config.listen, SocketAddr::from(([0, 0, 0, 0], 8080)));
        assert_eq!(config.role, Role::Primary);
        assert_eq!(config.handoff, HandoffPolicy::Blocking);
        assert_eq!(config.standby.primary_addr, "localhost:8080");
        assert_eq!(config.standby.connect_attempts, 3);
        assert_eq!(config.client.queue_capacity, 1024);
        assert_eq!(config.link.queue_capacity, 256);
        assert_eq!(config.link.ping_period, Duration::from_secs(54));
    }

    #[test]
    fn backup_flags_build_a_standby() {
        let config = Args::parse_from([
            "roomcast",
            "--addr",
            "127.0.0.1:9000",
            "--backup",
            "--master-addr",
            "10.0.0.1:8080",
            "--handoff",
            "drop-on-full",
            "--pong-wait-secs",
            "10",
        ])
        .into_config();
        assert_eq!(config.role, Role::Standby);
        assert_eq!(config.standby.primary_addr, "10.0.0.1:8080");
        assert_eq!(config.handoff, HandoffPolicy::DropOnFull);
        assert_eq!(config.link.pong_wait, Duration::from_secs(10));
        assert_eq!(config.link.ping_period, Duration::from_secs(9));
    }
}
