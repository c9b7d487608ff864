use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use roomcast_rt::tasks::{
    self as rt,
    codec::{Framed, LinesCodec},
    net::{TcpListener, TcpStream},
};

use crate::config::{HandoffPolicy, LinkConfig, NodeConfig, Role, StandbyConfig};
use crate::node::{self, Node};
use crate::store::Stores;

type Client = Framed<TcpStream, LinesCodec>;

fn test_config() -> NodeConfig {
    NodeConfig {
        listen: SocketAddr::from(([127, 0, 0, 1], 0)),
        // A killed primary is noticed within two seconds
        link: LinkConfig {
            pong_wait: Duration::from_secs(2),
            ping_period: Duration::from_millis(500),
            ..LinkConfig::default()
        },
        ..NodeConfig::default()
    }
}

fn standby_config(primary_addr: String) -> NodeConfig {
    NodeConfig {
        role: Role::Standby,
        standby: StandbyConfig {
            primary_addr,
            connect_attempts: 2,
            retry_backoff: Duration::from_millis(20),
            connect_timeout: Duration::from_secs(1),
        },
        ..test_config()
    }
}

async fn spawn_primary(config: NodeConfig, stores: Stores) -> (SocketAddr, Node) {
    let listener = TcpListener::bind(config.listen).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let node = Node::primary(config, stores);
    rt::spawn(node.clone().serve(listener));
    (addr, node)
}

async fn connect(addr: SocketAddr, handshake: &str) -> Client {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut client = Framed::new(stream, LinesCodec::new());
    client.send(handshake).await.unwrap();
    client
}

async fn read_line(client: &mut Client) -> String {
    rt::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for a line")
        .expect("connection closed")
        .unwrap()
}

async fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = rt::Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(rt::Instant::now() < deadline, "timed out waiting until {what}");
        rt::sleep(Duration::from_millis(10)).await;
    }
}

#[test]
pub fn two_clients_share_room_42() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let (addr, node) = spawn_primary(test_config(), Stores::new()).await;

        let mut alice = connect(addr, "JOIN 42 alice").await;
        alice.send("hello").await.unwrap();
        assert_eq!(read_line(&mut alice).await, "hello");

        let mut bob = connect(addr, "JOIN 42 bob").await;
        assert_eq!(read_line(&mut bob).await, "hello");
        bob.send("world").await.unwrap();

        assert_eq!(read_line(&mut alice).await, "world");
        assert_eq!(read_line(&mut bob).await, "world");
        assert_eq!(node.stores().log.history("42").len(), 2);
        assert_eq!(node.registry().rooms_started(), 1);
    });
}

#[test]
pub fn rooms_query_lists_sorted_ids() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let (addr, node) = spawn_primary(test_config(), Stores::new()).await;

        let mut empty = connect(addr, "ROOMS").await;
        assert_eq!(read_line(&mut empty).await, "");

        let mut zed = connect(addr, "JOIN zed").await;
        zed.send("hi").await.unwrap();
        read_line(&mut zed).await;
        node.registry().get_or_create("abc");

        let mut rooms = connect(addr, "ROOMS").await;
        assert_eq!(read_line(&mut rooms).await, "abc;zed");
        assert!(rooms.next().await.is_none());
    });
}

#[test]
pub fn bad_handshakes_get_an_error_line() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let (addr, _node) = spawn_primary(test_config(), Stores::new()).await;

        let mut unknown = connect(addr, "HELLO").await;
        assert_eq!(read_line(&mut unknown).await, "ERR unknown command 'HELLO'");
        assert!(unknown.next().await.is_none());

        let mut invalid = connect(addr, "JOIN no-dashes").await;
        assert_eq!(read_line(&mut invalid).await, "ERR invalid room id 'no-dashes'");
    });
}

#[test]
pub fn overlong_chat_line_is_skipped_and_the_session_goes_on() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let config = test_config();
        let too_long = "y".repeat(config.client.max_line_len + 1);
        let (addr, node) = spawn_primary(config, Stores::new()).await;

        let mut dave = connect(addr, "JOIN 9 dave").await;
        dave.send(too_long).await.unwrap();
        dave.send("fits").await.unwrap();
        assert_eq!(read_line(&mut dave).await, "fits");
        assert_eq!(node.stores().log.history("9"), vec![bytes::Bytes::from_static(b"fits")]);
    });
}

#[test]
pub fn unreachable_primary_promotes_the_standby_at_startup() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr = dead.local_addr().unwrap().to_string();
        drop(dead);

        let startup = rt::timeout(
            Duration::from_secs(10),
            node::start(standby_config(dead_addr), Stores::new()),
        )
        .await
        .unwrap()
        .unwrap();
        let promotion = startup.promotion.as_ref().expect("standby was promoted");
        assert_eq!(promotion.failed_attempts, 2);

        let addr = startup.local_addr().unwrap();
        rt::spawn(startup.node.serve(startup.listener));
        let mut client = connect(addr, "JOIN 7").await;
        client.send("served").await.unwrap();
        assert_eq!(read_line(&mut client).await, "served");
    });
}

#[test]
pub fn standby_mirrors_then_takes_over_with_the_history() {
    // The primary lives on its own runtime so it can be killed outright
    let primary_runtime = rt::Runtime::new().unwrap();
    let primary_addr = primary_runtime.block_on(async {
        let (addr, _node) = spawn_primary(test_config(), Stores::new()).await;
        addr
    });

    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let mut alice = connect(primary_addr, "JOIN 42 alice").await;
        alice.send("hello").await.unwrap();
        assert_eq!(read_line(&mut alice).await, "hello");

        let standby_stores = Stores::new();
        let standby = rt::spawn(node::start(
            standby_config(primary_addr.to_string()),
            standby_stores.clone(),
        ));

        // Mirrored by the replay, then live
        wait_until("the replay arrives", || standby_stores.log.len("42") == 1).await;
        alice.send("world").await.unwrap();
        assert_eq!(read_line(&mut alice).await, "world");
        wait_until("the live record arrives", || {
            standby_stores.log.len("42") == 2
        })
        .await;

        primary_runtime.shutdown_background();

        let startup = rt::timeout(Duration::from_secs(10), standby)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(startup.promotion.is_some());
        let addr = startup.local_addr().unwrap();
        rt::spawn(startup.node.serve(startup.listener));

        let mut rooms = connect(addr, "ROOMS").await;
        assert_eq!(read_line(&mut rooms).await, "42");

        let mut bob = connect(addr, "JOIN 42 bob").await;
        assert_eq!(read_line(&mut bob).await, "hello");
        assert_eq!(read_line(&mut bob).await, "world");
        bob.send("after failover").await.unwrap();
        assert_eq!(read_line(&mut bob).await, "after failover");
    });
}

#[test]
pub fn drop_on_full_primary_still_mirrors() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let config = NodeConfig {
            handoff: HandoffPolicy::DropOnFull,
            ..test_config()
        };
        let (addr, node) = spawn_primary(config, Stores::new()).await;

        let standby_stores = Stores::new();
        let _standby = rt::spawn(node::start(
            standby_config(addr.to_string()),
            standby_stores.clone(),
        ));
        let deadline = rt::Instant::now() + Duration::from_secs(5);
        while node.backup().replicas().await.unwrap().is_empty() {
            assert!(rt::Instant::now() < deadline, "standby never registered");
            rt::sleep(Duration::from_millis(10)).await;
        }

        let mut carol = connect(addr, "JOIN r1 carol").await;
        for i in 0..20 {
            carol.send(format!("m{i}")).await.unwrap();
        }
        for _ in 0..20 {
            read_line(&mut carol).await;
        }
        wait_until("every record is mirrored", || standby_stores.log.len("r1") == 20).await;
        assert_eq!(standby_stores.log.snapshot(), node.stores().log.snapshot());
    });
}

#[test]
pub fn drop_on_full_standby_catches_up_on_a_long_history() {
    let runtime = rt::Runtime::new().unwrap();
    runtime.block_on(async move {
        let config = NodeConfig {
            handoff: HandoffPolicy::DropOnFull,
            ..test_config()
        };
        let records = config.link.queue_capacity * 2 + 88;
        let primary_stores = Stores::new();
        for i in 0..records {
            primary_stores.log.append("big", format!("m{i}").into());
        }
        let (addr, node) = spawn_primary(config, primary_stores).await;

        let standby_stores = Stores::new();
        let _standby = rt::spawn(node::start(
            standby_config(addr.to_string()),
            standby_stores.clone(),
        ));
        wait_until("the long replay is mirrored", || {
            standby_stores.log.len("big") == records
        })
        .await;
        assert_eq!(standby_stores.log.snapshot(), node.stores().log.snapshot());
        assert_eq!(node.stores().metrics.snapshot().replicas_dropped, 0);
    });
}
