//! Integration tests for the pairing and relay engine

use natpair_relay::{
    dial_with_retry, pair, relay, Acceptor, ConnectionSource, RetryPolicy, Session, SourceError,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

/// Open a loopback connection and return both ends.
async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(addr), async {
        listener.accept().await.unwrap().0
    });
    (client.unwrap(), accepted)
}

/// Reserve an ephemeral port, then release it so nothing listens there.
async fn unreachable_addr() -> std::net::SocketAddr {
    let placeholder = TcpListener::bind("127.0.0.1:0").await.unwrap();
    placeholder.local_addr().unwrap()
}

fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        interval: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(1),
        max_attempts: None,
    }
}

#[tokio::test]
async fn relay_preserves_payload_bytes() {
    let (mut client0, server0) = tcp_pair().await;
    let (mut client1, server1) = tcp_pair().await;

    let handle = tokio::spawn(relay(Session {
        first: server0,
        second: server1,
    }));

    client0.write_all(b"hello through the relay").await.unwrap();
    let mut buf = [0u8; 23];
    timeout(Duration::from_secs(2), client1.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..], b"hello through the relay");

    client1.write_all(b"and back again").await.unwrap();
    let mut buf = [0u8; 14];
    timeout(Duration::from_secs(2), client0.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf[..], b"and back again");

    drop(client0);
    let (forward, backward) = timeout(Duration::from_secs(2), handle)
        .await
        .expect("relay did not return after teardown")
        .unwrap();
    assert_eq!(forward, 23);
    assert_eq!(backward, 14);
}

#[tokio::test]
async fn closing_either_end_tears_down_the_session() {
    let (client0, server0) = tcp_pair().await;
    let (mut client1, server1) = tcp_pair().await;

    let handle = tokio::spawn(relay(Session {
        first: server0,
        second: server1,
    }));

    drop(client0);

    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(2), client1.read(&mut buf))
        .await
        .expect("peer connection was not closed")
        .unwrap();
    assert_eq!(n, 0);

    timeout(Duration::from_secs(2), handle)
        .await
        .expect("relay did not return")
        .unwrap();
}

#[tokio::test]
async fn pairing_joins_one_connection_from_each_source() {
    let acceptor = Arc::new(Acceptor::bind("127.0.0.1:0").await.unwrap());
    let addr = acceptor.local_addr().unwrap();

    // The dial source connects straight back to the accept source, so
    // the two session ends are peers of each other.
    let accept_source = ConnectionSource::Accept(acceptor);
    let dial_source = ConnectionSource::Dial {
        target: addr.to_string(),
        policy: quick_policy(),
    };

    let mut session = timeout(Duration::from_secs(2), pair(&accept_source, &dial_source))
        .await
        .expect("pairing timed out")
        .unwrap();

    session.first.write_all(b"hi").await.unwrap();
    let mut buf = [0u8; 2];
    timeout(Duration::from_secs(2), session.second.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"hi");
}

#[tokio::test]
async fn dialer_retries_until_endpoint_appears() {
    let addr = unreachable_addr().await;

    let target = addr.to_string();
    let policy = quick_policy();
    let dial = tokio::spawn(async move { dial_with_retry(&target, &policy).await });

    // Let a few attempts fail before the endpoint appears.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let listener = TcpListener::bind(addr).await.unwrap();

    let stream = timeout(Duration::from_secs(5), dial)
        .await
        .expect("dial did not complete")
        .unwrap()
        .unwrap();
    assert_eq!(stream.peer_addr().unwrap(), addr);
    drop(listener);
}

#[tokio::test]
async fn bounded_retry_gives_up_after_the_ceiling() {
    let addr = unreachable_addr().await;

    let policy = RetryPolicy {
        interval: Duration::from_millis(50),
        connect_timeout: Duration::from_secs(1),
        max_attempts: Some(2),
    };

    let start = Instant::now();
    let err = dial_with_retry(&addr.to_string(), &policy)
        .await
        .expect_err("dial should have given up");

    match err {
        SourceError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 2),
        other => panic!("unexpected error: {other}"),
    }
    // One full retry interval must have elapsed between the attempts.
    assert!(start.elapsed() >= Duration::from_millis(40));
}

#[tokio::test]
async fn pairing_fails_when_a_source_gives_up() {
    let acceptor = Arc::new(Acceptor::bind("127.0.0.1:0").await.unwrap());
    let addr = acceptor.local_addr().unwrap();
    let dead = unreachable_addr().await;

    // One client shows up for the accept source, but the dial source
    // exhausts its attempts; pairing must fail rather than hang.
    tokio::spawn(async move { TcpStream::connect(addr).await });

    let accept_source = ConnectionSource::Accept(acceptor);
    let dial_source = ConnectionSource::Dial {
        target: dead.to_string(),
        policy: RetryPolicy {
            interval: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(1),
            max_attempts: Some(1),
        },
    };

    let result = timeout(Duration::from_secs(2), pair(&accept_source, &dial_source))
        .await
        .expect("pairing hung on an exhausted source");
    assert!(matches!(result, Err(SourceError::SourceStopped)));
}
