// Integration tests for sessions and streams over loopback TCP: two
// in-process nodes, real handshakes, real flow control.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;
use tokio::net::{TcpListener, TcpStream};

use skein_core::{Addr, Error, Node, Session, SessionConfig, StreamError};
use skein_crypto::Keypair;

/// Bring up two nodes joined by one session over loopback.
async fn connected_nodes(cfg: SessionConfig) -> (Arc<Node>, Session, Arc<Node>, Session) {
    let a = Arc::new(Node::new(Keypair::generate(&mut OsRng), cfg.clone()));
    let b = Arc::new(Node::new(Keypair::generate(&mut OsRng), cfg));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let b2 = b.clone();
    let accept = tokio::spawn(async move {
        let (conn, _) = listener.accept().await.unwrap();
        b2.accept_session(conn).await.unwrap()
    });
    let conn = TcpStream::connect(addr).await.unwrap();
    let a_sess = a.dial_session(conn, b.local_pk()).await.unwrap();
    let b_sess = accept.await.unwrap();
    (a, a_sess, b, b_sess)
}

#[tokio::test]
async fn session_handshake_establishes_both_sides() {
    let (a, a_sess, b, b_sess) = connected_nodes(SessionConfig::default()).await;
    assert_eq!(a_sess.remote_pk(), b.local_pk());
    assert_eq!(b_sess.remote_pk(), a.local_pk());
    assert!(a_sess.is_initiator());
    assert!(!b_sess.is_initiator());
}

#[tokio::test]
async fn stream_echo_one_mebibyte() {
    let (_a, a_sess, b, _b_sess) = connected_nodes(SessionConfig::default()).await;
    let mut listener = b.listen(42).unwrap();

    let echo = tokio::spawn(async move {
        let stream = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            stream.write(&buf[..n]).await.unwrap();
        }
        stream.stats()
    });

    let stream = Arc::new(
        a_sess
            .dial_stream(Addr::new(b.local_pk(), 42))
            .await
            .unwrap(),
    );
    assert_eq!(stream.remote_addr().port, 42);

    const TOTAL: usize = 1024 * 1024;
    let payload: Vec<u8> = (0..TOTAL).map(|i| (i * 31 % 251) as u8).collect();

    let writer = {
        let stream = stream.clone();
        let data = payload.clone();
        tokio::spawn(async move {
            for chunk in data.chunks(7000) {
                stream.write(chunk).await.unwrap();
            }
        })
    };

    let mut echoed = Vec::with_capacity(TOTAL);
    let mut buf = vec![0u8; 16 * 1024];
    while echoed.len() < TOTAL {
        let n = stream.read(&mut buf).await.unwrap();
        assert_ne!(n, 0, "stream closed before echo completed");
        echoed.extend_from_slice(&buf[..n]);
    }
    writer.await.unwrap();

    assert_eq!(echoed, payload);
    let stats = stream.stats();
    assert_eq!(stats.sent_bytes, TOTAL as u64);
    assert_eq!(stats.recv_bytes, TOTAL as u64);

    stream.close().await;
    let b_stats = echo.await.unwrap();
    assert_eq!(b_stats.sent_bytes, TOTAL as u64);
    assert_eq!(b_stats.recv_bytes, TOTAL as u64);
}

#[tokio::test]
async fn dial_to_port_without_listener_is_refused() {
    let (_a, a_sess, b, _b_sess) = connected_nodes(SessionConfig::default()).await;
    let err = a_sess
        .dial_stream(Addr::new(b.local_pk(), 9999))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Stream(StreamError::Closed)));
}

#[tokio::test]
async fn accept_buffer_exerts_backpressure() {
    let cfg = SessionConfig {
        stream_handshake_timeout: Duration::from_millis(400),
        ..SessionConfig::default()
    };
    let (_a, a_sess, b, _b_sess) = connected_nodes(cfg).await;
    let mut listener = b.listen(45).unwrap();
    let target = Addr::new(b.local_pk(), 45);

    // The responder replies ACCEPT before enqueueing, so the dial that
    // fills slot 20 and the one that blocks dispatch both complete.
    let mut streams = Vec::new();
    for _ in 0..21 {
        streams.push(a_sess.dial_stream(target).await.unwrap());
    }

    // dispatch is parked on the full buffer: the next dial times out
    let err = a_sess.dial_stream(target).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Stream(StreamError::HandshakeTimeout)
    ));

    // draining a few slots unparks dispatch and dialing works again
    for _ in 0..3 {
        let _ = listener.accept().await.unwrap();
    }
    let late = a_sess.dial_stream(target).await.unwrap();
    late.close().await;
}

#[tokio::test]
async fn closing_session_fails_streams_on_both_sides() {
    let (_a, a_sess, b, _b_sess) = connected_nodes(SessionConfig::default()).await;
    let mut listener = b.listen(7).unwrap();
    let a_stream = a_sess
        .dial_stream(Addr::new(b.local_pk(), 7))
        .await
        .unwrap();
    let b_stream = listener.accept().await.unwrap();

    a_sess.close().await;

    let mut buf = [0u8; 8];
    // streams observe session death: reads drain to EOF, writes fail
    assert_eq!(a_stream.read(&mut buf).await.unwrap(), 0);
    assert!(a_stream.write(b"x").await.is_err());
    assert_eq!(b_stream.read(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn stream_close_releases_resources() {
    let (_a, a_sess, b, _b_sess) = connected_nodes(SessionConfig::default()).await;
    let mut listener = b.listen(8).unwrap();
    let a_stream = a_sess
        .dial_stream(Addr::new(b.local_pk(), 8))
        .await
        .unwrap();
    let b_stream = listener.accept().await.unwrap();

    a_stream.write(b"last words").await.unwrap();
    a_stream.close().await;
    assert!(a_stream.is_closed());

    // the peer drains buffered data, then sees EOF
    let mut buf = [0u8; 32];
    let n = b_stream.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"last words");
    assert_eq!(b_stream.read(&mut buf).await.unwrap(), 0);
    // writes on a closed stream fail
    assert!(a_stream.write(b"more").await.is_err());
}

#[tokio::test]
async fn second_listener_on_same_port_refused() {
    let cfg = SessionConfig::default();
    let node = Node::new(Keypair::generate(&mut OsRng), cfg);
    let _first = node.listen(100).unwrap();
    assert!(matches!(node.listen(100), Err(Error::PortInUse(100))));
}

#[tokio::test]
async fn listen_port_zero_binds_ephemeral() {
    let node = Node::new(Keypair::generate(&mut OsRng), SessionConfig::default());
    let listener = node.listen(0).unwrap();
    assert!((49152..65535).contains(&listener.local_addr().port));
}
