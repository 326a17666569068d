//! End-to-end tests over loopback TCP, with and without TLS

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use opwire::transport::tls::generate_self_signed;
use opwire::{
    tcp, Connection, ConnectionConfig, ConnectionHandler, DisconnectReason, NoopHandler, Payload,
    ProtocolError, Role, TlsConfig,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

#[derive(Default)]
struct Inbox {
    messages: Mutex<Vec<(u8, Bytes)>>,
    reasons: Mutex<Vec<DisconnectReason>>,
}

impl Inbox {
    fn count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }
}

impl ConnectionHandler for Inbox {
    fn on_message(&self, _conn: &Connection, opcode: u8, body: Bytes) {
        self.messages.lock().unwrap().push((opcode, body));
    }

    fn on_disconnected(&self, _conn: &Connection, reason: DisconnectReason) {
        self.reasons.lock().unwrap().push(reason);
    }
}

struct Echo;

impl ConnectionHandler for Echo {
    fn on_message(&self, conn: &Connection, opcode: u8, body: Bytes) {
        let _ = conn.post(vec![Payload::new(opcode, body)]);
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_tcp_echo_through_listener() {
    let listener = tcp::Listener::bind("127.0.0.1:0", ConnectionConfig::default())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    let server = tokio::spawn(listener.serve(|_peer| Echo, shutdown_rx));

    let inbox = Arc::new(Inbox::default());
    let client = tcp::connect(&addr.to_string(), ConnectionConfig::default(), inbox.clone())
        .await
        .unwrap();
    assert_eq!(client.remote_addr(), Some(addr));

    let batch: Vec<Payload> = (0..10u8)
        .map(|i| Payload::new(i, vec![i; 100 * i as usize]))
        .collect();
    client.send(&batch).await.unwrap();

    wait_until(|| inbox.count() == 10).await;
    let received = inbox.messages.lock().unwrap().clone();
    for (i, (opcode, body)) in received.into_iter().enumerate() {
        assert_eq!(opcode, i as u8);
        assert_eq!(body.len(), 100 * i);
    }

    shutdown_tx.send(()).await.unwrap();
    server.await.unwrap().unwrap();

    client.wait_disconnected().await;
    assert_eq!(
        inbox.reasons.lock().unwrap().clone(),
        vec![DisconnectReason::RemoteClosed]
    );
}

#[tokio::test]
async fn test_largest_unit_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let inbox = Arc::new(Inbox::default());
    let accept_inbox = inbox.clone();
    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let conn = Connection::new(accept_inbox);
        conn.start(Role::Server, stream, ConnectionConfig::default())
            .await
            .unwrap();
        conn
    });

    let client = tcp::connect(&addr.to_string(), ConnectionConfig::default(), NoopHandler)
        .await
        .unwrap();
    let _server = accept.await.unwrap();

    let body = vec![0xA5u8; 65534];
    client.send(&[Payload::new(0xFE, body.clone())]).await.unwrap();
    assert_eq!(client.bytes_sent(), 65536 + 1);

    wait_until(|| inbox.count() == 1).await;
    let (opcode, received) = inbox.messages.lock().unwrap()[0].clone();
    assert_eq!(opcode, 0xFE);
    assert_eq!(&received[..], &body[..]);
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = tcp::connect(&addr.to_string(), ConnectionConfig::default(), NoopHandler).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_tls_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("key.pem");
    let server_tls = generate_self_signed(&cert, &key, vec!["localhost".into()]).unwrap();

    let server_config = ConnectionConfig::default().with_tls(server_tls);
    let listener = tcp::Listener::bind("127.0.0.1:0", server_config).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept = tokio::spawn(async move { listener.accept(Echo).await });

    let client_tls = TlsConfig::client("localhost").with_ca(cert.to_string_lossy().to_string());
    let inbox = Arc::new(Inbox::default());
    let client = tcp::connect(
        &addr.to_string(),
        ConnectionConfig::default().with_tls(client_tls),
        inbox.clone(),
    )
    .await
    .unwrap();
    let server = accept.await.unwrap().unwrap();

    client
        .send(&[Payload::new(7, &b"over tls"[..])])
        .await
        .unwrap();
    wait_until(|| inbox.count() == 1).await;
    assert_eq!(
        inbox.messages.lock().unwrap()[0],
        (7, Bytes::from_static(b"over tls"))
    );

    client.disconnect().await;
    server.wait_disconnected().await;
}

#[tokio::test]
async fn test_tls_rejects_untrusted_certificate() {
    let dir = tempfile::tempdir().unwrap();
    let server_tls = generate_self_signed(
        dir.path().join("server.pem"),
        dir.path().join("server.key"),
        vec!["localhost".into()],
    )
    .unwrap();
    // A different self-signed certificate the client trusts instead.
    let other = dir.path().join("other.pem");
    generate_self_signed(&other, &dir.path().join("other.key"), vec!["localhost".into()]).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let conn = Connection::new(NoopHandler);
        conn.start(
            Role::Server,
            stream,
            ConnectionConfig::default().with_tls(server_tls),
        )
        .await
    });

    let client_tls = TlsConfig::client("localhost").with_ca(other.to_string_lossy().to_string());
    let stream = TcpStream::connect(addr).await.unwrap();
    let inbox = Arc::new(Inbox::default());
    let client = Connection::new(inbox.clone());
    let result = client
        .start(
            Role::Client,
            stream,
            ConnectionConfig::default().with_tls(client_tls),
        )
        .await;

    assert!(matches!(result, Err(ProtocolError::TlsError(_))));
    assert!(client.is_disposed());
    assert!(inbox.reasons.lock().unwrap().is_empty());
    assert!(accept.await.unwrap().is_err());
}
