//! End-to-end tests driving a real server with real WebSocket clients.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use broadside_server::{Server, ServerError};
use broadside_ws::{
    BroadcastStats, CloseCode, CloseReason, IgnoreHandler, MessageContext, WsError,
};
use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

async fn start(server: &Server) -> SocketAddr {
    server.start().await.unwrap();
    server.local_addr().unwrap()
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _response) = connect_async(format!("ws://{addr}/")).await.unwrap();
    client
}

async fn connect_many(addr: SocketAddr, count: usize) -> Vec<Client> {
    join_all((0..count).map(|_| connect(addr))).await
}

async fn wait_for_connections(server: &Server, expected: usize) {
    tokio::time::timeout(SETTLE_TIMEOUT, async {
        while server.connection_count() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {expected} connections, have {}",
            server.connection_count()
        )
    });
}

async fn next_text(client: &mut Client) -> String {
    let frame = tokio::time::timeout(SETTLE_TIMEOUT, client.next())
        .await
        .expect("timed out waiting for a message")
        .expect("stream ended")
        .expect("read failed");
    match frame {
        Message::Text(text) => text.as_str().to_owned(),
        other => panic!("expected text, got {other:?}"),
    }
}

async fn expect_close_code(client: &mut Client, expected: u16) {
    loop {
        let frame = tokio::time::timeout(SETTLE_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for close");
        match frame {
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), expected);
                return;
            }
            Some(Ok(Message::Close(None))) | None | Some(Err(_)) => {
                panic!("connection ended without close code {expected}")
            }
            Some(Ok(_)) => {}
        }
    }
}

fn test_server() -> Server {
    Server::builder()
        .port(0)
        .shutdown_grace(Duration::from_secs(2))
        .handler(IgnoreHandler)
        .build()
}

async fn broadcast_round(server: &Server, clients: usize) {
    let addr = start(server).await;
    let mut clients = connect_many(addr, clients).await;
    wait_for_connections(server, clients.len()).await;

    let stats = server.broadcast("ping").await.unwrap();
    assert_eq!(
        stats,
        BroadcastStats {
            sent: clients.len(),
            failed: 0
        }
    );

    // A second broadcast arriving next proves "ping" was delivered once.
    server.broadcast("pong").await.unwrap();
    for client in &mut clients {
        assert_eq!(next_text(client).await, "ping");
        assert_eq!(next_text(client).await, "pong");
    }

    server.stop().await.unwrap();
    assert_eq!(server.connection_count(), 0);
    for client in &mut clients {
        expect_close_code(client, 1001).await;
    }
}

#[tokio::test]
async fn broadcast_reaches_every_client_once() {
    let server = test_server();
    broadcast_round(&server, 100).await;
}

#[tokio::test]
#[ignore = "opens 1000 sockets; needs a raised file descriptor limit"]
async fn broadcast_reaches_a_thousand_clients() {
    let server = test_server();
    broadcast_round(&server, 1000).await;
}

#[tokio::test]
async fn failed_handshakes_are_not_registered() {
    let server = test_server();
    let addr = start(&server).await;

    let mut raw = TcpStream::connect(addr).await.unwrap();
    raw.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let _silent = TcpStream::connect(addr).await.unwrap();

    let _clients = connect_many(addr, 3).await;
    wait_for_connections(&server, 3).await;

    // Let the bad handshake settle before checking totals.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats = server.stats().unwrap();
    assert_eq!(stats.active, 3);
    assert_eq!(stats.total_registered, 3);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn broadcast_is_rejected_outside_a_run() {
    let server = test_server();
    assert!(matches!(
        server.broadcast("early").await,
        Err(ServerError::NotRunning)
    ));

    start(&server).await;
    server.stop().await.unwrap();
    server.stop().await.unwrap();

    assert!(matches!(
        server.broadcast("late").await,
        Err(ServerError::NotRunning)
    ));
}

#[tokio::test]
async fn start_fails_when_port_is_taken() {
    let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();

    let server = Server::builder().port(port).build();
    match server.start().await {
        Err(ServerError::Bind { addr, .. }) => assert_eq!(addr.port(), port),
        other => panic!("expected bind error, got {other:?}"),
    }
    assert!(!server.is_running());
}

#[tokio::test]
async fn inbound_messages_are_relayed_to_everyone() {
    let server = Server::builder()
        .port(0)
        .shutdown_grace(Duration::from_secs(2))
        .build();
    let addr = start(&server).await;

    let mut sender = connect(addr).await;
    let mut listener = connect(addr).await;
    wait_for_connections(&server, 2).await;

    sender.send(Message::text("hello everyone")).await.unwrap();

    assert_eq!(next_text(&mut listener).await, "hello everyone");
    assert_eq!(next_text(&mut sender).await, "hello everyone");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn custom_handler_can_reply() {
    let server = Server::builder()
        .port(0)
        .handler(|ctx: &MessageContext<'_>, message: broadside_ws::Message| {
            let text = message.as_text().unwrap_or_default().to_uppercase();
            let _ = ctx.reply(text);
        })
        .build();
    let addr = start(&server).await;

    let mut client = connect(addr).await;
    client.send(Message::text("shout")).await.unwrap();
    assert_eq!(next_text(&mut client).await, "SHOUT");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn send_to_reaches_only_the_target() {
    let server = test_server();
    let addr = start(&server).await;

    let mut first = connect(addr).await;
    wait_for_connections(&server, 1).await;
    let first_id = server.connection_ids()[0];

    let mut second = connect(addr).await;
    wait_for_connections(&server, 2).await;

    server.send_to(&first_id, "just you").unwrap();
    server.broadcast("everyone").await.unwrap();

    assert_eq!(next_text(&mut first).await, "just you");
    assert_eq!(next_text(&mut first).await, "everyone");
    assert_eq!(next_text(&mut second).await, "everyone");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn stalled_client_is_evicted_without_affecting_others() {
    let server = Server::builder()
        .port(0)
        .max_queue_per_connection(8)
        .shutdown_grace(Duration::from_secs(2))
        .handler(IgnoreHandler)
        .build();
    let addr = start(&server).await;

    // Never reads, so its socket buffers and then its queue fill up.
    let _stalled = connect(addr).await;
    let healthy = connect(addr).await;
    wait_for_connections(&server, 2).await;

    let (_healthy_tx, mut healthy_rx) = healthy.split();
    let reader = tokio::spawn(async move {
        let mut received = 0usize;
        while let Some(Ok(frame)) = healthy_rx.next().await {
            if frame.is_binary() {
                received += 1;
            }
        }
        received
    });

    let payload = vec![7u8; 256 * 1024];
    let mut totals = BroadcastStats::default();
    for _ in 0..400 {
        let stats = server
            .broadcast(broadside_ws::Message::binary(payload.clone()))
            .await
            .unwrap();
        totals.sent += stats.sent;
        totals.failed += stats.failed;
        if totals.failed > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(totals.failed, 1);
    assert_eq!(server.connection_count(), 1);

    let stats = server.broadcast("still here").await.unwrap();
    assert_eq!(stats, BroadcastStats { sent: 1, failed: 0 });

    server.stop().await.unwrap();
    let received = reader.await.unwrap();
    assert!(received > 0);
}

#[tokio::test]
async fn close_frames_cannot_be_broadcast() {
    let server = test_server();
    let addr = start(&server).await;
    let mut client = connect(addr).await;
    wait_for_connections(&server, 1).await;

    let result = server
        .broadcast(broadside_ws::Message::close(CloseCode::Normal, "bye"))
        .await;
    assert!(matches!(
        result,
        Err(ServerError::Connection(WsError::InvalidMessage { kind: "close" }))
    ));
    assert_eq!(server.connection_count(), 1);

    let stats = server.broadcast("after").await.unwrap();
    assert_eq!(stats, BroadcastStats { sent: 1, failed: 0 });
    assert_eq!(next_text(&mut client).await, "after");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn handler_close_leaves_registry_immediately() {
    let still_registered = Arc::new(AtomicBool::new(true));
    let server = {
        let still_registered = Arc::clone(&still_registered);
        Server::builder()
            .port(0)
            .shutdown_grace(Duration::from_secs(2))
            .handler(move |ctx: &MessageContext<'_>, _message: broadside_ws::Message| {
                ctx.connection().close(CloseReason::Requested);
                let registry = ctx.broadcaster().registry();
                still_registered.store(registry.contains(&ctx.connection_id()), Ordering::SeqCst);
            })
            .build()
    };
    let addr = start(&server).await;

    let mut client = connect(addr).await;
    wait_for_connections(&server, 1).await;
    client.send(Message::text("close me")).await.unwrap();

    expect_close_code(&mut client, 1000).await;
    assert!(!still_registered.load(Ordering::SeqCst));
    assert_eq!(server.connection_count(), 0);

    server.stop().await.unwrap();
}
