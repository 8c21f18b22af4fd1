use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use axum::{
    Router,
    body::Body,
    extract::ws::WebSocketUpgrade,
    http::{Request, StatusCode},
    routing::get,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use room_relay::{
    config::RelayConfig,
    hub::HubHandle,
    rooms::Rooms,
    server::RelayServer,
    transport::{MessageWriter, Transport, TransportError, WebSocketTransport},
};
use tokio::{
    net::TcpListener,
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message,
};
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(2);

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[tokio::test]
async fn plain_request_is_rejected_without_registering_a_peer() -> Result<()> {
    let rooms = Rooms::start(["lobby"], &RelayConfig::default());
    let app = room_relay::server::router(&rooms, Arc::new(RelayConfig::default()));

    let response = app
        .oneshot(Request::get("/room/lobby").body(Body::empty())?)
        .await?;
    assert!(response.status().is_client_error());

    let hub = rooms.get("lobby").context("lobby hub")?;
    assert!(hub.members().await.is_empty());
    rooms.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn unknown_room_is_not_found() -> Result<()> {
    let rooms = Rooms::start(["lobby"], &RelayConfig::default());
    let app = room_relay::server::router(&rooms, Arc::new(RelayConfig::default()));

    let response = app
        .oneshot(Request::get("/room/attic").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    rooms.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn websocket_clients_share_a_room() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = RelayServer::new(listener, RelayConfig::default(), ["lobby", "games"]);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        server.run_until(shutdown).await
    });

    let mut alice = join(addr, "lobby", "alice ready").await?;
    let mut bob = join(addr, "lobby", "bob ready").await?;
    assert_eq!(next_text(&mut alice).await?, "bob ready");
    let mut carol = join(addr, "games", "carol ready").await?;

    alice.send(Message::Text("hello bob".into())).await?;
    assert_eq!(next_text(&mut bob).await?, "hello bob");
    assert_eq!(next_text(&mut alice).await?, "hello bob");

    // Binary payloads that are not UTF-8 come back as binary frames.
    bob.send(Message::Binary(vec![0xff, 0x01].into())).await?;
    let echoed = timeout(WAIT, alice.next())
        .await?
        .context("alice stream ended")??;
    assert_eq!(echoed.into_data().as_ref(), &[0xff, 0x01]);

    // Rooms are isolated from each other.
    carol.send(Message::Text("anyone?".into())).await?;
    assert_eq!(next_text(&mut carol).await?, "anyone?");

    let _ = shutdown_tx.send(());
    timeout(WAIT, server).await???;

    // Shutting the relay down closes every connection.
    assert!(drains_to_close(&mut bob).await);
    assert!(drains_to_close(&mut carol).await);
    Ok(())
}

#[tokio::test]
async fn oversized_message_disconnects_only_its_sender() -> Result<()> {
    let config = RelayConfig {
        max_message_size: 16,
        ..RelayConfig::default()
    };
    let relay = TestRelay::start(config, "lobby").await?;

    let mut alice = join(relay.addr, "lobby", "alice ready").await?;
    let mut bob = join(relay.addr, "lobby", "bob ready").await?;
    assert_eq!(next_text(&mut alice).await?, "bob ready");

    bob.send(Message::Text("x".repeat(64).into())).await?;
    assert!(drains_to_close(&mut bob).await);
    relay.wait_for_members(1).await?;

    alice.send(Message::Text("still here".into())).await?;
    assert_eq!(next_text(&mut alice).await?, "still here");
    relay.wait_for_members(1).await?;

    relay.stop().await
}

#[tokio::test]
async fn small_read_buffer_still_relays_whole_messages() -> Result<()> {
    let config = RelayConfig {
        inbound_buffer_size: 256,
        ..RelayConfig::default()
    };
    let relay = TestRelay::start(config, "lobby").await?;

    let mut alice = join(relay.addr, "lobby", "alice ready").await?;
    let long = "relay ".repeat(1000);
    alice.send(Message::Text(long.clone().into())).await?;
    assert_eq!(next_text(&mut alice).await?, long);

    relay.stop().await
}

#[tokio::test]
async fn websocket_writer_close_is_idempotent() -> Result<()> {
    let (report_tx, mut report_rx) = mpsc::unbounded_channel();
    let app = Router::new().route(
        "/",
        get(move |ws: WebSocketUpgrade| {
            let report_tx = report_tx.clone();
            async move {
                ws.on_upgrade(move |socket| async move {
                    let (_reader, mut writer) = WebSocketTransport::new(socket).split();
                    writer.close().await;
                    writer.close().await;
                    let late = writer.write_message(Bytes::from_static(b"late")).await;
                    let _ = report_tx.send(matches!(late, Err(TransportError::Closed)));
                })
            }
        }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move { axum::serve(listener, app).await });

    let (mut client, _) = connect_async(format!("ws://{addr}/")).await?;
    let first = timeout(WAIT, client.next())
        .await?
        .context("stream ended before the close frame")??;
    assert!(matches!(first, Message::Close(_)), "expected close, got {first:?}");
    assert!(timeout(WAIT, report_rx.recv()).await?.context("handler report")?);

    // Exactly one close frame was sent; the connection just ends after it.
    match timeout(WAIT, client.next()).await? {
        None | Some(Err(_)) => Ok(()),
        Some(Ok(frame)) => Err(anyhow!("unexpected frame after close: {frame:?}")),
    }
}

struct TestRelay {
    addr: SocketAddr,
    hub: HubHandle,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl TestRelay {
    async fn start(config: RelayConfig, room: &str) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = RelayServer::new(listener, config, [room]);
        let hub = server.rooms().get(room).cloned().context("room started")?;

        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server
                .run_until(async move {
                    let _ = shutdown_rx.await;
                })
                .await
        });
        Ok(Self {
            addr,
            hub,
            shutdown,
            task,
        })
    }

    async fn wait_for_members(&self, count: usize) -> Result<()> {
        timeout(WAIT, async {
            while self.hub.members().await.len() != count {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .with_context(|| format!("room never settled to {count} members"))
    }

    async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        timeout(WAIT, self.task).await??
    }
}

/// Connects to `room` and sends `greeting`; seeing its own echo proves the
/// client is registered.
async fn join(addr: SocketAddr, room: &str, greeting: &str) -> Result<Client> {
    let url = format!("ws://{addr}/room/{room}");
    let (mut socket, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("connect to {url}"))?;
    socket.send(Message::Text(greeting.into())).await?;
    let echo = next_text(&mut socket).await?;
    if echo != greeting {
        return Err(anyhow!("expected echo {greeting:?}, got {echo:?}"));
    }
    Ok(socket)
}

async fn next_text(socket: &mut Client) -> Result<String> {
    loop {
        let frame = timeout(WAIT, socket.next())
            .await
            .context("timed out waiting for a frame")?
            .context("socket closed")??;
        match frame {
            Message::Text(text) => return Ok(text.as_str().to_string()),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return Err(anyhow!("unexpected frame: {other:?}")),
        }
    }
}

async fn drains_to_close(socket: &mut Client) -> bool {
    loop {
        match timeout(WAIT, socket.next()).await {
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => return true,
            Ok(Some(Ok(_))) => continue,
            Err(_) => return false,
        }
    }
}
