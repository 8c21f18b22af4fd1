use anyhow::{Context, Result};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    select,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{self, Message},
};
use tracing::{info, warn};

use crate::cli::ClientArgs;

type RoomSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type RoomSink = SplitSink<RoomSocket, Message>;
type RoomStream = SplitStream<RoomSocket>;

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut sink, mut stream) = establish_connection(&args.url).await?;
    write_stdout(&format!("*** connected to {}", args.url)).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    run_client_loop(&mut stream, &mut sink, &mut stdin, &mut input).await?;
    shutdown_connection(&mut sink).await;

    Ok(())
}

async fn establish_connection(url: &str) -> Result<(RoomSink, RoomStream)> {
    let (socket, _response) = connect_async(url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;

    info!("connected to {url}");
    Ok(socket.split())
}

async fn run_client_loop(
    stream: &mut RoomStream,
    sink: &mut RoomSink,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            frame = stream.next() => {
                if !handle_room_frame(frame).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, sink).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_room_frame(frame: Option<Result<Message, tungstenite::Error>>) -> Result<bool> {
    match frame {
        Some(Ok(Message::Text(text))) => {
            write_stdout(text.as_str()).await?;
            Ok(true)
        }
        Some(Ok(Message::Binary(data))) => {
            write_stdout(&String::from_utf8_lossy(&data)).await?;
            Ok(true)
        }
        Some(Ok(Message::Close(_))) | None => {
            write_stdout("*** relay closed the connection").await?;
            Ok(false)
        }
        Some(Ok(_)) => Ok(true),
        Some(Err(err)) => Err(err).context("failed to read from relay"),
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    sink: &mut RoomSink,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving room").await?;
        return Ok(false);
    }

    sink.send(Message::Text(text.to_string().into()))
        .await
        .context("failed to send message")?;
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn shutdown_connection(sink: &mut RoomSink) {
    if let Err(error) = sink.close().await {
        warn!(?error, "failed to close websocket cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
