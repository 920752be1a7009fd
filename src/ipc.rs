use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::audio::{SourceKind, SourceManager};

/// Commands sent from IPC server to render loop
pub enum IpcCommand {
    MicToggle { reply: oneshot::Sender<String> },
    PlayToggle { reply: oneshot::Sender<String> },
    SelectTrack { id: String, reply: oneshot::Sender<String> },
    Status { reply: oneshot::Sender<String> },
    Ping { reply: oneshot::Sender<String> },
}

/// Get the socket path for IPC
pub fn socket_path() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(dir).join("creek.sock")
    } else {
        PathBuf::from("/tmp/creek.sock")
    }
}

/// Parse a protocol line into an IpcCommand
fn parse_command(line: &str, reply: oneshot::Sender<String>) -> Result<IpcCommand> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["mic"] | ["mic", "toggle"] => Ok(IpcCommand::MicToggle { reply }),
        ["play"] | ["play", "toggle"] => Ok(IpcCommand::PlayToggle { reply }),
        ["track", id] => Ok(IpcCommand::SelectTrack {
            id: (*id).to_string(),
            reply,
        }),
        ["status"] => Ok(IpcCommand::Status { reply }),
        ["ping"] => Ok(IpcCommand::Ping { reply }),
        _ => Err(anyhow::anyhow!("Unknown command: {}", line)),
    }
}

/// Apply an IPC command to the session. Runs on the render loop, never on
/// the server task, so source transitions stay on one thread of control.
pub async fn process_command(cmd: IpcCommand, manager: &mut SourceManager, level: f32) {
    match cmd {
        IpcCommand::MicToggle { reply } => {
            let response = if manager.snapshot().is_listening() {
                manager.stop_microphone();
                "ok: microphone stopped".to_string()
            } else {
                match manager.start_microphone().await {
                    Ok(()) => "ok: microphone started".to_string(),
                    Err(e) => format!("err: {}", e),
                }
            };
            let _ = reply.send(response);
        }
        IpcCommand::PlayToggle { reply } => {
            let response = if manager.snapshot().is_playing() {
                manager.stop_playback();
                "ok: playback stopped".to_string()
            } else {
                match manager.start_playback().await {
                    Ok(()) => format!("ok: playing {}", manager.snapshot().selected_track),
                    Err(e) => format!("err: {}", e),
                }
            };
            let _ = reply.send(response);
        }
        IpcCommand::SelectTrack { id, reply } => {
            let response = match manager.select_track(&id) {
                Ok(()) => format!("ok: {}", id),
                Err(e) => format!("err: {}", e),
            };
            let _ = reply.send(response);
        }
        IpcCommand::Status { reply } => {
            let snapshot = manager.snapshot();
            let source = match snapshot.source {
                SourceKind::None => "none",
                SourceKind::Microphone => "microphone",
                SourceKind::Playback => "playback",
            };
            let status = format!(
                "ok: source={} track={} loading={} level={:.2}",
                source, snapshot.selected_track, snapshot.is_loading, level,
            );
            let _ = reply.send(status);
        }
        IpcCommand::Ping { reply } => {
            let _ = reply.send("ok: pong".to_string());
        }
    }
}

/// Handle a single client connection
async fn handle_client(stream: UnixStream, cmd_tx: mpsc::Sender<IpcCommand>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();
    buf_reader.read_line(&mut line).await?;
    let line = line.trim();

    if line.is_empty() {
        return Ok(());
    }

    let (reply_tx, reply_rx) = oneshot::channel();

    let command = match parse_command(line, reply_tx) {
        Ok(cmd) => cmd,
        Err(e) => {
            writer.write_all(format!("err: {}\n", e).as_bytes()).await?;
            return Ok(());
        }
    };

    cmd_tx
        .send(command)
        .await
        .map_err(|_| anyhow::anyhow!("Render loop has shut down"))?;

    let response = reply_rx
        .await
        .unwrap_or_else(|_| "err: internal error".to_string());

    writer.write_all(format!("{}\n", response).as_bytes()).await?;
    Ok(())
}

/// Start the IPC server, listening for commands on a Unix socket
pub async fn start_server(cmd_tx: mpsc::Sender<IpcCommand>) -> Result<()> {
    let path = socket_path();

    // Remove stale socket from previous run
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path).context("Failed to bind IPC socket")?;

    info!("IPC server listening on {}", path.display());

    loop {
        let (stream, _) = listener.accept().await?;
        let cmd_tx = cmd_tx.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, cmd_tx).await {
                debug!("IPC client error: {}", e);
            }
        });
    }
}

/// Send a command to a running creek instance (client mode)
pub async fn send_command(line: &str) -> Result<String> {
    let path = socket_path();

    let stream = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        UnixStream::connect(&path),
    )
    .await
    .context("Connection timed out")?
    .context("Could not connect to creek. Is it running?")?;

    let (reader, mut writer) = stream.into_split();

    writer.write_all(format!("{}\n", line).as_bytes()).await?;
    writer.shutdown().await?;

    let mut buf_reader = BufReader::new(reader);
    let mut response = String::new();

    tokio::time::timeout(
        std::time::Duration::from_secs(2),
        buf_reader.read_line(&mut response),
    )
    .await
    .context("Response timed out")?
    .context("Failed to read response")?;

    Ok(response.trim().to_string())
}
