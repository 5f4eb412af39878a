use anyhow::{Context, Result};
use glam::Vec3;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use soundscape::audio::{CaptureState, BAND_LAYOUT};
use soundscape::stream::StreamUpdate;

use crate::session::Session;

/// Commands sent from IPC server to render loop
pub enum IpcCommand {
    Ping { reply: oneshot::Sender<String> },
    Status { reply: oneshot::Sender<String> },
    Bands { reply: oneshot::Sender<String> },
    AnchorGet { reply: oneshot::Sender<String> },
    AnchorSet { offset: Vec3, reply: oneshot::Sender<String> },
    AnchorDrag { dx: f32, dy: f32, reply: oneshot::Sender<String> },
    CaptureStart { reply: oneshot::Sender<String> },
    CaptureStop { reply: oneshot::Sender<String> },
    CaptureRestart { reply: oneshot::Sender<String> },
}

/// Get the socket path for IPC
pub fn socket_path() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(dir).join("soundscape.sock")
    } else {
        PathBuf::from("/tmp/soundscape.sock")
    }
}

fn parse_f32(value: &str, what: &str) -> Result<f32> {
    let v: f32 = value
        .parse()
        .with_context(|| format!("Invalid {}: {}", what, value))?;
    if !v.is_finite() {
        anyhow::bail!("Invalid {}: {}", what, value);
    }
    Ok(v)
}

/// Parse a protocol line into an IpcCommand
fn parse_command(line: &str, reply: oneshot::Sender<String>) -> Result<IpcCommand> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    match parts.as_slice() {
        ["ping"] => Ok(IpcCommand::Ping { reply }),
        ["status"] => Ok(IpcCommand::Status { reply }),
        ["bands"] => Ok(IpcCommand::Bands { reply }),
        ["anchor", "get"] => Ok(IpcCommand::AnchorGet { reply }),
        ["anchor", "set", x, y, z] => Ok(IpcCommand::AnchorSet {
            offset: Vec3::new(parse_f32(x, "x")?, parse_f32(y, "y")?, parse_f32(z, "z")?),
            reply,
        }),
        ["anchor", "drag", dx, dy] => Ok(IpcCommand::AnchorDrag {
            dx: parse_f32(dx, "dx")?,
            dy: parse_f32(dy, "dy")?,
            reply,
        }),
        ["capture", "start"] => Ok(IpcCommand::CaptureStart { reply }),
        ["capture", "stop"] => Ok(IpcCommand::CaptureStop { reply }),
        ["capture", "restart"] => Ok(IpcCommand::CaptureRestart { reply }),
        _ => Err(anyhow::anyhow!("Unknown command: {}", line)),
    }
}

fn format_vec(v: Vec3) -> String {
    format!("{:.3},{:.3},{:.3}", v.x, v.y, v.z)
}

fn capture_label(state: CaptureState) -> &'static str {
    match state {
        CaptureState::Stopped => "stopped",
        CaptureState::Starting => "starting",
        CaptureState::Running => "running",
    }
}

fn capture_reply(result: soundscape::Result<()>, session: &Session) -> String {
    match result {
        Ok(()) => format!("ok: {}", capture_label(session.capture_state())),
        Err(e) => format!("err: {}", e),
    }
}

/// Process an IPC command against the running session
pub fn process_ipc_command(cmd: IpcCommand, session: &mut Session) {
    match cmd {
        IpcCommand::Ping { reply } => {
            let _ = reply.send("ok: pong".to_string());
        }
        IpcCommand::Status { reply } => {
            let (active, dominant) = match session.latest_frame() {
                StreamUpdate::Value(frame) => (frame.bands.len(), frame.dominant_frequency),
                _ => (0, 0.0),
            };
            let error = session
                .last_error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "none".to_string());
            let status = format!(
                "ok: capture={} active={}/{} dominant={:.1}Hz anchor={} error={}",
                capture_label(session.capture_state()),
                active,
                BAND_LAYOUT.len(),
                dominant,
                format_vec(session.anchor()),
                error,
            );
            let _ = reply.send(status);
        }
        IpcCommand::Bands { reply } => {
            let response = match session.latest_bands() {
                StreamUpdate::Value(bands) => {
                    let pairs: Vec<String> = BAND_LAYOUT
                        .labels()
                        .zip(&bands.energies)
                        .map(|(label, energy)| format!("{}={:.3}", label, energy))
                        .collect();
                    let balance = bands.balance(BAND_LAYOUT);
                    format!(
                        "ok: {} | low={:.3} mid={:.3} high={:.3}",
                        pairs.join(","),
                        balance.bass,
                        balance.mid,
                        balance.high
                    )
                }
                StreamUpdate::Pending => "err: no audio yet".to_string(),
                StreamUpdate::Terminated(e) => format!("err: {}", e),
            };
            let _ = reply.send(response);
        }
        IpcCommand::AnchorGet { reply } => {
            let _ = reply.send(format!("ok: {}", format_vec(session.anchor())));
        }
        IpcCommand::AnchorSet { offset, reply } => {
            session.set_anchor(offset);
            let _ = reply.send(format!("ok: {}", format_vec(offset)));
        }
        IpcCommand::AnchorDrag { dx, dy, reply } => {
            let moved = session.drag_anchor(dx, dy);
            let _ = reply.send(format!("ok: {}", format_vec(moved)));
        }
        IpcCommand::CaptureStart { reply } => {
            let result = session.start_capture();
            let _ = reply.send(capture_reply(result, session));
        }
        IpcCommand::CaptureStop { reply } => {
            session.stop_capture();
            let _ = reply.send(capture_reply(Ok(()), session));
        }
        IpcCommand::CaptureRestart { reply } => {
            let result = session.restart_capture();
            let _ = reply.send(capture_reply(result, session));
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
    debug!("IPC command: {}", line);

    let (reply_tx, reply_rx) = oneshot::channel();

    let command = match parse_command(line, reply_tx) {
        Ok(cmd) => cmd,
        Err(e) => {
            writer.write_all(format!("err: {:#}\n", e).as_bytes()).await?;
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

    let listener = UnixListener::bind(&path)
        .with_context(|| format!("Failed to bind IPC socket {}", path.display()))?;

    info!("IPC server listening on {}", path.display());

    loop {
        let (stream, _) = listener.accept().await?;
        let cmd_tx = cmd_tx.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, cmd_tx).await {
                warn!("IPC client error: {}", e);
            }
        });
    }
}

/// Send a command to a running soundscape instance (client mode)
pub async fn send_command(line: &str) -> Result<String> {
    let path = socket_path();

    let stream = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        UnixStream::connect(&path),
    )
    .await
    .context("Connection timed out")?
    .context("Could not connect to soundscape. Is it running?")?;

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
