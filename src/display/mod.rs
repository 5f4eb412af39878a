pub mod log;
pub mod terminal;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::ipc::{self, IpcCommand};
use crate::session::Session;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    #[default]
    Terminal,
    Log,
}

/// Process pending IPC commands without blocking the render tick
fn drain_ipc(ipc_rx: &mut mpsc::Receiver<IpcCommand>, session: &mut Session) {
    while let Ok(cmd) = ipc_rx.try_recv() {
        ipc::process_ipc_command(cmd, session);
    }
}

/// Spawn a task that flips the returned flag on Ctrl-C
fn shutdown_signal() -> tokio::sync::watch::Receiver<bool> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        shutdown_tx.send(true).ok();
    });
    shutdown_rx
}
