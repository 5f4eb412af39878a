use anyhow::Result;
use clap::{CommandFactory, Parser};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};

mod config;
mod display;
mod ipc;
mod session;

use config::Config;
use display::DisplayMode;
use session::Session;

#[derive(Parser, Debug)]
#[command(name = "soundscape")]
#[command(author, version, about = "Audio spectrum analysis driving spatially anchored visuals")]
pub struct Args {
    /// Display mode: terminal or log
    #[arg(short, long)]
    mode: Option<DisplayMode>,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Use a built-in sine at this frequency (Hz) instead of a capture device
    #[arg(long, value_name = "HZ")]
    tone: Option<f32>,

    /// PulseAudio source to record from
    #[arg(short, long)]
    device: Option<String>,

    /// Record the default output's monitor instead of the default input
    #[arg(long)]
    monitor: bool,

    /// Capture sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Render ticks per second
    #[arg(long)]
    fps: Option<u32>,

    /// List PulseAudio sources and exit
    #[arg(long)]
    list_sources: bool,

    /// Write a default config file and exit
    #[arg(long)]
    init_config: bool,

    /// Print shell completions and exit
    #[arg(long, value_name = "SHELL")]
    completions: Option<clap_complete::Shell>,

    /// Send a command to a running instance, e.g. "anchor set 0 0 -1"
    #[arg(long, value_name = "COMMAND", allow_hyphen_values = true)]
    send: Option<String>,
}

#[cfg(feature = "pulse")]
fn print_sources() -> Result<()> {
    for (name, state) in soundscape::audio::list_sources()? {
        println!("{}\t{}", name, state);
    }
    Ok(())
}

#[cfg(not(feature = "pulse"))]
fn print_sources() -> Result<()> {
    anyhow::bail!("Built without the `pulse` feature; no capture sources available")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("soundscape=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Some(shell) = args.completions {
        clap_complete::generate(shell, &mut Args::command(), "soundscape", &mut std::io::stdout());
        return Ok(());
    }

    if args.init_config {
        let path = Config::init_default_config()?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    if args.list_sources {
        return print_sources();
    }

    if let Some(ref line) = args.send {
        let response = ipc::send_command(line).await?;
        println!("{}", response);
        if response.starts_with("err:") {
            std::process::exit(1);
        }
        return Ok(());
    }

    // Load or create config
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_from_default_path().unwrap_or_default(),
    };
    config.merge_args(&args);

    info!("Starting soundscape in {:?} mode", config.display.mode);

    let session = Session::start(&config)?;

    let (ipc_tx, ipc_rx) = mpsc::channel(16);
    tokio::spawn(async move {
        if let Err(e) = ipc::start_server(ipc_tx).await {
            warn!("IPC server stopped: {:#}", e);
        }
    });

    match config.display.mode {
        DisplayMode::Terminal => display::terminal::run(config, session, ipc_rx).await?,
        DisplayMode::Log => display::log::run(config, session, ipc_rx).await?,
    }

    let _ = std::fs::remove_file(ipc::socket_path());
    Ok(())
}
