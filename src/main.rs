use anyhow::Result;
use clap::Parser;
use tracing::info;

mod audio;
mod color;
mod config;
mod display;
mod ipc;
mod tracks;
mod visualizer;

use config::Config;
use tracks::TrackLibrary;

#[derive(Parser, Debug)]
#[command(name = "creek")]
#[command(author, version, about = "Loudness-reactive audio visualizer for microphone and track playback")]
pub struct Args {
    /// Config file path
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Track selected at startup
    #[arg(short, long)]
    pub track: Option<String>,

    /// Capture device for microphone input (default: system default source)
    #[arg(short = 'd', long)]
    pub audio_device: Option<String>,

    /// Capture sample rate in Hz
    #[arg(long)]
    pub sample_rate: Option<u32>,

    /// List available tracks and exit
    #[arg(long)]
    list_tracks: bool,

    /// Write a default config file and exit
    #[arg(long)]
    init_config: bool,

    /// Send a command to a running creek instance and exit
    /// (mic | play | track <id> | status | ping)
    #[arg(long)]
    send: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("creek=info".parse()?),
        )
        .init();

    let args = Args::parse();

    if args.init_config {
        let path = Config::init_default_config()?;
        println!("Wrote default config to {}", path.display());
        return Ok(());
    }

    if let Some(line) = &args.send {
        let response = ipc::send_command(line).await?;
        println!("{}", response);
        return Ok(());
    }

    // Load or create config
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_from_default_path().unwrap_or_default(),
    };
    config.merge_args(&args);

    if args.list_tracks {
        let library = TrackLibrary::from_tracks(config.playback.tracks.clone());
        for track in library.iter() {
            println!(
                "{:<16} {:<16} {:<8} {}",
                track.id,
                track.name,
                track.accent.name(),
                track.path.display()
            );
        }
        return Ok(());
    }

    info!("Starting Creek");

    display::terminal::run(config).await
}
