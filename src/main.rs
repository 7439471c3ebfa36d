use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rex_recorder::audio::{matches_marker, CaptureHostFactory};
use rex_recorder::{
    create_router, select_switcher, AppState, AudioSession, Config, ParticipantsInfo,
};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rex-recorder", version, about = "Record microphone and system audio together")]
struct Cli {
    /// Configuration file (extension optional)
    #[arg(long, global = true, default_value = "config/rex-recorder")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the local control bridge for the recording UI
    Serve,

    /// Record until Ctrl-C and write the artifact to disk
    Record {
        #[arg(long, default_value = "")]
        staff: String,

        #[arg(long, default_value = "")]
        client: String,

        /// Output directory (defaults to recordings_path)
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Inspect or switch audio devices
    Devices {
        #[command(subcommand)]
        command: DevicesCommand,
    },
}

#[derive(Subcommand)]
enum DevicesCommand {
    /// List capture inputs, marking the loopback match
    Inputs,
    /// List system output devices
    Outputs,
    /// Make NAME the default output device
    Use { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cfg = Config::load(&cli.config)?;
    info!("{} v{}", cfg.service.name, env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Serve => serve(cfg).await,
        Command::Record { staff, client, out } => {
            record(cfg, ParticipantsInfo::new(staff, client), out).await
        }
        Command::Devices { command } => devices(cfg, command).await,
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let host = CaptureHostFactory::create(cfg.capture.clone())?;
    let session = AudioSession::create(host, cfg.session_config());
    let switcher = select_switcher(&cfg.output).await;
    let state = AppState::new(session, switcher);

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Control bridge listening on {}", addr);

    axum::serve(listener, create_router(state.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    state.session.lock().await.dispose();
    Ok(())
}

async fn record(cfg: Config, participants: ParticipantsInfo, out: Option<PathBuf>) -> Result<()> {
    let host = CaptureHostFactory::create(cfg.capture.clone())?;
    let mut session = AudioSession::create(host, cfg.session_config());
    session.set_participants(participants);

    session.start().await.context("Failed to start recording")?;
    println!("Recording... press Ctrl-C to stop");

    let mut state = session.subscribe();
    let mut display = tokio::time::interval(Duration::from_millis(250));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = display.tick() => {
                let s = state.borrow_and_update().clone();
                print!(
                    "\r{:02}:{:02}  mic {:>5.1}  system {:>5.1}",
                    s.recording_time_secs / 60,
                    s.recording_time_secs % 60,
                    s.mic_level,
                    s.system_level
                );
                std::io::stdout().flush().ok();
            }
        }
    }
    println!();

    session.stop();
    let artifact = session
        .wait_for_artifact()
        .await
        .context("Recording produced no artifact")?;
    let dir = out.unwrap_or_else(|| PathBuf::from(&cfg.recordings_path));
    let path = artifact
        .write_to(&dir)
        .await
        .with_context(|| format!("Failed to write recording into {}", dir.display()))?;

    println!("Saved {} ({} bytes)", path.display(), artifact.size_bytes());
    session.dispose();
    Ok(())
}

async fn devices(cfg: Config, command: DevicesCommand) -> Result<()> {
    match command {
        DevicesCommand::Inputs => {
            let host = CaptureHostFactory::create(cfg.capture.clone())?;
            let inputs = host.input_devices().await?;
            for input in inputs {
                let marker = if matches_marker(&input.label, &cfg.session.loopback_marker) {
                    "  (loopback)"
                } else {
                    ""
                };
                println!("{}{}", input.label, marker);
            }
        }
        DevicesCommand::Outputs => {
            let switcher = select_switcher(&cfg.output)
                .await
                .context("No output switcher available")?;
            for device in switcher.list_output_devices().await? {
                let marker = if device.selected { "* " } else { "  " };
                println!("{}{}", marker, device.name);
            }
        }
        DevicesCommand::Use { name } => {
            let switcher = select_switcher(&cfg.output)
                .await
                .context("No output switcher available")?;
            if switcher.set_output_device(&name).await? {
                println!("Default output is now {}", name);
            } else {
                warn!("No output device named {}", name);
                anyhow::bail!("unknown output device: {}", name);
            }
        }
    }
    Ok(())
}
