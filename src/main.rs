use anyhow::{Context, Result};
use clap::Parser;
use lightstring::config::{self, RuntimeConfig};
use lightstring::devices::{DeviceRegistry, WledClientFactory};
use lightstring::effects::EffectRegistry;
use lightstring::playlist::PlaylistPlayer;
use lightstring::project::{self, ProjectWatcher};
use lightstring::scheduler::{Mode, Scheduler};
use lightstring::{logging, shutdown};
use log::{info, warn};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lightstring", about = "Play LED string shows over DDP")]
struct Cli {
    /// Project JSON file to load
    #[arg(long)]
    project: Option<PathBuf>,

    /// Playlist id to play; without one only injected frames are sent
    #[arg(long)]
    playlist: Option<String>,

    /// Ignore any playlist and only forward injected frames
    #[arg(long)]
    listen: bool,

    /// Override the project's frame rate
    #[arg(long)]
    fps: Option<u32>,

    /// Forget the saved config and use only the given arguments
    #[arg(long)]
    reset: bool,

    /// Also append log lines to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

/// Saved config wins unless the user passed a project or asked for a reset.
fn resolve_config(cli: &Cli) -> Result<RuntimeConfig> {
    let path = config::user_config_path();
    if cli.project.is_none() && !cli.reset {
        if let Some(saved) = RuntimeConfig::load(&path) {
            return Ok(saved);
        }
    }

    let project = cli
        .project
        .clone()
        .context("No saved config; pass --project <path>")?;
    let resolved = RuntimeConfig {
        project,
        playlist: cli.playlist.clone(),
        fps: cli.fps,
    };
    if let Err(e) = resolved.save(&path) {
        warn!("[CONFIG] Could not save runtime config to {:?}: {:#}", path, e);
    }
    Ok(resolved)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_file.as_deref()).context("Failed to start logging")?;

    let runtime = resolve_config(&cli)?;
    let project = project::load(&runtime.project)?;
    info!(
        "[MAIN] Loaded project {:?} ({} strings, {} sequences)",
        project.name,
        project.strings.len(),
        project.sequences.len()
    );

    let mode = match runtime.playlist.as_deref() {
        Some(id) if !cli.listen => {
            if project.playlist(id).is_none() {
                warn!("[PLAYLIST] Playlist {} not found in project", id);
            }
            let mut player = PlaylistPlayer::new(id);
            player.play();
            Mode::Playback(player)
        }
        _ => {
            info!("[MAIN] No playlist selected, listening for injected frames");
            Mode::Listen
        }
    };

    let devices = DeviceRegistry::new(Box::new(WledClientFactory::default()));
    let mut scheduler = Scheduler::new(project, devices, EffectRegistry::with_builtins(), mode)
        .with_watcher(ProjectWatcher::new(&runtime.project));
    if let Some(fps) = runtime.fps {
        scheduler = scheduler.with_fps(fps);
    }

    shutdown::install();
    scheduler.run(shutdown::flag());
    info!("[MAIN] Stopped");
    Ok(())
}
