//! Audio Player (yaytsa-ap) - Main entry point
//!
//! Command-line front end for the playback engine: plays the given files
//! back to back with gapless switching, optionally with karaoke mode and a
//! sleep timer.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use yaytsa_ap::audio::{AudioBackend, CpalBackend, FileSourceLoader, NullBackend};
use yaytsa_ap::db::{self, settings};
use yaytsa_ap::dsp::PinkNoiseSource;
use yaytsa_ap::{AudioEngine, EngineConfig, SleepPhase, SleepTimer, SleepTimerOptions, SleepTimerPreset};
use yaytsa_common::config::{ensure_data_folder, resolve_data_folder, TomlConfig};
use yaytsa_common::PlayerEvent;

/// Command-line arguments for yaytsa-ap
#[derive(Parser, Debug)]
#[command(name = "yaytsa-ap")]
#[command(about = "Gapless audio player with karaoke mode and sleep timer")]
#[command(version)]
struct Args {
    /// Audio files to play, in order
    files: Vec<PathBuf>,

    /// Config file (default: platform config dir)
    #[arg(short, long, env = "YAYTSA_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the settings database
    #[arg(long, env = "YAYTSA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Output device name
    #[arg(long, env = "YAYTSA_AUDIO_DEVICE")]
    device: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Discard audio instead of opening a device
    #[arg(long)]
    null_output: bool,

    /// Volume 0.0-1.0 (saved for next time)
    #[arg(short, long)]
    volume: Option<f32>,

    /// Start with vocals removed
    #[arg(short, long)]
    karaoke: bool,

    /// Bass kept in the center below this frequency, in Hz (saved)
    #[arg(long)]
    karaoke_cutoff: Option<f64>,

    /// Sleep timer preset (15m, 30m, 45m, 60m, drift-20, drift-45, night)
    #[arg(long)]
    sleep: Option<SleepTimerPreset>,

    /// Sleep timer music minutes (overrides the preset)
    #[arg(long)]
    sleep_music_min: Option<u64>,

    /// Sleep timer noise minutes (overrides the preset)
    #[arg(long)]
    sleep_noise_min: Option<u64>,

    /// Print player events as JSON lines on stdout
    #[arg(long)]
    json: bool,
}

impl Args {
    fn sleep_options(&self) -> Option<SleepTimerOptions> {
        if self.sleep.is_none() && self.sleep_music_min.is_none() && self.sleep_noise_min.is_none()
        {
            return None;
        }
        let mut options = self.sleep.map(|p| p.options()).unwrap_or_default();
        if let Some(min) = self.sleep_music_min {
            options.music_duration_ms = Some(min * 60_000);
        }
        if let Some(min) = self.sleep_noise_min {
            options.noise_duration_ms = Some(min * 60_000);
        }
        Some(options)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml = TomlConfig::load_or_default(args.config.as_deref());

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "yaytsa_ap={level},yaytsa_common={level}",
                    level = toml.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if args.list_devices {
        for name in CpalBackend::list_devices().context("Failed to enumerate devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    info!("Starting Yaytsa Audio Player");

    let data_dir = resolve_data_folder(args.data_dir.as_deref(), &toml);
    ensure_data_folder(&data_dir).context("Failed to prepare data folder")?;
    let pool = db::init_database(&data_dir.join(db::init::DATABASE_FILE))
        .await
        .context("Failed to open settings database")?;

    let mut config = EngineConfig::from(&toml);
    if args.device.is_some() {
        config.device = args.device.clone();
    }

    let backend: Arc<dyn AudioBackend> = if args.null_output {
        Arc::new(NullBackend::new())
    } else {
        Arc::new(CpalBackend::new(config.device.clone(), config.buffer_size))
    };
    let engine = AudioEngine::new(config.clone(), backend.as_ref(), Arc::new(FileSourceLoader::new()));
    if engine.is_degraded() {
        warn!("No audio output; playback is silent");
    }

    // Persisted settings, overridden (and re-saved) by the command line
    let volume = match args.volume {
        Some(v) => {
            settings::set_volume(&pool, v).await?;
            v
        }
        None => settings::get_volume(&pool).await?,
    };
    engine.set_volume(volume)?;

    let cutoff = match args.karaoke_cutoff {
        Some(hz) => {
            settings::set_karaoke_cutoff(&pool, hz).await?;
            hz
        }
        None => settings::get_karaoke_cutoff(&pool).await?,
    };
    engine.set_karaoke_bass_cutoff(cutoff)?;
    if args.karaoke {
        engine.set_karaoke_mode(true).await?;
    }

    let timer = match args.sleep_options() {
        Some(options) => {
            let noise = PinkNoiseSource::new(backend.clone(), config.sample_rate);
            let timer = SleepTimer::with_settings(engine.clone(), noise, pool.clone()).await?;
            Some((timer, options))
        }
        None => None,
    };

    let printer = args.json.then(|| spawn_json_printer(&engine));

    let playlist = play_files(&engine, &args.files, timer.as_ref());
    let sleep_done = async {
        match &timer {
            Some((timer, _)) => wait_for_sleep(timer).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        result = playlist => result?,
        _ = sleep_done => info!("Sleep timer finished"),
        _ = shutdown_signal() => {},
    }

    if let Some((timer, _)) = &timer {
        timer.cancel().await;
    }
    if let Some(printer) = printer {
        printer.abort();
    }
    engine.dispose();
    pool.close().await;

    info!("Shutdown complete");
    Ok(())
}

/// Play `files` in order, preloading each next file during the current one
async fn play_files(
    engine: &AudioEngine,
    files: &[PathBuf],
    timer: Option<&(SleepTimer, SleepTimerOptions)>,
) -> Result<()> {
    let urls: Vec<String> = files.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    let Some(first) = urls.first() else {
        warn!("Nothing to play");
        return Ok(());
    };

    let mut events = engine.subscribe();

    engine
        .load(first)
        .await
        .with_context(|| format!("Failed to load {}", first))?;
    engine.play().await.context("Failed to start playback")?;
    info!("Playing {} ({:.1}s)", first, engine.duration());

    if let Some((timer, options)) = timer {
        timer.start(*options).await?;
        info!("Sleep timer: {}", timer.status().phase);
    }

    for next in &urls[1..] {
        if let Err(e) = engine.preload(next).await {
            warn!("Skipping {}: {}", next, e);
            continue;
        }
        wait_for_end(&mut events).await;

        let duration = engine.seamless_switch(0.0, 0).await?;
        engine.play().await?;
        info!("Playing {} ({:.1}s)", next, duration);
    }

    wait_for_end(&mut events).await;
    info!("Playlist finished");
    Ok(())
}

async fn wait_for_end(events: &mut tokio::sync::broadcast::Receiver<PlayerEvent>) {
    loop {
        match events.recv().await {
            Ok(PlayerEvent::Ended) => return,
            Ok(PlayerEvent::Error { message }) => warn!("Playback error: {}", message),
            Ok(event) => debug!("{:?}", event),
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return,
        }
    }
}

async fn wait_for_sleep(timer: &SleepTimer) {
    let mut phases = timer.subscribe();
    loop {
        match phases.recv().await {
            Ok(change) => {
                info!("Sleep timer: {} -> {}", change.from, change.to);
                if change.to == SleepPhase::Stopped {
                    return;
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return,
        }
    }
}

fn spawn_json_printer(engine: &AudioEngine) -> tokio::task::JoinHandle<()> {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!("Failed to serialize {}: {}", event.event_type(), e),
                },
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => return,
            }
        }
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
