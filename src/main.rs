use anyhow::{Context, Result};
use birdtab::config::Config;
use birdtab::model::{Coordinates, MediaKind, PhotoBackend};
use birdtab::orchestrator::FetchOrchestrator;
use birdtab::paths::default_config_path;
use birdtab::resolvers::{ImageSearchResolver, LibraryResolver, MediaResolver};
use birdtab::settings::{QuietHours, SettingsStore};
use birdtab::sightings::{EbirdClient, SampleSightings, SightingProvider};
use birdtab::store::{FileKvStore, SightingCache, ViewHistory, ensure_install_stamp};
use birdtab::transport::{BackgroundService, CurrentBird, Frontend, spawn_background};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "birdtab")]
#[command(about = "Fetch a local bird of the day with photo, song and video")]
struct Cli {
    /// Path to birdtab.toml; defaults to the data directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve and print the current bird, hitting the cache when valid.
    Fetch(FetchArgs),
    /// Show recently seen birds, newest first.
    History(HistoryArgs),
    /// Drop the cached bird and/or the view history.
    Clear(ClearArgs),
    /// Inspect or change persisted preferences.
    Settings(SettingsArgs),
}

#[derive(Debug, Args, Clone)]
struct FetchArgs {
    /// Override the stored region latitude (persisted with --lng).
    #[arg(long, requires = "lng")]
    lat: Option<f64>,

    /// Override the stored region longitude (persisted with --lat).
    #[arg(long, requires = "lat")]
    lng: Option<f64>,

    /// Photo backend: image-search or bird-library. Persisted; switching
    /// backends invalidates the cached bird.
    #[arg(long)]
    backend: Option<PhotoBackend>,

    /// Also resolve a video for the sighting.
    #[arg(long, action = ArgAction::SetTrue)]
    video: bool,

    /// HTTP timeout for provider calls, e.g. "10s".
    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args, Clone)]
struct HistoryArgs {
    #[arg(long, default_value_t = 10)]
    limit: usize,

    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args, Clone)]
struct ClearArgs {
    #[arg(long, action = ArgAction::SetTrue)]
    cache: bool,

    #[arg(long, action = ArgAction::SetTrue)]
    history: bool,
}

#[derive(Debug, Args, Clone)]
struct SettingsArgs {
    #[command(subcommand)]
    command: SettingsCommand,
}

#[derive(Debug, Subcommand, Clone)]
enum SettingsCommand {
    /// Print the stored preferences.
    Show,
    /// Switch the photo backend, invalidating the cached bird on change.
    SetBackend { backend: PhotoBackend },
    /// Set the sighting region.
    SetRegion { lat: f64, lng: f64 },
    /// Turn autoplay on or off.
    SetAutoplay {
        #[arg(action = ArgAction::Set)]
        on: bool,
    },
    /// Set the playback volume (0.0-1.0).
    SetVolume { volume: f32 },
    /// Suppress autoplay between two hours (0-23); the window may wrap
    /// midnight.
    SetQuietHours { start_hour: u32, end_hour: u32 },
    /// Remove the quiet-hours window.
    ClearQuietHours,
}

fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime::parse_duration(value).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("birdtab=info")),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = Config::load(&config_path)?;

    let store = Arc::new(FileKvStore::new(&config.data_dir));
    ensure_install_stamp(store.as_ref(), Utc::now())
        .await
        .context("failed to record install stamp")?;

    match cli.command {
        Commands::Fetch(args) => run_fetch(config, store, args).await,
        Commands::History(args) => run_history(store, args).await,
        Commands::Clear(args) => run_clear(store, args).await,
        Commands::Settings(args) => run_settings(store, args.command).await,
    }
}

async fn run_fetch(config: Config, store: Arc<FileKvStore>, args: FetchArgs) -> Result<()> {
    let settings = SettingsStore::new(store.clone());

    if let Some(backend) = args.backend {
        settings.set_photo_backend(backend).await?;
    }
    let mut prefs = settings.load().await?;
    let mut dirty = false;
    if let (Some(lat), Some(lng)) = (args.lat, args.lng) {
        prefs.region = Coordinates { lat, lng };
        dirty = true;
    }
    if args.video && !prefs.video_mode {
        prefs.video_mode = true;
        dirty = true;
    }
    if dirty {
        settings.save(&prefs).await?;
    }

    let timeout = args.timeout.unwrap_or(config.http_timeout);
    let orchestrator = build_orchestrator(&config, store.clone(), timeout)?;
    let history = ViewHistory::new(store.clone());

    let service = BackgroundService::new(orchestrator, settings);
    let (client, handle) = spawn_background(service);
    let frontend = Frontend::new(client, history);

    let current = frontend.current_bird().await;
    drop(frontend);
    handle.await.context("background service task failed")?;

    match current {
        Ok(current) => {
            print_bird(&current, args.json)?;
            Ok(())
        }
        Err(err) => anyhow::bail!("{err}"),
    }
}

fn build_orchestrator(
    config: &Config,
    store: Arc<FileKvStore>,
    timeout: Duration,
) -> Result<FetchOrchestrator> {
    let sightings: Arc<dyn SightingProvider> = match &config.ebird_api_key {
        Some(key) => Arc::new(EbirdClient::new(key.clone(), timeout)?),
        None => {
            eprintln!("EBIRD_API_KEY is not set. Falling back to sample sighting data.");
            Arc::new(SampleSightings)
        }
    };

    let image_search: Arc<dyn MediaResolver> = Arc::new(ImageSearchResolver::new(
        config.image_search_key.clone().unwrap_or_default(),
        timeout,
    )?);

    Ok(FetchOrchestrator::new(
        sightings,
        image_search,
        Arc::new(LibraryResolver::new(MediaKind::Photo, timeout)?),
        Arc::new(LibraryResolver::new(MediaKind::Audio, timeout)?),
        Arc::new(LibraryResolver::new(MediaKind::Video, timeout)?),
        SightingCache::new(store.clone()),
        ViewHistory::new(store),
    ))
}

fn print_bird(current: &CurrentBird, json: bool) -> Result<()> {
    let record = current.record();
    if json {
        println!("{}", serde_json::to_string_pretty(record)?);
        return Ok(());
    }

    if matches!(current, CurrentBird::Stale(_)) {
        println!("(offline: showing the last bird you saw)");
    }
    println!("{} ({})", record.common_name, record.scientific_name);
    if !record.location.is_empty() {
        println!("  seen near: {}", record.location);
    }
    println!("  about: {}", record.reference_url);
    println!(
        "  photo: {} (by {})",
        record.image.url, record.image.contributor
    );
    if let Some(audio) = &record.audio {
        println!("  song:  {} (by {})", audio.url, audio.contributor);
    }
    if let Some(video) = &record.video {
        println!("  video: {} (by {})", video.url, video.contributor);
    }
    Ok(())
}

async fn run_history(store: Arc<FileKvStore>, args: HistoryArgs) -> Result<()> {
    let history = ViewHistory::new(store);
    let mut entries = history.list().await?;
    entries.reverse(); // newest first
    entries.truncate(args.limit);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("no birds seen yet");
        return Ok(());
    }
    for entry in entries {
        println!(
            "{}  {} ({})",
            entry.resolved_at.format("%Y-%m-%d %H:%M"),
            entry.record.common_name,
            entry.record.species_code
        );
    }
    Ok(())
}

async fn run_clear(store: Arc<FileKvStore>, args: ClearArgs) -> Result<()> {
    // No flags means clear everything.
    let all = !args.cache && !args.history;
    if args.cache || all {
        SightingCache::new(store.clone()).invalidate().await?;
        println!("cached bird cleared");
    }
    if args.history || all {
        ViewHistory::new(store).clear().await?;
        println!("view history cleared");
    }
    Ok(())
}

async fn run_settings(store: Arc<FileKvStore>, command: SettingsCommand) -> Result<()> {
    let settings = SettingsStore::new(store);
    match command {
        SettingsCommand::Show => {
            let prefs = settings.load().await?;
            println!("region:        {}", prefs.region);
            println!("photo backend: {}", prefs.photo_backend);
            println!("video mode:    {}", prefs.video_mode);
            println!("autoplay:      {}", prefs.autoplay);
            match prefs.quiet_hours {
                Some(window) => println!(
                    "quiet hours:   {:02}:00-{:02}:00",
                    window.start_hour, window.end_hour
                ),
                None => println!("quiet hours:   off"),
            }
            println!("muted:         {}", prefs.muted);
            println!("volume:        {:.2}", prefs.volume);
        }
        SettingsCommand::SetBackend { backend } => {
            settings.set_photo_backend(backend).await?;
            println!("photo backend set to {backend}");
        }
        SettingsCommand::SetRegion { lat, lng } => {
            let mut prefs = settings.load().await?;
            prefs.region = Coordinates { lat, lng };
            settings.save(&prefs).await?;
            println!("region set to {}", prefs.region);
        }
        SettingsCommand::SetAutoplay { on } => {
            let mut prefs = settings.load().await?;
            prefs.autoplay = on;
            settings.save(&prefs).await?;
            println!("autoplay {}", if on { "on" } else { "off" });
        }
        SettingsCommand::SetVolume { volume } => {
            if !(0.0..=1.0).contains(&volume) {
                anyhow::bail!("volume must be between 0.0 and 1.0");
            }
            let mut prefs = settings.load().await?;
            prefs.volume = volume;
            settings.save(&prefs).await?;
            println!("volume set to {volume:.2}");
        }
        SettingsCommand::SetQuietHours {
            start_hour,
            end_hour,
        } => {
            if start_hour > 23 || end_hour > 23 {
                anyhow::bail!("hours must be 0-23");
            }
            let mut prefs = settings.load().await?;
            prefs.quiet_hours = Some(QuietHours {
                start_hour,
                end_hour,
            });
            settings.save(&prefs).await?;
            println!("quiet hours set to {start_hour:02}:00-{end_hour:02}:00");
        }
        SettingsCommand::ClearQuietHours => {
            let mut prefs = settings.load().await?;
            prefs.quiet_hours = None;
            settings.save(&prefs).await?;
            println!("quiet hours cleared");
        }
    }
    Ok(())
}
