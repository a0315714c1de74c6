use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reel_core::{BackendPreference, Buffering, PixelFormat, PlayerConfig};
use reel_ir::{compile_animations, load_document, AnimationDocument};
use reel_render::{CycleOutcome, MemorySink, OutputTarget, Player, PlayerEvent};

#[derive(Parser)]
#[command(
    name = "reel",
    version,
    about = "Reel: a vector animation player with GPU and software presentation"
)]
struct Cli {
    /// Player configuration file (default: ./reel.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse, validate and compile an animation document
    Check {
        #[arg()]
        file: PathBuf,
    },

    /// Play a document headless on the software path and print statistics
    Play {
        #[arg()]
        file: PathBuf,

        /// Wall-clock seconds to play for
        #[arg(long, default_value_t = 3.0)]
        seconds: f64,

        /// Output size as WIDTHxHEIGHT (default: the document size)
        #[arg(long)]
        size: Option<String>,

        /// Presentation cycles per second
        #[arg(long, default_value_t = 60)]
        rate: u32,
    },

    /// Render one moment of a document to a PNG
    Screenshot {
        #[arg()]
        file: PathBuf,

        /// Time to capture, in seconds
        #[arg(long, default_value_t = 0.0)]
        at: f64,

        /// Output PNG path (default: <name>.png)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output size as WIDTHxHEIGHT (default: the document size)
        #[arg(long)]
        size: Option<String>,
    },

    /// Write the default configuration to a file
    InitConfig {
        #[arg(default_value = "reel.toml")]
        path: PathBuf,
    },

    /// Display version and default settings
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Check { file } => cmd_check(&file),
        Commands::Play {
            file,
            seconds,
            size,
            rate,
        } => cmd_play(config, &file, seconds, size.as_deref(), rate),
        Commands::Screenshot {
            file,
            at,
            output,
            size,
        } => cmd_screenshot(config, &file, at, output, size.as_deref()),
        Commands::InitConfig { path } => cmd_init_config(&path),
        Commands::Info => cmd_info(&config),
    }
}

fn load_config(path: Option<&Path>) -> Result<PlayerConfig> {
    match path {
        Some(path) => PlayerConfig::load_from_file(path)
            .with_context(|| format!("failed to load config: {}", path.display())),
        None => {
            let default_path = Path::new("reel.toml");
            if default_path.exists() {
                tracing::debug!("using ./reel.toml");
                PlayerConfig::load_from_file(default_path)
                    .context("failed to load ./reel.toml")
            } else {
                Ok(PlayerConfig::default())
            }
        }
    }
}

fn read_document(file: &Path) -> Result<AnimationDocument> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read file: {}", file.display()))?;
    load_document(&json).with_context(|| format!("invalid document: {}", file.display()))
}

fn parse_size(size: Option<&str>, document: &AnimationDocument) -> Result<(u32, u32)> {
    let Some(size) = size else {
        return Ok((
            document.width.round().max(1.0) as u32,
            document.height.round().max(1.0) as u32,
        ));
    };
    let (w, h) = size
        .split_once(['x', 'X'])
        .with_context(|| format!("size must look like 640x480, got '{}'", size))?;
    let width: u32 = w.trim().parse().context("invalid width")?;
    let height: u32 = h.trim().parse().context("invalid height")?;
    if width == 0 || height == 0 {
        anyhow::bail!("size must be non-zero, got {}x{}", width, height);
    }
    Ok((width, height))
}

/// A player on the software path, presenting into memory.
fn headless_player(
    mut config: PlayerConfig,
    size: (u32, u32),
) -> Result<(Player, Arc<MemorySink>)> {
    if config.render.backend == BackendPreference::Gpu {
        tracing::warn!("no window in headless mode; using software presentation");
    }
    config.render.backend = BackendPreference::Software;
    let sink = Arc::new(MemorySink::new());
    let target = OutputTarget::new(size.0, size.1).with_sink(sink.clone());
    let player = Player::new(config, target).context("failed to start player")?;
    Ok((player, sink))
}

fn cmd_check(file: &Path) -> Result<()> {
    println!("Checking {}", file.display());
    let document = read_document(file)?;
    println!("   ✓ Parse and validation OK");

    let directives = compile_animations(&document)
        .with_context(|| format!("invalid animation in {}", file.display()))?;
    println!("   ✓ {} animation(s) compiled", directives.len());

    println!("   Size:       {}x{}", document.width, document.height);
    println!("   Elements:   {}", document.all_elements().len());
    let longest = directives
        .iter()
        .filter_map(|d| d.active_duration())
        .map(|d| d.as_seconds())
        .fold(0.0_f64, f64::max);
    let indefinite = directives.iter().any(|d| d.active_duration().is_none());
    println!(
        "   Duration:   {:.3}s{}",
        longest,
        if indefinite { " (some animations repeat indefinitely)" } else { "" }
    );
    Ok(())
}

fn cmd_play(
    config: PlayerConfig,
    file: &Path,
    seconds: f64,
    size: Option<&str>,
    rate: u32,
) -> Result<()> {
    if !seconds.is_finite() || seconds <= 0.0 {
        anyhow::bail!("--seconds must be positive, got {}", seconds);
    }
    let document = read_document(file)?;
    let size = parse_size(size, &document)?;
    let (mut player, sink) = headless_player(config, size)?;
    player.load(document)?;

    let interval = StdDuration::from_secs_f64(1.0 / rate.clamp(1, 1000) as f64);
    let deadline = Instant::now() + StdDuration::from_secs_f64(seconds);
    let started = Instant::now();
    while Instant::now() < deadline {
        let outcome = player.cycle()?;
        for event in player.events() {
            report_event(&event);
        }
        if outcome == CycleOutcome::Halted {
            break;
        }
        std::thread::sleep(interval);
    }

    let stats = player.stats();
    player.shutdown();
    tracing::info!(
        frames = sink.frames_displayed(),
        took_ms = started.elapsed().as_millis() as u64,
        "playback finished"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn report_event(event: &PlayerEvent) {
    match event {
        PlayerEvent::Degrading { from, reason } => {
            tracing::warn!(from = %from, "leaving backend: {}", reason)
        }
        PlayerEvent::Halted { reason } => tracing::error!("playback halted: {}", reason),
        other => tracing::debug!(event = ?other, "player event"),
    }
}

fn cmd_screenshot(
    mut config: PlayerConfig,
    file: &Path,
    at: f64,
    output: Option<PathBuf>,
    size: Option<&str>,
) -> Result<()> {
    let document = read_document(file)?;
    let size = parse_size(size, &document)?;
    let output = output.unwrap_or_else(|| file.with_extension("png"));

    config.render.buffering = Buffering::Single;
    config.render.pixel_format = PixelFormat::Rgba8;
    let (mut player, _sink) = headless_player(config, size)?;
    player.load(document)?;
    player.pause();
    player.seek(at)?;

    let deadline = Instant::now() + StdDuration::from_secs(10);
    loop {
        match player.cycle()? {
            CycleOutcome::Presented => break,
            CycleOutcome::Halted => anyhow::bail!("presentation halted before a frame was shown"),
            _ if Instant::now() > deadline => anyhow::bail!("timed out waiting for a frame"),
            _ => std::thread::sleep(StdDuration::from_millis(1)),
        }
    }

    let frame = player.request_screenshot()?;
    player.shutdown();
    let hash = reel_core::hash::hash_frame(&frame);
    let (width, height) = frame.dimensions();
    let rgba = frame.to_format(PixelFormat::Rgba8);
    let image = image::RgbaImage::from_raw(width, height, rgba.data)
        .context("frame buffer has the wrong size for its dimensions")?;
    image
        .save(&output)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!(
        "Saved {} ({}x{} at {:.3}s, sha256 {})",
        output.display(),
        width,
        height,
        at,
        hash.short()
    );
    Ok(())
}

fn cmd_init_config(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("'{}' already exists", path.display());
    }
    PlayerConfig::default()
        .save_to_file(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

fn cmd_info(config: &PlayerConfig) -> Result<()> {
    println!("Reel animation player");
    println!("   Version:    {}", env!("CARGO_PKG_VERSION"));
    println!(
        "   Buffering:  {:?} ({} slot(s))",
        config.render.buffering,
        config.render.buffering.slot_count()
    );
    println!("   Backend:    {:?}", config.render.backend);
    println!("   VSync:      {}", config.render.vsync);
    println!("   Failover:   after {} missed drawables", config.failover.threshold);
    println!("   Looping:    {}", config.playback.loop_enabled);
    println!("   Rate:       {}x", config.playback.playback_rate);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        let doc = AnimationDocument::new(319.6, 200.0);
        assert_eq!(parse_size(None, &doc).unwrap(), (320, 200));
        assert_eq!(parse_size(Some("64x48"), &doc).unwrap(), (64, 48));
        assert_eq!(parse_size(Some("64X48"), &doc).unwrap(), (64, 48));
        assert!(parse_size(Some("64"), &doc).is_err());
        assert!(parse_size(Some("0x48"), &doc).is_err());
    }

    #[test]
    fn test_headless_forces_software() {
        let mut config = PlayerConfig::default();
        config.render.backend = BackendPreference::Gpu;
        let (player, _sink) = headless_player(config, (4, 4)).unwrap();
        assert_eq!(player.stats().backend, "software");
    }
}
