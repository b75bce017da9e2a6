//! # Vidwall Player
//!
//! Headless multi-source player: opens every configured source on the wall,
//! logs playback status, and stops on Ctrl+C or after a fixed run time.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vidwall_core::wall::SourceId;
use vidwall_core::{format_time, PixelFormat, PresentationSink, VideoWall, WallConfig};

const DEFAULT_CONFIG: &str = "config.json";
const DEFAULT_STATUS_MS: u64 = 1000;

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
struct PlayerOptions {
    config: Option<PathBuf>,
    inputs: Vec<PathBuf>,
    hwaccel: Option<String>,
    seconds: Option<f64>,
    status_ms: u64,
}

#[derive(Debug, PartialEq)]
enum Invocation {
    Run(PlayerOptions),
    Help,
}

fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut options = PlayerOptions {
        config: None,
        inputs: Vec::new(),
        hwaccel: None,
        seconds: None,
        status_ms: DEFAULT_STATUS_MS,
    };

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = || {
            args.get(i + 1)
                .ok_or_else(|| anyhow::anyhow!("Missing value for {}", flag))
        };

        match flag {
            "--config" | "-c" => {
                options.config = Some(PathBuf::from(value()?));
            }
            "--input" | "-i" => {
                options.inputs.push(PathBuf::from(value()?));
            }
            "--hwaccel" => {
                options.hwaccel = Some(value()?.clone());
            }
            "--seconds" | "-t" => {
                let raw = value()?;
                let seconds = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|s| s.is_finite() && *s > 0.0)
                    .ok_or_else(|| anyhow::anyhow!("Invalid run time {}", raw))?;
                options.seconds = Some(seconds);
            }
            "--status-ms" => {
                let raw = value()?;
                let status_ms = raw
                    .parse::<u64>()
                    .map_err(|e| anyhow::anyhow!("Invalid status interval {}: {}", raw, e))?;
                options.status_ms = status_ms.max(1);
            }
            "--help" | "-h" => return Ok(Invocation::Help),
            other => {
                return Err(anyhow::anyhow!("Unknown argument {:?}", other));
            }
        }
        i += 2;
    }

    Ok(Invocation::Run(options))
}

fn print_usage() {
    eprintln!(
        "\nUsage:\n  vidwall [--config <file>] [--input <file>]... [--hwaccel <hint>] [--seconds <n>] [--status-ms <n>]\n\n\
         Without --config or --input, reads {}.\n\
         An input of the form pattern:<seconds> plays a built-in test pattern.\n",
        DEFAULT_CONFIG
    );
}

/// The wall to open: the config file, plus any `--input` sources on screen 0
fn build_config(options: &PlayerOptions) -> Result<WallConfig> {
    let mut config = match (&options.config, options.inputs.is_empty()) {
        (Some(path), _) => {
            WallConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))?
        }
        (None, true) => {
            let path = PathBuf::from(DEFAULT_CONFIG);
            WallConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))?
        }
        (None, false) => WallConfig::default(),
    };

    if !options.inputs.is_empty() {
        let screen = config.screens.entry("0".to_string()).or_default();
        screen.extend(
            options
                .inputs
                .iter()
                .cloned()
                .map(vidwall_core::config::ScreenEntry::Path),
        );
    }

    if let Some(hwaccel) = &options.hwaccel {
        config.hwaccel = Some(hwaccel.clone());
    }

    Ok(config)
}

// ============================================================================
// Sink
// ============================================================================

/// Counts frames; stands in for a renderer
#[derive(Default)]
struct CountingSink {
    frames: AtomicU64,
}

impl PresentationSink for CountingSink {
    fn on_frame_ready(&self, _pixels: &[u8], _width: u32, _height: u32, _format: PixelFormat) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }
}

type SinkTable = Vec<(SourceId, Arc<CountingSink>)>;

fn open_wall(config: &WallConfig) -> Result<(VideoWall, SinkTable)> {
    let mut sinks = SinkTable::new();
    let wall = VideoWall::open(config, |id| {
        let sink = Arc::new(CountingSink::default());
        sinks.push((id.clone(), sink.clone()));
        let sink: Arc<dyn PresentationSink> = sink;
        sink
    })?;
    Ok((wall, sinks))
}

fn log_status(wall: &VideoWall, sinks: &SinkTable) {
    for (id, panel) in wall.panels() {
        let frames = sinks
            .iter()
            .find(|(sid, _)| sid == id)
            .map_or(0, |(_, sink)| sink.frames.load(Ordering::Relaxed));
        let stats = panel.stats();

        tracing::info!(
            "{} {} / {} {} frames={} buffered={} faults={}",
            id,
            format_time(panel.current_position()),
            format_time(panel.duration()),
            if panel.is_paused() { "paused" } else { "playing" },
            frames,
            stats.buffered_frames,
            stats.decode_faults
        );
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let options = match parse_args(&args) {
        Ok(Invocation::Run(options)) => options,
        Ok(Invocation::Help) => {
            print_usage();
            return Ok(());
        }
        Err(e) => {
            print_usage();
            return Err(e);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vidwall=info")))
        .init();

    tracing::info!("Vidwall {} starting", vidwall_core::VERSION);

    let config = build_config(&options)?;
    let (wall, sinks) = tokio::task::spawn_blocking(move || open_wall(&config))
        .await
        .context("Wall open task failed")??;

    if wall.panel_count() == 0 {
        return Err(anyhow::anyhow!("No sources could be opened"));
    }
    let wall = Arc::new(wall);

    let mut status = tokio::time::interval(Duration::from_millis(options.status_ms));
    let deadline = async {
        match options.seconds {
            Some(seconds) => tokio::time::sleep(Duration::from_secs_f64(seconds)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = status.tick() => log_status(&wall, &sinks),
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for Ctrl+C")?;
                tracing::info!("Interrupted");
                break;
            }
            _ = &mut deadline => {
                tracing::info!("Run time elapsed");
                break;
            }
        }
    }

    log_status(&wall, &sinks);
    let stopping = wall.clone();
    tokio::task::spawn_blocking(move || stopping.stop())
        .await
        .context("Wall stop task failed")?;

    tracing::info!("Vidwall stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("vidwall").chain(list.iter().copied()).map(String::from).collect()
    }

    fn run_options(list: &[&str]) -> PlayerOptions {
        match parse_args(&args(list)).unwrap() {
            Invocation::Run(options) => options,
            Invocation::Help => panic!("unexpected help"),
        }
    }

    #[test]
    fn test_defaults() {
        let options = run_options(&[]);
        assert_eq!(options.config, None);
        assert!(options.inputs.is_empty());
        assert_eq!(options.status_ms, DEFAULT_STATUS_MS);
        assert_eq!(options.seconds, None);
    }

    #[test]
    fn test_repeated_inputs_and_flags() {
        let options = run_options(&[
            "--input", "a.mp4", "-i", "pattern:5", "--hwaccel", "cuda", "--seconds", "2.5", "--status-ms", "250",
        ]);
        assert_eq!(options.inputs, vec![PathBuf::from("a.mp4"), PathBuf::from("pattern:5")]);
        assert_eq!(options.hwaccel.as_deref(), Some("cuda"));
        assert_eq!(options.seconds, Some(2.5));
        assert_eq!(options.status_ms, 250);
    }

    #[test]
    fn test_help() {
        assert_eq!(parse_args(&args(&["--help"])).unwrap(), Invocation::Help);
    }

    #[test]
    fn test_bad_arguments() {
        assert!(parse_args(&args(&["--input"])).is_err());
        assert!(parse_args(&args(&["--seconds", "-1"])).is_err());
        assert!(parse_args(&args(&["--status-ms", "soon"])).is_err());
        assert!(parse_args(&args(&["--fullscreen"])).is_err());
    }

    #[test]
    fn test_inputs_build_screen_zero() {
        let options = run_options(&["--input", "pattern:3", "--hwaccel", "vaapi"]);
        let config = build_config(&options).unwrap();
        let screens = config.screens().unwrap();
        assert_eq!(screens.len(), 1);
        assert_eq!(screens[0].sources[0].path, PathBuf::from("pattern:3"));
        assert_eq!(config.hwaccel.as_deref(), Some("vaapi"));
    }

    #[test]
    fn test_open_wall_counts_frames() {
        let config = WallConfig::from_inputs(["pattern:2"], None);
        let (wall, sinks) = open_wall(&config).unwrap();
        assert_eq!(sinks.len(), 1);

        std::thread::sleep(Duration::from_millis(200));
        wall.stop();
        assert!(sinks[0].1.frames.load(Ordering::Relaxed) > 0);
    }
}
