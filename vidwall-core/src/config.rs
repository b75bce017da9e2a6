//! Wall configuration.
//!
//! ```json
//! {
//!   "hwaccel": "cuda",
//!   "screens": {
//!     "0": ["intro.mp4", {"path": "loop.mp4", "play_sections": [{"start_time": 0, "duration": 5}]}]
//!   },
//!   "playback": {"buffer_capacity": 6, "segment_tolerance": 0.1}
//! }
//! ```

use crate::segments::{Segment, SegmentTable, DEFAULT_TOLERANCE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Screen key {0:?} is not a screen index")]
    InvalidScreen(String),
    #[error("Segment {index} of {path:?}: {reason}")]
    InvalidSegment {
        path: PathBuf,
        index: usize,
        reason: &'static str,
    },
    #[error("Invalid playback tuning: {0}")]
    InvalidTuning(&'static str),
}

// ============================================================================
// Playback Tuning
// ============================================================================

/// Every tunable of a panel's decode and timing threads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackTuning {
    /// Frame queue slots
    pub buffer_capacity: usize,
    /// Seconds by which segment windows and seek targets are widened
    pub segment_tolerance: f64,
    /// Sleep while paused, full or empty
    pub poll_interval_ms: u64,
    /// Lower bound for the timing thread's not-yet-due sleep
    pub min_sleep_ms: u64,
    /// Upper bound for the timing thread's not-yet-due sleep
    pub max_sleep_ms: u64,
    /// How long `stop` waits for each thread
    pub join_timeout_ms: u64,
}

impl Default for PlaybackTuning {
    fn default() -> Self {
        Self {
            buffer_capacity: crate::frame_queue::DEFAULT_CAPACITY,
            segment_tolerance: DEFAULT_TOLERANCE,
            poll_interval_ms: 5,
            min_sleep_ms: 1,
            max_sleep_ms: 20,
            join_timeout_ms: 2000,
        }
    }
}

impl PlaybackTuning {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn min_sleep(&self) -> Duration {
        Duration::from_millis(self.min_sleep_ms.max(1))
    }

    pub fn max_sleep(&self) -> Duration {
        Duration::from_millis(self.max_sleep_ms).max(self.min_sleep())
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_capacity == 0 {
            return Err(ConfigError::InvalidTuning("buffer_capacity must be at least 1"));
        }
        if !self.segment_tolerance.is_finite() || self.segment_tolerance < 0.0 {
            return Err(ConfigError::InvalidTuning("segment_tolerance must be a non-negative number"));
        }
        if self.max_sleep_ms < self.min_sleep_ms {
            return Err(ConfigError::InvalidTuning("max_sleep_ms is below min_sleep_ms"));
        }
        Ok(())
    }
}

// ============================================================================
// Sources
// ============================================================================

/// One configured video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub play_sections: Vec<Segment>,
    /// Overrides the wall-wide hint
    #[serde(default)]
    pub hwaccel: Option<String>,
}

impl SourceConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            play_sections: Vec::new(),
            hwaccel: None,
        }
    }

    pub fn segments(&self) -> SegmentTable {
        SegmentTable::new(self.play_sections.clone())
    }
}

/// A screen list entry: a bare path or a full source object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScreenEntry {
    Path(PathBuf),
    Source(SourceConfig),
}

impl ScreenEntry {
    pub fn into_source(self) -> SourceConfig {
        match self {
            Self::Path(path) => SourceConfig::new(path),
            Self::Source(source) => source,
        }
    }
}

// ============================================================================
// Wall Config
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WallConfig {
    #[serde(default)]
    pub hwaccel: Option<String>,
    #[serde(default)]
    pub screens: BTreeMap<String, Vec<ScreenEntry>>,
    #[serde(default)]
    pub playback: PlaybackTuning,
}

/// A validated screen: its index and its sources in order
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenConfig {
    pub index: usize,
    pub sources: Vec<SourceConfig>,
}

impl WallConfig {
    /// Load and validate a JSON file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.screens()?;
        config.playback.validate()?;
        Ok(config)
    }

    /// Everything on screen 0, no segments
    pub fn from_inputs<I, P>(inputs: I, hwaccel: Option<String>) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let entries = inputs.into_iter().map(|p| ScreenEntry::Path(p.into())).collect();
        let mut screens = BTreeMap::new();
        screens.insert("0".to_string(), entries);
        Self {
            hwaccel,
            screens,
            playback: PlaybackTuning::default(),
        }
    }

    /// Screens sorted by index, with every segment checked
    pub fn screens(&self) -> Result<Vec<ScreenConfig>, ConfigError> {
        let mut screens = Vec::with_capacity(self.screens.len());

        for (key, entries) in &self.screens {
            let index = key
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidScreen(key.clone()))?;

            let sources: Vec<SourceConfig> = entries.iter().cloned().map(ScreenEntry::into_source).collect();
            for source in &sources {
                for (i, segment) in source.play_sections.iter().enumerate() {
                    if let Some(reason) = segment.problem() {
                        return Err(ConfigError::InvalidSegment {
                            path: source.path.clone(),
                            index: i,
                            reason,
                        });
                    }
                }
            }

            screens.push(ScreenConfig { index, sources });
        }

        screens.sort_by_key(|s| s.index);
        Ok(screens)
    }

    /// Hardware hint for a source: its own, else the wall-wide one
    pub fn hwaccel_for<'a>(&'a self, source: &'a SourceConfig) -> Option<&'a str> {
        source.hwaccel.as_deref().or(self.hwaccel.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "hwaccel": "cuda",
        "screens": {
            "1": ["b.mp4"],
            "0": [
                "a.mp4",
                {"path": "c.mp4", "play_sections": [{"start_time": 0, "duration": 5}, {"start_time": 10, "duration": -1}], "hwaccel": "vaapi"}
            ]
        },
        "playback": {"buffer_capacity": 8}
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = WallConfig::from_json(SAMPLE).unwrap();
        let screens = config.screens().unwrap();

        assert_eq!(screens.len(), 2);
        assert_eq!(screens[0].index, 0);
        assert_eq!(screens[0].sources.len(), 2);
        assert_eq!(screens[0].sources[0].path, PathBuf::from("a.mp4"));
        assert!(screens[0].sources[0].play_sections.is_empty());

        let looped = &screens[0].sources[1];
        assert_eq!(looped.segments().len(), 2);
        assert_eq!(config.hwaccel_for(looped), Some("vaapi"));
        assert_eq!(config.hwaccel_for(&screens[1].sources[0]), Some("cuda"));

        assert_eq!(config.playback.buffer_capacity, 8);
        assert_eq!(config.playback.segment_tolerance, DEFAULT_TOLERANCE);
        assert_eq!(config.playback.poll_interval(), Duration::from_millis(5));
    }

    #[test]
    fn test_screen_keys_sort_numerically() {
        let config = WallConfig::from_json(r#"{"screens": {"10": ["x"], "2": ["y"]}}"#).unwrap();
        let order: Vec<usize> = config.screens().unwrap().iter().map(|s| s.index).collect();
        assert_eq!(order, vec![2, 10]);
    }

    #[test]
    fn test_invalid_screen_key() {
        let result = WallConfig::from_json(r#"{"screens": {"left": ["a.mp4"]}}"#);
        assert!(matches!(result, Err(ConfigError::InvalidScreen(key)) if key == "left"));
    }

    #[test]
    fn test_invalid_segment() {
        let json = r#"{"screens": {"0": [{"path": "a.mp4", "play_sections": [{"start_time": 1, "duration": 0}]}]}}"#;
        let result = WallConfig::from_json(json);
        assert!(matches!(result, Err(ConfigError::InvalidSegment { index: 0, .. })));
    }

    #[test]
    fn test_invalid_tuning() {
        let json = r#"{"screens": {}, "playback": {"buffer_capacity": 0}}"#;
        assert!(matches!(WallConfig::from_json(json), Err(ConfigError::InvalidTuning(_))));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(WallConfig::from_json("{screens"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_from_inputs() {
        let config = WallConfig::from_inputs(["pattern:5", "clip.mp4"], Some("auto".to_string()));
        let screens = config.screens().unwrap();
        assert_eq!(screens.len(), 1);
        assert_eq!(screens[0].sources.len(), 2);
        assert_eq!(config.hwaccel.as_deref(), Some("auto"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = WallConfig::load(file.path()).unwrap();
        assert_eq!(config.screens.len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = WallConfig::load(&dir.path().join("config.json"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
