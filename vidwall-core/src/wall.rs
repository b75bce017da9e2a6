//! Multi-screen video wall.
//!
//! Opens one [`VideoPanel`] per configured source. Panels are independent:
//! a source that fails to open is logged and skipped, and the rest play.

use crate::config::{ConfigError, ScreenConfig, WallConfig};
use crate::decode::DecoderOptions;
use crate::player::{PanelOptions, VideoPanel};
use crate::sink::PresentationSink;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Where a panel sits on the wall
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceId {
    pub screen: usize,
    /// Position within the screen's source list
    pub slot: usize,
    pub path: PathBuf,
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "screen {} #{} ({})", self.screen, self.slot, self.path.display())
    }
}

pub struct Screen {
    index: usize,
    panels: Vec<(SourceId, VideoPanel)>,
}

impl Screen {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn panels(&self) -> impl Iterator<Item = (&SourceId, &VideoPanel)> {
        self.panels.iter().map(|(id, panel)| (id, panel))
    }

    pub fn len(&self) -> usize {
        self.panels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.panels.is_empty()
    }
}

pub struct VideoWall {
    screens: Vec<Screen>,
    skipped: Vec<SourceId>,
}

impl VideoWall {
    /// Open every source in `config`.
    ///
    /// `make_sink` is called once per source before it opens. Screens come
    /// out in ascending index order.
    pub fn open<F>(config: &WallConfig, mut make_sink: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&SourceId) -> Arc<dyn PresentationSink>,
    {
        let mut screens = Vec::new();
        let mut skipped = Vec::new();

        for ScreenConfig { index, sources } in config.screens()? {
            let mut panels = Vec::with_capacity(sources.len());

            for (slot, source) in sources.iter().enumerate() {
                let id = SourceId {
                    screen: index,
                    slot,
                    path: source.path.clone(),
                };

                let options = PanelOptions {
                    decoder: DecoderOptions {
                        hwaccel: config.hwaccel_for(source).map(str::to_string),
                    },
                    segments: source.segments(),
                    tuning: config.playback.clone(),
                    start_paused: false,
                };

                match VideoPanel::open(&source.path, options, make_sink(&id)) {
                    Ok(panel) => panels.push((id, panel)),
                    Err(e) => {
                        tracing::error!("Skipping {}: {}", id, e);
                        skipped.push(id);
                    }
                }
            }

            screens.push(Screen { index, panels });
        }

        let wall = Self { screens, skipped };
        tracing::info!(
            "Video wall open: {} screens, {} panels, {} skipped",
            wall.screens.len(),
            wall.panel_count(),
            wall.skipped.len()
        );
        Ok(wall)
    }

    pub fn screens(&self) -> &[Screen] {
        &self.screens
    }

    /// Every panel on every screen
    pub fn panels(&self) -> impl Iterator<Item = (&SourceId, &VideoPanel)> {
        self.screens.iter().flat_map(Screen::panels)
    }

    pub fn panel(&self, id: &SourceId) -> Option<&VideoPanel> {
        self.panels().find(|(pid, _)| *pid == id).map(|(_, panel)| panel)
    }

    pub fn panel_count(&self) -> usize {
        self.screens.iter().map(Screen::len).sum()
    }

    /// Sources that failed to open
    pub fn skipped(&self) -> &[SourceId] {
        &self.skipped
    }

    pub fn play_all(&self) {
        self.panels().for_each(|(_, panel)| panel.play());
    }

    pub fn pause_all(&self) {
        self.panels().for_each(|(_, panel)| panel.pause());
    }

    /// Pause everything if anything is playing, otherwise play everything.
    /// Returns true if the wall is now paused.
    pub fn toggle_all(&self) -> bool {
        let any_playing = self.panels().any(|(_, panel)| !panel.is_paused());
        if any_playing {
            self.pause_all();
        } else {
            self.play_all();
        }
        any_playing
    }

    pub fn stop(&self) {
        for (id, panel) in self.panels() {
            tracing::debug!("Stopping {}", id);
            panel.stop();
        }
    }
}

impl Drop for VideoWall {
    fn drop(&mut self) {
        self.stop();
    }
}
