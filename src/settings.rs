use anyhow::Context;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "docpager";

/// Tunables for the viewer core. Every field falls back to its default when
/// missing from the YAML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerSettings {
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default = "default_min_scale")]
    pub min_scale: f32,

    #[serde(default = "default_max_scale")]
    pub max_scale: f32,

    /// Slack around the scroll bounds inside which a fling may start
    #[serde(default = "default_fling_margin")]
    pub fling_margin: i32,

    /// Pixels between neighbouring pages
    #[serde(default = "default_page_gap")]
    pub page_gap: i32,

    /// Page by swiping sideways; `false` stacks pages vertically
    #[serde(default = "default_true")]
    pub horizontal_scrolling: bool,

    #[serde(default = "default_scroll_duration_ms")]
    pub scroll_duration_ms: u64,

    #[serde(default = "default_delay_ms")]
    pub busy_indicator_delay_ms: u64,

    #[serde(default = "default_delay_ms")]
    pub search_progress_delay_ms: u64,

    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default = "default_min_tap_margin")]
    pub min_tap_margin: i32,

    /// Page size assumed when the engine cannot report one
    #[serde(default = "default_page_width")]
    pub default_page_width: f32,

    #[serde(default = "default_page_height")]
    pub default_page_height: f32,

    /// Reflow parameters for reflowable documents, in points
    #[serde(default = "default_layout_em")]
    pub layout_em: u32,

    #[serde(default = "default_layout_width")]
    pub layout_width: u32,

    #[serde(default = "default_layout_height")]
    pub layout_height: u32,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_min_scale() -> f32 {
    1.0
}

fn default_max_scale() -> f32 {
    64.0
}

/// Zoom factors outside 1x..64x are pulled back to the nearest limit
fn clamp_scale(name: &str, value: f32, fallback: f32) -> f32 {
    let (lo, hi) = (default_min_scale(), default_max_scale());
    if (lo..=hi).contains(&value) {
        return value;
    }
    let clamped = if value.is_nan() {
        fallback
    } else {
        value.clamp(lo, hi)
    };
    warn!("{name} {value} is outside {lo}..={hi}, using {clamped}");
    clamped
}

fn default_fling_margin() -> i32 {
    100
}

fn default_page_gap() -> i32 {
    20
}

fn default_true() -> bool {
    true
}

fn default_scroll_duration_ms() -> u64 {
    400
}

fn default_delay_ms() -> u64 {
    200
}

fn default_worker_threads() -> usize {
    2
}

fn default_min_tap_margin() -> i32 {
    100
}

fn default_page_width() -> f32 {
    612.0
}

fn default_page_height() -> f32 {
    792.0
}

fn default_layout_em() -> u32 {
    10
}

fn default_layout_width() -> u32 {
    312
}

fn default_layout_height() -> u32 {
    504
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            min_scale: default_min_scale(),
            max_scale: default_max_scale(),
            fling_margin: default_fling_margin(),
            page_gap: default_page_gap(),
            horizontal_scrolling: true,
            scroll_duration_ms: default_scroll_duration_ms(),
            busy_indicator_delay_ms: default_delay_ms(),
            search_progress_delay_ms: default_delay_ms(),
            worker_threads: default_worker_threads(),
            min_tap_margin: default_min_tap_margin(),
            default_page_width: default_page_width(),
            default_page_height: default_page_height(),
            layout_em: default_layout_em(),
            layout_width: default_layout_width(),
            layout_height: default_layout_height(),
        }
    }
}

pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

impl ViewerSettings {
    /// Load from `path`, or from the platform config dir when `None`.
    ///
    /// Never fails: a missing file yields defaults, an unreadable or broken
    /// one is logged and also yields defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match preferred_config_path() {
                Some(p) => p,
                None => {
                    warn!("Could not determine config directory, using default settings");
                    return Self::default();
                }
            },
        };

        if !path.exists() {
            info!("Settings file {path:?} not found, using defaults");
            return Self::default();
        }

        match Self::load_from_path(&path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring settings file {path:?}: {e:#}");
                Self::default()
            }
        }
    }

    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {path:?}"))?;
        let mut settings: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file {path:?}"))?;
        debug!("Loaded settings from {path:?}");
        settings.validate();
        Ok(settings)
    }

    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory {parent:?}"))?;
            }
        }
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).with_context(|| format!("Failed to save settings to {path:?}"))?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }

    /// Replace out-of-range values with their defaults
    pub fn validate(&mut self) {
        self.min_scale = clamp_scale("min_scale", self.min_scale, default_min_scale());
        if !(self.max_scale >= self.min_scale) {
            warn!(
                "max_scale {} is below min_scale {}, using {}",
                self.max_scale,
                self.min_scale,
                default_max_scale()
            );
            self.max_scale = default_max_scale();
        }
        self.max_scale = clamp_scale("max_scale", self.max_scale, default_max_scale());
        if self.worker_threads == 0 {
            warn!("worker_threads must be at least 1, using {}", default_worker_threads());
            self.worker_threads = default_worker_threads();
        }
        if !(self.default_page_width > 0.0 && self.default_page_height > 0.0) {
            warn!("Default page size must be positive, using US Letter");
            self.default_page_width = default_page_width();
            self.default_page_height = default_page_height();
        }
        if self.layout_em == 0 {
            self.layout_em = default_layout_em();
        }
    }

    pub fn scroll_duration(&self) -> Duration {
        Duration::from_millis(self.scroll_duration_ms)
    }

    pub fn busy_indicator_delay(&self) -> Duration {
        Duration::from_millis(self.busy_indicator_delay_ms)
    }

    pub fn search_progress_delay(&self) -> Duration {
        Duration::from_millis(self.search_progress_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_viewer_constants() {
        let settings = ViewerSettings::default();
        assert_eq!(settings.min_scale, 1.0);
        assert_eq!(settings.max_scale, 64.0);
        assert_eq!(settings.fling_margin, 100);
        assert_eq!(settings.page_gap, 20);
        assert!(settings.horizontal_scrolling);
        assert_eq!(settings.scroll_duration(), Duration::from_millis(400));
        assert_eq!(settings.search_progress_delay(), Duration::from_millis(200));
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let settings: ViewerSettings =
            serde_yaml::from_str("page_gap: 8\nhorizontal_scrolling: false\n").unwrap();
        assert_eq!(settings.page_gap, 8);
        assert!(!settings.horizontal_scrolling);
        assert_eq!(settings.max_scale, 64.0);
        assert_eq!(settings.worker_threads, 2);
    }

    #[test]
    fn test_validation_replaces_bad_values() {
        let mut settings = ViewerSettings {
            min_scale: 0.0,
            max_scale: 0.5,
            worker_threads: 0,
            ..ViewerSettings::default()
        };
        settings.validate();
        assert_eq!(settings.min_scale, 1.0);
        assert_eq!(settings.max_scale, 64.0);
        assert_eq!(settings.worker_threads, 2);
    }

    #[test]
    fn test_scales_are_kept_within_zoom_limits() {
        let mut settings = ViewerSettings {
            min_scale: 0.25,
            max_scale: 500.0,
            ..ViewerSettings::default()
        };
        settings.validate();
        assert_eq!(settings.min_scale, 1.0);
        assert_eq!(settings.max_scale, 64.0);

        let mut settings = ViewerSettings {
            min_scale: 100.0,
            max_scale: f32::NAN,
            ..ViewerSettings::default()
        };
        settings.validate();
        assert_eq!(settings.min_scale, 64.0);
        assert_eq!(settings.max_scale, 64.0);

        let mut settings = ViewerSettings {
            min_scale: 2.0,
            max_scale: 8.0,
            ..ViewerSettings::default()
        };
        settings.validate();
        assert_eq!((settings.min_scale, settings.max_scale), (2.0, 8.0));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let settings = ViewerSettings {
            page_gap: 32,
            layout_em: 14,
            ..ViewerSettings::default()
        };
        settings.save_to_file(&path).unwrap();

        let loaded = ViewerSettings::load(Some(&path));
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_missing_or_broken_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert_eq!(ViewerSettings::load(Some(&missing)), ViewerSettings::default());

        let broken = dir.path().join("broken.yaml");
        fs::write(&broken, "page_gap: [not, a, number").unwrap();
        assert_eq!(ViewerSettings::load(Some(&broken)), ViewerSettings::default());
    }
}
