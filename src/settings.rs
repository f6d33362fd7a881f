use anyhow::Context;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::viewport::{Bitmap, ControllerSettings, TileLimits, ZoomLimits};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "pageview";

/// Physical memory assumed when the platform cannot report it
const FALLBACK_PHYSICAL_MEMORY: usize = 2 * 1024 * 1024 * 1024;

/// Tunables for the viewport engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Threads shared by page renders and the background metrics scan
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Pages measured synchronously on open
    #[serde(default = "default_initial_scan_pages")]
    pub initial_scan_pages: usize,

    /// Pages measured per background scan step
    #[serde(default = "default_scan_chunk_pages")]
    pub scan_chunk_pages: usize,

    /// Pages rendered ahead of and behind the visible range
    #[serde(default = "default_prerender_pages")]
    pub prerender_pages: usize,

    #[serde(default = "default_cache_memory_fraction")]
    pub cache_memory_fraction: f64,

    #[serde(default = "default_max_cache_bytes")]
    pub max_cache_bytes: usize,

    #[serde(default = "default_min_zoom")]
    pub min_zoom: f32,

    #[serde(default = "default_max_zoom")]
    pub max_zoom: f32,

    #[serde(default = "default_double_tap_zoom")]
    pub double_tap_zoom: f32,

    #[serde(default = "default_double_tap_duration_ms")]
    pub double_tap_duration_ms: u64,

    #[serde(default = "default_fling_render_interval_ms")]
    pub fling_render_interval_ms: u64,

    #[serde(default = "default_eviction_rerender_throttle_ms")]
    pub eviction_rerender_throttle_ms: u64,

    /// Eviction re-renders allowed per page until the next zoom or resize
    #[serde(default = "default_eviction_rerender_limit")]
    pub eviction_rerender_limit: u32,

    /// Pages kept on either side of a page whose raster allocation failed
    #[serde(default = "default_oom_keep_radius")]
    pub oom_keep_radius: usize,

    #[serde(default = "default_max_tile_dimension")]
    pub max_tile_dimension: u32,

    #[serde(default = "default_max_tile_bytes")]
    pub max_tile_bytes: usize,

    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Vertical space between pages, in screen pixels at zoom 1
    #[serde(default = "default_page_gap")]
    pub page_gap: f32,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_worker_count() -> usize {
    2
}

fn default_initial_scan_pages() -> usize {
    10
}

fn default_scan_chunk_pages() -> usize {
    16
}

fn default_prerender_pages() -> usize {
    3
}

fn default_cache_memory_fraction() -> f64 {
    0.125
}

fn default_max_cache_bytes() -> usize {
    512 * 1024 * 1024
}

fn default_min_zoom() -> f32 {
    0.5
}

fn default_max_zoom() -> f32 {
    5.0
}

fn default_double_tap_zoom() -> f32 {
    2.5
}

fn default_double_tap_duration_ms() -> u64 {
    250
}

fn default_fling_render_interval_ms() -> u64 {
    200
}

fn default_eviction_rerender_throttle_ms() -> u64 {
    500
}

fn default_eviction_rerender_limit() -> u32 {
    8
}

fn default_oom_keep_radius() -> usize {
    3
}

fn default_max_tile_dimension() -> u32 {
    8192
}

fn default_max_tile_bytes() -> usize {
    128 * 1024 * 1024
}

fn default_shutdown_grace_ms() -> u64 {
    150
}

fn default_page_gap() -> f32 {
    8.0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            worker_count: default_worker_count(),
            initial_scan_pages: default_initial_scan_pages(),
            scan_chunk_pages: default_scan_chunk_pages(),
            prerender_pages: default_prerender_pages(),
            cache_memory_fraction: default_cache_memory_fraction(),
            max_cache_bytes: default_max_cache_bytes(),
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
            double_tap_zoom: default_double_tap_zoom(),
            double_tap_duration_ms: default_double_tap_duration_ms(),
            fling_render_interval_ms: default_fling_render_interval_ms(),
            eviction_rerender_throttle_ms: default_eviction_rerender_throttle_ms(),
            eviction_rerender_limit: default_eviction_rerender_limit(),
            oom_keep_radius: default_oom_keep_radius(),
            max_tile_dimension: default_max_tile_dimension(),
            max_tile_bytes: default_max_tile_bytes(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            page_gap: default_page_gap(),
        }
    }
}

/// `<config dir>/pageview/config.yaml`
pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

impl EngineConfig {
    /// Load from the user config directory, falling back to defaults
    #[must_use]
    pub fn load() -> Self {
        let Some(path) = preferred_config_path() else {
            warn!("Could not determine config directory, using default settings");
            return Self::default();
        };
        Self::load_or_default(&path)
    }

    /// Load from `path`. Unreadable or malformed files are logged and
    /// replaced by defaults.
    #[must_use]
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load_from_path(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load settings from {path:?}: {e:#}");
                Self::default()
            }
        }
    }

    /// Load from `path`; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!("Settings file not found at {path:?}, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).with_context(|| format!("reading {path:?}"))?;
        let mut config: Self =
            serde_yaml::from_str(&content).with_context(|| format!("parsing {path:?}"))?;
        debug!("Loaded settings from {path:?}");

        if config.version < CURRENT_VERSION {
            info!(
                "Migrating settings from v{} to v{}",
                config.version, CURRENT_VERSION
            );
            config.version = CURRENT_VERSION;
        }
        Ok(config.sanitized())
    }

    pub fn save_to_path(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating config directory {parent:?}"))?;
            }
        }
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content).with_context(|| format!("writing {path:?}"))?;
        debug!("Saved settings to {path:?}");
        Ok(())
    }

    /// Replace values the engine cannot run with
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();

        if self.worker_count == 0 {
            warn!("worker_count must be at least 1");
            self.worker_count = 1;
        }
        if self.scan_chunk_pages == 0 {
            warn!("scan_chunk_pages must be at least 1");
            self.scan_chunk_pages = 1;
        }
        if !(self.cache_memory_fraction > 0.0 && self.cache_memory_fraction <= 1.0) {
            warn!(
                "cache_memory_fraction {} out of range, using {}",
                self.cache_memory_fraction, defaults.cache_memory_fraction
            );
            self.cache_memory_fraction = defaults.cache_memory_fraction;
        }
        let zoom_ok = self.min_zoom.is_finite()
            && self.max_zoom.is_finite()
            && self.min_zoom > 0.0
            && self.min_zoom <= self.max_zoom;
        if !zoom_ok {
            warn!(
                "Invalid zoom range {}..{}, using defaults",
                self.min_zoom, self.max_zoom
            );
            self.min_zoom = defaults.min_zoom;
            self.max_zoom = defaults.max_zoom;
        }
        if !self.double_tap_zoom.is_finite() {
            self.double_tap_zoom = defaults.double_tap_zoom;
        }
        self.double_tap_zoom = self.double_tap_zoom.clamp(self.min_zoom, self.max_zoom);
        if !(self.page_gap.is_finite() && self.page_gap >= 0.0) {
            self.page_gap = defaults.page_gap;
        }
        self.max_tile_dimension = self.max_tile_dimension.max(1);
        self.max_tile_bytes = self.max_tile_bytes.max(Bitmap::BYTES_PER_PIXEL);
        self
    }

    /// Tile cache budget in bytes
    #[must_use]
    pub fn cache_budget(&self) -> usize {
        let memory = physical_memory().unwrap_or(FALLBACK_PHYSICAL_MEMORY);
        let share = (memory as f64 * self.cache_memory_fraction) as usize;
        share.min(self.max_cache_bytes)
    }

    #[must_use]
    pub fn zoom_limits(&self) -> ZoomLimits {
        ZoomLimits {
            min: self.min_zoom,
            max: self.max_zoom,
        }
    }

    #[must_use]
    pub(crate) fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            limits: self.zoom_limits(),
            double_tap_zoom: self.double_tap_zoom,
            double_tap_duration: Duration::from_millis(self.double_tap_duration_ms),
            fling_render_interval: Duration::from_millis(self.fling_render_interval_ms),
            page_gap: self.page_gap,
        }
    }

    #[must_use]
    pub(crate) fn tile_limits(&self) -> TileLimits {
        TileLimits {
            max_dimension: self.max_tile_dimension,
            max_bytes: self.max_tile_bytes,
            oom_keep_radius: self.oom_keep_radius,
            scan_chunk: self.scan_chunk_pages,
        }
    }

    #[must_use]
    pub fn eviction_throttle(&self) -> Duration {
        Duration::from_millis(self.eviction_rerender_throttle_ms)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(unix)]
fn physical_memory() -> Option<usize> {
    // SAFETY: sysconf only reads system configuration values
    let pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if pages <= 0 || page_size <= 0 {
        return None;
    }
    (pages as usize).checked_mul(page_size as usize)
}

#[cfg(not(unix))]
fn physical_memory() -> Option<usize> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let config = EngineConfig::load_from_path(&dir.path().join("config.yaml")).expect("load");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(&path, "worker_count: 4\nmax_zoom: 8.0\n").expect("write");

        let config = EngineConfig::load_from_path(&path).expect("load");
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.max_zoom, 8.0);
        assert_eq!(config.prerender_pages, 3);
        assert_eq!(config.eviction_rerender_throttle_ms, 500);
    }

    #[test]
    fn malformed_file_falls_back() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("config.yaml");
        fs::write(&path, "worker_count: [not a number\n").expect("write");

        assert!(EngineConfig::load_from_path(&path).is_err());
        assert_eq!(EngineConfig::load_or_default(&path), EngineConfig::default());
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("nested").join("config.yaml");
        let config = EngineConfig {
            prerender_pages: 5,
            page_gap: 12.0,
            ..EngineConfig::default()
        };

        config.save_to_path(&path).expect("save");
        assert_eq!(EngineConfig::load_from_path(&path).expect("load"), config);
    }

    #[test]
    fn sanitize_fixes_unusable_values() {
        let config = EngineConfig {
            worker_count: 0,
            min_zoom: 3.0,
            max_zoom: 1.0,
            cache_memory_fraction: 7.0,
            page_gap: f32::NAN,
            ..EngineConfig::default()
        }
        .sanitized();

        assert_eq!(config.worker_count, 1);
        assert_eq!((config.min_zoom, config.max_zoom), (0.5, 5.0));
        assert_eq!(config.cache_memory_fraction, 0.125);
        assert_eq!(config.page_gap, 8.0);
    }

    #[test]
    fn cache_budget_is_capped() {
        let config = EngineConfig {
            cache_memory_fraction: 1.0,
            max_cache_bytes: 1 << 20,
            ..EngineConfig::default()
        };
        assert_eq!(config.cache_budget(), 1 << 20);
    }
}
