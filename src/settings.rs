use log::{LevelFilter, debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, RwLock};

use crate::render::{DEFAULT_CACHE_SIZE, DEFAULT_WORKERS, EvictionAnchor};
use crate::signature::{DEFAULT_CONTRAST, DEFAULT_PADDING};

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
pub const APP_NAME: &str = "inkpage";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Ready pages kept by the render cache
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    #[serde(default = "default_render_workers")]
    pub render_workers: usize,

    #[serde(default)]
    pub eviction_anchor: EvictionAnchor,

    /// Raster width in pixels for rendered pages
    #[serde(default = "default_page_width")]
    pub page_width: u32,

    #[serde(default = "default_signature_contrast")]
    pub signature_contrast: f32,

    #[serde(default = "default_signature_padding")]
    pub signature_padding: u32,

    #[serde(default = "default_sensitivity")]
    pub default_sensitivity: u8,

    #[serde(default = "default_signature_max_width")]
    pub signature_max_width: u32,

    #[serde(default = "default_signature_max_height")]
    pub signature_max_height: u32,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

fn default_render_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_page_width() -> u32 {
    1200
}

fn default_signature_contrast() -> f32 {
    DEFAULT_CONTRAST
}

fn default_signature_padding() -> u32 {
    DEFAULT_PADDING
}

fn default_sensitivity() -> u8 {
    50
}

fn default_signature_max_width() -> u32 {
    800
}

fn default_signature_max_height() -> u32 {
    400
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            cache_size: default_cache_size(),
            render_workers: default_render_workers(),
            eviction_anchor: EvictionAnchor::default(),
            page_width: default_page_width(),
            signature_contrast: default_signature_contrast(),
            signature_padding: default_signature_padding(),
            default_sensitivity: default_sensitivity(),
            signature_max_width: default_signature_max_width(),
            signature_max_height: default_signature_max_height(),
            log_level: default_log_level(),
        }
    }
}

static SETTINGS: LazyLock<RwLock<Settings>> = LazyLock::new(|| RwLock::new(Settings::default()));

pub fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

pub fn load_settings() {
    let Some(path) = settings_path() else {
        warn!("Could not determine config directory, using default settings");
        return;
    };
    if path.exists() {
        load_settings_from_path(&path);
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        if let Ok(settings) = SETTINGS.read() {
            save_settings_to_file(&settings, &path);
        }
    }
}

/// Replaces the global settings with the contents of `path`.
/// Unreadable or unparsable files leave the current settings in place.
pub fn load_settings_from_path(path: &Path) {
    match fs::read_to_string(path) {
        Ok(content) => match serde_yaml::from_str::<Settings>(&content) {
            Ok(mut settings) => {
                debug!("Loaded settings from {path:?}");

                if settings.version < CURRENT_VERSION {
                    migrate_settings(&mut settings);
                    save_settings_to_file(&settings, path);
                }
                sanitize(&mut settings);

                if let Ok(mut global) = SETTINGS.write() {
                    *global = settings;
                }
            }
            Err(e) => {
                error!("Failed to parse settings file {path:?}: {e}");
            }
        },
        Err(e) => {
            error!("Failed to read settings file {path:?}: {e}");
        }
    }
}

fn migrate_settings(settings: &mut Settings) {
    info!(
        "Migrating settings from v{} to v{}",
        settings.version, CURRENT_VERSION
    );

    settings.version = CURRENT_VERSION;
}

fn sanitize(settings: &mut Settings) {
    if settings.cache_size == 0 {
        warn!("cache_size must be at least 1, using {DEFAULT_CACHE_SIZE}");
        settings.cache_size = DEFAULT_CACHE_SIZE;
    }
    if settings.render_workers == 0 {
        warn!("render_workers must be at least 1, using {DEFAULT_WORKERS}");
        settings.render_workers = DEFAULT_WORKERS;
    }
    if !settings.signature_contrast.is_finite() || settings.signature_contrast < 0.0 {
        warn!(
            "Invalid signature_contrast {}, using {DEFAULT_CONTRAST}",
            settings.signature_contrast
        );
        settings.signature_contrast = DEFAULT_CONTRAST;
    }
    settings.default_sensitivity = settings
        .default_sensitivity
        .min(crate::signature::MAX_SENSITIVITY);
}

pub fn save_settings() {
    let Some(path) = settings_path() else {
        warn!("Could not determine config directory, cannot save settings");
        return;
    };

    if let Ok(settings) = SETTINGS.read() {
        save_settings_to_file(&settings, &path);
    }
}

pub fn save_settings_to_file(settings: &Settings, path: &Path) {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                error!("Failed to create config directory {parent:?}: {e}");
                return;
            }
        }
    }

    let content = generate_settings_yaml(settings);

    match fs::write(path, content) {
        Ok(()) => debug!("Saved settings to {path:?}"),
        Err(e) => error!("Failed to save settings to {path:?}: {e}"),
    }
}

fn generate_settings_yaml(settings: &Settings) -> String {
    let mut content = String::new();

    content.push_str(&format!("version: {}\n", settings.version));
    content.push('\n');
    content.push_str("# Page rendering\n");
    content.push_str(&format!("cache_size: {}\n", settings.cache_size));
    content.push_str(&format!("render_workers: {}\n", settings.render_workers));
    let anchor_str = match settings.eviction_anchor {
        EvictionAnchor::Inserted => "inserted",
        EvictionAnchor::LastRequested => "last_requested",
    };
    content.push_str(&format!("eviction_anchor: {anchor_str}\n"));
    content.push_str(&format!("page_width: {}\n", settings.page_width));
    content.push('\n');
    content.push_str("# Signature capture\n");
    content.push_str(&format!(
        "signature_contrast: {:?}\n",
        settings.signature_contrast
    ));
    content.push_str(&format!(
        "signature_padding: {}\n",
        settings.signature_padding
    ));
    content.push_str(&format!(
        "default_sensitivity: {}\n",
        settings.default_sensitivity
    ));
    content.push_str(&format!(
        "signature_max_width: {}\n",
        settings.signature_max_width
    ));
    content.push_str(&format!(
        "signature_max_height: {}\n",
        settings.signature_max_height
    ));
    content.push('\n');
    content.push_str("# One of: off, error, warn, info, debug, trace\n");
    content.push_str(&format!("log_level: \"{}\"\n", settings.log_level));

    content
}

// Public API for accessing/modifying settings

pub fn current() -> Settings {
    SETTINGS.read().map(|s| s.clone()).unwrap_or_default()
}

/// Swaps the in-memory settings without touching the file
pub fn replace(settings: Settings) {
    if let Ok(mut global) = SETTINGS.write() {
        *global = settings;
    }
}

pub fn get_cache_size() -> usize {
    SETTINGS
        .read()
        .map(|s| s.cache_size)
        .unwrap_or_else(|_| default_cache_size())
}

pub fn set_cache_size(size: usize) {
    if let Ok(mut settings) = SETTINGS.write() {
        settings.cache_size = size.max(1);
    }
    save_settings();
}

pub fn get_render_workers() -> usize {
    SETTINGS
        .read()
        .map(|s| s.render_workers)
        .unwrap_or_else(|_| default_render_workers())
}

pub fn get_eviction_anchor() -> EvictionAnchor {
    SETTINGS
        .read()
        .map(|s| s.eviction_anchor)
        .unwrap_or_default()
}

pub fn set_eviction_anchor(anchor: EvictionAnchor) {
    if let Ok(mut settings) = SETTINGS.write() {
        settings.eviction_anchor = anchor;
    }
    save_settings();
}

pub fn get_page_width() -> u32 {
    SETTINGS
        .read()
        .map(|s| s.page_width)
        .unwrap_or_else(|_| default_page_width())
}

pub fn set_page_width(width: u32) {
    if let Ok(mut settings) = SETTINGS.write() {
        settings.page_width = width;
    }
    save_settings();
}

pub fn get_signature_contrast() -> f32 {
    SETTINGS
        .read()
        .map(|s| s.signature_contrast)
        .unwrap_or_else(|_| default_signature_contrast())
}

pub fn get_signature_padding() -> u32 {
    SETTINGS
        .read()
        .map(|s| s.signature_padding)
        .unwrap_or_else(|_| default_signature_padding())
}

pub fn get_default_sensitivity() -> u8 {
    SETTINGS
        .read()
        .map(|s| s.default_sensitivity)
        .unwrap_or_else(|_| default_sensitivity())
}

pub fn set_default_sensitivity(sensitivity: u8) {
    if let Ok(mut settings) = SETTINGS.write() {
        settings.default_sensitivity = sensitivity.min(crate::signature::MAX_SENSITIVITY);
    }
    save_settings();
}

pub fn get_signature_max_width() -> u32 {
    SETTINGS
        .read()
        .map(|s| s.signature_max_width)
        .unwrap_or_else(|_| default_signature_max_width())
}

pub fn get_signature_max_height() -> u32 {
    SETTINGS
        .read()
        .map(|s| s.signature_max_height)
        .unwrap_or_else(|_| default_signature_max_height())
}

/// Configured log level; unknown names fall back to `Info`
pub fn get_log_level() -> LevelFilter {
    let name = SETTINGS
        .read()
        .map(|s| s.log_level.clone())
        .unwrap_or_else(|_| default_log_level());
    name.parse().unwrap_or_else(|_| {
        warn!("Unknown log level {name:?}, using info");
        LevelFilter::Info
    })
}
