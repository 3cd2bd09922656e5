//! Persisted local state: last camera position, active canvas and the
//! user's toggles. Stored as `options.toml` in the platform config
//! directory and written atomically (temp file, then rename).

use std::fs;

use serde::{Deserialize, Serialize};

use pixelfield_engine::CanvasId;

fn default_true() -> bool {
    true
}

/// Camera state remembered across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SavedPosition {
    pub canvas: CanvasId,
    pub x: i32,
    pub y: i32,
    pub zoom: f64,
}

/// A stored reference-overlay preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayPreset {
    pub name: String,
    /// Image location, file path or URL.
    pub source: String,
    pub x: i32,
    pub y: i32,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
}

fn default_opacity() -> f32 {
    0.5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Options {
    #[serde(default)]
    pub last_position: Option<SavedPosition>,

    #[serde(default)]
    pub active_canvas: Option<CanvasId>,

    #[serde(default)]
    pub is_dark_mode: Option<bool>,

    #[serde(default)]
    pub grid_enabled: bool,

    #[serde(default = "default_true")]
    pub activity_enabled: bool,

    #[serde(default = "default_true")]
    pub sound_enabled: bool,

    #[serde(default = "default_true")]
    pub zoom_toward_cursor: bool,

    #[serde(default)]
    pub overlay_presets: Vec<OverlayPreset>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            last_position: None,
            active_canvas: None,
            is_dark_mode: None,
            grid_enabled: false,
            activity_enabled: true,
            sound_enabled: true,
            zoom_toward_cursor: true,
            overlay_presets: Vec::new(),
        }
    }
}

impl Options {
    /// Loads the stored options, falling back to defaults when no file
    /// exists yet.
    ///
    /// # Errors
    ///
    /// Fails when an existing file cannot be read or parsed.
    pub fn load_options() -> anyhow::Result<Self> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "GitHub", "pixelfield") {
            let options_file = proj_dirs.config_dir().join("options.toml");
            if options_file.exists() {
                let content = fs::read_to_string(&options_file)?;
                let options: Options = toml::from_str(&content)?;
                return Ok(options);
            }
        }
        Ok(Options::default())
    }

    /// Persists the options.
    ///
    /// # Errors
    ///
    /// Fails when the config directory or file cannot be written.
    pub fn store_options(&self) -> anyhow::Result<()> {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "GitHub", "pixelfield") {
            let file_name = proj_dirs.config_dir().join("options.toml");
            let mut write_name = file_name.clone();
            write_name.set_extension("new");

            fs::create_dir_all(proj_dirs.config_dir())?;

            let toml_string = toml::to_string_pretty(self)?;

            // Write to temp file, then move it into place.
            fs::write(&write_name, toml_string)?;
            fs::rename(&write_name, &file_name)?;
        }
        Ok(())
    }
}
