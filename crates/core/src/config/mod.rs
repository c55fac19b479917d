use std::{collections::HashMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::{LedCavaError, Result};

/// Top-level configuration structure, mirroring `settings.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub display: DisplayConfig,
    pub audio: AudioConfig,
    pub effects: EffectsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            display: DisplayConfig::default(),
            audio: AudioConfig::default(),
            effects: EffectsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| LedCavaError::ConfigInvalid(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.display.validate()?;
        self.audio.validate()?;
        self.effects.validate()
    }
}

/// Display geometry and output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub brightness: f32,
    pub num_pixels: usize,
    pub module_width: usize,
    pub module_height: usize,
    pub num_modules: usize,
    #[serde(default = "default_gpio_pin")]
    pub gpio_pin: u8,
}

fn default_gpio_pin() -> u8 {
    18
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            brightness: 0.5,
            num_pixels: 128,
            module_width: 8,
            module_height: 8,
            num_modules: 2,
            gpio_pin: default_gpio_pin(),
        }
    }
}

impl DisplayConfig {
    fn validate(&self) -> Result<()> {
        if self.module_width == 0 || self.module_height == 0 || self.num_modules == 0 {
            return Err(LedCavaError::ConfigInvalid(
                "display dimensions must be non-zero".into(),
            ));
        }
        let expected = self.module_width * self.module_height * self.num_modules;
        if self.num_pixels != expected {
            return Err(LedCavaError::ConfigInvalid(format!(
                "num_pixels is {} but module dimensions give {expected}",
                self.num_pixels
            )));
        }
        if !(self.brightness > 0.0 && self.brightness <= 1.0) {
            return Err(LedCavaError::ConfigInvalid(format!(
                "brightness must be in (0, 1], got {}",
                self.brightness
            )));
        }
        Ok(())
    }
}

/// Settings handed to the external spectrum analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub bars: usize,
    pub framerate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            bars: 16,
            framerate: 60,
        }
    }
}

impl AudioConfig {
    fn validate(&self) -> Result<()> {
        if self.bars == 0 || self.framerate == 0 {
            return Err(LedCavaError::ConfigInvalid(
                "audio bars and framerate must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Effect selection behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectsConfig {
    pub auto_cycle: bool,
    /// Seconds an effect stays active before auto-cycle advances.
    pub duration: u64,
    /// Per-effect enabled flags keyed by effect name. Effects missing from
    /// the map default to enabled.
    #[serde(default)]
    pub enabled: HashMap<String, bool>,
}

impl Default for EffectsConfig {
    fn default() -> Self {
        Self {
            auto_cycle: true,
            duration: 30,
            enabled: HashMap::new(),
        }
    }
}

impl EffectsConfig {
    fn validate(&self) -> Result<()> {
        if self.auto_cycle && self.duration == 0 {
            return Err(LedCavaError::ConfigInvalid(
                "auto_cycle requires a non-zero duration".into(),
            ));
        }
        Ok(())
    }

    /// Whether the named effect should be registered.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.enabled.get(name).copied().unwrap_or(true)
    }
}
