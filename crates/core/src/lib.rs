//! Core library for the LEDCAVA matrix visualiser.
//!
//! The crate is split into one module per subsystem: configuration loading,
//! the display/coordinate layer, the audio spectrum source that supervises an
//! external `cava` process, the effect implementations, and the render
//! scheduler that ties them together at a fixed tick rate. The application
//! crate wires these pieces and owns process-level concerns (CLI, signals,
//! logging setup).

pub mod audio;
pub mod config;
pub mod display;
pub mod effects;
pub mod error;
pub mod scheduler;

pub use audio::AudioSource;
pub use config::{AppConfig, AudioConfig, DisplayConfig, EffectsConfig};
pub use display::{CoordinateMap, Display, FrameBuffer, Geometry, PixelOutput, Rgb};
pub use effects::{Effect, EffectRegistry};
pub use error::{LedCavaError, Result};
pub use scheduler::RenderScheduler;

/// Upper bound for a single spectrum band level, matching the
/// `ascii_max_range` the analyzer is configured with.
pub const MAX_LEVEL: u8 = 8;
