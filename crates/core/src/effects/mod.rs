mod blue_wave;
mod rainbow;
mod warm_peaks;

pub use blue_wave::BlueWave;
pub use rainbow::Rainbow;
pub use warm_peaks::WarmPeaks;

use crate::{
    config::EffectsConfig,
    display::{Display, Geometry, Rgb},
    Result,
};

/// Capability implemented by every visual effect.
///
/// An instance is created when the effect becomes active and discarded on
/// the next switch, so implementations are free to keep per-frame animation
/// state (peak decays, hue drift) without worrying about resets.
pub trait Effect {
    fn name(&self) -> &str;

    /// Renders one frame from the current energy vector. Implementations
    /// stage pixel writes on the display; the scheduler commits the frame.
    fn update(&mut self, display: &mut Display, levels: &[u8]) -> Result<()>;
}

type Factory = Box<dyn Fn(Geometry) -> Box<dyn Effect>>;

struct EffectEntry {
    name: &'static str,
    factory: Factory,
}

/// Ordered collection of effect factories, built once at startup.
pub struct EffectRegistry {
    entries: Vec<EffectEntry>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Registers the built-in effects, honouring the per-effect enabled
    /// flags. A disabled effect is skipped with a log line, never an error.
    pub fn builtin(config: &EffectsConfig) -> Self {
        let mut registry = Self::new();
        registry.register_enabled(config, "BlueWave", |g| Box::new(BlueWave::new(g)));
        registry.register_enabled(config, "WarmPeaks", |g| Box::new(WarmPeaks::new(g)));
        registry.register_enabled(config, "Rainbow", |g| Box::new(Rainbow::new(g)));
        registry
    }

    /// Appends an effect factory. Entries keep registration order; the
    /// scheduler cycles through them in this order.
    pub fn register<F>(&mut self, name: &'static str, factory: F)
    where
        F: Fn(Geometry) -> Box<dyn Effect> + 'static,
    {
        tracing::info!(effect = name, "effect registered");
        self.entries.push(EffectEntry {
            name,
            factory: Box::new(factory),
        });
    }

    fn register_enabled<F>(&mut self, config: &EffectsConfig, name: &'static str, factory: F)
    where
        F: Fn(Geometry) -> Box<dyn Effect> + 'static,
    {
        if config.is_enabled(name) {
            self.register(name, factory);
        } else {
            tracing::info!(effect = name, "effect disabled by configuration");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.name)
    }

    /// Position of a named effect in registration order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }

    /// Builds a fresh instance of the effect at `index`.
    pub fn create(&self, index: usize, geometry: Geometry) -> Option<Box<dyn Effect>> {
        self.entries.get(index).map(|e| (e.factory)(geometry))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name)
    }
}

impl Default for EffectRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EffectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// Converts an HSV color (all components in [0, 1]) to RGB.
pub(crate) fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb {
    let h = h.rem_euclid(1.0) * 6.0;
    let sector = h.floor();
    let f = h - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match sector as u8 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    Rgb::new(
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    )
}

/// Band level for column `index`, treating a short energy vector as silent
/// in the missing columns.
pub(crate) fn level_at(levels: &[u8], index: usize) -> u8 {
    levels.get(index).copied().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(disabled: &[&str]) -> EffectsConfig {
        let mut config = EffectsConfig::default();
        for name in disabled {
            config.enabled.insert((*name).to_string(), false);
        }
        config
    }

    #[test]
    fn builtin_registry_keeps_registration_order() {
        let registry = EffectRegistry::builtin(&EffectsConfig::default());
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, vec!["BlueWave", "WarmPeaks", "Rainbow"]);
    }

    #[test]
    fn disabled_effects_are_excluded_without_error() {
        let registry = EffectRegistry::builtin(&config_with(&["WarmPeaks"]));
        assert_eq!(registry.len(), 2);
        assert!(registry.position("WarmPeaks").is_none());
        assert_eq!(registry.position("Rainbow"), Some(1));
    }

    #[test]
    fn create_builds_a_named_instance() {
        let registry = EffectRegistry::builtin(&EffectsConfig::default());
        let geometry = Geometry::new(8, 8, 2).unwrap();
        let effect = registry.create(0, geometry).unwrap();
        assert_eq!(effect.name(), "BlueWave");
        assert!(registry.create(99, geometry).is_none());
    }

    #[test]
    fn hsv_conversion_hits_the_primaries() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), Rgb::new(255, 0, 0));
        assert_eq!(hsv_to_rgb(1.0 / 3.0, 1.0, 1.0), Rgb::new(0, 255, 0));
        assert_eq!(hsv_to_rgb(2.0 / 3.0, 1.0, 1.0), Rgb::new(0, 0, 255));
        assert_eq!(hsv_to_rgb(0.5, 0.0, 1.0), Rgb::new(255, 255, 255));
    }
}
