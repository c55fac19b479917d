use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use crate::{
    audio::AudioSource,
    config::EffectsConfig,
    display::Display,
    effects::{Effect, EffectRegistry},
    LedCavaError, Result,
};

/// Fixed-tick render loop over the effect registry.
///
/// The scheduler owns the active effect instance and is the system's only
/// timing source: once per tick it takes the latest audio snapshot, lets the
/// active effect stage a frame and commits it with a single `show`. Effect
/// instances never survive a switch; auto-cycle and explicit selection both
/// build a fresh one so internal animation state starts clean.
pub struct RenderScheduler {
    registry: EffectRegistry,
    active: Option<Box<dyn Effect>>,
    active_index: usize,
    auto_cycle: bool,
    cycle_duration: Duration,
    last_switch: Instant,
    tick_interval: Duration,
}

impl RenderScheduler {
    pub fn new(registry: EffectRegistry, config: &EffectsConfig, framerate: u32) -> Self {
        Self {
            registry,
            active: None,
            active_index: 0,
            auto_cycle: config.auto_cycle,
            cycle_duration: Duration::from_secs(config.duration),
            last_switch: Instant::now(),
            tick_interval: Duration::from_secs(1) / framerate.max(1),
        }
    }

    /// Makes the named effect active on the next tick. Explicit selection
    /// disables auto-cycle.
    pub fn select(&mut self, name: &str) -> Result<()> {
        let index = self
            .registry
            .position(name)
            .ok_or_else(|| LedCavaError::EffectNotFound(name.to_string()))?;
        self.active_index = index;
        self.active = None;
        self.auto_cycle = false;
        self.last_switch = Instant::now();
        tracing::info!(effect = name, "effect selected");
        Ok(())
    }

    /// Advances to the next registered effect, wrapping at the end.
    pub fn next_effect(&mut self, now: Instant) {
        if self.registry.is_empty() {
            return;
        }
        self.active_index = (self.active_index + 1) % self.registry.len();
        self.active = None;
        self.last_switch = now;
    }

    /// Name of the effect the scheduler will dispatch to next.
    pub fn active_name(&self) -> Option<&str> {
        self.registry.name_at(self.active_index)
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    /// Runs the auto-cycle check that precedes every dispatch.
    pub fn maybe_cycle(&mut self, now: Instant) {
        if self.auto_cycle && now.duration_since(self.last_switch) >= self.cycle_duration {
            self.next_effect(now);
            if let Some(name) = self.active_name() {
                tracing::info!(effect = name, "auto-cycled to next effect");
            }
        }
    }

    /// Renders one frame: cycles if due, instantiates the active effect if
    /// none is loaded, dispatches the energy vector and commits the frame.
    pub fn tick(&mut self, now: Instant, display: &mut Display, levels: &[u8]) -> Result<()> {
        self.maybe_cycle(now);
        if self.active.is_none() {
            self.active = self.registry.create(self.active_index, display.geometry());
        }
        let effect = self
            .active
            .as_mut()
            .ok_or(LedCavaError::NoEffectsAvailable)?;
        effect.update(display, levels)?;
        display.show()
    }

    /// Drives the display until the shutdown flag is raised, then clears it.
    pub fn run(
        &mut self,
        audio: &AudioSource,
        display: &mut Display,
        shutdown: &AtomicBool,
    ) -> Result<()> {
        if self.registry.is_empty() {
            return Err(LedCavaError::NoEffectsAvailable);
        }

        tracing::info!(
            effects = self.registry.len(),
            auto_cycle = self.auto_cycle,
            "render loop started"
        );
        self.last_switch = Instant::now();

        let mut result = Ok(());
        while !shutdown.load(Ordering::SeqCst) {
            let tick_start = Instant::now();
            let levels = audio.get_data();
            if let Err(e) = self.tick(tick_start, display, &levels) {
                result = Err(e);
                break;
            }
            let elapsed = tick_start.elapsed();
            if elapsed < self.tick_interval {
                thread::sleep(self.tick_interval - elapsed);
            }
        }

        // The display is blanked on every exit path; a failed tick must not
        // leave the last frame lit.
        self.active = None;
        if let Err(e) = display.clear() {
            result = result.and(Err(e));
        }
        tracing::info!("render loop stopped");
        result
    }
}

impl std::fmt::Debug for RenderScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderScheduler")
            .field("active_index", &self.active_index)
            .field("auto_cycle", &self.auto_cycle)
            .field("tick_interval", &self.tick_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{FrameBuffer, Geometry, PixelOutput, Rgb};
    use std::{
        cell::{Cell, RefCell},
        rc::Rc,
    };

    struct CountingEffect {
        name: &'static str,
        updates: Rc<Cell<u32>>,
    }

    impl Effect for CountingEffect {
        fn name(&self) -> &str {
            self.name
        }

        fn update(&mut self, _display: &mut Display, _levels: &[u8]) -> Result<()> {
            self.updates.set(self.updates.get() + 1);
            Ok(())
        }
    }

    fn counting_registry(names: &[&'static str]) -> (EffectRegistry, Rc<Cell<u32>>) {
        let updates = Rc::new(Cell::new(0));
        let mut registry = EffectRegistry::new();
        for name in names {
            let name = *name;
            let updates = Rc::clone(&updates);
            registry.register(name, move |_| {
                Box::new(CountingEffect {
                    name,
                    updates: Rc::clone(&updates),
                })
            });
        }
        (registry, updates)
    }

    fn scheduler_with(names: &[&'static str], auto_cycle: bool, duration: u64) -> RenderScheduler {
        let (registry, _) = counting_registry(names);
        let config = EffectsConfig {
            auto_cycle,
            duration,
            enabled: Default::default(),
        };
        RenderScheduler::new(registry, &config, 60)
    }

    fn test_display() -> Display {
        let geometry = Geometry::new(8, 8, 2).unwrap();
        Display::new(geometry, Box::new(FrameBuffer::new(128)))
    }

    #[test]
    fn auto_cycle_wraps_twice_over_21_seconds() {
        let mut scheduler = scheduler_with(&["a", "b", "c"], true, 10);
        let start = Instant::now();
        scheduler.last_switch = start;
        for second in 0..=21 {
            scheduler.maybe_cycle(start + Duration::from_secs(second));
        }
        assert_eq!(scheduler.active_index(), 2);
    }

    #[test]
    fn auto_cycle_is_inert_when_disabled() {
        let mut scheduler = scheduler_with(&["a", "b"], false, 10);
        let start = Instant::now();
        scheduler.last_switch = start;
        scheduler.maybe_cycle(start + Duration::from_secs(3600));
        assert_eq!(scheduler.active_index(), 0);
    }

    #[test]
    fn next_effect_wraps_around_the_registry() {
        let mut scheduler = scheduler_with(&["a", "b", "c"], true, 10);
        let now = Instant::now();
        scheduler.next_effect(now);
        scheduler.next_effect(now);
        scheduler.next_effect(now);
        assert_eq!(scheduler.active_index(), 0);
    }

    #[test]
    fn select_finds_effects_by_name_and_disables_auto_cycle() {
        let mut scheduler = scheduler_with(&["a", "b", "c"], true, 10);
        scheduler.select("b").unwrap();
        assert_eq!(scheduler.active_index(), 1);
        assert!(!scheduler.auto_cycle);

        let start = Instant::now();
        scheduler.last_switch = start;
        scheduler.maybe_cycle(start + Duration::from_secs(100));
        assert_eq!(scheduler.active_index(), 1);
    }

    #[test]
    fn select_rejects_unknown_names() {
        let mut scheduler = scheduler_with(&["a"], true, 10);
        assert!(matches!(
            scheduler.select("nope"),
            Err(LedCavaError::EffectNotFound(_))
        ));
    }

    #[test]
    fn tick_instantiates_lazily_and_dispatches() {
        let (registry, updates) = counting_registry(&["a", "b"]);
        let config = EffectsConfig {
            auto_cycle: false,
            duration: 10,
            enabled: Default::default(),
        };
        let mut scheduler = RenderScheduler::new(registry, &config, 60);
        let mut display = test_display();

        assert_eq!(scheduler.active_name(), Some("a"));
        scheduler.tick(Instant::now(), &mut display, &[0; 16]).unwrap();
        scheduler.tick(Instant::now(), &mut display, &[0; 16]).unwrap();
        assert_eq!(updates.get(), 2);
    }

    #[test]
    fn switching_discards_the_active_instance() {
        let (registry, updates) = counting_registry(&["a", "b"]);
        let config = EffectsConfig {
            auto_cycle: false,
            duration: 10,
            enabled: Default::default(),
        };
        let mut scheduler = RenderScheduler::new(registry, &config, 60);
        let mut display = test_display();

        scheduler.tick(Instant::now(), &mut display, &[0; 16]).unwrap();
        assert!(scheduler.active.is_some());
        scheduler.next_effect(Instant::now());
        assert!(scheduler.active.is_none());
        scheduler.tick(Instant::now(), &mut display, &[0; 16]).unwrap();
        assert_eq!(scheduler.active_name(), Some("b"));
        assert_eq!(updates.get(), 2);
    }

    #[test]
    fn run_refuses_an_empty_registry() {
        let registry = EffectRegistry::new();
        let config = EffectsConfig::default();
        let mut scheduler = RenderScheduler::new(registry, &config, 60);
        let mut display = test_display();
        let audio = AudioSource::new(&crate::config::AudioConfig::default());
        let shutdown = AtomicBool::new(false);

        assert!(matches!(
            scheduler.run(&audio, &mut display, &shutdown),
            Err(LedCavaError::NoEffectsAvailable)
        ));
    }

    struct FailingEffect;

    impl Effect for FailingEffect {
        fn name(&self) -> &str {
            "failing"
        }

        fn update(&mut self, display: &mut Display, _levels: &[u8]) -> Result<()> {
            display.set_pixel(0, 0, 0, Rgb::new(9, 9, 9))?;
            Err(LedCavaError::OutOfRange {
                x: 99,
                y: 99,
                module: 99,
            })
        }
    }

    #[derive(Clone)]
    struct SharedBuffer(Rc<RefCell<FrameBuffer>>);

    impl PixelOutput for SharedBuffer {
        fn set(&mut self, index: usize, color: Rgb) {
            self.0.borrow_mut().set(index, color);
        }

        fn show(&mut self) -> Result<()> {
            self.0.borrow_mut().show()
        }
    }

    #[test]
    fn run_clears_the_display_when_a_tick_fails() {
        let mut registry = EffectRegistry::new();
        registry.register("failing", |_| Box::new(FailingEffect));
        let config = EffectsConfig {
            auto_cycle: false,
            duration: 10,
            enabled: Default::default(),
        };
        let mut scheduler = RenderScheduler::new(registry, &config, 1000);

        let geometry = Geometry::new(8, 8, 2).unwrap();
        let buffer = SharedBuffer(Rc::new(RefCell::new(FrameBuffer::new(128))));
        let mut display = Display::new(geometry, Box::new(buffer.clone()));
        let audio = AudioSource::new(&crate::config::AudioConfig::default());
        let shutdown = AtomicBool::new(false);

        let result = scheduler.run(&audio, &mut display, &shutdown);
        assert!(matches!(result, Err(LedCavaError::OutOfRange { .. })));
        for i in 0..128 {
            assert_eq!(buffer.0.borrow().pixel(i), Rgb::BLACK, "pixel {i} still lit");
        }
        assert!(buffer.0.borrow().frames_shown() >= 1);
    }

    #[test]
    fn run_exits_and_clears_when_shutdown_is_raised() {
        let (registry, updates) = counting_registry(&["a"]);
        let config = EffectsConfig {
            auto_cycle: false,
            duration: 10,
            enabled: Default::default(),
        };
        let mut scheduler = RenderScheduler::new(registry, &config, 1000);
        let mut display = test_display();
        let audio = AudioSource::new(&crate::config::AudioConfig::default());
        let shutdown = AtomicBool::new(true);

        scheduler.run(&audio, &mut display, &shutdown).unwrap();
        assert_eq!(updates.get(), 0);
    }
}
