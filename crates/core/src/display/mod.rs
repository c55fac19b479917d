use serde::{Deserialize, Serialize};

use crate::{config::DisplayConfig, LedCavaError, Result};

/// A single LED color value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Immutable description of the physical panel layout: a chain of identical
/// modules, each a `module_width` by `module_height` grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub module_width: usize,
    pub module_height: usize,
    pub module_count: usize,
}

impl Geometry {
    pub fn new(module_width: usize, module_height: usize, module_count: usize) -> Result<Self> {
        if module_width == 0 || module_height == 0 || module_count == 0 {
            return Err(LedCavaError::ConfigInvalid(
                "display dimensions must be non-zero".into(),
            ));
        }
        Ok(Self {
            module_width,
            module_height,
            module_count,
        })
    }

    pub fn from_config(config: &DisplayConfig) -> Result<Self> {
        let geometry = Self::new(
            config.module_width,
            config.module_height,
            config.num_modules,
        )?;
        if geometry.total_pixels() != config.num_pixels {
            return Err(LedCavaError::ConfigInvalid(format!(
                "num_pixels is {} but module dimensions give {}",
                config.num_pixels,
                geometry.total_pixels()
            )));
        }
        Ok(geometry)
    }

    pub fn total_pixels(&self) -> usize {
        self.module_width * self.module_height * self.module_count
    }
}

/// Precomputed lookup from logical `(x, y, module)` coordinates to the
/// physical strip index under the serpentine wiring of the panel chain.
///
/// Module 0 is wired column-major with y running downwards from the top of
/// each column; every following module is mounted mirrored, so its columns
/// run in the opposite x direction with y upwards. Effects hit this table
/// for every pixel of every frame, so the mapping is built exactly once.
#[derive(Debug, Clone)]
pub struct CoordinateMap {
    geometry: Geometry,
    table: Vec<u32>,
}

impl CoordinateMap {
    pub fn new(geometry: Geometry) -> Self {
        let (w, h) = (geometry.module_width, geometry.module_height);
        let mut table = vec![0u32; geometry.total_pixels()];
        for module in 0..geometry.module_count {
            let base = module * w * h;
            for x in 0..w {
                for y in 0..h {
                    let index = if module == 0 {
                        base + x * h + (h - 1 - y)
                    } else {
                        base + (w - 1 - x) * h + y
                    };
                    table[Self::slot(geometry, x, y, module)] = index as u32;
                }
            }
        }
        Self { geometry, table }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Resolves a logical coordinate to its physical strip index.
    pub fn index(&self, x: usize, y: usize, module: usize) -> Result<usize> {
        if x >= self.geometry.module_width
            || y >= self.geometry.module_height
            || module >= self.geometry.module_count
        {
            return Err(LedCavaError::OutOfRange { x, y, module });
        }
        Ok(self.table[Self::slot(self.geometry, x, y, module)] as usize)
    }

    fn slot(geometry: Geometry, x: usize, y: usize, module: usize) -> usize {
        (module * geometry.module_height + y) * geometry.module_width + x
    }
}

/// Boundary to the physical strip driver. The core stages pixel writes
/// through this trait and commits them with one `show` per rendered frame.
pub trait PixelOutput {
    fn set(&mut self, index: usize, color: Rgb);
    fn show(&mut self) -> Result<()>;
}

/// In-memory [`PixelOutput`] used by tests and headless runs.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pixels: Vec<Rgb>,
    frames_shown: u64,
}

impl FrameBuffer {
    pub fn new(total_pixels: usize) -> Self {
        Self {
            pixels: vec![Rgb::BLACK; total_pixels],
            frames_shown: 0,
        }
    }

    pub fn pixel(&self, index: usize) -> Rgb {
        self.pixels[index]
    }

    pub fn frames_shown(&self) -> u64 {
        self.frames_shown
    }
}

impl PixelOutput for FrameBuffer {
    fn set(&mut self, index: usize, color: Rgb) {
        if let Some(slot) = self.pixels.get_mut(index) {
            *slot = color;
        }
    }

    fn show(&mut self) -> Result<()> {
        self.frames_shown += 1;
        Ok(())
    }
}

/// Display controller combining the coordinate map with an output driver.
pub struct Display {
    map: CoordinateMap,
    output: Box<dyn PixelOutput>,
}

impl Display {
    pub fn new(geometry: Geometry, output: Box<dyn PixelOutput>) -> Self {
        Self {
            map: CoordinateMap::new(geometry),
            output,
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.map.geometry()
    }

    pub fn width(&self) -> usize {
        self.map.geometry().module_width
    }

    pub fn height(&self) -> usize {
        self.map.geometry().module_height
    }

    pub fn module_count(&self) -> usize {
        self.map.geometry().module_count
    }

    /// Stages a pixel write at a logical coordinate.
    pub fn set_pixel(&mut self, x: usize, y: usize, module: usize, color: Rgb) -> Result<()> {
        let index = self.map.index(x, y, module)?;
        self.output.set(index, color);
        Ok(())
    }

    /// Commits all staged writes to the strip.
    pub fn show(&mut self) -> Result<()> {
        self.output.show()
    }

    /// Blanks the whole strip and commits immediately.
    pub fn clear(&mut self) -> Result<()> {
        for index in 0..self.map.geometry().total_pixels() {
            self.output.set(index, Rgb::BLACK);
        }
        self.output.show()
    }
}

impl std::fmt::Debug for Display {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Display")
            .field("geometry", &self.map.geometry())
            .finish()
    }
}
