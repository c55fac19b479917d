use crate::{
    display::{Display, Geometry, Rgb},
    effects::{level_at, Effect},
    Result,
};

const PEAK_DECAY: f32 = 0.2;

/// Stereo bars in a warm red-to-yellow gradient with slowly falling peak
/// markers. The left channel renders on module 0, the right channel on
/// module 1; the panel content is rotated a quarter turn per module to
/// match the physical mounting.
pub struct WarmPeaks {
    peaks: Vec<Vec<f32>>,
}

impl WarmPeaks {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            peaks: vec![vec![0.0; geometry.module_width]; geometry.module_count],
        }
    }

    fn warm_color(intensity: usize, max_intensity: usize) -> Rgb {
        let ratio = intensity as f32 / max_intensity as f32;
        let (r, g, b) = if ratio < 0.3 {
            (
                128.0 + 127.0 * (ratio * 3.0),
                20.0 + 40.0 * (ratio * 3.0),
                0.0,
            )
        } else if ratio < 0.6 {
            (255.0, 60.0 + 100.0 * ((ratio - 0.3) * 3.33), 0.0)
        } else {
            (
                255.0,
                160.0 + 55.0 * ((ratio - 0.6) * 2.5),
                50.0 * ((ratio - 0.6) * 2.5),
            )
        };
        Rgb::new(
            r.min(255.0) as u8,
            g.min(255.0) as u8,
            b.min(255.0) as u8,
        )
    }

    fn peak_color(value: usize, max_value: usize) -> Rgb {
        let ratio = value as f32 / max_value as f32;
        Rgb::new(255, (180.0 + 40.0 * ratio) as u8, (30.0 * ratio) as u8)
    }

    fn update_peaks(&mut self, levels: &[u8], offset: usize, module: usize) {
        for (i, peak) in self.peaks[module].iter_mut().enumerate() {
            let value = level_at(levels, offset + i) as f32;
            if value > *peak {
                *peak = value;
            } else {
                *peak = (*peak - PEAK_DECAY).max(0.0);
            }
        }
    }

    /// Stages a pixel after rotating the logical frame a quarter turn; the
    /// two modules are mounted rotated in opposite directions. A rotated
    /// coordinate that lands outside the grid is clipped, not an error, so
    /// the effect degrades on non-square modules instead of killing the
    /// render loop.
    fn set_rotated(
        display: &mut Display,
        x: usize,
        y: usize,
        module: usize,
        color: Rgb,
    ) -> Result<()> {
        let (rx, ry) = if module == 0 {
            (y, display.width() - 1 - x)
        } else {
            (display.height() - 1 - y, x)
        };
        if rx >= display.width() || ry >= display.height() {
            return Ok(());
        }
        display.set_pixel(rx, ry, module, color)
    }

    fn draw_channel(
        &self,
        display: &mut Display,
        levels: &[u8],
        offset: usize,
        module: usize,
    ) -> Result<()> {
        let (width, height) = (display.width(), display.height());
        for x in 0..width {
            let value = level_at(levels, offset + x) as usize;
            let peak = self.peaks[module][x] as usize;
            for y in 0..height {
                let color = if y < value {
                    Self::warm_color(y + 1, height)
                } else if y == peak {
                    Self::peak_color(peak, height)
                } else {
                    Rgb::BLACK
                };
                Self::set_rotated(display, x, height - 1 - y, module, color)?;
            }
        }
        Ok(())
    }
}

impl Effect for WarmPeaks {
    fn name(&self) -> &str {
        "WarmPeaks"
    }

    fn update(&mut self, display: &mut Display, levels: &[u8]) -> Result<()> {
        let width = display.width();
        for module in 0..display.module_count() {
            self.update_peaks(levels, module * width, module);
        }
        for module in 0..display.module_count() {
            self.draw_channel(display, levels, module * width, module)?;
        }
        Ok(())
    }
}
