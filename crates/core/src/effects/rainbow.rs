use std::time::Instant;

use crate::{
    display::{Display, Geometry, Rgb},
    effects::{hsv_to_rgb, level_at, Effect},
    Result,
};

const PEAK_DECAY: f32 = 0.1;

/// Spectrum bars painted in a drifting rainbow. Louder audio pushes the
/// base hue around the wheel faster; each column shifts its own hue with
/// its level and carries a bright peak marker that fades back down.
pub struct Rainbow {
    hue: f32,
    last_update: Instant,
    peaks: Vec<f32>,
}

impl Rainbow {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            hue: 0.0,
            last_update: Instant::now(),
            peaks: vec![0.0; geometry.module_width * geometry.module_count],
        }
    }

    fn advance_hue(&mut self, levels: &[u8], height: usize) {
        let now = Instant::now();
        let delta = now.duration_since(self.last_update).as_secs_f32();
        self.last_update = now;

        let mut total_energy = 0.0;
        for (i, peak) in self.peaks.iter_mut().enumerate() {
            let value = level_at(levels, i) as f32;
            if value > *peak {
                *peak = value;
            } else {
                *peak = (*peak - PEAK_DECAY).max(0.0);
            }
            total_energy += value;
        }

        let energy_ratio = total_energy / (self.peaks.len() as f32 * height as f32);
        self.hue = (self.hue + energy_ratio * delta).rem_euclid(1.0);
    }
}

impl Effect for Rainbow {
    fn name(&self) -> &str {
        "Rainbow"
    }

    fn update(&mut self, display: &mut Display, levels: &[u8]) -> Result<()> {
        let (width, height) = (display.width(), display.height());
        self.advance_hue(levels, height);

        for module in 0..display.module_count() {
            for x in 0..width {
                let column = module * width + x;
                let value = level_at(levels, column) as usize;
                let peak = self.peaks.get(column).copied().unwrap_or(0.0) as usize;
                let column_hue =
                    (self.hue + value as f32 / height as f32 * 0.5).rem_euclid(1.0);

                for y in 0..height {
                    let color = if y < value {
                        let saturation = 0.5 + value as f32 / height as f32 * 0.5;
                        let brightness = 0.3 + y as f32 / value as f32 * 0.7;
                        hsv_to_rgb(column_hue, saturation, brightness)
                    } else if y == peak {
                        hsv_to_rgb(column_hue, 0.5, 1.0)
                    } else {
                        let fade = (1.0 - (y - value) as f32 / 3.0).max(0.0);
                        if fade > 0.0 {
                            hsv_to_rgb(column_hue, 0.8, fade * 0.3)
                        } else {
                            Rgb::BLACK
                        }
                    };
                    display.set_pixel(x, y, module, color)?;
                }
            }
        }
        Ok(())
    }
}
