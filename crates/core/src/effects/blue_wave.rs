use crate::{
    display::{Display, Geometry, Rgb},
    effects::{level_at, Effect},
    Result,
};

const BAR: Rgb = Rgb::new(0, 0, 255);
const BACKGROUND: Rgb = Rgb::new(10, 0, 0);

/// Plain spectrum bars: each column lights up blue to its band level over a
/// faint red background. One band per column, modules side by side.
pub struct BlueWave;

impl BlueWave {
    pub fn new(_geometry: Geometry) -> Self {
        Self
    }
}

impl Effect for BlueWave {
    fn name(&self) -> &str {
        "BlueWave"
    }

    fn update(&mut self, display: &mut Display, levels: &[u8]) -> Result<()> {
        let (width, height, modules) = (display.width(), display.height(), display.module_count());
        for module in 0..modules {
            for x in 0..width {
                let value = level_at(levels, module * width + x) as usize;
                for y in 0..height {
                    let color = if y < value { BAR } else { BACKGROUND };
                    display.set_pixel(x, y, module, color)?;
                }
            }
        }
        Ok(())
    }
}
