use serde::{Deserialize, Serialize};

use super::image_cache::ImageIn;
use super::{CommandResult, PipelineCommand};
use crate::context::ProcessContext;
use crate::enums::CacheSlot;
use crate::image::{Image, PlaneRef};
use crate::object_list::PipelineObjects;

/// Pixel-wise operation `image <op> second`. Results saturate to the 16-bit range.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MathFunction {
    #[default]
    Invert,
    Add,
    Subtract,
    Multiply,
    /// Division by zero yields 0.
    Divide,
    And,
    Or,
    Xor,
    Min,
    Max,
    Average,
    Difference,
}

impl MathFunction {
    pub fn is_unary(self) -> bool {
        self == MathFunction::Invert
    }

    pub fn eval(self, a: u16, b: u16) -> u16 {
        match self {
            MathFunction::Invert => u16::MAX - a,
            MathFunction::Add => a.saturating_add(b),
            MathFunction::Subtract => a.saturating_sub(b),
            MathFunction::Multiply => a.saturating_mul(b),
            MathFunction::Divide => {
                if b == 0 {
                    0
                } else {
                    ((a as f64 / b as f64).round()).min(u16::MAX as f64) as u16
                }
            }
            MathFunction::And => a & b,
            MathFunction::Or => a | b,
            MathFunction::Xor => a ^ b,
            MathFunction::Min => a.min(b),
            MathFunction::Max => a.max(b),
            MathFunction::Average => ((a as u32 + b as u32 + 1) / 2) as u16,
            MathFunction::Difference => a.abs_diff(b),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageMath {
    pub function: MathFunction,
    /// Ignored for `INVERT`.
    pub input_image_second: ImageIn,
}

impl ImageMath {
    pub fn apply(&self, image: &mut Image, second: Option<&Image>) -> CommandResult<()> {
        match second {
            Some(second) if !self.function.is_unary() => {
                let function = self.function;
                image.zip_apply(second, |a, b| function.eval(a, b))?;
            }
            _ => image.apply(|a| self.function.eval(a, 0)),
        }
        Ok(())
    }
}

impl PipelineCommand for ImageMath {
    fn execute(
        &self,
        ctx: &ProcessContext<'_>,
        image: &mut Image,
        _objects: &mut PipelineObjects<'_>,
    ) -> CommandResult<()> {
        if self.function.is_unary() {
            return self.apply(image, None);
        }
        let second = self.input_image_second.load(ctx)?;
        self.apply(image, Some(&second))
    }

    fn input_image_cache(&self) -> Vec<CacheSlot> {
        if self.function.is_unary() {
            return Vec::new();
        }
        self.input_image_second.input_image_cache()
    }

    fn referenced_planes(&self) -> Vec<PlaneRef> {
        if self.function.is_unary() {
            return Vec::new();
        }
        self.input_image_second.referenced_planes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PlaneId;

    #[test]
    fn binary_functions_saturate() {
        assert_eq!(MathFunction::Add.eval(65000, 1000), u16::MAX);
        assert_eq!(MathFunction::Subtract.eval(10, 20), 0);
        assert_eq!(MathFunction::Multiply.eval(300, 300), u16::MAX);
        assert_eq!(MathFunction::Divide.eval(10, 0), 0);
        assert_eq!(MathFunction::Divide.eval(10, 4), 3);
        assert_eq!(MathFunction::Average.eval(3, 4), 4);
        assert_eq!(MathFunction::Difference.eval(3, 10), 7);
        assert_eq!(MathFunction::Xor.eval(0b1100, 0b1010), 0b0110);
    }

    #[test]
    fn invert_ignores_second_image() -> anyhow::Result<()> {
        let mut image = Image::new_filled(2, 2, 100, PlaneId::default());
        ImageMath::default().apply(&mut image, None)?;
        assert!(image.pixels().iter().all(|&v| v == u16::MAX - 100));
        Ok(())
    }

    #[test]
    fn size_mismatch_is_an_error() {
        let mut image = Image::new_filled(2, 2, 1, PlaneId::default());
        let other = Image::new_filled(3, 2, 1, PlaneId::default());
        let math = ImageMath {
            function: MathFunction::Add,
            ..Default::default()
        };
        assert!(math.apply(&mut image, Some(&other)).is_err());
    }

    #[test]
    fn slot_operand_is_reported_as_cache_input() {
        let math = ImageMath {
            function: MathFunction::Max,
            input_image_second: ImageIn::slot(CacheSlot::new(3)),
        };
        assert_eq!(math.input_image_cache(), vec![CacheSlot::new(3)]);
        assert!(math.referenced_planes().is_empty());

        let plane = ImageMath {
            function: MathFunction::Max,
            input_image_second: ImageIn::plane(PlaneRef::channel(2)),
        };
        assert_eq!(plane.referenced_planes(), vec![PlaneRef::channel(2)]);
    }
}
