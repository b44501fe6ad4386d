use serde::{Deserialize, Serialize};

use super::{CommandResult, PipelineCommand};
use crate::context::ProcessContext;
use crate::image::Image;
use crate::object_list::PipelineObjects;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MorphologyFunction {
    #[default]
    Erode,
    Dilate,
    Open,
    Close,
    Gradient,
    Tophat,
    Blackhat,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KernelShape {
    #[default]
    Rectangle,
    Cross,
    Ellipse,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MorphologicalTransform {
    pub function: MorphologyFunction,
    pub shape: KernelShape,
    pub kernel_size: u32,
    pub iterations: u32,
}

impl Default for MorphologicalTransform {
    fn default() -> Self {
        Self {
            function: MorphologyFunction::Erode,
            shape: KernelShape::Rectangle,
            kernel_size: 3,
            iterations: 1,
        }
    }
}

fn kernel_offsets(shape: KernelShape, size: u32) -> Vec<(isize, isize)> {
    let r = (size.max(1) / 2) as isize;
    let mut offsets = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            let inside = match shape {
                KernelShape::Rectangle => true,
                KernelShape::Cross => dx == 0 || dy == 0,
                KernelShape::Ellipse => {
                    let rf = r.max(1) as f64;
                    (dx as f64 / rf).powi(2) + (dy as f64 / rf).powi(2) <= 1.0
                }
            };
            if inside {
                offsets.push((dx, dy));
            }
        }
    }
    offsets
}

/// Min (`dilate == false`) or max filter over `offsets`. Pixels outside the
/// image do not take part.
fn rank_pass(image: &Image, offsets: &[(isize, isize)], dilate: bool) -> Image {
    let (w, h) = (image.width() as isize, image.height() as isize);
    let src = image.pixels();
    let mut out = image.deep_clone();
    let dst = out.buffer_mut();
    for y in 0..h {
        for x in 0..w {
            let neighbours = offsets.iter().filter_map(|&(dx, dy)| {
                let (nx, ny) = (x + dx, y + dy);
                (nx >= 0 && ny >= 0 && nx < w && ny < h).then(|| src[(ny * w + nx) as usize])
            });
            let v = if dilate {
                neighbours.max()
            } else {
                neighbours.min()
            };
            if let Some(v) = v {
                dst[(x as usize, y as usize)] = v;
            }
        }
    }
    out
}

impl MorphologicalTransform {
    fn repeat(&self, image: &Image, offsets: &[(isize, isize)], dilate: bool) -> Image {
        let mut out = image.clone();
        for _ in 0..self.iterations.max(1) {
            out = rank_pass(&out, offsets, dilate);
        }
        out
    }

    pub fn apply(&self, image: &mut Image) -> CommandResult<()> {
        let offsets = kernel_offsets(self.shape, self.kernel_size);
        let erode = |img: &Image| self.repeat(img, &offsets, false);
        let dilate = |img: &Image| self.repeat(img, &offsets, true);

        let result = match self.function {
            MorphologyFunction::Erode => erode(image),
            MorphologyFunction::Dilate => dilate(image),
            MorphologyFunction::Open => dilate(&erode(image)),
            MorphologyFunction::Close => erode(&dilate(image)),
            MorphologyFunction::Gradient => {
                let mut d = dilate(image);
                d.zip_apply(&erode(image), u16::saturating_sub)?;
                d
            }
            MorphologyFunction::Tophat => {
                let mut src = image.deep_clone();
                src.zip_apply(&dilate(&erode(image)), u16::saturating_sub)?;
                src
            }
            MorphologyFunction::Blackhat => {
                let mut closed = erode(&dilate(image));
                closed.zip_apply(image, u16::saturating_sub)?;
                closed
            }
        };
        *image = result;
        Ok(())
    }
}

impl PipelineCommand for MorphologicalTransform {
    fn execute(
        &self,
        _ctx: &ProcessContext<'_>,
        image: &mut Image,
        _objects: &mut PipelineObjects<'_>,
    ) -> CommandResult<()> {
        self.apply(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PlaneId;

    fn square_image() -> Image {
        let mut image = Image::new_blank(7, 7, PlaneId::default());
        for y in 2..5 {
            for x in 2..5 {
                image.set(x, y, 10);
            }
        }
        image
    }

    fn count_set(image: &Image) -> usize {
        image.pixels().iter().filter(|&&v| v > 0).count()
    }

    #[test]
    fn erode_and_dilate_square() -> anyhow::Result<()> {
        let mut eroded = square_image();
        MorphologicalTransform::default().apply(&mut eroded)?;
        assert_eq!(count_set(&eroded), 1);
        assert_eq!(eroded.get(3, 3), 10);

        let mut dilated = square_image();
        MorphologicalTransform {
            function: MorphologyFunction::Dilate,
            ..Default::default()
        }
        .apply(&mut dilated)?;
        assert_eq!(count_set(&dilated), 25);
        Ok(())
    }

    #[test]
    fn cross_kernel_rounds_corners() -> anyhow::Result<()> {
        let mut image = square_image();
        MorphologicalTransform {
            function: MorphologyFunction::Dilate,
            shape: KernelShape::Cross,
            ..Default::default()
        }
        .apply(&mut image)?;
        assert_eq!(count_set(&image), 21);
        assert_eq!(image.get(1, 1), 0);
        Ok(())
    }

    #[test]
    fn dilation_on_wide_image_keeps_coordinates() -> anyhow::Result<()> {
        let mut image = Image::new_blank(9, 3, PlaneId::default());
        image.set(7, 1, 20);
        MorphologicalTransform {
            function: MorphologyFunction::Dilate,
            shape: KernelShape::Cross,
            ..Default::default()
        }
        .apply(&mut image)?;
        assert_eq!(count_set(&image), 5);
        for (x, y) in [(7, 1), (6, 1), (8, 1), (7, 0), (7, 2)] {
            assert_eq!(image.get(x, y), 20, "({x}, {y})");
        }
        assert_eq!(image.get(6, 0), 0);
        Ok(())
    }

    #[test]
    fn opening_removes_isolated_pixel() -> anyhow::Result<()> {
        let mut image = square_image();
        image.set(0, 6, 50);
        MorphologicalTransform {
            function: MorphologyFunction::Open,
            ..Default::default()
        }
        .apply(&mut image)?;
        assert_eq!(image.get(0, 6), 0);
        assert_eq!(count_set(&image), 9);
        Ok(())
    }

    #[test]
    fn tophat_keeps_small_structures() -> anyhow::Result<()> {
        let mut image = square_image();
        image.set(0, 6, 50);
        MorphologicalTransform {
            function: MorphologyFunction::Tophat,
            ..Default::default()
        }
        .apply(&mut image)?;
        assert_eq!(image.get(0, 6), 50);
        assert_eq!(image.get(3, 3), 0);
        Ok(())
    }
}
