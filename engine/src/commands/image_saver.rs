//! Control image renderer.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{CommandResult, PipelineCommand};
use crate::context::ProcessContext;
use crate::enums::ClassIdIn;
use crate::image::{parse_hex_color, Image, ImageError, RgbImage};
use crate::object_list::PipelineObjects;
use crate::roi::Roi;
use crate::settings::SettingParserLog;

/// Share of pixels saturated at each end of the brightness range.
pub const AUTO_CONTRAST_CLIP: f64 = 0.0035;

/// Background of a control image.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Canvas {
    /// The current image with automatic brightness.
    #[default]
    #[serde(rename = "IMAGE_$")]
    ImageDollar,
    Black,
    White,
}

impl Canvas {
    pub fn render(self, image: &Image) -> RgbImage {
        match self {
            Canvas::ImageDollar => {
                let (lo, hi) = image.auto_contrast_range(AUTO_CONTRAST_CLIP);
                image.to_rgb(lo, hi)
            }
            Canvas::Black => RgbImage::new_filled(image.width(), image.height(), [0, 0, 0]),
            Canvas::White => RgbImage::new_filled(image.width(), image.height(), [255, 255, 255]),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SaverStyle {
    #[default]
    Outlined,
    Filled,
}

impl SaverStyle {
    /// Draws `roi` in tile coordinates.
    pub fn draw(self, canvas: &mut RgbImage, roi: &Roi, color: [u8; 3], paint_bounding_box: bool) {
        let bb = roi.bounding_box();
        match self {
            SaverStyle::Filled => {
                for y in bb.y..bb.bottom() {
                    for x in bb.x..bb.right() {
                        if roi.covers(x, y) {
                            canvas.put(x as i64, y as i64, color);
                        }
                    }
                }
            }
            SaverStyle::Outlined => {
                let contour = roi.contour();
                let offset = |i: usize| {
                    let p = contour[i % contour.len()];
                    ((p.x + bb.x) as i64, (p.y + bb.y) as i64)
                };
                for i in 0..contour.len() {
                    canvas.draw_line(offset(i), offset(i + 1), color);
                }
            }
        }
        if paint_bounding_box {
            canvas.draw_rect(bb.x as i64, bb.y as i64, bb.width as i64, bb.height as i64, color);
        }
    }
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SaverClass {
    pub class_id: ClassIdIn,
    /// `#RRGGBB`; empty uses the colour of the classification.
    pub color: String,
    pub style: SaverStyle,
    pub paint_bounding_box: bool,
}

impl Default for SaverClass {
    fn default() -> Self {
        Self {
            class_id: ClassIdIn::Default,
            color: String::new(),
            style: SaverStyle::Outlined,
            paint_bounding_box: false,
        }
    }
}

/// Writes `control_<pipeline>_<tile>_<job>.png` into the control image folder.
/// The current image is left untouched.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageSaver {
    pub canvas: Canvas,
    pub classes_in: Vec<SaverClass>,
}

impl ImageSaver {
    pub fn render(
        &self,
        ctx: &ProcessContext<'_>,
        image: &Image,
        objects: &PipelineObjects<'_>,
    ) -> RgbImage {
        let mut canvas = self.canvas.render(image);
        for class in &self.classes_in {
            let class_id = ctx.class_id(class.class_id);
            let color = if class.color.is_empty() {
                ctx.classification().color(class_id)
            } else {
                parse_hex_color(&class.color)
            };
            for roi in objects.iter_class(class_id) {
                class.style.draw(&mut canvas, roi, color, class.paint_bounding_box);
            }
        }
        canvas
    }
}

impl PipelineCommand for ImageSaver {
    fn execute(
        &self,
        ctx: &ProcessContext<'_>,
        image: &mut Image,
        objects: &mut PipelineObjects<'_>,
    ) -> CommandResult<()> {
        let Some(folder) = ctx.control_image_folder() else {
            trace!("No output folder, control image skipped");
            return Ok(());
        };
        std::fs::create_dir_all(&folder).map_err(|source| ImageError::Io {
            path: folder.clone(),
            source,
        })?;
        let path = folder.join(format!(
            "control_{}_{}_{}.png",
            ctx.pipeline.index,
            ctx.tile_id(),
            ctx.job.job_name
        ));
        self.render(ctx, image, objects).save_png(&path)?;
        debug!("Control image written to {}", path.display());
        Ok(())
    }

    fn input_classes(&self) -> Vec<ClassIdIn> {
        self.classes_in.iter().map(|c| c.class_id).collect()
    }

    fn check(&self, log: &mut SettingParserLog, pipeline: &str) {
        for class in self.classes_in.iter().filter(|c| !c.color.is_empty()) {
            let hex = class.color.trim_start_matches('#');
            if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                log.warning(
                    pipeline,
                    format!("$saveImage: color '{}' is not #RRGGBB", class.color),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use common::buffer2::Buffer2;

    use super::*;
    use crate::enums::ClassId;
    use crate::image::PlaneId;
    use crate::ome::TileToLoad;
    use crate::roi::BoundingBox;

    fn square_roi() -> Roi {
        Roi::new(
            ClassId::C0,
            PlaneId::default(),
            TileToLoad::new(0, 0, 8, 8),
            1.0,
            BoundingBox::new(2, 2, 4, 4),
            Buffer2::new_filled(4, 4, true),
        )
    }

    #[test]
    fn filled_style_covers_the_mask() {
        let mut canvas = RgbImage::new_filled(8, 8, [0, 0, 0]);
        SaverStyle::Filled.draw(&mut canvas, &square_roi(), [255, 0, 0], false);
        let red = canvas.pixels().iter().filter(|p| **p == [255, 0, 0]).count();
        assert_eq!(red, 16);
    }

    #[test]
    fn outline_leaves_interior_untouched() {
        let mut canvas = RgbImage::new_filled(8, 8, [0, 0, 0]);
        SaverStyle::Outlined.draw(&mut canvas, &square_roi(), [0, 255, 0], false);
        assert_eq!(canvas.get(0, 0), [0, 0, 0]);
        assert!(canvas.pixels().iter().any(|p| *p == [0, 255, 0]));
    }

    #[test]
    fn canvas_backgrounds() {
        let image = Image::new_filled(3, 2, 500, PlaneId::default());
        assert!(Canvas::White.render(&image).pixels().iter().all(|p| *p == [255; 3]));
        assert!(Canvas::Black.render(&image).pixels().iter().all(|p| *p == [0; 3]));
        assert_eq!(Canvas::ImageDollar.render(&image).width(), 3);
    }
}
