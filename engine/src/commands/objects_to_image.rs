use serde::{Deserialize, Serialize};

use super::{CommandResult, PipelineCommand};
use crate::context::ProcessContext;
use crate::enums::ClassIdIn;
use crate::image::Image;
use crate::object_list::PipelineObjects;
use crate::settings::SettingParserLog;

/// Replaces the current image with the masks of the input classes painted on black.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectsToImage {
    pub input_classes: Vec<ClassIdIn>,
    pub pixel_value: u16,
}

impl Default for ObjectsToImage {
    fn default() -> Self {
        Self {
            input_classes: vec![ClassIdIn::Default],
            pixel_value: u16::MAX,
        }
    }
}

impl PipelineCommand for ObjectsToImage {
    fn execute(
        &self,
        ctx: &ProcessContext<'_>,
        image: &mut Image,
        objects: &mut PipelineObjects<'_>,
    ) -> CommandResult<()> {
        let mut canvas = Image::new_blank(image.width(), image.height(), image.plane());
        for class in &self.input_classes {
            for roi in objects.iter_class(ctx.class_id(*class)) {
                roi.paint(&mut canvas, self.pixel_value);
            }
        }
        *image = canvas;
        Ok(())
    }

    fn input_classes(&self) -> Vec<ClassIdIn> {
        self.input_classes.clone()
    }

    fn check(&self, log: &mut SettingParserLog, pipeline: &str) {
        if self.pixel_value == 0 {
            log.warning(pipeline, "$objectsToImage: pixel value 0 paints nothing visible");
        }
    }
}
