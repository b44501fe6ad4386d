use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CommandResult, PipelineCommand};
use crate::context::ProcessContext;
use crate::enums::ClassIdIn;
use crate::image::{Image, PlaneRef};
use crate::object_list::PipelineObjects;
use crate::settings::SettingParserLog;

/// Stores intensity statistics of the given planes on every object of the input classes.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MeasureIntensity {
    pub input_classes: Vec<ClassIdIn>,
    pub planes: Vec<PlaneRef>,
}

impl Default for MeasureIntensity {
    fn default() -> Self {
        Self {
            input_classes: vec![ClassIdIn::Default],
            planes: vec![PlaneRef::channel(-1)],
        }
    }
}

impl PipelineCommand for MeasureIntensity {
    fn execute(
        &self,
        ctx: &ProcessContext<'_>,
        _image: &mut Image,
        objects: &mut PipelineObjects<'_>,
    ) -> CommandResult<()> {
        let mut classes: Vec<_> = self.input_classes.iter().map(|c| ctx.class_id(*c)).collect();
        classes.sort();
        classes.dedup();

        for plane_ref in &self.planes {
            let plane = ctx.load_plane(plane_ref)?;
            for &class_id in &classes {
                let rois = objects.class_mut(class_id);
                for roi in rois.iter_mut() {
                    roi.measure_intensity(&plane);
                }
                debug!("Measured {} objects of {class_id} on {}", rois.len(), plane.plane());
            }
        }
        Ok(())
    }

    fn input_classes(&self) -> Vec<ClassIdIn> {
        self.input_classes.clone()
    }

    fn output_classes(&self) -> Vec<ClassIdIn> {
        self.input_classes.clone()
    }

    fn referenced_planes(&self) -> Vec<PlaneRef> {
        self.planes.clone()
    }

    fn check(&self, log: &mut SettingParserLog, pipeline: &str) {
        if self.input_classes.is_empty() || self.planes.is_empty() {
            log.warning(pipeline, "$measureIntensity: nothing to measure");
        }
    }
}
