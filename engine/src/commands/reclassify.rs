use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CommandResult, PipelineCommand};
use crate::context::ProcessContext;
use crate::enums::{ClassId, ClassIdIn};
use crate::image::{Image, PlaneRef};
use crate::object_list::{
    apply_intersection, FilterLogic, HierarchyHandling, IntersectionParams, PipelineObjects,
    ReclassifyMode,
};
use crate::roi::Roi;
use crate::settings::{IntensityFilter, MetricsFilter, ObjectFilter, SettingParserLog};

/// Intersects objects of `input_classes` with those of `intersecting_class`.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Reclassify {
    pub mode: ReclassifyMode,
    pub logic: FilterLogic,
    pub hierarchy: HierarchyHandling,
    /// Minimum overlap relative to the smaller object, `0..=1`.
    pub min_intersection: f64,
    pub input_classes: Vec<ClassIdIn>,
    pub intersecting_class: ClassIdIn,
    pub new_class: ClassIdIn,
    /// Only objects passing these rules are moved, copied or kept.
    pub metrics: MetricsFilter,
    pub intensity: Option<IntensityFilter>,
}

impl Default for Reclassify {
    fn default() -> Self {
        Self {
            mode: ReclassifyMode::ReclassifyMove,
            logic: FilterLogic::ApplyIfMatch,
            hierarchy: HierarchyHandling::CreateTree,
            min_intersection: 0.1,
            input_classes: vec![ClassIdIn::Default],
            intersecting_class: ClassIdIn::Default,
            new_class: ClassIdIn::Default,
            metrics: MetricsFilter::default(),
            intensity: None,
        }
    }
}

impl Reclassify {
    fn object_filter(&self) -> Option<ObjectFilter> {
        let intensity_active = self.intensity.as_ref().is_some_and(IntensityFilter::is_active);
        if !self.metrics.is_active() && !intensity_active {
            return None;
        }
        Some(ObjectFilter {
            output_class: self.new_class,
            metrics: self.metrics,
            intensity: self.intensity,
        })
    }

    fn resolved_inputs(&self, ctx: &ProcessContext<'_>) -> Vec<ClassId> {
        let mut classes: Vec<ClassId> =
            self.input_classes.iter().map(|c| ctx.class_id(*c)).collect();
        classes.sort();
        classes.dedup();
        classes
    }
}

impl PipelineCommand for Reclassify {
    fn execute(
        &self,
        ctx: &ProcessContext<'_>,
        _image: &mut Image,
        objects: &mut PipelineObjects<'_>,
    ) -> CommandResult<()> {
        let params = IntersectionParams {
            mode: self.mode,
            logic: self.logic,
            hierarchy: self.hierarchy,
            min_intersection: self.min_intersection,
            other_class: ctx.class_id(self.intersecting_class),
            new_class: ctx.class_id(self.new_class),
        };
        let others: Vec<Roi> = objects.iter_class(params.other_class).cloned().collect();
        let others: Vec<&Roi> = others.iter().collect();
        let filter = self.object_filter();

        for class_id in self.resolved_inputs(ctx) {
            let accepted: Option<HashSet<u64>> = match &filter {
                Some(filter) => {
                    let mut accepted = HashSet::new();
                    for roi in objects.iter_class(class_id) {
                        if ctx.matches_filter(filter, roi)? {
                            accepted.insert(roi.object_id());
                        }
                    }
                    Some(accepted)
                }
                None => None,
            };
            let rois = objects.class_mut(class_id);
            let created = apply_intersection(rois, &others, &params, |roi| {
                accepted.as_ref().map_or(true, |ids| ids.contains(&roi.object_id()))
            });
            debug!(
                "Reclassify {class_id} against {}: {} objects into {}",
                params.other_class,
                created.len(),
                params.new_class
            );
            objects.extend(created);
        }
        Ok(())
    }

    fn input_classes(&self) -> Vec<ClassIdIn> {
        let mut classes = self.input_classes.clone();
        classes.push(self.intersecting_class);
        classes
    }

    fn output_classes(&self) -> Vec<ClassIdIn> {
        match self.mode {
            ReclassifyMode::ReclassifyCopy => vec![self.new_class],
            ReclassifyMode::ReclassifyMove => {
                let mut classes = self.input_classes.clone();
                classes.push(self.new_class);
                classes
            }
            ReclassifyMode::Count | ReclassifyMode::KeepIntersecting => self.input_classes.clone(),
        }
    }

    fn referenced_planes(&self) -> Vec<PlaneRef> {
        self.intensity
            .filter(IntensityFilter::is_active)
            .map(|i| i.image_in)
            .into_iter()
            .collect()
    }

    fn check(&self, log: &mut SettingParserLog, pipeline: &str) {
        if self.input_classes.is_empty() {
            log.warning(pipeline, "$reclassify: no input classes selected");
        }
        if !(0.0..=1.0).contains(&self.min_intersection) {
            log.error(
                pipeline,
                format!(
                    "$reclassify: min intersection {} outside [0, 1]",
                    self.min_intersection
                ),
            );
        }
    }
}
