use serde::{Deserialize, Serialize};
use tracing::debug;

use super::classifier::route;
use super::{CommandResult, PipelineCommand};
use crate::context::ProcessContext;
use crate::enums::{ClassId, ClassIdIn};
use crate::image::{Image, PlaneRef};
use crate::object_list::PipelineObjects;
use crate::settings::{ObjectFilter, SettingParserLog};

/// Rules applied to the objects of one class.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterClass {
    pub input_class: ClassIdIn,
    /// Evaluated in order, the first match decides the new class.
    pub filters: Vec<ObjectFilter>,
    /// Where objects matching no rule go. `NONE` removes them.
    pub output_class_no_match: ClassIdIn,
}

impl Default for FilterClass {
    fn default() -> Self {
        Self {
            input_class: ClassIdIn::Default,
            filters: Vec::new(),
            output_class_no_match: ClassIdIn::Id(ClassId::NONE),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Filter {
    pub filter_classes: Vec<FilterClass>,
}

impl PipelineCommand for Filter {
    fn execute(
        &self,
        ctx: &ProcessContext<'_>,
        _image: &mut Image,
        objects: &mut PipelineObjects<'_>,
    ) -> CommandResult<()> {
        for class in &self.filter_classes {
            let input = ctx.class_id(class.input_class);
            let rois = std::mem::take(objects.class_mut(input));
            let total = rois.len();
            let mut kept = Vec::with_capacity(total);
            let mut moved = Vec::new();
            for mut roi in rois {
                match route(ctx, &class.filters, class.output_class_no_match, &roi)? {
                    target if target == input => kept.push(roi),
                    ClassId::NONE => {}
                    target => {
                        roi.set_class_id(target);
                        moved.push(roi);
                    }
                }
            }
            debug!(
                "Filter {input}: {total} objects, {} kept, {} moved",
                kept.len(),
                moved.len()
            );
            *objects.class_mut(input) = kept;
            objects.extend(moved);
        }
        Ok(())
    }

    fn input_classes(&self) -> Vec<ClassIdIn> {
        self.filter_classes.iter().map(|c| c.input_class).collect()
    }

    fn output_classes(&self) -> Vec<ClassIdIn> {
        let mut classes: Vec<ClassIdIn> = self
            .filter_classes
            .iter()
            .flat_map(|c| {
                std::iter::once(c.input_class)
                    .chain(std::iter::once(c.output_class_no_match))
                    .chain(c.filters.iter().map(|f| f.output_class))
            })
            .filter(|c| *c != ClassIdIn::Id(ClassId::NONE))
            .collect();
        classes.sort();
        classes.dedup();
        classes
    }

    fn referenced_planes(&self) -> Vec<PlaneRef> {
        self.filter_classes
            .iter()
            .flat_map(|c| c.filters.iter())
            .filter_map(|f| f.intensity.filter(|i| i.is_active()))
            .map(|i| i.image_in)
            .collect()
    }

    fn check(&self, log: &mut SettingParserLog, pipeline: &str) {
        if self.filter_classes.is_empty() {
            log.warning(pipeline, "$filter: no classes selected");
        }
        for class in &self.filter_classes {
            if class.filters.is_empty()
                && class.output_class_no_match == ClassIdIn::Id(ClassId::NONE)
            {
                log.warning(
                    pipeline,
                    format!(
                        "$filter: class {} has no rules, all objects are removed",
                        class.input_class
                    ),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{IntensityFilter, MetricsFilter};

    #[test]
    fn introspection_lists_every_target() {
        let filter = Filter {
            filter_classes: vec![FilterClass {
                input_class: ClassIdIn::Id(ClassId::C1),
                filters: vec![ObjectFilter {
                    output_class: ClassIdIn::Id(ClassId::C3),
                    metrics: MetricsFilter {
                        min_particle_size: 5,
                        ..Default::default()
                    },
                    intensity: Some(IntensityFilter {
                        image_in: PlaneRef::channel(2),
                        min_intensity: 100.0,
                        ..Default::default()
                    }),
                }],
                ..Default::default()
            }],
        };
        assert_eq!(filter.input_classes(), vec![ClassIdIn::Id(ClassId::C1)]);
        assert_eq!(
            filter.output_classes(),
            vec![ClassIdIn::Id(ClassId::C1), ClassIdIn::Id(ClassId::C3)]
        );
        assert_eq!(filter.referenced_planes(), vec![PlaneRef::channel(2)]);
    }
}
