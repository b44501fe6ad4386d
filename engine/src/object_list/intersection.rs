//! Overlap based reclassification between two sets of objects.

use serde::{Deserialize, Serialize};

use super::spatial_hash::SpatialHash;
use crate::enums::ClassId;
use crate::roi::{MeasurementKey, MeasurementKind, ObjectRef, Roi};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReclassifyMode {
    /// Move matching objects into the new class.
    #[default]
    ReclassifyMove,
    /// Keep the original and add a copy in the new class.
    ReclassifyCopy,
    /// Annotate every object with the number of overlapping objects.
    Count,
    /// Drop objects the filter logic does not select.
    KeepIntersecting,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterLogic {
    #[default]
    ApplyIfMatch,
    ApplyIfNotMatch,
}

/// Parent assignment for moved or copied objects.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HierarchyHandling {
    /// The first overlapping object becomes the parent.
    #[default]
    CreateTree,
    KeepExisting,
    Remove,
}

#[derive(Clone, Copy, Debug)]
pub struct IntersectionParams {
    pub mode: ReclassifyMode,
    pub logic: FilterLogic,
    pub hierarchy: HierarchyHandling,
    pub min_intersection: f64,
    /// Class the `others` belong to, used as measurement reference.
    pub other_class: ClassId,
    pub new_class: ClassId,
}

/// Intersects `rois` with `others` in place and returns the objects to be
/// inserted under [`IntersectionParams::new_class`].
///
/// `accept` is an additional per-object filter evaluated before moving,
/// copying or keeping an object.
pub fn apply_intersection(
    rois: &mut Vec<Roi>,
    others: &[&Roi],
    params: &IntersectionParams,
    accept: impl Fn(&Roi) -> bool,
) -> Vec<Roi> {
    let grid = SpatialHash::build(others.iter().map(|roi| roi.bounding_box()));
    let matches_of = |roi: &Roi| -> Vec<ObjectRef> {
        grid.query(&roi.bounding_box())
            .into_iter()
            .map(|idx| others[idx])
            .filter(|other| other.object_id() != roi.object_id())
            .filter(|other| roi.is_intersecting(other, params.min_intersection))
            .map(Roi::object_ref)
            .collect()
    };
    let selected = |is_match: bool| match params.logic {
        FilterLogic::ApplyIfMatch => is_match,
        FilterLogic::ApplyIfNotMatch => !is_match,
    };

    let mut created = Vec::new();
    match params.mode {
        ReclassifyMode::Count => {
            let key = MeasurementKey::class(MeasurementKind::IntersectionCount, params.other_class);
            for roi in rois.iter_mut() {
                let matches = matches_of(roi);
                roi.set_measurement(key, matches.len() as f64);
                for other in matches {
                    roi.link(other);
                }
            }
        }
        ReclassifyMode::KeepIntersecting => {
            rois.retain(|roi| selected(!matches_of(roi).is_empty()) && accept(roi));
        }
        ReclassifyMode::ReclassifyMove | ReclassifyMode::ReclassifyCopy => {
            let mut kept = Vec::with_capacity(rois.len());
            for roi in rois.drain(..) {
                let matches = matches_of(&roi);
                if !selected(!matches.is_empty()) || !accept(&roi) {
                    kept.push(roi);
                    continue;
                }
                let parent = match params.hierarchy {
                    HierarchyHandling::CreateTree => matches.first().copied().or(roi.parent()),
                    HierarchyHandling::KeepExisting => roi.parent(),
                    HierarchyHandling::Remove => None,
                };
                let mut target = if params.mode == ReclassifyMode::ReclassifyCopy {
                    let copy = roi.copy_as(params.new_class);
                    kept.push(roi);
                    copy
                } else {
                    let mut moved = roi;
                    moved.set_class_id(params.new_class);
                    moved
                };
                target.set_parent(parent);
                created.push(target);
            }
            *rois = kept;
        }
    }
    created
}
