//! Detected objects of one iteration, keyed by class.

mod intersection;
mod pipeline_objects;
mod spatial_hash;


use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::enums::ClassId;
use crate::image::{Image, PlaneId};
use crate::roi::{ObjectRef, Roi};

pub use intersection::{
    apply_intersection, FilterLogic, HierarchyHandling, IntersectionParams, ReclassifyMode,
};
pub use pipeline_objects::PipelineObjects;
pub use spatial_hash::{SpatialHash, DEFAULT_CELL_SIZE};

/// Objects a pipeline produced during one wave, see [`ObjectList::merge_wave`].
#[derive(Debug, Default)]
pub struct WaveResult {
    pub objects: ObjectList,
    /// Classes taken over from earlier waves.
    pub adopted: BTreeSet<ClassId>,
}

/// Multimap `class id -> objects`; insertion order is kept per class.
#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    classes: BTreeMap<ClassId, Vec<Roi>>,
}

impl ObjectList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, roi: Roi) {
        self.classes.entry(roi.class_id()).or_default().push(roi);
    }

    pub fn extend(&mut self, rois: impl IntoIterator<Item = Roi>) {
        for roi in rois {
            self.push(roi);
        }
    }

    pub fn class(&self, class_id: ClassId) -> &[Roi] {
        self.classes.get(&class_id).map_or(&[], Vec::as_slice)
    }

    pub fn class_mut(&mut self, class_id: ClassId) -> &mut Vec<Roi> {
        self.classes.entry(class_id).or_default()
    }

    pub fn contains_class(&self, class_id: ClassId) -> bool {
        self.classes.contains_key(&class_id)
    }

    pub fn class_ids(&self) -> impl Iterator<Item = ClassId> + '_ {
        self.classes.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Roi> {
        self.classes.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.classes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.values().all(Vec::is_empty)
    }

    pub fn count(&self, class_id: ClassId) -> usize {
        self.class(class_id).len()
    }

    pub fn class_counts(&self) -> BTreeMap<ClassId, usize> {
        self.classes
            .iter()
            .filter(|(_, rois)| !rois.is_empty())
            .map(|(class_id, rois)| (*class_id, rois.len()))
            .collect()
    }

    pub fn erase_class(&mut self, class_id: ClassId) -> Vec<Roi> {
        self.classes.remove(&class_id).unwrap_or_default()
    }

    pub fn erase_object(&mut self, object_id: u64) -> Option<Roi> {
        for rois in self.classes.values_mut() {
            if let Some(pos) = rois.iter().position(|roi| roi.object_id() == object_id) {
                return Some(rois.remove(pos));
            }
        }
        None
    }

    pub fn find(&self, object_id: u64) -> Option<&Roi> {
        self.iter().find(|roi| roi.object_id() == object_id)
    }

    pub fn resolve(&self, reference: ObjectRef) -> Option<&Roi> {
        self.class(reference.class_id)
            .iter()
            .find(|roi| roi.object_id() == reference.object_id)
    }

    /// Removes every `TEMP_*` class and returns the number of erased objects.
    pub fn erase_temporary_classes(&mut self) -> usize {
        let mut erased = 0;
        self.classes.retain(|class_id, rois| {
            if class_id.is_temporary() {
                erased += rois.len();
                false
            } else {
                true
            }
        });
        erased
    }

    pub fn clear(&mut self) {
        self.classes.clear();
    }

    /// Paints the masks of `class_ids` with `value` onto a black plane.
    pub fn create_binary_image(
        &self,
        class_ids: &[ClassId],
        width: usize,
        height: usize,
        value: u16,
        plane: PlaneId,
    ) -> Image {
        let mut image = Image::new_blank(width, height, plane);
        for class_id in class_ids {
            for roi in self.class(*class_id) {
                roi.paint(&mut image, value);
            }
        }
        image
    }

    /// Folds the results of one wave into this list, in pipeline declaration order.
    ///
    /// New objects are appended. An adopted class replaces the part of the
    /// class that existed when the wave started; objects appended by sibling
    /// pipelines of the same wave are kept behind it.
    pub fn merge_wave(&mut self, results: impl IntoIterator<Item = WaveResult>) {
        let mut base_len: BTreeMap<ClassId, usize> = self
            .classes
            .iter()
            .map(|(class_id, rois)| (*class_id, rois.len()))
            .collect();
        let mut replaced = BTreeSet::new();

        for result in results {
            for (class_id, rois) in result.objects.classes {
                let target = self.classes.entry(class_id).or_default();
                if !result.adopted.contains(&class_id) {
                    target.extend(rois);
                    continue;
                }
                if !replaced.insert(class_id) {
                    warn!("Class {class_id} modified by several pipelines of one wave, last wins");
                }
                let prefix = base_len.get(&class_id).copied().unwrap_or(0).min(target.len());
                let appended = target.split_off(prefix);
                base_len.insert(class_id, rois.len());
                *target = rois;
                target.extend(appended);
            }
        }
        self.classes.retain(|_, rois| !rois.is_empty());
    }
}
