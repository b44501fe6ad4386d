use std::collections::{BTreeMap, BTreeSet};

use super::{ObjectList, WaveResult};
use crate::enums::ClassId;
use crate::roi::Roi;

/// Object access of one pipeline during a wave.
///
/// Reads see the objects of earlier waves plus everything this pipeline has
/// added. New objects stay local until the wave is merged. The first mutable
/// access to a class that earlier waves produced copies it into the local list
/// and marks it adopted; adopted classes replace the shared version on merge.
#[derive(Debug)]
pub struct PipelineObjects<'a> {
    shared: &'a ObjectList,
    local: ObjectList,
    adopted: BTreeSet<ClassId>,
}

impl<'a> PipelineObjects<'a> {
    pub fn new(shared: &'a ObjectList) -> Self {
        Self {
            shared,
            local: ObjectList::default(),
            adopted: BTreeSet::new(),
        }
    }

    pub fn iter_class(&self, class_id: ClassId) -> impl Iterator<Item = &Roi> {
        let shared: &[Roi] = if self.adopted.contains(&class_id) {
            &[]
        } else {
            self.shared.class(class_id)
        };
        shared.iter().chain(self.local.class(class_id))
    }

    pub fn class(&self, class_id: ClassId) -> Vec<&Roi> {
        self.iter_class(class_id).collect()
    }

    pub fn count(&self, class_id: ClassId) -> usize {
        self.iter_class(class_id).count()
    }

    pub fn push(&mut self, roi: Roi) {
        self.local.push(roi);
    }

    pub fn extend(&mut self, rois: impl IntoIterator<Item = Roi>) {
        self.local.extend(rois);
    }

    /// Mutable access to all objects of a class, adopting it if needed.
    pub fn class_mut(&mut self, class_id: ClassId) -> &mut Vec<Roi> {
        if !self.adopted.contains(&class_id) && self.shared.contains_class(class_id) {
            let mut merged = self.shared.class(class_id).to_vec();
            merged.append(self.local.class_mut(class_id));
            *self.local.class_mut(class_id) = merged;
            self.adopted.insert(class_id);
        }
        self.local.class_mut(class_id)
    }

    pub fn erase_class(&mut self, class_id: ClassId) {
        self.class_mut(class_id).clear();
    }

    pub fn erase_temporary_classes(&mut self) -> usize {
        self.local.erase_temporary_classes()
    }

    pub fn find(&self, object_id: u64) -> Option<&Roi> {
        self.local.find(object_id).or_else(|| {
            self.shared
                .find(object_id)
                .filter(|roi| !self.adopted.contains(&roi.class_id()))
        })
    }

    pub fn class_ids(&self) -> BTreeSet<ClassId> {
        self.shared
            .class_ids()
            .chain(self.local.class_ids())
            .collect()
    }

    /// Visible object count per class.
    pub fn counts(&self) -> BTreeMap<ClassId, usize> {
        self.class_ids()
            .into_iter()
            .map(|class_id| (class_id, self.count(class_id)))
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    /// Objects added or adopted by this pipeline.
    pub fn local(&self) -> &ObjectList {
        &self.local
    }

    pub fn into_result(self) -> WaveResult {
        WaveResult {
            objects: self.local,
            adopted: self.adopted,
        }
    }
}
