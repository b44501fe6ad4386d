//! Connected components of a class-labelled image into objects.

use common::buffer2::Buffer2;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{CommandResult, PipelineCommand};
use crate::context::ProcessContext;
use crate::enums::{ClassId, ClassIdIn, ImageValidity};
use crate::image::Image;
use crate::object_list::PipelineObjects;
use crate::roi::{BoundingBox, Roi};
use crate::settings::{ObjectFilter, SettingParserLog};

/// Components above this count mark the plane as invalid and are dropped.
pub const MAX_OBJECTS_PER_CLASS: usize = 50_000;

/// A horizontal run of foreground pixels, `end` exclusive.
#[derive(Debug, Clone, Copy)]
struct Run {
    start: u32,
    end: u32,
    label: u32,
}

impl Run {
    /// Range of the previous row touching this run under 8-connectivity.
    #[inline]
    fn touches(&self, prev: &Run) -> bool {
        prev.start < self.end + 1 && prev.end + 1 > self.start
    }
}

fn find(parent: &mut [u32], mut label: u32) -> u32 {
    while parent[label as usize] != label {
        let grand = parent[parent[label as usize] as usize];
        parent[label as usize] = grand;
        label = grand;
    }
    label
}

fn union(parent: &mut [u32], a: u32, b: u32) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[hi as usize] = lo;
    }
}

/// Label map of 8-connected components, `0` being background.
/// Labels are consecutive from 1 in raster order of the first pixel.
#[derive(Debug)]
pub struct LabelMap {
    pub labels: Buffer2<u32>,
    pub num_labels: usize,
}

/// Labels the pixels of `image` equal to `value`.
pub fn label_components(image: &Image, value: u16) -> LabelMap {
    let (width, height) = (image.width(), image.height());
    let mut parent: Vec<u32> = vec![0];
    let mut rows: Vec<Vec<Run>> = Vec::with_capacity(height);

    for y in 0..height {
        let row = &image.pixels()[y * width..(y + 1) * width];
        let mut runs = Vec::new();
        let mut x = 0;
        while x < width {
            if row[x] != value {
                x += 1;
                continue;
            }
            let start = x;
            while x < width && row[x] == value {
                x += 1;
            }
            let label = parent.len() as u32;
            parent.push(label);
            let run = Run {
                start: start as u32,
                end: x as u32,
                label,
            };
            if let Some(prev_row) = rows.last() {
                for prev in prev_row.iter().filter(|prev| run.touches(prev)) {
                    union(&mut parent, run.label, prev.label);
                }
            }
            runs.push(run);
        }
        rows.push(runs);
    }

    // Flatten to consecutive labels.
    let mut compact = vec![0u32; parent.len()];
    let mut num_labels = 0u32;
    for label in 1..parent.len() as u32 {
        let root = find(&mut parent, label);
        if compact[root as usize] == 0 {
            num_labels += 1;
            compact[root as usize] = num_labels;
        }
        compact[label as usize] = compact[root as usize];
    }

    let mut labels = Buffer2::new_default(width, height);
    for (y, runs) in rows.iter().enumerate() {
        let row = labels.row_mut(y);
        for run in runs {
            row[run.start as usize..run.end as usize].fill(compact[run.label as usize]);
        }
    }
    LabelMap {
        labels,
        num_labels: num_labels as usize,
    }
}

impl LabelMap {
    /// Bounding box and mask of every component, indexed by `label - 1`.
    pub fn components(&self) -> Vec<(BoundingBox, Buffer2<bool>)> {
        let height = self.labels.height();
        let mut extents = vec![(usize::MAX, usize::MAX, 0usize, 0usize); self.num_labels];
        for y in 0..height {
            for (x, &label) in self.labels.row(y).iter().enumerate() {
                if label == 0 {
                    continue;
                }
                let e = &mut extents[label as usize - 1];
                e.0 = e.0.min(x);
                e.1 = e.1.min(y);
                e.2 = e.2.max(x);
                e.3 = e.3.max(y);
            }
        }
        extents
            .into_iter()
            .enumerate()
            .map(|(idx, (x0, y0, x1, y1))| {
                let label = idx as u32 + 1;
                let mask = Buffer2::from_fn(x1 - x0 + 1, y1 - y0 + 1, |mx, my| {
                    *self.labels.get(x0 + mx, y0 + my) == label
                });
                let bbox = BoundingBox::new(
                    x0 as i32,
                    y0 as i32,
                    (x1 - x0 + 1) as i32,
                    (y1 - y0 + 1) as i32,
                );
                (bbox, mask)
            })
            .collect()
    }
}

/// Target class of a fresh detection: the output class of the first matching
/// filter, `no_match` otherwise.
pub(crate) fn route(
    ctx: &ProcessContext<'_>,
    filters: &[ObjectFilter],
    no_match: ClassIdIn,
    roi: &Roi,
) -> CommandResult<ClassId> {
    for filter in filters {
        if ctx.matches_filter(filter, roi)? {
            return Ok(ctx.class_id(filter.output_class));
        }
    }
    Ok(ctx.class_id(no_match))
}

/// Objects of one pixel value and where they go.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassifierClass {
    pub pixel_class_id: u16,
    /// Target of objects no filter matches. `NONE` drops them.
    pub output_class_no_match: ClassIdIn,
    /// Evaluated in order, the first match decides the class.
    pub filters: Vec<ObjectFilter>,
}

impl Default for ClassifierClass {
    fn default() -> Self {
        Self {
            pixel_class_id: 1,
            output_class_no_match: ClassIdIn::Default,
            filters: Vec::new(),
        }
    }
}

impl ClassifierClass {
    pub(crate) fn classify(&self, ctx: &ProcessContext<'_>, roi: &Roi) -> CommandResult<ClassId> {
        route(ctx, &self.filters, self.output_class_no_match, roi)
    }

    fn output_classes(&self) -> impl Iterator<Item = ClassIdIn> + '_ {
        std::iter::once(self.output_class_no_match)
            .chain(self.filters.iter().map(|f| f.output_class))
    }
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Classifier {
    pub model_classes: Vec<ClassifierClass>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            model_classes: vec![ClassifierClass::default()],
        }
    }
}

impl PipelineCommand for Classifier {
    fn execute(
        &self,
        ctx: &ProcessContext<'_>,
        image: &mut Image,
        objects: &mut PipelineObjects<'_>,
    ) -> CommandResult<()> {
        for class in &self.model_classes {
            let map = label_components(image, class.pixel_class_id);
            if map.num_labels > MAX_OBJECTS_PER_CLASS {
                warn!(
                    tile = ctx.tile_id(),
                    "Too many objects ({}) for pixel class {}, skipping",
                    map.num_labels,
                    class.pixel_class_id
                );
                ctx.set_validity(ImageValidity::TooManyObjects);
                continue;
            }
            for (bbox, mask) in map.components() {
                let mut roi =
                    Roi::new(ctx.default_class_id(), ctx.plane(), ctx.tile(), 1.0, bbox, mask);
                let class_id = class.classify(ctx, &roi)?;
                if class_id == ClassId::NONE {
                    continue;
                }
                roi.set_class_id(class_id);
                objects.push(roi);
            }
        }
        Ok(())
    }

    fn output_classes(&self) -> Vec<ClassIdIn> {
        let mut classes: Vec<ClassIdIn> = self
            .model_classes
            .iter()
            .flat_map(ClassifierClass::output_classes)
            .filter(|c| *c != ClassIdIn::Id(ClassId::NONE))
            .collect();
        classes.sort();
        classes.dedup();
        classes
    }

    fn check(&self, log: &mut SettingParserLog, pipeline: &str) {
        if self.model_classes.is_empty() {
            log.warning(pipeline, "$classify: no model classes, nothing will be detected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::PlaneId;

    fn image_from(rows: &[&str]) -> Image {
        let height = rows.len();
        let width = rows[0].len();
        let pixels = rows
            .iter()
            .flat_map(|row| row.bytes().map(|b| if b == b'#' { 1 } else { 0 }))
            .collect();
        Image::from_vec(width, height, pixels, PlaneId::default())
    }

    #[test]
    fn diagonal_pixels_are_connected() {
        let image = image_from(&["#...", ".#..", "..#.", "...."]);
        let map = label_components(&image, 1);
        assert_eq!(map.num_labels, 1);
    }

    #[test]
    fn u_shape_merges_into_one_label() {
        let image = image_from(&["#.#", "#.#", "###"]);
        let map = label_components(&image, 1);
        assert_eq!(map.num_labels, 1);
        let components = map.components();
        assert_eq!(components[0].0, BoundingBox::new(0, 0, 3, 3));
        assert_eq!(components[0].1.iter().filter(|&&v| v).count(), 7);
    }

    #[test]
    fn separate_blobs_in_raster_order() {
        let image = image_from(&["##..#", "##..#", ".....", "..##."]);
        let map = label_components(&image, 1);
        assert_eq!(map.num_labels, 3);
        assert_eq!(*map.labels.get(0, 0), 1);
        assert_eq!(*map.labels.get(4, 0), 2);
        assert_eq!(*map.labels.get(2, 3), 3);
        let components = map.components();
        assert_eq!(components[1].0, BoundingBox::new(4, 0, 1, 2));
    }

    #[test]
    fn only_the_selected_value_is_labelled() {
        let mut image = image_from(&["##..", "....", "..##"]);
        image.set(2, 2, 2);
        image.set(3, 2, 2);
        assert_eq!(label_components(&image, 1).num_labels, 1);
        assert_eq!(label_components(&image, 2).num_labels, 1);
        assert_eq!(label_components(&image, 3).num_labels, 0);
    }

    #[test]
    fn output_classes_skip_none() {
        let classifier = Classifier {
            model_classes: vec![ClassifierClass {
                output_class_no_match: ClassIdIn::Id(ClassId::NONE),
                filters: vec![ObjectFilter {
                    output_class: ClassIdIn::Id(ClassId::C2),
                    ..Default::default()
                }],
                ..Default::default()
            }],
        };
        assert_eq!(classifier.output_classes(), vec![ClassIdIn::Id(ClassId::C2)]);
    }
}
