//! Detected regions of interest.

pub mod geometry;
pub mod measurement;


use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use common::buffer2::Buffer2;
use serde::{Deserialize, Serialize};

use crate::enums::ClassId;
use crate::image::{Image, PlaneId};
use crate::ome::TileToLoad;

pub use geometry::{BoundingBox, Point};
pub use measurement::{MeasurementKey, MeasurementKind, MeasurementRef};

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

fn next_object_id() -> u64 {
    NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Reference to another object, resolved through an `ObjectList`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ObjectRef {
    pub class_id: ClassId,
    pub object_id: u64,
}

#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct IntensityStats {
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// One detected object.
///
/// Geometry is kept in tile coordinates; [`Roi::real_bounding_box`] gives the
/// position in the full plane.
#[derive(Clone, Debug)]
pub struct Roi {
    object_id: u64,
    class_id: ClassId,
    plane: PlaneId,
    tile: TileToLoad,
    confidence: f32,
    bounding_box: BoundingBox,
    mask: Buffer2<bool>,
    contour: Vec<Point>,
    area: u64,
    perimeter: f64,
    circularity: f64,
    centroid: (f64, f64),
    measurements: BTreeMap<MeasurementKey, f64>,
    origin_object_id: Option<u64>,
    parent: Option<ObjectRef>,
    linked: Vec<ObjectRef>,
}

impl Roi {
    /// Builds an object from a mask laid over `bounding_box`. Shape metrics are derived here.
    pub fn new(
        class_id: ClassId,
        plane: PlaneId,
        tile: TileToLoad,
        confidence: f32,
        bounding_box: BoundingBox,
        mask: Buffer2<bool>,
    ) -> Self {
        debug_assert_eq!(mask.width(), bounding_box.width as usize);
        debug_assert_eq!(mask.height(), bounding_box.height as usize);

        let contour = geometry::trace_contour(&mask);
        let (area, sum_x, sum_y) = mask
            .iter()
            .enumerate()
            .filter(|(_, &v)| v)
            .fold((0u64, 0f64, 0f64), |(n, sx, sy), (i, _)| {
                (
                    n + 1,
                    sx + (i % mask.width()) as f64,
                    sy + (i / mask.width()) as f64,
                )
            });
        let centroid = if area > 0 {
            (
                bounding_box.x as f64 + sum_x / area as f64,
                bounding_box.y as f64 + sum_y / area as f64,
            )
        } else {
            (bounding_box.x as f64, bounding_box.y as f64)
        };
        let perimeter = geometry::traced_perimeter(&contour);
        let circularity = geometry::circularity(area as f64, perimeter);

        Self {
            object_id: next_object_id(),
            class_id,
            plane,
            tile,
            confidence,
            bounding_box,
            mask,
            contour,
            area,
            perimeter,
            circularity,
            centroid,
            measurements: BTreeMap::new(),
            origin_object_id: None,
            parent: None,
            linked: Vec::new(),
        }
    }

    /// Filled rectangle, used by box detectors.
    pub fn from_box(
        class_id: ClassId,
        plane: PlaneId,
        tile: TileToLoad,
        confidence: f32,
        bounding_box: BoundingBox,
    ) -> Self {
        let mask = Buffer2::new_filled(
            bounding_box.width.max(0) as usize,
            bounding_box.height.max(0) as usize,
            true,
        );
        Self::new(class_id, plane, tile, confidence, bounding_box, mask)
    }

    /// Copy with a fresh object id that remembers where it came from.
    pub fn copy_as(&self, class_id: ClassId) -> Self {
        let mut copy = self.clone();
        copy.object_id = next_object_id();
        copy.class_id = class_id;
        copy.origin_object_id = Some(self.object_id);
        copy
    }

    #[inline]
    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    #[inline]
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    pub fn set_class_id(&mut self, class_id: ClassId) {
        self.class_id = class_id;
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            class_id: self.class_id,
            object_id: self.object_id,
        }
    }

    #[inline]
    pub fn plane(&self) -> PlaneId {
        self.plane
    }

    #[inline]
    pub fn tile(&self) -> TileToLoad {
        self.tile
    }

    #[inline]
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    #[inline]
    pub fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    /// Bounding box in full-plane coordinates.
    pub fn real_bounding_box(&self) -> BoundingBox {
        let (ox, oy) = self.tile.offset();
        self.bounding_box.translated(ox as i32, oy as i32)
    }

    #[inline]
    pub fn mask(&self) -> &Buffer2<bool> {
        &self.mask
    }

    /// Contour relative to the bounding box origin.
    #[inline]
    pub fn contour(&self) -> &[Point] {
        &self.contour
    }

    #[inline]
    pub fn area(&self) -> u64 {
        self.area
    }

    #[inline]
    pub fn perimeter(&self) -> f64 {
        self.perimeter
    }

    #[inline]
    pub fn circularity(&self) -> f64 {
        self.circularity
    }

    /// Center of mass in tile coordinates.
    #[inline]
    pub fn centroid(&self) -> (f64, f64) {
        self.centroid
    }

    pub fn origin_object_id(&self) -> Option<u64> {
        self.origin_object_id
    }

    pub fn parent(&self) -> Option<ObjectRef> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<ObjectRef>) {
        self.parent = parent;
    }

    pub fn linked(&self) -> &[ObjectRef] {
        &self.linked
    }

    pub fn link(&mut self, other: ObjectRef) {
        if !self.linked.contains(&other) {
            self.linked.push(other);
        }
    }

    pub fn measurements(&self) -> &BTreeMap<MeasurementKey, f64> {
        &self.measurements
    }

    pub fn measurement(&self, key: MeasurementKey) -> Option<f64> {
        self.measurements.get(&key).copied()
    }

    pub fn set_measurement(&mut self, key: MeasurementKey, value: f64) {
        self.measurements.insert(key, value);
    }

    /// Shape metrics plus every stored measurement.
    pub fn all_measurements(&self) -> BTreeMap<MeasurementKey, f64> {
        let mut all = self.measurements.clone();
        let real = self.real_bounding_box();
        let (ox, oy) = self.tile.offset();
        let plain = [
            (MeasurementKind::Confidence, self.confidence as f64),
            (MeasurementKind::AreaSize, self.area as f64),
            (MeasurementKind::Perimeter, self.perimeter),
            (MeasurementKind::Circularity, self.circularity),
            (MeasurementKind::CenterOfMassX, self.centroid.0 + ox as f64),
            (MeasurementKind::CenterOfMassY, self.centroid.1 + oy as f64),
            (MeasurementKind::BoundingBoxWidth, real.width as f64),
            (MeasurementKind::BoundingBoxHeight, real.height as f64),
        ];
        for (kind, value) in plain {
            all.insert(MeasurementKey::plain(kind), value);
        }
        all
    }

    /// Mask pixel at tile position `(x, y)`.
    pub fn covers(&self, x: i32, y: i32) -> bool {
        if !self.bounding_box.contains(x, y) {
            return false;
        }
        *self.mask.get(
            (x - self.bounding_box.x) as usize,
            (y - self.bounding_box.y) as usize,
        )
    }

    /// Overlapping mask pixels divided by the smaller of both areas.
    /// Both objects must share the same tile frame.
    pub fn intersection_fraction(&self, other: &Roi) -> f64 {
        let Some(overlap) = self.bounding_box.intersection(&other.bounding_box) else {
            return 0.0;
        };
        let mut common = 0u64;
        for y in overlap.y..overlap.bottom() {
            for x in overlap.x..overlap.right() {
                if self.covers(x, y) && other.covers(x, y) {
                    common += 1;
                }
            }
        }
        let smaller = self.area.min(other.area);
        if smaller == 0 {
            0.0
        } else {
            common as f64 / smaller as f64
        }
    }

    pub fn is_intersecting(&self, other: &Roi, min_intersection: f64) -> bool {
        let fraction = self.intersection_fraction(other);
        fraction > 0.0 && fraction >= min_intersection
    }

    /// Intensity statistics of the masked pixels of `image` (tile frame).
    pub fn intensity(&self, image: &Image) -> IntensityStats {
        let mut stats = IntensityStats {
            sum: 0.0,
            avg: 0.0,
            min: f64::MAX,
            max: 0.0,
        };
        let mut n = 0u64;
        let bb = self.bounding_box;
        for y in bb.y.max(0)..bb.bottom().min(image.height() as i32) {
            for x in bb.x.max(0)..bb.right().min(image.width() as i32) {
                if !self.covers(x, y) {
                    continue;
                }
                let v = image.get(x as usize, y as usize) as f64;
                stats.sum += v;
                stats.min = stats.min.min(v);
                stats.max = stats.max.max(v);
                n += 1;
            }
        }
        if n == 0 {
            stats.min = 0.0;
        } else {
            stats.avg = stats.sum / n as f64;
        }
        stats
    }

    /// Stores intensity statistics of `image` under its channel.
    pub fn measure_intensity(&mut self, image: &Image) -> IntensityStats {
        let stats = self.intensity(image);
        let c = image.plane().c as u16;
        self.set_measurement(MeasurementKey::channel(MeasurementKind::IntensitySum, c), stats.sum);
        self.set_measurement(MeasurementKey::channel(MeasurementKind::IntensityAvg, c), stats.avg);
        self.set_measurement(MeasurementKey::channel(MeasurementKind::IntensityMin, c), stats.min);
        self.set_measurement(MeasurementKey::channel(MeasurementKind::IntensityMax, c), stats.max);
        stats
    }

    /// Writes `value` into every covered pixel of `image`.
    pub fn paint(&self, image: &mut Image, value: u16) {
        let bb = self.bounding_box;
        let (w, h) = (image.width() as i32, image.height() as i32);
        let buffer = image.buffer_mut();
        for y in bb.y.max(0)..bb.bottom().min(h) {
            for x in bb.x.max(0)..bb.right().min(w) {
                if self.covers(x, y) {
                    *buffer.get_mut(x as usize, y as usize) = value;
                }
            }
        }
    }
}
