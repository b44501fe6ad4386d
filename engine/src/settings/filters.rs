//! Object filter rules shared by detectors and object transforms.

use serde::{Deserialize, Serialize};

use crate::enums::ClassIdIn;
use crate::image::PlaneRef;
use crate::roi::{IntensityStats, Roi};

/// Shape constraints; `0` disables a bound.
#[derive(Clone, Copy, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricsFilter {
    pub min_particle_size: u64,
    pub max_particle_size: u64,
    pub min_circularity: f64,
}

impl MetricsFilter {
    pub fn is_active(&self) -> bool {
        self.min_particle_size > 0 || self.max_particle_size > 0 || self.min_circularity > 0.0
    }

    pub fn matches(&self, roi: &Roi) -> bool {
        let area = roi.area();
        if self.min_particle_size > 0 && area < self.min_particle_size {
            return false;
        }
        if self.max_particle_size > 0 && area > self.max_particle_size {
            return false;
        }
        roi.circularity() >= self.min_circularity
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntensityMode {
    #[default]
    Avg,
    Min,
    Max,
    Sum,
}

impl IntensityMode {
    pub fn pick(self, stats: &IntensityStats) -> f64 {
        match self {
            IntensityMode::Avg => stats.avg,
            IntensityMode::Min => stats.min,
            IntensityMode::Max => stats.max,
            IntensityMode::Sum => stats.sum,
        }
    }
}

/// Intensity window on a plane of the current iteration.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntensityFilter {
    pub image_in: PlaneRef,
    pub mode: IntensityMode,
    pub min_intensity: f64,
    pub max_intensity: f64,
}

impl Default for IntensityFilter {
    fn default() -> Self {
        Self {
            image_in: PlaneRef::channel(-1),
            mode: IntensityMode::Avg,
            min_intensity: 0.0,
            max_intensity: 0.0,
        }
    }
}

impl IntensityFilter {
    /// A zero window disables the filter.
    pub fn is_active(&self) -> bool {
        self.min_intensity > 0.0 || self.max_intensity > 0.0
    }

    pub fn matches(&self, stats: &IntensityStats) -> bool {
        let value = self.mode.pick(stats);
        value >= self.min_intensity && (self.max_intensity <= 0.0 || value <= self.max_intensity)
    }
}

/// Filter rule that sends matching objects to `output_class`.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectFilter {
    pub output_class: ClassIdIn,
    pub metrics: MetricsFilter,
    pub intensity: Option<IntensityFilter>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::ClassId;
    use crate::image::PlaneId;
    use crate::ome::TileToLoad;
    use crate::roi::BoundingBox;

    fn square(side: i32) -> Roi {
        Roi::from_box(
            ClassId::C0,
            PlaneId::default(),
            TileToLoad::new(0, 0, 64, 64),
            1.0,
            BoundingBox::new(0, 0, side, side),
        )
    }

    #[test]
    fn particle_size_bounds() {
        let filter = MetricsFilter {
            min_particle_size: 5,
            max_particle_size: 20,
            min_circularity: 0.0,
        };
        assert!(!filter.matches(&square(2)));
        assert!(filter.matches(&square(4)));
        assert!(!filter.matches(&square(5)));
        assert!(MetricsFilter::default().matches(&square(1)));
    }

    #[test]
    fn intensity_window() {
        let filter = IntensityFilter {
            min_intensity: 100.0,
            max_intensity: 200.0,
            ..Default::default()
        };
        let stats = |avg| IntensityStats {
            sum: 0.0,
            avg,
            min: 0.0,
            max: 0.0,
        };
        assert!(filter.matches(&stats(150.0)));
        assert!(!filter.matches(&stats(50.0)));
        assert!(!filter.matches(&stats(250.0)));
        assert!(!IntensityFilter::default().is_active());
    }
}
