//! Global thresholding into a class-labelled binary image.

mod methods;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CommandResult, PipelineCommand};
use crate::context::ProcessContext;
use crate::image::Image;
use crate::object_list::PipelineObjects;
use crate::settings::SettingParserLog;

#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Debug,
    Default,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ThresholdMethod {
    /// `thresholdMin` is used as is.
    #[default]
    #[serde(alias = "NONE")]
    Manual,
    Li,
    Otsu,
    Triangle,
    Huang,
    Yen,
    MinError,
    Moments,
    Intermodes,
    #[serde(rename = "ISODATA")]
    #[strum(serialize = "ISODATA")]
    IsoData,
    MaxEntropy,
    Shanbhag,
    Percentile,
    RenyiEntropy,
    Minimum,
    Mean,
}

impl ThresholdMethod {
    /// Background end bin of the 8-bit histogram, in `0..=255`.
    /// An empty histogram yields 0.
    pub fn compute(self, histogram: &[u64; 256]) -> u8 {
        if histogram.iter().all(|&v| v == 0) {
            return 0;
        }
        let bin = match self {
            ThresholdMethod::Manual => 0,
            ThresholdMethod::Li => methods::li(histogram),
            ThresholdMethod::Otsu => methods::otsu(histogram),
            ThresholdMethod::Triangle => methods::triangle(histogram),
            ThresholdMethod::Huang => methods::huang(histogram),
            ThresholdMethod::Yen => methods::yen(histogram),
            ThresholdMethod::MinError => methods::min_error(histogram),
            ThresholdMethod::Moments => methods::moments(histogram),
            ThresholdMethod::Intermodes => methods::intermodes(histogram),
            ThresholdMethod::IsoData => methods::iso_data(histogram),
            ThresholdMethod::MaxEntropy => methods::max_entropy(histogram),
            ThresholdMethod::Shanbhag => methods::shanbhag(histogram),
            ThresholdMethod::Percentile => methods::percentile(histogram),
            ThresholdMethod::RenyiEntropy => methods::renyi_entropy(histogram),
            ThresholdMethod::Minimum => methods::minimum(histogram),
            ThresholdMethod::Mean => methods::mean(histogram),
        };
        bin.clamp(0, 255) as u8
    }
}

/// Maps the upper bound of a histogram bin back to the 16-bit range of `[min, max]`.
fn scale_to_image(bin: u8, min: u16, max: u16) -> u16 {
    if max <= min {
        return min;
    }
    let upper = bin as f64 + 1.0;
    if upper == 255.0 {
        return u16::MAX;
    }
    (min as f64 + upper * (max as f64 - min as f64) / 255.0).min(u16::MAX as f64) as u16
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThresholdClass {
    pub method: ThresholdMethod,
    pub threshold_min: u16,
    pub threshold_max: u16,
    /// Value written to foreground pixels.
    pub pixel_class_id: u16,
}

impl Default for ThresholdClass {
    fn default() -> Self {
        Self {
            method: ThresholdMethod::Manual,
            threshold_min: 0,
            threshold_max: u16::MAX,
            pixel_class_id: 1,
        }
    }
}

impl ThresholdClass {
    /// Effective `(min, max)` window; foreground is `min < v <= max`.
    pub fn range(&self, image: &Image) -> (u16, u16) {
        if self.method == ThresholdMethod::Manual {
            return (self.threshold_min, self.threshold_max);
        }
        let (min, max) = image.min_max();
        let histogram = image.histogram_8bit(min, max);
        let bin = self.method.compute(&histogram);
        let lower = scale_to_image(bin, min, max)
            .max(self.threshold_min)
            .min(self.threshold_max);
        (lower, self.threshold_max)
    }
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Threshold {
    pub model_classes: Vec<ThresholdClass>,
}

impl Default for Threshold {
    fn default() -> Self {
        Self {
            model_classes: vec![ThresholdClass::default()],
        }
    }
}

impl Threshold {
    pub fn apply(&self, image: &mut Image) {
        let source = image.clone();
        let mut result = Image::new_blank(source.width(), source.height(), source.plane());
        for class in &self.model_classes {
            let (lo, hi) = class.range(&source);
            debug!("Threshold {} on {}: ({lo}, {hi}]", class.method, source.plane());
            let buffer = result.buffer_mut();
            for (dst, &v) in buffer.iter_mut().zip(source.pixels()) {
                if v > lo && v <= hi {
                    *dst = (*dst).max(class.pixel_class_id);
                }
            }
        }
        *image = result;
    }
}

impl PipelineCommand for Threshold {
    fn execute(
        &self,
        _ctx: &ProcessContext<'_>,
        image: &mut Image,
        _objects: &mut PipelineObjects<'_>,
    ) -> CommandResult<()> {
        self.apply(image);
        Ok(())
    }

    fn check(&self, log: &mut SettingParserLog, pipeline: &str) {
        if self.model_classes.is_empty() {
            log.warning(pipeline, "$threshold: no threshold classes, output will be black");
        }
        for class in &self.model_classes {
            if class.threshold_min >= class.threshold_max {
                log.error(
                    pipeline,
                    format!(
                        "$threshold: min threshold {} is not below max threshold {}",
                        class.threshold_min, class.threshold_max
                    ),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;
    use crate::image::PlaneId;

    fn block_image(value: u16) -> Image {
        let mut image = Image::new_blank(8, 8, PlaneId::default());
        for y in 2..6 {
            for x in 2..6 {
                image.set(x, y, value);
            }
        }
        image
    }

    #[test]
    fn manual_threshold_marks_block() {
        let mut image = block_image(40000);
        Threshold {
            model_classes: vec![ThresholdClass {
                threshold_min: 20000,
                ..Default::default()
            }],
        }
        .apply(&mut image);
        assert_eq!(image.pixels().iter().filter(|&&v| v == 1).count(), 16);
        assert_eq!(image.get(2, 2), 1);
        assert_eq!(image.get(0, 0), 0);
    }

    #[test]
    fn classes_combine_with_max() {
        let mut image = block_image(40000);
        image.set(0, 0, 10000);
        Threshold {
            model_classes: vec![
                ThresholdClass {
                    threshold_min: 5000,
                    pixel_class_id: 2,
                    ..Default::default()
                },
                ThresholdClass {
                    threshold_min: 20000,
                    pixel_class_id: 7,
                    ..Default::default()
                },
            ],
        }
        .apply(&mut image);
        assert_eq!(image.get(0, 0), 2);
        assert_eq!(image.get(3, 3), 7);
        assert_eq!(image.get(7, 7), 0);
    }

    #[test]
    fn every_method_stays_inside_the_window() {
        let image = block_image(40000);
        for method in ThresholdMethod::iter() {
            let class = ThresholdClass {
                method,
                threshold_min: 100,
                threshold_max: 50000,
                pixel_class_id: 1,
            };
            let (lo, hi) = class.range(&image);
            assert!((100..=50000).contains(&lo), "{method}: {lo}");
            assert_eq!(hi, 50000);
        }
    }

    #[test]
    fn auto_threshold_is_monotone_in_a_shift() {
        let mut spikes = [0u64; 256];
        spikes[30] = 500;
        spikes[31] = 300;
        spikes[150] = 200;
        spikes[151] = 100;
        let mut bimodal = [0u64; 256];
        for (i, v) in bimodal.iter_mut().enumerate() {
            let a = (-((i as f64 - 60.0).powi(2)) / 200.0).exp() * 1000.0;
            let b = (-((i as f64 - 190.0).powi(2)) / 200.0).exp() * 600.0;
            *v = (a + b).round() as u64;
        }

        for (histogram, by) in [(spikes, 40), (bimodal, 20)] {
            let mut shifted = [0u64; 256];
            shifted[by..].copy_from_slice(&histogram[..256 - by]);
            // No count is pushed past the last bin.
            assert_eq!(shifted.iter().sum::<u64>(), histogram.iter().sum::<u64>());
            // MANUAL ignores the histogram.
            for method in ThresholdMethod::iter().filter(|m| *m != ThresholdMethod::Manual) {
                let (before, after) = (method.compute(&histogram), method.compute(&shifted));
                assert!(after >= before, "{method} shifted by {by}: {before} -> {after}");
            }
        }
    }

    #[test]
    fn empty_histogram_gives_zero() {
        assert_eq!(ThresholdMethod::Otsu.compute(&[0; 256]), 0);
    }

    #[test]
    fn scaling_maps_top_bin_to_full_range() {
        assert_eq!(scale_to_image(254, 0, 1000), u16::MAX);
        assert_eq!(scale_to_image(0, 100, 100), 100);
        assert_eq!(scale_to_image(126, 0, 255), 127);
    }

    #[test]
    fn method_names() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&ThresholdMethod::IsoData)?, "\"ISODATA\"");
        assert_eq!(serde_json::to_string(&ThresholdMethod::MinError)?, "\"MIN_ERROR\"");
        let m: ThresholdMethod = serde_json::from_str("\"NONE\"")?;
        assert_eq!(m, ThresholdMethod::Manual);
        Ok(())
    }
}
