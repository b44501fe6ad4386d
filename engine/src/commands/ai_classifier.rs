//! Object detection through a registered [`Predictor`](crate::predictor::Predictor).
//!
//! Two output layouts are decoded:
//! * `YOLO_V5`: detection rows `[x, y, w, h, objectness, class scores.., mask coefficients..]`
//!   in network pixels, optionally followed by mask prototypes `[1, nm, mh, mw]`.
//! * `U_NET` / `STAR_DIST`: per-pixel class logits `[1, classes, h, w]`; channel 0 is the
//!   foreground probability.

use std::path::PathBuf;

use common::buffer2::Buffer2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::classifier::{label_components, route};
use super::{CommandError, CommandResult, PipelineCommand};
use crate::context::ProcessContext;
use crate::enums::{ClassId, ClassIdIn};
use crate::image::{Image, PlaneId};
use crate::object_list::PipelineObjects;
use crate::predictor::{PredictorError, PredictorResult, Tensor};
use crate::roi::{BoundingBox, Roi};
use crate::settings::{ObjectFilter, SettingParserLog};

const BOX_THRESHOLD: f32 = 0.25;
const NMS_THRESHOLD: f32 = 0.45;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelFormat {
    #[default]
    Onnx,
    Torchscript,
    Tensorflow,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NetworkArchitecture {
    #[default]
    YoloV5,
    UNet,
    StarDist,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiModelClass {
    /// Class index in the network output.
    pub model_class_id: usize,
    /// Target of detections no filter matches. `NONE` drops them.
    pub output_class_no_match: ClassIdIn,
    pub filters: Vec<ObjectFilter>,
}

impl Default for AiModelClass {
    fn default() -> Self {
        Self {
            model_class_id: 0,
            output_class_no_match: ClassIdIn::Default,
            filters: Vec::new(),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AiClassifier {
    /// Key of the predictor in the job's registry. Empty disables the step.
    pub model_path: PathBuf,
    pub model_format: ModelFormat,
    pub network_architecture: NetworkArchitecture,
    pub model_classes: Vec<AiModelClass>,
    pub mask_threshold: f32,
    pub class_threshold: f32,
}

impl Default for AiClassifier {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            model_format: ModelFormat::Onnx,
            network_architecture: NetworkArchitecture::YoloV5,
            model_classes: vec![AiModelClass::default()],
            mask_threshold: 0.5,
            class_threshold: 0.5,
        }
    }
}

/// One decoded object in image coordinates.
#[derive(Clone, Debug)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    pub mask: Buffer2<bool>,
    pub class_index: usize,
    pub probability: f32,
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// `(rows, cols)` of a `[1, rows, cols]` or `[rows, cols]` tensor.
fn matrix_dims(tensor: &Tensor) -> PredictorResult<(usize, usize)> {
    match tensor.shape() {
        [1, rows, cols] | [rows, cols] => Ok((*rows, *cols)),
        shape => Err(PredictorError::UnexpectedOutput(shape.to_vec())),
    }
}

/// `(channels, height, width)` of a `[1, c, h, w]` tensor with a non-empty plane.
fn planar_dims(tensor: &Tensor) -> PredictorResult<(usize, usize, usize)> {
    match tensor.shape() {
        [1, c, h, w] if *h > 0 && *w > 0 => Ok((*c, *h, *w)),
        shape => Err(PredictorError::UnexpectedOutput(shape.to_vec())),
    }
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let Some(overlap) = a.intersection(b) else {
        return 0.0;
    };
    let inter = overlap.area() as f32;
    let union = (a.area() + b.area()) as f32 - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy class-agnostic non maximum suppression. Returns kept indices by descending score.
fn non_maximum_suppression(
    boxes: &[BoundingBox],
    scores: &[f32],
    score_threshold: f32,
    iou_threshold: f32,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len())
        .filter(|&i| scores[i] >= score_threshold)
        .collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    let mut kept: Vec<usize> = Vec::new();
    for idx in order {
        if kept.iter().all(|&k| iou(&boxes[k], &boxes[idx]) <= iou_threshold) {
            kept.push(idx);
        }
    }
    kept
}

/// Keeps the largest 8-connected part of `mask` and shrinks the box around it.
fn largest_component(
    bbox: BoundingBox,
    mask: &Buffer2<bool>,
) -> Option<(BoundingBox, Buffer2<bool>)> {
    let image = Image::from_vec(
        mask.width(),
        mask.height(),
        mask.iter().map(|&v| v as u16).collect(),
        PlaneId::default(),
    );
    let map = label_components(&image, 1);
    map.components()
        .into_iter()
        .max_by_key(|(_, m)| m.iter().filter(|&&v| v).count())
        .map(|(inner, m)| (inner.translated(bbox.x, bbox.y), m))
}

impl AiClassifier {
    /// Decodes YOLOv5 output for an image of `image_size`, scored on a network
    /// input of `net_size`.
    pub fn decode_yolo(
        &self,
        outputs: &[Tensor],
        image_size: (usize, usize),
        net_size: (usize, usize),
    ) -> PredictorResult<Vec<Detection>> {
        let Some(detections) = outputs.first() else {
            return Ok(Vec::new());
        };
        let (rows, cols) = matrix_dims(detections)?;
        let protos = outputs.get(1).map(planar_dims).transpose()?;
        let nm = protos.map_or(0, |(c, _, _)| c);
        if cols < 6 + nm {
            return Err(PredictorError::UnexpectedOutput(detections.shape().to_vec()));
        }
        let nc = cols - 5 - nm;

        let (img_w, img_h) = image_size;
        let ratio_x = net_size.0 as f32 / img_w as f32;
        let ratio_y = net_size.1 as f32 / img_h as f32;
        let image_rect = BoundingBox::new(0, 0, img_w as i32, img_h as i32);

        let mut boxes = Vec::new();
        let mut scores = Vec::new();
        let mut classes = Vec::new();
        let mut coefficients = Vec::new();
        for row in detections.data().chunks_exact(cols).take(rows) {
            let box_score = row[4];
            if box_score < BOX_THRESHOLD {
                continue;
            }
            let (class_index, &class_score) = row[5..5 + nc]
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .unwrap_or((0, &0.0));
            if class_score < self.class_threshold {
                continue;
            }
            let (x, y) = (row[0] / ratio_x, row[1] / ratio_y);
            let (w, h) = (row[2] / ratio_x, row[3] / ratio_y);
            let left = (x - 0.5 * w).max(0.0) as i32;
            let top = (y - 0.5 * h).max(0.0) as i32;
            boxes.push(BoundingBox::new(left, top, w as i32, h as i32));
            scores.push(class_score * box_score);
            classes.push(class_index);
            coefficients.push(&row[5 + nc..]);
        }

        let kept = non_maximum_suppression(
            &boxes,
            &scores,
            BOX_THRESHOLD * self.class_threshold,
            NMS_THRESHOLD,
        );
        let mut result = Vec::with_capacity(kept.len());
        for idx in kept {
            let Some(bbox) = boxes[idx].intersection(&image_rect) else {
                continue;
            };
            let mask = match (protos, outputs.get(1)) {
                (Some((nm, mh, mw)), Some(proto)) => {
                    let coef = coefficients[idx];
                    let data = proto.data();
                    Buffer2::from_fn(bbox.width as usize, bbox.height as usize, |mx, my| {
                        let px = ((bbox.x as usize + mx) * mw / img_w).min(mw - 1);
                        let py = ((bbox.y as usize + my) * mh / img_h).min(mh - 1);
                        let logit: f32 =
                            (0..nm).map(|k| coef[k] * data[(k * mh + py) * mw + px]).sum();
                        sigmoid(logit) > self.mask_threshold
                    })
                }
                _ => Buffer2::new_filled(bbox.width as usize, bbox.height as usize, true),
            };
            let Some((bounding_box, mask)) = largest_component(bbox, &mask) else {
                continue;
            };
            result.push(Detection {
                bounding_box,
                mask,
                class_index: classes[idx],
                probability: scores[idx],
            });
        }
        Ok(result)
    }

    /// Decodes per-pixel class logits into one detection per connected foreground region.
    pub fn decode_segmentation(
        &self,
        output: &Tensor,
        image_size: (usize, usize),
    ) -> PredictorResult<Vec<Detection>> {
        let (channels, net_h, net_w) = planar_dims(output)?;
        let (img_w, img_h) = image_size;
        let data = output.data();
        let at = |c: usize, y: usize, x: usize| data[(c * net_h + y) * net_w + x];

        // Foreground channel, bilinear upsampled.
        let foreground = Buffer2::from_fn(img_w, img_h, |x, y| {
            let sx = ((x as f32 + 0.5) * net_w as f32 / img_w as f32 - 0.5)
                .clamp(0.0, (net_w - 1) as f32);
            let sy = ((y as f32 + 0.5) * net_h as f32 / img_h as f32 - 0.5)
                .clamp(0.0, (net_h - 1) as f32);
            let (x0, y0) = (sx.floor() as usize, sy.floor() as usize);
            let (x1, y1) = ((x0 + 1).min(net_w - 1), (y0 + 1).min(net_h - 1));
            let (fx, fy) = (sx - x0 as f32, sy - y0 as f32);
            let top = at(0, y0, x0) * (1.0 - fx) + at(0, y0, x1) * fx;
            let bottom = at(0, y1, x0) * (1.0 - fx) + at(0, y1, x1) * fx;
            top * (1.0 - fy) + bottom * fy
        });
        let binary = Image::from_vec(
            img_w,
            img_h,
            foreground.iter().map(|&p| (p > self.mask_threshold) as u16).collect(),
            PlaneId::default(),
        );

        // Softmax over channels, nearest upsampled.
        let class_at = |x: usize, y: usize| -> (usize, f32) {
            let nx = (x * net_w / img_w).min(net_w - 1);
            let ny = (y * net_h / img_h).min(net_h - 1);
            let max = (0..channels).map(|c| at(c, ny, nx)).fold(f32::MIN, f32::max);
            let sum: f32 = (0..channels).map(|c| (at(c, ny, nx) - max).exp()).sum();
            (0..channels)
                .map(|c| (c, (at(c, ny, nx) - max).exp() / sum))
                .fold((0, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best })
        };

        let map = label_components(&binary, 1);
        let detections = map
            .components()
            .into_iter()
            .map(|(bbox, mask)| {
                let mut best = (0, 0.0f32);
                for my in 0..mask.height() {
                    for mx in 0..mask.width() {
                        if !*mask.get(mx, my) {
                            continue;
                        }
                        let candidate = class_at(bbox.x as usize + mx, bbox.y as usize + my);
                        if candidate.1 > best.1 {
                            best = candidate;
                        }
                    }
                }
                Detection {
                    bounding_box: bbox,
                    mask,
                    class_index: best.0,
                    probability: best.1,
                }
            })
            .collect();
        Ok(detections)
    }

    fn model_class(&self, class_index: usize) -> Option<&AiModelClass> {
        self.model_classes.iter().find(|c| c.model_class_id == class_index)
    }
}

impl PipelineCommand for AiClassifier {
    fn execute(
        &self,
        ctx: &ProcessContext<'_>,
        image: &mut Image,
        objects: &mut PipelineObjects<'_>,
    ) -> CommandResult<()> {
        if self.model_path.as_os_str().is_empty() {
            return Ok(());
        }
        if self.model_format == ModelFormat::Tensorflow {
            return Err(CommandError::InvalidInput(
                "Tensorflow models are not supported".to_string(),
            ));
        }
        let predictor = ctx.predictor(&self.model_path)?;
        let (net_w, net_h, channels) = predictor.input_size();
        let input = Tensor::from_image(image, net_w, net_h, channels);
        let outputs = predictor.predict(&input)?;

        let image_size = (image.width(), image.height());
        let detections = match self.network_architecture {
            NetworkArchitecture::YoloV5 => self.decode_yolo(&outputs, image_size, (net_w, net_h))?,
            NetworkArchitecture::UNet | NetworkArchitecture::StarDist => {
                let output = outputs
                    .first()
                    .ok_or_else(|| PredictorError::UnexpectedOutput(Vec::new()))?;
                self.decode_segmentation(output, image_size)?
            }
        };
        debug!(
            tile = ctx.tile_id(),
            "{} detections from {}",
            detections.len(),
            self.model_path.display()
        );

        for detection in detections {
            let Some(model_class) = self.model_class(detection.class_index) else {
                continue;
            };
            let mut roi = Roi::new(
                ctx.default_class_id(),
                ctx.plane(),
                ctx.tile(),
                detection.probability,
                detection.bounding_box,
                detection.mask,
            );
            let class_id =
                route(ctx, &model_class.filters, model_class.output_class_no_match, &roi)?;
            if class_id == ClassId::NONE {
                continue;
            }
            roi.set_class_id(class_id);
            objects.push(roi);
        }
        Ok(())
    }

    fn output_classes(&self) -> Vec<ClassIdIn> {
        let mut classes: Vec<ClassIdIn> = self
            .model_classes
            .iter()
            .flat_map(|c| {
                std::iter::once(c.output_class_no_match)
                    .chain(c.filters.iter().map(|f| f.output_class))
            })
            .filter(|c| *c != ClassIdIn::Id(ClassId::NONE))
            .collect();
        classes.sort();
        classes.dedup();
        classes
    }

    fn check(&self, log: &mut SettingParserLog, pipeline: &str) {
        if self.model_path.as_os_str().is_empty() {
            log.warning(pipeline, "$aiClassify: no model selected, step is skipped");
        }
        if self.model_format == ModelFormat::Tensorflow {
            log.error(pipeline, "$aiClassify: Tensorflow models are not supported");
        }
        if !(0.0..=1.0).contains(&self.class_threshold)
            || !(0.0..=1.0).contains(&self.mask_threshold)
        {
            log.error(pipeline, "$aiClassify: thresholds must be within [0, 1]");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yolo_row(x: f32, y: f32, w: f32, h: f32, objectness: f32, scores: &[f32]) -> Vec<f32> {
        let mut row = vec![x, y, w, h, objectness];
        row.extend_from_slice(scores);
        row
    }

    #[test]
    fn yolo_boxes_are_scaled_and_suppressed() -> anyhow::Result<()> {
        let rows = [
            yolo_row(20.0, 20.0, 10.0, 10.0, 0.9, &[0.9, 0.1]),
            yolo_row(21.0, 20.0, 10.0, 10.0, 0.8, &[0.9, 0.1]),
            yolo_row(60.0, 60.0, 8.0, 8.0, 0.9, &[0.2, 0.8]),
            yolo_row(40.0, 40.0, 8.0, 8.0, 0.1, &[0.9, 0.1]),
        ];
        let data: Vec<f32> = rows.concat();
        let detections = Tensor::new(vec![1, 4, 7], data)?;

        let classifier = AiClassifier::default();
        // Network input is twice the image size.
        let found = classifier.decode_yolo(&[detections], (40, 40), (80, 80))?;
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].class_index, 0);
        assert_eq!(found[0].bounding_box, BoundingBox::new(7, 7, 5, 5));
        assert!((found[0].probability - 0.81).abs() < 1e-5);
        assert_eq!(found[1].class_index, 1);
        assert_eq!(found[1].bounding_box, BoundingBox::new(28, 28, 4, 4));
        Ok(())
    }

    #[test]
    fn yolo_masks_use_prototypes() -> anyhow::Result<()> {
        // One detection covering the whole 4x4 image, one prototype.
        let row = yolo_row(2.0, 2.0, 4.0, 4.0, 1.0, &[1.0, 1.0]);
        let detections = Tensor::new(vec![1, 1, 7], row)?;
        let mut proto = Tensor::zeros(vec![1, 1, 4, 4]);
        for y in 0..4 {
            for x in 0..2 {
                proto.set(&[0, 0, y, x], 5.0);
            }
            for x in 2..4 {
                proto.set(&[0, 0, y, x], -5.0);
            }
        }
        // Row is [x, y, w, h, obj, class0, coef0].
        let found = AiClassifier::default().decode_yolo(&[detections, proto], (4, 4), (4, 4))?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].bounding_box, BoundingBox::new(0, 0, 2, 4));
        assert!(found[0].mask.iter().all(|&v| v));
        Ok(())
    }

    #[test]
    fn segmentation_splits_regions() -> anyhow::Result<()> {
        let mut logits = Tensor::zeros(vec![1, 2, 4, 4]);
        for (x, y) in [(0, 0), (1, 0), (0, 1), (3, 3)] {
            logits.set(&[0, 0, y, x], 1.0);
        }
        logits.set(&[0, 1, 3, 3], 4.0);
        let found = AiClassifier::default().decode_segmentation(&logits, (4, 4))?;
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].bounding_box, BoundingBox::new(0, 0, 2, 2));
        assert_eq!(found[0].mask.iter().filter(|&&v| v).count(), 3);
        assert_eq!(found[0].class_index, 0);
        assert_eq!(found[1].class_index, 1);
        Ok(())
    }

    #[test]
    fn unexpected_shapes_are_rejected() {
        let flat = Tensor::zeros(vec![12]);
        assert!(AiClassifier::default().decode_yolo(&[flat.clone()], (4, 4), (4, 4)).is_err());
        assert!(AiClassifier::default().decode_segmentation(&flat, (4, 4)).is_err());
    }

    #[test]
    fn empty_planes_are_rejected() -> anyhow::Result<()> {
        let logits = Tensor::zeros(vec![1, 2, 0, 4]);
        assert!(matches!(
            AiClassifier::default().decode_segmentation(&logits, (4, 4)),
            Err(PredictorError::UnexpectedOutput(shape)) if shape == [1, 2, 0, 4]
        ));

        let row = yolo_row(2.0, 2.0, 4.0, 4.0, 1.0, &[1.0, 1.0]);
        let detections = Tensor::new(vec![1, 1, 7], row)?;
        let proto = Tensor::zeros(vec![1, 1, 4, 0]);
        assert!(matches!(
            AiClassifier::default().decode_yolo(&[detections, proto], (4, 4), (4, 4)),
            Err(PredictorError::UnexpectedOutput(_))
        ));
        Ok(())
    }
}
