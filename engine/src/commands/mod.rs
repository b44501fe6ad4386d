//! Pipeline steps.
//!
//! Every step is a variant of [`Command`], stored in JSON under its `$name`
//! key. The variants implement [`PipelineCommand`]; [`Command`] only
//! dispatches.

mod ai_classifier;
mod blur;
mod classifier;
mod filter;
mod image_cache;
mod image_math;
mod image_saver;
mod measure_intensity;
mod morphology;
mod objects_to_image;
mod reclassify;
mod rolling_ball;
mod threshold;


use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ProcessContext;
use crate::enums::{CacheSlot, ClassIdIn};
use crate::image::{Image, ImageError, PlaneRef};
use crate::object_list::PipelineObjects;
use crate::predictor::PredictorError;
use crate::reader::ReaderError;
use crate::settings::SettingParserLog;

pub use ai_classifier::{AiClassifier, AiModelClass, ModelFormat, NetworkArchitecture};
pub use blur::{Blur, BlurMode};
pub use classifier::{
    label_components, Classifier, ClassifierClass, LabelMap, MAX_OBJECTS_PER_CLASS,
};
pub use filter::{Filter, FilterClass};
pub use image_cache::{ImageFromCache, ImageIn, ImageToCache};
pub use image_math::{ImageMath, MathFunction};
pub use image_saver::{Canvas, ImageSaver, SaverClass, SaverStyle};
pub use measure_intensity::MeasureIntensity;
pub use morphology::{KernelShape, MorphologicalTransform, MorphologyFunction};
pub use objects_to_image::ObjectsToImage;
pub use reclassify::Reclassify;
pub use rolling_ball::{BallType, RollingBall};
pub use threshold::{Threshold, ThresholdClass, ThresholdMethod};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Predictor(#[from] PredictorError),
    #[error("No cached image for {0}")]
    CacheMiss(String),
    #[error("{0}")]
    InvalidInput(String),
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Behaviour shared by all step kinds.
///
/// Introspection methods return the unresolved class references; `$` is
/// resolved against the pipeline's default class by the caller.
pub trait PipelineCommand {
    fn execute(
        &self,
        ctx: &ProcessContext<'_>,
        image: &mut Image,
        objects: &mut PipelineObjects<'_>,
    ) -> CommandResult<()>;

    fn input_classes(&self) -> Vec<ClassIdIn> {
        Vec::new()
    }

    fn output_classes(&self) -> Vec<ClassIdIn> {
        Vec::new()
    }

    fn input_image_cache(&self) -> Vec<CacheSlot> {
        Vec::new()
    }

    fn output_image_cache(&self) -> Vec<CacheSlot> {
        Vec::new()
    }

    /// Planes besides the current image the step reads.
    fn referenced_planes(&self) -> Vec<PlaneRef> {
        Vec::new()
    }

    /// Static settings validation.
    fn check(&self, _log: &mut SettingParserLog, _pipeline: &str) {}
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum Command {
    #[serde(rename = "$blur")]
    Blur(Blur),
    #[serde(rename = "$rollingBall")]
    RollingBall(RollingBall),
    #[serde(rename = "$morphologicalTransform")]
    MorphologicalTransform(MorphologicalTransform),
    #[serde(rename = "$imageMath")]
    ImageMath(ImageMath),
    #[serde(rename = "$threshold")]
    Threshold(Threshold),
    #[serde(rename = "$classify")]
    Classify(Classifier),
    #[serde(rename = "$aiClassify")]
    AiClassify(AiClassifier),
    #[serde(rename = "$reclassify")]
    Reclassify(Reclassify),
    #[serde(rename = "$filter")]
    Filter(Filter),
    #[serde(rename = "$measureIntensity")]
    MeasureIntensity(MeasureIntensity),
    #[serde(rename = "$imageToCache")]
    ImageToCache(ImageToCache),
    #[serde(rename = "$imageFromCache")]
    ImageFromCache(ImageFromCache),
    #[serde(rename = "$objectsToImage")]
    ObjectsToImage(ObjectsToImage),
    #[serde(rename = "$saveImage")]
    SaveImage(ImageSaver),
}

impl Command {
    /// JSON key of the step.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Blur(_) => "$blur",
            Command::RollingBall(_) => "$rollingBall",
            Command::MorphologicalTransform(_) => "$morphologicalTransform",
            Command::ImageMath(_) => "$imageMath",
            Command::Threshold(_) => "$threshold",
            Command::Classify(_) => "$classify",
            Command::AiClassify(_) => "$aiClassify",
            Command::Reclassify(_) => "$reclassify",
            Command::Filter(_) => "$filter",
            Command::MeasureIntensity(_) => "$measureIntensity",
            Command::ImageToCache(_) => "$imageToCache",
            Command::ImageFromCache(_) => "$imageFromCache",
            Command::ObjectsToImage(_) => "$objectsToImage",
            Command::SaveImage(_) => "$saveImage",
        }
    }

    fn inner(&self) -> &dyn PipelineCommand {
        match self {
            Command::Blur(c) => c,
            Command::RollingBall(c) => c,
            Command::MorphologicalTransform(c) => c,
            Command::ImageMath(c) => c,
            Command::Threshold(c) => c,
            Command::Classify(c) => c,
            Command::AiClassify(c) => c,
            Command::Reclassify(c) => c,
            Command::Filter(c) => c,
            Command::MeasureIntensity(c) => c,
            Command::ImageToCache(c) => c,
            Command::ImageFromCache(c) => c,
            Command::ObjectsToImage(c) => c,
            Command::SaveImage(c) => c,
        }
    }

    pub fn execute(
        &self,
        ctx: &ProcessContext<'_>,
        image: &mut Image,
        objects: &mut PipelineObjects<'_>,
    ) -> CommandResult<()> {
        self.inner().execute(ctx, image, objects)
    }

    pub fn input_classes(&self) -> Vec<ClassIdIn> {
        self.inner().input_classes()
    }

    pub fn output_classes(&self) -> Vec<ClassIdIn> {
        self.inner().output_classes()
    }

    pub fn input_image_cache(&self) -> Vec<CacheSlot> {
        self.inner().input_image_cache()
    }

    pub fn output_image_cache(&self) -> Vec<CacheSlot> {
        self.inner().output_image_cache()
    }

    pub fn referenced_planes(&self) -> Vec<PlaneRef> {
        self.inner().referenced_planes()
    }

    pub fn check(&self, log: &mut SettingParserLog, pipeline: &str) {
        self.inner().check(log, pipeline)
    }
}

macro_rules! impl_from_command {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Command {
                fn from(value: $ty) -> Self {
                    Command::$variant(value)
                }
            }
        )*
    };
}

impl_from_command!(
    Blur(Blur),
    RollingBall(RollingBall),
    MorphologicalTransform(MorphologicalTransform),
    ImageMath(ImageMath),
    Threshold(Threshold),
    Classify(Classifier),
    AiClassify(AiClassifier),
    Reclassify(Reclassify),
    Filter(Filter),
    MeasureIntensity(MeasureIntensity),
    ImageToCache(ImageToCache),
    ImageFromCache(ImageFromCache),
    ObjectsToImage(ObjectsToImage),
    SaveImage(ImageSaver),
);
