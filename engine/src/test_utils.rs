//! In-memory job, image and iteration for unit tests.

use std::path::PathBuf;
use std::sync::Arc;

use crate::commands::{Classifier, Command, Threshold, ThresholdClass, ThresholdMethod};
use crate::context::{ImageContext, IterationContext, JobContext, ProcessContext};
use crate::database::{JobId, PreviewDatabase};
use crate::dependency_graph::DependencyGraph;
use crate::enums::ClassId;
use crate::image::{Image, PlaneId};
use crate::initializer::ImagePlan;
use crate::object_list::ObjectList;
use crate::predictor::PredictorRegistry;
use crate::processor::{run_iteration, EngineResult, JobProgress, Unobserved};
use crate::reader::{ImageReader, MemoryImageReader, MemoryStack};
use crate::settings::{AnalyzeSettings, Pipeline, PipelineSetup, PipelineStep, ProjectImageSetup};

pub(crate) const RIG_IMAGE: &str = "/rig/image.tif";

/// Image of `width x height` with `value` inside the inclusive rectangle.
pub(crate) fn block_image(
    width: usize,
    height: usize,
    block: (usize, usize, usize, usize),
    value: u16,
    plane: PlaneId,
) -> Image {
    let (x0, y0, x1, y1) = block;
    let mut image = Image::new_blank(width, height, plane);
    for y in y0..=y1 {
        for x in x0..=x1 {
            image.set(x, y, value);
        }
    }
    image
}

/// Manual threshold above `min`, then connected components into the default class.
pub(crate) fn detect_steps(min: u16) -> Vec<PipelineStep> {
    let threshold: Command = Threshold {
        model_classes: vec![ThresholdClass {
            method: ThresholdMethod::Manual,
            threshold_min: min,
            ..Default::default()
        }],
    }
    .into();
    vec![PipelineStep::new(threshold), PipelineStep::new(Classifier::default().into())]
}

pub(crate) fn detect_pipeline(name: &str, channel: u32, class_id: ClassId) -> Pipeline {
    Pipeline::new(
        name,
        PipelineSetup {
            c_stack_index: channel,
            default_class_id: class_id,
            ..Default::default()
        },
    )
    .with_steps(detect_steps(20000))
}

pub(crate) struct Rig {
    pub reader: Arc<MemoryImageReader>,
    pub job: JobContext,
    pub image: ImageContext,
}

impl Rig {
    pub fn new(planes: Vec<Image>, pipelines: Vec<Pipeline>) -> Self {
        Self::with_setup(planes, pipelines, ProjectImageSetup::default())
    }

    pub fn with_setup(
        planes: Vec<Image>,
        pipelines: Vec<Pipeline>,
        image_setup: ProjectImageSetup,
    ) -> Self {
        let reader = Arc::new(MemoryImageReader::new(0));
        let stack = MemoryStack::new(planes);
        let ome = stack.ome.clone();
        reader.insert(RIG_IMAGE, stack);

        let settings = AnalyzeSettings {
            image_setup,
            pipelines,
            ..Default::default()
        };
        let plan = ImagePlan::new(&settings.image_setup, &ome, &settings.pipelines);
        let image = ImageContext::new(
            1,
            0,
            1,
            PathBuf::from(RIG_IMAGE),
            image_setup.series,
            ome,
            plan,
        );
        let job = JobContext {
            job_id: JobId::unique(),
            job_name: "rig".to_string(),
            settings,
            reader: Arc::clone(&reader) as Arc<dyn ImageReader>,
            predictors: Arc::new(PredictorRegistry::new()),
            output_folder: None,
            progress: Arc::new(JobProgress::new()),
        };
        Self { reader, job, image }
    }

    /// First tile at `t = 0`, `z = 0`.
    pub fn iteration(&self) -> IterationContext {
        let tile = self.image.plan.tiles()[0];
        IterationContext::new(tile, 0, PlaneId::new(0, 0, 0))
    }

    pub fn ctx<'a>(&'a self, iteration: &'a IterationContext, index: usize) -> ProcessContext<'a> {
        ProcessContext::new(
            &self.job,
            &self.image,
            iteration,
            index,
            &self.job.settings.pipelines[index],
        )
    }

    /// Runs all pipelines for `iteration`, objects are discarded by the store.
    pub fn run(&self, iteration: &IterationContext) -> EngineResult<ObjectList> {
        let graph = DependencyGraph::build(&self.job.settings.pipelines)?;
        run_iteration(
            &self.job,
            &self.image,
            iteration,
            &graph,
            &PreviewDatabase::new(),
            2,
            &Unobserved,
        )
    }
}
