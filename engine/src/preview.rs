//! Single-iteration preview of one pipeline.
//!
//! Runs the previewed pipeline plus everything it depends on for one tile
//! and plane of one image. Objects go to a [`PreviewDatabase`] and are never
//! persisted. A step flagged as breakpoint snapshots the image after it ran;
//! execution continues so the overlay reflects every step.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::commands::{Canvas, Command, ImageSaver, SaverClass};
use crate::context::{ImageContext, IterationContext, JobContext, ProcessContext};
use crate::database::{self, JobId, PreviewDatabase};
use crate::dependency_graph::{DependencyGraph, GraphError};
use crate::enums::{ClassId, ClassIdIn};
use crate::image::{Image, PlaneId, RgbImage};
use crate::initializer::ImagePlan;
use crate::object_list::{ObjectList, PipelineObjects};
use crate::predictor::PredictorRegistry;
use crate::processor::{run_iteration, EngineError, JobProgress, PipelineObserver};
use crate::reader::{ImageReader, ReaderError};
use crate::settings::AnalyzeSettings;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Tile {tile_id} out of range ({count} tiles)")]
    TileOutOfRange { tile_id: u32, count: u32 },
    #[error("Pipeline {0} produced no image")]
    NoResult(usize),
}

pub type PreviewResult<T> = Result<T, PreviewError>;

/// What to preview.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PreviewRequest {
    pub pipeline: usize,
    pub image_path: PathBuf,
    pub series: u16,
    pub tile_id: u32,
    /// `t` and `z` of the iteration.
    pub plane: PlaneId,
}

impl PreviewRequest {
    pub fn new(pipeline: usize, image_path: impl Into<PathBuf>) -> Self {
        Self {
            pipeline,
            image_path: image_path.into(),
            series: 0,
            tile_id: 0,
            plane: PlaneId::default(),
        }
    }
}

#[derive(Debug)]
pub struct Preview {
    /// Image after the first breakpoint step, with its step index.
    pub breakpoint: Option<(usize, Image)>,
    /// Image after the last step.
    pub image: Image,
    pub overlay: RgbImage,
    pub thumbnail: Image,
    pub class_counts: BTreeMap<ClassId, usize>,
    pub objects: ObjectList,
    /// [`crate::enums::ImageValidity::bit`] flags of the previewed plane.
    pub validity: u32,
    /// Pipelines that ran, in execution order.
    pub executed: Vec<usize>,
}

#[derive(Default)]
struct Captured {
    breakpoint: Option<(usize, Image)>,
    result: Option<(Image, RgbImage)>,
}

struct PreviewObserver {
    target: usize,
    captured: Mutex<Captured>,
}

impl PreviewObserver {
    /// `$saveImage` settings of the pipeline, else every class it holds.
    fn overlay(ctx: &ProcessContext<'_>, image: &Image, objects: &PipelineObjects<'_>) -> RgbImage {
        let saver = ctx
            .pipeline
            .pipeline
            .pipeline_steps
            .iter()
            .filter(|s| !s.disabled)
            .find_map(|s| match &s.command {
                Command::SaveImage(saver) => Some(saver.clone()),
                _ => None,
            })
            .unwrap_or_else(|| ImageSaver {
                canvas: Canvas::ImageDollar,
                classes_in: objects
                    .class_ids()
                    .into_iter()
                    .map(|class_id| SaverClass {
                        class_id: ClassIdIn::Id(class_id),
                        ..Default::default()
                    })
                    .collect(),
            });
        saver.render(ctx, image, objects)
    }
}

impl PipelineObserver for PreviewObserver {
    fn step_finished(
        &self,
        ctx: &ProcessContext<'_>,
        step: usize,
        image: &Image,
        _objects: &PipelineObjects<'_>,
    ) {
        let steps = &ctx.pipeline.pipeline.pipeline_steps;
        if ctx.pipeline.index != self.target || !steps[step].breakpoint {
            return;
        }
        let mut captured = self.captured.lock();
        if captured.breakpoint.is_none() {
            debug!(step, "Breakpoint reached");
            captured.breakpoint = Some((step, image.deep_clone()));
        }
    }

    fn pipeline_finished(
        &self,
        ctx: &ProcessContext<'_>,
        image: &Image,
        objects: &PipelineObjects<'_>,
    ) {
        if ctx.pipeline.index != self.target {
            return;
        }
        let overlay = Self::overlay(ctx, image, objects);
        self.captured.lock().result = Some((image.deep_clone(), overlay));
    }
}

pub struct Previewer {
    reader: Arc<dyn ImageReader>,
    predictors: Arc<PredictorRegistry>,
    progress: Arc<JobProgress>,
}

impl Previewer {
    pub fn new(reader: Arc<dyn ImageReader>) -> Self {
        Self {
            reader,
            predictors: Arc::new(PredictorRegistry::new()),
            progress: Arc::new(JobProgress::new()),
        }
    }

    pub fn with_predictors(mut self, predictors: Arc<PredictorRegistry>) -> Self {
        self.predictors = predictors;
        self
    }

    pub fn stop(&self) {
        self.progress.stop();
    }

    pub fn preview(
        &self,
        settings: &AnalyzeSettings,
        request: &PreviewRequest,
    ) -> PreviewResult<Preview> {
        self.progress.reset();
        let graph = DependencyGraph::build_for(&settings.pipelines, request.pipeline)?;
        let executed: Vec<usize> = graph.order().collect();

        let ome = self.reader.ome_information(&request.image_path, request.series)?;
        let mut image_setup = settings.image_setup;
        image_setup.series = request.series;
        let plan = ImagePlan::new(&image_setup, &ome, &settings.pipelines);
        let tile = plan
            .tiles()
            .get(request.tile_id as usize)
            .copied()
            .ok_or(PreviewError::TileOutOfRange {
                tile_id: request.tile_id,
                count: plan.tile_count(),
            })?;

        let job = JobContext {
            job_id: JobId::nil(),
            job_name: "preview".to_string(),
            settings: AnalyzeSettings {
                image_setup,
                ..settings.clone()
            },
            reader: Arc::clone(&self.reader),
            predictors: Arc::clone(&self.predictors),
            output_folder: None,
            progress: Arc::clone(&self.progress),
        };
        let image = ImageContext::new(
            0,
            0,
            database::image_id(0, &request.image_path),
            request.image_path.clone(),
            request.series,
            ome,
            plan,
        );
        let iteration_plane = PlaneId::new(request.plane.t, request.plane.z, 0);
        let iteration = IterationContext::new(tile, request.tile_id, iteration_plane);

        let observer = PreviewObserver {
            target: request.pipeline,
            captured: Mutex::new(Captured::default()),
        };
        let store = PreviewDatabase::new();
        let objects = run_iteration(
            &job,
            &image,
            &iteration,
            &graph,
            &store,
            rayon::current_num_threads(),
            &observer,
        )?;

        let captured = observer.captured.into_inner();
        let (final_image, overlay) = captured
            .result
            .ok_or(PreviewError::NoResult(request.pipeline))?;
        let pipeline_plane = image
            .plan
            .pipeline_plane(&settings.pipelines[request.pipeline].pipeline_setup, iteration_plane);
        let thumbnail = self
            .reader
            .load_thumbnail(&request.image_path, request.series, pipeline_plane)?;

        let class_counts = objects.class_counts();
        info!(pipeline = request.pipeline, ?class_counts, "Preview finished");
        Ok(Preview {
            breakpoint: captured.breakpoint,
            image: final_image,
            overlay,
            thumbnail,
            class_counts,
            validity: store.plane_validity(image.image_id, iteration_plane),
            objects,
            executed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{ImageMath, Reclassify};
    use crate::object_list::ReclassifyMode;
    use crate::reader::{MemoryImageReader, MemoryStack};
    use crate::settings::{Pipeline, PipelineStep};
    use crate::test_utils::{block_image, detect_pipeline, detect_steps};

    const PATH: &str = "/preview/img.tif";

    fn reader(planes: Vec<Image>) -> Arc<MemoryImageReader> {
        let reader = Arc::new(MemoryImageReader::new(0));
        reader.insert(PATH, MemoryStack::new(planes));
        reader
    }

    fn settings(pipelines: Vec<Pipeline>) -> AnalyzeSettings {
        AnalyzeSettings {
            pipelines,
            ..Default::default()
        }
    }

    /// Threshold, classify (breakpoint), invert.
    fn three_step_pipeline() -> Pipeline {
        let mut pipeline = Pipeline::new("p", Default::default()).with_steps(detect_steps(20000));
        pipeline.add_step(PipelineStep::new(ImageMath::default().into()));
        pipeline.pipeline_steps[1].breakpoint = true;
        pipeline
    }

    #[test]
    fn breakpoint_snapshot_is_taken_before_later_steps() -> anyhow::Result<()> {
        let plane = block_image(16, 16, (4, 4, 9, 9), 40000, PlaneId::new(0, 0, 0));
        let previewer = Previewer::new(reader(vec![plane]));
        let settings = settings(vec![three_step_pipeline()]);
        let preview = previewer.preview(&settings, &PreviewRequest::new(0, PATH))?;

        let (step, snapshot) = preview.breakpoint.expect("breakpoint snapshot");
        assert_eq!(step, 1);
        assert!(snapshot.pixels().iter().all(|&v| v == 0 || v == 1));
        assert_eq!(snapshot.pixels().iter().filter(|&&v| v == 1).count(), 36);
        assert_ne!(snapshot.pixels(), preview.image.pixels());

        assert_eq!(preview.objects.count(ClassId::C0), 1);
        assert_eq!(preview.class_counts.get(&ClassId::C0), Some(&1));
        assert_eq!((preview.overlay.width(), preview.overlay.height()), (16, 16));
        assert_eq!(preview.validity, 0);
        assert_eq!(preview.executed, vec![0]);
        Ok(())
    }

    #[test]
    fn disabled_breakpoint_step_takes_no_snapshot() -> anyhow::Result<()> {
        let plane = block_image(16, 16, (4, 4, 9, 9), 40000, PlaneId::new(0, 0, 0));
        let mut pipeline = three_step_pipeline();
        pipeline.pipeline_steps[1].disabled = true;
        let previewer = Previewer::new(reader(vec![plane]));
        let preview = previewer.preview(&settings(vec![pipeline]), &PreviewRequest::new(0, PATH))?;
        assert!(preview.breakpoint.is_none());
        assert_eq!(preview.objects.count(ClassId::C0), 0);
        Ok(())
    }

    #[test]
    fn only_dependencies_of_target_run() -> anyhow::Result<()> {
        let planes = vec![
            block_image(16, 16, (0, 0, 9, 9), 40000, PlaneId::new(0, 0, 0)),
            block_image(16, 16, (2, 2, 3, 3), 40000, PlaneId::new(0, 0, 1)),
        ];
        let count: crate::commands::Command = Reclassify {
            mode: ReclassifyMode::Count,
            intersecting_class: ClassIdIn::Id(ClassId::C0),
            ..Default::default()
        }
        .into();
        let pipelines = vec![
            detect_pipeline("unrelated", 1, ClassId::C3),
            detect_pipeline("nuclei", 0, ClassId::C0),
            detect_pipeline("spots", 1, ClassId::C1).with_steps([PipelineStep::new(count)]),
        ];
        let previewer = Previewer::new(reader(planes));
        let preview = previewer.preview(&settings(pipelines), &PreviewRequest::new(2, PATH))?;
        assert_eq!(preview.executed, vec![1, 2]);
        assert!(preview.breakpoint.is_none());
        assert_eq!(preview.class_counts.get(&ClassId::C3), None);
        assert_eq!(preview.class_counts.get(&ClassId::C0), Some(&1));
        assert_eq!(preview.class_counts.get(&ClassId::C1), Some(&1));
        Ok(())
    }

    #[test]
    fn stopped_previewer_can_preview_again() -> anyhow::Result<()> {
        let plane = block_image(16, 16, (4, 4, 9, 9), 40000, PlaneId::new(0, 0, 0));
        let previewer = Previewer::new(reader(vec![plane]));
        let settings = settings(vec![detect_pipeline("p", 0, ClassId::C0)]);

        previewer.stop();
        let preview = previewer.preview(&settings, &PreviewRequest::new(0, PATH))?;
        assert_eq!(preview.objects.count(ClassId::C0), 1);
        Ok(())
    }

    #[test]
    fn bad_requests_are_rejected() {
        let previewer = Previewer::new(reader(vec![Image::new_blank(8, 8, PlaneId::default())]));
        let settings = settings(vec![detect_pipeline("p", 0, ClassId::C0)]);

        let mut request = PreviewRequest::new(0, PATH);
        request.tile_id = 5;
        assert!(matches!(
            previewer.preview(&settings, &request),
            Err(PreviewError::TileOutOfRange { tile_id: 5, count: 1 })
        ));
        assert!(matches!(
            previewer.preview(&settings, &PreviewRequest::new(3, PATH)),
            Err(PreviewError::Graph(GraphError::UnknownPipeline { index: 3, count: 1 }))
        ));
        assert!(matches!(
            previewer.preview(&settings, &PreviewRequest::new(0, "/missing.tif")),
            Err(PreviewError::Reader(ReaderError::NotFound(_)))
        ));
    }
}
