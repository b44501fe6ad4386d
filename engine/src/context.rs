//! Scoped state handed to every pipeline step.
//!
//! A [`ProcessContext`] borrows four scopes with decreasing lifetime: the job,
//! the image being processed, the `(tile, t, z)` iteration and the running
//! pipeline. Steps never own state beyond a single `execute` call; whatever
//! must outlive a step goes through the caches or the object list.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::cache::{CacheSource, ImageCacheKey, MemoryCache};
use crate::commands::{CommandError, CommandResult};
use crate::database::JobId;
use crate::enums::{CacheSlot, ClassId, ClassIdIn, ImageValidity, ZProjection};
use crate::image::{Image, PlaneId, PlaneRef};
use crate::initializer::{self, ImagePlan};
use crate::ome::{OmeInfo, TileToLoad};
use crate::predictor::{Predictor, PredictorRegistry};
use crate::processor::JobProgress;
use crate::reader::ImageReader;
use crate::roi::Roi;
use crate::settings::{AnalyzeSettings, Classification, ObjectFilter, Pipeline};

/// Job wide collaborators, shared by every worker.
pub struct JobContext {
    pub job_id: JobId,
    pub job_name: String,
    pub settings: AnalyzeSettings,
    pub reader: Arc<dyn ImageReader>,
    pub predictors: Arc<PredictorRegistry>,
    /// Destination of control images. `None` disables image output.
    pub output_folder: Option<PathBuf>,
    pub progress: Arc<JobProgress>,
}

impl JobContext {
    pub fn is_stopping(&self) -> bool {
        self.progress.is_stopping()
    }

    pub fn classification(&self) -> &Classification {
        self.settings.classification()
    }
}

/// One input image of a plate.
#[derive(Debug)]
pub struct ImageContext {
    pub plate_id: u8,
    pub group_id: u16,
    pub image_id: u64,
    pub path: PathBuf,
    pub series: u16,
    pub ome: OmeInfo,
    pub plan: ImagePlan,
    /// Entries live until the image is finished.
    pub cache: MemoryCache,
    validity: AtomicU32,
}

impl ImageContext {
    pub fn new(
        plate_id: u8,
        group_id: u16,
        image_id: u64,
        path: PathBuf,
        series: u16,
        ome: OmeInfo,
        plan: ImagePlan,
    ) -> Self {
        Self {
            plate_id,
            group_id,
            image_id,
            path,
            series,
            ome,
            plan,
            cache: MemoryCache::new(),
            validity: AtomicU32::new(0),
        }
    }

    pub fn set_validity(&self, validity: ImageValidity) {
        self.validity.fetch_or(validity.bit(), Ordering::AcqRel);
    }

    /// Bit set of [`ImageValidity::bit`] flags.
    pub fn validity(&self) -> u32 {
        self.validity.load(Ordering::Acquire)
    }
}

/// One `(tile, t, z)` iteration of an image.
#[derive(Debug)]
pub struct IterationContext {
    pub tile: TileToLoad,
    pub tile_id: u32,
    /// `t` and `z` of the iteration; `c` is always 0.
    pub plane: PlaneId,
    /// Entries live until the iteration is finished.
    pub cache: MemoryCache,
    validity: AtomicU32,
}

impl IterationContext {
    pub fn new(tile: TileToLoad, tile_id: u32, plane: PlaneId) -> Self {
        Self {
            tile,
            tile_id,
            plane,
            cache: MemoryCache::new(),
            validity: AtomicU32::new(0),
        }
    }

    pub fn set_validity(&self, validity: ImageValidity) {
        self.validity.fetch_or(validity.bit(), Ordering::AcqRel);
    }

    pub fn validity(&self) -> u32 {
        self.validity.load(Ordering::Acquire)
    }
}

/// Running pipeline and the plane its iteration-initial image was taken from.
#[derive(Clone, Copy, Debug)]
pub struct PipelineContext<'a> {
    pub index: usize,
    pub pipeline: &'a Pipeline,
    pub plane: PlaneId,
}

pub struct ProcessContext<'a> {
    pub job: &'a JobContext,
    pub image: &'a ImageContext,
    pub iteration: &'a IterationContext,
    pub pipeline: PipelineContext<'a>,
}

impl<'a> ProcessContext<'a> {
    pub fn new(
        job: &'a JobContext,
        image: &'a ImageContext,
        iteration: &'a IterationContext,
        index: usize,
        pipeline: &'a Pipeline,
    ) -> Self {
        let plane = image.plan.pipeline_plane(&pipeline.pipeline_setup, iteration.plane);
        Self {
            job,
            image,
            iteration,
            pipeline: PipelineContext {
                index,
                pipeline,
                plane,
            },
        }
    }

    pub fn default_class_id(&self) -> ClassId {
        self.pipeline.pipeline.default_class_id()
    }

    /// Resolves `$` to the pipeline's default class.
    pub fn class_id(&self, class_id: ClassIdIn) -> ClassId {
        class_id.resolve(self.default_class_id())
    }

    pub fn plane(&self) -> PlaneId {
        self.pipeline.plane
    }

    pub fn tile(&self) -> TileToLoad {
        self.iteration.tile
    }

    pub fn tile_id(&self) -> u32 {
        self.iteration.tile_id
    }

    pub fn is_stopping(&self) -> bool {
        self.job.is_stopping()
    }

    pub fn classification(&self) -> &Classification {
        self.job.classification()
    }

    // === Images ===

    /// Loads a plane of the current iteration.
    ///
    /// A plane reference that does not fix `z` inherits the pipeline's Z projection.
    pub fn load_plane(&self, plane_ref: &PlaneRef) -> CommandResult<Image> {
        let plane = plane_ref.resolve(self.plane());
        let projection = if plane_ref.z_stack < 0 {
            self.pipeline.pipeline.pipeline_setup.z_projection
        } else {
            ZProjection::None
        };
        initializer::load_tile(self.job, self.image, self.iteration, plane, projection)
    }

    fn slot_key(&self, slot: CacheSlot) -> ImageCacheKey {
        ImageCacheKey::new(CacheSource::Slot(slot), self.iteration.plane)
    }

    pub fn load_slot(&self, slot: CacheSlot) -> CommandResult<Image> {
        let key = self.slot_key(slot);
        self.iteration
            .cache
            .load(&key)
            .ok_or_else(|| CommandError::CacheMiss(key.to_string()))
    }

    pub fn store_slot(&self, slot: CacheSlot, image: Image) {
        let key = self.slot_key(slot);
        debug!(pipeline = self.pipeline.index, "Caching image as {key}");
        self.iteration.cache.store(key, image);
    }

    // === Objects ===

    /// Evaluates shape and intensity rules of `filter` on `roi`.
    pub fn matches_filter(&self, filter: &ObjectFilter, roi: &Roi) -> CommandResult<bool> {
        if filter.metrics.is_active() && !filter.metrics.matches(roi) {
            return Ok(false);
        }
        match &filter.intensity {
            Some(intensity) if intensity.is_active() => {
                let image = self.load_plane(&intensity.image_in)?;
                Ok(intensity.matches(&roi.intensity(&image)))
            }
            _ => Ok(true),
        }
    }

    /// Flags the image and the current plane.
    pub fn set_validity(&self, validity: ImageValidity) {
        self.image.set_validity(validity);
        self.iteration.set_validity(validity);
    }

    pub fn predictor(&self, model_path: &std::path::Path) -> CommandResult<Arc<dyn Predictor>> {
        Ok(self.job.predictors.get(model_path)?)
    }

    /// Folder for control images of this image and plane, created on demand.
    pub fn control_image_folder(&self) -> Option<PathBuf> {
        let base = self.job.output_folder.as_ref()?;
        let stem = self
            .image
            .path
            .file_stem()
            .map_or_else(|| self.image.image_id.to_string(), |s| s.to_string_lossy().into_owned());
        let plane = self.iteration.plane;
        Some(
            base.join("images")
                .join(stem)
                .join(format!("t{}_z{}", plane.t, plane.z)),
        )
    }
}
