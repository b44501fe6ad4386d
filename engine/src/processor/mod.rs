//! Job driver.
//!
//! [`Processor::execute`] validates the settings, orders the pipelines, opens
//! the job's result store and walks plates, images, tiles and `(t, z)`
//! iterations. Parallelism is bounded per axis by [`ThreadingSettings`] and
//! runs on a dedicated rayon pool.

mod progress;
mod runner;
mod threading;

#[cfg(test)]
mod tests;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::parallel::try_par_for_each_limited;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::commands::CommandError;
use crate::context::{ImageContext, JobContext};
use crate::database::{Database, DatabaseError, JobId, DATABASE_FILE_NAME};
use crate::dependency_graph::{DependencyGraph, GraphError};
use crate::initializer::ImagePlan;
use crate::predictor::PredictorRegistry;
use crate::reader::{ImageReader, ReaderError};
use crate::settings::{AnalyzeSettings, Plate, SettingsError};

pub use progress::{JobProgress, JobState, ProgressSnapshot};
pub use runner::{run_image, run_iteration, run_pipeline, PipelineObserver, Unobserved};
pub use threading::{
    calc_optimal_threading, ram_per_worker, SystemResources, ThreadingSettings, WorkShape,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("Pipeline '{pipeline}' could not load its image: {source}")]
    Init {
        pipeline: String,
        #[source]
        source: CommandError,
    },
    #[error("Pipeline '{pipeline}' step {step} ({command}) failed: {source}")]
    Step {
        pipeline: String,
        step: usize,
        command: &'static str,
        #[source]
        source: CommandError,
    },
    #[error(transparent)]
    Database(#[from] DatabaseError),
    #[error(transparent)]
    Reader(#[from] ReaderError),
    #[error("Worker pool could not be created: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Job was cancelled")]
    Cancelled,
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Outcome of a job that got as far as opening its result store.
#[derive(Clone, Debug)]
pub struct JobSummary {
    pub job_id: JobId,
    pub job_folder: PathBuf,
    pub database_path: PathBuf,
    pub state: JobState,
    pub processed_images: usize,
    pub error: Option<String>,
}

/// Runs analysis jobs with a shared reader and model registry.
pub struct Processor {
    reader: Arc<dyn ImageReader>,
    predictors: Arc<PredictorRegistry>,
    progress: Arc<JobProgress>,
    threading: Option<ThreadingSettings>,
}

impl Processor {
    pub fn new(reader: Arc<dyn ImageReader>) -> Self {
        Self {
            reader,
            predictors: Arc::new(PredictorRegistry::new()),
            progress: Arc::new(JobProgress::new()),
            threading: None,
        }
    }

    pub fn with_predictors(mut self, predictors: Arc<PredictorRegistry>) -> Self {
        self.predictors = predictors;
        self
    }

    /// Fixed fan-out instead of the resource heuristic.
    pub fn with_threading(mut self, threading: ThreadingSettings) -> Self {
        self.threading = Some(threading.normalized());
        self
    }

    pub fn progress(&self) -> Arc<JobProgress> {
        Arc::clone(&self.progress)
    }

    pub fn stop(&self) {
        self.progress.stop();
    }

    /// Runs every pipeline on every image of every plate.
    ///
    /// Invalid settings and failures to create the job folder are returned as
    /// errors before any image is touched. Anything later ends up in the
    /// returned summary: the job is sealed only when it finished cleanly.
    pub fn execute(&self, settings: &AnalyzeSettings, job_name: &str) -> EngineResult<JobSummary> {
        let progress = &self.progress;
        progress.reset();

        let graph = match prepare(settings) {
            Ok(graph) => graph,
            Err(err) => {
                error!("Job '{job_name}' rejected: {err}");
                progress.fail(err.to_string());
                return Err(err);
            }
        };

        let job_folder = job_folder(
            Path::new(&settings.project_settings.working_directory),
            job_name,
        );
        fs::create_dir_all(&job_folder).map_err(|source| EngineError::Io {
            path: job_folder.clone(),
            source,
        })?;
        let database_path = job_folder.join(DATABASE_FILE_NAME);
        let db = Database::create(&database_path)?;
        let job_id = db.start_job(settings, job_name)?;

        let job = JobContext {
            job_id,
            job_name: job_name.to_string(),
            settings: settings.clone(),
            reader: Arc::clone(&self.reader),
            predictors: Arc::clone(&self.predictors),
            output_folder: Some(job_folder.clone()),
            progress: Arc::clone(progress),
        };

        if !progress.is_stopping() {
            progress.set_state(JobState::Running);
        }
        info!(
            %job_id,
            job = job_name,
            folder = %job_folder.display(),
            waves = graph.waves().len(),
            "Job started"
        );
        let started = Instant::now();

        let result = settings
            .project_settings
            .plates
            .iter()
            .try_for_each(|plate| self.run_plate(&job, &db, &graph, plate));

        if let Err(err) = &result {
            if !matches!(err, EngineError::Cancelled) {
                progress.fail(err.to_string());
            }
        }
        // A worker may have failed while the others only saw the stop flag.
        let error = progress.last_error();
        match &error {
            Some(message) => {
                error!(%job_id, "Job failed: {message}");
                if let Err(flush_err) = db.flush() {
                    error!(%job_id, "Partial results could not be written: {flush_err}");
                }
            }
            None if result.is_ok() && !progress.is_stopping() => {
                db.finish_job(job_id)?;
                progress.set_state(JobState::Finished);
            }
            None => {
                progress.set_state(JobState::Cancelled);
                db.flush()?;
                warn!(%job_id, "Job cancelled");
            }
        }

        info!(
            %job_id,
            state = %progress.state(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Job ended"
        );
        Ok(JobSummary {
            job_id,
            job_folder,
            database_path,
            state: progress.state(),
            processed_images: progress.processed_images(),
            error,
        })
    }

    fn run_plate(
        &self,
        job: &JobContext,
        db: &Database,
        graph: &DependencyGraph,
        plate: &Plate,
    ) -> EngineResult<()> {
        if job.is_stopping() {
            return Err(EngineError::Cancelled);
        }
        let settings = &job.settings;
        let series = settings.image_setup.series;
        let paths = self.reader.list_images(Path::new(&plate.image_folder))?;
        let prepared = db.prepare_images(
            plate,
            series,
            &paths,
            self.reader.as_ref(),
            rayon::current_num_threads(),
        )?;
        job.progress.add_total_images(prepared.len());

        let mut images = Vec::with_capacity(prepared.len());
        for image in prepared {
            db.insert_group(plate.plate_id, &image.group);
            match image.ome {
                Ok(ome) => {
                    let plan = ImagePlan::new(&settings.image_setup, &ome, &settings.pipelines);
                    let ctx = ImageContext::new(
                        plate.plate_id,
                        image.group.group_id,
                        image.image_id,
                        image.path,
                        series,
                        ome,
                        plan,
                    );
                    db.insert_image(&ctx, &image.group);
                    db.insert_image_channels(ctx.image_id, &ctx.ome, series);
                    for plane in ctx.plan.iteration_planes() {
                        let info = ctx.ome.plane_info(series, plane.c, plane.t, plane.z);
                        db.insert_image_plane(ctx.image_id, plane, info);
                    }
                    job.progress.add_total_tiles(ctx.plan.tile_count() as usize);
                    images.push(ctx);
                }
                Err(_) => {
                    db.insert_invalid_image(
                        plate.plate_id,
                        image.image_id,
                        &image.path,
                        &image.group,
                    );
                    job.progress.inc_image();
                }
            }
        }
        let Some(first) = images.first() else {
            warn!(
                plate = plate.plate_id,
                folder = %plate.image_folder,
                "Plate has no readable images"
            );
            return Ok(());
        };

        let threads = self.threading.unwrap_or_else(|| {
            calc_optimal_threading(
                SystemResources::query(),
                ram_per_worker(&first.ome, &first.plan, series),
                WorkShape::new(images.len(), &first.plan, settings.pipelines.len()),
            )
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.total())
            .thread_name(|idx| format!("engine-worker-{idx}"))
            .build()?;
        info!(plate = plate.plate_id, images = images.len(), ?threads, "Processing plate");

        pool.install(|| {
            try_par_for_each_limited(&images, threads.images, |_, image| {
                if job.is_stopping() {
                    return Err(EngineError::Cancelled);
                }
                job.progress.inc_started_image();
                info!(image_id = image.image_id, path = %image.path.display(), "Image started");
                run_image(job, image, graph, db, &threads, &Unobserved)?;
                db.set_image_processed(image.image_id)?;
                job.progress.inc_image();
                Ok(())
            })
        })
    }
}

/// Ordering first so a cycle is reported as such, then full validation.
fn prepare(settings: &AnalyzeSettings) -> EngineResult<DependencyGraph> {
    let graph = DependencyGraph::build(&settings.pipelines)?;
    let log = settings.validate()?;
    for entry in log.entries() {
        warn!("{entry}");
    }
    Ok(graph)
}

/// `<working dir>/<ISO timestamp>_<job name>`.
pub fn job_folder(working_directory: &Path, job_name: &str) -> PathBuf {
    let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3f");
    let name: String = job_name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    working_directory.join(format!("{timestamp}_{name}"))
}
