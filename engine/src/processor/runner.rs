//! Execution of one image: tiles, `(t, z)` iterations, pipeline waves, steps.

use std::time::Instant;

use common::parallel::{par_map_limited, try_par_for_each_limited};
use tracing::{debug, error, trace};

use super::{EngineError, EngineResult, ThreadingSettings};
use crate::context::{ImageContext, IterationContext, JobContext, ProcessContext};
use crate::database::ResultStore;
use crate::dependency_graph::DependencyGraph;
use crate::image::Image;
use crate::initializer::init_pipeline;
use crate::object_list::{ObjectList, PipelineObjects, WaveResult};

/// Hooks into pipeline execution. Used by the previewer.
pub trait PipelineObserver: Sync {
    /// Called after every executed, enabled step.
    fn step_finished(
        &self,
        _ctx: &ProcessContext<'_>,
        _step: usize,
        _image: &Image,
        _objects: &PipelineObjects<'_>,
    ) {
    }

    /// Called once all steps ran and temporary classes are erased.
    fn pipeline_finished(
        &self,
        _ctx: &ProcessContext<'_>,
        _image: &Image,
        _objects: &PipelineObjects<'_>,
    ) {}
}

/// Observer that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unobserved;

impl PipelineObserver for Unobserved {}

/// Runs the enabled steps of pipeline `index` against the objects of earlier waves.
pub fn run_pipeline(
    job: &JobContext,
    image: &ImageContext,
    iteration: &IterationContext,
    index: usize,
    shared: &ObjectList,
    observer: &dyn PipelineObserver,
) -> EngineResult<WaveResult> {
    let pipeline = &job.settings.pipelines[index];
    let ctx = ProcessContext::new(job, image, iteration, index, pipeline);
    let mut current = init_pipeline(&ctx).map_err(|source| EngineError::Init {
        pipeline: pipeline.meta.name.clone(),
        source,
    })?;
    let mut objects = PipelineObjects::new(shared);

    for (step_idx, step) in pipeline.pipeline_steps.iter().enumerate() {
        if step.disabled {
            continue;
        }
        if ctx.is_stopping() {
            return Err(EngineError::Cancelled);
        }
        trace!(
            pipeline = %pipeline.meta.name,
            step = step_idx,
            command = step.command.name(),
            "Step"
        );
        step.command
            .execute(&ctx, &mut current, &mut objects)
            .map_err(|source| {
                error!(
                    pipeline = %pipeline.meta.name,
                    step = step_idx,
                    command = step.command.name(),
                    "Step failed: {source}"
                );
                EngineError::Step {
                    pipeline: pipeline.meta.name.clone(),
                    step: step_idx,
                    command: step.command.name(),
                    source,
                }
            })?;
        observer.step_finished(&ctx, step_idx, &current, &objects);
    }

    let erased = objects.erase_temporary_classes();
    if erased > 0 {
        trace!(pipeline = %pipeline.meta.name, erased, "Temporary objects erased");
    }
    observer.pipeline_finished(&ctx, &current, &objects);
    Ok(objects.into_result())
}

/// Runs every wave of `graph` for one iteration and stores the objects.
///
/// Pipelines of a wave run concurrently on up to `channels` workers and see
/// only the objects of earlier waves. The iteration cache is cleared before
/// returning.
pub fn run_iteration(
    job: &JobContext,
    image: &ImageContext,
    iteration: &IterationContext,
    graph: &DependencyGraph,
    store: &dyn ResultStore,
    channels: usize,
    observer: &dyn PipelineObserver,
) -> EngineResult<ObjectList> {
    store_iteration(job, image, iteration, graph, store, channels, observer).inspect_err(|err| {
        // Failing here stops workers of sibling images and tiles too.
        if !matches!(err, EngineError::Cancelled) {
            job.progress.fail(err.to_string());
        }
    })
}

fn store_iteration(
    job: &JobContext,
    image: &ImageContext,
    iteration: &IterationContext,
    graph: &DependencyGraph,
    store: &dyn ResultStore,
    channels: usize,
    observer: &dyn PipelineObserver,
) -> EngineResult<ObjectList> {
    let result = run_waves(job, image, iteration, graph, channels, observer);
    let evicted = iteration.cache.clear();
    let objects = result?;

    let stored = store.insert_objects(image, &objects)?;
    store.set_image_plane_validity(image.image_id, iteration.plane, iteration.validity())?;
    debug!(
        image_id = image.image_id,
        tile = iteration.tile_id,
        plane = %iteration.plane,
        stored,
        evicted,
        "Iteration finished"
    );
    Ok(objects)
}

fn run_waves(
    job: &JobContext,
    image: &ImageContext,
    iteration: &IterationContext,
    graph: &DependencyGraph,
    channels: usize,
    observer: &dyn PipelineObserver,
) -> EngineResult<ObjectList> {
    let mut objects = ObjectList::new();
    for wave in graph.waves() {
        if job.is_stopping() {
            return Err(EngineError::Cancelled);
        }
        let shared = &objects;
        let results = par_map_limited(wave, channels.max(1), |&index| {
            run_pipeline(job, image, iteration, index, shared, observer)
        });
        let results = results.into_iter().collect::<EngineResult<Vec<_>>>()?;
        objects.merge_wave(results);
    }
    if job.is_stopping() {
        return Err(EngineError::Cancelled);
    }
    Ok(objects)
}

/// Processes every tile and `(t, z)` iteration of one image.
pub fn run_image(
    job: &JobContext,
    image: &ImageContext,
    graph: &DependencyGraph,
    store: &dyn ResultStore,
    threads: &ThreadingSettings,
    observer: &dyn PipelineObserver,
) -> EngineResult<()> {
    let started = Instant::now();
    let tiles = image.plan.tiles();
    let planes = image.plan.iteration_planes();

    let result = try_par_for_each_limited(&tiles, threads.tiles.max(1), |_, tile| {
        if job.is_stopping() {
            return Err(EngineError::Cancelled);
        }
        let tile_id = tile.tile_id(image.plan.tiles_x);
        try_par_for_each_limited(&planes, threads.stacks.max(1), |_, plane| {
            if job.is_stopping() {
                return Err(EngineError::Cancelled);
            }
            let iteration = IterationContext::new(*tile, tile_id, *plane);
            run_iteration(job, image, &iteration, graph, store, threads.channels, observer)
                .map(|_| ())
        })?;
        job.progress.inc_tile();
        Ok(())
    });
    image.cache.clear();
    result?;

    store.set_image_validity(image.image_id, image.validity())?;
    debug!(
        image_id = image.image_id,
        tiles = tiles.len(),
        iterations = planes.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Image finished"
    );
    Ok(())
}
