//! Fan-out sizing for the four parallel axes of a job.

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::debug;

use crate::initializer::ImagePlan;
use crate::ome::OmeInfo;

/// Concurrent items per axis. An axis with `1` runs on the enclosing thread.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadingSettings {
    pub images: usize,
    pub tiles: usize,
    pub channels: usize,
    pub stacks: usize,
}

impl Default for ThreadingSettings {
    fn default() -> Self {
        Self::serial()
    }
}

impl ThreadingSettings {
    pub fn serial() -> Self {
        Self {
            images: 1,
            tiles: 1,
            channels: 1,
            stacks: 1,
        }
    }

    /// Threads needed to saturate every axis at once.
    pub fn total(&self) -> usize {
        self.images.max(1) * self.tiles.max(1) * self.channels.max(1) * self.stacks.max(1)
    }

    /// Zero counts become 1.
    pub fn normalized(self) -> Self {
        Self {
            images: self.images.max(1),
            tiles: self.tiles.max(1),
            channels: self.channels.max(1),
            stacks: self.stacks.max(1),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SystemResources {
    pub cpus: usize,
    pub ram_available: u64,
    pub ram_total: u64,
}

impl SystemResources {
    pub fn query() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            cpus: rayon::current_num_threads().max(1),
            ram_available: sys.available_memory(),
            ram_total: sys.total_memory(),
        }
    }
}

/// Item counts of the job along each axis.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct WorkShape {
    pub images: usize,
    pub tiles: usize,
    pub pipelines: usize,
    pub stacks: usize,
}

impl WorkShape {
    pub fn new(image_count: usize, plan: &ImagePlan, pipeline_count: usize) -> Self {
        Self {
            images: image_count,
            tiles: plan.tile_count() as usize,
            pipelines: pipeline_count,
            stacks: plan.iterations_per_tile(),
        }
    }
}

/// Bytes one worker holds while processing a plane of `ome`.
pub fn ram_per_worker(ome: &OmeInfo, plan: &ImagePlan, series: u16) -> u64 {
    let bytes_per_pixel = (ome.bits_per_pixel(series) as u64).div_ceil(8).max(1);
    let tile = plan.tile_width as u64 * plan.tile_height as u64 * bytes_per_pixel;
    tile.max(1)
}

/// Gives all usable cores to the axis with the most items.
///
/// Usable cores are bounded by the CPU count and by how many workers fit into
/// free RAM; one core stays free on multi core machines.
pub fn calc_optimal_threading(
    resources: SystemResources,
    ram_per_worker: u64,
    shape: WorkShape,
) -> ThreadingSettings {
    let by_ram = (resources.ram_available / ram_per_worker.max(1)).min(usize::MAX as u64) as usize;
    let mut cores = resources.cpus.min(by_ram).max(1);
    if cores > 1 && cores == resources.cpus {
        cores -= 1;
    }

    let mut threads = ThreadingSettings::serial();
    let axes = [
        shape.images,
        shape.tiles,
        shape.pipelines,
        shape.stacks,
    ];
    let winner = if axes[3] > axes[0] && axes[3] > axes[1] && axes[3] > axes[2] {
        3
    } else if axes[0] > axes[1] {
        if axes[0] > axes[2] {
            0
        } else {
            2
        }
    } else if axes[1] > axes[2] {
        1
    } else {
        2
    };
    let assigned = cores.min(axes[winner].max(1));
    match winner {
        0 => threads.images = assigned,
        1 => threads.tiles = assigned,
        2 => threads.channels = assigned,
        _ => threads.stacks = assigned,
    }
    debug!(?resources, ram_per_worker, ?shape, ?threads, "Threading");
    threads
}
