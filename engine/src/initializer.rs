//! Per-image planning and preparation of the iteration-initial image.

use std::ops::Range;

use tracing::{debug, warn};

use crate::cache::{CacheSource, ImageCacheKey};
use crate::commands::{CommandError, CommandResult};
use crate::context::{ImageContext, IterationContext, JobContext, ProcessContext};
use crate::enums::ZProjection;
use crate::image::{Image, PlaneId};
use crate::ome::{tile_count, OmeInfo, TileToLoad};
use crate::settings::{ImageSource, Pipeline, PipelineSetup, ProjectImageSetup, StackHandling};

/// Tile grid and stack ranges of one image.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ImagePlan {
    pub image_width: u32,
    pub image_height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
    pub t_range: Range<u32>,
    pub z_range: Range<u32>,
    pub nr_of_z: u32,
    /// Every pipeline takes `t` from its own setup.
    pub t_from_setup: bool,
    /// Pipelines without projection take `z` from their own setup.
    pub z_from_setup: bool,
}

impl ImagePlan {
    pub fn new(setup: &ProjectImageSetup, ome: &OmeInfo, pipelines: &[Pipeline]) -> Self {
        let series = setup.series;
        let (image_width, image_height) = ome.image_size(series);
        let tiles = setup.image_tile_settings;

        let (tile_width, tile_height, tiles_x, tiles_y) =
            if image_width > tiles.tile_width || image_height > tiles.tile_height {
                let (nx, ny) =
                    tile_count(image_width, image_height, tiles.tile_width, tiles.tile_height);
                (tiles.tile_width, tiles.tile_height, nx, ny)
            } else {
                (image_width, image_height, 1, 1)
            };

        let nr_of_t = ome.nr_of_t_stack(series);
        let (t_range, t_from_setup) = match setup.t_stack_handling {
            StackHandling::EachOne => {
                let start = setup.t_stack_settings.start_frame.max(0) as u32;
                let end = setup
                    .t_stack_settings
                    .end_frame
                    .map_or(nr_of_t, |e| e.max(0) as u32)
                    .min(nr_of_t);
                if start >= end {
                    warn!(start, end, nr_of_t, "T-stack range is empty");
                }
                (start..end.max(start), false)
            }
            StackHandling::ExactOne => (0..1, true),
        };

        let nr_of_z = ome.nr_of_z_stack(series);
        let any_projection = pipelines
            .iter()
            .any(|p| p.pipeline_setup.z_projection != ZProjection::None);
        let (z_range, z_from_setup) = match setup.z_stack_handling {
            StackHandling::EachOne if !any_projection => (0..nr_of_z.max(1), false),
            _ => (0..1, true),
        };

        Self {
            image_width,
            image_height,
            tile_width,
            tile_height,
            tiles_x,
            tiles_y,
            t_range,
            z_range,
            nr_of_z,
            t_from_setup,
            z_from_setup,
        }
    }

    pub fn tile_count(&self) -> u32 {
        self.tiles_x * self.tiles_y
    }

    pub fn is_single_tile(&self) -> bool {
        self.tile_count() == 1
    }

    pub fn tiles(&self) -> Vec<TileToLoad> {
        (0..self.tile_count())
            .map(|id| TileToLoad::from_tile_id(id, self.tiles_x, self.tile_width, self.tile_height))
            .collect()
    }

    /// `(t, z)` of every iteration, `c` = 0.
    pub fn iteration_planes(&self) -> Vec<PlaneId> {
        self.t_range
            .clone()
            .flat_map(|t| self.z_range.clone().map(move |z| PlaneId::new(t, z, 0)))
            .collect()
    }

    pub fn iterations_per_tile(&self) -> usize {
        self.t_range.len() * self.z_range.len()
    }

    /// Plane a pipeline reads in the iteration at `iteration`.
    pub fn pipeline_plane(&self, setup: &PipelineSetup, iteration: PlaneId) -> PlaneId {
        let t = if self.t_from_setup {
            setup.t_stack_index
        } else {
            iteration.t
        };
        let z = if setup.z_projection != ZProjection::None {
            0
        } else if self.z_from_setup {
            setup.z_stack_index
        } else {
            iteration.z
        };
        PlaneId::new(t, z, setup.c_stack_index)
    }

    /// Size of `tile` clipped to the image.
    pub fn tile_size(&self, tile: &TileToLoad) -> (usize, usize) {
        let (_, _, w, h) = tile.clipped(self.image_width, self.image_height);
        (w as usize, h as usize)
    }
}

/// Pixel-wise reduction of equally sized planes. The result carries `plane`.
pub fn project(planes: &[Image], projection: ZProjection, plane: PlaneId) -> CommandResult<Image> {
    let Some(first) = planes.first() else {
        return Err(CommandError::InvalidInput("Projection over zero planes".to_string()));
    };
    for other in &planes[1..] {
        first.same_size(other)?;
    }
    let (w, h) = (first.width(), first.height());
    let mut out = match projection {
        ZProjection::None => first.clone(),
        ZProjection::TakeMiddle => planes[planes.len() / 2].clone(),
        ZProjection::Max | ZProjection::Min => {
            let mut acc = first.deep_clone();
            let pick: fn(u16, u16) -> u16 = if projection == ZProjection::Max {
                u16::max
            } else {
                u16::min
            };
            for other in &planes[1..] {
                acc.zip_apply(other, pick)?;
            }
            acc
        }
        ZProjection::Avg => {
            let mut sums = vec![0u64; w * h];
            for p in planes {
                for (s, &v) in sums.iter_mut().zip(p.pixels()) {
                    *s += v as u64;
                }
            }
            let n = planes.len() as u64;
            let pixels = sums.into_iter().map(|s| ((s + n / 2) / n) as u16).collect();
            Image::from_vec(w, h, pixels, plane)
        }
    };
    out.set_plane(plane);
    Ok(out)
}

/// Loads `plane` of the iteration's tile, reduced over Z with `projection`.
///
/// Raw planes are cached for the iteration. Projections are cached for the
/// whole image when the image is a single tile, else for the iteration.
pub(crate) fn load_tile(
    job: &JobContext,
    image: &ImageContext,
    iteration: &IterationContext,
    plane: PlaneId,
    projection: ZProjection,
) -> CommandResult<Image> {
    let load_raw = |plane: PlaneId| -> CommandResult<Image> {
        let key = ImageCacheKey::new(CacheSource::Loaded(ZProjection::None), plane);
        iteration.cache.load_or_insert_with(key, || {
            let mut tile = job
                .reader
                .load_image_tile(&image.path, image.series, plane, &iteration.tile)?;
            tile.set_plane(plane);
            Ok(tile)
        })
    };

    if projection == ZProjection::None {
        return load_raw(plane);
    }

    let projected_plane = plane.with_z(0);
    let key = ImageCacheKey::new(CacheSource::Loaded(projection), projected_plane);
    let cache = if image.plan.is_single_tile() {
        &image.cache
    } else {
        &iteration.cache
    };
    cache.load_or_insert_with(key, || {
        let nr_of_z = image.plan.nr_of_z.max(1);
        let z_planes: Vec<u32> = match projection {
            ZProjection::TakeMiddle => vec![nr_of_z / 2],
            _ => (0..nr_of_z).collect(),
        };
        debug!(%plane, ?projection, planes = z_planes.len(), "Projecting Z stack");
        let planes = z_planes
            .into_iter()
            .map(|z| load_raw(plane.with_z(z)))
            .collect::<CommandResult<Vec<_>>>()?;
        project(&planes, projection, projected_plane)
    })
}

/// Produces the iteration-initial image of the context's pipeline.
///
/// Planes referenced by the pipeline's steps are loaded up front so later
/// steps hit the iteration cache.
pub fn init_pipeline(ctx: &ProcessContext<'_>) -> CommandResult<Image> {
    let setup = &ctx.pipeline.pipeline.pipeline_setup;
    let plane = ctx.plane();
    let image = match setup.source {
        ImageSource::FromFile => ctx.load_plane(&crate::image::PlaneRef {
            c_stack: plane.c as i32,
            z_stack: if setup.z_projection == ZProjection::None {
                plane.z as i32
            } else {
                -1
            },
            t_stack: plane.t as i32,
        })?,
        ImageSource::Blank => {
            let (w, h) = ctx.image.plan.tile_size(&ctx.tile());
            Image::new_blank(w, h, plane)
        }
        ImageSource::FromCache => {
            let slot = setup.cache_slot.ok_or_else(|| {
                CommandError::InvalidInput("Image source FROM_CACHE without cache slot".to_string())
            })?;
            let mut image = ctx.load_slot(slot)?;
            image.set_plane(plane);
            image
        }
    };

    ctx.iteration.cache.store(
        ImageCacheKey::new(CacheSource::Pipeline(ctx.pipeline.index), plane),
        image.clone(),
    );

    for step in ctx.pipeline.pipeline.pipeline_steps.iter().filter(|s| !s.disabled) {
        for plane_ref in step.command.referenced_planes() {
            ctx.load_plane(&plane_ref)?;
        }
    }
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ImageTileSettings, TStackSettings};

    fn pipeline_with(setup: PipelineSetup) -> Pipeline {
        Pipeline::new("p", setup)
    }

    #[test]
    fn small_image_is_one_tile() {
        let ome = OmeInfo::single(100, 80, 1, 1, 1);
        let plan = ImagePlan::new(&ProjectImageSetup::default(), &ome, &[]);
        assert_eq!((plan.tiles_x, plan.tiles_y), (1, 1));
        assert_eq!((plan.tile_width, plan.tile_height), (100, 80));
        assert_eq!(plan.tiles(), vec![TileToLoad::new(0, 0, 100, 80)]);
    }

    #[test]
    fn large_image_uses_configured_tiles() {
        let ome = OmeInfo::single(250, 100, 1, 1, 1);
        let setup = ProjectImageSetup {
            image_tile_settings: ImageTileSettings {
                tile_width: 100,
                tile_height: 100,
            },
            ..Default::default()
        };
        let plan = ImagePlan::new(&setup, &ome, &[]);
        assert_eq!((plan.tiles_x, plan.tiles_y), (3, 1));
        assert_eq!(plan.tile_size(&plan.tiles()[2]), (50, 100));
    }

    #[test]
    fn t_range_is_clamped() {
        let ome = OmeInfo::single(10, 10, 1, 1, 5);
        let setup = ProjectImageSetup {
            t_stack_settings: TStackSettings {
                start_frame: -3,
                end_frame: Some(9),
            },
            ..Default::default()
        };
        let plan = ImagePlan::new(&setup, &ome, &[]);
        assert_eq!(plan.t_range, 0..5);

        let setup = ProjectImageSetup {
            t_stack_settings: TStackSettings {
                start_frame: 2,
                end_frame: Some(4),
            },
            ..Default::default()
        };
        assert_eq!(ImagePlan::new(&setup, &ome, &[]).t_range, 2..4);
    }

    #[test]
    fn projection_collapses_z_iteration() {
        let ome = OmeInfo::single(10, 10, 1, 3, 1);
        let setup = ProjectImageSetup {
            z_stack_handling: StackHandling::EachOne,
            ..Default::default()
        };
        let plain = pipeline_with(PipelineSetup::default());
        assert_eq!(ImagePlan::new(&setup, &ome, &[plain.clone()]).z_range, 0..3);

        let projecting = pipeline_with(PipelineSetup {
            z_projection: ZProjection::Max,
            ..Default::default()
        });
        let plan = ImagePlan::new(&setup, &ome, &[plain, projecting]);
        assert_eq!(plan.z_range, 0..1);
        assert!(plan.z_from_setup);
    }

    #[test]
    fn pipeline_plane_follows_setup() {
        let ome = OmeInfo::single(10, 10, 2, 3, 4);
        let plan = ImagePlan::new(&ProjectImageSetup::default(), &ome, &[]);
        let setup = PipelineSetup {
            c_stack_index: 1,
            z_stack_index: 2,
            ..Default::default()
        };
        assert_eq!(plan.pipeline_plane(&setup, PlaneId::new(3, 0, 0)), PlaneId::new(3, 2, 1));
    }

    #[test]
    fn max_projection_is_pixelwise() -> anyhow::Result<()> {
        let planes: Vec<Image> = [5u16, 9, 3]
            .iter()
            .enumerate()
            .map(|(z, &v)| Image::new_filled(4, 4, v, PlaneId::new(0, z as u32, 0)))
            .collect();
        let max = project(&planes, ZProjection::Max, PlaneId::default())?;
        assert!(max.pixels().iter().all(|&v| v == 9));
        let min = project(&planes, ZProjection::Min, PlaneId::default())?;
        assert!(min.pixels().iter().all(|&v| v == 3));
        let avg = project(&planes, ZProjection::Avg, PlaneId::default())?;
        assert!(avg.pixels().iter().all(|&v| v == 6));
        let mid = project(&planes, ZProjection::TakeMiddle, PlaneId::default())?;
        assert!(mid.pixels().iter().all(|&v| v == 9));
        Ok(())
    }
}
