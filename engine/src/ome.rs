//! Descriptor of a multi-dimensional image file.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TILE_SIZE: u32 = 4096;

/// One tile of a plane at the largest resolution.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileToLoad {
    pub tile_x: u32,
    pub tile_y: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl TileToLoad {
    pub const fn new(tile_x: u32, tile_y: u32, tile_width: u32, tile_height: u32) -> Self {
        Self {
            tile_x,
            tile_y,
            tile_width,
            tile_height,
        }
    }

    /// Pixel offset of the tile's top-left corner.
    pub fn offset(&self) -> (u32, u32) {
        (self.tile_x * self.tile_width, self.tile_y * self.tile_height)
    }

    /// Tile rectangle clipped to an image of `width x height`: `(x, y, w, h)`.
    pub fn clipped(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let (x, y) = self.offset();
        let w = self.tile_width.min(width.saturating_sub(x));
        let h = self.tile_height.min(height.saturating_sub(y));
        (x, y, w, h)
    }

    /// Linear tile number with `nr_of_tiles_x` tiles per row.
    pub fn tile_id(&self, nr_of_tiles_x: u32) -> u32 {
        self.tile_x + self.tile_y * nr_of_tiles_x
    }

    pub fn from_tile_id(
        tile_id: u32,
        nr_of_tiles_x: u32,
        tile_width: u32,
        tile_height: u32,
    ) -> Self {
        let nx = nr_of_tiles_x.max(1);
        Self::new(tile_id % nx, tile_id / nx, tile_width, tile_height)
    }
}

/// Number of tiles `(x, y)` needed to cover an image, using ceiling division.
pub fn tile_count(
    image_width: u32,
    image_height: u32,
    tile_width: u32,
    tile_height: u32) -> (u32,
    u32,
) {
    let tile_width = tile_width.max(1);
    let tile_height = tile_height.max(1);
    (
        image_width.div_ceil(tile_width),
        image_height.div_ceil(tile_height),
    )
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionInfo {
    pub width: u32,
    pub height: u32,
    pub tiled: bool,
    pub optimal_tile_width: u32,
    pub optimal_tile_height: u32,
}

/// Acquisition metadata of one plane.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaneInfo {
    pub time_offset_ms: Option<f64>,
    pub exposure_time_ms: Option<f64>,
}

#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub channel_id: String,
    pub name: String,
    pub emission_wavelength: Option<f32>,
    pub contrast_method: Option<String>,
    /// Keyed by `(t, z)`.
    #[serde(skip)]
    pub planes: BTreeMap<(u32, u32), PlaneInfo>,
}

#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectiveInfo {
    pub manufacturer: String,
    pub model: String,
    pub magnification: f32,
}

#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesInfo {
    /// Largest resolution first.
    pub resolutions: Vec<ResolutionInfo>,
    pub channels: Vec<ChannelInfo>,
    pub nr_of_z_stacks: u32,
    pub nr_of_t_stacks: u32,
    pub bits_per_pixel: u16,
    pub objective: Option<ObjectiveInfo>,
}

/// Immutable description of an image file.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct OmeInfo {
    pub series: Vec<SeriesInfo>,
}

impl OmeInfo {
    /// Single-series descriptor for a `width x height` image.
    pub fn single(width: u32, height: u32, channels: u32, z_stacks: u32, t_stacks: u32) -> Self {
        let channels = (0..channels)
            .map(|c| ChannelInfo {
                channel_id: format!("Channel:0:{c}"),
                name: format!("CH{c}"),
                ..Default::default()
            })
            .collect();
        Self {
            series: vec![SeriesInfo {
                resolutions: vec![ResolutionInfo {
                    width,
                    height,
                    tiled: false,
                    optimal_tile_width: width,
                    optimal_tile_height: height,
                }],
                channels,
                nr_of_z_stacks: z_stacks,
                nr_of_t_stacks: t_stacks,
                bits_per_pixel: 16,
                objective: None,
            }],
        }
    }

    pub fn series(&self, series: u16) -> Option<&SeriesInfo> {
        self.series.get(series as usize)
    }

    pub fn nr_of_series(&self) -> usize {
        self.series.len()
    }

    pub fn nr_of_channels(&self, series: u16) -> u32 {
        self.series(series).map_or(0, |s| s.channels.len() as u32)
    }

    pub fn nr_of_z_stack(&self, series: u16) -> u32 {
        self.series(series).map_or(0, |s| s.nr_of_z_stacks)
    }

    pub fn nr_of_t_stack(&self, series: u16) -> u32 {
        self.series(series).map_or(0, |s| s.nr_of_t_stacks)
    }

    pub fn resolution_count(&self, series: u16) -> usize {
        self.series(series).map_or(0, |s| s.resolutions.len())
    }

    pub fn channel_infos(&self, series: u16) -> &[ChannelInfo] {
        self.series(series).map_or(&[], |s| s.channels.as_slice())
    }

    /// Size of the largest resolution level.
    pub fn image_size(&self, series: u16) -> (u32, u32) {
        self.series(series)
            .and_then(|s| s.resolutions.iter().max_by_key(|r| r.width as u64 * r.height as u64))
            .map_or((0, 0), |r| (r.width, r.height))
    }

    pub fn bits_per_pixel(&self, series: u16) -> u16 {
        self.series(series).map_or(16, |s| s.bits_per_pixel)
    }

    /// Bytes needed to hold one full plane of the largest resolution.
    pub fn plane_memory_usage(&self, series: u16) -> u64 {
        let (w, h) = self.image_size(series);
        w as u64 * h as u64 * (self.bits_per_pixel(series) as u64).div_ceil(8)
    }

    pub fn series_with_highest_resolution(&self) -> u16 {
        self.series
            .iter()
            .enumerate()
            .max_by_key(|(_, s)| {
                s.resolutions
                    .iter()
                    .map(|r| r.width as u64 * r.height as u64)
                    .max()
                    .unwrap_or(0)
            })
            .map_or(0, |(idx, _)| idx as u16)
    }

    pub fn plane_info(&self, series: u16, c: u32, t: u32, z: u32) -> Option<&PlaneInfo> {
        self.channel_infos(series)
            .get(c as usize)
            .and_then(|ch| ch.planes.get(&(t, z)))
    }
}
