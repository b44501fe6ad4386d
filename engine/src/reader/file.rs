use std::path::Path;

use image as image_lib;

use super::{check_budget, ImageReader, ReaderError, ReaderResult};
use crate::image::{load_gray16, Image, ImageError, PlaneId};
use crate::ome::OmeInfo;

/// Reads plain PNG/TIFF files as one series with a single plane.
#[derive(Debug, Default, Clone)]
pub struct FileImageReader {
    memory_budget: u64,
}

impl FileImageReader {
    pub fn new(memory_budget: u64) -> Self {
        Self { memory_budget }
    }
}

impl ImageReader for FileImageReader {
    fn ome_information(&self, path: &Path, series: u16) -> ReaderResult<OmeInfo> {
        if !path.exists() {
            return Err(ReaderError::NotFound(path.to_path_buf()));
        }
        if series != 0 {
            return Err(ReaderError::SeriesOutOfRange {
                path: path.to_path_buf(),
                series,
            });
        }
        let (width, height) =
            image_lib::image_dimensions(path).map_err(|source| ImageError::Decode {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(OmeInfo::single(width, height, 1, 1, 1))
    }

    fn load_entire_image(&self, path: &Path, series: u16, plane: PlaneId) -> ReaderResult<Image> {
        if plane != PlaneId::default() {
            return Err(ReaderError::PlaneOutOfRange {
                path: path.to_path_buf(),
                plane,
            });
        }
        let ome = self.ome_information(path, series)?;
        check_budget(ome.plane_memory_usage(series), self.memory_budget)?;
        Ok(load_gray16(path, plane)?)
    }
}
