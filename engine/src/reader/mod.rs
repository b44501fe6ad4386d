//! Image reader capability consumed by the engine.
//!
//! The engine never decodes microscope formats itself; it asks an
//! [`ImageReader`] for descriptors and planes. [`MemoryImageReader`] serves
//! synthetic stacks, [`FileImageReader`] serves single-plane PNG/TIFF files.

mod file;
mod memory;

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::image::{Image, ImageError, PlaneId};
use crate::ome::{OmeInfo, TileToLoad};

pub use file::FileImageReader;
pub use memory::{MemoryImageReader, MemoryStack};

pub const THUMBNAIL_SIZE: usize = 256;

/// Extensions picked up when a plate folder is scanned.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["tif", "tiff", "btf", "png"];

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Image file not found: {0}")]
    NotFound(PathBuf),
    #[error("Series {series} not available in '{path}'")]
    SeriesOutOfRange { path: PathBuf, series: u16 },
    #[error("Plane {plane} not available in '{path}'")]
    PlaneOutOfRange { path: PathBuf, plane: PlaneId },
    #[error("Plane of {required} bytes exceeds the reader memory budget of {budget} bytes")]
    MemoryBudgetExceeded { required: u64, budget: u64 },
    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Image(#[from] ImageError),
}

pub type ReaderResult<T> = Result<T, ReaderError>;

/// Loads planes and descriptors of multi-dimensional image files.
///
/// Implementations are shared by all worker threads.
pub trait ImageReader: Send + Sync {
    fn ome_information(&self, path: &Path, series: u16) -> ReaderResult<OmeInfo>;

    fn load_entire_image(&self, path: &Path, series: u16, plane: PlaneId) -> ReaderResult<Image>;

    /// Loads one tile of the largest resolution. The default crops the entire plane.
    fn load_image_tile(
        &self,
        path: &Path,
        series: u16,
        plane: PlaneId,
        tile: &TileToLoad,
    ) -> ReaderResult<Image> {
        let full = self.load_entire_image(path, series, plane)?;
        let (x, y, w, h) = tile.clipped(full.width() as u32, full.height() as u32);
        if w == 0 || h == 0 {
            return Err(ReaderError::PlaneOutOfRange {
                path: path.to_path_buf(),
                plane,
            });
        }
        Ok(full.crop(x as usize, y as usize, w as usize, h as usize))
    }

    fn load_thumbnail(&self, path: &Path, series: u16, plane: PlaneId) -> ReaderResult<Image> {
        Ok(self
            .load_entire_image(path, series, plane)?
            .thumbnail(THUMBNAIL_SIZE))
    }

    /// Image files below `folder`, sorted. The default walks the file system.
    fn list_images(&self, folder: &Path) -> ReaderResult<Vec<PathBuf>> {
        let mut images = Vec::new();
        collect_images(folder, &mut images)?;
        images.sort();
        Ok(images)
    }
}

fn collect_images(folder: &Path, images: &mut Vec<PathBuf>) -> ReaderResult<()> {
    let io_err = |source| ReaderError::Io {
        path: folder.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(folder).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_dir() {
            collect_images(&path, images)?;
        } else if common::get_file_extension(&path)
            .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        {
            images.push(path);
        }
    }
    Ok(())
}

pub(crate) fn check_budget(required: u64, budget: u64) -> ReaderResult<()> {
    if budget > 0 && required > budget {
        return Err(ReaderError::MemoryBudgetExceeded { required, budget });
    }
    Ok(())
}
