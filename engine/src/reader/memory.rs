use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::{check_budget, ImageReader, ReaderError, ReaderResult};
use crate::image::{Image, PlaneId};
use crate::ome::OmeInfo;

/// All planes of one in-memory image file.
#[derive(Debug, Clone)]
pub struct MemoryStack {
    pub ome: OmeInfo,
    pub planes: HashMap<PlaneId, Image>,
}

impl MemoryStack {
    /// Stack with `planes` for series 0; dimensions are derived from the planes.
    pub fn new(planes: Vec<Image>) -> Self {
        let width = planes.first().map_or(0, |p| p.width()) as u32;
        let height = planes.first().map_or(0, |p| p.height()) as u32;
        let channels = planes.iter().map(|p| p.plane().c + 1).max().unwrap_or(0);
        let z_stacks = planes.iter().map(|p| p.plane().z + 1).max().unwrap_or(0);
        let t_stacks = planes.iter().map(|p| p.plane().t + 1).max().unwrap_or(0);
        Self {
            ome: OmeInfo::single(width, height, channels, z_stacks, t_stacks),
            planes: planes.into_iter().map(|p| (p.plane(), p)).collect(),
        }
    }
}

/// Reader over stacks registered in memory. Counts plane loads.
#[derive(Debug, Default)]
pub struct MemoryImageReader {
    stacks: RwLock<HashMap<PathBuf, MemoryStack>>,
    memory_budget: u64,
    loads: AtomicUsize,
}

impl MemoryImageReader {
    pub fn new(memory_budget: u64) -> Self {
        Self {
            memory_budget,
            ..Default::default()
        }
    }

    pub fn insert(&self, path: impl Into<PathBuf>, stack: MemoryStack) {
        self.stacks.write().insert(path.into(), stack);
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.stacks.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Number of plane loads served so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ImageReader for MemoryImageReader {
    fn ome_information(&self, path: &Path, series: u16) -> ReaderResult<OmeInfo> {
        let stacks = self.stacks.read();
        let stack = stacks
            .get(path)
            .ok_or_else(|| ReaderError::NotFound(path.to_path_buf()))?;
        if stack.ome.series(series).is_none() {
            return Err(ReaderError::SeriesOutOfRange {
                path: path.to_path_buf(),
                series,
            });
        }
        Ok(stack.ome.clone())
    }

    fn load_entire_image(&self, path: &Path, series: u16, plane: PlaneId) -> ReaderResult<Image> {
        let stacks = self.stacks.read();
        let stack = stacks
            .get(path)
            .ok_or_else(|| ReaderError::NotFound(path.to_path_buf()))?;
        if series != 0 {
            return Err(ReaderError::SeriesOutOfRange {
                path: path.to_path_buf(),
                series,
            });
        }
        check_budget(stack.ome.plane_memory_usage(series), self.memory_budget)?;
        let image = stack
            .planes
            .get(&plane)
            .ok_or_else(|| ReaderError::PlaneOutOfRange {
                path: path.to_path_buf(),
                plane,
            })?;
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(image.clone())
    }

    fn list_images(&self, folder: &Path) -> ReaderResult<Vec<PathBuf>> {
        Ok(self
            .paths()
            .into_iter()
            .filter(|p| p.starts_with(folder))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ome::TileToLoad;

    fn reader_with_plane() -> MemoryImageReader {
        let reader = MemoryImageReader::new(0);
        let plane = Image::new_filled(10, 6, 7, PlaneId::new(0, 0, 0));
        reader.insert("/img/a.tif", MemoryStack::new(vec![plane]));
        reader
    }

    #[test]
    fn listing_is_limited_to_folder() -> anyhow::Result<()> {
        let reader = reader_with_plane();
        reader.insert(
            "/other/b.tif",
            MemoryStack::new(vec![Image::new_blank(2, 2, PlaneId::default())]),
        );
        assert_eq!(reader.list_images(Path::new("/img"))?, vec![PathBuf::from("/img/a.tif")]);
        assert_eq!(reader.list_images(Path::new(""))?.len(), 2);
        Ok(())
    }

    #[test]
    fn stack_dimensions_follow_planes() {
        let planes = vec![
            Image::new_blank(4, 4, PlaneId::new(0, 0, 0)),
            Image::new_blank(4, 4, PlaneId::new(0, 2, 1)),
        ];
        let stack = MemoryStack::new(planes);
        assert_eq!(stack.ome.nr_of_channels(0), 2);
        assert_eq!(stack.ome.nr_of_z_stack(0), 3);
        assert_eq!(stack.ome.nr_of_t_stack(0), 1);
    }

    #[test]
    fn tile_is_clipped_at_border() -> anyhow::Result<()> {
        let reader = reader_with_plane();
        let tile = TileToLoad::new(1, 0, 8, 8);
        let image = reader.load_image_tile(Path::new("/img/a.tif"), 0, PlaneId::default(), &tile)?;
        assert_eq!((image.width(), image.height()), (2, 6));
        assert_eq!(reader.load_count(), 1);
        Ok(())
    }

    #[test]
    fn missing_plane_and_file() {
        let reader = reader_with_plane();
        assert!(matches!(
            reader.load_entire_image(Path::new("/img/a.tif"), 0, PlaneId::new(0, 0, 3)),
            Err(ReaderError::PlaneOutOfRange { .. })
        ));
        assert!(matches!(
            reader.ome_information(Path::new("/img/b.tif"), 0),
            Err(ReaderError::NotFound(_))
        ));
    }

    #[test]
    fn memory_budget_is_enforced() {
        let reader = MemoryImageReader::new(16);
        reader.insert(
            "/img/big.tif",
            MemoryStack::new(vec![Image::new_blank(10, 10, PlaneId::default())]),
        );
        assert!(matches!(
            reader.load_entire_image(Path::new("/img/big.tif"), 0, PlaneId::default()),
            Err(ReaderError::MemoryBudgetExceeded { required: 200, budget: 16 })
        ));
    }
}
