use hashbrown::HashMap;

use crate::roi::BoundingBox;

pub const DEFAULT_CELL_SIZE: i32 = 100;

/// Uniform grid over bounding boxes for broad-phase collision queries.
///
/// Entries are indices into the slice the grid was built from.
#[derive(Debug, Clone)]
pub struct SpatialHash {
    cell_size: i32,
    cells: HashMap<(i32, i32), Vec<usize>>,
}

impl SpatialHash {
    pub fn new(cell_size: i32) -> Self {
        Self {
            cell_size: cell_size.max(1),
            cells: HashMap::new(),
        }
    }

    pub fn build(boxes: impl IntoIterator<Item = BoundingBox>) -> Self {
        let mut grid = Self::new(DEFAULT_CELL_SIZE);
        for (idx, bbox) in boxes.into_iter().enumerate() {
            grid.insert(idx, &bbox);
        }
        grid
    }

    pub fn insert(&mut self, idx: usize, bbox: &BoundingBox) {
        for cell in self.cells_of(bbox) {
            self.cells.entry(cell).or_default().push(idx);
        }
    }

    /// Indices whose cells overlap `bbox`, ascending and without duplicates.
    pub fn query(&self, bbox: &BoundingBox) -> Vec<usize> {
        let mut hits: Vec<usize> = self
            .cells_of(bbox)
            .filter_map(|cell| self.cells.get(&cell))
            .flatten()
            .copied()
            .collect();
        hits.sort_unstable();
        hits.dedup();
        hits
    }

    fn cells_of(&self, bbox: &BoundingBox) -> impl Iterator<Item = (i32, i32)> {
        let size = self.cell_size;
        let x0 = bbox.x.div_euclid(size);
        let y0 = bbox.y.div_euclid(size);
        let x1 = (bbox.right() - 1).max(bbox.x).div_euclid(size);
        let y1 = (bbox.bottom() - 1).max(bbox.y).div_euclid(size);
        (y0..=y1).flat_map(move |cy| (x0..=x1).map(move |cx| (cx, cy)))
    }
}
