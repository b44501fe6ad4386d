//! Image caches with scope based eviction.
//!
//! The driver owns one cache per image and one per iteration `(tile, t, z)`
//! and clears them when the scope ends. Loads hand out [`Image`] handles that
//! share storage with the entry, so clearing never invalidates a reader.

use std::fmt;

use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::enums::{CacheSlot, ZProjection};
use crate::image::{Image, PlaneId};

/// Who produced a cached plane.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CacheSource {
    /// Plane as read from the file, reduced with the given projection.
    Loaded(ZProjection),
    /// Iteration-initial image of the pipeline with this index.
    Pipeline(usize),
    /// Memory slot written by `$imageToCache`.
    Slot(CacheSlot),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ImageCacheKey {
    pub source: CacheSource,
    pub plane: PlaneId,
}

impl ImageCacheKey {
    pub const fn new(source: CacheSource, plane: PlaneId) -> Self {
        Self { source, plane }
    }
}

impl fmt::Display for ImageCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            CacheSource::Loaded(projection) => write!(f, "loaded[{projection}]@{}", self.plane),
            CacheSource::Pipeline(idx) => write!(f, "pipeline[{idx}]@{}", self.plane),
            CacheSource::Slot(slot) => write!(f, "{slot}@{}", self.plane),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<ImageCacheKey, Image>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `image`, replacing a previous entry.
    pub fn store(&self, key: ImageCacheKey, image: Image) {
        self.entries.write().insert(key, image);
    }

    pub fn load(&self, key: &ImageCacheKey) -> Option<Image> {
        self.entries.read().get(key).cloned()
    }

    pub fn contains(&self, key: &ImageCacheKey) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn erase(&self, key: &ImageCacheKey) -> Option<Image> {
        self.entries.write().remove(key)
    }

    /// Returns the cached entry or stores the result of `load`.
    ///
    /// `load` runs without holding the lock; if two callers race, the first
    /// stored image wins and both receive it.
    pub fn load_or_insert_with<E>(
        &self,
        key: ImageCacheKey,
        load: impl FnOnce() -> Result<Image, E>,
    ) -> Result<Image, E> {
        if let Some(image) = self.load(&key) {
            return Ok(image);
        }
        let image = load()?;
        Ok(self.entries.write().entry(key).or_insert(image).clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Evicts every entry and returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write();
        let evicted = entries.len();
        entries.clear();
        evicted
    }
}
