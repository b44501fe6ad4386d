use serde::{Deserialize, Serialize};

use super::{CommandResult, PipelineCommand};
use crate::context::ProcessContext;
use crate::enums::CacheSlot;
use crate::image::{Image, PlaneRef};
use crate::object_list::PipelineObjects;
use crate::settings::SettingParserLog;

/// Second image operand: a memory slot, or a plane of the current iteration.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageIn {
    /// Takes precedence over `image_plane` when set.
    pub memory_id: Option<CacheSlot>,
    pub image_plane: PlaneRef,
}

impl Default for ImageIn {
    fn default() -> Self {
        Self {
            memory_id: None,
            image_plane: PlaneRef::channel(-1),
        }
    }
}

impl ImageIn {
    pub fn slot(slot: CacheSlot) -> Self {
        Self {
            memory_id: Some(slot),
            ..Default::default()
        }
    }

    pub fn plane(image_plane: PlaneRef) -> Self {
        Self {
            memory_id: None,
            image_plane,
        }
    }

    pub fn load(&self, ctx: &ProcessContext<'_>) -> CommandResult<Image> {
        match self.memory_id {
            Some(slot) => ctx.load_slot(slot),
            None => ctx.load_plane(&self.image_plane),
        }
    }

    pub(crate) fn input_image_cache(&self) -> Vec<CacheSlot> {
        self.memory_id.into_iter().collect()
    }

    pub(crate) fn referenced_planes(&self) -> Vec<PlaneRef> {
        match self.memory_id {
            Some(_) => Vec::new(),
            None => vec![self.image_plane],
        }
    }
}

/// Stores a copy of the current image.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageToCache {
    pub memory_id: CacheSlot,
}

impl Default for ImageToCache {
    fn default() -> Self {
        Self {
            memory_id: CacheSlot::new(0),
        }
    }
}

impl PipelineCommand for ImageToCache {
    fn execute(
        &self,
        ctx: &ProcessContext<'_>,
        image: &mut Image,
        _objects: &mut PipelineObjects<'_>,
    ) -> CommandResult<()> {
        ctx.store_slot(self.memory_id, image.clone());
        Ok(())
    }

    fn output_image_cache(&self) -> Vec<CacheSlot> {
        vec![self.memory_id]
    }
}

/// Replaces the current image with a cached one.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageFromCache {
    pub image_in: ImageIn,
}

impl PipelineCommand for ImageFromCache {
    fn execute(
        &self,
        ctx: &ProcessContext<'_>,
        image: &mut Image,
        _objects: &mut PipelineObjects<'_>,
    ) -> CommandResult<()> {
        *image = self.image_in.load(ctx)?;
        Ok(())
    }

    fn input_image_cache(&self) -> Vec<CacheSlot> {
        self.image_in.input_image_cache()
    }

    fn referenced_planes(&self) -> Vec<PlaneRef> {
        self.image_in.referenced_planes()
    }

    fn check(&self, log: &mut SettingParserLog, pipeline: &str) {
        if self.image_in.memory_id.is_none() && self.image_in.image_plane.c_stack < 0 {
            log.info(
                pipeline,
                "$imageFromCache: no memory slot or channel set, reloading the current plane",
            );
        }
    }
}
