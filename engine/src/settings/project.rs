use serde::{Deserialize, Serialize};

use super::classification::Classification;
use crate::enums::ZProjection;
use crate::ome::DEFAULT_TILE_SIZE;

#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExperimentSettings {
    pub experiment_id: String,
    pub experiment_name: String,
    pub notes: String,
}

#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Address {
    pub organization: String,
    pub first_name: String,
    pub last_name: String,
}

/// How images of a plate are assigned to groups (wells).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GroupBy {
    /// All images in one group.
    #[default]
    Off,
    /// One group per parent directory.
    Directory,
    /// Group by the row/column parsed from the file name.
    Filename,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlateSetup {
    pub rows: u16,
    pub cols: u16,
}

impl Default for PlateSetup {
    fn default() -> Self {
        Self { rows: 16, cols: 24 }
    }
}

pub const DEFAULT_FILENAME_REGEX: &str = r"_((.)([0-9]+))_([0-9]+)";

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Plate {
    pub plate_id: u8,
    pub name: String,
    pub notes: String,
    pub image_folder: String,
    pub group_by: GroupBy,
    /// Needs four capture groups `(prefix)(row)(col)(img)`.
    pub filename_regex: String,
    pub plate_setup: PlateSetup,
}

impl Default for Plate {
    fn default() -> Self {
        Self {
            plate_id: 1,
            name: String::new(),
            notes: String::new(),
            image_folder: String::new(),
            group_by: GroupBy::Off,
            filename_regex: DEFAULT_FILENAME_REGEX.to_string(),
            plate_setup: PlateSetup::default(),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectSettings {
    pub experiment_settings: ExperimentSettings,
    pub address: Address,
    pub working_directory: String,
    pub plates: Vec<Plate>,
    pub classification: Classification,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackHandling {
    /// Iterate every stack in range.
    #[default]
    EachOne,
    /// Use only the index configured in the pipeline setup.
    ExactOne,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageTileSettings {
    pub tile_width: u32,
    pub tile_height: u32,
}

impl Default for ImageTileSettings {
    fn default() -> Self {
        Self {
            tile_width: DEFAULT_TILE_SIZE,
            tile_height: DEFAULT_TILE_SIZE,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TStackSettings {
    pub start_frame: i32,
    /// Exclusive; `None` means up to the last frame.
    pub end_frame: Option<i32>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZStackSettings {
    pub default_z_projection: ZProjection,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectImageSetup {
    pub series: u16,
    pub z_stack_handling: StackHandling,
    pub t_stack_handling: StackHandling,
    pub image_tile_settings: ImageTileSettings,
    pub t_stack_settings: TStackSettings,
    pub z_stack_settings: ZStackSettings,
}

impl Default for ProjectImageSetup {
    fn default() -> Self {
        Self {
            series: 0,
            z_stack_handling: StackHandling::ExactOne,
            t_stack_handling: StackHandling::EachOne,
            image_tile_settings: ImageTileSettings::default(),
            t_stack_settings: TStackSettings::default(),
            z_stack_settings: ZStackSettings::default(),
        }
    }
}
