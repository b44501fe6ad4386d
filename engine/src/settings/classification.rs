use serde::{Deserialize, Serialize};

use crate::enums::ClassId;
use crate::image::parse_hex_color;

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub class_id: ClassId,
    pub name: String,
    /// `#RRGGBB`
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub notes: String,
}

fn default_color() -> String {
    "#FFFFFF".to_string()
}

/// Human readable names and colours of the output classes.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    #[serde(default)]
    pub classes: Vec<ClassInfo>,
}

impl Classification {
    pub fn get(&self, class_id: ClassId) -> Option<&ClassInfo> {
        self.classes.iter().find(|c| c.class_id == class_id)
    }

    pub fn contains(&self, class_id: ClassId) -> bool {
        self.get(class_id).is_some()
    }

    pub fn name(&self, class_id: ClassId) -> String {
        self.get(class_id)
            .map_or_else(|| class_id.to_string(), |c| c.name.clone())
    }

    pub fn color(&self, class_id: ClassId) -> [u8; 3] {
        self.get(class_id)
            .map_or([255, 255, 255], |c| parse_hex_color(&c.color))
    }
}
