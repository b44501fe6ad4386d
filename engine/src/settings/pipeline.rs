use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{read_json, write_json, SettingsResult};
use crate::commands::Command;
use crate::enums::{CacheSlot, ClassId, ClassIdIn, ZProjection};

pub const TEMPLATE_EXTENSION: &str = "ictpl";

#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineMeta {
    pub name: String,
    pub notes: String,
    pub uid: String,
    pub color: String,
    pub revision: String,
    pub tags: Vec<String>,
}

/// Where the iteration-initial image of a pipeline comes from.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageSource {
    #[default]
    FromFile,
    /// Black image of the tile size.
    Blank,
    /// Memory slot filled by an earlier pipeline of the same iteration.
    FromCache,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineSetup {
    pub c_stack_index: u32,
    /// Used when `z_projection` is `NONE` and Z stacks are not iterated.
    pub z_stack_index: u32,
    /// Used when T stacks are not iterated.
    pub t_stack_index: u32,
    pub z_projection: ZProjection,
    pub default_class_id: ClassId,
    pub source: ImageSource,
    /// Slot read when `source` is `FROM_CACHE`.
    pub cache_slot: Option<CacheSlot>,
}

impl Default for PipelineSetup {
    fn default() -> Self {
        Self {
            c_stack_index: 0,
            z_stack_index: 0,
            t_stack_index: 0,
            z_projection: ZProjection::None,
            default_class_id: ClassId::C0,
            source: ImageSource::FromFile,
            cache_slot: None,
        }
    }
}

/// One configured command. The command is stored under its `$name` key.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub locked: bool,
    /// Preview snapshots the image after this step.
    #[serde(default)]
    pub breakpoint: bool,
    #[serde(flatten)]
    pub command: Command,
}

impl PipelineStep {
    pub fn new(command: Command) -> Self {
        Self {
            disabled: false,
            locked: false,
            breakpoint: false,
            command,
        }
    }
}

impl From<Command> for PipelineStep {
    fn from(command: Command) -> Self {
        PipelineStep::new(command)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryCategory {
    Added,
    Changed,
    Deleted,
    Saved,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub category: HistoryCategory,
    pub message: String,
    #[serde(default)]
    pub tag_message: String,
    pub timestamp: DateTime<Utc>,
    /// Steps as they were after the change.
    pub snapshot: Vec<PipelineStep>,
}

#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Pipeline {
    pub meta: PipelineMeta,
    pub pipeline_setup: PipelineSetup,
    pub pipeline_steps: Vec<PipelineStep>,
    pub history: Vec<HistoryEntry>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, setup: PipelineSetup) -> Self {
        Self {
            meta: PipelineMeta {
                name: name.into(),
                ..Default::default()
            },
            pipeline_setup: setup,
            ..Default::default()
        }
    }

    pub fn with_steps(mut self, steps: impl IntoIterator<Item = PipelineStep>) -> Self {
        self.pipeline_steps.extend(steps);
        self
    }

    pub fn default_class_id(&self) -> ClassId {
        self.pipeline_setup.default_class_id
    }

    fn enabled_commands(&self) -> impl Iterator<Item = &Command> {
        self.pipeline_steps
            .iter()
            .filter(|step| !step.disabled)
            .map(|step| &step.command)
    }

    fn resolve_all(&self, classes: impl Iterator<Item = ClassIdIn>) -> BTreeSet<ClassId> {
        let default_class = self.default_class_id();
        classes.map(|c| c.resolve(default_class)).collect()
    }

    /// Classes the enabled steps read, resolved against the default class.
    pub fn input_classes(&self) -> BTreeSet<ClassId> {
        self.resolve_all(self.enabled_commands().flat_map(Command::input_classes))
    }

    /// Classes the enabled steps write, resolved against the default class.
    pub fn output_classes(&self) -> BTreeSet<ClassId> {
        self.resolve_all(self.enabled_commands().flat_map(Command::output_classes))
    }

    pub fn input_image_cache(&self) -> BTreeSet<CacheSlot> {
        let mut slots: BTreeSet<CacheSlot> = self
            .enabled_commands()
            .flat_map(Command::input_image_cache)
            .collect();
        if self.pipeline_setup.source == ImageSource::FromCache {
            slots.extend(self.pipeline_setup.cache_slot);
        }
        slots
    }

    pub fn output_image_cache(&self) -> BTreeSet<CacheSlot> {
        self.enabled_commands()
            .flat_map(Command::output_image_cache)
            .collect()
    }

    // === History ===

    /// Appends a history entry holding the current steps.
    pub fn create_snapshot(&mut self, category: HistoryCategory, message: impl Into<String>) {
        self.history.push(HistoryEntry {
            category,
            message: message.into(),
            tag_message: String::new(),
            timestamp: Utc::now(),
            snapshot: self.pipeline_steps.clone(),
        });
    }

    pub fn add_step(&mut self, step: PipelineStep) {
        let name = step.command.name();
        self.pipeline_steps.push(step);
        self.create_snapshot(HistoryCategory::Added, format!("Added: {name}"));
    }

    pub fn remove_step(&mut self, idx: usize) -> Option<PipelineStep> {
        if idx >= self.pipeline_steps.len() {
            return None;
        }
        let step = self.pipeline_steps.remove(idx);
        self.create_snapshot(HistoryCategory::Deleted, format!("Removed: {}", step.command.name()));
        Some(step)
    }

    pub fn tag_history(&mut self, idx: usize, tag: impl Into<String>) -> bool {
        match self.history.get_mut(idx) {
            Some(entry) => {
                entry.tag_message = tag.into();
                true
            }
            None => false,
        }
    }

    /// Restores the steps recorded at history entry `idx`. The restore itself
    /// is logged, earlier entries are never removed.
    pub fn undo_to(&mut self, idx: usize) -> bool {
        let Some(entry) = self.history.get(idx) else {
            return false;
        };
        self.pipeline_steps = entry.snapshot.clone();
        let message = format!("Restored: {}", entry.message);
        self.create_snapshot(HistoryCategory::Changed, message);
        true
    }

    // === Templates ===

    pub fn load_template(path: &Path) -> SettingsResult<Pipeline> {
        common::expect_extension(path, &[TEMPLATE_EXTENSION])?;
        read_json(path)
    }

    pub fn save_template(&mut self, path: &Path) -> SettingsResult<()> {
        common::expect_extension(path, &[TEMPLATE_EXTENSION])?;
        self.create_snapshot(HistoryCategory::Saved, "Saved");
        write_json(path, self)
    }
}
