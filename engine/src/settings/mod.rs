//! Job configuration: project, image setup and pipelines.
//!
//! Everything is plain serde data with camelCase keys. Projects are stored
//! as `.icproj`, single pipelines as `.ictpl` templates.

mod classification;
mod filters;
mod parser_log;
mod pipeline;
mod project;

#[cfg(test)]
mod tests;

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use common::FileExtensionError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::grouping::FilenameGrouper;
use crate::dependency_graph::DependencyGraph;
use crate::enums::ClassId;

pub use classification::{ClassInfo, Classification};
pub use filters::{IntensityFilter, IntensityMode, MetricsFilter, ObjectFilter};
pub use parser_log::{SettingParserLog, SettingParserLogEntry, Severity};
pub use pipeline::{
    HistoryCategory, HistoryEntry, ImageSource, Pipeline, PipelineMeta, PipelineSetup,
    PipelineStep, TEMPLATE_EXTENSION,
};
pub use project::{
    Address, ExperimentSettings, GroupBy, ImageTileSettings, Plate, PlateSetup,
    ProjectImageSetup, ProjectSettings, StackHandling, TStackSettings, ZStackSettings,
    DEFAULT_FILENAME_REGEX,
};

pub const PROJECT_EXTENSION: &str = "icproj";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid JSON in '{path}': {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Extension(#[from] FileExtensionError),
    #[error("Settings contain {} error(s): {}", .0.len(), .0.join("; "))]
    Invalid(Vec<String>),
}

pub type SettingsResult<T> = Result<T, SettingsError>;

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> SettingsResult<T> {
    let text = fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| SettingsError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> SettingsResult<()> {
    let text = common::to_json_pretty(value).map_err(|source| SettingsError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, text).map_err(|source| SettingsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// The whole job configuration.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzeSettings {
    pub project_settings: ProjectSettings,
    pub image_setup: ProjectImageSetup,
    pub pipelines: Vec<Pipeline>,
}

impl AnalyzeSettings {
    pub fn load(path: &Path) -> SettingsResult<AnalyzeSettings> {
        common::expect_extension(path, &[PROJECT_EXTENSION])?;
        read_json(path)
    }

    pub fn save(&self, path: &Path) -> SettingsResult<()> {
        common::expect_extension(path, &[PROJECT_EXTENSION])?;
        write_json(path, self)
    }

    pub fn from_json(text: &str) -> Result<AnalyzeSettings, serde_json::Error> {
        common::from_json(text)
    }

    pub fn classification(&self) -> &Classification {
        &self.project_settings.classification
    }

    /// Classes written by any pipeline, temporary ones excluded.
    pub fn output_classes(&self) -> BTreeSet<ClassId> {
        self.pipelines
            .iter()
            .flat_map(Pipeline::output_classes)
            .filter(|c| !c.is_temporary())
            .collect()
    }

    /// Semantic validation. Entries with [`Severity::Error`] prevent a run.
    pub fn check_for_errors(&self) -> SettingParserLog {
        let mut log = SettingParserLog::new();
        let tiles = self.image_setup.image_tile_settings;
        if tiles.tile_width == 0 || tiles.tile_height == 0 {
            log.error("Image setup", "Tile width and height must be greater than zero");
        }
        if self.pipelines.is_empty() {
            log.error("Project", "No pipeline configured");
        }

        for plate in &self.project_settings.plates {
            if plate.group_by == GroupBy::Filename {
                if let Err(err) = FilenameGrouper::new(&plate.filename_regex) {
                    log.error(format!("Plate {}", plate.plate_id), err.to_string());
                }
            }
        }

        let classification = self.classification();
        let produced: BTreeSet<ClassId> = self
            .pipelines
            .iter()
            .flat_map(Pipeline::output_classes)
            .collect();

        for pipeline in &self.pipelines {
            let name = pipeline.meta.name.as_str();
            if pipeline.pipeline_steps.is_empty() {
                log.warning(name, "Pipeline has no steps");
            }
            for step in pipeline.pipeline_steps.iter().filter(|s| !s.disabled) {
                step.command.check(&mut log, name);
            }
            for class_id in pipeline.output_classes().iter().chain(&pipeline.input_classes()) {
                if class_id.is_user()
                    && !classification.classes.is_empty()
                    && !classification.contains(*class_id)
                {
                    log.error(name, format!("Class {class_id} is not part of the classification"));
                }
            }
            for class_id in pipeline.input_classes() {
                if !class_id.is_temporary() && !produced.contains(&class_id) {
                    log.warning(
                        name,
                        format!("Input class {class_id} is not produced by any pipeline"),
                    );
                }
            }
        }

        if let Err(err) = DependencyGraph::build(&self.pipelines) {
            log.error("Pipelines", err.to_string());
        }
        log
    }

    /// Fails with all error entries of [`Self::check_for_errors`].
    pub fn validate(&self) -> SettingsResult<SettingParserLog> {
        let log = self.check_for_errors();
        if log.has_errors() {
            return Err(SettingsError::Invalid(
                log.errors().map(ToString::to_string).collect(),
            ));
        }
        Ok(log)
    }
}
