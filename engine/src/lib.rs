//! Pipeline execution engine for multi-dimensional fluorescence microscopy.
//!
//! A job reads every image of every plate, runs the configured pipelines per
//! tile and `(t, z)` plane and writes the detected objects into a per-job
//! result store.
//!
//! ```rust,ignore
//! use engine::{AnalyzeSettings, FileImageReader, Processor};
//!
//! let settings = AnalyzeSettings::load(Path::new("project.icproj"))?;
//! let processor = Processor::new(Arc::new(FileImageReader::new(0)));
//! let summary = processor.execute(&settings, "run-1")?;
//! println!("{:?}: {} images", summary.state, summary.processed_images);
//! ```

pub mod cache;
pub mod commands;
pub mod context;
pub mod database;
pub mod dependency_graph;
pub mod enums;
pub mod image;
pub mod initializer;
pub mod object_list;
pub mod ome;
pub mod predictor;
pub mod preview;
pub mod processor;
pub mod reader;
pub mod roi;
pub mod settings;

#[cfg(test)]
mod test_utils;

pub use database::{Database, PreviewDatabase, ResultStore};
pub use dependency_graph::DependencyGraph;
pub use enums::{ClassId, ClassIdIn, ImageValidity, ZProjection};
pub use image::{Image, PlaneId};
pub use preview::{Preview, PreviewError, PreviewRequest, Previewer};
pub use processor::{EngineError, JobProgress, JobState, JobSummary, Processor, ThreadingSettings};
pub use reader::{FileImageReader, ImageReader, MemoryImageReader};
pub use settings::AnalyzeSettings;
