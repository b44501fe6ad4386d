use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::*;
use crate::commands::{Classifier, ClassifierClass, Command, Reclassify};
use crate::database::image_id;
use crate::enums::{ClassId, ClassIdIn, ImageValidity, ZProjection};
use crate::image::{Image, PlaneId};
use crate::initializer::init_pipeline;
use crate::object_list::ReclassifyMode;
use crate::ome::OmeInfo;
use crate::reader::{MemoryImageReader, MemoryStack, ReaderError, ReaderResult};
use crate::roi::BoundingBox;
use crate::settings::{Pipeline, PipelineSetup, PipelineStep, Plate};
use crate::test_utils::{block_image, detect_pipeline, detect_steps, Rig};

fn settings(working_directory: &Path, pipelines: Vec<Pipeline>) -> AnalyzeSettings {
    let mut settings = AnalyzeSettings {
        pipelines,
        ..Default::default()
    };
    settings.project_settings.working_directory = working_directory.to_string_lossy().into_owned();
    settings.project_settings.plates.push(Plate {
        plate_id: 1,
        image_folder: "/plate".to_string(),
        ..Default::default()
    });
    settings
}

fn block_reader(count: usize) -> MemoryImageReader {
    let reader = MemoryImageReader::new(0);
    for idx in 0..count {
        let plane = block_image(8, 8, (2, 2, 5, 5), 40000, PlaneId::new(0, 0, 0));
        reader.insert(format!("/plate/img_{idx:02}.tif"), MemoryStack::new(vec![plane]));
    }
    reader
}

fn serial(reader: Arc<dyn ImageReader>) -> Processor {
    Processor::new(reader).with_threading(ThreadingSettings::serial())
}

#[test]
fn single_channel_threshold_yields_one_object() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let processor = serial(Arc::new(block_reader(1)));
    let settings = settings(dir.path(), vec![detect_pipeline("nuclei", 0, ClassId::C0)]);

    let summary = processor.execute(&settings, "s1")?;
    assert_eq!(summary.state, JobState::Finished);
    assert!(summary.job_folder.starts_with(dir.path()));
    assert!(summary.job_folder.to_string_lossy().ends_with("_s1"));

    let db = Database::open(&summary.database_path)?;
    assert!(db.select_job().expect("job").time_finished.is_some());
    let id = image_id(1, Path::new("/plate/img_00.tif"));
    let objects = db.select_objects(id, ClassId::C0)?;
    assert_eq!(objects.len(), 1);
    let object = &objects[0];
    assert_eq!(object.bounding_box, BoundingBox::new(2, 2, 4, 4));
    assert_eq!(object.confidence, 1.0);
    let mask = object.mask().expect("mask");
    assert_eq!(mask.pixels().iter().filter(|p| **p).count(), 16);
    assert!(db.select_image(id).expect("image").processed);
    Ok(())
}

fn consumer(name: &str, own: ClassId, reads: ClassId) -> Pipeline {
    let step: Command = Reclassify {
        intersecting_class: ClassIdIn::Id(reads),
        ..Default::default()
    }
    .into();
    detect_pipeline(name, 0, own).with_steps([PipelineStep::new(step)])
}

#[test]
fn cycle_aborts_before_any_image_is_read() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let reader = Arc::new(block_reader(2));
    let processor = serial(Arc::clone(&reader) as Arc<dyn ImageReader>);
    let settings = settings(
        dir.path(),
        vec![consumer("A", ClassId::C0, ClassId::C1), consumer("B", ClassId::C1, ClassId::C0)],
    );

    let err = processor.execute(&settings, "cycle").unwrap_err();
    assert!(matches!(err, EngineError::Graph(GraphError::CycleDetected { .. })));
    assert_eq!(reader.load_count(), 0);
    assert_eq!(processor.progress().state(), JobState::FinishedWithError);
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 0);
    Ok(())
}

#[test]
fn z_max_projection_feeds_the_pipeline() -> anyhow::Result<()> {
    let planes = [5, 9, 3]
        .into_iter()
        .enumerate()
        .map(|(z, value)| Image::new_filled(4, 4, value, PlaneId::new(0, z as u32, 0)))
        .collect();
    let pipeline = Pipeline::new(
        "projected",
        PipelineSetup {
            z_projection: ZProjection::Max,
            ..Default::default()
        },
    );
    let rig = Rig::new(planes, vec![pipeline]);
    let iteration = rig.iteration();
    let image = init_pipeline(&rig.ctx(&iteration, 0))?;
    assert!(image.pixels().iter().all(|&v| v == 9));
    assert_eq!(rig.reader.load_count(), 3);
    Ok(())
}

/// Stops the job as soon as planes of a new image beyond `limit` are requested.
struct StoppingReader {
    inner: MemoryImageReader,
    limit: usize,
    seen: Mutex<BTreeSet<PathBuf>>,
    progress: OnceLock<Arc<JobProgress>>,
}

impl ImageReader for StoppingReader {
    fn ome_information(&self, path: &Path, series: u16) -> ReaderResult<OmeInfo> {
        self.inner.ome_information(path, series)
    }

    fn load_entire_image(&self, path: &Path, series: u16, plane: PlaneId) -> ReaderResult<Image> {
        let mut seen = self.seen.lock();
        if seen.insert(path.to_path_buf()) && seen.len() > self.limit {
            if let Some(progress) = self.progress.get() {
                progress.stop();
            }
        }
        drop(seen);
        self.inner.load_entire_image(path, series, plane)
    }

    fn list_images(&self, folder: &Path) -> ReaderResult<Vec<PathBuf>> {
        self.inner.list_images(folder)
    }
}

#[test]
fn stop_after_third_image_cancels_the_job() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let reader = Arc::new(StoppingReader {
        inner: block_reader(10),
        limit: 3,
        seen: Mutex::new(BTreeSet::new()),
        progress: OnceLock::new(),
    });
    let processor = serial(Arc::clone(&reader) as Arc<dyn ImageReader>);
    let _ = reader.progress.set(processor.progress());
    let settings = settings(dir.path(), vec![detect_pipeline("nuclei", 0, ClassId::C0)]);

    let summary = processor.execute(&settings, "cancel")?;
    assert_eq!(summary.state, JobState::Cancelled);
    let snapshot = processor.progress().snapshot();
    assert_eq!(snapshot.processed_images, 3);
    assert!(snapshot.started_images <= 4);

    let db = Database::open(&summary.database_path)?;
    assert!(db.select_job().expect("job").time_finished.is_none());
    assert_eq!(db.select_images().iter().filter(|i| i.processed).count(), 3);
    assert_eq!(db.total_object_count(), 3);
    Ok(())
}

#[test]
fn failing_step_marks_job_with_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let processor = serial(Arc::new(block_reader(2)));
    // Channel 3 does not exist.
    let settings = settings(dir.path(), vec![detect_pipeline("broken", 3, ClassId::C0)]);

    let summary = processor.execute(&settings, "broken")?;
    assert_eq!(summary.state, JobState::FinishedWithError);
    assert!(summary.error.is_some());
    assert_eq!(processor.progress().last_error(), summary.error);
    let db = Database::open(&summary.database_path)?;
    assert!(db.select_job().expect("job").time_finished.is_none());
    Ok(())
}

#[test]
fn processor_is_reusable_after_stop() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let processor = serial(Arc::new(block_reader(1)));
    let settings = settings(dir.path(), vec![detect_pipeline("nuclei", 0, ClassId::C0)]);

    let first = processor.execute(&settings, "first")?;
    assert_eq!((first.state, first.processed_images), (JobState::Finished, 1));
    processor.stop();
    for name in ["second", "third"] {
        let summary = processor.execute(&settings, name)?;
        assert_eq!(summary.state, JobState::Finished);
        assert_eq!(summary.processed_images, 1);
        assert!(summary.error.is_none());
    }
    Ok(())
}

/// `img_00` cannot be loaded; every other image waits for the stop flag first.
struct FailFirstReader {
    inner: MemoryImageReader,
    progress: OnceLock<Arc<JobProgress>>,
    saw_stop: AtomicBool,
}

impl ImageReader for FailFirstReader {
    fn ome_information(&self, path: &Path, series: u16) -> ReaderResult<OmeInfo> {
        self.inner.ome_information(path, series)
    }

    fn load_entire_image(&self, path: &Path, series: u16, plane: PlaneId) -> ReaderResult<Image> {
        if path.ends_with("img_00.tif") {
            return Err(ReaderError::NotFound(path.to_path_buf()));
        }
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if self.progress.get().is_some_and(|p| p.is_stopping()) {
                self.saw_stop.store(true, Ordering::SeqCst);
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        self.inner.load_entire_image(path, series, plane)
    }

    fn list_images(&self, folder: &Path) -> ReaderResult<Vec<PathBuf>> {
        self.inner.list_images(folder)
    }
}

#[test]
fn failing_image_stops_images_in_flight() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let reader = Arc::new(FailFirstReader {
        inner: block_reader(2),
        progress: OnceLock::new(),
        saw_stop: AtomicBool::new(false),
    });
    let processor = Processor::new(Arc::clone(&reader) as Arc<dyn ImageReader>).with_threading(
        ThreadingSettings {
            images: 2,
            ..ThreadingSettings::serial()
        },
    );
    let _ = reader.progress.set(processor.progress());
    let settings = settings(dir.path(), vec![detect_pipeline("nuclei", 0, ClassId::C0)]);

    let summary = processor.execute(&settings, "parallel")?;
    assert_eq!(summary.state, JobState::FinishedWithError);
    assert!(summary.error.as_deref().is_some_and(|e| e.contains("nuclei")));
    assert!(reader.saw_stop.load(Ordering::SeqCst));
    assert_eq!(summary.processed_images, 0);

    let db = Database::open(&summary.database_path)?;
    assert!(db.select_images().iter().all(|i| !i.processed));
    assert_eq!(db.total_object_count(), 0);
    Ok(())
}

#[test]
fn unreadable_image_is_recorded_and_skipped() -> anyhow::Result<()> {
    struct Unreadable(MemoryImageReader);
    impl ImageReader for Unreadable {
        fn ome_information(&self, path: &Path, series: u16) -> ReaderResult<OmeInfo> {
            self.0.ome_information(path, if path.ends_with("img_00.tif") { 7 } else { series })
        }
        fn load_entire_image(
            &self,
            path: &Path,
            series: u16,
            plane: PlaneId,
        ) -> ReaderResult<Image> {
            self.0.load_entire_image(path, series, plane)
        }
        fn list_images(&self, folder: &Path) -> ReaderResult<Vec<PathBuf>> {
            self.0.list_images(folder)
        }
    }

    let dir = tempfile::tempdir()?;
    let processor = serial(Arc::new(Unreadable(block_reader(2))));
    let settings = settings(dir.path(), vec![detect_pipeline("nuclei", 0, ClassId::C0)]);
    let summary = processor.execute(&settings, "skip")?;
    assert_eq!(summary.state, JobState::Finished);

    let db = Database::open(&summary.database_path)?;
    let invalid = db.select_image(image_id(1, Path::new("/plate/img_00.tif"))).expect("image");
    assert_eq!(invalid.validity, ImageValidity::InvalidImage.bit());
    assert!(!invalid.processed);
    assert_eq!(db.total_object_count(), 1);
    Ok(())
}

#[test]
fn iteration_leaves_no_temporary_objects_or_cache_entries() -> anyhow::Result<()> {
    let mut steps = detect_steps(20000);
    steps.insert(
        1,
        PipelineStep::new(
            Classifier {
                model_classes: vec![ClassifierClass {
                    output_class_no_match: ClassIdIn::Id(ClassId::TEMP_01),
                    ..Default::default()
                }],
            }
            .into(),
        ),
    );
    let pipeline = Pipeline::new("scratch", PipelineSetup::default()).with_steps(steps);
    let plane = block_image(8, 8, (1, 1, 3, 3), 40000, PlaneId::new(0, 0, 0));
    let rig = Rig::new(vec![plane], vec![pipeline]);

    let iteration = rig.iteration();
    let objects = rig.run(&iteration)?;
    assert_eq!(objects.count(ClassId::TEMP_01), 0);
    assert_eq!(objects.count(ClassId::C0), 1);
    assert!(iteration.cache.is_empty());
    Ok(())
}

#[test]
fn later_wave_sees_earlier_objects() -> anyhow::Result<()> {
    let nuclei = block_image(24, 24, (0, 0, 9, 9), 40000, PlaneId::new(0, 0, 0));
    let mut spots = Image::new_blank(24, 24, PlaneId::new(0, 0, 1));
    for (x, y) in [(1, 1), (5, 5), (20, 20)] {
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            spots.set(x + dx, y + dy, 40000);
        }
    }
    let keep: Command = Reclassify {
        mode: ReclassifyMode::KeepIntersecting,
        intersecting_class: ClassIdIn::Id(ClassId::C0),
        ..Default::default()
    }
    .into();
    let pipelines = vec![
        detect_pipeline("spots", 1, ClassId::C1).with_steps([PipelineStep::new(keep)]),
        detect_pipeline("nuclei", 0, ClassId::C0),
    ];
    let graph = DependencyGraph::build(&pipelines)?;
    assert_eq!(graph.waves(), &[vec![1], vec![0]]);

    let rig = Rig::new(vec![nuclei, spots], pipelines);
    let objects = rig.run(&rig.iteration())?;
    assert_eq!(objects.count(ClassId::C0), 1);
    assert_eq!(objects.count(ClassId::C1), 2);
    Ok(())
}

#[test]
fn parallel_waves_match_serial_run() -> anyhow::Result<()> {
    let planes: Vec<Image> = (0..3)
        .map(|c| block_image(16, 16, (c, c, c + 4, c + 4), 40000, PlaneId::new(0, 0, c as u32)))
        .collect();
    let pipelines: Vec<Pipeline> = (0..3)
        .map(|c| detect_pipeline(&format!("p{c}"), c, ClassId::user(c as u16)))
        .collect();
    let rig = Rig::new(planes, pipelines);
    let graph = DependencyGraph::build(&rig.job.settings.pipelines)?;
    let store = crate::database::PreviewDatabase::new();

    let serial = run_iteration(
        &rig.job,
        &rig.image,
        &rig.iteration(),
        &graph,
        &store,
        1,
        &Unobserved,
    )?;
    let parallel = run_iteration(
        &rig.job,
        &rig.image,
        &rig.iteration(),
        &graph,
        &store,
        3,
        &Unobserved,
    )?;
    assert_eq!(serial.class_counts(), parallel.class_counts());
    for class_id in serial.class_ids() {
        let a: Vec<_> = serial.class(class_id).iter().map(|r| r.bounding_box()).collect();
        let b: Vec<_> = parallel.class(class_id).iter().map(|r| r.bounding_box()).collect();
        assert_eq!(a, b);
    }
    Ok(())
}
