//! Result store of a job.
//!
//! Metadata tables are small and live in memory while the job runs. Objects
//! are appended as one Arrow record batch per finished iteration to a journal
//! file next to the store. [`Database::flush`] merges the journal into the
//! object table, sorts it by `(plate, group, image, channel)` and writes every
//! table as an Arrow IPC stream into a single `.icdb` file, which
//! [`Database::open`] reads back together with any journal a crashed job left.

pub mod grouping;
mod schema;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use common::fnv::stable_hash;
use common::FileExtensionError;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::ImageContext;
use crate::enums::{ClassId, ImageValidity};
use crate::image::PlaneId;
use crate::object_list::ObjectList;
use crate::ome::{OmeInfo, PlaneInfo};
use crate::reader::{ImageReader, ReaderError};
use crate::roi::geometry::pack_mask;
use crate::roi::{BoundingBox, MeasurementKey, ObjectRef, Point};
use crate::settings::{AnalyzeSettings, ClassInfo, Plate};

use grouping::{FileGrouper, GroupInfo, GroupingError};

common::id_type!(JobId);

pub const DATABASE_EXTENSION: &str = "icdb";
pub const DATABASE_FILE_NAME: &str = "results.icdb";
pub const JOURNAL_EXTENSION: &str = "icdb.objects";

/// Object journal of the store at `path`.
pub fn journal_path(path: &Path) -> PathBuf {
    path.with_extension(JOURNAL_EXTENSION)
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Arrow(#[from] ArrowError),
    #[error("Corrupt result file: {0}")]
    Format(String),
    #[error("Image {0} is not part of the job")]
    UnknownImage(u64),
    #[error("No job started")]
    NoJob,
    #[error(transparent)]
    Grouping(#[from] GroupingError),
    #[error(transparent)]
    Extension(#[from] FileExtensionError),
    #[error("Settings could not be serialized: {0}")]
    Json(#[from] serde_json::Error),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;

#[derive(Clone, PartialEq, Debug)]
pub struct JobRecord {
    pub job_id: JobId,
    pub job_name: String,
    pub experiment_id: String,
    pub experiment_name: String,
    pub time_started: DateTime<Utc>,
    /// Set once the job is sealed.
    pub time_finished: Option<DateTime<Utc>>,
    /// Project settings the job ran with, as JSON.
    pub settings: String,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PlateRecord {
    pub plate_id: u8,
    pub name: String,
    pub notes: String,
    pub rows: u16,
    pub cols: u16,
    pub image_folder: String,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GroupRecord {
    pub plate_id: u8,
    pub group_id: u16,
    pub name: String,
    pub well_pos_x: u16,
    pub well_pos_y: u16,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ImageRecord {
    pub image_id: u64,
    pub plate_id: u8,
    pub group_id: u16,
    pub image_idx: u32,
    pub file_name: String,
    pub path: String,
    pub width: u32,
    pub height: u32,
    pub nr_of_channels: u32,
    pub nr_of_z_stacks: u32,
    pub nr_of_t_stacks: u32,
    /// [`ImageValidity::bit`] flags.
    pub validity: u32,
    pub processed: bool,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChannelRecord {
    pub image_id: u64,
    pub channel_id: u32,
    pub name: String,
}

#[derive(Clone, PartialEq, Debug)]
pub struct PlaneRecord {
    pub image_id: u64,
    pub plane: PlaneId,
    pub validity: u32,
    pub time_offset_ms: Option<f64>,
    pub exposure_time_ms: Option<f64>,
}

/// One persisted object.
#[derive(Clone, PartialEq, Debug)]
pub struct ObjectRecord {
    pub plate_id: u8,
    pub group_id: u16,
    pub image_id: u64,
    pub object_id: u64,
    pub tile_id: u32,
    pub plane: PlaneId,
    pub class_id: ClassId,
    pub confidence: f32,
    /// In plane coordinates.
    pub bounding_box: BoundingBox,
    /// Relative to the bounding box origin.
    pub contour: Vec<Point>,
    /// Mask packed with [`pack_mask`], sized like the bounding box.
    pub mask: Vec<u8>,
    pub origin_object_id: Option<u64>,
    pub parent: Option<ObjectRef>,
    pub measurements: BTreeMap<MeasurementKey, f64>,
}

impl ObjectRecord {
    pub fn mask(&self) -> Option<common::buffer2::Buffer2<bool>> {
        crate::roi::geometry::unpack_mask(
            &self.mask,
            self.bounding_box.width.max(0) as usize,
            self.bounding_box.height.max(0) as usize,
        )
    }
}

/// Image file readied for processing.
#[derive(Debug)]
pub struct PreparedImage {
    pub path: PathBuf,
    pub image_id: u64,
    pub group: GroupInfo,
    pub ome: Result<OmeInfo, ReaderError>,
}

/// Stable id of an image file of a plate.
pub fn image_id(plate_id: u8, path: &Path) -> u64 {
    stable_hash(&(plate_id, path.to_string_lossy()))
}

/// What the processor writes while iterating.
pub trait ResultStore: Send + Sync {
    /// Appends every non-temporary object of one iteration. Returns the number written.
    fn insert_objects(&self, image: &ImageContext, objects: &ObjectList) -> DatabaseResult<usize>;

    /// ORs `validity` ([`ImageValidity::bit`] flags) into the image.
    fn set_image_validity(&self, image_id: u64, validity: u32) -> DatabaseResult<()>;

    fn set_image_plane_validity(
        &self,
        image_id: u64,
        plane: PlaneId,
        validity: u32,
    ) -> DatabaseResult<()>;
}

#[derive(Debug, Default)]
struct Tables {
    job: Option<JobRecord>,
    plates: BTreeMap<u8, PlateRecord>,
    groups: BTreeMap<(u8, u16), GroupRecord>,
    images: BTreeMap<u64, ImageRecord>,
    channels: BTreeMap<(u64, u32), ChannelRecord>,
    planes: BTreeMap<(u64, PlaneId), PlaneRecord>,
    classes: BTreeMap<ClassId, ClassInfo>,
    /// Flushed objects, plus every object of a store without a file.
    objects: Vec<RecordBatch>,
    /// `objects` is a single batch in storage order.
    objects_sorted: bool,
}

impl Tables {
    fn image_mut(&mut self, image_id: u64) -> DatabaseResult<&mut ImageRecord> {
        self.images
            .get_mut(&image_id)
            .ok_or(DatabaseError::UnknownImage(image_id))
    }
}

/// Results of one job.
#[derive(Debug)]
pub struct Database {
    path: Option<PathBuf>,
    tables: Mutex<Tables>,
    /// Opened by the first insert after a flush. Lock after `tables`.
    journal: Mutex<Option<schema::ObjectJournal>>,
}

impl Database {
    /// Store persisted to `path` (`.icdb`) on flush.
    pub fn create(path: impl Into<PathBuf>) -> DatabaseResult<Database> {
        let path = path.into();
        common::expect_extension(&path, &[DATABASE_EXTENSION])?;
        Ok(Database {
            path: Some(path),
            tables: Mutex::new(Tables::default()),
            journal: Mutex::new(None),
        })
    }

    /// Store without a backing file.
    pub fn in_memory() -> Database {
        Database {
            path: None,
            tables: Mutex::new(Tables::default()),
            journal: Mutex::new(None),
        }
    }

    /// Reads a persisted store. Later flushes write back to the same file.
    pub fn open(path: &Path) -> DatabaseResult<Database> {
        common::expect_extension(path, &[DATABASE_EXTENSION])?;
        let mut container = schema::read_container(path)?;
        let mut take = |name: &str| container.remove(name).unwrap_or_default();

        let mut loaded = Tables::default();
        for batch in take(schema::JOB) {
            loaded.job = schema::decode_jobs(&batch)?.into_iter().next();
        }
        for batch in take(schema::PLATE) {
            loaded
                .plates
                .extend(schema::decode_plates(&batch)?.into_iter().map(|p| (p.plate_id, p)));
        }
        for batch in take(schema::GROUP) {
            loaded.groups.extend(
                schema::decode_groups(&batch)?
                    .into_iter()
                    .map(|g| ((g.plate_id, g.group_id), g)),
            );
        }
        for batch in take(schema::IMAGE) {
            loaded
                .images
                .extend(schema::decode_images(&batch)?.into_iter().map(|i| (i.image_id, i)));
        }
        for batch in take(schema::CHANNEL) {
            loaded.channels.extend(
                schema::decode_channels(&batch)?
                    .into_iter()
                    .map(|c| ((c.image_id, c.channel_id), c)),
            );
        }
        for batch in take(schema::IMAGE_PLANE) {
            loaded.planes.extend(
                schema::decode_planes(&batch)?
                    .into_iter()
                    .map(|p| ((p.image_id, p.plane), p)),
            );
        }
        for batch in take(schema::CLASS) {
            loaded
                .classes
                .extend(schema::decode_classes(&batch)?.into_iter().map(|c| (c.class_id, c)));
        }
        loaded.objects = take(schema::OBJECT)
            .into_iter()
            .filter(|b| b.num_rows() > 0)
            .collect();
        let recovered = schema::read_journal(&journal_path(path))?;
        loaded.objects_sorted = recovered.is_empty();
        if !recovered.is_empty() {
            warn!(batches = recovered.len(), "Recovered unflushed objects of '{}'", path.display());
            loaded.objects.extend(recovered);
        }
        debug!("Opened result file {}", path.display());

        Ok(Database {
            path: Some(path.to_path_buf()),
            tables: Mutex::new(loaded),
            journal: Mutex::new(None),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // === Job ===

    /// Registers the job with its plates and classes.
    pub fn start_job(&self, settings: &AnalyzeSettings, job_name: &str) -> DatabaseResult<JobId> {
        let job_id = JobId::unique();
        let experiment = &settings.project_settings.experiment_settings;
        let record = JobRecord {
            job_id,
            job_name: job_name.to_string(),
            experiment_id: experiment.experiment_id.clone(),
            experiment_name: experiment.experiment_name.clone(),
            time_started: Utc::now(),
            time_finished: None,
            settings: serde_json::to_string(settings)?,
        };

        let mut tables = self.tables.lock();
        tables.job = Some(record);
        for plate in &settings.project_settings.plates {
            tables.plates.insert(
                plate.plate_id,
                PlateRecord {
                    plate_id: plate.plate_id,
                    name: plate.name.clone(),
                    notes: plate.notes.clone(),
                    rows: plate.plate_setup.rows,
                    cols: plate.plate_setup.cols,
                    image_folder: plate.image_folder.clone(),
                },
            );
        }
        for class in &settings.classification().classes {
            tables.classes.insert(class.class_id, class.clone());
        }
        drop(tables);
        // The job record is on disk before the first journaled object.
        self.flush()?;
        info!(%job_id, job_name, "Job started");
        Ok(job_id)
    }

    /// Seals the job and writes the result file.
    pub fn finish_job(&self, job_id: JobId) -> DatabaseResult<()> {
        {
            let mut tables = self.tables.lock();
            let job = tables
                .job
                .as_mut()
                .filter(|j| j.job_id == job_id)
                .ok_or(DatabaseError::NoJob)?;
            job.time_finished = Some(Utc::now());
        }
        self.flush()?;
        info!(%job_id, "Job finished");
        Ok(())
    }

    /// Reads the descriptor of every file and assigns wells.
    ///
    /// Descriptors are read in parallel on at most `threads` workers; wells
    /// are assigned afterwards in the order of `paths`.
    pub fn prepare_images(
        &self,
        plate: &Plate,
        series: u16,
        paths: &[PathBuf],
        reader: &dyn ImageReader,
        threads: usize,
    ) -> DatabaseResult<Vec<PreparedImage>> {
        let mut grouper = FileGrouper::new(plate.group_by, &plate.filename_regex)?;
        let omes = common::parallel::par_map_limited(paths, threads.max(1), |path| {
            reader.ome_information(path, series)
        });

        let prepared: Vec<PreparedImage> = paths
            .iter()
            .zip(omes)
            .map(|(path, ome)| {
                if let Err(err) = &ome {
                    warn!("Image '{}' can not be read: {err}", path.display());
                }
                PreparedImage {
                    path: path.clone(),
                    image_id: image_id(plate.plate_id, path),
                    group: grouper.group_of(path),
                    ome,
                }
            })
            .collect();
        debug!(plate = plate.plate_id, images = prepared.len(), "Images prepared");
        Ok(prepared)
    }

    // === Metadata ===

    pub fn insert_group(&self, plate_id: u8, group: &GroupInfo) {
        self.tables
            .lock()
            .groups
            .entry((plate_id, group.group_id))
            .or_insert_with(|| GroupRecord {
                plate_id,
                group_id: group.group_id,
                name: group.group_name.clone(),
                well_pos_x: group.well_pos_x,
                well_pos_y: group.well_pos_y,
            });
    }

    pub fn insert_image(&self, image: &ImageContext, group: &GroupInfo) {
        let ome = &image.ome;
        let record = ImageRecord {
            image_id: image.image_id,
            plate_id: image.plate_id,
            group_id: group.group_id,
            image_idx: group.image_idx,
            file_name: file_name(&image.path),
            path: image.path.to_string_lossy().into_owned(),
            width: image.plan.image_width,
            height: image.plan.image_height,
            nr_of_channels: ome.nr_of_channels(image.series),
            nr_of_z_stacks: ome.nr_of_z_stack(image.series),
            nr_of_t_stacks: ome.nr_of_t_stack(image.series),
            validity: 0,
            processed: false,
        };
        let mut tables = self.tables.lock();
        let validity = tables.images.get(&image.image_id).map_or(0, |i| i.validity);
        tables.images.insert(image.image_id, ImageRecord { validity, ..record });
    }

    /// Records an image whose descriptor could not be read.
    pub fn insert_invalid_image(
        &self,
        plate_id: u8,
        image_id: u64,
        path: &Path,
        group: &GroupInfo,
    ) {
        self.tables.lock().images.insert(
            image_id,
            ImageRecord {
                image_id,
                plate_id,
                group_id: group.group_id,
                image_idx: group.image_idx,
                file_name: file_name(path),
                path: path.to_string_lossy().into_owned(),
                width: 0,
                height: 0,
                nr_of_channels: 0,
                nr_of_z_stacks: 0,
                nr_of_t_stacks: 0,
                validity: ImageValidity::InvalidImage.bit(),
                processed: false,
            },
        );
    }

    pub fn insert_image_to_group(
        &self,
        plate_id: u8,
        image_id: u64,
        image_idx: u32,
        group: &GroupInfo,
    ) -> DatabaseResult<()> {
        self.insert_group(plate_id, group);
        let mut tables = self.tables.lock();
        let image = tables.image_mut(image_id)?;
        image.plate_id = plate_id;
        image.group_id = group.group_id;
        image.image_idx = image_idx;
        Ok(())
    }

    pub fn insert_image_channels(&self, image_id: u64, ome: &OmeInfo, series: u16) {
        let mut tables = self.tables.lock();
        for (c, channel) in ome.channel_infos(series).iter().enumerate() {
            let channel_id = c as u32;
            tables.channels.insert(
                (image_id, channel_id),
                ChannelRecord {
                    image_id,
                    channel_id,
                    name: channel.name.clone(),
                },
            );
        }
    }

    pub fn insert_image_plane(&self, image_id: u64, plane: PlaneId, info: Option<&PlaneInfo>) {
        let mut tables = self.tables.lock();
        let record = tables.planes.entry((image_id, plane)).or_insert_with(|| PlaneRecord {
            image_id,
            plane,
            validity: 0,
            time_offset_ms: None,
            exposure_time_ms: None,
        });
        if let Some(info) = info {
            record.time_offset_ms = info.time_offset_ms;
            record.exposure_time_ms = info.exposure_time_ms;
        }
    }

    pub fn set_image_processed(&self, image_id: u64) -> DatabaseResult<()> {
        self.tables.lock().image_mut(image_id)?.processed = true;
        Ok(())
    }

    // === Persistence ===

    /// Merges journaled object batches and writes the result file, if any.
    ///
    /// The journal is removed once the file is written; on error nothing changes.
    pub fn flush(&self) -> DatabaseResult<()> {
        let mut tables = self.tables.lock();
        let mut journal = self.journal.lock();

        let mut batches = tables.objects.clone();
        if let Some(open) = journal.as_ref() {
            batches.extend(schema::read_journal(open.path())?);
        }
        let objects = match batches.as_slice() {
            [single] if tables.objects_sorted && journal.is_none() => single.clone(),
            batches => schema::merge_object_batches(batches)?,
        };

        if let Some(path) = &self.path {
            let written = [
                (schema::JOB, schema::encode_jobs(tables.job.iter())?),
                (schema::PLATE, schema::encode_plates(tables.plates.values())?),
                (schema::GROUP, schema::encode_groups(tables.groups.values())?),
                (schema::IMAGE, schema::encode_images(tables.images.values())?),
                (schema::CHANNEL, schema::encode_channels(tables.channels.values())?),
                (schema::IMAGE_PLANE, schema::encode_planes(tables.planes.values())?),
                (schema::CLASS, schema::encode_classes(tables.classes.values())?),
                (schema::OBJECT, objects.clone()),
            ];
            schema::write_container(path, &written)?;
            *journal = None;
            schema::remove_journal(&journal_path(path))?;
            debug!(objects = objects.num_rows(), "Results written to {}", path.display());
        }

        tables.objects = if objects.num_rows() > 0 { vec![objects] } else { Vec::new() };
        tables.objects_sorted = true;
        Ok(())
    }

    /// Flushed batches followed by the ones journaled since.
    fn object_batches(&self) -> DatabaseResult<Vec<RecordBatch>> {
        let mut batches = self.tables.lock().objects.clone();
        if let Some(open) = self.journal.lock().as_ref() {
            batches.extend(schema::read_journal(open.path())?);
        }
        Ok(batches)
    }

    // === Queries ===

    pub fn select_job(&self) -> Option<JobRecord> {
        self.tables.lock().job.clone()
    }

    pub fn select_plates(&self) -> Vec<PlateRecord> {
        self.tables.lock().plates.values().cloned().collect()
    }

    pub fn select_groups(&self, plate_id: u8) -> Vec<GroupRecord> {
        self.tables
            .lock()
            .groups
            .values()
            .filter(|g| g.plate_id == plate_id)
            .cloned()
            .collect()
    }

    pub fn select_images(&self) -> Vec<ImageRecord> {
        self.tables.lock().images.values().cloned().collect()
    }

    pub fn select_image(&self, image_id: u64) -> Option<ImageRecord> {
        self.tables.lock().images.get(&image_id).cloned()
    }

    pub fn select_image_channels(&self, image_id: u64) -> Vec<ChannelRecord> {
        self.tables
            .lock()
            .channels
            .range((image_id, 0)..=(image_id, u32::MAX))
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn select_image_planes(&self, image_id: u64) -> Vec<PlaneRecord> {
        self.tables
            .lock()
            .planes
            .values()
            .filter(|p| p.image_id == image_id)
            .cloned()
            .collect()
    }

    pub fn select_classes(&self) -> Vec<ClassInfo> {
        self.tables.lock().classes.values().cloned().collect()
    }

    /// Objects of `class_id` in `image_id`, in insertion order.
    pub fn select_objects(
        &self,
        image_id: u64,
        class_id: ClassId,
    ) -> DatabaseResult<Vec<ObjectRecord>> {
        let mut objects = Vec::new();
        for batch in &self.object_batches()? {
            objects.extend(schema::decode_objects(batch, |img, class| {
                img == image_id && class == class_id.raw()
            })?);
        }
        Ok(objects)
    }

    pub fn object_count(&self, image_id: u64, class_id: ClassId) -> DatabaseResult<usize> {
        self.object_batches()?
            .iter()
            .map(|batch| schema::count_objects(batch, image_id, class_id.raw()))
            .sum()
    }

    pub fn total_object_count(&self) -> usize {
        let flushed: usize = self.tables.lock().objects.iter().map(RecordBatch::num_rows).sum();
        flushed + self.journal.lock().as_ref().map_or(0, |j| j.rows())
    }
}

impl ResultStore for Database {
    fn insert_objects(&self, image: &ImageContext, objects: &ObjectList) -> DatabaseResult<usize> {
        let records: Vec<ObjectRecord> = objects
            .iter()
            .filter(|roi| !roi.class_id().is_temporary())
            .map(|roi| {
                let parent = roi.parent();
                ObjectRecord {
                    plate_id: image.plate_id,
                    group_id: image.group_id,
                    image_id: image.image_id,
                    object_id: roi.object_id(),
                    tile_id: roi.tile().tile_id(image.plan.tiles_x),
                    plane: roi.plane(),
                    class_id: roi.class_id(),
                    confidence: roi.confidence(),
                    bounding_box: roi.real_bounding_box(),
                    contour: roi.contour().to_vec(),
                    mask: pack_mask(roi.mask()),
                    origin_object_id: roi.origin_object_id(),
                    parent,
                    measurements: roi.all_measurements(),
                }
            })
            .collect();
        if records.is_empty() {
            return Ok(0);
        }
        let batch = schema::encode_objects(&records)?;
        let Some(path) = &self.path else {
            let mut tables = self.tables.lock();
            tables.objects.push(batch);
            tables.objects_sorted = false;
            return Ok(records.len());
        };

        let mut journal = self.journal.lock();
        if journal.is_none() {
            *journal = Some(schema::ObjectJournal::create(&journal_path(path))?);
        }
        if let Some(open) = journal.as_mut() {
            open.append(&batch)?;
        }
        Ok(records.len())
    }

    fn set_image_validity(&self, image_id: u64, validity: u32) -> DatabaseResult<()> {
        self.tables.lock().image_mut(image_id)?.validity |= validity;
        Ok(())
    }

    fn set_image_plane_validity(
        &self,
        image_id: u64,
        plane: PlaneId,
        validity: u32,
    ) -> DatabaseResult<()> {
        self.insert_image_plane(image_id, plane, None);
        if let Some(record) = self.tables.lock().planes.get_mut(&(image_id, plane)) {
            record.validity |= validity;
        }
        Ok(())
    }
}

/// Store used by the previewer: keeps validity flags, drops objects.
#[derive(Debug, Default)]
pub struct PreviewDatabase {
    image_validity: Mutex<BTreeMap<u64, u32>>,
    plane_validity: Mutex<BTreeMap<(u64, PlaneId), u32>>,
    discarded: AtomicUsize,
}

impl PreviewDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image_validity(&self, image_id: u64) -> u32 {
        self.image_validity.lock().get(&image_id).copied().unwrap_or(0)
    }

    pub fn plane_validity(&self, image_id: u64, plane: PlaneId) -> u32 {
        self.plane_validity.lock().get(&(image_id, plane)).copied().unwrap_or(0)
    }

    /// Objects handed to [`ResultStore::insert_objects`] so far.
    pub fn discarded_objects(&self) -> usize {
        self.discarded.load(Ordering::Relaxed)
    }
}

impl ResultStore for PreviewDatabase {
    fn insert_objects(&self, _image: &ImageContext, objects: &ObjectList) -> DatabaseResult<usize> {
        self.discarded.fetch_add(objects.len(), Ordering::Relaxed);
        Ok(0)
    }

    fn set_image_validity(&self, image_id: u64, validity: u32) -> DatabaseResult<()> {
        *self.image_validity.lock().entry(image_id).or_insert(0) |= validity;
        Ok(())
    }

    fn set_image_plane_validity(
        &self,
        image_id: u64,
        plane: PlaneId,
        validity: u32,
    ) -> DatabaseResult<()> {
        *self.plane_validity.lock().entry((image_id, plane)).or_insert(0) |= validity;
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
