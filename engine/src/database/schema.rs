//! Arrow layout of the result tables and the `.icdb` container.
//!
//! Container layout, little endian:
//!
//! ```text
//! "ICDB1\n"  u32 table count
//! per table: u16 name length, name, u64 stream length, Arrow IPC stream
//! ```
//!
//! The object journal next to it is a sequence of `u64 length, Arrow IPC
//! stream` frames, one per appended batch.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Cursor, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BinaryArray, BooleanArray, Float32Array, Float64Array, Float64Builder,
    Int32Array, MapArray, MapBuilder, StringArray, UInt16Array, UInt32Array, UInt32Builder,
    UInt64Array, UInt8Array,
};
use arrow::compute::{concat_batches, lexsort_to_indices, take, SortColumn};
use arrow::ipc::reader::StreamReader;
use arrow::ipc::writer::StreamWriter;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use tracing::warn;

use super::{
    ChannelRecord, DatabaseError, DatabaseResult, GroupRecord, ImageRecord, JobId, JobRecord,
    ObjectRecord, PlaneRecord, PlateRecord,
};
use crate::enums::ClassId;
use crate::image::PlaneId;
use crate::roi::{BoundingBox, MeasurementKey, ObjectRef, Point};
use crate::settings::ClassInfo;

pub(super) const JOB: &str = "job";
pub(super) const PLATE: &str = "plate";
pub(super) const GROUP: &str = "group";
pub(super) const IMAGE: &str = "image";
pub(super) const CHANNEL: &str = "channel";
pub(super) const IMAGE_PLANE: &str = "image_plane";
pub(super) const CLASS: &str = "class";
pub(super) const OBJECT: &str = "object";

const MAGIC: &[u8; 6] = b"ICDB1\n";

/// Columns the object table is ordered by.
const OBJECT_ORDER: [&str; 4] = ["plate_id", "group_id", "image_id", "channel_id"];

fn arc<A: Array + 'static>(array: A) -> ArrayRef {
    Arc::new(array)
}

fn column<'a, A: Array + 'static>(batch: &'a RecordBatch, name: &str) -> DatabaseResult<&'a A> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<A>())
        .ok_or_else(|| DatabaseError::Format(format!("column '{name}' missing or mistyped")))
}

fn strings<'a, T: 'a>(rows: &[&'a T], f: impl Fn(&'a T) -> &'a str) -> ArrayRef {
    arc(StringArray::from_iter_values(rows.iter().map(|r| f(*r))))
}

fn parse_time(text: &str) -> DatabaseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Format(format!("timestamp '{text}': {e}")))
}

// === Metadata tables ===

pub(super) fn encode_jobs<'a>(
    jobs: impl IntoIterator<Item = &'a JobRecord>,
) -> DatabaseResult<RecordBatch> {
    let jobs: Vec<&JobRecord> = jobs.into_iter().collect();
    Ok(RecordBatch::try_from_iter([
        (
            "job_id",
            arc(StringArray::from_iter_values(jobs.iter().map(|j| j.job_id.to_string()))),
        ),
        ("job_name", strings(&jobs, |j| j.job_name.as_str())),
        ("experiment_id", strings(&jobs, |j| j.experiment_id.as_str())),
        ("experiment_name", strings(&jobs, |j| j.experiment_name.as_str())),
        (
            "time_started",
            arc(StringArray::from_iter_values(jobs.iter().map(|j| j.time_started.to_rfc3339()))),
        ),
        (
            "time_finished",
            arc(jobs
                .iter()
                .map(|j| j.time_finished.map(|t| t.to_rfc3339()))
                .collect::<StringArray>()),
        ),
        ("settings", strings(&jobs, |j| j.settings.as_str())),
    ])?)
}

pub(super) fn decode_jobs(batch: &RecordBatch) -> DatabaseResult<Vec<JobRecord>> {
    let job_id = column::<StringArray>(batch, "job_id")?;
    let job_name = column::<StringArray>(batch, "job_name")?;
    let experiment_id = column::<StringArray>(batch, "experiment_id")?;
    let experiment_name = column::<StringArray>(batch, "experiment_name")?;
    let time_started = column::<StringArray>(batch, "time_started")?;
    let time_finished = column::<StringArray>(batch, "time_finished")?;
    let settings = column::<StringArray>(batch, "settings")?;
    (0..batch.num_rows())
        .map(|i| {
            Ok(JobRecord {
                job_id: job_id
                    .value(i)
                    .parse::<JobId>()
                    .map_err(|e| DatabaseError::Format(format!("job id: {e}")))?,
                job_name: job_name.value(i).to_string(),
                experiment_id: experiment_id.value(i).to_string(),
                experiment_name: experiment_name.value(i).to_string(),
                time_started: parse_time(time_started.value(i))?,
                time_finished: if time_finished.is_valid(i) {
                    Some(parse_time(time_finished.value(i))?)
                } else {
                    None
                },
                settings: settings.value(i).to_string(),
            })
        })
        .collect()
}

pub(super) fn encode_plates<'a>(
    plates: impl IntoIterator<Item = &'a PlateRecord>,
) -> DatabaseResult<RecordBatch> {
    let plates: Vec<&PlateRecord> = plates.into_iter().collect();
    Ok(RecordBatch::try_from_iter([
        ("plate_id", arc(plates.iter().map(|p| p.plate_id).collect::<UInt8Array>())),
        ("name", strings(&plates, |p| p.name.as_str())),
        ("notes", strings(&plates, |p| p.notes.as_str())),
        ("rows", arc(plates.iter().map(|p| p.rows).collect::<UInt16Array>())),
        ("cols", arc(plates.iter().map(|p| p.cols).collect::<UInt16Array>())),
        ("image_folder", strings(&plates, |p| p.image_folder.as_str())),
    ])?)
}

pub(super) fn decode_plates(batch: &RecordBatch) -> DatabaseResult<Vec<PlateRecord>> {
    let plate_id = column::<UInt8Array>(batch, "plate_id")?;
    let name = column::<StringArray>(batch, "name")?;
    let notes = column::<StringArray>(batch, "notes")?;
    let rows = column::<UInt16Array>(batch, "rows")?;
    let cols = column::<UInt16Array>(batch, "cols")?;
    let image_folder = column::<StringArray>(batch, "image_folder")?;
    Ok((0..batch.num_rows())
        .map(|i| PlateRecord {
            plate_id: plate_id.value(i),
            name: name.value(i).to_string(),
            notes: notes.value(i).to_string(),
            rows: rows.value(i),
            cols: cols.value(i),
            image_folder: image_folder.value(i).to_string(),
        })
        .collect())
}

pub(super) fn encode_groups<'a>(
    groups: impl IntoIterator<Item = &'a GroupRecord>,
) -> DatabaseResult<RecordBatch> {
    let groups: Vec<&GroupRecord> = groups.into_iter().collect();
    Ok(RecordBatch::try_from_iter([
        ("plate_id", arc(groups.iter().map(|g| g.plate_id).collect::<UInt8Array>())),
        ("group_id", arc(groups.iter().map(|g| g.group_id).collect::<UInt16Array>())),
        ("name", strings(&groups, |g| g.name.as_str())),
        ("well_pos_x", arc(groups.iter().map(|g| g.well_pos_x).collect::<UInt16Array>())),
        ("well_pos_y", arc(groups.iter().map(|g| g.well_pos_y).collect::<UInt16Array>())),
    ])?)
}

pub(super) fn decode_groups(batch: &RecordBatch) -> DatabaseResult<Vec<GroupRecord>> {
    let plate_id = column::<UInt8Array>(batch, "plate_id")?;
    let group_id = column::<UInt16Array>(batch, "group_id")?;
    let name = column::<StringArray>(batch, "name")?;
    let well_pos_x = column::<UInt16Array>(batch, "well_pos_x")?;
    let well_pos_y = column::<UInt16Array>(batch, "well_pos_y")?;
    Ok((0..batch.num_rows())
        .map(|i| GroupRecord {
            plate_id: plate_id.value(i),
            group_id: group_id.value(i),
            name: name.value(i).to_string(),
            well_pos_x: well_pos_x.value(i),
            well_pos_y: well_pos_y.value(i),
        })
        .collect())
}

pub(super) fn encode_images<'a>(
    images: impl IntoIterator<Item = &'a ImageRecord>,
) -> DatabaseResult<RecordBatch> {
    let images: Vec<&ImageRecord> = images.into_iter().collect();
    let u32s =
        |f: fn(&ImageRecord) -> u32| arc(images.iter().map(|i| f(i)).collect::<UInt32Array>());
    Ok(RecordBatch::try_from_iter([
        ("image_id", arc(images.iter().map(|i| i.image_id).collect::<UInt64Array>())),
        ("plate_id", arc(images.iter().map(|i| i.plate_id).collect::<UInt8Array>())),
        ("group_id", arc(images.iter().map(|i| i.group_id).collect::<UInt16Array>())),
        ("image_idx", u32s(|i| i.image_idx)),
        ("file_name", strings(&images, |i| i.file_name.as_str())),
        ("path", strings(&images, |i| i.path.as_str())),
        ("width", u32s(|i| i.width)),
        ("height", u32s(|i| i.height)),
        ("nr_of_channels", u32s(|i| i.nr_of_channels)),
        ("nr_of_z_stacks", u32s(|i| i.nr_of_z_stacks)),
        ("nr_of_t_stacks", u32s(|i| i.nr_of_t_stacks)),
        ("validity", u32s(|i| i.validity)),
        (
            "processed",
            arc(images.iter().map(|i| Some(i.processed)).collect::<BooleanArray>()),
        ),
    ])?)
}

pub(super) fn decode_images(batch: &RecordBatch) -> DatabaseResult<Vec<ImageRecord>> {
    let image_id = column::<UInt64Array>(batch, "image_id")?;
    let plate_id = column::<UInt8Array>(batch, "plate_id")?;
    let group_id = column::<UInt16Array>(batch, "group_id")?;
    let image_idx = column::<UInt32Array>(batch, "image_idx")?;
    let file_name = column::<StringArray>(batch, "file_name")?;
    let path = column::<StringArray>(batch, "path")?;
    let width = column::<UInt32Array>(batch, "width")?;
    let height = column::<UInt32Array>(batch, "height")?;
    let channels = column::<UInt32Array>(batch, "nr_of_channels")?;
    let z_stacks = column::<UInt32Array>(batch, "nr_of_z_stacks")?;
    let t_stacks = column::<UInt32Array>(batch, "nr_of_t_stacks")?;
    let validity = column::<UInt32Array>(batch, "validity")?;
    let processed = column::<BooleanArray>(batch, "processed")?;
    Ok((0..batch.num_rows())
        .map(|i| ImageRecord {
            image_id: image_id.value(i),
            plate_id: plate_id.value(i),
            group_id: group_id.value(i),
            image_idx: image_idx.value(i),
            file_name: file_name.value(i).to_string(),
            path: path.value(i).to_string(),
            width: width.value(i),
            height: height.value(i),
            nr_of_channels: channels.value(i),
            nr_of_z_stacks: z_stacks.value(i),
            nr_of_t_stacks: t_stacks.value(i),
            validity: validity.value(i),
            processed: processed.value(i),
        })
        .collect())
}

pub(super) fn encode_channels<'a>(
    channels: impl IntoIterator<Item = &'a ChannelRecord>,
) -> DatabaseResult<RecordBatch> {
    let channels: Vec<&ChannelRecord> = channels.into_iter().collect();
    Ok(RecordBatch::try_from_iter([
        ("image_id", arc(channels.iter().map(|c| c.image_id).collect::<UInt64Array>())),
        ("channel_id", arc(channels.iter().map(|c| c.channel_id).collect::<UInt32Array>())),
        ("name", strings(&channels, |c| c.name.as_str())),
    ])?)
}

pub(super) fn decode_channels(batch: &RecordBatch) -> DatabaseResult<Vec<ChannelRecord>> {
    let image_id = column::<UInt64Array>(batch, "image_id")?;
    let channel_id = column::<UInt32Array>(batch, "channel_id")?;
    let name = column::<StringArray>(batch, "name")?;
    Ok((0..batch.num_rows())
        .map(|i| ChannelRecord {
            image_id: image_id.value(i),
            channel_id: channel_id.value(i),
            name: name.value(i).to_string(),
        })
        .collect())
}

pub(super) fn encode_planes<'a>(
    planes: impl IntoIterator<Item = &'a PlaneRecord>,
) -> DatabaseResult<RecordBatch> {
    let planes: Vec<&PlaneRecord> = planes.into_iter().collect();
    Ok(RecordBatch::try_from_iter([
        ("image_id", arc(planes.iter().map(|p| p.image_id).collect::<UInt64Array>())),
        ("t_stack", arc(planes.iter().map(|p| p.plane.t).collect::<UInt32Array>())),
        ("z_stack", arc(planes.iter().map(|p| p.plane.z).collect::<UInt32Array>())),
        ("c_stack", arc(planes.iter().map(|p| p.plane.c).collect::<UInt32Array>())),
        ("validity", arc(planes.iter().map(|p| p.validity).collect::<UInt32Array>())),
        (
            "time_offset_ms",
            arc(planes.iter().map(|p| p.time_offset_ms).collect::<Float64Array>()),
        ),
        (
            "exposure_time_ms",
            arc(planes.iter().map(|p| p.exposure_time_ms).collect::<Float64Array>()),
        ),
    ])?)
}

pub(super) fn decode_planes(batch: &RecordBatch) -> DatabaseResult<Vec<PlaneRecord>> {
    let image_id = column::<UInt64Array>(batch, "image_id")?;
    let t = column::<UInt32Array>(batch, "t_stack")?;
    let z = column::<UInt32Array>(batch, "z_stack")?;
    let c = column::<UInt32Array>(batch, "c_stack")?;
    let validity = column::<UInt32Array>(batch, "validity")?;
    let time_offset = column::<Float64Array>(batch, "time_offset_ms")?;
    let exposure = column::<Float64Array>(batch, "exposure_time_ms")?;
    let optional = |array: &Float64Array, i: usize| array.is_valid(i).then(|| array.value(i));
    Ok((0..batch.num_rows())
        .map(|i| PlaneRecord {
            image_id: image_id.value(i),
            plane: PlaneId::new(t.value(i), z.value(i), c.value(i)),
            validity: validity.value(i),
            time_offset_ms: optional(time_offset, i),
            exposure_time_ms: optional(exposure, i),
        })
        .collect())
}

pub(super) fn encode_classes<'a>(
    classes: impl IntoIterator<Item = &'a ClassInfo>,
) -> DatabaseResult<RecordBatch> {
    let classes: Vec<&ClassInfo> = classes.into_iter().collect();
    Ok(RecordBatch::try_from_iter([
        ("class_id", arc(classes.iter().map(|c| c.class_id.raw()).collect::<UInt16Array>())),
        ("name", strings(&classes, |c| c.name.as_str())),
        ("color", strings(&classes, |c| c.color.as_str())),
        ("notes", strings(&classes, |c| c.notes.as_str())),
    ])?)
}

pub(super) fn decode_classes(batch: &RecordBatch) -> DatabaseResult<Vec<ClassInfo>> {
    let class_id = column::<UInt16Array>(batch, "class_id")?;
    let name = column::<StringArray>(batch, "name")?;
    let color = column::<StringArray>(batch, "color")?;
    let notes = column::<StringArray>(batch, "notes")?;
    Ok((0..batch.num_rows())
        .map(|i| ClassInfo {
            class_id: ClassId::from_raw(class_id.value(i)),
            name: name.value(i).to_string(),
            color: color.value(i).to_string(),
            notes: notes.value(i).to_string(),
        })
        .collect())
}

// === Objects ===

fn encode_contour(contour: &[Point]) -> Vec<u8> {
    let flat: Vec<[i32; 2]> = contour.iter().map(|p| [p.x, p.y]).collect();
    bytemuck::cast_slice::<[i32; 2], u8>(&flat).to_vec()
}

fn decode_contour(bytes: &[u8]) -> Vec<Point> {
    bytes
        .chunks_exact(std::mem::size_of::<[i32; 2]>())
        .map(|chunk| {
            let [x, y]: [i32; 2] = bytemuck::pod_read_unaligned(chunk);
            Point::new(x, y)
        })
        .collect()
}

pub(super) fn encode_objects(objects: &[ObjectRecord]) -> DatabaseResult<RecordBatch> {
    let mut measurements = MapBuilder::new(None, UInt32Builder::new(), Float64Builder::new());
    for object in objects {
        for (key, value) in &object.measurements {
            measurements.keys().append_value(key.pack());
            measurements.values().append_value(*value);
        }
        measurements.append(true)?;
    }
    let bbox = |f: fn(&BoundingBox) -> i32| {
        arc(objects.iter().map(|o| f(&o.bounding_box)).collect::<Int32Array>())
    };

    Ok(RecordBatch::try_from_iter([
        ("plate_id", arc(objects.iter().map(|o| o.plate_id).collect::<UInt8Array>())),
        ("group_id", arc(objects.iter().map(|o| o.group_id).collect::<UInt16Array>())),
        ("image_id", arc(objects.iter().map(|o| o.image_id).collect::<UInt64Array>())),
        ("channel_id", arc(objects.iter().map(|o| o.plane.c).collect::<UInt32Array>())),
        ("object_id", arc(objects.iter().map(|o| o.object_id).collect::<UInt64Array>())),
        ("tile_id", arc(objects.iter().map(|o| o.tile_id).collect::<UInt32Array>())),
        ("t_stack", arc(objects.iter().map(|o| o.plane.t).collect::<UInt32Array>())),
        ("z_stack", arc(objects.iter().map(|o| o.plane.z).collect::<UInt32Array>())),
        ("class_id", arc(objects.iter().map(|o| o.class_id.raw()).collect::<UInt16Array>())),
        ("confidence", arc(objects.iter().map(|o| o.confidence).collect::<Float32Array>())),
        ("bbox_x", bbox(|b| b.x)),
        ("bbox_y", bbox(|b| b.y)),
        ("bbox_width", bbox(|b| b.width)),
        ("bbox_height", bbox(|b| b.height)),
        (
            "contour",
            arc(BinaryArray::from_iter_values(objects.iter().map(|o| encode_contour(&o.contour)))),
        ),
        (
            "mask",
            arc(BinaryArray::from_iter_values(objects.iter().map(|o| o.mask.as_slice()))),
        ),
        (
            "origin_object_id",
            arc(objects.iter().map(|o| o.origin_object_id).collect::<UInt64Array>()),
        ),
        (
            "parent_object_id",
            arc(objects.iter().map(|o| o.parent.map(|p| p.object_id)).collect::<UInt64Array>()),
        ),
        (
            "parent_class_id",
            arc(objects
                .iter()
                .map(|o| o.parent.map(|p| p.class_id.raw()))
                .collect::<UInt16Array>()),
        ),
        ("measurements", arc(measurements.finish())),
    ])?)
}

/// Decodes the rows for which `select(image_id, class_id)` holds.
pub(super) fn decode_objects(
    batch: &RecordBatch,
    select: impl Fn(u64, u16) -> bool,
) -> DatabaseResult<Vec<ObjectRecord>> {
    let plate_id = column::<UInt8Array>(batch, "plate_id")?;
    let group_id = column::<UInt16Array>(batch, "group_id")?;
    let image_id = column::<UInt64Array>(batch, "image_id")?;
    let channel_id = column::<UInt32Array>(batch, "channel_id")?;
    let object_id = column::<UInt64Array>(batch, "object_id")?;
    let tile_id = column::<UInt32Array>(batch, "tile_id")?;
    let t = column::<UInt32Array>(batch, "t_stack")?;
    let z = column::<UInt32Array>(batch, "z_stack")?;
    let class_id = column::<UInt16Array>(batch, "class_id")?;
    let confidence = column::<Float32Array>(batch, "confidence")?;
    let bbox_x = column::<Int32Array>(batch, "bbox_x")?;
    let bbox_y = column::<Int32Array>(batch, "bbox_y")?;
    let bbox_width = column::<Int32Array>(batch, "bbox_width")?;
    let bbox_height = column::<Int32Array>(batch, "bbox_height")?;
    let contour = column::<BinaryArray>(batch, "contour")?;
    let mask = column::<BinaryArray>(batch, "mask")?;
    let origin = column::<UInt64Array>(batch, "origin_object_id")?;
    let parent_id = column::<UInt64Array>(batch, "parent_object_id")?;
    let parent_class = column::<UInt16Array>(batch, "parent_class_id")?;
    let measurements = column::<MapArray>(batch, "measurements")?;
    let keys = measurements
        .keys()
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| DatabaseError::Format("measurement keys mistyped".to_string()))?;
    let values = measurements
        .values()
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| DatabaseError::Format("measurement values mistyped".to_string()))?;
    let offsets = measurements.value_offsets();

    let mut objects = Vec::new();
    for i in 0..batch.num_rows() {
        if !select(image_id.value(i), class_id.value(i)) {
            continue;
        }
        let mut map = BTreeMap::new();
        for entry in offsets[i] as usize..offsets[i + 1] as usize {
            let key = MeasurementKey::unpack(keys.value(entry)).ok_or_else(|| {
                DatabaseError::Format(format!("unknown measurement key {:#x}", keys.value(entry)))
            })?;
            map.insert(key, values.value(entry));
        }
        let parent = parent_id.is_valid(i).then(|| ObjectRef {
            class_id: ClassId::from_raw(parent_class.value(i)),
            object_id: parent_id.value(i),
        });
        objects.push(ObjectRecord {
            plate_id: plate_id.value(i),
            group_id: group_id.value(i),
            image_id: image_id.value(i),
            object_id: object_id.value(i),
            tile_id: tile_id.value(i),
            plane: PlaneId::new(t.value(i), z.value(i), channel_id.value(i)),
            class_id: ClassId::from_raw(class_id.value(i)),
            confidence: confidence.value(i),
            bounding_box: BoundingBox::new(
                bbox_x.value(i),
                bbox_y.value(i),
                bbox_width.value(i),
                bbox_height.value(i),
            ),
            contour: decode_contour(contour.value(i)),
            mask: mask.value(i).to_vec(),
            origin_object_id: origin.is_valid(i).then(|| origin.value(i)),
            parent,
            measurements: map,
        });
    }
    Ok(objects)
}

pub(super) fn count_objects(batch: &RecordBatch, image: u64, class: u16) -> DatabaseResult<usize> {
    let image_id = column::<UInt64Array>(batch, "image_id")?;
    let class_id = column::<UInt16Array>(batch, "class_id")?;
    Ok((0..batch.num_rows())
        .filter(|&i| image_id.value(i) == image && class_id.value(i) == class)
        .count())
}

/// Concatenates `batches` and orders the rows by plate, group, image and channel.
/// Rows with equal keys keep their insertion order.
pub(super) fn merge_object_batches(batches: &[RecordBatch]) -> DatabaseResult<RecordBatch> {
    let schema = match batches.first() {
        Some(batch) => batch.schema(),
        None => return encode_objects(&[]),
    };
    let merged = concat_batches(&schema, batches)?;

    let row_index = arc(UInt64Array::from_iter_values(0..merged.num_rows() as u64));
    let mut sort_columns = Vec::with_capacity(OBJECT_ORDER.len() + 1);
    for name in OBJECT_ORDER {
        let values = merged
            .column_by_name(name)
            .cloned()
            .ok_or_else(|| DatabaseError::Format(format!("column '{name}' missing")))?;
        sort_columns.push(SortColumn { values, options: None });
    }
    sort_columns.push(SortColumn {
        values: row_index,
        options: None,
    });
    let indices = lexsort_to_indices(&sort_columns, None)?;

    let columns = merged
        .columns()
        .iter()
        .map(|c| take(c.as_ref(), &indices, None))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RecordBatch::try_new(schema, columns)?)
}

// === Container ===

fn encode_ipc(batch: &RecordBatch) -> DatabaseResult<Vec<u8>> {
    let mut writer = StreamWriter::try_new(Vec::new(), &batch.schema())?;
    writer.write(batch)?;
    writer.finish()?;
    Ok(writer.into_inner()?)
}

fn decode_ipc(bytes: Vec<u8>) -> DatabaseResult<Vec<RecordBatch>> {
    let reader = StreamReader::try_new(Cursor::new(bytes), None)?;
    Ok(reader.collect::<Result<Vec<_>, _>>()?)
}

/// Writes all tables next to `path` and moves the file into place.
pub(super) fn write_container(path: &Path, tables: &[(&str, RecordBatch)]) -> DatabaseResult<()> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&(tables.len() as u32).to_le_bytes());
    for (name, batch) in tables {
        let stream = encode_ipc(batch)?;
        bytes.extend_from_slice(&(name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(name.as_bytes());
        bytes.extend_from_slice(&(stream.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&stream);
    }

    let io_err = |source| DatabaseError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let tmp = path.with_extension("icdb.tmp");
    fs::write(&tmp, bytes).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)
}

fn read_exact<const N: usize>(cursor: &mut Cursor<Vec<u8>>) -> DatabaseResult<[u8; N]> {
    let mut buf = [0u8; N];
    cursor
        .read_exact(&mut buf)
        .map_err(|_| DatabaseError::Format("unexpected end of file".to_string()))?;
    Ok(buf)
}

pub(super) fn read_container(path: &Path) -> DatabaseResult<BTreeMap<String, Vec<RecordBatch>>> {
    let bytes = fs::read(path).map_err(|source| DatabaseError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut cursor = Cursor::new(bytes);
    if &read_exact::<6>(&mut cursor)? != MAGIC {
        return Err(DatabaseError::Format("not a result file".to_string()));
    }
    let count = u32::from_le_bytes(read_exact::<4>(&mut cursor)?);

    let mut tables = BTreeMap::new();
    for _ in 0..count {
        let name_len = u16::from_le_bytes(read_exact::<2>(&mut cursor)?) as usize;
        let mut name = vec![0u8; name_len];
        cursor
            .read_exact(&mut name)
            .map_err(|_| DatabaseError::Format("truncated table name".to_string()))?;
        let name = String::from_utf8(name)
            .map_err(|_| DatabaseError::Format("table name is not UTF-8".to_string()))?;
        let stream_len = u64::from_le_bytes(read_exact::<8>(&mut cursor)?) as usize;
        let mut stream = vec![0u8; stream_len];
        cursor
            .read_exact(&mut stream)
            .map_err(|_| DatabaseError::Format(format!("truncated table '{name}'")))?;
        tables.insert(name, decode_ipc(stream)?);
    }
    Ok(tables)
}

// === Object journal ===

/// Object batches of a running job, appended as they arrive.
#[derive(Debug)]
pub(super) struct ObjectJournal {
    path: PathBuf,
    file: File,
    rows: usize,
}

impl ObjectJournal {
    pub(super) fn create(path: &Path) -> DatabaseResult<Self> {
        let file = File::create(path).map_err(|source| DatabaseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            rows: 0,
        })
    }

    pub(super) fn append(&mut self, batch: &RecordBatch) -> DatabaseResult<()> {
        let stream = encode_ipc(batch)?;
        let mut frame = Vec::with_capacity(stream.len() + 8);
        frame.extend_from_slice(&(stream.len() as u64).to_le_bytes());
        frame.extend_from_slice(&stream);
        self.file.write_all(&frame).map_err(|source| DatabaseError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.rows += batch.num_rows();
        Ok(())
    }

    pub(super) fn path(&self) -> &Path {
        &self.path
    }

    pub(super) fn rows(&self) -> usize {
        self.rows
    }
}

/// Batches of the journal at `path`, empty if there is none.
///
/// A frame cut short by a crash ends the read; every complete frame before it is returned.
pub(super) fn read_journal(path: &Path) -> DatabaseResult<Vec<RecordBatch>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(DatabaseError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let total = bytes.len();
    let mut cursor = Cursor::new(bytes);
    let mut batches = Vec::new();
    while let Ok(len) = read_exact::<8>(&mut cursor) {
        let len = u64::from_le_bytes(len) as usize;
        if total - (cursor.position() as usize) < len {
            warn!("Truncated object journal '{}'", path.display());
            break;
        }
        let mut stream = vec![0u8; len];
        cursor
            .read_exact(&mut stream)
            .map_err(|_| DatabaseError::Format("truncated journal frame".to_string()))?;
        batches.extend(decode_ipc(stream)?.into_iter().filter(|b| b.num_rows() > 0));
    }
    Ok(batches)
}

pub(super) fn remove_journal(path: &Path) -> DatabaseResult<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(DatabaseError::Io {
            path: path.to_path_buf(),
            source: err,
        }),
        _ => Ok(()),
    }
}
