use std::path::PathBuf;

use common::buffer2::Buffer2;

use super::*;
use crate::image::Image;
use crate::initializer::ImagePlan;
use crate::ome::TileToLoad;
use crate::reader::{MemoryImageReader, MemoryStack};
use crate::roi::{MeasurementKind, Roi};
use crate::settings::{ClassInfo, GroupBy, Plate, ProjectImageSetup};

fn image_context(image_id: u64, group_id: u16) -> ImageContext {
    let ome = OmeInfo::single(32, 32, 2, 1, 1);
    let plan = ImagePlan::new(&ProjectImageSetup::default(), &ome, &[]);
    ImageContext::new(
        1,
        group_id,
        image_id,
        PathBuf::from(format!("/data/img_{image_id}.tif")),
        0,
        ome,
        plan,
    )
}

fn roi(class_id: ClassId, x: i32, y: i32, w: i32, h: i32) -> Roi {
    Roi::new(
        class_id,
        PlaneId::new(0, 0, 1),
        TileToLoad::new(0, 0, 32, 32),
        0.75,
        BoundingBox::new(x, y, w, h),
        Buffer2::from_fn(w as usize, h as usize, |x, y| (x + y) % 3 != 0),
    )
}

fn settings() -> AnalyzeSettings {
    let mut settings = AnalyzeSettings::default();
    settings.project_settings.plates.push(Plate {
        plate_id: 1,
        name: "plate".to_string(),
        ..Default::default()
    });
    settings.project_settings.classification.classes.push(ClassInfo {
        class_id: ClassId::C0,
        name: "nuclei".to_string(),
        color: "#FF0000".to_string(),
        notes: String::new(),
    });
    settings
}

fn registered(db: &Database, image_id: u64) -> ImageContext {
    let image = image_context(image_id, 0);
    let group = GroupInfo {
        group_name: "well_A_1".to_string(),
        ..Default::default()
    };
    db.insert_group(1, &group);
    db.insert_image(&image, &group);
    db.insert_image_channels(image_id, &image.ome, 0);
    image
}

#[test]
fn persisted_objects_read_back_identical() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(DATABASE_FILE_NAME);
    let db = Database::create(&path)?;
    let job_id = db.start_job(&settings(), "job")?;

    let mut objects = ObjectList::new();
    let mut first = roi(ClassId::C0, 2, 3, 5, 4);
    first.set_measurement(MeasurementKey::channel(MeasurementKind::IntensityAvg, 1), 1234.5);
    objects.push(first);
    objects.push(roi(ClassId::C0, 10, 10, 3, 3));
    objects.push(roi(ClassId::C1, 0, 0, 2, 2));
    objects.push(roi(ClassId::TEMP_01, 0, 0, 2, 2));

    let second_image = registered(&db, 7);
    let image = registered(&db, 3);
    assert_eq!(db.insert_objects(&second_image, &objects)?, 3);
    assert_eq!(db.insert_objects(&image, &objects)?, 3);
    db.finish_job(job_id)?;

    let reopened = Database::open(&path)?;
    for image_id in [3, 7] {
        let stored = reopened.select_objects(image_id, ClassId::C0)?;
        let expected: Vec<&Roi> = objects.class(ClassId::C0).iter().collect();
        assert_eq!(stored.len(), expected.len());
        for (record, roi) in stored.iter().zip(&expected) {
            assert_eq!(record.bounding_box, roi.real_bounding_box());
            assert_eq!(record.contour, roi.contour());
            assert_eq!(record.mask().as_ref(), Some(roi.mask()));
            let keys: Vec<_> = record.measurements.keys().copied().collect();
            let expected_keys: Vec<_> = roi.all_measurements().keys().copied().collect();
            assert_eq!(keys, expected_keys);
            assert_eq!(&record.measurements, &roi.all_measurements());
        }
        assert_eq!(reopened.object_count(image_id, ClassId::C1)?, 1);
        assert_eq!(reopened.object_count(image_id, ClassId::TEMP_01)?, 0);
    }
    assert_eq!(reopened.total_object_count(), 6);
    assert!(!journal_path(&path).exists());
    Ok(())
}

#[test]
fn objects_are_journaled_before_flush() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(DATABASE_FILE_NAME);
    let db = Database::create(&path)?;
    db.start_job(&settings(), "crash")?;
    let image = registered(&db, 3);

    let mut objects = ObjectList::new();
    objects.push(roi(ClassId::C0, 2, 3, 5, 4));
    objects.push(roi(ClassId::C1, 0, 0, 2, 2));
    assert_eq!(db.insert_objects(&image, &objects)?, 2);
    assert_eq!(db.insert_objects(&image, &objects)?, 2);
    assert_eq!(db.total_object_count(), 4);
    assert_eq!(db.object_count(3, ClassId::C0)?, 2);
    assert!(journal_path(&path).exists());

    // Dropped without a flush, like a crashed job.
    drop(db);
    let recovered = Database::open(&path)?;
    assert!(recovered.select_job().expect("job").time_finished.is_none());
    assert_eq!(recovered.total_object_count(), 4);
    assert_eq!(recovered.select_objects(3, ClassId::C1)?.len(), 2);

    recovered.flush()?;
    assert!(!journal_path(&path).exists());
    assert_eq!(Database::open(&path)?.total_object_count(), 4);
    Ok(())
}

#[test]
fn torn_journal_frame_is_dropped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join(DATABASE_FILE_NAME);
    let db = Database::create(&path)?;
    db.start_job(&settings(), "torn")?;
    let image = registered(&db, 3);
    let mut objects = ObjectList::new();
    objects.push(roi(ClassId::C0, 2, 3, 5, 4));
    db.insert_objects(&image, &objects)?;
    drop(db);

    let journal = journal_path(&path);
    let mut bytes = std::fs::read(&journal)?;
    bytes.extend_from_slice(&1024u64.to_le_bytes());
    bytes.extend_from_slice(&[0u8; 10]);
    std::fs::write(&journal, bytes)?;
    assert_eq!(Database::open(&path)?.total_object_count(), 1);
    Ok(())
}

#[test]
fn metadata_survives_reopen() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("meta.icdb");
    let db = Database::create(&path)?;
    let job_id = db.start_job(&settings(), "meta")?;
    let image = registered(&db, 42);
    db.insert_image_plane(42, PlaneId::new(0, 0, 1), None);
    db.set_image_plane_validity(42, PlaneId::new(0, 0, 1), ImageValidity::TooManyObjects.bit())?;
    db.set_image_validity(42, ImageValidity::ImageOutOfFocus.bit())?;
    db.set_image_processed(image.image_id)?;
    db.finish_job(job_id)?;

    let reopened = Database::open(&path)?;
    let job = reopened.select_job().expect("job");
    assert_eq!(job.job_id, job_id);
    assert_eq!(job.job_name, "meta");
    assert!(job.time_finished.is_some());
    assert_eq!(reopened.select_plates().len(), 1);
    assert_eq!(reopened.select_groups(1)[0].name, "well_A_1");
    assert_eq!(reopened.select_classes()[0].name, "nuclei");

    let stored = reopened.select_image(42).expect("image");
    assert!(stored.processed);
    assert_eq!(stored.validity, ImageValidity::ImageOutOfFocus.bit());
    assert_eq!((stored.width, stored.height, stored.nr_of_channels), (32, 32, 2));
    assert_eq!(reopened.select_image_channels(42).len(), 2);
    let planes = reopened.select_image_planes(42);
    assert_eq!(planes.len(), 1);
    assert_eq!(planes[0].validity, ImageValidity::TooManyObjects.bit());
    Ok(())
}

#[test]
fn unfinished_job_is_not_sealed() -> anyhow::Result<()> {
    let db = Database::in_memory();
    let job_id = db.start_job(&settings(), "open")?;
    assert!(db.select_job().expect("job").time_finished.is_none());
    assert!(matches!(db.finish_job(JobId::unique()), Err(DatabaseError::NoJob)));
    db.finish_job(job_id)?;
    assert!(db.select_job().expect("job").time_finished.is_some());
    Ok(())
}

#[test]
fn validity_of_unknown_image_fails() {
    let db = Database::in_memory();
    assert!(matches!(
        db.set_image_validity(1, ImageValidity::InvalidImage.bit()),
        Err(DatabaseError::UnknownImage(1))
    ));
    assert!(db.set_image_processed(1).is_err());
}

#[test]
fn prepare_images_groups_and_reports_unreadable_files() -> anyhow::Result<()> {
    let reader = MemoryImageReader::new(0);
    for name in ["x_A01_1.tif", "x_A01_2.tif", "x_B03_1.tif"] {
        reader.insert(
            format!("/plate/{name}"),
            MemoryStack::new(vec![Image::new_blank(4, 4, PlaneId::default())]),
        );
    }
    let plate = Plate {
        plate_id: 2,
        group_by: GroupBy::Filename,
        ..Default::default()
    };
    let mut paths = reader.paths();
    paths.push(PathBuf::from("/plate/x_C01_1.tif"));

    let db = Database::in_memory();
    let prepared = db.prepare_images(&plate, 0, &paths, &reader, 2)?;
    assert_eq!(prepared.len(), 4);
    assert_eq!(prepared[0].group.group_name, "well_A_1");
    assert_eq!(prepared[0].group.group_id, prepared[1].group.group_id);
    assert_eq!(prepared[2].group.group_name, "well_B_3");
    assert!(prepared[..3].iter().all(|p| p.ome.is_ok()));
    assert!(prepared[3].ome.is_err());
    assert_eq!(prepared[0].image_id, image_id(2, &paths[0]));
    assert_ne!(prepared[0].image_id, image_id(1, &paths[0]));
    Ok(())
}

#[test]
fn preview_store_keeps_validity_only() -> anyhow::Result<()> {
    let store = PreviewDatabase::new();
    let image = image_context(5, 0);
    let mut objects = ObjectList::new();
    objects.push(roi(ClassId::C0, 0, 0, 3, 3));
    assert_eq!(store.insert_objects(&image, &objects)?, 0);
    assert_eq!(store.discarded_objects(), 1);

    store.set_image_validity(5, ImageValidity::TooManyObjects.bit())?;
    store.set_image_validity(5, ImageValidity::InvalidImage.bit())?;
    assert_eq!(
        store.image_validity(5),
        ImageValidity::TooManyObjects.bit() | ImageValidity::InvalidImage.bit()
    );
    assert_eq!(store.plane_validity(5, PlaneId::default()), 0);
    Ok(())
}

#[test]
fn open_rejects_foreign_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("foreign.icdb");
    std::fs::write(&path, b"not a result file")?;
    assert!(matches!(Database::open(&path), Err(DatabaseError::Format(_))));
    assert!(matches!(
        Database::create(dir.path().join("results.json")),
        Err(DatabaseError::Extension(_))
    ));
    Ok(())
}
