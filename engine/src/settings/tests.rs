use serde_json::json;

use super::*;
use crate::commands::{Classifier, Command, Reclassify, Threshold, ThresholdMethod};
use crate::enums::{ClassIdIn, ZProjection};

fn producer(name: &str, class_id: ClassId) -> Pipeline {
    Pipeline::new(
        name,
        PipelineSetup {
            default_class_id: class_id,
            ..Default::default()
        },
    )
    .with_steps([
        PipelineStep::new(Threshold::default().into()),
        PipelineStep::new(Classifier::default().into()),
    ])
}

fn consumer(name: &str, own: ClassId, reads: ClassId) -> Pipeline {
    let step: Command = Reclassify {
        intersecting_class: ClassIdIn::Id(reads),
        ..Default::default()
    }
    .into();
    producer(name, own).with_steps([PipelineStep::new(step)])
}

fn project(pipelines: Vec<Pipeline>) -> AnalyzeSettings {
    AnalyzeSettings {
        project_settings: ProjectSettings {
            working_directory: "/tmp/jobs".to_string(),
            plates: vec![Plate {
                image_folder: "/data/plate".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        },
        pipelines,
        ..Default::default()
    }
}

#[test]
fn project_round_trips_through_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nested").join("experiment.icproj");
    let mut settings = project(vec![
        producer("nuclei", ClassId::C0),
        consumer("spots", ClassId::C1, ClassId::C0),
    ]);
    settings.project_settings.classification.classes.push(ClassInfo {
        class_id: ClassId::C0,
        name: "Nucleus".to_string(),
        color: "#0000FF".to_string(),
        notes: String::new(),
    });

    settings.save(&path)?;
    let loaded = AnalyzeSettings::load(&path)?;
    assert_eq!(loaded, settings);
    assert_eq!(loaded.classification().name(ClassId::C0), "Nucleus");
    assert_eq!(loaded.classification().color(ClassId::C0), [0, 0, 255]);
    assert_eq!(loaded.classification().name(ClassId::user(5)), "C5");
    Ok(())
}

#[test]
fn wrong_extension_is_rejected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let settings = project(vec![producer("nuclei", ClassId::C0)]);
    assert!(matches!(
        settings.save(&dir.path().join("experiment.json")),
        Err(SettingsError::Extension(_))
    ));
    assert!(matches!(
        AnalyzeSettings::load(&dir.path().join("missing.icproj")),
        Err(SettingsError::Io { .. })
    ));
    Ok(())
}

#[test]
fn steps_are_keyed_by_command_name() -> anyhow::Result<()> {
    let value = json!({
        "meta": { "name": "nuclei" },
        "pipelineSetup": {
            "cStackIndex": 2,
            "zProjection": "MAX_INTENSITY",
            "defaultClassId": "C4"
        },
        "pipelineSteps": [
            {
                "breakpoint": true,
                "$threshold": { "modelClasses": [{ "method": "NONE", "thresholdMin": 1000 }] }
            },
            { "disabled": true, "$classify": {} }
        ]
    });
    let pipeline: Pipeline = serde_json::from_value(value)?;
    assert_eq!(pipeline.pipeline_setup.c_stack_index, 2);
    assert_eq!(pipeline.pipeline_setup.z_projection, ZProjection::Max);
    assert_eq!(pipeline.default_class_id(), ClassId::user(4));
    assert!(pipeline.pipeline_steps[0].breakpoint);
    assert!(pipeline.pipeline_steps[1].disabled);

    let Command::Threshold(threshold) = &pipeline.pipeline_steps[0].command else {
        panic!("expected a threshold step");
    };
    assert_eq!(threshold.model_classes[0].method, ThresholdMethod::Manual);
    assert_eq!(threshold.model_classes[0].threshold_min, 1000);
    assert_eq!(threshold.model_classes[0].threshold_max, u16::MAX);

    let written = serde_json::to_value(&pipeline.pipeline_steps[1])?;
    assert!(written.get("$classify").is_some());
    assert_eq!(written["disabled"], json!(true));

    // Disabled steps do not contribute classes.
    assert!(pipeline.output_classes().is_empty());
    Ok(())
}

#[test]
fn unknown_command_is_a_parse_error() {
    let value = json!({ "pipelineSteps": [{ "$teleport": {} }] });
    assert!(serde_json::from_value::<Pipeline>(value).is_err());
}

#[test]
fn valid_project_passes_validation() -> anyhow::Result<()> {
    let settings = project(vec![
        producer("nuclei", ClassId::C0),
        consumer("spots", ClassId::C1, ClassId::C0),
    ]);
    let log = settings.validate()?;
    assert!(!log.has_errors());
    assert_eq!(
        settings.output_classes().into_iter().collect::<Vec<_>>(),
        vec![ClassId::C0, ClassId::C1]
    );
    Ok(())
}

#[test]
fn invalid_regex_and_cycle_are_reported() {
    let mut settings = project(vec![
        consumer("a", ClassId::C0, ClassId::C1),
        consumer("b", ClassId::C1, ClassId::C0),
    ]);
    settings.project_settings.plates[0].group_by = GroupBy::Filename;
    settings.project_settings.plates[0].filename_regex = "(unclosed".to_string();

    let log = settings.check_for_errors();
    let errors: Vec<_> = log.errors().collect();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().any(|e| e.command == "Plate 1"));
    assert!(errors.iter().any(|e| e.command == "Pipelines"));
    assert!(matches!(settings.validate(), Err(SettingsError::Invalid(e)) if e.len() == 2));
}

#[test]
fn empty_project_and_zero_tiles_are_errors() {
    let mut settings = project(Vec::new());
    settings.image_setup.image_tile_settings.tile_width = 0;
    let log = settings.check_for_errors();
    assert_eq!(log.errors().count(), 2);
}

#[test]
fn missing_input_class_is_a_warning() -> anyhow::Result<()> {
    let settings = project(vec![consumer("spots", ClassId::C1, ClassId::user(7))]);
    let log = settings.validate()?;
    assert!(log
        .entries()
        .iter()
        .any(|e| e.severity == Severity::Warning && e.message.contains("C7")));
    Ok(())
}

#[test]
fn class_outside_classification_is_an_error() {
    let mut settings = project(vec![producer("nuclei", ClassId::C3)]);
    settings.project_settings.classification.classes.push(ClassInfo {
        class_id: ClassId::C0,
        name: "Nucleus".to_string(),
        color: "#FFFFFF".to_string(),
        notes: String::new(),
    });
    let log = settings.check_for_errors();
    assert!(log.errors().any(|e| e.command == "nuclei" && e.message.contains("C3")));
}

#[test]
fn undo_restores_steps_and_keeps_history() {
    let mut pipeline = Pipeline::new("nuclei", PipelineSetup::default());
    pipeline.add_step(PipelineStep::new(Threshold::default().into()));
    pipeline.add_step(PipelineStep::new(Classifier::default().into()));
    assert_eq!(pipeline.history.len(), 2);
    assert_eq!(pipeline.history[1].message, "Added: $classify");

    assert!(pipeline.tag_history(0, "threshold only"));
    assert!(pipeline.undo_to(0));
    assert_eq!(pipeline.pipeline_steps.len(), 1);
    assert_eq!(pipeline.pipeline_steps[0].command.name(), "$threshold");
    assert_eq!(pipeline.history.len(), 3);
    assert_eq!(pipeline.history[2].category, HistoryCategory::Changed);
    assert_eq!(pipeline.history[0].tag_message, "threshold only");

    assert!(!pipeline.undo_to(10));
    assert!(pipeline.remove_step(5).is_none());
    assert!(pipeline.remove_step(0).is_some());
    assert!(pipeline.pipeline_steps.is_empty());
}

#[test]
fn template_save_and_load() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nuclei.ictpl");
    let mut pipeline = producer("nuclei", ClassId::C2);

    pipeline.save_template(&path)?;
    assert_eq!(pipeline.history.last().map(|h| h.category), Some(HistoryCategory::Saved));

    let loaded = Pipeline::load_template(&path)?;
    assert_eq!(loaded, pipeline);
    assert!(Pipeline::load_template(&dir.path().join("nuclei.icproj")).is_err());
    Ok(())
}
