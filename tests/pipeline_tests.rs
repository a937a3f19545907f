use std::path::Path;
use std::sync::Arc;

use image::{Rgb, RgbImage};
use tempfile::TempDir;

use ev_classifier::config::ExtractorConfig;
use ev_classifier::extractor::{FeatureExtractor, GridPoolExtractor};
use ev_classifier::inference::ConfidenceSource;
use ev_classifier::model_store::BEST_MODEL_NAME;
use ev_classifier::preprocessing;
use ev_classifier::{train_from_directories, Config, Error, InferenceService, PipelineContext};

/// A reddish (bus) or bluish (car) image with a little per-image variation.
fn vehicle_image(bus: bool, seed: u32) -> RgbImage
{
    let shift = (seed * 7 % 40) as u8;
    RgbImage::from_fn(64, 48, |x, y| {
        let stripe = ((x / 8 + y / 8 + seed) % 3) as u8 * 10;
        if bus {
            Rgb([200 + stripe / 2, 20 + shift, 30 + stripe])
        } else {
            Rgb([25 + stripe, 30 + shift, 210 + stripe / 2])
        }
    })
}

fn write_class(root: &Path, class_dir: &str, bus: bool, count: u32, first_seed: u32)
{
    let dir = root.join(class_dir);
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..count
    {
        vehicle_image(bus, first_seed + i).save(dir.join(format!("img_{:03}.png", i))).unwrap();
    }
}

struct Workspace
{
    dir: TempDir,
    context: PipelineContext,
    train_dir: std::path::PathBuf,
    eval_dir: std::path::PathBuf,
}

fn workspace(train_per_class: u32) -> Workspace
{
    imbalanced_workspace(train_per_class, train_per_class)
}

fn imbalanced_workspace(buses: u32, cars: u32) -> Workspace
{
    let dir = tempfile::tempdir().unwrap();
    let train_dir = dir.path().join("train");
    let eval_dir = dir.path().join("eval");
    std::fs::create_dir_all(&train_dir).unwrap();
    write_class(&train_dir, "electric bus", true, buses, 0);
    write_class(&train_dir, "electric car", false, cars, 0);
    write_class(&eval_dir, "electric bus", true, 4, 100);
    write_class(&eval_dir, "electric car", false, 4, 100);

    let config = Config {
        extractor: ExtractorConfig::Grid { grid_size: 4 },
        model_store: dir.path().join("models"),
        ..Default::default()
    };
    let context = PipelineContext::from_config(config).unwrap();
    Workspace { dir, context, train_dir, eval_dir }
}

#[test]
fn end_to_end_train_then_classify()
{
    let ws = workspace(10);
    let report = train_from_directories(&ws.context, &ws.train_dir, &ws.eval_dir).unwrap();

    assert_eq!(report.candidates.len(), 3);
    assert_eq!(
        ws.context.model_store().list().unwrap(),
        vec!["KNN", "RandomForest", "SVM", BEST_MODEL_NAME]);
    assert_eq!(report.best_accuracy, 1.0);
    let best = ws.context.model_store().load_best().unwrap();
    assert_eq!(best.algorithm, report.best_name);
    assert_eq!(best.run_id, report.run_id);

    let service = InferenceService::load(&ws.context).unwrap();
    let held_out = ws.dir.path().join("held_out_bus.png");
    vehicle_image(true, 999).save(&held_out).unwrap();
    let result = service.classify_file(&held_out).unwrap();

    assert_eq!(result.label, "electric bus");
    assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    assert_eq!(result.confidence_source, ConfidenceSource::ModelProbability);
}

#[test]
fn evaluation_report_covers_every_example()
{
    let ws = workspace(10);
    train_from_directories(&ws.context, &ws.train_dir, &ws.eval_dir).unwrap();

    let service = InferenceService::load_named(&ws.context, "KNN").unwrap();
    let evaluation = service.evaluate_directory(&ws.eval_dir).unwrap();
    assert_eq!(evaluation.confusion.total(), 8);
    assert_eq!(evaluation.confusion.correct(), 8);
    assert_eq!(evaluation.report.accuracy, 1.0);
    assert!(evaluation.load.skipped.is_empty());
}

#[test]
fn svm_recognises_the_rare_class()
{
    let ws = imbalanced_workspace(12, 2);
    train_from_directories(&ws.context, &ws.train_dir, &ws.eval_dir).unwrap();

    let service = InferenceService::load_named(&ws.context, "SVM").unwrap();
    let evaluation = service.evaluate_directory(&ws.eval_dir).unwrap();
    assert_eq!(evaluation.confusion.correct(), 8);

    let held_out = ws.dir.path().join("held_out_car.png");
    vehicle_image(false, 321).save(&held_out).unwrap();
    let result = service.classify_file(&held_out).unwrap();
    assert_eq!(result.label, "electric car");
    assert!(result.confidence >= 0.5);
}

#[test]
fn classification_is_deterministic()
{
    let ws = workspace(6);
    train_from_directories(&ws.context, &ws.train_dir, &ws.eval_dir).unwrap();
    let service = InferenceService::load(&ws.context).unwrap();

    let mut bytes = std::io::Cursor::new(Vec::new());
    vehicle_image(false, 17).write_to(&mut bytes, image::ImageFormat::Png).unwrap();
    let bytes = bytes.into_inner();

    let first = service.classify(&bytes).unwrap();
    let second = service.classify(&bytes).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.label, "electric car");
}

#[test]
fn features_are_bit_identical_across_runs()
{
    let extractor = GridPoolExtractor::default();
    let tensor = preprocessing::preprocess_image(&vehicle_image(true, 3));
    let a = extractor.extract(&tensor).unwrap();
    let b = extractor.extract(&preprocessing::preprocess_image(&vehicle_image(true, 3))).unwrap();
    assert_eq!(a.len(), extractor.feature_length());
    assert!(a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits()));
}

#[test]
fn corrupt_files_are_skipped_during_training()
{
    let ws = workspace(5);
    std::fs::write(ws.train_dir.join("electric bus").join("broken.jpg"), b"\xff\xd8\xff garbage").unwrap();
    std::fs::write(ws.train_dir.join("electric car").join("notes.txt"), b"not an image").unwrap();

    let report = train_from_directories(&ws.context, &ws.train_dir, &ws.eval_dir).unwrap();
    let train_load = report.train_load.unwrap();
    assert_eq!(train_load.loaded_per_class, vec![5, 5]);
    assert_eq!(train_load.skipped_count(), 2);
}

#[test]
fn empty_training_directory_persists_nothing()
{
    let ws = workspace(0);
    let result = train_from_directories(&ws.context, &ws.train_dir, &ws.eval_dir);
    assert!(matches!(result, Err(Error::EmptyDataset { .. })));
    assert!(ws.context.model_store().list().unwrap().is_empty());
}

#[test]
fn classify_without_trained_model_fails_to_load()
{
    let ws = workspace(0);
    assert!(matches!(InferenceService::load(&ws.context), Err(Error::ModelLoad { .. })));
}

#[test]
fn garbage_bytes_are_a_client_error()
{
    let ws = workspace(6);
    train_from_directories(&ws.context, &ws.train_dir, &ws.eval_dir).unwrap();
    let service = InferenceService::load(&ws.context).unwrap();

    let err = service.classify(b"this is not an image").unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
    assert!(err.is_client_error());
}

#[test]
fn shared_extractor_serves_concurrent_requests()
{
    let ws = workspace(6);
    train_from_directories(&ws.context, &ws.train_dir, &ws.eval_dir).unwrap();
    let service = Arc::new(InferenceService::load(&ws.context).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let service = service.clone();
            std::thread::spawn(move || {
                let tensor = preprocessing::preprocess_image(&vehicle_image(i % 2 == 0, 50 + i));
                let features = GridPoolExtractor::default().extract(&tensor).unwrap();
                service.classify_features(&features).unwrap().label
            })
        })
        .collect();

    let labels: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(labels, vec!["electric bus", "electric car", "electric bus", "electric car"]);
}
