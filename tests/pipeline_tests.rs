//! End-to-end analysis runs with a scripted recognizer and the in-memory store

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::broadcast;

use nutri_scan::config::PipelineConfig;
use nutri_scan::errors::AppError;
use nutri_scan::models::{AnalysisResult, HealthLevel, StoredAnalysis};
use nutri_scan::notifications::{AnalysisEvent, ProgressHub};
use nutri_scan::ocr::{OcrEngine, OcrError, Recognition, TextRecognizer};
use nutri_scan::ocr_config::OcrConfig;
use nutri_scan::pipeline::{
    AnalysisService, ImageInput, STAGE_CALCULATING_SCORE, STAGE_COMPLETE, STAGE_PROCESSING_IMAGE,
};
use nutri_scan::pipeline_errors::PipelineError;
use nutri_scan::store::{AnalysisStore, InMemoryAnalysisStore};

const SAMPLE_TEXT: &str = "Calories 250 Total Fat 8g Sugars 12g Sodium 450mg Protein 3g";
const USER: i64 = 42;

/// Returns the same outcome for every image and remembers what it was given
struct FakeRecognizer {
    outcome: Result<Recognition, OcrError>,
    seen: Mutex<Vec<(PathBuf, bool)>>,
}

impl FakeRecognizer {
    fn reading(text: &str) -> Self {
        Self {
            outcome: Ok(Recognition {
                text: text.to_string(),
                confidence: 0.9,
            }),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self {
            outcome: Err(OcrError::Extraction("engine crashed".to_string())),
            seen: Mutex::new(Vec::new()),
        }
    }
}

impl TextRecognizer for FakeRecognizer {
    fn recognize(&self, image_path: &Path, _language_hint: &str) -> Result<Recognition, OcrError> {
        self.seen
            .lock()
            .push((image_path.to_path_buf(), image_path.exists()));
        self.outcome.clone()
    }
}

/// Store whose writes always fail
struct BrokenStore;

#[async_trait]
impl AnalysisStore for BrokenStore {
    async fn save(&self, _user_id: i64, _result: &AnalysisResult) -> Result<StoredAnalysis> {
        Err(anyhow::anyhow!("connection refused"))
    }

    async fn list_by_user(&self, _: i64, _: u32, _: u32) -> Result<(Vec<StoredAnalysis>, u64)> {
        Ok((Vec::new(), 0))
    }

    async fn find_by_id(&self, _: i64, _: i64) -> Result<Option<StoredAnalysis>> {
        Ok(None)
    }

    async fn delete_by_id(&self, _: i64, _: i64) -> Result<bool> {
        Ok(false)
    }
}

struct Harness {
    service: AnalysisService,
    hub: Arc<ProgressHub>,
    store: Arc<InMemoryAnalysisStore>,
    recognizer: Arc<FakeRecognizer>,
    upload_dir: TempDir,
}

fn harness(recognizer: FakeRecognizer) -> Harness {
    let upload_dir = TempDir::new().expect("create upload dir");
    let recognizer = Arc::new(recognizer);
    let store = Arc::new(InMemoryAnalysisStore::new());
    let hub = Arc::new(ProgressHub::default());

    let ocr_config = OcrConfig::default();
    let pipeline_config = PipelineConfig {
        upload_dir: upload_dir.path().to_path_buf(),
        ..PipelineConfig::default()
    };
    let service = AnalysisService::new(
        OcrEngine::new(recognizer.clone(), &ocr_config),
        store.clone(),
        hub.clone(),
        pipeline_config,
        ocr_config,
    );

    Harness {
        service,
        hub,
        store,
        recognizer,
        upload_dir,
    }
}

fn label_png() -> Vec<u8> {
    let image = GrayImage::from_fn(120, 60, |x, y| {
        if (20..100).contains(&x) && (20..40).contains(&y) {
            Luma([30])
        } else {
            Luma([220])
        }
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

fn png_upload(name: &str) -> ImageInput {
    ImageInput::Bytes {
        data: label_png(),
        original_name: Some(name.to_string()),
    }
}

fn drain(receiver: &mut broadcast::Receiver<AnalysisEvent>) -> Vec<AnalysisEvent> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .expect("read upload dir")
        .map(|entry| entry.expect("dir entry").path())
        .collect();
    files.sort();
    files
}

#[tokio::test]
async fn test_successful_run_stores_scored_result() {
    let h = harness(FakeRecognizer::reading(SAMPLE_TEXT));
    let mut events = h.hub.subscribe(USER);

    let stored = h
        .service
        .run_analysis(USER, png_upload("cereal.png"))
        .await
        .expect("analysis succeeds");

    assert_eq!(stored.user_id, USER);
    assert_eq!(stored.result.extracted_data.calories, 250);
    assert_eq!(stored.result.extracted_data.sugar_grams, 12.0);
    assert_eq!(stored.result.health_score, 95);
    assert_eq!(stored.result.health_level, HealthLevel::Healthy);
    assert_eq!(stored.result.recommendations.len(), 3);
    assert_eq!(stored.result.original_image_name.as_deref(), Some("cereal.png"));
    assert_eq!(h.store.len(), 1);

    // The upload is kept, the processed sidecar is gone
    let files = files_in(h.upload_dir.path());
    assert_eq!(files.len(), 1);
    assert_eq!(files[0], PathBuf::from(&stored.result.image_reference));
    assert_eq!(files[0].extension().and_then(|e| e.to_str()), Some("png"));

    // The recognizer saw the processed image while it existed
    let seen = h.recognizer.seen.lock().clone();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].1);
    assert!(seen[0]
        .0
        .to_string_lossy()
        .ends_with("_processed.png"));
    assert!(!seen[0].0.exists());

    let events = drain(&mut events);
    assert_eq!(
        events,
        vec![
            AnalysisEvent::progress(10, STAGE_PROCESSING_IMAGE, None),
            AnalysisEvent::progress(60, STAGE_CALCULATING_SCORE, None),
            AnalysisEvent::progress(100, STAGE_COMPLETE, Some(stored.id)),
            AnalysisEvent::new_analysis(&stored),
        ]
    );
}

#[tokio::test]
async fn test_recognition_failure_persists_nothing() {
    let h = harness(FakeRecognizer::failing());
    let mut events = h.hub.subscribe(USER);

    let err = h
        .service
        .run_analysis(USER, png_upload("label.png"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Recognition(_)));
    assert!(err.to_string().contains("engine crashed"));
    assert!(h.store.is_empty());
    assert!(files_in(h.upload_dir.path()).is_empty());

    let events = drain(&mut events);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0], AnalysisEvent::progress(10, STAGE_PROCESSING_IMAGE, None));
    assert_eq!(events[1], AnalysisEvent::error(&err));
}

#[tokio::test]
async fn test_unsupported_upload_fails_in_preprocessing() {
    let h = harness(FakeRecognizer::reading(SAMPLE_TEXT));
    let mut events = h.hub.subscribe(USER);

    let pdf = ImageInput::Bytes {
        data: b"%PDF-1.7 not a label photo".to_vec(),
        original_name: Some("label.pdf".to_string()),
    };
    let err = h.service.run_analysis(USER, pdf).await.unwrap_err();

    assert!(matches!(err, PipelineError::Preprocessing(_)));
    assert!(h.recognizer.seen.lock().is_empty());
    assert!(h.store.is_empty());

    let events = drain(&mut events);
    assert_eq!(events.last().map(AnalysisEvent::name), Some("analysis-error"));
}

#[tokio::test]
async fn test_png_content_with_wrong_extension_is_rejected() {
    let h = harness(FakeRecognizer::reading(SAMPLE_TEXT));
    let err = h
        .service
        .run_analysis(USER, png_upload("label.bmp"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Preprocessing(_)));
}

#[tokio::test]
async fn test_undecodable_image_fails_in_preprocessing() {
    let h = harness(FakeRecognizer::reading(SAMPLE_TEXT));

    let mut truncated = label_png();
    truncated.truncate(40);
    let err = h
        .service
        .run_analysis(
            USER,
            ImageInput::Bytes {
                data: truncated,
                original_name: None,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Preprocessing(_)));
    assert!(h.recognizer.seen.lock().is_empty());
    assert!(files_in(h.upload_dir.path()).is_empty());
}

#[tokio::test]
async fn test_missing_path_input_fails_in_preprocessing() {
    let h = harness(FakeRecognizer::reading(SAMPLE_TEXT));
    let missing = h.upload_dir.path().join("missing.png");

    let err = h
        .service
        .run_analysis(USER, ImageInput::Path(missing))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Preprocessing(_)));
}

#[tokio::test]
async fn test_path_input_is_copied_into_upload_dir() {
    let h = harness(FakeRecognizer::reading(SAMPLE_TEXT));
    let caller_dir = TempDir::new().expect("create caller dir");
    let placed = caller_dir.path().join("1700-42.png");
    std::fs::write(&placed, label_png()).expect("write upload");

    let stored = h
        .service
        .run_analysis(USER, ImageInput::Path(placed.clone()))
        .await
        .expect("analysis succeeds");

    let image = PathBuf::from(&stored.result.image_reference);
    assert_eq!(image.parent(), Some(h.upload_dir.path()));
    assert_eq!(std::fs::read(&image).unwrap(), label_png());
    assert_eq!(stored.result.original_image_name.as_deref(), Some("1700-42.png"));
    assert_eq!(files_in(caller_dir.path()), vec![placed.clone()]);

    // Deleting the analysis removes the copy, never the caller's file
    assert!(h.service.delete_analysis(stored.id, USER).await.unwrap());
    assert!(!image.exists());
    assert!(placed.exists());
}

#[tokio::test]
async fn test_concurrent_path_runs_leave_neighbouring_files_alone() {
    let h = harness(FakeRecognizer::reading(SAMPLE_TEXT));
    let caller_dir = TempDir::new().expect("create caller dir");
    let photo = caller_dir.path().join("photo.png");
    let neighbour = caller_dir.path().join("photo_processed.png");
    std::fs::write(&photo, label_png()).expect("write photo");
    std::fs::write(&neighbour, b"the caller's own file").expect("write neighbour");

    let (first, second) = tokio::join!(
        h.service.run_analysis(USER, ImageInput::Path(photo.clone())),
        h.service.run_analysis(USER, ImageInput::Path(photo.clone())),
    );
    let first = first.expect("first run succeeds");
    let second = second.expect("second run succeeds");

    assert_ne!(first.result.image_reference, second.result.image_reference);
    for stored in [&first, &second] {
        let image = PathBuf::from(&stored.result.image_reference);
        assert_eq!(image.parent(), Some(h.upload_dir.path()));
    }

    // Each run recognised its own processed file, which existed at the time
    let seen = h.recognizer.seen.lock().clone();
    assert_eq!(seen.len(), 2);
    assert_ne!(seen[0].0, seen[1].0);
    assert!(seen.iter().all(|(path, existed)| *existed && !path.exists()));
    assert!(seen.iter().all(|(path, _)| path.parent() == Some(h.upload_dir.path())));

    assert!(h.service.delete_analysis(first.id, USER).await.unwrap());
    assert!(h.service.delete_analysis(second.id, USER).await.unwrap());

    assert_eq!(files_in(caller_dir.path()), vec![photo.clone(), neighbour.clone()]);
    assert_eq!(std::fs::read(&photo).unwrap(), label_png());
    assert_eq!(std::fs::read(&neighbour).unwrap(), b"the caller's own file");
    assert!(files_in(h.upload_dir.path()).is_empty());
}

#[tokio::test]
async fn test_store_failure_is_a_persistence_error() {
    let upload_dir = TempDir::new().expect("create upload dir");
    let hub = Arc::new(ProgressHub::default());
    let mut events = hub.subscribe(USER);
    let ocr_config = OcrConfig::default();
    let service = AnalysisService::new(
        OcrEngine::new(Arc::new(FakeRecognizer::reading(SAMPLE_TEXT)), &ocr_config),
        Arc::new(BrokenStore),
        hub.clone(),
        PipelineConfig {
            upload_dir: upload_dir.path().to_path_buf(),
            ..PipelineConfig::default()
        },
        ocr_config,
    );

    let err = service
        .run_analysis(USER, png_upload("label.png"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Persistence(_)));
    assert!(err.to_string().contains("connection refused"));

    let events = drain(&mut events);
    let names: Vec<&str> = events.iter().map(AnalysisEvent::name).collect();
    assert_eq!(
        names,
        vec!["analysis-progress", "analysis-progress", "analysis-error"]
    );
}

#[tokio::test]
async fn test_events_only_reach_the_owner() {
    let h = harness(FakeRecognizer::reading(SAMPLE_TEXT));
    let mut other = h.hub.subscribe(USER + 1);

    h.service
        .run_analysis(USER, png_upload("label.png"))
        .await
        .expect("analysis succeeds");

    assert!(drain(&mut other).is_empty());
}

#[tokio::test]
async fn test_history_paging_and_delete() {
    let h = harness(FakeRecognizer::reading(SAMPLE_TEXT));

    let mut ids = Vec::new();
    for n in 0..3 {
        let stored = h
            .service
            .run_analysis(USER, png_upload(&format!("label-{n}.png")))
            .await
            .expect("analysis succeeds");
        ids.push(stored.id);
    }

    let page = h.service.history(USER, Some(1), Some(2)).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.current_page, 1);
    assert_eq!(page.analyses.len(), 2);

    let defaults = h.service.history(USER, None, None).await.unwrap();
    assert_eq!(defaults.current_page, 1);
    assert_eq!(defaults.analyses.len(), 3);

    let victim = h
        .service
        .get_analysis(ids[0], USER)
        .await
        .unwrap()
        .expect("analysis exists");
    let image = PathBuf::from(&victim.result.image_reference);
    assert!(image.exists());

    // Other users can neither see nor delete it
    assert!(h.service.get_analysis(ids[0], USER + 1).await.unwrap().is_none());
    assert!(!h.service.delete_analysis(ids[0], USER + 1).await.unwrap());

    assert!(h.service.delete_analysis(ids[0], USER).await.unwrap());
    assert!(!image.exists());
    assert!(!h.service.delete_analysis(ids[0], USER).await.unwrap());

    let remaining = h.service.history(USER, Some(1), Some(10)).await.unwrap();
    assert_eq!(remaining.total, 2);
    assert!(remaining.analyses.iter().all(|a| a.id != ids[0]));
}

#[tokio::test]
async fn test_delete_tolerates_missing_image() {
    let h = harness(FakeRecognizer::reading(SAMPLE_TEXT));
    let stored = h
        .service
        .run_analysis(USER, png_upload("label.png"))
        .await
        .expect("analysis succeeds");

    std::fs::remove_file(&stored.result.image_reference).expect("remove upload");
    assert!(h.service.delete_analysis(stored.id, USER).await.unwrap());
}

#[tokio::test]
async fn test_history_rejects_invalid_paging() {
    let h = harness(FakeRecognizer::reading(SAMPLE_TEXT));

    assert!(matches!(
        h.service.history(USER, Some(0), None).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        h.service.history(USER, None, Some(0)).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        h.service.history(USER, None, Some(1000)).await,
        Err(AppError::Validation(_))
    ));

    let empty = h.service.history(USER, None, None).await.unwrap();
    assert_eq!(empty.total, 0);
    assert_eq!(empty.total_pages, 0);
}
