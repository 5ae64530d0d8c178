//! # Analysis Pipeline
//!
//! Runs one nutrition label from upload to stored result:
//!
//! ```text
//! Idle -> Preprocessing -> Recognizing -> Extracting -> Scoring -> Completed
//!   \__________\_______________\______________\___________\_____> Failed
//! ```
//!
//! Progress is published to the owning user at 10% ("Processing image..."),
//! 60% ("Calculating health score...") and 100% ("Complete!", with the stored
//! id), followed by a `new-analysis` summary. A failure in any stage publishes
//! an `analysis-error` event and returns the error; nothing is stored.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use image::ImageFormat;
use tracing::{debug, info, warn, Instrument};

use crate::config::{AppConfig, PipelineConfig};
use crate::errors::{error_logging, AppError, AppResult};
use crate::extraction;
use crate::health_score::calculate_health_score;
use crate::image_validation::{extension_for, validate_image_file, validate_upload};
use crate::models::{AnalysisResult, HistoryPage, StoredAnalysis};
use crate::notifications::{AnalysisEvent, ProgressPublisher};
use crate::observability;
use crate::ocr::OcrEngine;
use crate::ocr_config::OcrConfig;
use crate::pipeline_errors::PipelineError;
use crate::preprocessing::{self, PreprocessingError};
use crate::recommendations::generate_recommendations;
use crate::store::AnalysisStore;

pub const STAGE_PROCESSING_IMAGE: &str = "Processing image...";
pub const STAGE_CALCULATING_SCORE: &str = "Calculating health score...";
pub const STAGE_COMPLETE: &str = "Complete!";

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Idle,
    Preprocessing,
    Recognizing,
    Extracting,
    Scoring,
    Completed,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Preprocessing => "preprocessing",
            PipelineStage::Recognizing => "recognizing",
            PipelineStage::Extracting => "extracting",
            PipelineStage::Scoring => "scoring",
            PipelineStage::Completed => "completed",
            PipelineStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Completed | PipelineStage::Failed)
    }

    /// Forward by exactly one stage, or to `Failed` from any non-terminal stage
    pub fn can_transition_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, Preprocessing)
            | (Preprocessing, Recognizing)
            | (Recognizing, Extracting)
            | (Extracting, Scoring)
            | (Scoring, Completed) => true,
            _ => false,
        }
    }

    pub fn transition(self, next: PipelineStage) -> Result<PipelineStage, StageTransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StageTransitionError { from: self, to: next })
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition the stage machine does not allow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTransitionError {
    pub from: PipelineStage,
    pub to: PipelineStage,
}

impl fmt::Display for StageTransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal stage transition {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for StageTransitionError {}

impl From<StageTransitionError> for PipelineError {
    // Reported as a failure of the stage that could not be entered
    fn from(err: StageTransitionError) -> Self {
        let message = err.to_string();
        match err.to {
            PipelineStage::Idle | PipelineStage::Preprocessing => PipelineError::Preprocessing(message),
            PipelineStage::Recognizing => PipelineError::Recognition(message),
            PipelineStage::Extracting | PipelineStage::Scoring | PipelineStage::Failed => {
                PipelineError::Extraction(message)
            }
            PipelineStage::Completed => PipelineError::Persistence(message),
        }
    }
}

/// An image handed to [`AnalysisService::run_analysis`]
#[derive(Debug, Clone)]
pub enum ImageInput {
    /// Raw upload; stored under the upload directory before processing
    Bytes {
        data: Vec<u8>,
        original_name: Option<String>,
    },
    /// An image file on disk. It is copied into the upload directory and the run
    /// works on the copy; the caller's file is only read.
    Path(PathBuf),
}

/// Upload written by this run, removed again if the run fails
struct StagedUpload {
    path: PathBuf,
    original_name: Option<String>,
}

/// Runs analyses and serves the history around them
pub struct AnalysisService {
    engine: OcrEngine,
    store: Arc<dyn AnalysisStore>,
    publisher: Arc<dyn ProgressPublisher>,
    config: PipelineConfig,
    ocr_config: OcrConfig,
}

impl AnalysisService {
    pub fn new(
        engine: OcrEngine,
        store: Arc<dyn AnalysisStore>,
        publisher: Arc<dyn ProgressPublisher>,
        config: PipelineConfig,
        ocr_config: OcrConfig,
    ) -> Self {
        Self {
            engine,
            store,
            publisher,
            config,
            ocr_config,
        }
    }

    /// Service backed by Tesseract with the given store and publisher
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn AnalysisStore>,
        publisher: Arc<dyn ProgressPublisher>,
    ) -> Self {
        Self::new(
            OcrEngine::tesseract(&config.ocr),
            store,
            publisher,
            config.pipeline.clone(),
            config.ocr.clone(),
        )
    }

    pub fn engine(&self) -> &OcrEngine {
        &self.engine
    }

    /// Analyze one label image for `user_id` and store the result.
    pub async fn run_analysis(
        &self,
        user_id: i64,
        input: ImageInput,
    ) -> Result<StoredAnalysis, PipelineError> {
        let span = observability::pipeline_span("run_analysis", user_id);
        async move {
            let start = Instant::now();
            let mut stage = PipelineStage::Idle;
            let mut staged: Option<StagedUpload> = None;

            let outcome = self.run_stages(user_id, input, &mut stage, &mut staged).await;

            match outcome {
                Ok(stored) => {
                    observability::record_analysis_run("success", start.elapsed());
                    observability::record_health_score(stored.result.health_score);
                    info!(
                        user_id = %user_id,
                        analysis_id = %stored.id,
                        health_score = stored.result.health_score,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Analysis completed"
                    );
                    Ok(stored)
                }
                Err(err) => {
                    let failed_in = stage;
                    if let Ok(failed) = stage.transition(PipelineStage::Failed) {
                        stage = failed;
                    }
                    debug!(user_id = %user_id, stage = %stage, "Run ended");

                    let image_reference = staged.as_ref().map(|s| s.path.display().to_string());
                    error_logging::log_pipeline_error(
                        &err,
                        user_id,
                        failed_in.as_str(),
                        image_reference.as_deref(),
                    );
                    observability::record_analysis_run(err.kind(), start.elapsed());
                    self.publisher.publish(user_id, AnalysisEvent::error(&err));

                    if let Some(upload) = staged {
                        remove_file_if_present(&upload.path, "discard_failed_upload");
                    }
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        user_id: i64,
        input: ImageInput,
        stage: &mut PipelineStage,
        staged: &mut Option<StagedUpload>,
    ) -> Result<StoredAnalysis, PipelineError> {
        *stage = stage.transition(PipelineStage::Preprocessing)?;
        self.publish_progress(user_id, 10, STAGE_PROCESSING_IMAGE, None);

        let upload = staged.insert(self.stage_upload(input)?);
        let (processed_guard, processed) = {
            let input_path = upload.path.clone();
            let preprocess = self.config.preprocess.clone();
            tokio::task::spawn_blocking(move || {
                preprocessing::preprocess_for_recognition(&input_path, &preprocess)
            })
            .await
            .map_err(|e| PipelineError::Preprocessing(format!("preprocessing task failed: {e}")))??
        };
        debug!(
            processed = %processed.path.display(),
            width = processed.dimensions.0,
            height = processed.dimensions.1,
            processing_time_ms = processed.processing_time_ms,
            "Image preprocessed"
        );

        *stage = stage.transition(PipelineStage::Recognizing)?;
        let recognition = self
            .engine
            .extract_text_from_image(processed_guard.path(), Some(user_id))
            .await?;
        drop(processed_guard);

        *stage = stage.transition(PipelineStage::Extracting)?;
        let extracted_data = extraction::extract(&recognition.text);

        *stage = stage.transition(PipelineStage::Scoring)?;
        self.publish_progress(user_id, 60, STAGE_CALCULATING_SCORE, None);
        let score = calculate_health_score(&extracted_data);
        let recommendations = generate_recommendations(&extracted_data, score.health_score);

        let result = AnalysisResult {
            image_reference: upload.path.display().to_string(),
            original_image_name: upload.original_name.clone(),
            extracted_data,
            health_score: score.health_score,
            health_level: score.health_level,
            recommendations,
            created_at: Utc::now(),
        };

        let stored = self
            .store
            .save(user_id, &result)
            .await
            .map_err(|e| PipelineError::Persistence(format!("{e:#}")))?;
        *stage = stage.transition(PipelineStage::Completed)?;

        self.publish_progress(user_id, 100, STAGE_COMPLETE, Some(stored.id));
        self.publisher
            .publish(user_id, AnalysisEvent::new_analysis(&stored));
        Ok(stored)
    }

    fn publish_progress(&self, user_id: i64, progress: u8, stage: &str, analysis_id: Option<i64>) {
        debug!(user_id = %user_id, progress, stage, "Analysis progress");
        self.publisher
            .publish(user_id, AnalysisEvent::progress(progress, stage, analysis_id));
    }

    /// Validate the input and store a private copy under the upload directory
    fn stage_upload(&self, input: ImageInput) -> Result<StagedUpload, PreprocessingError> {
        let (data, format, original_name) = match input {
            ImageInput::Bytes {
                data,
                original_name,
            } => {
                let format = validate_upload(&data, original_name.as_deref(), &self.ocr_config)?;
                (data, format, original_name)
            }
            ImageInput::Path(source) => {
                let format = validate_image_file(&source, &self.ocr_config)?;
                let data = std::fs::read(&source).map_err(|e| PreprocessingError::ImageLoad {
                    message: format!("{}: {}", source.display(), e),
                })?;
                let original_name = source
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned());
                (data, format, original_name)
            }
        };

        let path = self.store_upload(&data, format)?;
        info!(path = %path.display(), bytes = data.len(), "Upload stored");
        Ok(StagedUpload {
            path,
            original_name,
        })
    }

    /// Write the upload as `<upload_dir>/<millis>-<random>.<ext>`
    fn store_upload(&self, data: &[u8], format: ImageFormat) -> Result<PathBuf, PreprocessingError> {
        let write_error = |e: std::io::Error| {
            let dir = self.config.upload_dir.display().to_string();
            error_logging::log_filesystem_error(&e, "store_upload", Some(&dir), Some(data.len() as u64));
            PreprocessingError::Write {
                path: dir,
                message: e.to_string(),
            }
        };

        std::fs::create_dir_all(&self.config.upload_dir).map_err(write_error)?;

        let mut file = tempfile::Builder::new()
            .prefix(&format!("{}-", Utc::now().timestamp_millis()))
            .suffix(&format!(".{}", extension_for(format)))
            .rand_bytes(8)
            .tempfile_in(&self.config.upload_dir)
            .map_err(write_error)?;
        std::io::Write::write_all(&mut file, data).map_err(write_error)?;

        let (_, path) = file.keep().map_err(|e| write_error(e.error))?;
        Ok(path)
    }

    /// One page of the user's analyses, newest first.
    ///
    /// `page` defaults to 1 and `limit` to the configured page size.
    pub async fn history(
        &self,
        user_id: i64,
        page: Option<u32>,
        limit: Option<u32>,
    ) -> AppResult<HistoryPage> {
        let page = page.unwrap_or(1);
        let limit = limit.unwrap_or(self.config.default_page_size);

        if page == 0 {
            return Err(AppError::Validation("page must be at least 1".to_string()));
        }
        if limit == 0 || limit > self.config.max_page_size {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {}",
                self.config.max_page_size
            )));
        }

        let (analyses, total) = self
            .store
            .list_by_user(user_id, page, limit)
            .await
            .map_err(|e| AppError::Database(format!("{e:#}")))?;

        debug!(user_id = %user_id, page, limit, total, "History page loaded");
        Ok(HistoryPage::new(analyses, page, limit, total))
    }

    /// Fetch one analysis owned by `user_id`
    pub async fn get_analysis(&self, id: i64, user_id: i64) -> AppResult<Option<StoredAnalysis>> {
        self.store
            .find_by_id(id, user_id)
            .await
            .map_err(|e| AppError::Database(format!("{e:#}")))
    }

    /// Delete one analysis and its stored image.
    ///
    /// Returns `false` when the user owns no analysis with this id. A missing
    /// image file is not an error. Only files under the upload directory are removed.
    pub async fn delete_analysis(&self, id: i64, user_id: i64) -> AppResult<bool> {
        let Some(existing) = self.get_analysis(id, user_id).await? else {
            return Ok(false);
        };

        let deleted = self
            .store
            .delete_by_id(id, user_id)
            .await
            .map_err(|e| AppError::Database(format!("{e:#}")))?;

        if deleted {
            let image = Path::new(&existing.result.image_reference);
            if image.starts_with(&self.config.upload_dir) {
                remove_file_if_present(image, "delete_analysis_image");
            } else {
                warn!(path = %image.display(), "Image outside the upload directory left in place");
            }
            info!(analysis_id = %id, user_id = %user_id, "Analysis deleted");
        }
        Ok(deleted)
    }
}

fn remove_file_if_present(path: &Path, operation: &str) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "Removed file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!(path = %path.display(), "Could not remove file");
            let path = path.display().to_string();
            error_logging::log_filesystem_error(&e, operation, Some(&path), None);
        }
    }
}
