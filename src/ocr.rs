//! # OCR Processing Module
//!
//! This module turns a preprocessed label image into raw text using the Tesseract
//! OCR engine.
//!
//! ## Layers
//!
//! - [`TextRecognizer`]: the synchronous engine contract, `recognize(path, language)`.
//!   [`TesseractRecognizer`] implements it with leptess and reuses engines through
//!   [`OcrInstanceManager`].
//! - [`OcrEngine`]: the async wrapper used by the pipeline. It runs the recognizer on
//!   tokio's blocking pool under a per-call timeout and guards it with a
//!   [`CircuitBreaker`]. There are no retries; the first failure is returned.
//!
//! Recognized text is passed on as-is apart from line trimming. No confidence
//! threshold is applied and empty text is not an error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn, Instrument};

pub use crate::circuit_breaker::CircuitBreaker;
use crate::errors::error_logging;
pub use crate::instance_manager::OcrInstanceManager;
use crate::observability;
pub use crate::ocr_config::{OcrConfig, RecoveryConfig};
pub use crate::ocr_errors::OcrError;

/// Text produced by a recognizer
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Mean word confidence in 0.0..=1.0, informational only
    pub confidence: f32,
}

/// A synchronous OCR engine.
///
/// Implementations may block for seconds; callers run them off the async executor.
pub trait TextRecognizer: Send + Sync {
    /// Recognize the text in the image at `image_path` using `language_hint`
    /// (Tesseract language codes such as `eng` or `eng+fra`).
    fn recognize(&self, image_path: &Path, language_hint: &str) -> Result<Recognition, OcrError>;
}

/// Tesseract-backed recognizer with engine reuse
pub struct TesseractRecognizer {
    config: OcrConfig,
    instance_manager: OcrInstanceManager,
}

impl TesseractRecognizer {
    pub fn new(config: OcrConfig) -> Self {
        Self {
            config,
            instance_manager: OcrInstanceManager::new(),
        }
    }

    pub fn instance_manager(&self) -> &OcrInstanceManager {
        &self.instance_manager
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, image_path: &Path, language_hint: &str) -> Result<Recognition, OcrError> {
        let instance = self.instance_manager.get_instance(language_hint, &self.config)?;
        let mut tess = instance.lock();

        tess.set_image(image_path).map_err(|e| {
            OcrError::ImageLoad(format!(
                "Failed to load image for OCR ({}): {}",
                image_path.display(),
                e
            ))
        })?;

        let raw_text = tess
            .get_utf8_text()
            .map_err(|e| OcrError::Extraction(format!("Failed to extract text from image: {e}")))?;
        let confidence = (tess.mean_text_conf().clamp(0, 100) as f32) / 100.0;

        Ok(Recognition {
            text: clean_recognized_text(&raw_text),
            confidence,
        })
    }
}

/// Trim every line and drop blank ones
pub fn clean_recognized_text(raw_text: &str) -> String {
    raw_text
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<&str>>()
        .join("\n")
}

/// Async recognizer front end with timeout and circuit breaker
pub struct OcrEngine {
    recognizer: Arc<dyn TextRecognizer>,
    circuit_breaker: CircuitBreaker,
    languages: String,
    timeout: Duration,
}

impl OcrEngine {
    /// Wrap any recognizer using the languages and recovery settings of `config`
    pub fn new(recognizer: Arc<dyn TextRecognizer>, config: &OcrConfig) -> Self {
        Self {
            recognizer,
            circuit_breaker: CircuitBreaker::new(config.recovery.clone()),
            languages: config.languages.clone(),
            timeout: Duration::from_secs(config.recovery.operation_timeout_secs),
        }
    }

    /// Engine backed by Tesseract
    pub fn tesseract(config: &OcrConfig) -> Self {
        Self::new(Arc::new(TesseractRecognizer::new(config.clone())), config)
    }

    /// Override the per-call timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    pub fn languages(&self) -> &str {
        &self.languages
    }

    /// Recognize the text of one image.
    ///
    /// ```text
    /// 1. Refuse with `Unavailable` while the circuit breaker is open
    /// 2. Run the recognizer on the blocking pool under the timeout
    /// 3. Record success or failure in the breaker and in metrics
    /// ```
    ///
    /// A timed-out recognition keeps running on its blocking thread until Tesseract
    /// returns; its result is discarded.
    pub async fn extract_text_from_image(
        &self,
        image_path: &Path,
        user_id: Option<i64>,
    ) -> Result<Recognition, OcrError> {
        let span = observability::ocr_span("extract_text_from_image");
        self.extract_inner(image_path, user_id).instrument(span).await
    }

    async fn extract_inner(
        &self,
        image_path: &Path,
        user_id: Option<i64>,
    ) -> Result<Recognition, OcrError> {
        let start_time = Instant::now();

        if self.circuit_breaker.is_open() {
            warn!(
                path = %image_path.display(),
                "Circuit breaker is open, rejecting OCR request"
            );
            observability::update_circuit_breaker_state(true);
            return Err(OcrError::Unavailable(
                "OCR service is temporarily unavailable due to repeated failures. Please try again later.".to_string(),
            ));
        }
        observability::update_circuit_breaker_state(false);

        info!(path = %image_path.display(), languages = %self.languages, "Starting OCR text extraction");

        let recognizer = Arc::clone(&self.recognizer);
        let path: PathBuf = image_path.to_path_buf();
        let languages = self.languages.clone();
        let task = tokio::task::spawn_blocking(move || recognizer.recognize(&path, &languages));

        let result = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_error)) => Err(OcrError::Extraction(format!(
                "OCR worker terminated unexpectedly: {join_error}"
            ))),
            Err(_) => Err(OcrError::Timeout(format!(
                "OCR operation timed out after {} ms",
                self.timeout.as_millis()
            ))),
        };

        let duration = start_time.elapsed();
        let image_size = std::fs::metadata(image_path).map(|m| m.len()).unwrap_or(0);

        match result {
            Ok(recognition) => {
                self.circuit_breaker.record_success();
                observability::update_circuit_breaker_state(false);
                observability::record_ocr_metrics(true, duration, image_size);

                info!(
                    duration_ms = duration.as_millis() as u64,
                    characters = recognition.text.len(),
                    confidence = recognition.confidence,
                    "OCR extraction completed"
                );
                Ok(recognition)
            }
            Err(err) => {
                self.circuit_breaker.record_failure();
                observability::update_circuit_breaker_state(self.circuit_breaker.is_open());
                observability::record_ocr_metrics(false, duration, image_size);

                error_logging::log_ocr_error(
                    &err,
                    "extract_text_from_image",
                    user_id,
                    Some(image_size),
                    Some(duration),
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct ScriptedRecognizer {
        outcomes: Mutex<Vec<Result<Recognition, OcrError>>>,
        delay: Duration,
        languages_seen: Mutex<Vec<String>>,
    }

    impl ScriptedRecognizer {
        fn new(outcomes: Vec<Result<Recognition, OcrError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                delay: Duration::ZERO,
                languages_seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn recognize(&self, _path: &Path, language_hint: &str) -> Result<Recognition, OcrError> {
            self.languages_seen.lock().push(language_hint.to_string());
            std::thread::sleep(self.delay);
            let mut outcomes = self.outcomes.lock();
            if outcomes.is_empty() {
                Err(OcrError::Extraction("no scripted outcome".to_string()))
            } else {
                outcomes.remove(0)
            }
        }
    }

    fn text(s: &str) -> Result<Recognition, OcrError> {
        Ok(Recognition {
            text: s.to_string(),
            confidence: 0.9,
        })
    }

    #[test]
    fn test_clean_recognized_text() {
        assert_eq!(
            clean_recognized_text("  Calories 250 \n\n  Total Fat 8g\n"),
            "Calories 250\nTotal Fat 8g"
        );
        assert_eq!(clean_recognized_text("   \n "), "");
    }

    #[tokio::test]
    async fn test_engine_passes_text_and_language() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![text("Calories 250")]));
        let config = OcrConfig {
            languages: "eng+fra".to_string(),
            ..OcrConfig::default()
        };
        let engine = OcrEngine::new(recognizer.clone(), &config);

        let recognition = engine
            .extract_text_from_image(Path::new("/tmp/label.png"), Some(1))
            .await
            .unwrap();

        assert_eq!(recognition.text, "Calories 250");
        assert_eq!(*recognizer.languages_seen.lock(), vec!["eng+fra".to_string()]);
    }

    #[tokio::test]
    async fn test_engine_does_not_retry() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![
            Err(OcrError::Extraction("boom".to_string())),
            text("never reached"),
        ]));
        let engine = OcrEngine::new(recognizer.clone(), &OcrConfig::default());

        let err = engine
            .extract_text_from_image(Path::new("/tmp/label.png"), None)
            .await
            .unwrap_err();

        assert_eq!(err, OcrError::Extraction("boom".to_string()));
        assert_eq!(recognizer.languages_seen.lock().len(), 1);
        assert_eq!(engine.circuit_breaker().failure_count(), 1);
    }

    #[tokio::test]
    async fn test_engine_times_out() {
        let mut scripted = ScriptedRecognizer::new(vec![text("too late")]);
        scripted.delay = Duration::from_millis(500);
        let engine = OcrEngine::new(Arc::new(scripted), &OcrConfig::default())
            .with_timeout(Duration::from_millis(50));

        let err = engine
            .extract_text_from_image(Path::new("/tmp/label.png"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_open_breaker_rejects_without_calling_recognizer() {
        let recognizer = Arc::new(ScriptedRecognizer::new(vec![
            Err(OcrError::Extraction("one".to_string())),
            Err(OcrError::Extraction("two".to_string())),
            text("unused"),
        ]));
        let mut config = OcrConfig::default();
        config.recovery.circuit_breaker_threshold = 2;
        let engine = OcrEngine::new(recognizer.clone(), &config);
        let path = Path::new("/tmp/label.png");

        assert!(engine.extract_text_from_image(path, None).await.is_err());
        assert!(engine.extract_text_from_image(path, None).await.is_err());

        let err = engine.extract_text_from_image(path, None).await.unwrap_err();
        assert!(matches!(err, OcrError::Unavailable(_)));
        assert_eq!(recognizer.languages_seen.lock().len(), 2);
    }
}
