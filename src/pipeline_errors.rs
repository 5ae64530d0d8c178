//! # Pipeline Error Types
//!
//! The failure taxonomy of an analysis run. A run either produces a complete
//! result or one of these errors, and nothing is persisted on error.

use crate::ocr_errors::OcrError;
use crate::preprocessing::PreprocessingError;

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The image could not be validated, decoded, normalized or written
    Preprocessing(String),
    /// The OCR engine failed, timed out or was unavailable
    Recognition(String),
    /// Reserved. Extraction is total: unmatched fields become zero instead.
    Extraction(String),
    /// The finished analysis could not be handed to the store
    Persistence(String),
}

impl PipelineError {
    /// Stable short name used in logs and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Preprocessing(_) => "preprocessing",
            PipelineError::Recognition(_) => "recognition",
            PipelineError::Extraction(_) => "extraction",
            PipelineError::Persistence(_) => "persistence",
        }
    }
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Preprocessing(msg) => write!(f, "[PREPROCESSING] {}", msg),
            PipelineError::Recognition(msg) => write!(f, "[RECOGNITION] {}", msg),
            PipelineError::Extraction(msg) => write!(f, "[EXTRACTION] {}", msg),
            PipelineError::Persistence(msg) => write!(f, "[PERSISTENCE] {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<PreprocessingError> for PipelineError {
    fn from(err: PreprocessingError) -> Self {
        PipelineError::Preprocessing(err.to_string())
    }
}

impl From<OcrError> for PipelineError {
    fn from(err: OcrError) -> Self {
        PipelineError::Recognition(err.to_string())
    }
}
