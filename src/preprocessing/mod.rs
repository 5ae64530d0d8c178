//! # Image Preprocessing Module
//!
//! This module prepares nutrition label photos for text recognition: greyscale
//! conversion, contrast normalization and sharpening, written to a separate file.
//!
//! The module is organized into focused sub-modules:
//! - `filtering`: Contrast stretching and unsharp-mask sharpening
//! - `label`: The full chain, processed-file naming and cleanup
//! - `types`: Shared types and error definitions

pub mod filtering;
pub mod label;
pub mod types;

// Re-export commonly used types and functions for convenience
pub use types::{
    ContrastStretchResult, PreprocessConfig, PreprocessedImage, PreprocessingError,
    SharpenedImageResult,
};

pub use filtering::{sharpen, stretch_contrast};
pub use label::{preprocess_for_recognition, preprocess_image, ProcessedFileGuard, PROCESSED_SUFFIX};
