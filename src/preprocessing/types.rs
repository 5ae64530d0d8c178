//! # Shared Types for Image Preprocessing
//!
//! This module contains the shared types, structs, and enums used across
//! the preprocessing sub-modules and by upload validation.

use std::path::PathBuf;

use image::GrayImage;

/// Errors that can occur during image preprocessing and upload validation.
#[derive(Debug, Clone, PartialEq)]
pub enum PreprocessingError {
    /// Image processing operation failed or was given invalid parameters
    ProcessingFailed { message: String },
    /// Failed to load or decode image
    ImageLoad { message: String },
    /// Content is not one of the accepted image formats
    UnsupportedFormat { message: String },
    /// Upload exceeds the general or format-specific size limit
    FileTooLarge { size: u64, limit: u64 },
    /// Upload has no content
    EmptyFile,
    /// Processed image could not be written
    Write { path: String, message: String },
}

impl std::fmt::Display for PreprocessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreprocessingError::ProcessingFailed { message } => {
                write!(f, "Image processing failed: {}", message)
            }
            PreprocessingError::ImageLoad { message } => {
                write!(f, "Failed to load image: {}", message)
            }
            PreprocessingError::UnsupportedFormat { message } => {
                write!(f, "Unsupported image format: {}", message)
            }
            PreprocessingError::FileTooLarge { size, limit } => {
                write!(
                    f,
                    "Image file too large: {} bytes (maximum allowed: {} bytes)",
                    size, limit
                )
            }
            PreprocessingError::EmptyFile => write!(f, "Image file is empty"),
            PreprocessingError::Write { path, message } => {
                write!(f, "Failed to write processed image {}: {}", path, message)
            }
        }
    }
}

impl std::error::Error for PreprocessingError {}

/// Parameters of the label preprocessing chain.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessConfig {
    /// Share of darkest pixels clipped before stretching, in percent
    pub low_percentile: f32,
    /// Share of pixels at or below the bright cut, in percent (100 keeps all)
    pub high_percentile: f32,
    /// Gaussian sigma of the unsharp mask
    pub sharpen_sigma: f32,
    /// Minimum difference for the unsharp mask to apply
    pub sharpen_threshold: i32,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            low_percentile: 0.0,
            high_percentile: 100.0,
            sharpen_sigma: 1.0,
            sharpen_threshold: 1,
        }
    }
}

impl PreprocessConfig {
    /// Check that percentiles and sharpening parameters are usable
    pub fn validate(&self) -> Result<(), PreprocessingError> {
        if !(0.0..100.0).contains(&self.low_percentile) {
            return Err(PreprocessingError::ProcessingFailed {
                message: format!(
                    "Invalid low percentile: {}. Must be in [0, 100)",
                    self.low_percentile
                ),
            });
        }
        if !(self.low_percentile < self.high_percentile && self.high_percentile <= 100.0) {
            return Err(PreprocessingError::ProcessingFailed {
                message: format!(
                    "Invalid high percentile: {}. Must be in ({}, 100]",
                    self.high_percentile, self.low_percentile
                ),
            });
        }
        if self.sharpen_sigma <= 0.0 || self.sharpen_sigma > 10.0 {
            return Err(PreprocessingError::ProcessingFailed {
                message: format!(
                    "Invalid sharpen sigma: {}. Must be in (0, 10]",
                    self.sharpen_sigma
                ),
            });
        }
        if self.sharpen_threshold < 0 {
            return Err(PreprocessingError::ProcessingFailed {
                message: format!(
                    "Invalid sharpen threshold: {}. Must not be negative",
                    self.sharpen_threshold
                ),
            });
        }
        Ok(())
    }
}

/// Result of a luminance contrast stretch.
#[derive(Debug, Clone)]
pub struct ContrastStretchResult {
    /// The stretched greyscale image
    pub image: GrayImage,
    /// Input level mapped to 0
    pub low: u8,
    /// Input level mapped to 255
    pub high: u8,
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}

/// Result of unsharp-mask sharpening.
#[derive(Debug, Clone)]
pub struct SharpenedImageResult {
    /// The sharpened greyscale image
    pub image: GrayImage,
    /// Sigma used for the mask blur
    pub sigma: f32,
    /// Threshold used for the mask
    pub threshold: i32,
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}

/// The processed image written next to an upload.
#[derive(Debug, Clone)]
pub struct PreprocessedImage {
    /// Location of the written file
    pub path: PathBuf,
    /// Image dimensions (width, height)
    pub dimensions: (u32, u32),
    /// Input levels stretched to the full range (low, high)
    pub contrast_range: (u8, u8),
    /// Processing time in milliseconds
    pub processing_time_ms: u32,
}
