//! # Upload Validation Module
//!
//! Checks uploaded label images before anything is written or decoded:
//!
//! - size limits (general and per format)
//! - format detection from magic bytes, only JPEG, PNG and GIF are accepted
//! - the original file extension, when the caller supplied a file name
//! - estimated decode memory
//!
//! Failures are reported as [`PreprocessingError`], the same error the
//! preprocessing chain raises, since both end the run in the preprocessing stage.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use image::ImageFormat;
use tracing::{debug, info};

use crate::ocr_config::OcrConfig;
use crate::preprocessing::PreprocessingError;

/// File extensions accepted for uploads
pub const ALLOWED_EXTENSIONS: [&str; 4] = ["jpeg", "jpg", "png", "gif"];

/// Validate an in-memory upload and return its detected format.
///
/// # Examples
///
/// ```
/// use nutri_scan::image_validation::validate_upload;
/// use nutri_scan::ocr_config::OcrConfig;
///
/// let png_header = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
/// let format = validate_upload(&png_header, Some("label.png"), &OcrConfig::default()).unwrap();
/// assert_eq!(format, image::ImageFormat::Png);
///
/// assert!(validate_upload(b"%PDF-1.7 ...", Some("label.pdf"), &OcrConfig::default()).is_err());
/// ```
pub fn validate_upload(
    data: &[u8],
    original_name: Option<&str>,
    config: &OcrConfig,
) -> Result<ImageFormat, PreprocessingError> {
    if let Some(name) = original_name {
        validate_extension(name)?;
    }
    let header_len = data.len().min(config.buffer_size);
    validate_content(&data[..header_len], data.len() as u64, config)
}

/// Validate an image already on disk and return its detected format
pub fn validate_image_file(path: &Path, config: &OcrConfig) -> Result<ImageFormat, PreprocessingError> {
    let metadata = path.metadata().map_err(|e| PreprocessingError::ImageLoad {
        message: format!("cannot read file metadata ({}) - {}", path.display(), e),
    })?;
    if !metadata.is_file() {
        return Err(PreprocessingError::ImageLoad {
            message: format!("path is not a file ({})", path.display()),
        });
    }

    let file = File::open(path).map_err(|e| PreprocessingError::ImageLoad {
        message: format!("cannot open image file ({}) - {}", path.display(), e),
    })?;
    let mut reader = BufReader::new(file);
    let mut buffer = vec![0; config.buffer_size];
    let bytes_read = reader.read(&mut buffer).map_err(|e| PreprocessingError::ImageLoad {
        message: format!("cannot read image header ({}) - {}", path.display(), e),
    })?;
    buffer.truncate(bytes_read);

    debug!(path = %path.display(), bytes_read, "Read image header for format detection");

    validate_content(&buffer, metadata.len(), config)
}

/// Accept only `jpeg`, `jpg`, `png` and `gif` extensions, case-insensitively
pub fn validate_extension(original_name: &str) -> Result<(), PreprocessingError> {
    let extension = Path::new(original_name)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase());

    match extension {
        Some(ext) if ALLOWED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(PreprocessingError::UnsupportedFormat {
            message: format!(
                "{} (only jpeg, jpg, png and gif images are allowed)",
                original_name
            ),
        }),
    }
}

/// Detect the image format from leading bytes, restricted to accepted formats
pub fn detect_format(header: &[u8], config: &OcrConfig) -> Result<ImageFormat, PreprocessingError> {
    if header.len() < config.min_format_bytes {
        return Err(PreprocessingError::UnsupportedFormat {
            message: format!(
                "read {} bytes, need at least {} to determine the format",
                header.len(),
                config.min_format_bytes
            ),
        });
    }

    match image::guess_format(header) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif)) => Ok(format),
        Ok(other) => Err(PreprocessingError::UnsupportedFormat {
            message: format!("{:?} images are not accepted", other),
        }),
        Err(e) => Err(PreprocessingError::UnsupportedFormat {
            message: format!("content is not a recognised image ({})", e),
        }),
    }
}

/// Size limit that applies to an accepted format
pub fn format_limit(format: ImageFormat, config: &OcrConfig) -> u64 {
    match format {
        ImageFormat::Png => config.format_limits.png_max,
        ImageFormat::Jpeg => config.format_limits.jpeg_max,
        ImageFormat::Gif => config.format_limits.gif_max,
        _ => config.max_file_size,
    }
}

/// File extension used when storing an upload of this format
pub fn extension_for(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpg",
        ImageFormat::Gif => "gif",
        _ => "png",
    }
}

/// Estimate memory usage for image processing based on file size and format
///
/// Returns estimated memory usage in megabytes (MB).
///
/// | Format | Factor |
/// |--------|--------|
/// | PNG    | 3.0x   |
/// | JPEG   | 2.5x   |
/// | GIF    | 4.0x   |
///
/// # Examples
///
/// ```rust
/// use nutri_scan::image_validation::estimate_memory_usage;
/// use image::ImageFormat;
///
/// let memory_mb = estimate_memory_usage(1024 * 1024, &ImageFormat::Png);
/// assert_eq!(memory_mb, 3.0);
///
/// let memory_mb = estimate_memory_usage(2 * 1024 * 1024, &ImageFormat::Jpeg);
/// assert_eq!(memory_mb, 5.0);
/// ```
pub fn estimate_memory_usage(file_size: u64, format: &ImageFormat) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let file_size_mb = file_size as f64 / (1024.0 * 1024.0);

    let memory_factor = match format {
        ImageFormat::Png => 3.0,
        ImageFormat::Jpeg => 2.5,
        ImageFormat::Gif => 4.0, // every frame is decoded to RGBA
        _ => 3.0,
    };

    file_size_mb * memory_factor
}

fn validate_content(
    header: &[u8],
    file_size: u64,
    config: &OcrConfig,
) -> Result<ImageFormat, PreprocessingError> {
    if file_size == 0 {
        return Err(PreprocessingError::EmptyFile);
    }
    if file_size > config.max_file_size {
        return Err(PreprocessingError::FileTooLarge {
            size: file_size,
            limit: config.max_file_size,
        });
    }

    let format = detect_format(header, config)?;
    let limit = format_limit(format, config);
    info!(
        format = ?format,
        file_size,
        limit_mb = limit / (1024 * 1024),
        "Detected upload format"
    );
    if file_size > limit {
        return Err(PreprocessingError::FileTooLarge {
            size: file_size,
            limit,
        });
    }

    let estimated_memory_mb = estimate_memory_usage(file_size, &format);
    if estimated_memory_mb > config.memory_limit_mb {
        return Err(PreprocessingError::ProcessingFailed {
            message: format!(
                "Estimated memory usage too high: {:.1}MB (maximum allowed: {}MB)",
                estimated_memory_mb, config.memory_limit_mb
            ),
        });
    }

    Ok(format)
}
