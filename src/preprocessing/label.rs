//! # Label Preprocessing Chain
//!
//! Decodes an uploaded label photo, converts it to greyscale, stretches its contrast,
//! sharpens it and writes the result to a uniquely named `_processed` file next to
//! the upload. The upload itself is never modified.

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, ImageReader};
use tracing::{debug, error};

use super::filtering::{sharpen, stretch_contrast};
use super::types::{PreprocessConfig, PreprocessedImage, PreprocessingError};
use crate::errors::error_logging;

/// Suffix appended to the file stem of a processed image
pub const PROCESSED_SUFFIX: &str = "_processed";

/// Random characters between the upload stem and [`PROCESSED_SUFFIX`]
const PROCESSED_RAND_LEN: usize = 6;

/// Runs the full chain on `input` and writes the result to `output`.
///
/// Decoding uses the file content, not its extension. The output format follows the
/// output extension, falling back to PNG when it has none that the encoder knows.
///
/// # Errors
///
/// `ImageLoad` when the input cannot be opened or decoded, `ProcessingFailed` for
/// invalid parameters or when `output` equals `input`, `Write` when encoding fails.
pub fn preprocess_image(
    input: &Path,
    output: &Path,
    config: &PreprocessConfig,
) -> Result<PreprocessedImage, PreprocessingError> {
    let start_time = std::time::Instant::now();

    config.validate()?;
    if input == output {
        return Err(PreprocessingError::ProcessingFailed {
            message: format!("Output path must differ from input: {}", input.display()),
        });
    }

    let decoded = load_image(input)?;
    let gray = decoded.to_luma8();
    let stretched = stretch_contrast(&gray, config.low_percentile, config.high_percentile)?;
    let sharpened = sharpen(
        &stretched.image,
        config.sharpen_sigma,
        config.sharpen_threshold,
    )?;

    let dimensions = sharpened.image.dimensions();
    write_image(DynamicImage::ImageLuma8(sharpened.image), output)?;

    let processing_time = start_time.elapsed();

    debug!(
        target: "ocr_preprocessing",
        input = %input.display(),
        output = %output.display(),
        width = dimensions.0,
        height = dimensions.1,
        processing_time_ms = processing_time.as_millis() as u64,
        "Label preprocessing completed"
    );

    Ok(PreprocessedImage {
        path: output.to_path_buf(),
        dimensions,
        contrast_range: (stretched.low, stretched.high),
        processing_time_ms: processing_time.as_millis() as u32,
    })
}

/// Preprocess into a fresh `<stem>-<random>_processed.<ext>` file beside `input`.
///
/// The output name is reserved before writing, so concurrent runs on the same input and
/// files already present in the directory are never overwritten. The returned guard
/// removes only the file this call created.
pub fn preprocess_for_recognition(
    input: &Path,
    config: &PreprocessConfig,
) -> Result<(ProcessedFileGuard, PreprocessedImage), PreprocessingError> {
    let guard = ProcessedFileGuard::new(reserve_processed_path(input)?);
    let processed = preprocess_image(input, guard.path(), config)?;
    Ok((guard, processed))
}

fn reserve_processed_path(input: &Path) -> Result<PathBuf, PreprocessingError> {
    let dir = match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = input
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    let reserve_error = |e: std::io::Error| {
        let dir = dir.display().to_string();
        error_logging::log_filesystem_error(&e, "reserve_processed_image", Some(&dir), None);
        PreprocessingError::Write {
            path: dir,
            message: e.to_string(),
        }
    };

    tempfile::Builder::new()
        .prefix(&format!("{stem}-"))
        .suffix(&format!("{PROCESSED_SUFFIX}{extension}"))
        .rand_bytes(PROCESSED_RAND_LEN)
        .tempfile_in(dir)
        .map_err(reserve_error)?
        .into_temp_path()
        .keep()
        .map_err(|e| reserve_error(e.error))
}

fn load_image(input: &Path) -> Result<DynamicImage, PreprocessingError> {
    let reader = ImageReader::open(input)
        .map_err(|e| PreprocessingError::ImageLoad {
            message: format!("{}: {}", input.display(), e),
        })?
        .with_guessed_format()
        .map_err(|e| PreprocessingError::ImageLoad {
            message: format!("{}: {}", input.display(), e),
        })?;

    reader.decode().map_err(|e| PreprocessingError::ImageLoad {
        message: format!("{}: {}", input.display(), e),
    })
}

fn write_image(image: DynamicImage, output: &Path) -> Result<(), PreprocessingError> {
    let format = match ImageFormat::from_path(output) {
        Ok(format @ (ImageFormat::Png | ImageFormat::Jpeg)) => format,
        // The GIF encoder wants colour frames
        Ok(ImageFormat::Gif) => {
            return image
                .to_rgba8()
                .save_with_format(output, ImageFormat::Gif)
                .map_err(|e| write_error(output, e));
        }
        _ => ImageFormat::Png,
    };

    image
        .save_with_format(output, format)
        .map_err(|e| write_error(output, e))
}

fn write_error(output: &Path, err: image::ImageError) -> PreprocessingError {
    let path = output.display().to_string();
    error_logging::log_filesystem_error(&err, "write_processed_image", Some(&path), None);
    PreprocessingError::Write {
        path,
        message: err.to_string(),
    }
}

/// Removes the processed image when dropped
#[derive(Debug)]
pub struct ProcessedFileGuard {
    path: PathBuf,
}

impl ProcessedFileGuard {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AsRef<Path> for ProcessedFileGuard {
    fn as_ref(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessedFileGuard {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Processed image cleaned up"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(
                error = %e,
                path = %self.path.display(),
                "Failed to remove processed image"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_label(dir: &Path, name: &str) -> PathBuf {
        let img = RgbImage::from_fn(40, 20, |x, _| {
            if x % 4 == 0 {
                Rgb([30, 30, 30])
            } else {
                Rgb([200, 200, 200])
            }
        });
        let path = dir.join(name);
        img.save(&path).unwrap();
        path
    }

    fn file_name(path: &Path) -> String {
        path.file_name().unwrap().to_string_lossy().into_owned()
    }

    #[test]
    fn test_processed_name_keeps_stem_and_extension() {
        let dir = TempDir::new().unwrap();
        let input = write_label(dir.path(), "label.jpeg");

        let (_guard, processed) =
            preprocess_for_recognition(&input, &PreprocessConfig::default()).unwrap();
        let name = file_name(&processed.path);
        assert!(name.starts_with("label-"), "{name}");
        assert!(name.ends_with("_processed.jpeg"), "{name}");
        assert_eq!(processed.path.parent(), input.parent());
    }

    #[test]
    fn test_recognition_output_never_reuses_an_existing_name() {
        let dir = TempDir::new().unwrap();
        let input = write_label(dir.path(), "label.png");
        let bystander = dir.path().join("label_processed.png");
        std::fs::write(&bystander, b"not ours").unwrap();

        let (first, _) = preprocess_for_recognition(&input, &PreprocessConfig::default()).unwrap();
        let (second, _) = preprocess_for_recognition(&input, &PreprocessConfig::default()).unwrap();
        assert_ne!(first.path(), second.path());
        assert_ne!(first.path(), bystander.as_path());

        drop(first);
        assert!(second.path().exists());
        drop(second);
        assert_eq!(std::fs::read(&bystander).unwrap(), b"not ours");
    }

    #[test]
    fn test_failed_preprocessing_leaves_no_output_behind() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("label.png");
        std::fs::write(&input, b"definitely not a png").unwrap();

        let err = preprocess_for_recognition(&input, &PreprocessConfig::default()).unwrap_err();
        assert!(matches!(err, PreprocessingError::ImageLoad { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_preprocess_writes_greyscale_sibling() {
        let dir = TempDir::new().unwrap();
        let input = write_label(dir.path(), "label.png");
        let original = std::fs::read(&input).unwrap();

        let output = dir.path().join("label_processed.png");
        let result = preprocess_image(&input, &output, &PreprocessConfig::default()).unwrap();

        assert_eq!(result.path, output);
        assert_eq!(result.dimensions, (40, 20));
        assert_eq!(result.contrast_range, (30, 200));
        assert!(output.exists());
        assert_eq!(std::fs::read(&input).unwrap(), original);

        let written = image::open(&output).unwrap();
        assert_eq!(written.color(), image::ColorType::L8);
    }

    #[test]
    fn test_preprocess_rejects_undecodable_input() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("label.png");
        std::fs::write(&input, b"definitely not a png").unwrap();

        let output = dir.path().join("label_processed.png");
        let err = preprocess_image(&input, &output, &PreprocessConfig::default()).unwrap_err();
        assert!(matches!(err, PreprocessingError::ImageLoad { .. }));
    }

    #[test]
    fn test_preprocess_refuses_to_overwrite_input() {
        let dir = TempDir::new().unwrap();
        let input = write_label(dir.path(), "label.png");
        let err = preprocess_image(&input, &input, &PreprocessConfig::default()).unwrap_err();
        assert!(matches!(err, PreprocessingError::ProcessingFailed { .. }));
    }

    #[test]
    fn test_preprocess_gif_output() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("label.gif");
        DynamicImage::ImageLuma8(GrayImage::from_pixel(10, 10, Luma([90])))
            .to_rgba8()
            .save(&input)
            .unwrap();

        let (guard, processed) =
            preprocess_for_recognition(&input, &PreprocessConfig::default()).unwrap();
        assert!(file_name(&processed.path).ends_with("_processed.gif"));
        assert!(guard.path().exists());
    }

    #[test]
    fn test_guard_removes_processed_file() {
        let dir = TempDir::new().unwrap();
        let input = write_label(dir.path(), "label.png");

        let (guard, processed) =
            preprocess_for_recognition(&input, &PreprocessConfig::default()).unwrap();
        assert!(processed.path.exists());

        drop(guard);
        assert!(!processed.path.exists());
        assert!(input.exists());
    }
}
