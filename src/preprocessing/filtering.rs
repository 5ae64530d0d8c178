//! # Image Filtering Module
//!
//! This module provides the intensity normalization and sharpening steps of label
//! preprocessing. Both operate on greyscale images and return a new buffer.

use image::GrayImage;
use tracing;

use super::types::{ContrastStretchResult, PreprocessingError, SharpenedImageResult};

/// Linearly stretches luminance so the clipped darkest and brightest levels map to 0 and 255.
///
/// The cut levels are found on the luminance histogram: `low_percentile` percent of the
/// pixels fall below the low cut, and pixels above `high_percentile` percent are above the
/// high cut. With the defaults (0 and 100) the darkest and brightest occupied levels are used.
/// An image with a single occupied level is returned unchanged.
///
/// # Arguments
///
/// * `image` - The greyscale input image
/// * `low_percentile` - Percent of darkest pixels clipped to black
/// * `high_percentile` - Percentile above which pixels are clipped to white
///
/// # Examples
///
/// ```
/// use image::{GrayImage, Luma};
/// use nutri_scan::preprocessing::stretch_contrast;
///
/// let mut img = GrayImage::from_pixel(4, 1, Luma([100]));
/// img.put_pixel(3, 0, Luma([150]));
///
/// let stretched = stretch_contrast(&img, 0.0, 100.0).unwrap();
/// assert_eq!(stretched.image.get_pixel(0, 0)[0], 0);
/// assert_eq!(stretched.image.get_pixel(3, 0)[0], 255);
/// ```
pub fn stretch_contrast(
    image: &GrayImage,
    low_percentile: f32,
    high_percentile: f32,
) -> Result<ContrastStretchResult, PreprocessingError> {
    let start_time = std::time::Instant::now();

    if !(0.0..100.0).contains(&low_percentile)
        || !(low_percentile < high_percentile && high_percentile <= 100.0)
    {
        return Err(PreprocessingError::ProcessingFailed {
            message: format!(
                "Invalid percentiles: low={}, high={}. Must satisfy 0 <= low < high <= 100",
                low_percentile, high_percentile
            ),
        });
    }

    let total_pixels = u64::from(image.width()) * u64::from(image.height());
    if total_pixels == 0 {
        return Err(PreprocessingError::ProcessingFailed {
            message: "Image has no pixels".to_string(),
        });
    }

    let mut histogram = [0u64; 256];
    for pixel in image.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let (low, high) = find_cut_levels(&histogram, total_pixels, low_percentile, high_percentile);

    let stretched = if high > low {
        let range = f32::from(high - low);
        let mut out = image.clone();
        for pixel in out.pixels_mut() {
            let value = f32::from(pixel[0].clamp(low, high) - low) * 255.0 / range;
            pixel[0] = value.round() as u8;
        }
        out
    } else {
        image.clone()
    };

    let processing_time = start_time.elapsed();

    tracing::debug!(
        target: "ocr_preprocessing",
        "Contrast stretch completed in {:.2}ms: low={}, high={}, dimensions={}x{}",
        processing_time.as_millis(),
        low,
        high,
        stretched.width(),
        stretched.height()
    );

    Ok(ContrastStretchResult {
        image: stretched,
        low,
        high,
        processing_time_ms: processing_time.as_millis() as u32,
    })
}

/// Sharpens text edges with an unsharp mask.
///
/// # Arguments
///
/// * `image` - The greyscale input image
/// * `sigma` - Gaussian blur sigma of the mask (0 < sigma <= 10)
/// * `threshold` - Minimum brightness difference before sharpening applies
pub fn sharpen(
    image: &GrayImage,
    sigma: f32,
    threshold: i32,
) -> Result<SharpenedImageResult, PreprocessingError> {
    let start_time = std::time::Instant::now();

    if sigma <= 0.0 || sigma > 10.0 {
        return Err(PreprocessingError::ProcessingFailed {
            message: format!("Invalid sigma value: {}. Must be between 0.1 and 10.0", sigma),
        });
    }

    let sharpened = image::imageops::unsharpen(image, sigma, threshold);

    let processing_time = start_time.elapsed();

    tracing::debug!(
        target: "ocr_preprocessing",
        "Sharpening completed in {:.2}ms: sigma={:.2}, threshold={}, dimensions={}x{}",
        processing_time.as_millis(),
        sigma,
        threshold,
        sharpened.width(),
        sharpened.height()
    );

    Ok(SharpenedImageResult {
        image: sharpened,
        sigma,
        threshold,
        processing_time_ms: processing_time.as_millis() as u32,
    })
}

/// Histogram levels at the requested percentiles
fn find_cut_levels(
    histogram: &[u64; 256],
    total_pixels: u64,
    low_percentile: f32,
    high_percentile: f32,
) -> (u8, u8) {
    let low_cut = (total_pixels as f64 * f64::from(low_percentile) / 100.0) as u64;
    let high_cut = (total_pixels as f64 * f64::from(100.0 - high_percentile) / 100.0) as u64;

    let mut cumulative = 0u64;
    let mut low = 0u8;
    for (level, &count) in histogram.iter().enumerate() {
        cumulative += count;
        if cumulative > low_cut {
            low = level as u8;
            break;
        }
    }

    cumulative = 0;
    let mut high = 255u8;
    for (level, &count) in histogram.iter().enumerate().rev() {
        cumulative += count;
        if cumulative > high_cut {
            high = level as u8;
            break;
        }
    }

    (low, high.max(low))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn gradient(width: u32, from: u8, to: u8) -> GrayImage {
        GrayImage::from_fn(width, 1, |x, _| {
            let t = x as f32 / (width - 1) as f32;
            Luma([(f32::from(from) + t * f32::from(to - from)).round() as u8])
        })
    }

    #[test]
    fn test_stretch_maps_occupied_range_to_full_range() {
        let img = gradient(101, 50, 150);
        let result = stretch_contrast(&img, 0.0, 100.0).unwrap();

        assert_eq!((result.low, result.high), (50, 150));
        assert_eq!(result.image.get_pixel(0, 0)[0], 0);
        assert_eq!(result.image.get_pixel(100, 0)[0], 255);
    }

    #[test]
    fn test_stretch_leaves_flat_image_unchanged() {
        let img = GrayImage::from_pixel(8, 8, Luma([128]));
        let result = stretch_contrast(&img, 0.0, 100.0).unwrap();
        assert_eq!(result.image, img);
    }

    #[test]
    fn test_stretch_clips_outliers_with_percentiles() {
        // One black and one white outlier among mid-grey pixels
        let mut img = GrayImage::from_pixel(100, 1, Luma([120]));
        for x in 50..100 {
            img.put_pixel(x, 0, Luma([140]));
        }
        img.put_pixel(0, 0, Luma([0]));
        img.put_pixel(99, 0, Luma([255]));

        let result = stretch_contrast(&img, 2.0, 98.0).unwrap();
        assert_eq!((result.low, result.high), (120, 140));
    }

    #[test]
    fn test_stretch_rejects_invalid_percentiles() {
        let img = gradient(10, 0, 255);
        assert!(stretch_contrast(&img, 50.0, 40.0).is_err());
        assert!(stretch_contrast(&img, -1.0, 100.0).is_err());
        assert!(stretch_contrast(&img, 0.0, 101.0).is_err());
    }

    #[test]
    fn test_sharpen_keeps_dimensions() {
        let img = gradient(32, 0, 255);
        let result = sharpen(&img, 1.0, 1).unwrap();
        assert_eq!(result.image.dimensions(), img.dimensions());
    }

    #[test]
    fn test_sharpen_rejects_invalid_sigma() {
        let img = gradient(8, 0, 255);
        assert!(sharpen(&img, 0.0, 1).is_err());
        assert!(sharpen(&img, 11.0, 1).is_err());
    }
}
