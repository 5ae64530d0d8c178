//! # Nutrient Extraction Module
//!
//! Turns raw OCR text from a nutrition facts label into a [`NutrientRecord`].
//!
//! ## Algorithm
//!
//! 1. The text is normalized: lower-cased, every character that is not an ASCII
//!    letter, digit or whitespace becomes a space (percent signs and decimal points
//!    included), and whitespace runs collapse to a single space.
//! 2. One pattern per field is tried on the normalized text, in a fixed order.
//!    The first match wins and fields never compete for the same number.
//! 3. The serving size and the generic `name: value unit` nutrients are read from
//!    the raw text, since normalization removes the punctuation they rely on.
//!
//! Extraction never fails. Any field whose pattern does not match is zero (or an
//! empty string for the serving size).
//!
//! The keyword patterns use a lazy "anything" span between the keyword and the
//! number, so `Total Sugars 10g including 2g Added Sugars` yields `10`.

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, trace};

use crate::models::{AdditionalNutrient, NutrientRecord};

lazy_static! {
    static ref NON_LABEL_CHARS: Regex =
        Regex::new(r"[^a-z0-9\s]").expect("Invalid label character regex pattern");
    static ref WHITESPACE_RUN: Regex =
        Regex::new(r"\s+").expect("Invalid whitespace regex pattern");

    // Normalized text has no decimal points, so "2.5g" is read as 2
    static ref CALORIES_LEADING: Regex =
        Regex::new(r"(?i)calories\s*(\d+)").expect("Invalid calories regex pattern");
    static ref CALORIES_TRAILING: Regex =
        Regex::new(r"(?i)(\d+)\s*calories").expect("Invalid calories regex pattern");
    static ref SUGAR: Regex =
        Regex::new(r"(?i)sugars?.*?(\d+)\s*g?").expect("Invalid sugar regex pattern");
    static ref FAT: Regex = Regex::new(r"(?i)(?:total\s*)?fat.*?(\d+)\s*g?")
        .expect("Invalid fat regex pattern");
    static ref SODIUM: Regex = Regex::new(r"(?i)sodium.*?(\d+)\s*(?:mg)?")
        .expect("Invalid sodium regex pattern");
    static ref PROTEIN: Regex = Regex::new(r"(?i)protein.*?(\d+)\s*g?")
        .expect("Invalid protein regex pattern");
    static ref FIBER: Regex = Regex::new(r"(?i)(?:dietary\s*)?fiber.*?(\d+)\s*g?")
        .expect("Invalid fiber regex pattern");
    static ref CARBOHYDRATES: Regex =
        Regex::new(r"(?i)(?:total\s*)?carbohydrates?.*?(\d+)\s*g?")
            .expect("Invalid carbohydrate regex pattern");

    static ref SERVING_SIZE: Regex = Regex::new(r"(?i)serving\s+size\s*:?\s*([^,\n]+)")
        .expect("Invalid serving size regex pattern");
    static ref GENERIC_NUTRIENT: Regex =
        Regex::new(r"(?i)([a-z\s]+?)\s*:\s*(\d+\.?\d*)\s*(g|mg|mcg)")
            .expect("Invalid nutrient regex pattern");
}

/// Normalize OCR output before keyword matching.
///
/// # Examples
///
/// ```
/// use nutri_scan::extraction::normalize_label_text;
///
/// assert_eq!(normalize_label_text("Sodium: 5%\n  Iron"), "sodium 5 iron");
/// ```
pub fn normalize_label_text(raw_text: &str) -> String {
    let lowered = raw_text.to_lowercase();
    let stripped = NON_LABEL_CHARS.replace_all(&lowered, " ");
    WHITESPACE_RUN.replace_all(&stripped, " ").into_owned()
}

/// Extract a nutrient record from raw OCR text.
///
/// Pure and total: the same text always yields the same record, and text without
/// any recognizable keyword yields an all-zero record.
///
/// # Examples
///
/// ```
/// use nutri_scan::extraction::extract;
///
/// let record = extract("Calories 250 Total Fat 8g Sugars 12g Sodium 450mg Protein 3g");
/// assert_eq!(record.calories, 250);
/// assert_eq!(record.fat_grams, 8.0);
/// assert_eq!(record.sugar_grams, 12.0);
/// assert_eq!(record.sodium_milligrams, 450.0);
/// assert_eq!(record.protein_grams, 3.0);
/// ```
pub fn extract(raw_text: &str) -> NutrientRecord {
    let normalized = normalize_label_text(raw_text);
    trace!(normalized = %normalized, "Normalized label text");

    let record = NutrientRecord {
        calories: capture_first(&[&CALORIES_LEADING, &CALORIES_TRAILING], &normalized)
            .map(parse_calories)
            .unwrap_or(0),
        sugar_grams: capture_amount(&SUGAR, &normalized),
        fat_grams: capture_amount(&FAT, &normalized),
        sodium_milligrams: capture_amount(&SODIUM, &normalized),
        protein_grams: capture_amount(&PROTEIN, &normalized),
        fiber_grams: capture_amount(&FIBER, &normalized),
        carbohydrate_grams: capture_amount(&CARBOHYDRATES, &normalized),
        serving_size: extract_serving_size(raw_text),
        additional_nutrients: extract_additional_nutrients(raw_text),
    };

    debug!(
        calories = record.calories,
        sugar = record.sugar_grams,
        fat = record.fat_grams,
        sodium = record.sodium_milligrams,
        protein = record.protein_grams,
        fiber = record.fiber_grams,
        carbohydrates = record.carbohydrate_grams,
        additional_nutrients = record.additional_nutrients.len(),
        "Extracted nutrient record"
    );

    record
}

/// Serving size text up to the first comma or line break, trimmed
pub fn extract_serving_size(raw_text: &str) -> String {
    SERVING_SIZE
        .captures(raw_text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Every `name: value unit` occurrence in order of appearance, duplicates kept
pub fn extract_additional_nutrients(raw_text: &str) -> Vec<AdditionalNutrient> {
    GENERIC_NUTRIENT
        .captures_iter(raw_text)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().trim();
            let value = caps.get(2)?.as_str().parse::<f64>().ok()?;
            let unit = caps.get(3)?.as_str();
            Some(AdditionalNutrient {
                name: name.to_string(),
                value,
                unit: unit.to_string(),
            })
        })
        .collect()
}

/// First capture of the first pattern that matches
fn capture_first<'t>(patterns: &[&Regex], text: &'t str) -> Option<&'t str> {
    patterns
        .iter()
        .find_map(|pattern| pattern.captures(text).and_then(|caps| caps.get(1)))
        .map(|m| m.as_str())
}

fn capture_amount(pattern: &Regex, text: &str) -> f64 {
    capture_first(&[pattern], text)
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(0.0)
}

// The capture is all ASCII digits, so a parse failure can only be overflow.
fn parse_calories(digits: &str) -> u32 {
    digits.parse::<u32>().unwrap_or(u32::MAX)
}
