//! # Health Scoring Module
//!
//! Deterministic 0-100 health score for a [`NutrientRecord`].
//!
//! ## Algorithm
//!
//! Start at 100 and apply every rule below to the same record, adding the deltas:
//!
//! | Nutrient | Penalty                              | Bonus              |
//! |----------|--------------------------------------|--------------------|
//! | sugar    | > 10 g: −min(30, (s − 10) × 1.5)     | < 5 g: +5          |
//! | fat      | > 15 g: −min(25, (f − 15) × 2)       | < 5 g: +5          |
//! | sodium   | > 400 mg: −min(25, (na − 400) / 20)  | < 150 mg: +5       |
//! | protein  |                                      | > 10 g: +min(15, (p − 10) × 1.5) |
//! | fiber    |                                      | > 3 g: +min(10, (fi − 3) × 2)    |
//! | calories | > 400: −10                           | < 200: +5          |
//!
//! The sum is rounded half up and clamped to `0..=100`. Unknown nutrients are zero,
//! so an unreadable label earns every "low" bonus and scores 100.

use crate::models::{HealthLevel, NutrientRecord, ScoreAdjustment, ScoreFactor, ScoreResult};

pub const BASE_SCORE: f64 = 100.0;

/// Score a nutrient record.
///
/// Pure and total. A NaN field fails every comparison and fires no rule.
///
/// # Examples
///
/// ```
/// use nutri_scan::health_score::calculate_health_score;
/// use nutri_scan::models::{HealthLevel, NutrientRecord};
///
/// let record = NutrientRecord {
///     calories: 500,
///     sugar_grams: 20.0,
///     fat_grams: 20.0,
///     sodium_milligrams: 500.0,
///     ..NutrientRecord::default()
/// };
/// let result = calculate_health_score(&record);
/// assert_eq!(result.health_score, 60);
/// assert_eq!(result.health_level, HealthLevel::Moderate);
/// ```
pub fn calculate_health_score(record: &NutrientRecord) -> ScoreResult {
    let mut adjustments = Vec::new();
    let mut apply = |factor: ScoreFactor, delta: f64| adjustments.push(ScoreAdjustment { factor, delta });

    let sugar = record.sugar_grams;
    if sugar > 10.0 {
        apply(ScoreFactor::Sugar, -((sugar - 10.0) * 1.5).min(30.0));
    } else if sugar < 5.0 {
        apply(ScoreFactor::Sugar, 5.0);
    }

    let fat = record.fat_grams;
    if fat > 15.0 {
        apply(ScoreFactor::Fat, -((fat - 15.0) * 2.0).min(25.0));
    } else if fat < 5.0 {
        apply(ScoreFactor::Fat, 5.0);
    }

    let sodium = record.sodium_milligrams;
    if sodium > 400.0 {
        apply(ScoreFactor::Sodium, -((sodium - 400.0) / 20.0).min(25.0));
    } else if sodium < 150.0 {
        apply(ScoreFactor::Sodium, 5.0);
    }

    let protein = record.protein_grams;
    if protein > 10.0 {
        apply(ScoreFactor::Protein, ((protein - 10.0) * 1.5).min(15.0));
    }

    let fiber = record.fiber_grams;
    if fiber > 3.0 {
        apply(ScoreFactor::Fiber, ((fiber - 3.0) * 2.0).min(10.0));
    }

    if record.calories > 400 {
        apply(ScoreFactor::Calories, -10.0);
    } else if record.calories < 200 {
        apply(ScoreFactor::Calories, 5.0);
    }

    let raw_score = BASE_SCORE + adjustments.iter().map(|a| a.delta).sum::<f64>();
    let health_score = round_and_clamp(raw_score);

    ScoreResult {
        health_score,
        health_level: HealthLevel::from_score(health_score),
        raw_score,
        adjustments,
    }
}

/// Round half up, then clamp into `0..=100`
pub fn round_and_clamp(raw_score: f64) -> u8 {
    let rounded = (raw_score + 0.5).floor();
    if rounded.is_nan() {
        return 0;
    }
    rounded.clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_record_scores_full_marks() {
        let result = calculate_health_score(&NutrientRecord::default());
        assert_eq!(result.raw_score, 120.0);
        assert_eq!(result.health_score, 100);
        assert_eq!(result.health_level, HealthLevel::Healthy);
        assert_eq!(result.adjustments.len(), 4);
    }

    #[test]
    fn test_penalties_are_capped() {
        let record = NutrientRecord {
            calories: 900,
            sugar_grams: 100.0,
            fat_grams: 100.0,
            sodium_milligrams: 5000.0,
            ..NutrientRecord::default()
        };
        let result = calculate_health_score(&record);
        assert_eq!(result.raw_score, 100.0 - 30.0 - 25.0 - 25.0 - 10.0);
        assert_eq!(result.health_score, 10);
        assert_eq!(result.health_level, HealthLevel::Unhealthy);
    }

    #[test]
    fn test_bonuses_are_capped() {
        let record = NutrientRecord {
            calories: 300,
            sugar_grams: 7.0,
            fat_grams: 10.0,
            sodium_milligrams: 200.0,
            protein_grams: 50.0,
            fiber_grams: 20.0,
            ..NutrientRecord::default()
        };
        let result = calculate_health_score(&record);
        assert_eq!(result.raw_score, 125.0);
        assert_eq!(result.health_score, 100);
    }

    #[test]
    fn test_boundaries_fire_nothing() {
        // Exactly at each threshold no rule applies
        let record = NutrientRecord {
            calories: 200,
            sugar_grams: 5.0,
            fat_grams: 5.0,
            sodium_milligrams: 150.0,
            protein_grams: 10.0,
            fiber_grams: 3.0,
            ..NutrientRecord::default()
        };
        let result = calculate_health_score(&record);
        assert!(result.adjustments.is_empty());
        assert_eq!(result.health_score, 100);
    }

    #[test]
    fn test_rounds_half_up() {
        // sugar 11 -> -1.5, everything else neutral
        let record = NutrientRecord {
            calories: 300,
            sugar_grams: 11.0,
            fat_grams: 10.0,
            sodium_milligrams: 200.0,
            ..NutrientRecord::default()
        };
        let result = calculate_health_score(&record);
        assert_eq!(result.raw_score, 98.5);
        assert_eq!(result.health_score, 99);
    }

    #[test]
    fn test_nan_fires_no_rule() {
        let record = NutrientRecord {
            calories: 300,
            sugar_grams: f64::NAN,
            fat_grams: 10.0,
            sodium_milligrams: 200.0,
            ..NutrientRecord::default()
        };
        let result = calculate_health_score(&record);
        assert!(result.adjustments.is_empty());
        assert_eq!(result.health_score, 100);
    }

    #[test]
    fn test_round_and_clamp() {
        assert_eq!(round_and_clamp(-3.0), 0);
        assert_eq!(round_and_clamp(49.5), 50);
        assert_eq!(round_and_clamp(49.49), 49);
        assert_eq!(round_and_clamp(145.0), 100);
        assert_eq!(round_and_clamp(f64::NAN), 0);
    }
}
