//! # Recommendation Rules
//!
//! Ordered advisory messages derived from a nutrient record and its score.

use crate::models::NutrientRecord;

pub const HIGH_SUGAR: &str = "High sugar content. Consider limiting added sugars.";
pub const HIGH_SODIUM: &str = "High sodium levels. Watch your daily salt intake.";
pub const HIGH_FAT: &str = "Contains high fat. Choose leaner alternatives when possible.";
pub const LOW_PROTEIN: &str = "Low protein. Consider pairing with a protein-rich food.";
pub const LOW_FIBER: &str = "Low in fiber. Add vegetables or whole grains to your meal.";
pub const BALANCED: &str = "This item fits well within a balanced diet!";

/// Evaluate the rules in fixed order; never returns an empty list.
///
/// 1. sugar > 10 g
/// 2. sodium > 400 mg
/// 3. fat > 15 g
/// 4. protein < 5 g and score < 70
/// 5. fiber < 2 g
///
/// When no rule fires the single [`BALANCED`] message is returned.
pub fn generate_recommendations(record: &NutrientRecord, health_score: u8) -> Vec<String> {
    let rules: [(bool, &str); 5] = [
        (record.sugar_grams > 10.0, HIGH_SUGAR),
        (record.sodium_milligrams > 400.0, HIGH_SODIUM),
        (record.fat_grams > 15.0, HIGH_FAT),
        (record.protein_grams < 5.0 && health_score < 70, LOW_PROTEIN),
        (record.fiber_grams < 2.0, LOW_FIBER),
    ];

    let mut recommendations: Vec<String> = rules
        .iter()
        .filter(|(fired, _)| *fired)
        .map(|(_, message)| message.to_string())
        .collect();

    if recommendations.is_empty() {
        recommendations.push(BALANCED.to_string());
    }
    recommendations
}
