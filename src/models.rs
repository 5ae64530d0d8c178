//! # Analysis Data Model
//!
//! Value types that flow through the label analysis pipeline. None of them is
//! mutated after construction. JSON field names are camelCase so that the
//! serialized result carries `extractedData`, `healthScore`, `healthLevel` and
//! `recommendations` as external callers expect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A nutrient found by the generic `name: value unit` scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalNutrient {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

/// Structured nutrient values extracted from a label.
///
/// Fields whose pattern did not match are zero, not missing. A label that OCR
/// could not read therefore scores as a very lean product.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NutrientRecord {
    /// Energy per serving in kcal
    pub calories: u32,
    pub sugar_grams: f64,
    pub fat_grams: f64,
    pub sodium_milligrams: f64,
    pub protein_grams: f64,
    pub fiber_grams: f64,
    pub carbohydrate_grams: f64,
    /// Free text after "serving size", empty when absent
    pub serving_size: String,
    /// Every `name: value unit` occurrence, in order of appearance
    pub additional_nutrients: Vec<AdditionalNutrient>,
}

/// Qualitative band of a health score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HealthLevel {
    Healthy,
    Moderate,
    Unhealthy,
}

impl HealthLevel {
    pub const HEALTHY_MIN: u8 = 80;
    pub const MODERATE_MIN: u8 = 50;

    /// Map a clamped score to its level
    pub fn from_score(score: u8) -> Self {
        if score >= Self::HEALTHY_MIN {
            HealthLevel::Healthy
        } else if score >= Self::MODERATE_MIN {
            HealthLevel::Moderate
        } else {
            HealthLevel::Unhealthy
        }
    }

    /// Inclusive score range covered by this level
    pub fn score_range(&self) -> std::ops::RangeInclusive<u8> {
        match self {
            HealthLevel::Healthy => Self::HEALTHY_MIN..=100,
            HealthLevel::Moderate => Self::MODERATE_MIN..=Self::HEALTHY_MIN - 1,
            HealthLevel::Unhealthy => 0..=Self::MODERATE_MIN - 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLevel::Healthy => "Healthy",
            HealthLevel::Moderate => "Moderate",
            HealthLevel::Unhealthy => "Unhealthy",
        }
    }
}

impl std::fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HealthLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Healthy" => Ok(HealthLevel::Healthy),
            "Moderate" => Ok(HealthLevel::Moderate),
            "Unhealthy" => Ok(HealthLevel::Unhealthy),
            other => Err(format!("unknown health level '{}'", other)),
        }
    }
}

/// Nutrient factor that moved the score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreFactor {
    Sugar,
    Fat,
    Sodium,
    Protein,
    Fiber,
    Calories,
}

/// One adjustment applied to the starting score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreAdjustment {
    pub factor: ScoreFactor,
    /// Signed change, negative for penalties
    pub delta: f64,
}

/// Output of the health scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreResult {
    /// Rounded and clamped to 0..=100
    pub health_score: u8,
    pub health_level: HealthLevel,
    /// Sum before rounding and clamping, may exceed 100
    pub raw_score: f64,
    pub adjustments: Vec<ScoreAdjustment>,
}

/// A complete, successful analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Where the uploaded image was stored
    pub image_reference: String,
    pub original_image_name: Option<String>,
    pub extracted_data: NutrientRecord,
    pub health_score: u8,
    pub health_level: HealthLevel,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// An analysis as held by the store, owned by one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAnalysis {
    pub id: i64,
    pub user_id: i64,
    #[serde(flatten)]
    pub result: AnalysisResult,
}

/// One page of a user's analysis history, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub analyses: Vec<StoredAnalysis>,
    pub current_page: u32,
    pub total_pages: u32,
    pub total: u64,
}

impl HistoryPage {
    pub fn new(analyses: Vec<StoredAnalysis>, current_page: u32, limit: u32, total: u64) -> Self {
        let total_pages = if limit == 0 {
            0
        } else {
            total.div_ceil(u64::from(limit)) as u32
        };
        Self {
            analyses,
            current_page,
            total_pages,
            total,
        }
    }
}
