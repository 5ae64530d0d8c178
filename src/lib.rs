//! # NutriScan
//!
//! Reads nutrition facts labels from photos with OCR, extracts the nutrient
//! values, scores them from 0 to 100 and stores the result per user with
//! progress notifications along the way.

pub mod circuit_breaker;
pub mod config;
pub mod db;
pub mod errors;
pub mod extraction;
pub mod health_score;
pub mod image_validation;
pub mod instance_manager;
pub mod models;
pub mod notifications;
pub mod observability;
pub mod observability_config;
pub mod ocr;
pub mod ocr_config;
pub mod ocr_errors;
pub mod pipeline;
pub mod pipeline_errors;
pub mod preprocessing;
pub mod recommendations;
pub mod store;

// Re-export types for easier access
pub use models::{AnalysisResult, HealthLevel, HistoryPage, NutrientRecord, ScoreResult, StoredAnalysis};
pub use pipeline::{AnalysisService, ImageInput};
