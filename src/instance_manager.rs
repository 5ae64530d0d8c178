//! # OCR Instance Manager Module
//!
//! This module provides thread-safe OCR instance management for reusing Tesseract instances.
//! Reusing instances avoids paying the Tesseract initialization cost on every label.

use leptess::LepTess;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::ocr_config::{ModelType, OcrConfig};
use crate::ocr_errors::OcrError;

/// Thread-safe OCR instance manager for reusing Tesseract instances
///
/// Instances are keyed by `languages:model` and created on first request. Each
/// instance sits behind its own mutex, so concurrent recognitions with the same key
/// run one at a time while different keys proceed in parallel.
pub struct OcrInstanceManager {
    instances: Mutex<HashMap<String, Arc<Mutex<LepTess>>>>,
}

impl OcrInstanceManager {
    /// Create a new, empty OCR instance manager
    ///
    /// # Examples
    ///
    /// ```rust
    /// use nutri_scan::instance_manager::OcrInstanceManager;
    ///
    /// let manager = OcrInstanceManager::new();
    /// assert_eq!(manager.instance_count(), 0);
    /// ```
    pub fn new() -> Self {
        Self {
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Cache key for a language set and model type
    pub fn instance_key(languages: &str, model_type: ModelType) -> String {
        format!("{}:{}", languages, model_type.tessdata_dir())
    }

    /// Get or create an OCR instance for `languages` using the rest of `config`
    ///
    /// # Errors
    ///
    /// Returns `OcrError::Initialization` if Tesseract cannot be created with the
    /// requested languages or rejects a configuration variable.
    pub fn get_instance(
        &self,
        languages: &str,
        config: &OcrConfig,
    ) -> Result<Arc<Mutex<LepTess>>, OcrError> {
        let key = Self::instance_key(languages, config.model_type);

        if let Some(instance) = self.instances.lock().get(&key) {
            return Ok(Arc::clone(instance));
        }

        info!(
            "Creating new OCR instance for languages: {} with model: {}",
            languages,
            config.model_type.tessdata_dir()
        );

        let tessdata_path = Self::get_tessdata_path(config.model_type);

        let mut tess = LepTess::new(tessdata_path.as_deref(), languages).map_err(|e| {
            OcrError::Initialization(format!(
                "Failed to initialize Tesseract for '{}': {}",
                languages, e
            ))
        })?;

        tess.set_variable(
            leptess::Variable::TesseditPagesegMode,
            config.psm_mode.as_str(),
        )
        .map_err(|e| OcrError::Initialization(format!("Failed to set PSM mode: {}", e)))?;

        if let Some(whitelist) = &config.character_whitelist {
            tess.set_variable(leptess::Variable::TesseditCharWhitelist, whitelist)
                .map_err(|e| {
                    OcrError::Initialization(format!("Failed to set character whitelist: {}", e))
                })?;
            info!(
                "Configured Tesseract with character whitelist: {} characters",
                whitelist.len()
            );
        }

        // Another thread may have raced us here; keep whichever landed first
        let mut instances = self.instances.lock();
        let instance = instances
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(tess)));
        Ok(Arc::clone(instance))
    }

    /// Get the tessdata path for the specified model type
    ///
    /// Falls back to Tesseract's default lookup if no model-specific directory exists.
    fn get_tessdata_path(model_type: ModelType) -> Option<String> {
        let possible_paths = match model_type {
            ModelType::Fast => [
                "/usr/share/tesseract-ocr/5/tessdata_fast",
                "/usr/share/tesseract-ocr/4.00/tessdata_fast",
                "/usr/share/tessdata_fast",
                "/usr/local/share/tessdata_fast",
            ],
            ModelType::Best => [
                "/usr/share/tesseract-ocr/5/tessdata_best",
                "/usr/share/tesseract-ocr/4.00/tessdata_best",
                "/usr/share/tessdata_best",
                "/usr/local/share/tessdata_best",
            ],
        };

        for path in possible_paths {
            if std::path::Path::new(path).exists() {
                info!("Using tessdata path: {}", path);
                return Some(path.to_string());
            }
        }

        info!(
            "No specific tessdata path found for model type {:?}, using default",
            model_type
        );
        None
    }

    /// Drop every cached instance
    pub fn clear_all_instances(&self) {
        let mut instances = self.instances.lock();
        let count = instances.len();
        instances.clear();
        if count > 0 {
            info!("Cleared {count} OCR instances");
        }
    }

    /// Get the number of cached instances
    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }
}

impl Default for OcrInstanceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_key_includes_model() {
        assert_eq!(
            OcrInstanceManager::instance_key("eng", ModelType::Fast),
            "eng:tessdata_fast"
        );
        assert_eq!(
            OcrInstanceManager::instance_key("eng+fra", ModelType::Best),
            "eng+fra:tessdata_best"
        );
    }

    #[test]
    fn test_clear_on_empty_manager() {
        let manager = OcrInstanceManager::default();
        manager.clear_all_instances();
        assert_eq!(manager.instance_count(), 0);
    }
}
