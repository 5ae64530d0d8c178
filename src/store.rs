//! # Analysis Store
//!
//! Persistence contract for finished analyses and an in-memory implementation.
//! The PostgreSQL implementation lives in [`crate::db`].
//!
//! Every read is scoped to the owning user: an id that belongs to someone else
//! behaves exactly like an id that does not exist.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::models::{AnalysisResult, StoredAnalysis};

/// Record store for analyses, newest first
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Persist a finished analysis and assign its id
    async fn save(&self, user_id: i64, result: &AnalysisResult) -> Result<StoredAnalysis>;

    /// One page (1-based) of the user's analyses plus the user's total count
    async fn list_by_user(
        &self,
        user_id: i64,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<StoredAnalysis>, u64)>;

    /// Fetch one analysis owned by `user_id`
    async fn find_by_id(&self, id: i64, user_id: i64) -> Result<Option<StoredAnalysis>>;

    /// Delete one analysis owned by `user_id`; `false` when nothing matched
    async fn delete_by_id(&self, id: i64, user_id: i64) -> Result<bool>;
}

/// Row offset of a 1-based page
pub fn page_offset(page: u32, page_size: u32) -> u64 {
    u64::from(page.saturating_sub(1)) * u64::from(page_size)
}

#[derive(Debug, Default)]
struct InMemoryState {
    next_id: i64,
    analyses: Vec<StoredAnalysis>,
}

/// Store used when no database is configured, and in tests
#[derive(Debug, Default)]
pub struct InMemoryAnalysisStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of analyses held for all users
    pub fn len(&self) -> usize {
        self.state.lock().analyses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AnalysisStore for InMemoryAnalysisStore {
    async fn save(&self, user_id: i64, result: &AnalysisResult) -> Result<StoredAnalysis> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let stored = StoredAnalysis {
            id: state.next_id,
            user_id,
            result: result.clone(),
        };
        state.analyses.push(stored.clone());

        debug!(analysis_id = %stored.id, user_id = %user_id, "Analysis stored in memory");
        Ok(stored)
    }

    async fn list_by_user(
        &self,
        user_id: i64,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<StoredAnalysis>, u64)> {
        let state = self.state.lock();
        let mut owned: Vec<&StoredAnalysis> = state
            .analyses
            .iter()
            .filter(|a| a.user_id == user_id)
            .collect();
        owned.sort_by(|a, b| {
            b.result
                .created_at
                .cmp(&a.result.created_at)
                .then(b.id.cmp(&a.id))
        });

        let total = owned.len() as u64;
        let offset = usize::try_from(page_offset(page, page_size)).unwrap_or(usize::MAX);
        let items = owned
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .cloned()
            .collect();

        Ok((items, total))
    }

    async fn find_by_id(&self, id: i64, user_id: i64) -> Result<Option<StoredAnalysis>> {
        let state = self.state.lock();
        Ok(state
            .analyses
            .iter()
            .find(|a| a.id == id && a.user_id == user_id)
            .cloned())
    }

    async fn delete_by_id(&self, id: i64, user_id: i64) -> Result<bool> {
        let mut state = self.state.lock();
        let before = state.analyses.len();
        state
            .analyses
            .retain(|a| !(a.id == id && a.user_id == user_id));
        Ok(state.analyses.len() < before)
    }
}
