//! # Progress Notifications
//!
//! One-way, per-user event channel for analysis progress. Publishing never blocks
//! and never fails: events for users without a live subscriber are dropped, and a
//! subscriber that falls more than the channel capacity behind misses the overflow.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::{HealthLevel, StoredAnalysis};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Events sent to the owner of an analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum AnalysisEvent {
    #[serde(rename = "analysis-progress")]
    Progress {
        progress: u8,
        stage: String,
        #[serde(rename = "analysisId", skip_serializing_if = "Option::is_none", default)]
        analysis_id: Option<i64>,
    },
    #[serde(rename = "analysis-error")]
    Error { error: String },
    #[serde(rename = "new-analysis")]
    NewAnalysis {
        id: i64,
        #[serde(rename = "healthScore")]
        health_score: u8,
        #[serde(rename = "healthLevel")]
        health_level: HealthLevel,
        #[serde(rename = "createdAt")]
        created_at: DateTime<Utc>,
    },
}

impl AnalysisEvent {
    pub fn progress(progress: u8, stage: &str, analysis_id: Option<i64>) -> Self {
        AnalysisEvent::Progress {
            progress,
            stage: stage.to_string(),
            analysis_id,
        }
    }

    pub fn error(error: impl std::fmt::Display) -> Self {
        AnalysisEvent::Error {
            error: error.to_string(),
        }
    }

    /// Summary broadcast after a run has been stored
    pub fn new_analysis(stored: &StoredAnalysis) -> Self {
        AnalysisEvent::NewAnalysis {
            id: stored.id,
            health_score: stored.result.health_score,
            health_level: stored.result.health_level,
            created_at: stored.result.created_at,
        }
    }

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            AnalysisEvent::Progress { .. } => "analysis-progress",
            AnalysisEvent::Error { .. } => "analysis-error",
            AnalysisEvent::NewAnalysis { .. } => "new-analysis",
        }
    }
}

/// Sink for analysis events, keyed by user
pub trait ProgressPublisher: Send + Sync {
    /// Fire-and-forget delivery to the user's subscribers, if any
    fn publish(&self, user_id: i64, event: AnalysisEvent);
}

/// In-process publish/subscribe hub with one broadcast channel per user
pub struct ProgressHub {
    channels: Mutex<HashMap<i64, broadcast::Sender<AnalysisEvent>>>,
    capacity: usize,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Receive every event published for `user_id` from now on
    pub fn subscribe(&self, user_id: i64) -> broadcast::Receiver<AnalysisEvent> {
        self.channels
            .lock()
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Users with a channel that still has receivers
    pub fn active_users(&self) -> usize {
        self.channels
            .lock()
            .values()
            .filter(|sender| sender.receiver_count() > 0)
            .count()
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ProgressPublisher for ProgressHub {
    fn publish(&self, user_id: i64, event: AnalysisEvent) {
        let mut channels = self.channels.lock();
        let Some(sender) = channels.get(&user_id) else {
            trace!(user_id = %user_id, event = event.name(), "No subscriber, event dropped");
            return;
        };

        if sender.send(event).is_err() {
            // Every receiver is gone
            channels.remove(&user_id);
            trace!(user_id = %user_id, "Removed channel without receivers");
        }
    }
}
