//! Shared service state

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use eduscan_core::RecognitionResult;

use crate::config::MockConfig;
use crate::recognizer::Recognizer;

/// A result persisted through `save_result`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedRecord {
    pub session_id: String,
    pub exam_id: i64,
    pub template_id: i64,
    pub result: RecognitionResult,
    pub saved_at: DateTime<Utc>,
}

/// State shared by every connection
#[derive(Clone)]
pub struct MockState {
    config: Arc<MockConfig>,
    recognizer: Arc<Recognizer>,
    saved: Arc<RwLock<Vec<SavedRecord>>>,
    sessions: Arc<AtomicU64>,
}

impl MockState {
    pub fn new(config: MockConfig) -> Self {
        Self {
            recognizer: Arc::new(Recognizer::from_config(&config)),
            config: Arc::new(config),
            saved: Arc::new(RwLock::new(Vec::new())),
            sessions: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &MockConfig {
        &self.config
    }

    pub fn recognizer(&self) -> &Recognizer {
        &self.recognizer
    }

    /// Whether `token` is one of the configured tokens
    pub fn is_authorized(&self, token: &str) -> bool {
        self.config.tokens.iter().any(|known| known == token)
    }

    /// Allocate an id for a new connection
    pub fn next_session_id(&self) -> String {
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        format!("scan-{:04}-{}", n, &uuid::Uuid::new_v4().simple().to_string()[..8])
    }

    /// Number of connections accepted so far
    pub fn session_count(&self) -> u64 {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn save(&self, record: SavedRecord) {
        self.saved.write().push(record);
    }

    /// Every saved result, oldest first
    pub fn saved(&self) -> Vec<SavedRecord> {
        self.saved.read().clone()
    }
}

impl Default for MockState {
    fn default() -> Self {
        Self::new(MockConfig::default())
    }
}
