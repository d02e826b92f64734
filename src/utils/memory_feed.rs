//! In-memory polling feed for testing

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use crate::normalizer::RawPayload;
use crate::traits::*;
use crate::types::*;

#[derive(Debug, Clone)]
struct FeedEntry {
    at: DateTime<Utc>,
    payload: RawPayload,
}

/// Feed returning every stored payload at or after the cursor
///
/// The window is inclusive, so consecutive polls overlap the way real
/// provider date-range queries do.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeed {
    entries: Arc<RwLock<Vec<FeedEntry>>>,
    failures: Arc<RwLock<VecDeque<String>>>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a payload the provider reports at `at`
    pub fn push(&self, at: DateTime<Utc>, payload: RawPayload) -> ReconResult<()> {
        self.entries
            .write()
            .map_err(|_| poisoned())?
            .push(FeedEntry { at, payload });
        Ok(())
    }

    /// Make the next fetch fail
    pub fn fail_next(&self, message: impl Into<String>) -> ReconResult<()> {
        self.failures
            .write()
            .map_err(|_| poisoned())?
            .push_back(message.into());
        Ok(())
    }
}

fn poisoned() -> ReconError {
    ReconError::Feed("feed state lock poisoned".to_string())
}

#[async_trait]
impl TransactionFeed for MemoryFeed {
    async fn fetch_new_transactions(
        &self,
        tenant_id: &str,
        source_type: SourceType,
        since: Option<DateTime<Utc>>,
    ) -> ReconResult<Vec<RawPayload>> {
        if let Some(message) = self.failures.write().map_err(|_| poisoned())?.pop_front() {
            return Err(ReconError::Feed(message));
        }

        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .iter()
            .filter(|e| e.payload.tenant_id == tenant_id)
            .filter(|e| e.payload.source_type() == source_type)
            .filter(|e| since.is_none_or(|cursor| e.at >= cursor))
            .map(|e| e.payload.clone())
            .collect())
    }
}
