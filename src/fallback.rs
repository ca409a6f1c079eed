//! Provider fallback routing and retry accounting
//!
//! Pure bookkeeping, no timing: the [`FallbackManager`] tracks, per
//! segment, how many times each provider has been tried and which provider
//! is current, and aggregates per-provider statistics for the job. The
//! segment downloader consults it between attempts; sleeping and actual
//! fetching happen elsewhere.

use crate::config::ProviderConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

/// Per-provider usage statistics for one job
#[derive(Debug, Clone, Default)]
pub struct ProviderStats {
    /// Segments this provider delivered
    pub segments_downloaded: u64,
    /// Times this provider was switched to as a fallback
    pub fallback_uses: u64,
    /// When this provider last served or was switched to
    pub last_used: Option<SystemTime>,
}

/// Retry state for one segment's attempt sequence
#[derive(Debug, Default)]
struct SegmentRecord {
    /// Failures per provider id
    retries: HashMap<String, u32>,
    /// Provider currently pinned for this segment
    current: Option<String>,
    /// Provider that ultimately delivered the segment
    succeeded_on: Option<String>,
}

struct FallbackState {
    segments: HashMap<String, SegmentRecord>,
    stats: HashMap<String, ProviderStats>,
}

/// Provider ordering and retry accounting shared by all segment tasks
pub struct FallbackManager {
    /// Provider order: primary first, then its fallbacks
    order: Vec<Arc<ProviderConfig>>,
    state: Mutex<FallbackState>,
}

impl FallbackManager {
    /// Build from an ordered provider list (`[primary, fallbacks...]`)
    pub fn new(order: Vec<Arc<ProviderConfig>>) -> Arc<Self> {
        let stats = order
            .iter()
            .map(|p| (p.id.clone(), ProviderStats::default()))
            .collect();
        Arc::new(Self {
            order,
            state: Mutex::new(FallbackState {
                segments: HashMap::new(),
                stats,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, FallbackState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The primary provider (first in order)
    pub fn primary(&self) -> Option<&Arc<ProviderConfig>> {
        self.order.first()
    }

    /// Look up a provider by id
    pub fn provider(&self, id: &str) -> Option<&Arc<ProviderConfig>> {
        self.order.iter().find(|p| p.id == id)
    }

    /// Pin the segment to a provider if none is pinned yet; returns the
    /// current provider
    pub fn pin_current(&self, message_id: &str) -> Option<Arc<ProviderConfig>> {
        let mut state = self.lock();
        let record = state.segments.entry(message_id.to_string()).or_default();
        if record.current.is_none() {
            record.current = self.order.first().map(|p| p.id.clone());
        }
        let id = record.current.clone()?;
        drop(state);
        self.provider(&id).cloned()
    }

    /// Whether the segment may retry on this provider
    ///
    /// True while the recorded failure count is below the provider's
    /// `retry_attempts`.
    pub fn should_retry(&self, message_id: &str, provider: &ProviderConfig) -> bool {
        let state = self.lock();
        let count = state
            .segments
            .get(message_id)
            .and_then(|r| r.retries.get(&provider.id))
            .copied()
            .unwrap_or(0);
        count < provider.retry_attempts
    }

    /// Advance to the next provider in order after `current`
    ///
    /// Returns `None` when the order is exhausted. A successful advance
    /// re-pins the segment and counts as a fallback use for the new
    /// provider. Order membership is unique, so a provider is never
    /// revisited for the same segment.
    pub fn next_provider(
        &self,
        message_id: &str,
        current: &ProviderConfig,
    ) -> Option<Arc<ProviderConfig>> {
        let position = self.order.iter().position(|p| p.id == current.id)?;
        let next = self.order.get(position + 1)?.clone();

        let mut state = self.lock();
        let record = state.segments.entry(message_id.to_string()).or_default();
        record.current = Some(next.id.clone());
        let stats = state.stats.entry(next.id.clone()).or_default();
        stats.fallback_uses += 1;
        stats.last_used = Some(SystemTime::now());

        Some(next)
    }

    /// Record a failed attempt for the segment on this provider
    pub fn record_failure(&self, message_id: &str, provider: &ProviderConfig) {
        let mut state = self.lock();
        let record = state.segments.entry(message_id.to_string()).or_default();
        *record.retries.entry(provider.id.clone()).or_insert(0) += 1;
    }

    /// Failure count for a segment on a provider
    pub fn failure_count(&self, message_id: &str, provider: &ProviderConfig) -> u32 {
        let state = self.lock();
        state
            .segments
            .get(message_id)
            .and_then(|r| r.retries.get(&provider.id))
            .copied()
            .unwrap_or(0)
    }

    /// Record the provider that delivered the segment
    ///
    /// Clears the current-provider pin and bumps the provider's success
    /// stats.
    pub fn record_success(&self, message_id: &str, provider: &ProviderConfig) {
        let mut state = self.lock();
        let record = state.segments.entry(message_id.to_string()).or_default();
        record.succeeded_on = Some(provider.id.clone());
        record.current = None;

        let stats = state.stats.entry(provider.id.clone()).or_default();
        stats.segments_downloaded += 1;
        stats.last_used = Some(SystemTime::now());
    }

    /// Provider that delivered the segment, if it completed
    pub fn succeeded_on(&self, message_id: &str) -> Option<String> {
        let state = self.lock();
        state
            .segments
            .get(message_id)
            .and_then(|r| r.succeeded_on.clone())
    }

    /// Snapshot of per-provider statistics
    pub fn stats(&self) -> HashMap<String, ProviderStats> {
        self.lock().stats.clone()
    }
}
