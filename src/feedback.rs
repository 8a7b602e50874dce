//! Feedback store: pin/dismiss/click-related events and score reranking.
//!
//! A process-global singleton, scoped to the active database, guarded by a
//! single lock. `rerank` is a pure function over a snapshot of the aggregated
//! weights: it never mutates state and never drops a result.

use crate::vector_store::SearchResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Pin,
    Unpin,
    Dismiss,
    ClickRelated,
}

/// Identifies one side of a feedback pair. A query-sourced ref carries the raw
/// query string as its fingerprint; a chunk ref carries the chunk's
/// location and an optional content fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRef {
    pub file_path: String,
    pub chunk_index: u32,
    pub fingerprint: Option<String>,
}

impl ChunkRef {
    pub fn new(file_path: impl Into<String>, chunk_index: u32) -> Self {
        Self {
            file_path: file_path.into(),
            chunk_index,
            fingerprint: None,
        }
    }

    /// Synthetic source ref for query-sourced feedback.
    pub fn for_query(query: &str) -> Self {
        Self {
            file_path: String::new(),
            chunk_index: 0,
            fingerprint: Some(query.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub kind: EventKind,
    pub source: ChunkRef,
    pub target: ChunkRef,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackStats {
    pub event_count: usize,
    pub pinned_pairs: usize,
    pub dismissed_pairs: usize,
}

fn weight_of(kind: EventKind) -> f32 {
    match kind {
        EventKind::Pin => 1.0,
        EventKind::Unpin => 0.0, // cancels: handled by dedup-and-replace, not addition
        EventKind::Dismiss => -1.0,
        EventKind::ClickRelated => 0.25,
    }
}

/// Aggregated, de-duplicated feedback: one event per `(kind, source, target)`,
/// folded into a single signed weight per `(source, target)` pair.
#[derive(Debug, Default)]
struct FeedbackState {
    events: HashMap<(EventKind, ChunkRef, ChunkRef), FeedbackEvent>,
    weights: HashMap<(ChunkRef, ChunkRef), f32>,
}

impl FeedbackState {
    fn record(&mut self, event: FeedbackEvent) {
        let key = (event.kind, event.source.clone(), event.target.clone());
        let pair = (event.source.clone(), event.target.clone());

        if event.kind == EventKind::Unpin {
            // Cancels a prior pin: drop the pin event and its contribution.
            let pin_key = (EventKind::Pin, event.source.clone(), event.target.clone());
            if self.events.remove(&pin_key).is_some() {
                self.recompute_pair(&pair);
            }
            self.events.insert(key, event);
            return;
        }

        self.events.insert(key, event);
        self.recompute_pair(&pair);
    }

    fn recompute_pair(&mut self, pair: &(ChunkRef, ChunkRef)) {
        let total: f32 = self
            .events
            .values()
            .filter(|e| e.source == pair.0 && e.target == pair.1 && e.kind != EventKind::Unpin)
            .map(|e| weight_of(e.kind))
            .sum();
        if total == 0.0 {
            self.weights.remove(pair);
        } else {
            self.weights.insert(pair.clone(), total);
        }
    }

    fn weight(&self, source: &ChunkRef, target: &ChunkRef) -> f32 {
        self.weights
            .get(&(source.clone(), target.clone()))
            .copied()
            .unwrap_or(0.0)
    }

    fn stats(&self) -> FeedbackStats {
        let pinned_pairs = self
            .events
            .values()
            .filter(|e| e.kind == EventKind::Pin)
            .filter(|e| self.weight(&e.source, &e.target) > 0.0)
            .count();
        let dismissed_pairs = self.weights.values().filter(|&&w| w < 0.0).count();
        FeedbackStats {
            event_count: self.events.len(),
            pinned_pairs,
            dismissed_pairs,
        }
    }
}

/// Internally-locked feedback store. One instance is owned by each `Engine`,
/// scoped to that engine's active database: a hot-swap drops the old
/// `Engine` (and its store) and constructs a fresh one for the newly-opened
/// database rather than mutating a shared instance in place.
pub struct FeedbackStore {
    state: Mutex<FeedbackState>,
    alpha: f32,
}

impl FeedbackStore {
    pub fn new(alpha: f32) -> Self {
        Self {
            state: Mutex::new(FeedbackState::default()),
            alpha,
        }
    }

    pub fn record(&self, event: FeedbackEvent) {
        self.state.lock().record(event);
    }

    pub fn stats(&self) -> FeedbackStats {
        self.state.lock().stats()
    }

    /// Adjusts `results`' scores by `-alpha * weight(source_ref -> result_ref)`
    /// so pinned pairs rank earlier and dismissed pairs rank later. Never drops
    /// a result ("it never filters").
    pub fn rerank(&self, mut results: Vec<SearchResult>, source_ref: &ChunkRef) -> Vec<SearchResult> {
        let state = self.state.lock();
        for r in &mut results {
            let target = ChunkRef::new(r.file_path.clone(), r.chunk_index);
            let weight = state.weight(source_ref, &target);
            r.score -= self.alpha * weight;
        }
        drop(state);
        results.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn event(kind: EventKind, source: &ChunkRef, target: &ChunkRef) -> FeedbackEvent {
        FeedbackEvent {
            kind,
            source: source.clone(),
            target: target.clone(),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn result(file: &str, idx: u32, score: f32) -> SearchResult {
        SearchResult {
            file_path: file.to_string(),
            chunk_index: idx,
            text: String::new(),
            score,
            custom: BTreeMap::new(),
        }
    }

    #[test]
    fn duplicate_events_are_deduplicated() {
        let mut state = FeedbackState::default();
        let source = ChunkRef::for_query("q");
        let target = ChunkRef::new("a.txt", 0);
        state.record(event(EventKind::Pin, &source, &target));
        state.record(event(EventKind::Pin, &source, &target));
        assert_eq!(state.events.len(), 1);
        assert_eq!(state.weight(&source, &target), 1.0);
    }

    #[test]
    fn unpin_cancels_prior_pin() {
        let mut state = FeedbackState::default();
        let source = ChunkRef::for_query("q");
        let target = ChunkRef::new("a.txt", 0);
        state.record(event(EventKind::Pin, &source, &target));
        state.record(event(EventKind::Unpin, &source, &target));
        assert_eq!(state.weight(&source, &target), 0.0);
    }

    #[test]
    fn dismiss_is_negative_weight() {
        let mut state = FeedbackState::default();
        let source = ChunkRef::for_query("q");
        let target = ChunkRef::new("a.txt", 0);
        state.record(event(EventKind::Dismiss, &source, &target));
        assert_eq!(state.weight(&source, &target), -1.0);
    }

    #[test]
    fn click_related_contributes_a_quarter_weight() {
        let mut state = FeedbackState::default();
        let source = ChunkRef::for_query("q");
        let target = ChunkRef::new("a.txt", 0);
        state.record(event(EventKind::ClickRelated, &source, &target));
        assert_eq!(state.weight(&source, &target), 0.25);
    }

    #[test]
    fn rerank_moves_pinned_result_earlier_without_dropping_any() {
        let store = FeedbackStore::new(0.5);
        let source = ChunkRef::for_query("q");
        let target = ChunkRef::new("b.txt", 0);
        store.record(event(EventKind::Pin, &source, &target));

        let results = vec![result("a.txt", 0, 0.1), result("b.txt", 0, 0.2)];
        let reranked = store.rerank(results, &source);

        assert_eq!(reranked.len(), 2);
        assert_eq!(reranked[0].file_path, "b.txt");
    }

    #[test]
    fn rerank_moves_dismissed_result_later_without_dropping_any() {
        let store = FeedbackStore::new(0.5);
        let source = ChunkRef::for_query("q");
        let target = ChunkRef::new("a.txt", 0);
        store.record(event(EventKind::Dismiss, &source, &target));

        let results = vec![result("a.txt", 0, 0.1), result("b.txt", 0, 0.2)];
        let reranked = store.rerank(results, &source);

        assert_eq!(reranked.len(), 2);
        assert_eq!(reranked[0].file_path, "b.txt");
    }

    #[test]
    fn stats_counts_pinned_and_dismissed_pairs() {
        let mut state = FeedbackState::default();
        let source = ChunkRef::for_query("q");
        state.record(event(EventKind::Pin, &source, &ChunkRef::new("a.txt", 0)));
        state.record(event(EventKind::Dismiss, &source, &ChunkRef::new("b.txt", 0)));
        let stats = state.stats();
        assert_eq!(stats.event_count, 2);
        assert_eq!(stats.pinned_pairs, 1);
        assert_eq!(stats.dismissed_pairs, 1);
    }
}
