use crate::processing::ReductionReport;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing summarization activity.
#[derive(Default)]
pub struct WorkerMetrics {
    documents_summarized: AtomicU64,
    documents_without_summary: AtomicU64,
    documents_aborted: AtomicU64,
    chunks_summarized: AtomicU64,
    chunks_failed: AtomicU64,
    reduction_rounds: AtomicU64,
    best_effort_results: AtomicU64,
}

impl WorkerMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the chunk-level work of one reduction.
    pub fn record_reduction(&self, report: &ReductionReport) {
        let failed = report.chunks_failed as u64;
        self.chunks_summarized
            .fetch_add(report.chunks_total as u64 - failed, Ordering::Relaxed);
        self.chunks_failed.fetch_add(failed, Ordering::Relaxed);
        self.reduction_rounds
            .fetch_add(report.rounds as u64, Ordering::Relaxed);
        if report.best_effort {
            self.best_effort_results.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a persisted summary.
    pub fn record_summarized(&self) {
        self.documents_summarized.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a document released without a summary.
    pub fn record_without_summary(&self) {
        self.documents_without_summary
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cycle aborted by a store failure.
    pub fn record_aborted(&self) {
        self.documents_aborted.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_summarized: self.documents_summarized.load(Ordering::Relaxed),
            documents_without_summary: self.documents_without_summary.load(Ordering::Relaxed),
            documents_aborted: self.documents_aborted.load(Ordering::Relaxed),
            chunks_summarized: self.chunks_summarized.load(Ordering::Relaxed),
            chunks_failed: self.chunks_failed.load(Ordering::Relaxed),
            reduction_rounds: self.reduction_rounds.load(Ordering::Relaxed),
            best_effort_results: self.best_effort_results.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of worker counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents whose summary was persisted.
    pub documents_summarized: u64,
    /// Documents released because the reducer produced nothing.
    pub documents_without_summary: u64,
    /// Cycles aborted by a store failure.
    pub documents_aborted: u64,
    /// Chunk summaries obtained from the backend.
    pub chunks_summarized: u64,
    /// Chunks dropped after exhausting retries.
    pub chunks_failed: u64,
    /// Map rounds executed across all documents.
    pub reduction_rounds: u64,
    /// Results returned unreduced because the depth cap was hit.
    pub best_effort_results: u64,
}
