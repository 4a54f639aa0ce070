//! Hierarchical map-reduce summarization.
//!
//! A document is split into overlapping windows, every window is summarized independently
//! (map), and the surviving summaries are joined with blank lines. A join that is still above
//! the token budget becomes the input of another round; otherwise one final request condenses
//! it. Rounds run in a loop with an explicit depth counter, so the cap on re-reductions is a
//! plain comparison rather than a recursion limit.

use super::chunking::split_text;
use super::tokens::LengthEstimator;
use super::types::{ChunkingError, Instructions, ReducerSettings, ReductionReport};
use crate::summarization::{RetryingSummarizer, StageSettings};
use futures_util::{StreamExt, stream};

/// Separator placed between chunk summaries when merging a round.
pub const SUMMARY_SEPARATOR: &str = "\n\n";

/// Drives map and reduce rounds over one document.
#[derive(Clone)]
pub struct HierarchicalReducer {
    summarizer: RetryingSummarizer,
    estimator: LengthEstimator,
    settings: ReducerSettings,
}

impl HierarchicalReducer {
    /// Build a reducer; fails when the configured chunk size is zero.
    pub fn new(
        summarizer: RetryingSummarizer,
        estimator: LengthEstimator,
        settings: ReducerSettings,
    ) -> Result<Self, ChunkingError> {
        if settings.chunking.chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        Ok(Self {
            summarizer,
            estimator,
            settings,
        })
    }

    /// Reduce `full_text` to a single summary.
    ///
    /// The report's `summary` is `None` when a round produced no usable chunk summary (empty
    /// input included) or when the final merge request failed.
    pub async fn reduce(&self, full_text: &str, instructions: &Instructions) -> ReductionReport {
        let map_stage = instructions.map_stage(&self.settings);
        let mut report = ReductionReport::default();
        let mut current = full_text.to_string();
        let mut depth = 0usize;

        loop {
            report.rounds += 1;
            let chunks = match split_text(
                &current,
                self.settings.chunking.chunk_size,
                self.settings.chunking.overlap,
            ) {
                Ok(chunks) => chunks,
                Err(error) => {
                    tracing::error!(error = %error, "Failed to split text");
                    return report;
                }
            };
            tracing::info!(
                depth,
                chunks = chunks.len(),
                chars = current.chars().count(),
                chunk_size = self.settings.chunking.chunk_size,
                "Summarizing chunks"
            );

            let mut summaries = self.map_chunks(&chunks, &map_stage).await;
            report.chunks_total += chunks.len();
            report.chunks_failed += chunks.len() - summaries.len();

            match summaries.len() {
                0 => {
                    tracing::warn!(depth, chunks = chunks.len(), "No chunk could be summarized");
                    return report;
                }
                1 => {
                    report.summary = summaries.pop();
                    return report;
                }
                _ => {}
            }

            let joined = summaries.join(SUMMARY_SEPARATOR);
            let joined_tokens = self.estimator.estimate_text(&joined);
            if joined_tokens > self.settings.max_final_tokens {
                if depth >= self.settings.max_depth {
                    tracing::warn!(
                        depth,
                        tokens = joined_tokens,
                        budget = self.settings.max_final_tokens,
                        "Maximum reduction depth reached; returning merged summaries"
                    );
                    report.best_effort = true;
                    report.summary = Some(joined);
                    return report;
                }
                tracing::info!(
                    depth,
                    summaries = summaries.len(),
                    tokens = joined_tokens,
                    budget = self.settings.max_final_tokens,
                    "Merged summaries still too large; reducing again"
                );
                depth += 1;
                current = joined;
                continue;
            }

            let final_stage = instructions.final_stage(&self.settings);
            let request_tokens = self
                .estimator
                .estimate_messages(&final_stage.request_for(&joined).messages);
            tracing::info!(
                depth,
                summaries = summaries.len(),
                request_tokens,
                model = %final_stage.model,
                "Issuing final merge"
            );
            report.final_merge = true;
            report.summary = self.summarizer.summarize(&final_stage, &joined).await;
            return report;
        }
    }

    /// Summarize every chunk with bounded concurrency, keeping source order.
    async fn map_chunks(&self, chunks: &[&str], stage: &StageSettings) -> Vec<String> {
        let summarizer = &self.summarizer;
        let mut tagged: Vec<(usize, Option<String>)> = stream::iter(chunks.iter().enumerate())
            .map(|(index, chunk)| async move {
                let summary = summarizer.summarize(stage, chunk).await;
                if summary.is_none() {
                    tracing::warn!(chunk = index, "Dropping chunk without summary");
                }
                (index, summary)
            })
            .buffer_unordered(self.settings.map_concurrency.max(1))
            .collect()
            .await;

        tagged.sort_unstable_by_key(|(index, _)| *index);
        tagged.into_iter().filter_map(|(_, summary)| summary).collect()
    }
}
