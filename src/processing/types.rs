//! Core data types and error definitions for the summarization pipeline.

use crate::config::{Config, DEFAULT_FINAL_INSTRUCTION, DEFAULT_MAP_INSTRUCTION};
use crate::storage::StoreError;
use crate::summarization::StageSettings;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors produced while splitting raw text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// A window of zero characters can never cover the text.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Errors that abort the current document inside the work claimer.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The document store rejected a read or write.
    #[error("Document store request failed: {0}")]
    Store(#[from] StoreError),
}

/// Window size and overlap used by the text splitter, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingSettings {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters shared with the previous chunk.
    pub overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 4000,
            overlap: 200,
        }
    }
}

/// Knobs of the hierarchical reducer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducerSettings {
    /// Splitter window.
    pub chunking: ChunkingSettings,
    /// Token budget above which a merged result is reduced again.
    pub max_final_tokens: usize,
    /// Maximum number of re-reduction rounds before returning a best-effort result.
    pub max_depth: usize,
    /// Chunks summarized concurrently during the map stage.
    pub map_concurrency: usize,
    /// Model used for chunk summaries.
    pub map_model: String,
    /// Model used for the final merge.
    pub final_model: String,
}

impl ReducerSettings {
    /// Derive reducer settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunking: ChunkingSettings {
                chunk_size: config.chunk_size,
                overlap: config.chunk_overlap,
            },
            max_final_tokens: config.max_final_tokens,
            max_depth: config.max_reduction_depth,
            map_concurrency: config.map_concurrency.max(1),
            map_model: config.map_model.clone(),
            final_model: config.final_model.clone(),
        }
    }
}

/// System instructions for the two reduction stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instructions {
    /// Instruction for chunk summaries.
    pub map: String,
    /// Instruction for the final merge.
    pub final_merge: String,
}

impl Default for Instructions {
    fn default() -> Self {
        Self {
            map: DEFAULT_MAP_INSTRUCTION.to_string(),
            final_merge: DEFAULT_FINAL_INSTRUCTION.to_string(),
        }
    }
}

impl Instructions {
    /// Use a stored prompt for both stages, or the built-in defaults when there is none.
    pub fn from_stored_prompt(prompt: Option<String>) -> Self {
        match prompt.filter(|text| !text.trim().is_empty()) {
            Some(text) => Self {
                map: text.clone(),
                final_merge: text,
            },
            None => Self::default(),
        }
    }

    pub(crate) fn map_stage(&self, settings: &ReducerSettings) -> StageSettings {
        StageSettings::new(settings.map_model.clone(), self.map.clone())
    }

    pub(crate) fn final_stage(&self, settings: &ReducerSettings) -> StageSettings {
        StageSettings::new(settings.final_model.clone(), self.final_merge.clone())
    }
}

/// What one call of the hierarchical reducer produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReductionReport {
    /// Final summary; `None` when no chunk of some round could be summarized.
    pub summary: Option<String>,
    /// Map rounds executed (1 for a document that fit a single pass).
    pub rounds: usize,
    /// Chunks sent to the backend across all rounds.
    pub chunks_total: usize,
    /// Chunks whose summary was dropped after exhausting retries.
    pub chunks_failed: usize,
    /// Set when the depth cap was hit and the merged text was returned unreduced.
    pub best_effort: bool,
    /// Whether the final merge request was issued.
    pub final_merge: bool,
}

/// Tuning for the work claimer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Claim cycles after which a document becomes `failed`; `0` retries forever.
    pub max_document_attempts: u32,
    /// In-progress claims older than this may be taken over by another worker.
    pub claim_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_document_attempts: 3,
            claim_timeout: Duration::from_secs(3600),
        }
    }
}

impl WorkerSettings {
    /// Derive worker settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_document_attempts: config.max_document_attempts,
            claim_timeout: Duration::from_secs(config.claim_timeout_secs),
        }
    }
}

/// Result of a single claim cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// No document is eligible for processing.
    Idle,
    /// A summary was produced and persisted.
    Summarized {
        /// Document identifier.
        document_id: i64,
        /// Characters of the raw text.
        source_chars: usize,
        /// Characters of the persisted summary.
        summary_chars: usize,
        /// Whether the summary is an unreduced best-effort merge.
        best_effort: bool,
    },
    /// The reducer produced nothing; the document stays unsummarized.
    NoSummary {
        /// Document identifier.
        document_id: i64,
        /// Claim cycles spent on the document so far.
        attempts: u32,
        /// Whether the document was moved to the terminal `failed` state.
        marked_failed: bool,
    },
    /// A store error aborted the cycle; nothing was written for the document.
    Aborted {
        /// Rendered error.
        error: String,
    },
}

impl ClaimOutcome {
    /// Whether the cycle found no work.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}
