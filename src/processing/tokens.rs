//! Token-cost estimation for text spans and composed backend requests.
//!
//! Two strategies are available:
//!
//! - `Heuristic`: characters divided by a fixed ratio (4 by default). Cheap, deterministic and
//!   the default used to decide whether a merged result needs another reduction round.
//! - `Tiktoken`: exact BPE counts via `tiktoken-rs`, resolved from the model name and falling
//!   back to `cl100k_base` for models tiktoken does not know (typical for Ollama tags).
//!
//! Estimates only gate decisions. Nothing in the pipeline truncates text because of them.

use crate::summarization::ChatMessage;
use serde::Deserialize;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

/// Framing overhead added by chat backends for every message.
pub const TOKENS_PER_MESSAGE: usize = 4;
/// Tokens priming the assistant reply.
pub const REPLY_PRIMING_TOKENS: usize = 2;

/// Which estimation strategy to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    /// Character-count heuristic.
    Heuristic,
    /// BPE token counting.
    Tiktoken,
}

impl std::str::FromStr for EstimatorKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "heuristic" | "chars" => Ok(Self::Heuristic),
            "tiktoken" => Ok(Self::Tiktoken),
            _ => Err(()),
        }
    }
}

/// Estimates token cost of text.
#[derive(Clone)]
pub enum LengthEstimator {
    /// `ceil(chars / chars_per_token)`.
    Heuristic {
        /// Characters assumed per token; never zero.
        chars_per_token: usize,
    },
    /// Exact counts from a BPE encoding.
    Tiktoken(Arc<CoreBPE>),
}

impl std::fmt::Debug for LengthEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Heuristic { chars_per_token } => f
                .debug_struct("Heuristic")
                .field("chars_per_token", chars_per_token)
                .finish(),
            Self::Tiktoken(_) => f.write_str("Tiktoken"),
        }
    }
}

impl Default for LengthEstimator {
    fn default() -> Self {
        Self::heuristic(4)
    }
}

impl LengthEstimator {
    /// Character heuristic with the given ratio (clamped to at least 1).
    pub fn heuristic(chars_per_token: usize) -> Self {
        Self::Heuristic {
            chars_per_token: chars_per_token.max(1),
        }
    }

    /// Build the estimator for `kind`, resolving a BPE encoding for `model` when needed.
    pub fn for_model(kind: EstimatorKind, model: &str, chars_per_token: usize) -> Self {
        match kind {
            EstimatorKind::Heuristic => Self::heuristic(chars_per_token),
            EstimatorKind::Tiktoken => match resolve_encoding(model) {
                Some(encoding) => Self::Tiktoken(Arc::new(encoding)),
                None => {
                    tracing::warn!(
                        model,
                        "No tiktoken encoding available; using character heuristic"
                    );
                    Self::heuristic(chars_per_token)
                }
            },
        }
    }

    /// Estimated token cost of a text span.
    pub fn estimate_text(&self, text: &str) -> usize {
        match self {
            Self::Heuristic { chars_per_token } => text.chars().count().div_ceil(*chars_per_token),
            Self::Tiktoken(encoding) => encoding.encode_ordinary(text).len(),
        }
    }

    /// Estimated cost of a complete chat request, framing overhead included.
    pub fn estimate_messages(&self, messages: &[ChatMessage]) -> usize {
        let body: usize = messages
            .iter()
            .map(|message| {
                TOKENS_PER_MESSAGE
                    + self.estimate_text(message.role.as_str())
                    + self.estimate_text(&message.content)
            })
            .sum();
        body + REPLY_PRIMING_TOKENS
    }

    /// Whether `text` is estimated above `budget` tokens.
    pub fn exceeds(&self, text: &str, budget: usize) -> bool {
        self.estimate_text(text) > budget
    }
}

fn resolve_encoding(model: &str) -> Option<CoreBPE> {
    let model = model.trim();
    if let Ok(encoding) = get_bpe_from_model(model) {
        return Some(encoding);
    }
    let by_name = match model {
        "o200k_base" => o200k_base(),
        "p50k_base" => p50k_base(),
        "p50k_edit" => p50k_edit(),
        "r50k_base" | "gpt2" => r50k_base(),
        _ => {
            tracing::debug!(model, "Unknown tokenizer model; falling back to 'cl100k_base'");
            cl100k_base()
        }
    };
    by_name.ok()
}
