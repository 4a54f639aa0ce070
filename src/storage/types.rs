//! Shared types used by the document store.

use serde::Serialize;
use thiserror::Error;

/// Errors returned while talking to the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection string failed to parse.
    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),
    /// Query or connection failure reported by the driver.
    #[error("Database request failed: {0}")]
    Database(#[from] sqlx::Error),
    /// The documents table the extraction step should have created is missing.
    #[error("Table '{0}' does not exist")]
    MissingTable(String),
    /// A write guarded by a claim token matched no row.
    #[error("Claim {token} on document {document_id} is no longer held")]
    ClaimLost {
        /// Document identifier.
        document_id: i64,
        /// Token issued when the document was claimed.
        token: String,
    },
}

/// Processing state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Waiting for a worker (also the state of rows that predate the status column).
    Pending,
    /// Claimed by a worker.
    InProgress,
    /// Summary persisted.
    Done,
    /// Gave up after the configured number of attempts.
    Failed,
}

impl DocumentStatus {
    /// Value stored in the `summary_status` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// A document handed to exactly one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedDocument {
    /// Document identifier.
    pub id: i64,
    /// Raw OCR text.
    pub text: String,
    /// Token that must accompany every write for this claim.
    pub token: String,
    /// Claim cycles spent on the document, this one included.
    pub attempts: u32,
}

/// Number of documents per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    /// Eligible for a claim.
    pub pending: i64,
    /// Currently claimed.
    pub in_progress: i64,
    /// Summarized.
    pub done: i64,
    /// Terminally failed.
    pub failed: i64,
    /// Rows whose raw text has not been extracted yet.
    pub awaiting_text: i64,
}
