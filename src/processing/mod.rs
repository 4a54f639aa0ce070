//! Summarization pipeline: splitting, length estimation, hierarchical reduction, and the
//! work claimer that feeds it documents.

pub mod chunking;
pub mod reducer;
mod service;
#[cfg(test)]
pub(crate) mod test_support;
pub mod tokens;
pub mod types;
pub mod worker;

pub use chunking::split_text;
pub use reducer::{HierarchicalReducer, SUMMARY_SEPARATOR};
pub use service::{SetupError, build_reducer, connect_worker};
pub use tokens::{EstimatorKind, LengthEstimator};
pub use types::{
    ChunkingError, ChunkingSettings, ClaimOutcome, Instructions, ReducerSettings,
    ReductionReport, WorkerError, WorkerSettings,
};
pub use worker::{RunOptions, WorkClaimer};
