//! Wiring of the reducer and work claimer from configuration.

use super::reducer::HierarchicalReducer;
use super::tokens::LengthEstimator;
use super::types::{ChunkingError, ReducerSettings, WorkerSettings};
use super::worker::WorkClaimer;
use crate::config::Config;
use crate::storage::{DocumentStore, StoreError};
use crate::summarization::{
    RetryPolicy, RetryingSummarizer, SummarizationClientError, build_summarization_client,
};
use thiserror::Error;

/// Errors raised while assembling the pipeline at startup.
#[derive(Debug, Error)]
pub enum SetupError {
    /// The backend client could not be built.
    #[error("Failed to initialize summarization client: {0}")]
    Client(#[from] SummarizationClientError),
    /// The configured chunk size is unusable.
    #[error("Invalid chunking configuration: {0}")]
    Chunking(#[from] ChunkingError),
    /// The document store could not be opened or migrated.
    #[error("Failed to open document store: {0}")]
    Store(#[from] StoreError),
}

/// Build the hierarchical reducer described by `config`.
pub fn build_reducer(config: &Config) -> Result<HierarchicalReducer, SetupError> {
    let client = build_summarization_client(config)?;
    let summarizer = RetryingSummarizer::new(
        client,
        RetryPolicy::new(config.max_retries, config.retry_delay()),
    );
    let estimator =
        LengthEstimator::for_model(config.token_estimator, &config.final_model, config.chars_per_token);
    let settings = ReducerSettings::from_config(config);
    tracing::debug!(
        estimator = ?estimator,
        max_final_tokens = settings.max_final_tokens,
        max_depth = settings.max_depth,
        "Reducer ready"
    );
    Ok(HierarchicalReducer::new(summarizer, estimator, settings)?)
}

/// Open the store, bring its schema up to date, and build a work claimer.
pub async fn connect_worker(config: &Config) -> Result<WorkClaimer, SetupError> {
    let reducer = build_reducer(config)?;
    let store = DocumentStore::connect(&config.database_url).await?;
    store.ensure_schema().await?;
    Ok(WorkClaimer::new(
        store,
        reducer,
        WorkerSettings::from_config(config),
    ))
}
