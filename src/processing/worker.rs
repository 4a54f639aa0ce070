//! Claim-process-persist loop over the document store.

use super::reducer::HierarchicalReducer;
use super::types::{ClaimOutcome, Instructions, WorkerError, WorkerSettings};
use crate::metrics::{MetricsSnapshot, WorkerMetrics};
use crate::storage::{ClaimedDocument, DocumentStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Options for the driving loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Stop after this many claim cycles; `None` runs until interrupted.
    pub max_cycles: Option<usize>,
    /// Stop at the first cycle that finds no eligible document.
    pub stop_when_idle: bool,
    /// Pause after an idle or aborted cycle before polling again.
    pub idle_wait: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_cycles: None,
            stop_when_idle: false,
            idle_wait: Duration::from_secs(30),
        }
    }
}

/// Selects one unsummarized document at a time, reduces it, and records the result.
pub struct WorkClaimer {
    store: DocumentStore,
    reducer: HierarchicalReducer,
    settings: WorkerSettings,
    metrics: Arc<WorkerMetrics>,
}

impl WorkClaimer {
    /// Assemble a claimer from its collaborators.
    pub fn new(
        store: DocumentStore,
        reducer: HierarchicalReducer,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            reducer,
            settings,
            metrics: Arc::new(WorkerMetrics::new()),
        }
    }

    /// Counters accumulated by this claimer.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run one claim cycle. Store failures are logged and reported as
    /// [`ClaimOutcome::Aborted`]; they never escape as errors.
    ///
    /// The newest stored prompt is read once, right after the claim, and used for every
    /// request of that document.
    pub async fn claim_and_process(&self) -> ClaimOutcome {
        match self.try_claim_and_process().await {
            Ok(outcome) => outcome,
            Err(error) => {
                tracing::error!(error = %error, "Claim cycle aborted");
                self.metrics.record_aborted();
                ClaimOutcome::Aborted {
                    error: error.to_string(),
                }
            }
        }
    }

    async fn try_claim_and_process(&self) -> Result<ClaimOutcome, WorkerError> {
        self.store.ensure_schema().await?;

        let Some(claim) = self.store.claim_next(self.settings.claim_timeout).await? else {
            tracing::info!("No new documents to summarize");
            return Ok(ClaimOutcome::Idle);
        };
        let source_chars = claim.text.chars().count();
        tracing::info!(
            document_id = claim.id,
            chars = source_chars,
            attempt = claim.attempts,
            "Processing document"
        );

        // Resolved once per claim so every map and merge request of this document runs under
        // the same instruction, even if a newer prompt is stored mid-reduction.
        let instructions = match self.store.latest_prompt().await {
            Ok(prompt) => Instructions::from_stored_prompt(prompt),
            Err(error) => {
                self.release_after_store_error(&claim, &error).await;
                return Err(error.into());
            }
        };

        let report = self.reducer.reduce(&claim.text, &instructions).await;
        self.metrics.record_reduction(&report);

        match report.summary {
            Some(summary) => {
                if let Err(error) = self.store.complete(&claim, &summary).await {
                    self.release_after_store_error(&claim, &error).await;
                    return Err(error.into());
                }
                self.metrics.record_summarized();
                let summary_chars = summary.chars().count();
                tracing::info!(
                    document_id = claim.id,
                    summary_chars,
                    rounds = report.rounds,
                    best_effort = report.best_effort,
                    "Summary saved"
                );
                Ok(ClaimOutcome::Summarized {
                    document_id: claim.id,
                    source_chars,
                    summary_chars,
                    best_effort: report.best_effort,
                })
            }
            None => {
                let reason = format!(
                    "no summary after {} round(s); {}/{} chunk(s) failed",
                    report.rounds, report.chunks_failed, report.chunks_total
                );
                let marked_failed = self
                    .store
                    .release_failed(&claim, &reason, self.settings.max_document_attempts)
                    .await?;
                self.metrics.record_without_summary();
                if marked_failed {
                    tracing::error!(
                        document_id = claim.id,
                        attempts = claim.attempts,
                        "Summarization failed; document marked failed"
                    );
                } else {
                    tracing::warn!(
                        document_id = claim.id,
                        attempts = claim.attempts,
                        "Summarization failed; document left for retry"
                    );
                }
                Ok(ClaimOutcome::NoSummary {
                    document_id: claim.id,
                    attempts: claim.attempts,
                    marked_failed,
                })
            }
        }
    }

    /// Hand the claim back so the document does not sit in progress until the claim goes
    /// stale. The attempt still counts, but never marks the document failed.
    async fn release_after_store_error(&self, claim: &ClaimedDocument, error: &StoreError) {
        let reason = error.to_string();
        if let Err(release_error) = self.store.release_failed(claim, &reason, 0).await {
            tracing::warn!(
                document_id = claim.id,
                error = %release_error,
                "Failed to release claim after store error"
            );
        }
    }

    /// Drive claim cycles according to `options` until done or Ctrl-C is received.
    ///
    /// The Ctrl-C listener is installed before the first claim. Interruption is only observed
    /// between documents; an in-flight document always finishes its cycle.
    pub async fn run(&self, options: RunOptions) -> MetricsSnapshot {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Interrupt received; stopping after the current document");
                    shutdown_tx.send_replace(true);
                }
                Err(error) => tracing::warn!(error = %error, "Failed to listen for Ctrl-C"),
            }
        });
        // Let the listener register its handler before the first document starts.
        tokio::task::yield_now().await;

        let snapshot = self.run_until_shutdown(options, shutdown_rx).await;
        listener.abort();
        snapshot
    }

    /// Drive claim cycles until `options` are satisfied or `shutdown` turns `true`.
    pub async fn run_until_shutdown(
        &self,
        options: RunOptions,
        mut shutdown: watch::Receiver<bool>,
    ) -> MetricsSnapshot {
        let mut cycles = 0usize;

        loop {
            if *shutdown.borrow() {
                tracing::info!(cycles, "Shutdown requested; stopping");
                break;
            }
            if options.max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }
            cycles += 1;

            let outcome = self.claim_and_process().await;
            tracing::debug!(cycle = cycles, outcome = ?outcome, "Cycle finished");

            let wait = match outcome {
                ClaimOutcome::Idle if options.stop_when_idle => break,
                ClaimOutcome::Idle | ClaimOutcome::Aborted { .. } => options.idle_wait,
                _ => Duration::ZERO,
            };
            if options.max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }

            if wait.is_zero() {
                continue;
            }
            tokio::select! {
                // A closed channel disables this branch and the sleep decides.
                Ok(()) = shutdown.changed() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(cycles, metrics = ?snapshot, "Processing done");
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::test_support::ScriptedClient;
    use crate::processing::tokens::LengthEstimator;
    use crate::processing::types::{ChunkingSettings, ReducerSettings};
    use crate::storage::test_support::{insert_document, insert_prompt, memory_store, row_state};
    use crate::summarization::{RetryPolicy, RetryingSummarizer, SummarizationClientError};

    fn claimer(
        store: DocumentStore,
        client: Arc<ScriptedClient>,
        max_attempts: u32,
    ) -> WorkClaimer {
        let settings = ReducerSettings {
            chunking: ChunkingSettings {
                chunk_size: 100,
                overlap: 10,
            },
            max_final_tokens: 1000,
            max_depth: 10,
            map_concurrency: 2,
            map_model: "small".into(),
            final_model: "large".into(),
        };
        let summarizer = RetryingSummarizer::new(client, RetryPolicy::new(1, Duration::ZERO));
        let reducer = HierarchicalReducer::new(summarizer, LengthEstimator::heuristic(4), settings)
            .expect("reducer");
        WorkClaimer::new(
            store,
            reducer,
            WorkerSettings {
                max_document_attempts: max_attempts,
                claim_timeout: Duration::from_secs(3600),
            },
        )
    }

    #[tokio::test]
    async fn idle_when_nothing_is_eligible() {
        let store = memory_store().await;
        insert_document(&store, 1, None).await;
        let claimer = claimer(store, Arc::new(ScriptedClient::echo()), 3);

        assert_eq!(claimer.claim_and_process().await, ClaimOutcome::Idle);
    }

    #[tokio::test]
    async fn summary_is_persisted_and_document_is_not_selected_again() {
        let store = memory_store().await;
        insert_document(&store, 7, Some("Short guideline text.")).await;
        let client = Arc::new(ScriptedClient::echo());
        let claimer = claimer(store.clone(), client.clone(), 3);

        let outcome = claimer.claim_and_process().await;
        assert!(matches!(
            outcome,
            ClaimOutcome::Summarized {
                document_id: 7,
                best_effort: false,
                ..
            }
        ));
        let (summary, status, _) = row_state(&store, 7).await;
        assert_eq!(summary.as_deref(), Some("S(Short guideline text.)"));
        assert_eq!(status.as_deref(), Some("done"));

        assert_eq!(claimer.claim_and_process().await, ClaimOutcome::Idle);
        assert_eq!(client.call_count(), 1);
        assert_eq!(claimer.metrics_snapshot().documents_summarized, 1);
    }

    #[tokio::test]
    async fn latest_stored_prompt_is_used_as_instruction() {
        let store = memory_store().await;
        insert_prompt(&store, "old prompt").await;
        insert_prompt(&store, "new prompt").await;
        insert_document(&store, 1, Some("text")).await;
        let client = Arc::new(ScriptedClient::echo());
        let claimer = claimer(store, client.clone(), 3);

        claimer.claim_and_process().await;

        let requests = client.requests();
        assert_eq!(requests[0].messages[0].content, "new prompt");
    }

    #[tokio::test]
    async fn failed_document_stays_eligible_then_is_marked_failed() {
        let store = memory_store().await;
        insert_document(&store, 1, Some("text")).await;
        let client = Arc::new(ScriptedClient::new(|_| {
            Err(SummarizationClientError::ProviderUnavailable("down".into()))
        }));
        let claimer = claimer(store.clone(), client, 2);

        assert_eq!(
            claimer.claim_and_process().await,
            ClaimOutcome::NoSummary {
                document_id: 1,
                attempts: 1,
                marked_failed: false,
            }
        );
        let (summary, status, _) = row_state(&store, 1).await;
        assert_eq!(summary, None);
        assert_eq!(status.as_deref(), Some("pending"));

        assert_eq!(
            claimer.claim_and_process().await,
            ClaimOutcome::NoSummary {
                document_id: 1,
                attempts: 2,
                marked_failed: true,
            }
        );
        assert_eq!(claimer.claim_and_process().await, ClaimOutcome::Idle);
        assert_eq!(claimer.metrics_snapshot().documents_without_summary, 2);
    }

    #[tokio::test]
    async fn missing_documents_table_aborts_the_cycle() {
        let store = memory_store().await;
        sqlx::query("DROP TABLE guidelines")
            .execute(store.pool())
            .await
            .expect("drop");
        let claimer = claimer(store, Arc::new(ScriptedClient::echo()), 3);

        assert!(matches!(
            claimer.claim_and_process().await,
            ClaimOutcome::Aborted { .. }
        ));
        assert_eq!(claimer.metrics_snapshot().documents_aborted, 1);
    }

    #[tokio::test]
    async fn run_processes_until_idle() {
        let store = memory_store().await;
        for id in 1..=3 {
            insert_document(&store, id, Some("guideline body")).await;
        }
        let claimer = claimer(store.clone(), Arc::new(ScriptedClient::echo()), 3);

        let snapshot = claimer
            .run(RunOptions {
                max_cycles: None,
                stop_when_idle: true,
                idle_wait: Duration::ZERO,
            })
            .await;

        assert_eq!(snapshot.documents_summarized, 3);
        assert_eq!(store.status_counts().await.expect("counts").done, 3);
    }

    #[tokio::test]
    async fn run_respects_cycle_limit() {
        let store = memory_store().await;
        for id in 1..=3 {
            insert_document(&store, id, Some("guideline body")).await;
        }
        let claimer = claimer(store.clone(), Arc::new(ScriptedClient::echo()), 3);

        let snapshot = claimer
            .run(RunOptions {
                max_cycles: Some(2),
                stop_when_idle: false,
                idle_wait: Duration::ZERO,
            })
            .await;

        assert_eq!(snapshot.documents_summarized, 2);
        assert_eq!(store.status_counts().await.expect("counts").pending, 1);
    }

    #[tokio::test]
    async fn stored_prompt_covers_every_request_of_a_document() {
        let store = memory_store().await;
        insert_prompt(&store, "Condense for clinicians.").await;
        insert_document(&store, 1, Some("Renal dosing table. ".repeat(12).as_str())).await;
        let client = Arc::new(ScriptedClient::echo());
        let claimer = claimer(store, client.clone(), 3);

        claimer.claim_and_process().await;

        let requests = client.requests();
        assert!(requests.len() > 2);
        assert!(requests.iter().any(|request| request.model == "large"));
        assert!(
            requests
                .iter()
                .all(|request| request.messages[0].content == "Condense for clinicians.")
        );
    }

    #[tokio::test]
    async fn failed_summary_write_releases_the_claim() {
        let store = memory_store().await;
        store.ensure_schema().await.expect("schema");
        sqlx::query(
            "CREATE TRIGGER reject_summary BEFORE UPDATE OF compressed_text ON guidelines \
             WHEN NEW.compressed_text IS NOT NULL BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(store.pool())
        .await
        .expect("trigger");
        insert_document(&store, 1, Some("text")).await;
        let claimer = claimer(store.clone(), Arc::new(ScriptedClient::echo()), 3);

        assert!(matches!(
            claimer.claim_and_process().await,
            ClaimOutcome::Aborted { .. }
        ));
        let (summary, status, attempts) = row_state(&store, 1).await;
        assert_eq!(summary, None);
        assert_eq!(status.as_deref(), Some("pending"));
        assert_eq!(attempts, 1);
        let counts = store.status_counts().await.expect("counts");
        assert_eq!(counts.in_progress, 0);
        assert_eq!(counts.pending, 1);
    }

    #[tokio::test]
    async fn shutdown_during_a_document_stops_after_it() {
        let store = memory_store().await;
        for id in 1..=3 {
            insert_document(&store, id, Some("guideline body")).await;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let client = Arc::new(ScriptedClient::new(move |request| {
            shutdown_tx.send_replace(true);
            Ok(format!("S({})", request.messages[1].content))
        }));
        let claimer = claimer(store.clone(), client, 3);

        let snapshot = claimer
            .run_until_shutdown(
                RunOptions {
                    max_cycles: None,
                    stop_when_idle: true,
                    idle_wait: Duration::ZERO,
                },
                shutdown_rx,
            )
            .await;

        assert_eq!(snapshot.documents_summarized, 1);
        let counts = store.status_counts().await.expect("counts");
        assert_eq!(counts.done, 1);
        assert_eq!(counts.pending, 2);
    }

    #[tokio::test]
    async fn shutdown_requested_up_front_claims_nothing() {
        let store = memory_store().await;
        insert_document(&store, 1, Some("guideline body")).await;
        let client = Arc::new(ScriptedClient::echo());
        let claimer = claimer(store, client.clone(), 3);
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);

        let snapshot = claimer
            .run_until_shutdown(RunOptions::default(), shutdown_rx)
            .await;

        assert_eq!(snapshot, MetricsSnapshot::default());
        assert_eq!(client.call_count(), 0);
    }
}
