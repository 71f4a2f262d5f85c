//! Ingestion orchestrator - per-term pipeline and the run around it
//!
//! For every configured term this module:
//! - Discovers item identifiers (retried under the discovery policy)
//! - Fetches each identifier through the retry executor, bounded per term
//! - Partitions results and deduplicates the successful records
//! - Optionally enriches records with generated reviews
//! - Normalizes and persists the batch, then closes the term's log
//!
//! Terms themselves run under an outer [`BoundedScheduler`], so the number of
//! simultaneous fetches never exceeds `term_concurrency * item_concurrency`.

use super::enrich::ReviewEnricher;
use super::scheduler::{BoundedScheduler, Completion};
use super::unit_completion;
use crate::config::Config;
use crate::fetch::{Discoverer, FetchClient, FetchFailure, FetchOutcome, FetchUnit};
use crate::logging::{LogEvent, TaskLogger};
use crate::normalize::{FlatRecord, Normalizer};
use crate::output::{
    check_term_names, OutputError, OutputResult, RunSummary, Sink, TermSummary,
};
use crate::record::{dedupe, Batch};
use crate::retry::{FetchResult, RetryExecutor, RetryPolicy};
use crate::state::{TaskStatus, UnitState};
use crate::{ConfigError, Result};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Unit id used in task logs for the discovery call
const DISCOVERY_UNIT: &str = "discovery";

/// Fan-out limits and naming for a run
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub term_concurrency: usize,
    pub item_concurrency: usize,

    /// Directory holding one log file per term
    pub log_directory: PathBuf,

    /// Replaces whitespace when deriving log names from terms
    pub separator: String,

    pub discovery_policy: RetryPolicy,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            term_concurrency: config.ingest.term_concurrency,
            item_concurrency: config.ingest.item_concurrency,
            log_directory: config.output.directory.join("logs"),
            separator: config.output.separator.clone(),
            discovery_policy: config.discovery_retry.to_policy(),
        }
    }
}

/// Everything a run produced
#[derive(Debug)]
pub struct IngestReport {
    /// Deduplicated batch per term; failed and cancelled terms map to empty batches
    pub batches: BTreeMap<String, Batch>,
    pub summary: RunSummary,
}

/// How a term's discovery call ended
enum Discovery {
    Found(Vec<String>),
    Failed { cause: FetchFailure, attempts: u32 },
    Cancelled { attempts: u32 },
}

/// Result of one term's task
struct TermOutcome {
    summary: TermSummary,
    batch: Batch,
    rows: Vec<FlatRecord>,
}

/// Drives every term from discovery to a persisted batch
pub struct IngestionOrchestrator<D, C> {
    discoverer: Arc<D>,
    executor: RetryExecutor<C>,
    normalizer: Arc<dyn Normalizer>,
    sink: Mutex<Box<dyn Sink>>,
    enricher: Option<ReviewEnricher>,
    settings: OrchestratorSettings,
    config_hash: String,
    cancel: CancellationToken,
}

impl<D, C> IngestionOrchestrator<D, C>
where
    D: Discoverer + 'static,
    C: FetchClient + 'static,
{
    /// Creates a new orchestrator
    ///
    /// # Arguments
    ///
    /// * `discoverer` - Lists item identifiers for a term
    /// * `client` - Fetches one item per call
    /// * `item_policy` - Retry policy for item fetches
    /// * `normalizer` - Flattens records before they reach the sink
    /// * `sink` - Persists per-term and combined batches
    /// * `settings` - Concurrency limits, log location and discovery policy
    pub fn new(
        discoverer: Arc<D>,
        client: Arc<C>,
        item_policy: RetryPolicy,
        normalizer: Arc<dyn Normalizer>,
        sink: Box<dyn Sink>,
        settings: OrchestratorSettings,
    ) -> Self {
        let cancel = CancellationToken::new();
        Self {
            discoverer,
            executor: RetryExecutor::new(client, item_policy).with_cancellation(cancel.clone()),
            normalizer,
            sink: Mutex::new(sink),
            enricher: None,
            settings,
            config_hash: String::new(),
            cancel,
        }
    }

    /// Adds review enrichment after deduplication
    pub fn with_enricher(mut self, enricher: ReviewEnricher) -> Self {
        self.enricher = Some(enricher.with_cancellation(self.cancel.clone()));
        self
    }

    /// Records the config hash in the run summary
    pub fn with_config_hash(mut self, config_hash: impl Into<String>) -> Self {
        self.config_hash = config_hash.into();
        self
    }

    /// The run's cancellation signal
    ///
    /// Cancelling stops both schedulers from admitting work and abandons
    /// pending retries; in-flight calls finish on their own.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ingests every term and returns its batch
    ///
    /// Term-level failures are contained in the returned summaries. The only
    /// error is an empty term list.
    pub async fn ingest(self: Arc<Self>, terms: Vec<String>) -> Result<IngestReport> {
        if terms.is_empty() {
            return Err(ConfigError::Validation("no search terms to ingest".to_string()).into());
        }
        check_term_names(&terms, &self.settings.separator)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        tracing::info!(
            "Starting ingestion of {} term(s), {} at a time",
            terms.len(),
            self.settings.term_concurrency
        );
        let mut summary = RunSummary::new(self.config_hash.clone());

        let scheduler = BoundedScheduler::new(self.settings.term_concurrency, self.cancel.clone());
        let this = Arc::clone(&self);
        let report = scheduler
            .run(
                terms.into_iter().enumerate().collect(),
                move |(index, term): (usize, String)| {
                    let this = Arc::clone(&this);
                    async move {
                        let outcome = this.run_term(term).await;
                        Completion::<_, Infallible>::Done((index, outcome))
                    }
                },
            )
            .await;

        let mut outcomes: Vec<(usize, TermOutcome)> = report.completed;
        for (index, term) in report.cancelled {
            tracing::info!(term = %term, "Term cancelled before it started");
            let mut skipped = TermSummary::new(&term);
            skipped.error = Some("cancelled before start".to_string());
            outcomes.push((index, TermOutcome::empty(skipped)));
        }
        for (index, term) in report.panicked {
            let failed = TermSummary::failed(term, "term task panicked");
            outcomes.push((index, TermOutcome::empty(failed)));
        }
        outcomes.sort_by_key(|(index, _)| *index);

        let mut batches = BTreeMap::new();
        let mut combined = Vec::new();
        for (_, outcome) in outcomes {
            combined.extend(outcome.rows);
            batches.insert(outcome.summary.term.clone(), outcome.batch);
            summary.terms.push(outcome.summary);
        }

        match self.with_sink(|sink| sink.write_combined(self.normalizer.columns(), &combined)) {
            Ok(artifact) => {
                tracing::info!("Wrote {} combined rows to {}", combined.len(), artifact);
                summary.combined_artifact = Some(artifact);
            }
            Err(e) => tracing::error!("Failed to write combined output: {}", e),
        }

        summary.finish();
        if let Err(e) = self.with_sink(|sink| sink.finalize(&summary)) {
            tracing::error!("Failed to finalize output: {}", e);
        }

        tracing::info!(
            succeeded = summary.total_succeeded(),
            exhausted = summary.total_exhausted(),
            cancelled = summary.total_cancelled(),
            failed_terms = summary.failed_terms(),
            "Ingestion finished"
        );
        Ok(IngestReport { batches, summary })
    }

    async fn run_term(&self, term: String) -> TermOutcome {
        let logger = Arc::new(TaskLogger::for_term(
            &self.settings.log_directory,
            &term,
            &self.settings.separator,
        ));
        let mut summary = TermSummary::new(&term);
        summary.status = TaskStatus::Running;
        tracing::info!(term = %term, "Starting term");
        logger.record(LogEvent::TaskStarted);

        let ids = match self.discover(&term, &logger).await {
            Discovery::Found(ids) => ids,
            Discovery::Cancelled { attempts } => {
                tracing::info!(term = %term, attempts, "Run cancelled during discovery");
                logger.record(LogEvent::DiscoveryCancelled { attempts });
                summary.status = TaskStatus::Pending;
                summary.error = Some("cancelled during discovery".to_string());
                return close_term(&logger, summary, Batch::empty(term), Vec::new());
            }
            Discovery::Failed { cause, attempts } => {
                tracing::error!(term = %term, attempts, "Discovery failed: {}", cause);
                logger.record(LogEvent::DiscoveryFailed {
                    cause: cause.to_string(),
                    attempts,
                });
                summary.status = TaskStatus::Failed;
                summary.error = Some(format!("discovery failed: {}", cause));
                return close_term(&logger, summary, Batch::empty(term), Vec::new());
            }
        };

        tracing::info!(term = %term, "Discovered {} identifier(s)", ids.len());
        summary.discovered = ids.len();
        logger.record(LogEvent::Discovered { count: ids.len() });

        let units: Vec<(usize, FetchUnit)> = ids
            .into_iter()
            .enumerate()
            .map(|(index, id)| (index, FetchUnit::new(id, term.as_str())))
            .collect();

        let executor = self.executor.clone();
        let worker_logger = Arc::clone(&logger);
        let scheduler = BoundedScheduler::new(self.settings.item_concurrency, self.cancel.clone());
        let report = scheduler
            .run(units, move |(index, unit): (usize, FetchUnit)| {
                let executor = executor.clone();
                let logger = Arc::clone(&worker_logger);
                async move {
                    let result = executor.execute(&unit, &logger).await;
                    unit_completion(index, unit, result)
                }
            })
            .await;

        if let Some(cause) = &report.halted {
            tracing::error!(term = %term, "Batch aborted: {}", cause);
            logger.record(LogEvent::BatchAborted {
                cause: cause.to_string(),
            });
            summary.error = Some(format!("batch aborted: {}", cause));
        }
        for (_, unit) in &report.cancelled {
            logger.record(LogEvent::UnitFinished {
                unit_id: unit.id.clone(),
                result: UnitState::Cancelled.as_str(),
                attempts: 0,
            });
        }
        for (_, unit) in &report.panicked {
            tracing::error!(term = %term, unit = %unit.id, "Fetch worker panicked");
            logger.record(LogEvent::UnitFinished {
                unit_id: unit.id.clone(),
                result: "panicked",
                attempts: 0,
            });
        }

        summary.cancelled = report.cancelled.len();
        summary.exhausted = report.panicked.len();

        let mut completed = report.completed;
        completed.sort_by_key(|(index, _, _)| *index);
        let mut records = Vec::with_capacity(completed.len());
        for (_, _, result) in completed {
            match result {
                FetchResult::Succeeded(record) => {
                    summary.succeeded += 1;
                    records.push(record);
                }
                FetchResult::Exhausted { .. } => summary.exhausted += 1,
                FetchResult::Cancelled => summary.cancelled += 1,
            }
        }

        let fetched = records.len();
        let mut records = dedupe(records);
        summary.duplicates = fetched - records.len();
        if summary.duplicates > 0 {
            tracing::debug!(term = %term, "Dropped {} duplicate record(s)", summary.duplicates);
        }

        if let Some(enricher) = &self.enricher {
            if !records.is_empty() {
                summary.enriched = enricher.enrich(&term, &mut records, &logger).await.enriched;
            }
        }

        let mut rows = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            match self.normalizer.normalize(&term, record) {
                Ok(row) => rows.push(row),
                Err(e) => {
                    tracing::warn!(term = %term, index, "Skipping record: {}", e);
                    summary.normalize_failed += 1;
                    logger.record(LogEvent::NormalizeFailed {
                        index,
                        cause: e.to_string(),
                    });
                }
            }
        }

        match self.with_sink(|sink| sink.write_term(&term, self.normalizer.columns(), &rows)) {
            Ok(artifact) => {
                tracing::info!(term = %term, "Wrote {} row(s) to {}", rows.len(), artifact);
                summary.written = rows.len();
                logger.record(LogEvent::BatchWritten {
                    records: rows.len(),
                    artifact: artifact.clone(),
                });
                summary.artifact = Some(artifact);
            }
            Err(e) => {
                tracing::error!(term = %term, "Failed to write batch: {}", e);
                logger.record(LogEvent::SinkFailed {
                    cause: e.to_string(),
                });
                summary.error = Some(format!("sink failed: {}", e));
            }
        }

        summary.status = if summary.error.is_some() {
            TaskStatus::Failed
        } else {
            TaskStatus::Completed
        };
        close_term(&logger, summary, Batch::new(term, records), rows)
    }

    /// Calls the discoverer, retrying transient failures
    ///
    /// Identifiers come back in discovery order. Cancellation during a
    /// backoff ends discovery as cancelled, not failed.
    async fn discover(&self, term: &str, logger: &TaskLogger) -> Discovery {
        let policy = &self.settings.discovery_policy;
        let mut attempt = 1;
        loop {
            let cause = match self.discoverer.discover(term).await {
                Ok(ids) => return Discovery::Found(ids),
                Err(cause) => cause,
            };

            logger.record(LogEvent::Attempt {
                unit_id: DISCOVERY_UNIT.to_string(),
                attempt,
                outcome: FetchOutcome::failed(cause.clone()).kind(),
                cause: Some(cause.to_string()),
            });
            if !cause.is_transient() || !policy.allows_retry_after(attempt) {
                return Discovery::Failed {
                    cause,
                    attempts: attempt,
                };
            }

            let delay = policy.jittered_delay(attempt);
            tracing::warn!(term, attempt, "Discovery failed, retrying: {}", cause);
            logger.record(LogEvent::RetryScheduled {
                unit_id: DISCOVERY_UNIT.to_string(),
                attempt,
                delay_ms: delay.as_millis() as u64,
            });
            tokio::select! {
                _ = self.cancel.cancelled() => return Discovery::Cancelled { attempts: attempt },
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    fn with_sink<T>(
        &self,
        write: impl FnOnce(&mut dyn Sink) -> OutputResult<T>,
    ) -> OutputResult<T> {
        let mut sink = self
            .sink
            .lock()
            .map_err(|_| OutputError::Write("sink lock poisoned".to_string()))?;
        write(&mut **sink)
    }
}

impl TermOutcome {
    fn empty(summary: TermSummary) -> Self {
        Self {
            batch: Batch::empty(summary.term.clone()),
            rows: Vec::new(),
            summary,
        }
    }
}

/// Logs the term's summary and closes its log
///
/// Called only once every unit of the term has reached a final state.
fn close_term(
    logger: &TaskLogger,
    summary: TermSummary,
    batch: Batch,
    rows: Vec<FlatRecord>,
) -> TermOutcome {
    logger.record(LogEvent::Summary {
        discovered: summary.discovered,
        succeeded: summary.succeeded,
        exhausted: summary.exhausted,
        cancelled: summary.cancelled,
        duplicates: summary.duplicates,
        written: summary.written,
    });
    tracing::info!(
        term = %summary.term,
        status = %summary.status,
        succeeded = summary.succeeded,
        exhausted = summary.exhausted,
        cancelled = summary.cancelled,
        "Term finished"
    );
    if let Err(e) = logger.close() {
        tracing::warn!(term = %summary.term, "Failed to close task log: {}", e);
    }
    TermOutcome {
        summary,
        batch,
        rows,
    }
}
