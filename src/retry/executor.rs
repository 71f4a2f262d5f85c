//! Per-unit retry state machine
//!
//! ```text
//! Pending -> InFlight -> Succeeded
//!                     -> RetryScheduled -> InFlight ...
//!                     -> Exhausted
//! ```
//!
//! | Outcome | Action |
//! |---------|--------|
//! | Success | Succeeded, no further attempts |
//! | Transient, attempts left | wait `policy.jittered_delay(attempt)`, retry |
//! | Transient, no attempts left | Exhausted with the last cause |
//! | Fatal | Exhausted immediately |
//!
//! Every transition is appended to the unit's task log.

use super::RetryPolicy;
use crate::fetch::{FetchClient, FetchFailure, FetchOutcome, FetchUnit};
use crate::logging::{LogEvent, TaskLogger};
use crate::record::Record;
use crate::state::UnitState;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Terminal state of a fetch unit
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    Succeeded(Record),
    Exhausted {
        last_cause: FetchFailure,
        attempts: u32,
    },
    /// The unit was never started because the run was cancelled
    Cancelled,
}

impl FetchResult {
    pub fn state(&self) -> UnitState {
        match self {
            Self::Succeeded(_) => UnitState::Succeeded,
            Self::Exhausted { .. } => UnitState::Exhausted,
            Self::Cancelled => UnitState::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    /// Returns the last cause if the unit was exhausted
    pub fn failure(&self) -> Option<&FetchFailure> {
        match self {
            Self::Exhausted { last_cause, .. } => Some(last_cause),
            _ => None,
        }
    }
}

/// One try of one unit, as recorded in its history
#[derive(Debug, Clone, PartialEq)]
pub struct FetchAttempt {
    pub unit_id: String,
    pub attempt: u32,
    pub outcome: &'static str,
    pub cause: Option<FetchFailure>,
    pub at: DateTime<Utc>,
}

/// Tracks one unit's state and attempt history
struct UnitMachine<'a> {
    unit: &'a FetchUnit,
    state: UnitState,
    history: Vec<FetchAttempt>,
}

impl<'a> UnitMachine<'a> {
    fn new(unit: &'a FetchUnit) -> Self {
        Self {
            unit,
            state: UnitState::Pending,
            history: Vec::new(),
        }
    }

    fn advance(&mut self, next: UnitState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal unit transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(unit = %self.unit.id, "{} -> {}", self.state, next);
        self.state = next;
    }

    fn record(&mut self, attempt: u32, outcome: &FetchOutcome) -> FetchAttempt {
        let cause = match outcome {
            FetchOutcome::Success(_) => None,
            FetchOutcome::Transient(f) | FetchOutcome::Fatal(f) => Some(f.clone()),
        };
        let entry = FetchAttempt {
            unit_id: self.unit.id.clone(),
            attempt,
            outcome: outcome.kind(),
            cause,
            at: Utc::now(),
        };
        self.history.push(entry.clone());
        entry
    }
}

/// Wraps a [`FetchClient`] with retry and backoff
pub struct RetryExecutor<C> {
    client: Arc<C>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<C> Clone for RetryExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            policy: self.policy.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

impl<C: FetchClient> RetryExecutor<C> {
    /// Creates a new executor
    ///
    /// # Arguments
    ///
    /// * `client` - Performs one call per attempt
    /// * `policy` - Attempt limit and backoff shape
    pub fn new(client: Arc<C>, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            cancel: CancellationToken::new(),
        }
    }

    /// Stops scheduling retries once `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Drives `unit` to a terminal result
    pub async fn execute(&self, unit: &FetchUnit, logger: &TaskLogger) -> FetchResult {
        self.execute_with_history(unit, logger).await.0
    }

    /// Like [`execute`](Self::execute), also returning every attempt made
    pub async fn execute_with_history(
        &self,
        unit: &FetchUnit,
        logger: &TaskLogger,
    ) -> (FetchResult, Vec<FetchAttempt>) {
        let mut machine = UnitMachine::new(unit);

        if self.cancel.is_cancelled() {
            machine.advance(UnitState::Cancelled);
            finish(logger, unit, &FetchResult::Cancelled, 0);
            return (FetchResult::Cancelled, machine.history);
        }

        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        let result = loop {
            machine.advance(UnitState::InFlight);
            let outcome = self.client.fetch(unit, attempt).await;
            let entry = machine.record(attempt, &outcome);

            tracing::debug!(
                unit = %unit.id,
                term = %unit.parent_term,
                attempt,
                outcome = entry.outcome,
                "Fetch attempt finished"
            );
            logger.record(LogEvent::Attempt {
                unit_id: unit.id.clone(),
                attempt,
                outcome: entry.outcome,
                cause: entry.cause.as_ref().map(ToString::to_string),
            });

            match outcome {
                FetchOutcome::Success(record) => {
                    machine.advance(UnitState::Succeeded);
                    break FetchResult::Succeeded(record);
                }
                FetchOutcome::Fatal(cause) => {
                    machine.advance(UnitState::Exhausted);
                    break FetchResult::Exhausted {
                        last_cause: cause,
                        attempts: attempt,
                    };
                }
                FetchOutcome::Transient(cause) if attempt >= max_attempts => {
                    machine.advance(UnitState::Exhausted);
                    break FetchResult::Exhausted {
                        last_cause: cause,
                        attempts: attempt,
                    };
                }
                FetchOutcome::Transient(cause) => {
                    machine.advance(UnitState::RetryScheduled);
                    let delay = self.policy.jittered_delay(attempt);
                    tracing::warn!(
                        unit = %unit.id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %cause,
                        "Transient fetch error, retrying after backoff"
                    );
                    logger.record(LogEvent::RetryScheduled {
                        unit_id: unit.id.clone(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    });

                    let cancelled = tokio::select! {
                        _ = self.cancel.cancelled() => true,
                        _ = tokio::time::sleep(delay) => false,
                    };
                    if cancelled {
                        tracing::info!(unit = %unit.id, "Run cancelled, abandoning retries");
                        machine.advance(UnitState::Exhausted);
                        break FetchResult::Exhausted {
                            last_cause: cause,
                            attempts: attempt,
                        };
                    }
                    attempt += 1;
                }
            }
        };

        finish(logger, unit, &result, machine.history.len() as u32);
        (result, machine.history)
    }
}

fn finish(logger: &TaskLogger, unit: &FetchUnit, result: &FetchResult, attempts: u32) {
    if let FetchResult::Exhausted { last_cause, .. } = result {
        tracing::warn!(
            unit = %unit.id,
            term = %unit.parent_term,
            attempts,
            "Fetch exhausted: {}",
            last_cause
        );
    }
    logger.record(LogEvent::UnitFinished {
        unit_id: unit.id.clone(),
        result: result.state().as_str(),
        attempts,
    });
}
