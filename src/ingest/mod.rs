//! Ingestion module
//!
//! # Components
//!
//! - `BoundedScheduler`: Runs work items under a hard concurrency ceiling
//! - `IngestionOrchestrator`: Discovers, fetches, deduplicates and persists each term
//! - `ReviewEnricher`: Optional second fan-out adding generated reviews to records

mod enrich;
mod orchestrator;
mod scheduler;

pub use enrich::{EnrichmentCounts, ReviewEnricher, REVIEW_FIELD};
pub use orchestrator::{IngestReport, IngestionOrchestrator, OrchestratorSettings};
pub use scheduler::{BoundedScheduler, Completion, SchedulerReport};

use crate::fetch::{FetchFailure, FetchUnit};
use crate::retry::FetchResult;

/// Worker verdict for one executed unit
///
/// A unit exhausted by rejected credentials halts the rest of its batch;
/// every other result lets the batch continue.
pub(crate) fn unit_completion(
    index: usize,
    unit: FetchUnit,
    result: FetchResult,
) -> Completion<(usize, FetchUnit, FetchResult), FetchFailure> {
    let halt = result
        .failure()
        .filter(|cause| cause.is_credential_failure())
        .cloned();
    match halt {
        Some(reason) => Completion::Halt {
            result: (index, unit, result),
            reason,
        },
        None => Completion::Done((index, unit, result)),
    }
}
