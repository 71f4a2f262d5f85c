//! Console run statistics

use super::traits::RunSummary;

/// Prints a run summary to stdout in a formatted manner
///
/// # Arguments
///
/// * `summary` - The run summary to display
pub fn print_summary(summary: &RunSummary) {
    println!("=== Ingestion Summary ===\n");

    println!("Overview:");
    println!("  Terms: {}", summary.terms.len());
    println!("  Identifiers discovered: {}", summary.total_discovered());
    println!("  Rows written: {}", summary.total_written());
    if let Some(duration) = summary.duration_seconds() {
        println!("  Elapsed: {:.1}s", duration);
    }
    println!();

    println!("Per Term:");
    for term in &summary.terms {
        println!(
            "  {} [{}]: {} succeeded, {} exhausted, {} cancelled, {} duplicates",
            term.term, term.status, term.succeeded, term.exhausted, term.cancelled, term.duplicates
        );
        if let Some(error) = &term.error {
            println!("    error: {}", error);
        }
    }
    println!();

    if summary.failed_terms() > 0 {
        println!("Failed terms: {}", summary.failed_terms());
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} units succeeded)",
        summary.success_rate(),
        summary.total_succeeded(),
        summary.total_succeeded() + summary.total_exhausted()
    );
}
