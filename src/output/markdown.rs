//! Markdown summary generation
//!
//! This module generates a human-readable markdown summary of a run,
//! including per-term counts and failures.

use super::traits::{OutputResult, RunSummary};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Writes a markdown summary of the run
///
/// # Arguments
///
/// * `summary` - The run summary data
/// * `output_path` - Path where the markdown file should be written
///
/// # Returns
///
/// * `Ok(())` - Successfully wrote markdown summary
/// * `Err(OutputError)` - Failed to write summary
pub fn write_markdown_summary(summary: &RunSummary, output_path: &Path) -> OutputResult<()> {
    let markdown = format_markdown_summary(summary);

    let mut file = File::create(output_path)?;
    file.write_all(markdown.as_bytes())?;

    Ok(())
}

/// Formats a run summary as markdown
pub fn format_markdown_summary(summary: &RunSummary) -> String {
    let mut md = String::new();

    md.push_str("# Sluice Ingestion Summary\n\n");

    // Run metadata
    md.push_str("## Run Information\n\n");
    md.push_str(&format!("- **Started**: {}\n", summary.started_at.to_rfc3339()));
    if let Some(finished) = &summary.finished_at {
        md.push_str(&format!("- **Finished**: {}\n", finished.to_rfc3339()));
    }
    if let Some(duration) = summary.duration_seconds() {
        md.push_str(&format!("- **Duration**: {:.1} seconds\n", duration));
    }
    md.push_str(&format!("- **Status**: {}\n", summary.status()));
    md.push_str(&format!("- **Config Hash**: {}\n", summary.config_hash));
    if let Some(combined) = &summary.combined_artifact {
        md.push_str(&format!("- **Combined Output**: {}\n", combined));
    }
    md.push('\n');

    // Overall statistics
    md.push_str("## Overall Statistics\n\n");
    md.push_str(&format!("- **Terms**: {}\n", summary.terms.len()));
    md.push_str(&format!("- **Discovered**: {}\n", summary.total_discovered()));
    md.push_str(&format!("- **Succeeded**: {}\n", summary.total_succeeded()));
    md.push_str(&format!("- **Exhausted**: {}\n", summary.total_exhausted()));
    md.push_str(&format!("- **Cancelled**: {}\n", summary.total_cancelled()));
    md.push_str(&format!("- **Duplicates Dropped**: {}\n", summary.total_duplicates()));
    md.push_str(&format!("- **Rows Written**: {}\n", summary.total_written()));
    md.push_str(&format!(
        "- **Success Rate**: {:.2}%\n\n",
        summary.success_rate()
    ));

    // Term breakdown
    md.push_str("## Terms\n\n");
    md.push_str("| Term | Status | Discovered | Succeeded | Exhausted | Cancelled | Duplicates | Written |\n");
    md.push_str("|------|--------|------------|-----------|-----------|-----------|------------|---------|\n");
    for term in &summary.terms {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} | {} |\n",
            term.term,
            term.status,
            term.discovered,
            term.succeeded,
            term.exhausted,
            term.cancelled,
            term.duplicates,
            term.written
        ));
    }
    md.push('\n');

    let failures: Vec<_> = summary
        .terms
        .iter()
        .filter_map(|t| t.error.as_ref().map(|e| (&t.term, e)))
        .collect();
    if !failures.is_empty() {
        md.push_str("## Errors\n\n");
        for (term, error) in failures {
            md.push_str(&format!("- **{}**: {}\n", term, error));
        }
        md.push('\n');
    }

    md
}
