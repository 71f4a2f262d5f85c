//! JSON-lines sink
//!
//! One `.jsonl` file per term plus `combined_product_output.jsonl`, each line
//! a JSON object keyed by column name. Finalizing writes the run summary to
//! `run_summary.json` alongside them.

use super::traits::{OutputResult, RunSummary, Sink};
use super::{term_artifact, COMBINED_ARTIFACT};
use crate::normalize::FlatRecord;
use serde_json::json;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct JsonLinesSink {
    directory: PathBuf,
    separator: String,
}

impl JsonLinesSink {
    pub fn new(directory: &Path, separator: &str) -> Self {
        Self {
            directory: directory.to_path_buf(),
            separator: separator.to_string(),
        }
    }

    fn write_file(
        &self,
        name: &str,
        columns: &[String],
        rows: &[FlatRecord],
    ) -> OutputResult<String> {
        std::fs::create_dir_all(&self.directory)?;
        let path = self.directory.join(format!("{}.jsonl", name));

        let mut writer = BufWriter::new(File::create(&path)?);
        for row in rows {
            serde_json::to_writer(&mut writer, &row.to_json(columns))?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        Ok(path.display().to_string())
    }
}

impl Sink for JsonLinesSink {
    fn write_term(
        &mut self,
        term: &str,
        columns: &[String],
        rows: &[FlatRecord],
    ) -> OutputResult<String> {
        self.write_file(&term_artifact(term, &self.separator), columns, rows)
    }

    fn write_combined(&mut self, columns: &[String], rows: &[FlatRecord]) -> OutputResult<String> {
        self.write_file(COMBINED_ARTIFACT, columns, rows)
    }

    fn finalize(&mut self, summary: &RunSummary) -> OutputResult<()> {
        let terms: Vec<_> = summary
            .terms
            .iter()
            .map(|t| {
                json!({
                    "term": t.term,
                    "status": t.status.as_str(),
                    "discovered": t.discovered,
                    "succeeded": t.succeeded,
                    "exhausted": t.exhausted,
                    "cancelled": t.cancelled,
                    "duplicates": t.duplicates,
                    "written": t.written,
                    "artifact": t.artifact,
                    "error": t.error,
                })
            })
            .collect();
        let document = json!({
            "started_at": summary.started_at.to_rfc3339(),
            "finished_at": summary.finished_at.map(|t| t.to_rfc3339()),
            "config_hash": summary.config_hash,
            "status": summary.status().as_str(),
            "terms": terms,
        });

        let file = File::create(self.directory.join("run_summary.json"))?;
        serde_json::to_writer_pretty(file, &document)?;
        Ok(())
    }
}
