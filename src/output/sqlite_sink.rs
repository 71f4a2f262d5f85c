//! SQLite sink
//!
//! Every term's batch becomes a table named after the term, and the combined
//! batch becomes `combined_product_output`. Finished runs are recorded in a
//! `runs` table along with per-term counts.

use super::traits::{OutputError, OutputResult, RunSummary, Sink};
use super::{term_artifact, COMBINED_ARTIFACT};
use crate::normalize::FlatRecord;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;

/// SQL schema for run bookkeeping
const SCHEMA_SQL: &str = r#"
-- Track ingestion runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Per-term results of each run
CREATE TABLE IF NOT EXISTS run_terms (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(id),
    term TEXT NOT NULL,
    status TEXT NOT NULL,
    discovered INTEGER NOT NULL,
    succeeded INTEGER NOT NULL,
    exhausted INTEGER NOT NULL,
    cancelled INTEGER NOT NULL,
    duplicates INTEGER NOT NULL,
    written INTEGER NOT NULL,
    artifact TEXT,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_run_terms_run ON run_terms(run_id);
"#;

/// SQLite-backed batch sink
pub struct SqliteSink {
    conn: Connection,
    separator: String,
}

impl SqliteSink {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    /// * `separator` - Replaces whitespace when deriving table names from terms
    pub fn new(path: &Path, separator: &str) -> OutputResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
        ",
        )?;
        Self::with_connection(conn, separator)
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory(separator: &str) -> OutputResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::with_connection(conn, separator)
    }

    fn with_connection(conn: Connection, separator: &str) -> OutputResult<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn,
            separator: separator.to_string(),
        })
    }

    /// Drops and recreates `table`, then inserts every row in order
    fn replace_table(
        &mut self,
        table: &str,
        columns: &[String],
        rows: &[FlatRecord],
    ) -> OutputResult<()> {
        if let Some(row) = rows.iter().find(|r| r.values.len() != columns.len()) {
            return Err(OutputError::Write(format!(
                "row has {} values for {} columns",
                row.values.len(),
                columns.len()
            )));
        }

        let table = quote_ident(table);
        let column_defs: Vec<String> = columns
            .iter()
            .map(|c| format!("{} TEXT", quote_ident(c)))
            .collect();
        let column_names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();

        let tx = self.conn.transaction()?;
        tx.execute_batch(&format!(
            "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({});",
            column_defs.join(", ")
        ))?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                column_names.join(", "),
                placeholders.join(", ")
            ))?;
            for row in rows {
                stmt.execute(params_from_iter(row.values.iter()))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    #[cfg(test)]
    fn count_rows(&self, table: &str) -> OutputResult<i64> {
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

impl Sink for SqliteSink {
    fn write_term(
        &mut self,
        term: &str,
        columns: &[String],
        rows: &[FlatRecord],
    ) -> OutputResult<String> {
        let table = term_artifact(term, &self.separator);
        self.replace_table(&table, columns, rows)?;
        tracing::debug!("Wrote {} rows to table {}", rows.len(), table);
        Ok(table)
    }

    fn write_combined(&mut self, columns: &[String], rows: &[FlatRecord]) -> OutputResult<String> {
        self.replace_table(COMBINED_ARTIFACT, columns, rows)?;
        Ok(COMBINED_ARTIFACT.to_string())
    }

    fn finalize(&mut self, summary: &RunSummary) -> OutputResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO runs (started_at, finished_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                summary.started_at.to_rfc3339(),
                summary.finished_at.map(|t| t.to_rfc3339()),
                summary.config_hash,
                summary.status().as_str(),
            ],
        )?;
        let run_id = tx.last_insert_rowid();

        for term in &summary.terms {
            tx.execute(
                "INSERT INTO run_terms (run_id, term, status, discovered, succeeded, exhausted,
                 cancelled, duplicates, written, artifact, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    run_id,
                    term.term,
                    term.status.as_str(),
                    term.discovered as i64,
                    term.succeeded as i64,
                    term.exhausted as i64,
                    term.cancelled as i64,
                    term.duplicates as i64,
                    term.written as i64,
                    term.artifact,
                    term.error,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Quotes an SQL identifier, doubling embedded quotes
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
