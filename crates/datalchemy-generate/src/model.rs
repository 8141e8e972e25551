use serde::{Deserialize, Serialize};

use datalchemy_plan::Limit;

use crate::adapter::SaveReport;

/// Summary of a generated table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableReport {
    pub schema: Option<String>,
    pub table: String,
    pub limit: Limit,
    pub rows_committed: u64,
    pub bytes_committed: u64,
    pub rows_rejected: u64,
    pub batches: u64,
    pub duration_ms: u64,
}

/// Counters accumulated while a task runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskProgress {
    pub rows: u64,
    pub bytes: u64,
    pub rejected: u64,
    pub batches: u64,
}

impl TaskProgress {
    pub fn record(&mut self, report: &SaveReport) {
        self.rows += report.rows;
        self.bytes += report.bytes;
        self.rejected += report.constraint_violations;
        self.batches += 1;
    }
}

/// Report for a generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub seed: u64,
    pub workers: usize,
    /// Tables in completion order.
    pub tables: Vec<TableReport>,
    pub rows_total: u64,
    pub bytes_total: u64,
    pub rejected_total: u64,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn new(run_id: String, seed: u64, workers: usize) -> Self {
        Self {
            run_id,
            seed,
            workers,
            tables: Vec::new(),
            rows_total: 0,
            bytes_total: 0,
            rejected_total: 0,
            duration_ms: 0,
        }
    }

    pub fn push(&mut self, table: TableReport) {
        self.rows_total += table.rows_committed;
        self.bytes_total += table.bytes_committed;
        self.rejected_total += table.rows_rejected;
        self.tables.push(table);
    }

    pub fn table(&self, name: &str) -> Option<&TableReport> {
        self.tables.iter().find(|table| table.table == name)
    }
}
