//! Run report: what one reconciliation run did, per source.

use crate::database::LoadStats;
use crate::merge::MergeSummary;
use serde::Serialize;
use std::path::PathBuf;

/// A source that could not be merged or persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub workdir: PathBuf,
    /// Stats of the local snapshot as loaded at the start of the run.
    pub local: LoadStats,
    pub merged: Vec<MergeSummary>,
    /// Sources whose progress flag said they were already processed.
    pub skipped: Vec<String>,
    pub failed: Vec<SourceFailure>,
    /// Whether the latest merge result is on disk.
    pub persisted: bool,
    pub promoted: bool,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn new(workdir: PathBuf, local: LoadStats) -> Self {
        Self {
            workdir,
            local,
            merged: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            persisted: false,
            promoted: false,
            elapsed_ms: 0,
        }
    }

    pub fn accepted(&self) -> usize {
        self.merged.iter().map(MergeSummary::accepted).sum()
    }

    pub fn rejected(&self) -> usize {
        self.merged.iter().map(MergeSummary::rejected).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Render the report as a boxed text summary.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push('\n');
        out.push_str("╔══════════════════════════════════════════════════════════════╗\n");
        out.push_str("║                  ACCOUNT MERGE RUN REPORT                    ║\n");
        out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        out.push_str(&format!(
            "║  Local users:        {:>39} ║\n",
            self.local.users
        ));
        out.push_str(&format!(
            "║  Local groups:       {:>39} ║\n",
            self.local.groups
        ));
        out.push_str(&format!(
            "║  Sources merged:     {:>39} ║\n",
            self.merged.len()
        ));
        out.push_str(&format!(
            "║  Sources skipped:    {:>39} ║\n",
            self.skipped.len()
        ));
        out.push_str(&format!(
            "║  Sources failed:     {:>39} ║\n",
            self.failed.len()
        ));
        out.push_str(&format!(
            "║  Accepted:           {:>39} ║\n",
            self.accepted()
        ));
        out.push_str(&format!(
            "║  Rejected:           {:>39} ║\n",
            self.rejected()
        ));
        out.push_str(&format!(
            "║  Promoted:           {:>39} ║\n",
            if self.promoted { "yes" } else { "no" }
        ));
        out.push_str(&format!(
            "║  Elapsed:            {:>36}ms ║\n",
            self.elapsed_ms
        ));

        if !self.merged.is_empty() {
            out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
            out.push_str("║  SOURCES                                                     ║\n");
            out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
            for s in &self.merged {
                out.push_str(&format!(
                    "║  {}: users +{} -{} (no shadow {}) | groups +{} -{}\n",
                    s.source,
                    s.users_accepted,
                    s.users_rejected,
                    s.missing_credentials,
                    s.groups_accepted,
                    s.groups_rejected
                ));
            }
        }

        if !self.failed.is_empty() {
            out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
            out.push_str("║  FAILURES                                                    ║\n");
            out.push_str("╠══════════════════════════════════════════════════════════════╣\n");
            for f in &self.failed {
                out.push_str(&format!("║  {}: {}\n", f.source, f.error));
            }
        }

        out.push_str("╚══════════════════════════════════════════════════════════════╝\n");
        out
    }
}
