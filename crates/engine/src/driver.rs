//! Reconciliation driver.
//!
//! Run: check workdir -> snapshot live files -> load local -> merge each
//! update source (persisting after every one) -> optionally promote.

use crate::database::AccountDatabase;
use crate::reporter::{RunReport, SourceFailure};
use crate::sink::AuditSink;
use acctmerge_core::{AccountFiles, AcctError, AcctResult, GroupAliasPair};
use acctmerge_source::{snapshot, ProgressFlag, SourceProvider, UpdateSource};
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub workdir: PathBuf,
    /// Directory holding the live `passwd`, `group` and `shadow`.
    pub live_dir: PathBuf,
    /// Copy the merged files over the live ones at the end of the run.
    pub promote: bool,
    /// Set a source's progress flag to processed once its merge is on disk.
    pub mark_processed: bool,
    pub aliases: GroupAliasPair,
}

impl ReconcileConfig {
    pub fn new(workdir: impl Into<PathBuf>, live_dir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            live_dir: live_dir.into(),
            promote: true,
            mark_processed: false,
            aliases: GroupAliasPair::default(),
        }
    }

    /// `local_<file>.orig` in the working directory.
    pub fn snapshot_files(&self) -> AccountFiles {
        AccountFiles::work_copy(&self.workdir, "orig")
    }

    /// `local_<file>.merged` in the working directory.
    pub fn merged_files(&self) -> AccountFiles {
        AccountFiles::work_copy(&self.workdir, "merged")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    CopyingLiveFiles,
    LoadingLocal,
    MergingSource(String),
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Initializing => f.write_str("initializing"),
            RunState::CopyingLiveFiles => f.write_str("copying-live-files"),
            RunState::LoadingLocal => f.write_str("loading-local"),
            RunState::MergingSource(name) => write!(f, "merging-source({name})"),
            RunState::Done => f.write_str("done"),
            RunState::Failed => f.write_str("failed"),
        }
    }
}

/// Owns the local database for the duration of one run.
///
/// ```ignore
/// let provider = DirectoryProvider::new(&config.workdir, MasterFileNames::default());
/// let mut run = Reconciler::new(config, provider, JsonStreamSink::stdout());
/// let report = run.run()?;
/// ```
pub struct Reconciler<P, S> {
    config: ReconcileConfig,
    provider: P,
    sink: S,
    state: RunState,
}

impl<P: SourceProvider, S: AuditSink> Reconciler<P, S> {
    pub fn new(config: ReconcileConfig, provider: P, sink: S) -> Self {
        Self {
            config,
            provider,
            sink,
            state: RunState::Initializing,
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Runs every step. Only I/O failures on the working directory or the
    /// live files are returned as errors; per-source failures land in the
    /// report.
    pub fn run(&mut self) -> AcctResult<RunReport> {
        let t0 = Instant::now();
        let result = self.run_steps();

        if let Err(e) = self.sink.flush() {
            tracing::warn!(error = %e, "failed to flush audit sink");
        }

        match result {
            Ok(mut report) => {
                report.elapsed_ms = t0.elapsed().as_millis() as u64;
                self.transition(RunState::Done);
                tracing::info!(
                    merged = report.merged.len(),
                    skipped = report.skipped.len(),
                    failed = report.failed.len(),
                    promoted = report.promoted,
                    elapsed_ms = report.elapsed_ms,
                    "run complete"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(state = %self.state, error = %e, "run aborted");
                self.transition(RunState::Failed);
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: RunState) {
        tracing::debug!(from = %self.state, to = %next, "state transition");
        self.state = next;
    }

    fn run_steps(&mut self) -> AcctResult<RunReport> {
        snapshot::ensure_workdir(&self.config.workdir)?;
        tracing::info!(workdir = %self.config.workdir.display(), "using working directory");

        self.transition(RunState::CopyingLiveFiles);
        let snapshot_files = self.config.snapshot_files();
        snapshot::snapshot_live(&self.config.live_dir, &snapshot_files)?;

        self.transition(RunState::LoadingLocal);
        let mut local = AccountDatabase::load("local", &snapshot_files, self.config.aliases.clone())?;
        let mut report = RunReport::new(self.config.workdir.clone(), local.stats().clone());

        let merged_files = self.config.merged_files();
        for source in self.provider.sources()? {
            self.merge_source(&mut local, &source, &merged_files, &mut report);
        }

        self.finish(&merged_files, &mut report)?;
        Ok(report)
    }

    fn merge_source(
        &mut self,
        local: &mut AccountDatabase,
        source: &UpdateSource,
        merged_files: &AccountFiles,
        report: &mut RunReport,
    ) {
        let flag = match self.provider.progress(source) {
            Ok(flag) => flag,
            Err(e) => return fail(report, source, e),
        };
        if flag == ProgressFlag::Processed {
            tracing::debug!(source = %source.name, "already processed; skipping");
            report.skipped.push(source.name.clone());
            return;
        }

        self.transition(RunState::MergingSource(source.name.clone()));
        let incoming =
            match AccountDatabase::load(&source.name, &source.files, self.config.aliases.clone()) {
                Ok(db) => db,
                Err(e) => return fail(report, source, e),
            };

        let summary = local.merge_db(&incoming);
        for decision in &summary.decisions {
            if let Err(e) = self.sink.record(decision) {
                tracing::warn!(source = %source.name, error = %e, "failed to write audit decision");
            }
        }
        if let Err(e) = self.sink.source_done(&summary) {
            tracing::warn!(source = %source.name, error = %e, "failed to write audit summary");
        }
        report.merged.push(summary);

        if let Err(e) = local.save(merged_files) {
            report.persisted = false;
            return fail(report, source, e);
        }
        report.persisted = true;
        tracing::info!(source = %source.name, dir = %source.dir.display(), "merged update source");

        if self.config.mark_processed {
            if let Err(e) = self.provider.set_progress(source, ProgressFlag::Processed) {
                tracing::warn!(source = %source.name, error = %e, "failed to mark source processed");
            }
        }
    }

    fn finish(&mut self, merged_files: &AccountFiles, report: &mut RunReport) -> AcctResult<()> {
        if !self.config.promote {
            tracing::info!("live account files left untouched per request");
            return Ok(());
        }
        if report.merged.is_empty() {
            tracing::info!("no source merged; nothing to promote");
            return Ok(());
        }
        if !report.persisted {
            tracing::error!("latest merge is not on disk; refusing to promote");
            return Ok(());
        }

        snapshot::promote(merged_files, &self.config.live_dir)?;
        report.promoted = true;
        tracing::info!(live_dir = %self.config.live_dir.display(), "promoted merged account files");
        Ok(())
    }
}

fn fail(report: &mut RunReport, source: &UpdateSource, err: AcctError) {
    tracing::error!(source = %source.name, error = %err, "update source failed");
    report.failed.push(SourceFailure {
        source: source.name.clone(),
        error: err.to_string(),
    });
}
