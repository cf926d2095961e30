//! Audit sinks for the per-run decision log.
//!
//! Every accept/reject decision taken during a run is handed to an
//! [`AuditSink`]. Backends:
//! - **NDJSON stream** - one JSON object per line to any `Write` impl
//! - **Memory** - collects decisions in a `Vec`, for tests and embedding
//! - **Null** - discards everything

pub mod json_stream;

use crate::merge::MergeSummary;
use acctmerge_core::Decision;
use std::io;

/// Receiver of merge decisions. Injected into the driver at construction
/// and flushed when the run ends.
pub trait AuditSink {
    fn record(&mut self, decision: &Decision) -> io::Result<()>;

    /// Called once per merged source, after its decisions.
    fn source_done(&mut self, _summary: &MergeSummary) -> io::Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: AuditSink + ?Sized> AuditSink for Box<T> {
    fn record(&mut self, decision: &Decision) -> io::Result<()> {
        (**self).record(decision)
    }

    fn source_done(&mut self, summary: &MergeSummary) -> io::Result<()> {
        (**self).source_done(summary)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

/// Keeps every decision in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub decisions: Vec<Decision>,
    pub summaries: Vec<MergeSummary>,
}

impl AuditSink for MemorySink {
    fn record(&mut self, decision: &Decision) -> io::Result<()> {
        self.decisions.push(decision.clone());
        Ok(())
    }

    fn source_done(&mut self, summary: &MergeSummary) -> io::Result<()> {
        self.summaries.push(summary.clone());
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AuditSink for NullSink {
    fn record(&mut self, _decision: &Decision) -> io::Result<()> {
        Ok(())
    }
}
