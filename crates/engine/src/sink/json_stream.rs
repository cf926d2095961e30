//! NDJSON (newline-delimited JSON) decision stream.
//!
//! Each row is serialized directly to the writer without an intermediate
//! `String`. Rows carry a `kind` tag so decisions and per-source summaries
//! can share one stream.
//!
//! ```ignore
//! let mut sink = JsonStreamSink::stdout();
//! sink.record(&decision)?;
//! let rows = sink.finish()?;
//! ```

use super::AuditSink;
use crate::merge::MergeSummary;
use acctmerge_core::Decision;
use serde::Serialize;
use std::io::{self, BufWriter, Write};

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Row<'a> {
    Decision(&'a Decision),
    Summary(&'a MergeSummary),
}

/// Buffered NDJSON writer over any `Write`.
pub struct JsonStreamSink<W: Write> {
    writer: BufWriter<W>,
    rows_written: usize,
}

impl JsonStreamSink<io::Stdout> {
    /// Write NDJSON to stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> JsonStreamSink<W> {
    /// Create a sink wrapping any writer (file, Vec<u8>, etc.).
    pub fn new(writer: W) -> Self {
        Self {
            writer: BufWriter::with_capacity(64 * 1024, writer),
            rows_written: 0,
        }
    }

    fn write_row(&mut self, row: &Row<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, row)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        self.writer.write_all(b"\n")?;
        self.rows_written += 1;
        Ok(())
    }

    /// Flush and return how many rows were written.
    pub fn finish(mut self) -> io::Result<usize> {
        self.writer.flush()?;
        Ok(self.rows_written)
    }

    /// Number of rows written so far.
    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}

impl<W: Write> AuditSink for JsonStreamSink<W> {
    fn record(&mut self, decision: &Decision) -> io::Result<()> {
        self.write_row(&Row::Decision(decision))
    }

    fn source_done(&mut self, summary: &MergeSummary) -> io::Result<()> {
        self.write_row(&Row::Summary(summary))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}
