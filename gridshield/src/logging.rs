// src/logging.rs
//
// Diagnostics and decision telemetry.
// - init_tracing: installs a fmt subscriber filtered by RUST_LOG
// - DecisionSink: trait receiving every enforcement decision
// - NoopSink:     discards all records
// - JsonlSink:    writes one JSON object per decision

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, EnvFilter};

use crate::enforce::Decision;

/// Install a global fmt subscriber. `RUST_LOG` takes precedence over
/// `default_directive`. Returns false when a subscriber is already set.
pub fn init_tracing(default_directive: &str) -> bool {
    let mut filter = EnvFilter::from_default_env();
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() {
        if let Ok(d) = default_directive.parse() {
            filter = filter.add_directive(d);
        }
    }
    fmt().with_env_filter(filter).with_target(false).try_init().is_ok()
}

/// One enforcement decision during a rollout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub episode: u32,
    pub step: u64,
    pub state: Vec<f64>,
    pub decision: Decision,
    /// State after the applied action violates the safety predicate.
    pub unsafe_after: bool,
}

/// Abstract sink for per-decision telemetry.
pub trait DecisionSink {
    fn record(&mut self, record: &DecisionRecord) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DecisionSink for NoopSink {
    fn record(&mut self, _record: &DecisionRecord) -> io::Result<()> {
        Ok(())
    }
}

/// JSONL sink. Each decision is one JSON object on its own line.
pub struct JsonlSink<W: Write = BufWriter<File>> {
    writer: W,
    written: u64,
}

impl JsonlSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> JsonlSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> DecisionSink for JsonlSink<W> {
    fn record(&mut self, record: &DecisionRecord) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl<S: DecisionSink + ?Sized> DecisionSink for &mut S {
    fn record(&mut self, record: &DecisionRecord) -> io::Result<()> {
        (**self).record(record)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_sink_writes_one_line_per_record() {
        let mut sink = JsonlSink::new(Vec::new());
        for step in 0..3 {
            sink.record(&DecisionRecord {
                episode: 1,
                step,
                state: vec![0.5, 1.0],
                decision: Decision::Corrected {
                    proposed: 0,
                    applied: 1,
                },
                unsafe_after: false,
            })
            .unwrap();
        }
        assert_eq!(sink.written(), 3);

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["decision"]["kind"], "corrected");
        assert_eq!(first["decision"]["applied"], 1);
        let back: DecisionRecord = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(back.step, 2);
    }

    #[test]
    fn init_tracing_is_idempotent() {
        init_tracing("gridshield=debug");
        assert!(!init_tracing("gridshield=debug"));
    }
}
