// src/logging.rs
//
// Run telemetry.
// - init_tracing: stderr subscriber for the binary (RUST_LOG wins over -v)
// - EpisodeSink: trait used by the training runner
// - NoopSink:    discards all records
// - FileSink:    one JSON object per episode (JSONL)

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::runner::EpisodeSummary;

/// Install the global fmt subscriber. `verbosity` counts `-v` flags.
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Abstract sink for per-episode summaries.
pub trait EpisodeSink {
    fn log_episode(&mut self, summary: &EpisodeSummary);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl EpisodeSink for NoopSink {
    fn log_episode(&mut self, _summary: &EpisodeSummary) {}
}

/// JSONL file sink.
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl EpisodeSink for FileSink {
    fn log_episode(&mut self, summary: &EpisodeSummary) {
        // A failed write must not abort training.
        let res = serde_json::to_writer(&mut self.writer, summary)
            .map_err(io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush());
        if let Err(e) = res {
            warn!(episode = summary.episode, error = %e, "episode log write failed");
        }
    }
}

/// FileSink when `path` is given and creatable, NoopSink otherwise.
pub fn build_sink(path: Option<&Path>) -> Box<dyn EpisodeSink> {
    match path {
        Some(p) => match FileSink::create(p) {
            Ok(s) => Box::new(s),
            Err(e) => {
                warn!(path = %p.display(), error = %e, "cannot create episode log; falling back to NoopSink");
                Box::new(NoopSink)
            }
        },
        None => Box::new(NoopSink),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_sink_writes_one_line_per_episode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("episodes.jsonl");
        {
            let mut sink = FileSink::create(&path).unwrap();
            for episode in 0..3 {
                sink.log_episode(&EpisodeSummary {
                    episode,
                    ..EpisodeSummary::default()
                });
            }
        }
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let v: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(v["episode"], 2);
    }

    #[test]
    fn test_build_sink_falls_back_on_bad_path() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("missing").join("x.jsonl");
        let mut sink = build_sink(Some(bad.as_path()));
        sink.log_episode(&EpisodeSummary::default());
        assert!(!bad.exists());
    }
}
