//! Training metric sinks.

use std::io::Write;

use serde::Serialize;

/// Receives per-batch loss reports from the learners. Fire-and-forget: a
/// reporter must not fail training and must not block it.
pub trait Reporter {
    fn sense_batch(&mut self, episode: usize, batch: usize, dataset_size: usize, loss: f64);
    fn action_batch(&mut self, episode: usize, batch: usize, dataset_size: usize, loss: f64);
}

/// Reports through the `log` crate at debug level.
pub struct LogReporter;

impl Reporter for LogReporter {
    fn sense_batch(&mut self, episode: usize, batch: usize, dataset_size: usize, loss: f64) {
        log::debug!("sense episode {episode} batch {batch} size {dataset_size} loss {loss}");
    }

    fn action_batch(&mut self, episode: usize, batch: usize, dataset_size: usize, loss: f64) {
        log::debug!("action episode {episode} batch {batch} size {dataset_size} loss {loss}");
    }
}

/// Discards all reports.
pub struct NullReporter;

impl Reporter for NullReporter {
    fn sense_batch(&mut self, _episode: usize, _batch: usize, _dataset_size: usize, _loss: f64) {}
    fn action_batch(&mut self, _episode: usize, _batch: usize, _dataset_size: usize, _loss: f64) {}
}

#[derive(Serialize)]
struct MetricRecord<'a> {
    signal: &'a str,
    episode: usize,
    batch: usize,
    dataset_size: usize,
    loss: f64,
}

/// Writes one JSON object per report line. Write errors are logged and
/// otherwise ignored.
pub struct JsonlReporter<W: Write> {
    out: W,
}

impl<W: Write> JsonlReporter<W> {
    pub fn new(out: W) -> Self {
        JsonlReporter { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, record: &MetricRecord) {
        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(error) = writeln!(self.out, "{line}") {
                    log::warn!("failed to write metric record: {error}");
                }
            }
            Err(error) => log::warn!("failed to serialize metric record: {error}"),
        }
    }
}

impl<W: Write> Reporter for JsonlReporter<W> {
    fn sense_batch(&mut self, episode: usize, batch: usize, dataset_size: usize, loss: f64) {
        self.write(&MetricRecord {
            signal: "sense",
            episode,
            batch,
            dataset_size,
            loss,
        });
    }

    fn action_batch(&mut self, episode: usize, batch: usize, dataset_size: usize, loss: f64) {
        self.write(&MetricRecord {
            signal: "action",
            episode,
            batch,
            dataset_size,
            loss,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_reporter_emits_parseable_lines() {
        let mut reporter = JsonlReporter::new(Vec::new());
        reporter.sense_batch(3, 1, 20, 0.25);
        reporter.action_batch(3, 2, 40, 1.5);
        let out = reporter.into_inner();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["signal"], "sense");
        assert_eq!(first["episode"], 3);
        assert_eq!(first["loss"], 0.25);
    }
}
