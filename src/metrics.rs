//! Metrics sinks for training and evaluation.
//!
//! The core emits scalar time series keyed by name and a monotonic step
//! counter; sinks decide what to do with them. Nothing in the training loop
//! reads a metric back.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Receiver for scalar time series.
pub trait MetricsSink: Send {
    /// Record `value` for `key` at the given global step.
    fn record(&mut self, key: &str, step: usize, value: f32);

    /// Flush any buffered output.
    fn flush(&mut self) {}
}

/// Sink that discards everything. Useful for tests and benchmarks.
#[derive(Debug, Default)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record(&mut self, _key: &str, _step: usize, _value: f32) {}
}

/// Console sink, gated so each key prints at most once per `step_interval`
/// global steps.
pub struct ConsoleSink {
    step_interval: usize,
    last_printed: HashMap<String, usize>,
}

impl ConsoleSink {
    pub fn new(step_interval: usize) -> Self {
        Self {
            step_interval,
            last_printed: HashMap::new(),
        }
    }
}

impl MetricsSink for ConsoleSink {
    fn record(&mut self, key: &str, step: usize, value: f32) {
        let due = match self.last_printed.get(key) {
            Some(&last) => step >= last + self.step_interval,
            None => true,
        };
        if due {
            println!("step={:<10} {:<28} {:.6}", step, key, value);
            self.last_printed.insert(key.to_string(), step);
        }
    }
}

/// CSV sink writing `step,key,value` rows through a buffered writer.
pub struct CsvSink {
    writer: BufWriter<File>,
}

impl CsvSink {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "step,key,value")?;
        Ok(Self { writer })
    }
}

impl MetricsSink for CsvSink {
    fn record(&mut self, key: &str, step: usize, value: f32) {
        if let Err(e) = writeln!(self.writer, "{},{},{}", step, key, value) {
            log::warn!("failed to write metric {}: {}", key, e);
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            log::warn!("failed to flush metrics: {}", e);
        }
    }
}

/// Fan-out to any number of sinks.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn MetricsSink>>,
}

impl MultiSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn MetricsSink>) {
        self.sinks.push(sink);
    }

    pub fn with(mut self, sink: Box<dyn MetricsSink>) -> Self {
        self.push(sink);
        self
    }
}

impl MetricsSink for MultiSink {
    fn record(&mut self, key: &str, step: usize, value: f32) {
        for sink in &mut self.sinks {
            sink.record(key, step, value);
        }
    }

    fn flush(&mut self) {
        for sink in &mut self.sinks {
            sink.flush();
        }
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Test sink that keeps every record in memory.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub records: Vec<(String, usize, f32)>,
    }

    impl RecordingSink {
        pub fn values_for(&self, key: &str) -> Vec<f32> {
            self.records
                .iter()
                .filter(|(k, _, _)| k == key)
                .map(|(_, _, v)| *v)
                .collect()
        }
    }

    impl MetricsSink for RecordingSink {
        fn record(&mut self, key: &str, step: usize, value: f32) {
            self.records.push((key.to_string(), step, value));
        }
    }

    /// Recording sink whose storage stays readable after the sink is boxed
    /// and handed to a trainer.
    #[derive(Debug, Default)]
    pub struct SharedRecordingSink {
        records: Arc<Mutex<Vec<(String, usize, f32)>>>,
    }

    impl SharedRecordingSink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn handle(&self) -> Arc<Mutex<Vec<(String, usize, f32)>>> {
            Arc::clone(&self.records)
        }
    }

    impl MetricsSink for SharedRecordingSink {
        fn record(&mut self, key: &str, step: usize, value: f32) {
            self.records
                .lock()
                .unwrap()
                .push((key.to_string(), step, value));
        }
    }

    /// Collect all values recorded for `key`.
    pub fn values_for(records: &[(String, usize, f32)], key: &str) -> Vec<f32> {
        records
            .iter()
            .filter(|(k, _, _)| k == key)
            .map(|(_, _, v)| *v)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::recording::RecordingSink;
    use super::*;
    use std::io::Read;

    #[test]
    fn test_multi_sink_accepts_heterogeneous_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        let mut multi = MultiSink::new()
            .with(Box::new(NullSink))
            .with(Box::new(CsvSink::new(&path).unwrap()));
        multi.record("losses/value_loss", 128, 0.25);
        multi.flush();

        let mut contents = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert!(contents.contains("128,losses/value_loss,0.25"));
    }

    #[test]
    fn test_recording_sink_filters_by_key() {
        let mut sink = RecordingSink::default();
        sink.record("a", 1, 1.0);
        sink.record("b", 1, 2.0);
        sink.record("a", 2, 3.0);
        assert_eq!(sink.values_for("a"), vec![1.0, 3.0]);
        assert_eq!(sink.values_for("b"), vec![2.0]);
    }

    #[test]
    fn test_csv_sink_writes_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        {
            let mut sink = CsvSink::new(&path).unwrap();
            sink.record("charts/learning_rate", 2048, 0.00025);
            sink.flush();
        }

        let mut contents = String::new();
        File::open(&path)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert!(contents.starts_with("step,key,value"));
        assert!(contents.contains("2048,charts/learning_rate,0.00025"));
    }

    #[test]
    fn test_console_sink_interval_gating() {
        let mut sink = ConsoleSink::new(100);
        // First record always prints; the map tracks the printed step.
        sink.record("x", 10, 1.0);
        assert_eq!(sink.last_printed.get("x"), Some(&10));
        // Within the interval the entry is unchanged.
        sink.record("x", 50, 2.0);
        assert_eq!(sink.last_printed.get("x"), Some(&10));
        sink.record("x", 110, 3.0);
        assert_eq!(sink.last_printed.get("x"), Some(&110));
    }
}
