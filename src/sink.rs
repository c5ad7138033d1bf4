use crate::logger::Logger;
use crate::types::{ImpedanceSample, StatusLevel, SweepResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Consumer of accepted samples and status changes. The sweep scheduler only
/// pushes through this surface; what happens to the data (CSV, GUI, log
/// stream) is the sink's business.
pub trait ResultSink {
    fn on_sample(&mut self, sample: &ImpedanceSample);
    fn on_status(&mut self, level: StatusLevel, message: &str);
    fn on_sweep_complete(&mut self, result: &SweepResult);
}

/// Routes status changes and samples into the log facade.
#[derive(Debug, Default)]
pub struct StatusLogSink;

impl ResultSink for StatusLogSink {
    fn on_sample(&mut self, sample: &ImpedanceSample) {
        log::info!(
            "sample: {:.4} Hz  Z = {:.4e} + ({:.4e})j (imag negated)",
            sample.frequency,
            sample.z_real,
            sample.z_imag_neg
        );
    }

    fn on_status(&mut self, level: StatusLevel, message: &str) {
        match level {
            StatusLevel::Info => log::info!("{message}"),
            StatusLevel::Warning => log::warn!("{message}"),
            StatusLevel::Error => log::error!("{message}"),
        }
    }

    fn on_sweep_complete(&mut self, result: &SweepResult) {
        log::info!("sweep complete with {} accepted samples", result.len());
    }
}

/// Writes the finalized sweep as `frequency,z_real,z_imag_neg` rows, once, at
/// sweep completion. Nothing is written incrementally; an interrupted sweep
/// still produces a file with whatever was accepted.
#[derive(Debug)]
pub struct CsvSink {
    directory: PathBuf,
    header: bool,
    last_path: Option<PathBuf>,
}

impl CsvSink {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
            header: false,
            last_path: None,
        }
    }

    /// Emit a `frequency,z_real,z_imag_neg` header row.
    pub fn with_header(mut self, header: bool) -> Self {
        self.header = header;
        self
    }

    /// Path of the most recently written artifact.
    pub fn last_path(&self) -> Option<&Path> {
        self.last_path.as_deref()
    }

    fn write(&self, result: &SweepResult) -> std::io::Result<PathBuf> {
        std::fs::create_dir_all(&self.directory)?;
        let name = format!("sweep_{}.csv", Utc::now().format("%Y%m%d_%H%M%S"));
        let path = self.directory.join(name);

        let mut file = std::io::BufWriter::new(std::fs::File::create(&path)?);
        if self.header {
            writeln!(file, "frequency,z_real,z_imag_neg")?;
        }
        for row in result.rows() {
            writeln!(file, "{},{},{}", row.frequency, row.z_real, row.z_imag_neg)?;
        }
        file.flush()?;
        Ok(path)
    }
}

impl ResultSink for CsvSink {
    fn on_sample(&mut self, _sample: &ImpedanceSample) {}

    fn on_status(&mut self, _level: StatusLevel, _message: &str) {}

    fn on_sweep_complete(&mut self, result: &SweepResult) {
        match self.write(result) {
            Ok(path) => {
                log::info!("sweep data saved to {}", path.display());
                self.last_path = Some(path);
            }
            Err(e) => log::error!("failed to save sweep CSV: {e}"),
        }
    }
}

/// One accepted sample with its wall-clock acceptance time, for the JSONL
/// sweep log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleRecord {
    pub timestamp: chrono::DateTime<Utc>,
    pub frequency: f64,
    pub z_real: f64,
    pub z_imag_neg: f64,
}

/// Streams every accepted sample to a JSONL file through the buffered logger.
#[derive(Debug)]
pub struct JsonlSink {
    logger: Logger<SampleRecord>,
}

impl JsonlSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            logger: Logger::new(path, 8),
        }
    }
}

impl ResultSink for JsonlSink {
    fn on_sample(&mut self, sample: &ImpedanceSample) {
        let record = SampleRecord {
            timestamp: Utc::now(),
            frequency: sample.frequency,
            z_real: sample.z_real,
            z_imag_neg: sample.z_imag_neg,
        };
        if let Err(e) = self.logger.add(record) {
            log::error!("sample log write failed: {e}");
        }
    }

    fn on_status(&mut self, _level: StatusLevel, _message: &str) {}

    fn on_sweep_complete(&mut self, _result: &SweepResult) {
        if let Err(e) = self.logger.flush() {
            log::error!("sample log flush failed: {e}");
        }
    }
}

/// Fans every callback out to a list of sinks.
#[derive(Default)]
pub struct CompositeSink {
    sinks: Vec<Box<dyn ResultSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn ResultSink>) {
        self.sinks.push(sink);
    }

    pub fn with(mut self, sink: Box<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ResultSink for CompositeSink {
    fn on_sample(&mut self, sample: &ImpedanceSample) {
        for sink in &mut self.sinks {
            sink.on_sample(sample);
        }
    }

    fn on_status(&mut self, level: StatusLevel, message: &str) {
        for sink in &mut self.sinks {
            sink.on_status(level, message);
        }
    }

    fn on_sweep_complete(&mut self, result: &SweepResult) {
        for sink in &mut self.sinks {
            sink.on_sweep_complete(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_written_only_at_completion() {
        let dir = std::env::temp_dir().join("eis_rig_csv_sink_test");
        let _ = std::fs::remove_dir_all(&dir);

        let mut sink = CsvSink::new(&dir).with_header(true);
        let sample = ImpedanceSample {
            frequency: 10.0,
            z_real: 50.0,
            z_imag_neg: 1.5,
        };

        sink.on_sample(&sample);
        assert!(!dir.exists(), "nothing should be written mid-sweep");

        let mut result = SweepResult::with_capacity(2);
        result.set(0, sample);
        result.finalize();
        sink.on_sweep_complete(&result);

        let path = sink.last_path().expect("artifact path recorded");
        let contents = std::fs::read_to_string(path).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("frequency,z_real,z_imag_neg"));
        assert_eq!(lines.next(), Some("10,50,1.5"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_composite_fans_out() {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct Counter {
            samples: Rc<RefCell<usize>>,
        }
        impl ResultSink for Counter {
            fn on_sample(&mut self, _sample: &ImpedanceSample) {
                *self.samples.borrow_mut() += 1;
            }
            fn on_status(&mut self, _level: StatusLevel, _message: &str) {}
            fn on_sweep_complete(&mut self, _result: &SweepResult) {}
        }

        let count = Rc::new(RefCell::new(0));
        let mut composite = CompositeSink::new()
            .with(Box::new(StatusLogSink))
            .with(Box::new(Counter {
                samples: count.clone(),
            }));
        let sample = ImpedanceSample {
            frequency: 1.0,
            z_real: 2.0,
            z_imag_neg: 3.0,
        };
        composite.on_sample(&sample);
        composite.on_sample(&sample);
        composite.on_status(StatusLevel::Info, "status fan-out");

        assert_eq!(*count.borrow(), 2);
    }
}
