use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;

use crate::error::EisError;

/// Buffered JSONL writer for per-sweep records. Intermediate flushes append
/// one JSON object per line; transient flush failures are tolerated up to a
/// cap so a flaky disk does not kill a running measurement.
#[derive(Debug)]
pub struct Logger<T>
where
    T: Serialize + Clone,
{
    buffer: Vec<T>,
    buffer_size: usize,
    file_path: PathBuf,
    flush_failures: usize,
    max_flush_failures: usize,
}

impl<T> Logger<T>
where
    T: Serialize + Clone,
{
    pub fn new<P: Into<PathBuf>>(file_path: P, buffer_size: usize) -> Self {
        let mut path = file_path.into();
        if path.extension() != Some(std::ffi::OsStr::new("jsonl")) {
            path.set_extension("jsonl");
        }

        Self {
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            file_path: path,
            flush_failures: 0,
            max_flush_failures: 10,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.file_path
    }

    pub fn add(&mut self, record: T) -> Result<(), EisError> {
        self.buffer.push(record);

        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }

        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), EisError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let file = match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
        {
            Ok(f) => f,
            Err(e) => {
                self.flush_failures += 1;
                log::error!(
                    "Flush failure {}/{}: failed to open log file: {}",
                    self.flush_failures,
                    self.max_flush_failures,
                    e
                );

                if self.flush_failures >= self.max_flush_failures {
                    return Err(EisError::io(
                        e,
                        format!(
                            "too many consecutive flush failures for {:?}",
                            self.file_path
                        ),
                    ));
                }

                // don't fail the sweep for a transient flush error
                return Ok(());
            }
        };

        let mut writer = std::io::BufWriter::new(file);
        let write_result = (|| -> Result<(), EisError> {
            for record in &self.buffer {
                let line = serde_json::to_string(record)
                    .map_err(|e| EisError::Config(format!("serializing log record: {e}")))?;
                writeln!(writer, "{}", line)
                    .map_err(|e| EisError::io(e, "writing log record"))?;
            }
            writer
                .flush()
                .map_err(|e| EisError::io(e, "flushing log records"))?;
            Ok(())
        })();

        match write_result {
            Ok(()) => {
                self.flush_failures = 0;
                self.buffer.clear();
                Ok(())
            }
            Err(e) => {
                self.flush_failures += 1;
                log::error!(
                    "Flush failure {}/{}: {}",
                    self.flush_failures,
                    self.max_flush_failures,
                    e
                );
                if self.flush_failures >= self.max_flush_failures {
                    Err(e)
                } else {
                    Ok(())
                }
            }
        }
    }
}

impl<T> Drop for Logger<T>
where
    T: Serialize + Clone,
{
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Record {
        frequency: f64,
        z_real: f64,
    }

    #[test]
    fn test_buffered_flush_writes_jsonl() {
        let dir = std::env::temp_dir().join("eis_rig_logger_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sweep_records");

        let mut logger = Logger::new(&path, 2);
        let _ = std::fs::remove_file(logger.path());

        logger
            .add(Record {
                frequency: 10.0,
                z_real: 50.0,
            })
            .unwrap();
        logger
            .add(Record {
                frequency: 5.0,
                z_real: 60.0,
            })
            .unwrap();

        let written = std::fs::read_to_string(logger.path()).unwrap();
        let lines: Vec<Record> = written
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].frequency, 10.0);

        let _ = std::fs::remove_file(logger.path());
    }

    #[test]
    fn test_extension_is_enforced() {
        let logger: Logger<Record> = Logger::new("records.txt", 8);
        assert_eq!(
            logger.path().extension(),
            Some(std::ffi::OsStr::new("jsonl"))
        );
    }
}
