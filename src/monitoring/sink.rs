//! Telemetry Sink
//!
//! CSV file with a fixed header followed by one [`Snapshot`] per row.
//! Every row is flushed as soon as it is written, so the file is always
//! header plus whole rows once the writing thread has stopped.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use thiserror::Error;

use super::snapshot::{Snapshot, SINK_HEADER};

/// Errors from creating, writing or reading a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to open sink '{path}': {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("sink '{path}' has unexpected header: {found:?}")]
    Header { path: PathBuf, found: Vec<String> },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Append-only writer owning a sink file.
pub struct SnapshotSink {
    path: PathBuf,
    writer: csv::Writer<File>,
    rows: usize,
}

impl SnapshotSink {
    /// Creates or truncates the sink and writes the header row.
    ///
    /// Missing parent directories are created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        let open_error = |source| SinkError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(open_error)?;
                debug!("Created directory: {}", parent.display());
            }
        }

        let file = File::create(&path).map_err(open_error)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.write_record(SINK_HEADER)?;
        writer.flush()?;

        Ok(Self { path, writer, rows: 0 })
    }

    /// Appends one row and flushes it to the file.
    pub fn append(&mut self, snapshot: &Snapshot) -> Result<(), SinkError> {
        self.writer.serialize(snapshot)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Number of rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads every row of a sink, checking the header first.
pub fn read_sink(path: impl AsRef<Path>) -> Result<Vec<Snapshot>, SinkError> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;

    let headers = reader.headers()?;
    if !headers.iter().eq(SINK_HEADER.iter().copied()) {
        return Err(SinkError::Header {
            path: path.to_path_buf(),
            found: headers.iter().map(str::to_string).collect(),
        });
    }

    let rows = reader.deserialize().collect::<Result<Vec<Snapshot>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::snapshot::HostReadings;
    use chrono::{Duration, Local};
    use tempfile::tempdir;

    fn snapshot(offset_ms: i64, cpu: f32) -> Snapshot {
        let base = Local::now().naive_local();
        Snapshot::new(
            base + Duration::milliseconds(offset_ms),
            HostReadings {
                cpu_percent: cpu,
                ..HostReadings::default()
            },
        )
    }

    #[test]
    fn test_create_writes_header() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("monitor.csv");

        let sink = SnapshotSink::create(&path).unwrap();
        assert_eq!(sink.rows(), 0);
        assert_eq!(sink.path(), path.as_path());

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "Checked at,CPU,VMem,SMem,Read,Write,GPU,GMem\n");
    }

    #[test]
    fn test_rows_visible_after_append() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("monitor.csv");

        let mut sink = SnapshotSink::create(&path).unwrap();
        sink.append(&snapshot(0, 10.0)).unwrap();
        sink.append(&snapshot(1000, 20.0)).unwrap();
        assert_eq!(sink.rows(), 2);

        // Readable while the writer is still open
        let rows = read_sink(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].cpu_percent, 10.0);
        assert_eq!(rows[1].cpu_percent, 20.0);
        assert!(rows[0].captured_at < rows[1].captured_at);
    }

    #[test]
    fn test_create_makes_parent_dirs() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested/runs/upscale.csv");

        SnapshotSink::create(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_create_truncates_existing() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("monitor.csv");
        fs::write(&path, "stale content\n").unwrap();

        SnapshotSink::create(&path).unwrap();
        assert!(read_sink(&path).unwrap().is_empty());
    }

    #[test]
    fn test_create_fails_on_directory() {
        let temp_dir = tempdir().unwrap();
        let result = SnapshotSink::create(temp_dir.path());
        assert!(matches!(result, Err(SinkError::Open { .. })));
    }

    #[test]
    fn test_read_rejects_foreign_header() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("other.csv");
        fs::write(&path, "time,cpu\n1,2\n").unwrap();

        match read_sink(&path) {
            Err(SinkError::Header { found, .. }) => assert_eq!(found, vec!["time", "cpu"]),
            other => panic!("expected header error, got {:?}", other),
        }
    }

    #[test]
    fn test_read_missing_file() {
        assert!(read_sink("/nonexistent/benchwatch/monitor.csv").is_err());
    }
}
