use std::collections::hash_map::Entry;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::flows::FlowId;
use crate::units::Nanosecs;

/// A sampled quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quantity {
    /// Bits per second.
    Throughput,
    /// Congestion window, in segments.
    Cwnd,
    /// Queue occupancy, in packets.
    QueueLen,
}

/// Names one time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct SeriesKey {
    pub quantity: Quantity,
    pub flow: Option<FlowId>,
}

impl SeriesKey {
    pub fn throughput(flow: FlowId) -> Self {
        Self {
            quantity: Quantity::Throughput,
            flow: Some(flow),
        }
    }

    pub fn cwnd(flow: FlowId) -> Self {
        Self {
            quantity: Quantity::Cwnd,
            flow: Some(flow),
        }
    }

    pub fn queue_len() -> Self {
        Self {
            quantity: Quantity::QueueLen,
            flow: None,
        }
    }

    /// The file this series is written to.
    pub fn file_name(&self) -> String {
        let stem = match self.quantity {
            Quantity::Throughput => "throughput",
            Quantity::Cwnd => "cwnd",
            Quantity::QueueLen => "queue-size",
        };
        match self.flow {
            Some(flow) => format!("{stem}-{flow}.dat"),
            None => format!("{stem}.dat"),
        }
    }
}

/// One appended sample.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SampleRecord {
    pub time: Nanosecs,
    pub series: SeriesKey,
    pub value: f64,
}

impl SampleRecord {
    /// `seconds value`
    pub fn to_line(&self) -> String {
        format!("{} {}", self.time.into_secs_f64(), self.value)
    }
}

/// An append-only destination for samples.
pub trait SeriesSink {
    fn append(&mut self, record: SampleRecord) -> Result<(), ResourceError>;

    fn flush(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }
}

impl<S: SeriesSink + ?Sized> SeriesSink for Box<S> {
    fn append(&mut self, record: SampleRecord) -> Result<(), ResourceError> {
        (**self).append(record)
    }

    fn flush(&mut self) -> Result<(), ResourceError> {
        (**self).flush()
    }
}

/// Writes each series to its own file under a directory. Files are created on first append.
#[derive(Debug)]
pub struct DirSink {
    dir: PathBuf,
    files: FxHashMap<SeriesKey, BufWriter<File>>,
}

impl DirSink {
    /// Creates `dir` (and its parents) if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, ResourceError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| ResourceError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            files: FxHashMap::default(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SeriesSink for DirSink {
    fn append(&mut self, record: SampleRecord) -> Result<(), ResourceError> {
        let path = self.dir.join(record.series.file_name());
        let file = match self.files.entry(record.series) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => {
                let f = File::create(&path).map_err(|source| ResourceError::Create {
                    path: path.clone(),
                    source,
                })?;
                e.insert(BufWriter::new(f))
            }
        };
        writeln!(file, "{}", record.to_line())
            .map_err(|source| ResourceError::Write { path, source })
    }

    fn flush(&mut self) -> Result<(), ResourceError> {
        for (series, file) in &mut self.files {
            file.flush().map_err(|source| ResourceError::Write {
                path: self.dir.join(series.file_name()),
                source,
            })?;
        }
        Ok(())
    }
}

/// Keeps samples in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Vec<SampleRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    /// The `(time, value)` pairs of one series, in append order.
    pub fn series(&self, key: SeriesKey) -> Vec<(Nanosecs, f64)> {
        self.records
            .iter()
            .filter(|r| r.series == key)
            .map(|r| (r.time, r.value))
            .collect()
    }
}

impl SeriesSink for MemorySink {
    fn append(&mut self, record: SampleRecord) -> Result<(), ResourceError> {
        self.records.push(record);
        Ok(())
    }
}

/// Output that cannot be created or written. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("failed to create directory {path:?}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to create {path:?}")]
    Create { path: PathBuf, source: io::Error },

    #[error("failed to write {path:?}")]
    Write { path: PathBuf, source: io::Error },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Millisecs;

    fn record(ms: u64, series: SeriesKey, value: f64) -> SampleRecord {
        SampleRecord {
            time: Millisecs::new(ms).into(),
            series,
            value,
        }
    }

    #[test]
    fn file_names() {
        assert_eq!(
            SeriesKey::throughput(FlowId::new(1)).file_name(),
            "throughput-1.dat"
        );
        assert_eq!(SeriesKey::cwnd(FlowId::ZERO).file_name(), "cwnd-0.dat");
        assert_eq!(SeriesKey::queue_len().file_name(), "queue-size.dat");
    }

    #[test]
    fn dir_sink_writes_one_file_per_series() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let out = dir.path().join("results");
        let mut sink = DirSink::new(&out)?;
        sink.append(record(200, SeriesKey::throughput(FlowId::ZERO), 1e6))?;
        sink.append(record(400, SeriesKey::throughput(FlowId::ZERO), 2.5e6))?;
        sink.append(record(400, SeriesKey::queue_len(), 12.0))?;
        sink.flush()?;
        let tput = fs::read_to_string(out.join("throughput-0.dat"))?;
        insta::assert_snapshot!(tput, @r###"
        0.2 1000000
        0.4 2500000
        "###);
        let queue = fs::read_to_string(out.join("queue-size.dat"))?;
        assert_eq!(queue, "0.4 12\n");
        Ok(())
    }

    #[test]
    fn dir_sink_reports_unwritable_dir() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let blocker = dir.path().join("file");
        fs::write(&blocker, "")?;
        let res = DirSink::new(blocker.join("sub"));
        assert!(matches!(res, Err(ResourceError::CreateDir { .. })));
        Ok(())
    }

    #[test]
    fn memory_sink_filters_by_series() -> anyhow::Result<()> {
        let mut sink = MemorySink::new();
        let (a, b) = (
            SeriesKey::throughput(FlowId::new(0)),
            SeriesKey::throughput(FlowId::new(1)),
        );
        sink.append(record(200, a, 1.0))?;
        sink.append(record(200, b, 2.0))?;
        sink.append(record(400, a, 3.0))?;
        assert_eq!(
            sink.series(a),
            vec![
                (Millisecs::new(200).into(), 1.0),
                (Millisecs::new(400).into(), 3.0)
            ]
        );
        assert_eq!(sink.records().len(), 3);
        Ok(())
    }
}
