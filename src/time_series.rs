//! Time series of snapshots indexed by `.pvd` collection files.
//!
//! A [`PvdWriter`] writes one snapshot per call to [`PvdWriter::write`] and rewrites the
//! collection file after every successful snapshot, so the index on disk always lists exactly
//! the snapshots that were written.
//!
//! # Examples
//!
//! ```no_run
//! use gridio::grid::ImageGrid;
//! use gridio::model::Field;
//! use gridio::time_series::{PvdWriter, TimeSeriesReader};
//! use gridio::{GridKind, PieceWriter};
//!
//! let grid = ImageGrid::new([8, 8, 0], [0.0; 3], [0.125; 3]);
//! let mut series = PvdWriter::new(PieceWriter::new(GridKind::Image(&grid)), "out/heat");
//! for step in 0..10 {
//!     let t = step as f64 * 0.1;
//!     series.writer_mut().set_point_field("T", Field::scalars(vec![t; 81]))?;
//!     series.write(t)?;
//! }
//!
//! let reader = TimeSeriesReader::open("out/heat.pvd")?;
//! assert_eq!(reader.len(), 10);
//! let last = reader.step(9)?;
//! # Ok::<(), gridio::Error>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use crate::model::Field;
use crate::parallel::{Communicator, ParallelWriter};
use crate::reader::{self, CollectionEntry, ParallelFile, PieceFile};
use crate::writer::{self, PieceWriter};
use crate::xml::{FileType, StorageFormat, XmlElement};
use crate::Error;

/// Name of the field data entry holding the time of a snapshot.
pub const TIME_VALUE: &str = "TimeValue";

/// A writer producing one snapshot file per time step.
pub trait SnapshotWriter {
    /// Attaches the time of the next snapshot.
    fn set_time_value(&mut self, time: f64) -> Result<(), Error>;
    /// Writes the snapshot and returns the path of the file to list in the index.
    fn write_snapshot(&mut self, base_path: &Path) -> Result<PathBuf, Error>;
    /// Prepares the writer for the fields of the next step.
    fn finish_snapshot(&mut self);
    /// Whether this writer maintains the index file.
    fn owns_index(&self) -> bool {
        true
    }
}

impl SnapshotWriter for PieceWriter<'_> {
    fn set_time_value(&mut self, time: f64) -> Result<(), Error> {
        self.set_meta_data(TIME_VALUE, Field::scalars(vec![time]))
    }

    fn write_snapshot(&mut self, base_path: &Path) -> Result<PathBuf, Error> {
        self.write(base_path)
    }

    fn finish_snapshot(&mut self) {
        self.reset();
    }
}

impl<C: Communicator> SnapshotWriter for ParallelWriter<'_, C> {
    fn set_time_value(&mut self, time: f64) -> Result<(), Error> {
        self.set_meta_data(TIME_VALUE, Field::scalars(vec![time]))
    }

    fn write_snapshot(&mut self, base_path: &Path) -> Result<PathBuf, Error> {
        self.write(base_path).map(|output| output.wrapper)
    }

    fn finish_snapshot(&mut self) {
        self.reset();
    }

    fn owns_index(&self) -> bool {
        self.communicator().rank() == 0
    }
}

/// Writes snapshots `<base>-<NNNNN>` and the collection `<base>.pvd` listing them.
pub struct PvdWriter<W> {
    writer: W,
    base_path: PathBuf,
    entries: Vec<CollectionEntry>,
    written: usize,
}

impl<W: SnapshotWriter> PvdWriter<W> {
    pub fn new(writer: W, base_path: impl Into<PathBuf>) -> Self {
        PvdWriter {
            writer,
            base_path: base_path.into(),
            entries: Vec::new(),
            written: 0,
        }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Entries of the index, ordered by time.
    pub fn entries(&self) -> &[CollectionEntry] {
        &self.entries
    }

    pub fn index_path(&self) -> PathBuf {
        writer::with_extension(&self.base_path, "pvd")
    }

    fn snapshot_base(&self) -> Result<PathBuf, Error> {
        let name = self.base_path.file_name().ok_or_else(|| {
            Error::Configuration(format!("{} does not name a file", self.base_path.display()))
        })?;
        let mut name = name.to_owned();
        name.push(format!("-{:05}", self.written));
        Ok(self.base_path.with_file_name(name))
    }

    /// Writes the snapshot for `time` and updates the index.
    ///
    /// Times must be finite. If the snapshot cannot be written, the index is left as it was and
    /// the writer keeps its fields, so the step can be retried.
    pub fn write(&mut self, time: f64) -> Result<PathBuf, Error> {
        if !time.is_finite() {
            return Err(Error::Configuration(format!(
                "snapshot time {} is not a finite number",
                time
            )));
        }
        let base = self.snapshot_base()?;
        self.writer.set_time_value(time)?;
        let path = self.writer.write_snapshot(&base)?;
        self.writer.finish_snapshot();
        self.written += 1;

        let file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        // Entries with equal times keep their insertion order.
        let at = self.entries.partition_point(|e| e.time <= time);
        self.entries.insert(
            at,
            CollectionEntry {
                time,
                part: 0,
                file,
            },
        );
        if self.writer.owns_index() {
            self.write_index()?;
        }
        Ok(path)
    }

    fn write_index(&self) -> Result<(), Error> {
        let mut root = XmlElement::new("VTKFile")
            .with_attribute("type", "Collection")
            .with_attribute("version", "1.0");
        let collection = root.add_child(XmlElement::new("Collection"));
        for entry in &self.entries {
            collection.add_child(
                XmlElement::new("DataSet")
                    .with_attribute("timestep", entry.time)
                    .with_attribute("group", "")
                    .with_attribute("part", entry.part)
                    .with_attribute("name", "")
                    .with_attribute("file", &entry.file),
            );
        }
        let mut buf = Vec::new();
        root.render(&mut buf, None, true)?;
        let path = self.index_path();
        fs::write(&path, buf)?;
        log::debug!("indexed {} snapshots in {}", self.entries.len(), path.display());
        Ok(())
    }
}

/// A snapshot of a time series.
pub enum Snapshot {
    Piece(PieceFile),
    Parallel(ParallelFile),
}

/// Reads a `.pvd` collection. Snapshots are only opened on request.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeriesReader {
    directory: PathBuf,
    entries: Vec<CollectionEntry>,
}

impl TimeSeriesReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let entries = reader::parse_collection(&fs::read(path)?)?;
        Ok(TimeSeriesReader {
            directory: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CollectionEntry] {
        &self.entries
    }

    pub fn times(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.time).collect()
    }

    /// Opens the snapshot of the `n`-th entry.
    pub fn step(&self, n: usize) -> Result<Snapshot, Error> {
        let entry = self.entries.get(n).ok_or_else(|| {
            Error::InvalidState(format!(
                "step {} requested from a series of {} steps",
                n,
                self.entries.len()
            ))
        })?;
        let path = self.directory.join(&entry.file);
        let ext = path.extension().and_then(|e| e.to_str());
        match ext.and_then(FileType::try_from_ext).map(|ft| ft.storage) {
            Some(StorageFormat::Serial) => PieceFile::open(&path).map(Snapshot::Piece),
            Some(StorageFormat::Parallel) => ParallelFile::open(&path).map(Snapshot::Parallel),
            None => Err(Error::UnknownFileExtension(ext.map(str::to_string))),
        }
    }
}
