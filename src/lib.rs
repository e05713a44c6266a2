//! Writers and readers for VTK XML grid files.
//!
//! A grid is exposed to the writers through the adaptor traits in [`grid`]. Fields are attached
//! per point or per cell and serialized with one of the compressors in [`compression`] and one
//! of the encoders in [`encoding`]. The produced outputs are
//!
//!  - Image data (`.vti`) -- Serial vtkImageData (structured)
//!  - RectilinearGrid (`.vtr`) -- Serial vtkRectilinearGrid (structured)
//!  - StructuredGrid (`.vts`) -- Serial vtkStructuredGrid (structured)
//!  - UnstructuredGrid (`.vtu`) -- Serial vtkUnstructuredGrid (unstructured)
//!  - `.pvti`, `.pvtr`, `.pvts`, `.pvtu` -- Parallel wrappers referencing one piece per rank
//!  - `.pvd` -- Collections of time steps
//!  - VTK-HDF layouts written through a [`hdf::Container`] backend.
//!
//! # Examples
//!
//! ```
//! use gridio::grid::ImageGrid;
//! use gridio::model::Field;
//! use gridio::writer::{GridKind, PieceWriter};
//!
//! let grid = ImageGrid::new([1, 1, 0], [0.0; 3], [1.0; 3]);
//! let mut writer = PieceWriter::new(GridKind::Image(&grid));
//! writer.set_point_field("u", Field::scalars(vec![1.0f64, 2.0, 3.0, 4.0]))?;
//!
//! let mut output = Vec::new();
//! writer.write_to(&mut output)?;
//! assert!(String::from_utf8_lossy(&output).contains("<ImageData"));
//! # Ok::<(), gridio::Error>(())
//! ```

pub mod appendix;
pub mod blocks;
pub mod compression;
pub mod data_array;
pub mod encoding;
pub mod grid;
pub mod hdf;
pub mod model;
pub mod options;
pub mod parallel;
pub mod reader;
pub mod time_series;
pub mod writer;
pub mod xml;

use std::io;

pub use options::{DataFormat, XmlOptions};
pub use writer::{GridKind, PieceWriter};

/// Error type for all read and write operations.
#[derive(Debug)]
pub enum Error {
    IO(io::Error),
    XML(quick_xml::Error),
    /// The requested combination of options cannot be written.
    Configuration(String),
    /// A field does not have one tuple per point or per cell.
    FieldSizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    /// The writer was used in a state that does not allow the requested operation.
    InvalidState(String),
    /// A size does not fit the selected header type or a block size is invalid.
    Size(String),
    /// Malformed encoded data.
    Encoding(String),
    /// A compression backend reported a failure.
    Compression(String),
    /// A transient step was appended out of sequence.
    OutOfOrderWrite(String),
    /// Ranks of a parallel write disagree on what is being written.
    CollectiveMismatch(String),
    /// Misuse of a container backend, e.g. writing to a missing dataset.
    Container(String),
    Parse(String),
    UnknownFileExtension(Option<String>),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::IO(source) => write!(f, "IO error: {}", source),
            Error::XML(source) => write!(f, "XML error: {}", source),
            Error::Configuration(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::FieldSizeMismatch {
                name,
                expected,
                actual,
            } => write!(
                f,
                "Field \"{}\" has {} tuples but {} were expected",
                name, actual, expected
            ),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Size(msg) => write!(f, "Size error: {}", msg),
            Error::Encoding(msg) => write!(f, "Encoding error: {}", msg),
            Error::Compression(msg) => write!(f, "Compression error: {}", msg),
            Error::OutOfOrderWrite(msg) => write!(f, "Out of order write: {}", msg),
            Error::CollectiveMismatch(msg) => write!(f, "Collective mismatch: {}", msg),
            Error::Container(msg) => write!(f, "Container error: {}", msg),
            Error::Parse(msg) => write!(f, "Parse error: {}", msg),
            Error::UnknownFileExtension(Some(ext)) => {
                write!(f, "Unknown file extension: {:?}", ext)
            }
            Error::UnknownFileExtension(None) => write!(f, "Missing file extension"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(source) => Some(source),
            Error::XML(source) => Some(source),
            _ => None,
        }
    }
}

/// Convert `std::io` error into `gridio` error.
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::IO(e)
    }
}

impl From<quick_xml::Error> for Error {
    fn from(e: quick_xml::Error) -> Error {
        Error::XML(e)
    }
}

impl From<quick_xml::events::attributes::AttrError> for Error {
    fn from(e: quick_xml::events::attributes::AttrError) -> Error {
        Error::XML(quick_xml::Error::InvalidAttr(e))
    }
}

/// Convert `gridio` error into `std::io` error.
impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::IO(e) => e,
            _ => io::Error::new(io::ErrorKind::Other, err.to_string()),
        }
    }
}
