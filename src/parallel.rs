//! Collective writing of distributed grids.
//!
//! Every rank of a [`Communicator`] group owns one piece of the grid. [`ParallelWriter::write`]
//! is a collective call: each rank writes its piece as a serial file and rank 0 additionally
//! writes the parallel wrapper file referencing all pieces.
//!
//! ```no_run
//! use gridio::grid::ImageGrid;
//! use gridio::model::Field;
//! use gridio::parallel::{Communicator, LocalCommunicator, ParallelWriter};
//! use gridio::{GridKind, PieceWriter};
//!
//! let handles: Vec<_> = LocalCommunicator::group(2)
//!     .into_iter()
//!     .map(|comm| {
//!         std::thread::spawn(move || -> Result<(), gridio::Error> {
//!             let rank = comm.rank() as f64;
//!             let grid = ImageGrid::new([4, 4, 0], [4.0 * rank, 0.0, 0.0], [1.0; 3]);
//!             let mut writer = ParallelWriter::new(comm, PieceWriter::new(GridKind::Image(&grid)));
//!             writer.set_cell_field("rank", Field::scalars(vec![rank; 16]))?;
//!             writer.write("out/domain")?;
//!             Ok(())
//!         })
//!     })
//!     .collect();
//! for handle in handles {
//!     handle.join().unwrap()?;
//! }
//! # Ok::<(), gridio::Error>(())
//! ```

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier, Mutex};

use byteorder::{ByteOrder as _, LE};

use crate::model::{Extent, Field};
use crate::options::XmlSettings;
use crate::writer::{self, ArrayDeclaration, GridKind, PieceLayout, PieceWriter};
use crate::xml::{DataType, FileType, XmlElement};
use crate::Error;

/// A group of ranks taking part in collective writes.
///
/// All collective operations block until every rank of the group has called them.
pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self) -> Result<(), Error>;
    /// Sends `bytes` to every rank and returns the contributions of all ranks in rank order.
    fn all_gather(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, Error>;
}

impl<C: Communicator + ?Sized> Communicator for &C {
    fn rank(&self) -> usize {
        (**self).rank()
    }
    fn size(&self) -> usize {
        (**self).size()
    }
    fn barrier(&self) -> Result<(), Error> {
        (**self).barrier()
    }
    fn all_gather(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
        (**self).all_gather(bytes)
    }
}

/// A group consisting of a single rank.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NullCommunicator;

impl Communicator for NullCommunicator {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) -> Result<(), Error> {
        Ok(())
    }
    fn all_gather(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
        Ok(vec![bytes.to_vec()])
    }
}

struct Group {
    barrier: Barrier,
    slots: Mutex<Vec<Vec<u8>>>,
}

/// A rank of an in-process group. Each rank is meant to be driven by its own thread.
#[derive(Clone)]
pub struct LocalCommunicator {
    rank: usize,
    size: usize,
    group: Arc<Group>,
}

impl LocalCommunicator {
    /// Creates a group of `size` ranks, returned in rank order.
    pub fn group(size: usize) -> Vec<LocalCommunicator> {
        let group = Arc::new(Group {
            barrier: Barrier::new(size),
            slots: Mutex::new(vec![Vec::new(); size]),
        });
        (0..size)
            .map(|rank| LocalCommunicator {
                rank,
                size,
                group: Arc::clone(&group),
            })
            .collect()
    }

    fn slots(&self) -> Result<std::sync::MutexGuard<'_, Vec<Vec<u8>>>, Error> {
        self.group
            .slots
            .lock()
            .map_err(|_| Error::InvalidState("a rank of the group panicked".to_string()))
    }
}

impl std::fmt::Debug for LocalCommunicator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("LocalCommunicator")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
    fn barrier(&self) -> Result<(), Error> {
        self.group.barrier.wait();
        Ok(())
    }
    fn all_gather(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, Error> {
        self.slots()?[self.rank] = bytes.to_vec();
        self.group.barrier.wait();
        let gathered = self.slots()?.clone();
        // Nobody may overwrite a slot before every rank has read all of them.
        self.group.barrier.wait();
        Ok(gathered)
    }
}

/// Gathers one list of integers from every rank.
pub(crate) fn gather_u64s<C: Communicator + ?Sized>(
    comm: &C,
    values: &[u64],
) -> Result<Vec<Vec<u64>>, Error> {
    let mut bytes = vec![0u8; values.len() * 8];
    LE::write_u64_into(values, &mut bytes);
    comm.all_gather(&bytes)?
        .into_iter()
        .enumerate()
        .map(|(rank, bytes)| {
            if bytes.len() % 8 != 0 {
                return Err(Error::CollectiveMismatch(format!(
                    "rank {} sent a malformed message of {} bytes",
                    rank,
                    bytes.len()
                )));
            }
            let mut values = vec![0u64; bytes.len() / 8];
            LE::read_u64_into(&bytes, &mut values);
            Ok(values)
        })
        .collect()
}

/// Shares the outcome of a local step and fails on every rank if any rank failed.
///
/// A local failure is returned as is, failures of other ranks are reported as
/// [`Error::CollectiveMismatch`].
pub(crate) fn check_collective<C: Communicator + ?Sized, T>(
    comm: &C,
    step: &str,
    result: Result<T, Error>,
) -> Result<T, Error> {
    let status = comm.all_gather(&[result.is_ok() as u8])?;
    let result = result?;
    match status.iter().position(|s| s.first() != Some(&1)) {
        Some(rank) => Err(Error::CollectiveMismatch(format!(
            "rank {} failed to {}",
            rank, step
        ))),
        None => Ok(result),
    }
}

/// Index offsets of structured pieces given the origins and cell counts of all ranks.
///
/// Along each axis the distinct origins are sorted and every rank is offset by the cells of the
/// pieces lying below it.
pub fn structured_offsets(origins: &[[f64; 3]], extents: &[[usize; 3]]) -> Vec<[i32; 3]> {
    let mut offsets = vec![[0i32; 3]; origins.len()];
    for axis in 0..3 {
        let mut distinct: Vec<(f64, usize)> = Vec::new();
        for (origin, extent) in origins.iter().zip(extents) {
            if !distinct.iter().any(|(o, _)| same_position(*o, origin[axis])) {
                distinct.push((origin[axis], extent[axis]));
            }
        }
        distinct.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (offset, origin) in offsets.iter_mut().zip(origins) {
            offset[axis] = distinct
                .iter()
                .take_while(|(o, _)| *o < origin[axis] && !same_position(*o, origin[axis]))
                .map(|(_, cells)| *cells as i32)
                .sum();
        }
    }
    offsets
}

fn same_position(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-10 * a.abs().max(b.abs()).max(1.0)
}

/// Result of a collective write on one rank.
#[derive(Clone, Debug, PartialEq)]
pub struct ParallelOutput {
    /// The piece written by this rank.
    pub piece: PathBuf,
    /// The wrapper file. It is only written by rank 0.
    pub wrapper: PathBuf,
    /// Extent of the whole grid for structured grids.
    pub whole_extent: Option<Extent>,
    pub number_of_points: usize,
    pub number_of_cells: usize,
}

/// Global information computed from the contributions of all ranks.
struct Decomposition {
    layout: Option<PieceLayout>,
    /// Extent of each rank's piece for structured grids.
    piece_extents: Vec<Extent>,
    number_of_points: usize,
    number_of_cells: usize,
}

/// Writes one piece per rank and the parallel wrapper file.
pub struct ParallelWriter<'a, C> {
    comm: C,
    writer: PieceWriter<'a>,
}

impl<'a, C: Communicator> ParallelWriter<'a, C> {
    pub fn new(comm: C, writer: PieceWriter<'a>) -> Self {
        ParallelWriter { comm, writer }
    }

    pub fn communicator(&self) -> &C {
        &self.comm
    }

    pub fn writer(&self) -> &PieceWriter<'a> {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut PieceWriter<'a> {
        &mut self.writer
    }

    pub fn file_type(&self) -> FileType {
        FileType::parallel(self.writer.grid().data_type())
    }

    pub fn set_point_field(&mut self, name: impl Into<String>, field: Field) -> Result<(), Error> {
        self.writer.set_point_field(name, field)
    }

    pub fn set_cell_field(&mut self, name: impl Into<String>, field: Field) -> Result<(), Error> {
        self.writer.set_cell_field(name, field)
    }

    pub fn set_meta_data(&mut self, name: impl Into<String>, field: Field) -> Result<(), Error> {
        self.writer.set_meta_data(name, field)
    }

    pub fn reset(&mut self) {
        self.writer.reset();
    }

    /// Path of the wrapper file written for `base_path`.
    pub fn wrapper_path(&self, base_path: &Path) -> PathBuf {
        writer::with_extension(base_path, &self.file_type().extension())
    }

    /// Writes this rank's piece and, on rank 0, the wrapper file.
    ///
    /// This is a collective call. If the ranks disagree on the grid kind, the image spacing, the
    /// settings or the declared fields, or if any rank fails to write its piece, every rank returns an error and
    /// no wrapper is written.
    pub fn write(&mut self, base_path: impl AsRef<Path>) -> Result<ParallelOutput, Error> {
        let base_path = base_path.as_ref();
        let rank = self.comm.rank();

        let local = self.writer.validate().and_then(|_| self.writer.options().resolve());
        let settings = check_collective(&self.comm, "validate its piece", local)?;
        self.check_signatures(&settings)?;

        let decomposition = self.decompose()?;
        if let Some(layout) = &decomposition.layout {
            log::debug!("rank {}: whole extent {}", rank, layout.whole_extent);
        }

        let piece_base = piece_base(base_path, rank)?;
        self.writer.set_layout(decomposition.layout.clone());
        let written = self.writer.write(piece_base);
        self.writer.set_layout(None);
        let piece = check_collective(&self.comm, "write its piece", written)
            .map_err(|err| self.reopen(err))?;

        let wrapper = self.wrapper_path(base_path);
        let wrapper_written = if rank == 0 {
            self.write_wrapper(&wrapper, base_path, &settings, &decomposition)
        } else {
            Ok(())
        };
        check_collective(&self.comm, "write the wrapper", wrapper_written)
            .map_err(|err| self.reopen(err))?;
        self.comm.barrier()?;

        Ok(ParallelOutput {
            piece,
            wrapper,
            whole_extent: decomposition.layout.map(|l| l.whole_extent),
            number_of_points: decomposition.number_of_points,
            number_of_cells: decomposition.number_of_cells,
        })
    }

    /// Lets a write that failed on any rank be retried with the same fields.
    fn reopen(&mut self, err: Error) -> Error {
        self.writer.reopen();
        err
    }

    fn signature(&self, settings: &XmlSettings) -> String {
        let describe = |decls: Vec<ArrayDeclaration>| {
            decls
                .iter()
                .map(|d| format!("{}:{}:{}", d.name, d.scalar_type, d.num_components))
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "{}|{:?}|{:?}|{}|{}",
            self.writer.grid().data_type().name(),
            self.writer.grid().spacing(),
            settings,
            describe(self.writer.point_declarations()),
            describe(self.writer.cell_declarations()),
        )
    }

    fn check_signatures(&self, settings: &XmlSettings) -> Result<(), Error> {
        let signature = self.signature(settings);
        let gathered = self.comm.all_gather(signature.as_bytes())?;
        match gathered.iter().position(|s| s.as_slice() != gathered[0].as_slice()) {
            Some(rank) => Err(Error::CollectiveMismatch(format!(
                "rank {} disagrees with rank 0 on the grid kind, spacing, settings or fields:\n  {}\n  {}",
                rank,
                String::from_utf8_lossy(&gathered[0]),
                String::from_utf8_lossy(&gathered[rank]),
            ))),
            None => Ok(()),
        }
    }

    fn decompose(&self) -> Result<Decomposition, Error> {
        let grid = self.writer.grid();
        let (extents, origin) = match (grid.extents(), grid.origin()) {
            (Some(extents), Some(origin)) => (extents, origin),
            _ => {
                let counts = [grid.number_of_points() as u64, grid.number_of_cells() as u64];
                let gathered = gather_u64s(&self.comm, &counts)?;
                let total = |i: usize| {
                    gathered
                        .iter()
                        .map(|counts| counts.get(i).copied().unwrap_or(0))
                        .sum::<u64>()
                };
                return Ok(Decomposition {
                    layout: None,
                    piece_extents: Vec::new(),
                    number_of_points: total(0) as usize,
                    number_of_cells: total(1) as usize,
                });
            }
        };

        let mut message: Vec<u64> = origin.iter().map(|o| o.to_bits()).collect();
        message.extend(extents.iter().map(|&e| e as u64));
        let gathered = gather_u64s(&self.comm, &message)?;
        let mut origins = Vec::with_capacity(gathered.len());
        let mut all_extents = Vec::with_capacity(gathered.len());
        for (rank, values) in gathered.iter().enumerate() {
            if values.len() != 6 {
                return Err(Error::CollectiveMismatch(format!(
                    "rank {} sent {} values instead of an origin and extents",
                    rank,
                    values.len()
                )));
            }
            origins.push([0, 1, 2].map(|i| f64::from_bits(values[i])));
            all_extents.push([3, 4, 5].map(|i| values[i] as usize));
        }

        let offsets = structured_offsets(&origins, &all_extents);
        let piece_extents: Vec<Extent> = all_extents
            .iter()
            .zip(&offsets)
            .map(|(&cells, &offset)| Extent::from_cells(cells).translated(offset))
            .collect();
        let whole_extent = piece_extents
            .iter()
            .skip(1)
            .fold(piece_extents[0].clone(), |acc, e| acc.union(e));
        let global_origin = origins.iter().fold([f64::INFINITY; 3], |acc, o| {
            [0, 1, 2].map(|i| acc[i].min(o[i]))
        });

        Ok(Decomposition {
            layout: Some(PieceLayout {
                offset: offsets[self.comm.rank()],
                whole_extent: whole_extent.clone(),
                origin: global_origin,
            }),
            piece_extents,
            number_of_points: whole_extent.num_points(),
            number_of_cells: whole_extent.num_cells(),
        })
    }

    fn write_wrapper(
        &self,
        path: &Path,
        base_path: &Path,
        settings: &XmlSettings,
        decomposition: &Decomposition,
    ) -> Result<(), Error> {
        let grid = self.writer.grid();
        let file_type = self.file_type();
        let mut root = writer::file_root(file_type, settings);
        let mut element = XmlElement::new(file_type.type_name());
        if let Some(layout) = &decomposition.layout {
            element.set_attribute("WholeExtent", &layout.whole_extent);
        }
        element.set_attribute("GhostLevel", 0);
        if let (GridKind::Image(image), Some(layout)) = (grid, &decomposition.layout) {
            element.set_attribute("Origin", writer::join(&layout.origin));
            element.set_attribute("Spacing", writer::join(&image.spacing()));
        }

        let point_data = element.add_child(XmlElement::new("PPointData"));
        for decl in self.writer.point_declarations() {
            point_data.add_child(declaration(&decl));
        }
        let cell_data = element.add_child(XmlElement::new("PCellData"));
        for decl in self.writer.cell_declarations() {
            cell_data.add_child(declaration(&decl));
        }

        let precision = settings.coordinate_precision;
        match grid.data_type() {
            DataType::ImageData => {}
            DataType::RectilinearGrid => {
                let coordinates = element.add_child(XmlElement::new("PCoordinates"));
                for name in ["X", "Y", "Z"] {
                    coordinates.add_child(declaration(&ArrayDeclaration {
                        name: name.to_string(),
                        scalar_type: precision,
                        num_components: 1,
                    }));
                }
            }
            DataType::StructuredGrid | DataType::UnstructuredGrid => {
                element
                    .add_child(XmlElement::new("PPoints"))
                    .add_child(declaration(&ArrayDeclaration {
                        name: "Coordinates".to_string(),
                        scalar_type: precision,
                        num_components: 3,
                    }));
            }
        }

        let ext = FileType::serial(grid.data_type()).extension();
        for rank in 0..self.comm.size() {
            let source = piece_base(base_path, rank)?;
            let source = writer::with_extension(&source, &ext);
            let file_name = source
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut piece = XmlElement::new("Piece");
            if let Some(extent) = decomposition.piece_extents.get(rank) {
                piece.set_attribute("Extent", extent);
            }
            piece.set_attribute("Source", file_name);
            element.add_child(piece);
        }
        root.add_child(element);

        let mut buf = Vec::new();
        root.render(&mut buf, None, true)?;
        File::create(path)?.write_all(&buf)?;
        log::debug!("wrote {} referencing {} pieces", path.display(), self.comm.size());
        Ok(())
    }
}

fn declaration(decl: &ArrayDeclaration) -> XmlElement {
    XmlElement::new("PDataArray")
        .with_attribute("type", decl.scalar_type.vtk_name())
        .with_attribute("Name", &decl.name)
        .with_attribute("NumberOfComponents", decl.num_components)
}

/// `<base>-<rank>` without an extension.
fn piece_base(base_path: &Path, rank: usize) -> Result<PathBuf, Error> {
    let name = base_path.file_name().ok_or_else(|| {
        Error::Configuration(format!("{} does not name a file", base_path.display()))
    })?;
    let mut name = name.to_owned();
    name.push(format!("-{}", rank));
    Ok(base_path.with_file_name(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn quadrant_offsets() {
        let origins = [[0.0, 0.0, 0.0], [5.0, 0.0, 0.0], [0.0, 5.0, 0.0], [5.0, 5.0, 0.0]];
        let extents = [[5, 5, 0]; 4];
        assert_eq!(
            structured_offsets(&origins, &extents),
            vec![[0, 0, 0], [5, 0, 0], [0, 5, 0], [5, 5, 0]]
        );
    }

    #[test]
    fn offsets_accumulate_uneven_pieces() {
        let origins = [[3.0, 0.0, 0.0], [0.0, 0.0, 0.0], [7.5, 0.0, 0.0]];
        let extents = [[3, 2, 1], [6, 2, 1], [4, 2, 1]];
        assert_eq!(
            structured_offsets(&origins, &extents),
            vec![[6, 0, 0], [0, 0, 0], [9, 0, 0]]
        );
    }

    #[test]
    fn local_all_gather() {
        let handles: Vec<_> = LocalCommunicator::group(3)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let first = gather_u64s(&comm, &[comm.rank() as u64 * 10]).unwrap();
                    let second = gather_u64s(&comm, &[comm.rank() as u64]).unwrap();
                    (first, second)
                })
            })
            .collect();
        for handle in handles {
            let (first, second) = handle.join().unwrap();
            assert_eq!(first, vec![vec![0], vec![10], vec![20]]);
            assert_eq!(second, vec![vec![0], vec![1], vec![2]]);
        }
    }

    #[test]
    fn failures_are_reported_on_all_ranks() {
        let handles: Vec<_> = LocalCommunicator::group(2)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || {
                    let local = if comm.rank() == 1 {
                        Err(Error::Size("too big".to_string()))
                    } else {
                        Ok(())
                    };
                    check_collective(&comm, "test", local)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(matches!(results[0], Err(Error::CollectiveMismatch(_))));
        assert!(matches!(results[1], Err(Error::Size(_))));
    }

    #[test]
    fn piece_names() -> Result<(), Error> {
        assert_eq!(piece_base(Path::new("out/run.1"), 3)?, PathBuf::from("out/run.1-3"));
        assert!(piece_base(Path::new(".."), 0).is_err());
        Ok(())
    }

    #[test]
    fn null_communicator() -> Result<(), Error> {
        let comm = NullCommunicator;
        assert_eq!((comm.rank(), comm.size()), (0, 1));
        assert_eq!(comm.all_gather(b"abc")?, vec![b"abc".to_vec()]);
        comm.barrier()
    }
}
