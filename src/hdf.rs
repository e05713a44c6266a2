//! Writer for the VTK-HDF layout of hierarchical containers.
//!
//! The layout is written through the [`Container`] trait, which models the small subset of a
//! hierarchical data format needed here: groups, attributes and two-dimensional datasets that
//! grow along their first axis. [`MemoryContainer`] keeps everything in memory and
//! [`SharedContainer`] lets several ranks write into the same container.
//!
//! Datasets are stored as `[tuples, components]`. Image data is flattened to one row per point
//! or cell with `x` running fastest.
//!
//! # Examples
//!
//! ```
//! use gridio::grid::{Cell, UnstructuredGrid};
//! use gridio::hdf::{HdfWriter, MemoryContainer, TransientReader};
//! use gridio::model::{CellType, Field};
//! use gridio::GridKind;
//!
//! let grid = UnstructuredGrid::new(
//!     vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
//!     vec![Cell::new(CellType::Triangle, vec![0, 1, 2])],
//! )?;
//! let mut writer = HdfWriter::new(MemoryContainer::new(), GridKind::Unstructured(&grid)).transient();
//! for step in 0..3 {
//!     writer.set_point_field("u", Field::scalars(vec![step as f64; 3]))?;
//!     writer.write_step(step as f64 * 0.5)?;
//! }
//!
//! let container = writer.into_container();
//! let reader = TransientReader::open(&container)?;
//! assert_eq!(reader.times(), &[0.0, 0.5, 1.0]);
//! let step = reader.step(2)?;
//! assert_eq!(step.point_data[0].1.data().cast_into::<f64>(), Some(vec![2.0; 3]));
//! # Ok::<(), gridio::Error>(())
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::grid::{Cell, GridAdaptor, UnstructuredGrid};
use crate::model::{CellType, Extent, Field, FieldShape, IOBuffer, ScalarType};
use crate::parallel::{self, Communicator, NullCommunicator};
use crate::writer::{GridKind, NamedField};
use crate::Error;

/// Root group of the layout.
pub const ROOT: &str = "/VTKHDF";
const STEPS: &str = "/VTKHDF/Steps";
/// Version of the VTK-HDF layout written.
pub const VERSION: [i64; 2] = [2, 0];

/// Value of an attribute.
#[derive(Clone, Debug, PartialEq)]
pub enum Attribute {
    Text(String),
    Values(IOBuffer),
}

/// Type and shape of a dataset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DatasetInfo {
    pub scalar_type: ScalarType,
    pub rows: usize,
    pub columns: usize,
}

/// Storage backend for the layout.
///
/// Paths are absolute and separated by `/`. Datasets have a fixed number of columns and grow
/// along their rows.
pub trait Container {
    /// Creates a group together with all its missing ancestors.
    fn create_group(&mut self, path: &str) -> Result<(), Error>;
    fn has_group(&self, path: &str) -> Result<bool, Error>;
    /// Names of the groups and datasets directly below a group, in lexicographic order.
    fn children(&self, path: &str) -> Result<Vec<String>, Error>;
    fn set_attribute(&mut self, path: &str, name: &str, value: Attribute) -> Result<(), Error>;
    fn attribute(&self, path: &str, name: &str) -> Result<Option<Attribute>, Error>;
    /// Creates an empty dataset in an existing group.
    fn create_dataset(&mut self, path: &str, scalar_type: ScalarType, columns: usize)
        -> Result<(), Error>;
    fn dataset_info(&self, path: &str) -> Result<Option<DatasetInfo>, Error>;
    /// Appends `rows` zero rows and returns the previous number of rows.
    fn extend(&mut self, path: &str, rows: usize) -> Result<usize, Error>;
    /// Overwrites rows starting at `row`. The length of `data` must be a multiple of the columns.
    fn write_slice(&mut self, path: &str, row: usize, data: &IOBuffer) -> Result<(), Error>;
    fn read_slice(&self, path: &str, rows: Range<usize>) -> Result<IOBuffer, Error>;
}

#[derive(Clone, Debug, PartialEq)]
struct Dataset {
    data: IOBuffer,
    columns: usize,
}

impl Dataset {
    fn rows(&self) -> usize {
        self.data.len() / self.columns
    }
}

/// A container held in memory.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryContainer {
    groups: BTreeSet<String>,
    attributes: BTreeMap<(String, String), Attribute>,
    datasets: BTreeMap<String, Dataset>,
}

impl MemoryContainer {
    pub fn new() -> Self {
        let mut groups = BTreeSet::new();
        groups.insert("/".to_string());
        MemoryContainer {
            groups,
            attributes: BTreeMap::new(),
            datasets: BTreeMap::new(),
        }
    }

    /// Paths of all datasets in lexicographic order.
    pub fn dataset_paths(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    fn dataset(&self, path: &str) -> Result<&Dataset, Error> {
        self.datasets
            .get(path)
            .ok_or_else(|| Error::Container(format!("no dataset at {}", path)))
    }

    fn dataset_mut(&mut self, path: &str) -> Result<&mut Dataset, Error> {
        self.datasets
            .get_mut(path)
            .ok_or_else(|| Error::Container(format!("no dataset at {}", path)))
    }
}

impl Default for MemoryContainer {
    fn default() -> Self {
        MemoryContainer::new()
    }
}

fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

impl Container for MemoryContainer {
    fn create_group(&mut self, path: &str) -> Result<(), Error> {
        if !path.starts_with('/') {
            return Err(Error::Container(format!("{} is not an absolute path", path)));
        }
        if self.datasets.contains_key(path) {
            return Err(Error::Container(format!("{} is a dataset", path)));
        }
        let mut current = path;
        while current != "/" {
            self.groups.insert(current.to_string());
            current = parent(current);
        }
        self.groups.insert("/".to_string());
        Ok(())
    }

    fn has_group(&self, path: &str) -> Result<bool, Error> {
        Ok(self.groups.contains(path))
    }

    fn children(&self, path: &str) -> Result<Vec<String>, Error> {
        if !self.groups.contains(path) {
            return Err(Error::Container(format!("no group at {}", path)));
        }
        let mut names: Vec<String> = self
            .groups
            .iter()
            .chain(self.datasets.keys())
            .filter(|p| p.as_str() != "/" && parent(p) == path)
            .filter_map(|p| p.rsplit('/').next().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    fn set_attribute(&mut self, path: &str, name: &str, value: Attribute) -> Result<(), Error> {
        if !self.groups.contains(path) && !self.datasets.contains_key(path) {
            return Err(Error::Container(format!("no group or dataset at {}", path)));
        }
        self.attributes
            .insert((path.to_string(), name.to_string()), value);
        Ok(())
    }

    fn attribute(&self, path: &str, name: &str) -> Result<Option<Attribute>, Error> {
        Ok(self
            .attributes
            .get(&(path.to_string(), name.to_string()))
            .cloned())
    }

    fn create_dataset(
        &mut self,
        path: &str,
        scalar_type: ScalarType,
        columns: usize,
    ) -> Result<(), Error> {
        if columns == 0 {
            return Err(Error::Container(format!("dataset {} needs columns", path)));
        }
        if !self.groups.contains(parent(path)) {
            return Err(Error::Container(format!(
                "cannot create {} in missing group {}",
                path,
                parent(path)
            )));
        }
        if self.datasets.contains_key(path) || self.groups.contains(path) {
            return Err(Error::Container(format!("{} already exists", path)));
        }
        self.datasets.insert(
            path.to_string(),
            Dataset {
                data: IOBuffer::empty(scalar_type),
                columns,
            },
        );
        Ok(())
    }

    fn dataset_info(&self, path: &str) -> Result<Option<DatasetInfo>, Error> {
        Ok(self.datasets.get(path).map(|d| DatasetInfo {
            scalar_type: d.data.scalar_type(),
            rows: d.rows(),
            columns: d.columns,
        }))
    }

    fn extend(&mut self, path: &str, rows: usize) -> Result<usize, Error> {
        let dataset = self.dataset_mut(path)?;
        let previous = dataset.rows();
        let zeros = IOBuffer::zeros(dataset.data.scalar_type(), rows * dataset.columns);
        dataset.data.extend_from(&zeros)?;
        Ok(previous)
    }

    fn write_slice(&mut self, path: &str, row: usize, data: &IOBuffer) -> Result<(), Error> {
        let dataset = self.dataset_mut(path)?;
        if data.len() % dataset.columns != 0 {
            return Err(Error::Container(format!(
                "{} values do not fill rows of {} columns in {}",
                data.len(),
                dataset.columns,
                path
            )));
        }
        if data.scalar_type() != dataset.data.scalar_type() {
            return Err(Error::Container(format!(
                "cannot write {} values into the {} dataset {}",
                data.scalar_type(),
                dataset.data.scalar_type(),
                path
            )));
        }
        let columns = dataset.columns;
        dataset
            .data
            .write_at(row * columns, data)
            .map_err(|e| Error::Container(format!("{}: {}", path, e)))
    }

    fn read_slice(&self, path: &str, rows: Range<usize>) -> Result<IOBuffer, Error> {
        let dataset = self.dataset(path)?;
        if rows.start > rows.end || rows.end > dataset.rows() {
            return Err(Error::Container(format!(
                "rows {:?} are out of bounds for {} with {} rows",
                rows,
                path,
                dataset.rows()
            )));
        }
        let columns = dataset.columns;
        Ok(dataset.data.slice(rows.start * columns..rows.end * columns))
    }
}

/// A [`MemoryContainer`] shared by several ranks.
///
/// Clones refer to the same container. Every operation locks it for its duration.
#[derive(Clone, Debug, Default)]
pub struct SharedContainer(Arc<Mutex<MemoryContainer>>);

impl SharedContainer {
    pub fn new(container: MemoryContainer) -> Self {
        SharedContainer(Arc::new(Mutex::new(container)))
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, MemoryContainer>, Error> {
        self.0
            .lock()
            .map_err(|_| Error::Container("a writer of the shared container panicked".to_string()))
    }

    /// A copy of the current contents.
    pub fn snapshot(&self) -> Result<MemoryContainer, Error> {
        Ok(self.lock()?.clone())
    }
}

impl Container for SharedContainer {
    fn create_group(&mut self, path: &str) -> Result<(), Error> {
        self.lock()?.create_group(path)
    }
    fn has_group(&self, path: &str) -> Result<bool, Error> {
        self.lock()?.has_group(path)
    }
    fn children(&self, path: &str) -> Result<Vec<String>, Error> {
        self.lock()?.children(path)
    }
    fn set_attribute(&mut self, path: &str, name: &str, value: Attribute) -> Result<(), Error> {
        self.lock()?.set_attribute(path, name, value)
    }
    fn attribute(&self, path: &str, name: &str) -> Result<Option<Attribute>, Error> {
        self.lock()?.attribute(path, name)
    }
    fn create_dataset(
        &mut self,
        path: &str,
        scalar_type: ScalarType,
        columns: usize,
    ) -> Result<(), Error> {
        self.lock()?.create_dataset(path, scalar_type, columns)
    }
    fn dataset_info(&self, path: &str) -> Result<Option<DatasetInfo>, Error> {
        self.lock()?.dataset_info(path)
    }
    fn extend(&mut self, path: &str, rows: usize) -> Result<usize, Error> {
        self.lock()?.extend(path, rows)
    }
    fn write_slice(&mut self, path: &str, row: usize, data: &IOBuffer) -> Result<(), Error> {
        self.lock()?.write_slice(path, row, data)
    }
    fn read_slice(&self, path: &str, rows: Range<usize>) -> Result<IOBuffer, Error> {
        self.lock()?.read_slice(path, rows)
    }
}

/// Counts contributed by one rank to a step.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct PartCounts {
    points: u64,
    cells: u64,
    connectivity: u64,
}

/// Row offsets of one rank's part in the growing datasets.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
struct PartPlacement {
    part: u64,
    points: u64,
    cells: u64,
    connectivity: u64,
}

/// Writes grids and their fields into the VTK-HDF layout.
///
/// Without [`transient`](HdfWriter::transient) mode a single snapshot is written with
/// [`write`](HdfWriter::write). In transient mode every call to
/// [`write_step`](HdfWriter::write_step) appends a time step.
pub struct HdfWriter<'a, K, C = NullCommunicator> {
    container: K,
    comm: C,
    grid: GridKind<'a>,
    point_fields: Vec<NamedField>,
    cell_fields: Vec<NamedField>,
    field_data: Vec<NamedField>,
    transient: bool,
    steps: u64,
    last_time: Option<f64>,
}

impl<'a, K: Container> HdfWriter<'a, K> {
    pub fn new(container: K, grid: GridKind<'a>) -> Self {
        HdfWriter::with_communicator(container, NullCommunicator, grid)
    }
}

impl<'a, K: Container, C: Communicator> HdfWriter<'a, K, C> {
    /// Creates a writer for one rank of a group. Each rank contributes one part per step.
    pub fn with_communicator(container: K, comm: C, grid: GridKind<'a>) -> Self {
        HdfWriter {
            container,
            comm,
            grid,
            point_fields: Vec::new(),
            cell_fields: Vec::new(),
            field_data: Vec::new(),
            transient: false,
            steps: 0,
            last_time: None,
        }
    }

    /// Enables transient mode.
    pub fn transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn container(&self) -> &K {
        &self.container
    }

    pub fn into_container(self) -> K {
        self.container
    }

    /// Number of steps written so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn set_point_field(&mut self, name: impl Into<String>, field: Field) -> Result<(), Error> {
        set_field(&mut self.point_fields, name.into(), field);
        Ok(())
    }

    pub fn set_cell_field(&mut self, name: impl Into<String>, field: Field) -> Result<(), Error> {
        set_field(&mut self.cell_fields, name.into(), field);
        Ok(())
    }

    /// Attaches a field stored under `FieldData`. Only rank 0 writes field data.
    pub fn set_field_data(&mut self, name: impl Into<String>, field: Field) -> Result<(), Error> {
        set_field(&mut self.field_data, name.into(), field);
        Ok(())
    }

    /// Writes the static layout. Fails if anything was written already.
    pub fn write(&mut self) -> Result<(), Error> {
        if self.transient {
            return Err(Error::InvalidState(
                "transient writers append with write_step".to_string(),
            ));
        }
        if self.steps > 0 {
            return Err(Error::InvalidState(
                "the static layout was already written".to_string(),
            ));
        }
        self.append(None)
    }

    /// Appends a time step. Times must be strictly increasing.
    pub fn write_step(&mut self, time: f64) -> Result<(), Error> {
        if !self.transient {
            return Err(Error::InvalidState(
                "write_step requires a transient writer".to_string(),
            ));
        }
        if let Some(last) = self.last_time {
            // Negated so that NaN is rejected as well.
            if !(time > last) {
                return Err(Error::OutOfOrderWrite(format!(
                    "step time {} does not follow the previous time {}",
                    time, last
                )));
            }
        }
        self.append(Some(time))
    }

    fn append(&mut self, time: Option<f64>) -> Result<(), Error> {
        let local = self.validate().and_then(|_| self.part_counts());
        let counts = parallel::check_collective(&self.comm, "validate its part", local)?;
        if let Some(steps) = self.stored_steps()? {
            if steps != self.steps {
                return Err(Error::OutOfOrderWrite(format!(
                    "the container holds {} steps but the writer wrote {}",
                    steps, self.steps
                )));
            }
        }

        let gathered = parallel::gather_u64s(
            &self.comm,
            &[counts.points, counts.cells, counts.connectivity],
        )?;
        let all: Vec<PartCounts> = gathered
            .iter()
            .map(|c| PartCounts {
                points: c.first().copied().unwrap_or(0),
                cells: c.get(1).copied().unwrap_or(0),
                connectivity: c.get(2).copied().unwrap_or(0),
            })
            .collect();
        let rank = self.comm.rank();

        // Rank 0 shapes the datasets, then every rank fills its rows.
        let prepared = if rank == 0 {
            self.prepare(&all)
        } else {
            Ok(PartPlacement::default())
        };
        let base = parallel::check_collective(&self.comm, "prepare the layout", prepared)?;
        let base = self.broadcast_placement(base)?;
        let placement = exclusive_prefix(&all, rank, base);
        let filled = self.write_part(&placement, &all[rank]);
        parallel::check_collective(&self.comm, "write its part", filled)?;

        let recorded = match time {
            Some(time) if rank == 0 => self.record_step(time, &all, &base),
            _ => Ok(()),
        };
        parallel::check_collective(&self.comm, "record the step", recorded)?;

        self.steps += 1;
        self.last_time = time;
        log::debug!(
            "rank {}: wrote {} of {} parts",
            rank,
            match time {
                Some(t) => format!("step {} at time {}", self.steps - 1, t),
                None => "static layout".to_string(),
            },
            all.len()
        );
        Ok(())
    }

    fn validate(&self) -> Result<(), Error> {
        if !matches!(self.grid, GridKind::Image(_) | GridKind::Unstructured(_)) {
            return Err(Error::Configuration(format!(
                "{} grids are not supported by the VTK-HDF layout",
                self.grid.data_type().name()
            )));
        }
        if matches!(self.grid, GridKind::Image(_)) && self.comm.size() > 1 {
            return Err(Error::Configuration(
                "image data is written by a single rank".to_string(),
            ));
        }
        let checks = [
            (&self.point_fields, self.grid.number_of_points()),
            (&self.cell_fields, self.grid.number_of_cells()),
        ];
        for (fields, expected) in checks {
            for (name, field) in fields.iter() {
                if field.num_tuples() != expected {
                    return Err(Error::FieldSizeMismatch {
                        name: name.clone(),
                        expected,
                        actual: field.num_tuples(),
                    });
                }
            }
        }
        Ok(())
    }

    fn part_counts(&self) -> Result<PartCounts, Error> {
        let connectivity = match self.grid {
            GridKind::Unstructured(g) => g.cells().map(|c| g.cell_points(c).len() as u64).sum(),
            _ => 0,
        };
        Ok(PartCounts {
            points: self.grid.number_of_points() as u64,
            cells: self.grid.number_of_cells() as u64,
            connectivity,
        })
    }

    fn stored_steps(&self) -> Result<Option<u64>, Error> {
        match self.container.attribute(STEPS, "NSteps")? {
            Some(Attribute::Values(values)) => Ok(values
                .cast_into::<u64>()
                .and_then(|v| v.first().copied())),
            Some(Attribute::Text(_)) => Err(Error::Container(
                "NSteps attribute is not numeric".to_string(),
            )),
            None => Ok(None),
        }
    }

    /// Creates or extends the datasets on rank 0 and returns the rows before extension.
    fn prepare(&mut self, all: &[PartCounts]) -> Result<PartPlacement, Error> {
        let first = self.steps == 0;
        let total = all.iter().fold(PartCounts::default(), |acc, c| PartCounts {
            points: acc.points + c.points,
            cells: acc.cells + c.cells,
            connectivity: acc.connectivity + c.connectivity,
        });
        let parts = all.len() as u64;

        if first {
            self.container.create_group(ROOT)?;
            self.container.set_attribute(
                ROOT,
                "Version",
                Attribute::Values(IOBuffer::I64(VERSION.to_vec())),
            )?;
            self.container.set_attribute(
                ROOT,
                "Type",
                Attribute::Text(self.grid.data_type().name().to_string()),
            )?;
            for group in ["PointData", "CellData", "FieldData"] {
                self.container.create_group(&format!("{}/{}", ROOT, group))?;
            }
        }

        let field_groups = [
            ("PointData", &self.point_fields, total.points),
            ("CellData", &self.cell_fields, total.cells),
        ];
        let mut grown = Vec::new();
        for (group, fields, rows) in field_groups {
            for (name, field) in fields {
                grown.push((
                    format!("{}/{}/{}", ROOT, group, name),
                    field.scalar_type(),
                    field.num_components(),
                    rows,
                ));
            }
        }
        for (name, field) in &self.field_data {
            grown.push((
                format!("{}/FieldData/{}", ROOT, name),
                field.scalar_type(),
                field.num_components(),
                field.num_tuples() as u64,
            ));
        }
        // Nothing is extended unless every dataset of the step can grow.
        if !first {
            for (path, scalar_type, columns, _) in &grown {
                match self.container.dataset_info(path)? {
                    Some(info) if info.scalar_type == *scalar_type && info.columns == *columns => {}
                    _ => {
                        return Err(Error::Container(format!(
                            "{} does not match the datasets of earlier steps",
                            path
                        )))
                    }
                }
            }
            for group in ["PointData", "CellData", "FieldData"] {
                let group = format!("{}/{}", ROOT, group);
                for name in self.container.children(&group)? {
                    let path = format!("{}/{}", group, name);
                    if !grown.iter().any(|(p, ..)| *p == path) {
                        return Err(Error::Container(format!(
                            "{} was written in earlier steps but is missing now",
                            path
                        )));
                    }
                }
            }
        }

        let mut base = PartPlacement::default();
        match self.grid {
            GridKind::Image(image) => {
                if first {
                    let extent = Extent::from_cells(image.extents());
                    let whole: Vec<i64> = extent
                        .0
                        .iter()
                        .flat_map(|r| [*r.start() as i64, *r.end() as i64])
                        .collect();
                    let attributes = [
                        ("WholeExtent", IOBuffer::I64(whole)),
                        ("Origin", IOBuffer::F64(image.origin().to_vec())),
                        ("Spacing", IOBuffer::F64(image.spacing().to_vec())),
                        (
                            "Direction",
                            IOBuffer::F64(vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]),
                        ),
                    ];
                    for (name, values) in attributes {
                        self.container
                            .set_attribute(ROOT, name, Attribute::Values(values))?;
                    }
                }
                base.points = self.steps * total.points;
                base.cells = self.steps * total.cells;
            }
            GridKind::Unstructured(_) => {
                let layout: [(&str, ScalarType, usize, u64); 7] = [
                    ("NumberOfPoints", ScalarType::I64, 1, parts),
                    ("NumberOfCells", ScalarType::I64, 1, parts),
                    ("NumberOfConnectivityIds", ScalarType::I64, 1, parts),
                    ("Points", ScalarType::F64, 3, total.points),
                    ("Connectivity", ScalarType::I64, 1, total.connectivity),
                    ("Offsets", ScalarType::I64, 1, total.cells + parts),
                    ("Types", ScalarType::U8, 1, total.cells),
                ];
                for (name, scalar_type, columns, rows) in layout {
                    let path = format!("{}/{}", ROOT, name);
                    let previous = self.grow(&path, scalar_type, columns, rows, first)?;
                    match name {
                        "NumberOfPoints" => base.part = previous,
                        "Points" => base.points = previous,
                        "Connectivity" => base.connectivity = previous,
                        "Types" => base.cells = previous,
                        _ => {}
                    }
                }
            }
            _ => {}
        }

        for (path, scalar_type, columns, rows) in grown {
            self.grow(&path, scalar_type, columns, rows, first)?;
        }
        Ok(base)
    }

    /// Extends a dataset by `rows`, creating it during the first write.
    fn grow(
        &mut self,
        path: &str,
        scalar_type: ScalarType,
        columns: usize,
        rows: u64,
        may_create: bool,
    ) -> Result<u64, Error> {
        match self.container.dataset_info(path)? {
            Some(info) if info.scalar_type != scalar_type || info.columns != columns => {
                return Err(Error::Container(format!(
                    "{} holds {} values with {} columns, not {} with {}",
                    path, info.scalar_type, info.columns, scalar_type, columns
                )));
            }
            Some(_) => {}
            None if may_create => self.container.create_dataset(path, scalar_type, columns)?,
            None => {
                return Err(Error::Container(format!(
                    "{} was not written in earlier steps",
                    path
                )))
            }
        }
        Ok(self.container.extend(path, rows as usize)? as u64)
    }

    fn broadcast_placement(&self, base: PartPlacement) -> Result<PartPlacement, Error> {
        let gathered = parallel::gather_u64s(
            &self.comm,
            &[base.part, base.points, base.cells, base.connectivity],
        )?;
        let root = gathered
            .first()
            .filter(|v| v.len() == 4)
            .ok_or_else(|| Error::CollectiveMismatch("rank 0 sent no placement".to_string()))?;
        Ok(PartPlacement {
            part: root[0],
            points: root[1],
            cells: root[2],
            connectivity: root[3],
        })
    }

    fn write_part(&mut self, at: &PartPlacement, counts: &PartCounts) -> Result<(), Error> {
        if let GridKind::Unstructured(g) = self.grid {
            let part = at.part as usize;
            let mut connectivity = Vec::with_capacity(counts.connectivity as usize);
            let mut offsets = Vec::with_capacity(g.number_of_cells() + 1);
            let mut types = Vec::with_capacity(g.number_of_cells());
            offsets.push(0i64);
            for cell in g.cells() {
                connectivity.extend(g.cell_points(cell).into_iter().map(|p| p as i64));
                offsets.push(connectivity.len() as i64);
                types.push(g.cell_type(cell).vtk_id());
            }
            let points: Vec<f64> = g.points().flat_map(|p| g.point_coordinates(p)).collect();
            let slices = [
                ("NumberOfPoints", part, IOBuffer::I64(vec![counts.points as i64])),
                ("NumberOfCells", part, IOBuffer::I64(vec![counts.cells as i64])),
                (
                    "NumberOfConnectivityIds",
                    part,
                    IOBuffer::I64(vec![counts.connectivity as i64]),
                ),
                ("Points", at.points as usize, IOBuffer::F64(points)),
                (
                    "Connectivity",
                    at.connectivity as usize,
                    IOBuffer::I64(connectivity),
                ),
                ("Offsets", (at.cells + at.part) as usize, IOBuffer::I64(offsets)),
                ("Types", at.cells as usize, IOBuffer::U8(types)),
            ];
            for (name, row, data) in slices {
                self.container
                    .write_slice(&format!("{}/{}", ROOT, name), row, &data)?;
            }
        }

        for (group, fields, row) in [
            ("PointData", &self.point_fields, at.points),
            ("CellData", &self.cell_fields, at.cells),
        ] {
            for (name, field) in fields {
                let path = format!("{}/{}/{}", ROOT, group, name);
                log::trace!("writing {} tuples of {} at row {}", field.num_tuples(), path, row);
                self.container
                    .write_slice(&path, row as usize, field.data())?;
            }
        }
        if self.comm.rank() == 0 {
            for (name, field) in &self.field_data {
                let path = format!("{}/FieldData/{}", ROOT, name);
                let rows = field.num_tuples();
                let info = self.container.dataset_info(&path)?;
                let row = info.map_or(0, |i| i.rows - rows);
                self.container.write_slice(&path, row, field.data())?;
            }
        }
        Ok(())
    }

    /// Appends the offsets of the new step to the `Steps` group.
    fn record_step(&mut self, time: f64, all: &[PartCounts], base: &PartPlacement) -> Result<(), Error> {
        let first = self.steps == 0;
        if first {
            self.container.create_group(STEPS)?;
            self.container.create_group(&format!("{}/PointDataOffsets", STEPS))?;
            self.container.create_group(&format!("{}/CellDataOffsets", STEPS))?;
            self.container.create_group(&format!("{}/FieldDataOffsets", STEPS))?;
        }
        let parts = all.len() as i64;
        let mut entries = vec![
            ("Values".to_string(), IOBuffer::F64(vec![time])),
            ("PartOffsets".to_string(), IOBuffer::I64(vec![base.part as i64])),
            ("NumberOfParts".to_string(), IOBuffer::I64(vec![parts])),
            ("PointOffsets".to_string(), IOBuffer::I64(vec![base.points as i64])),
            ("CellOffsets".to_string(), IOBuffer::I64(vec![base.cells as i64])),
            (
                "ConnectivityIdOffsets".to_string(),
                IOBuffer::I64(vec![base.connectivity as i64]),
            ),
        ];
        for (name, _) in &self.point_fields {
            entries.push((
                format!("PointDataOffsets/{}", name),
                IOBuffer::I64(vec![base.points as i64]),
            ));
        }
        for (name, _) in &self.cell_fields {
            entries.push((
                format!("CellDataOffsets/{}", name),
                IOBuffer::I64(vec![base.cells as i64]),
            ));
        }
        for (name, field) in &self.field_data {
            let path = format!("{}/FieldData/{}", ROOT, name);
            let rows = self.container.dataset_info(&path)?.map_or(0, |i| i.rows);
            entries.push((
                format!("FieldDataOffsets/{}", name),
                IOBuffer::I64(vec![(rows - field.num_tuples()) as i64]),
            ));
        }

        for (name, value) in entries {
            let path = format!("{}/{}", STEPS, name);
            let row = self.grow(&path, value.scalar_type(), 1, 1, first)?;
            self.container.write_slice(&path, row as usize, &value)?;
        }
        self.container.set_attribute(
            STEPS,
            "NSteps",
            Attribute::Values(IOBuffer::I64(vec![self.steps as i64 + 1])),
        )
    }
}

fn set_field(fields: &mut Vec<NamedField>, name: String, field: Field) {
    match fields.iter_mut().find(|(n, _)| *n == name) {
        Some(entry) => entry.1 = field,
        None => fields.push((name, field)),
    }
}

/// Placement of `rank`'s part given the rows that existed before the step.
fn exclusive_prefix(all: &[PartCounts], rank: usize, base: PartPlacement) -> PartPlacement {
    all[..rank].iter().fold(
        PartPlacement {
            part: base.part + rank as u64,
            ..base
        },
        |acc, c| PartPlacement {
            points: acc.points + c.points,
            cells: acc.cells + c.cells,
            connectivity: acc.connectivity + c.connectivity,
            ..acc
        },
    )
}

/// One step read back from a container.
#[derive(Clone, Debug, PartialEq)]
pub struct HdfStep {
    pub time: f64,
    /// The merged parts of unstructured grids.
    pub grid: Option<UnstructuredGrid>,
    pub point_data: Vec<(String, Field)>,
    pub cell_data: Vec<(String, Field)>,
}

/// Random access to the steps stored in a container.
///
/// Containers without a `Steps` group are read as a single step at time zero.
pub struct TransientReader<'c, K: ?Sized> {
    container: &'c K,
    times: Vec<f64>,
    transient: bool,
    data_type: String,
}

impl<'c, K: Container + ?Sized> TransientReader<'c, K> {
    pub fn open(container: &'c K) -> Result<Self, Error> {
        let data_type = match container.attribute(ROOT, "Type")? {
            Some(Attribute::Text(t)) => t,
            _ => {
                return Err(Error::Parse(format!(
                    "{} has no Type attribute",
                    ROOT
                )))
            }
        };
        let transient = container.has_group(STEPS)?;
        let times = if transient {
            let rows = container
                .dataset_info(&format!("{}/Values", STEPS))?
                .map_or(0, |i| i.rows);
            container
                .read_slice(&format!("{}/Values", STEPS), 0..rows)?
                .cast_into::<f64>()
                .unwrap_or_default()
        } else {
            vec![0.0]
        };
        Ok(TransientReader {
            container,
            times,
            transient,
            data_type,
        })
    }

    pub fn number_of_steps(&self) -> usize {
        self.times.len()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Value stored for step `n` in `Steps/<name>`, zero for static layouts.
    fn step_value(&self, name: &str, n: usize) -> Result<usize, Error> {
        if !self.transient {
            return Ok(0);
        }
        read_index(self.container, &format!("{}/{}", STEPS, name), n)
    }

    pub fn step(&self, n: usize) -> Result<HdfStep, Error> {
        let time = *self.times.get(n).ok_or_else(|| {
            Error::InvalidState(format!(
                "step {} requested from a container with {} steps",
                n,
                self.times.len()
            ))
        })?;

        let (grid, points, cells) = match self.data_type.as_str() {
            "UnstructuredGrid" => {
                let grid = self.read_unstructured(n)?;
                let counts = (grid.number_of_points(), grid.number_of_cells());
                (Some(grid), counts.0, counts.1)
            }
            "ImageData" => {
                let whole = match self.container.attribute(ROOT, "WholeExtent")? {
                    Some(Attribute::Values(v)) => v.cast_into::<i32>().unwrap_or_default(),
                    _ => Vec::new(),
                };
                let extent = match whole.as_slice() {
                    &[x0, x1, y0, y1, z0, z1] => Extent([x0..=x1, y0..=y1, z0..=z1]),
                    _ => return Err(Error::Parse("invalid WholeExtent".to_string())),
                };
                (None, extent.num_points(), extent.num_cells())
            }
            other => {
                return Err(Error::Parse(format!("unsupported VTK-HDF type {}", other)));
            }
        };

        Ok(HdfStep {
            time,
            grid,
            point_data: self.read_fields("PointData", "PointDataOffsets", n, points)?,
            cell_data: self.read_fields("CellData", "CellDataOffsets", n, cells)?,
        })
    }

    fn read_unstructured(&self, n: usize) -> Result<UnstructuredGrid, Error> {
        let first_part = self.step_value("PartOffsets", n)?;
        let parts = if self.transient {
            self.step_value("NumberOfParts", n)?
        } else {
            self.container
                .dataset_info(&format!("{}/NumberOfPoints", ROOT))?
                .map_or(0, |i| i.rows)
        };
        let mut point_row = self.step_value("PointOffsets", n)?;
        let mut cell_row = self.step_value("CellOffsets", n)?;
        let mut connectivity_row = self.step_value("ConnectivityIdOffsets", n)?;

        let mut points = Vec::new();
        let mut cells = Vec::new();
        for part in first_part..first_part + parts {
            let num_points = read_index(self.container, &format!("{}/NumberOfPoints", ROOT), part)?;
            let num_cells = read_index(self.container, &format!("{}/NumberOfCells", ROOT), part)?;
            let num_ids =
                read_index(self.container, &format!("{}/NumberOfConnectivityIds", ROOT), part)?;

            let coords = read_values::<f64, _>(
                self.container,
                &format!("{}/Points", ROOT),
                point_row..point_row + num_points,
            )?;
            let first_point = points.len();
            points.extend(coords.chunks_exact(3).map(|c| [c[0], c[1], c[2]]));

            let connectivity = read_values::<usize, _>(
                self.container,
                &format!("{}/Connectivity", ROOT),
                connectivity_row..connectivity_row + num_ids,
            )?;
            let offset_row = cell_row + part;
            let offsets = read_values::<usize, _>(
                self.container,
                &format!("{}/Offsets", ROOT),
                offset_row..offset_row + num_cells + 1,
            )?;
            let types = read_values::<u8, _>(
                self.container,
                &format!("{}/Types", ROOT),
                cell_row..cell_row + num_cells,
            )?;
            for (window, id) in offsets.windows(2).zip(types) {
                let cell_type = CellType::from_vtk_id(id)
                    .ok_or_else(|| Error::Parse(format!("unknown cell type {}", id)))?;
                let ids = connectivity.get(window[0]..window[1]).ok_or_else(|| {
                    Error::Parse(format!("cell offsets {:?} exceed the connectivity", window))
                })?;
                cells.push(Cell::new(
                    cell_type,
                    ids.iter().map(|&p| p + first_point).collect(),
                ));
            }
            point_row += num_points;
            cell_row += num_cells;
            connectivity_row += num_ids;
        }
        UnstructuredGrid::new(points, cells)
    }

    fn read_fields(
        &self,
        group: &str,
        offsets_group: &str,
        n: usize,
        tuples: usize,
    ) -> Result<Vec<(String, Field)>, Error> {
        let group = format!("{}/{}", ROOT, group);
        let names = self.field_names(&group)?;
        let mut fields = Vec::with_capacity(names.len());
        for name in names {
            let path = format!("{}/{}", group, name);
            let info = self
                .container
                .dataset_info(&path)?
                .ok_or_else(|| Error::Container(format!("no dataset at {}", path)))?;
            let row = self.step_value(&format!("{}/{}", offsets_group, name), n)?;
            let data = self.container.read_slice(&path, row..row + tuples)?;
            let shape = match info.columns {
                1 => FieldShape::Scalar,
                c => FieldShape::Vector(c),
            };
            fields.push((name, Field::new(data, shape)?));
        }
        Ok(fields)
    }

    /// Names of the datasets in a group.
    fn field_names(&self, group: &str) -> Result<Vec<String>, Error> {
        if !self.container.has_group(group)? {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for name in self.container.children(group)? {
            if self
                .container
                .dataset_info(&format!("{}/{}", group, name))?
                .is_some()
            {
                names.push(name);
            }
        }
        Ok(names)
    }
}

fn read_values<T: num_traits::NumCast, K: Container + ?Sized>(
    container: &K,
    path: &str,
    rows: Range<usize>,
) -> Result<Vec<T>, Error> {
    container
        .read_slice(path, rows)?
        .cast_into::<T>()
        .ok_or_else(|| Error::Parse(format!("{} holds values out of range", path)))
}

fn read_index<K: Container + ?Sized>(container: &K, path: &str, row: usize) -> Result<usize, Error> {
    read_values::<usize, _>(container, path, row..row + 1)?
        .first()
        .copied()
        .ok_or_else(|| Error::Parse(format!("{} has no row {}", path, row)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datasets_grow_along_rows() -> Result<(), Error> {
        let mut c = MemoryContainer::new();
        c.create_group("/a/b")?;
        assert!(c.has_group("/a")?);
        c.create_dataset("/a/b/x", ScalarType::F32, 2)?;
        assert_eq!(c.extend("/a/b/x", 2)?, 0);
        assert_eq!(c.extend("/a/b/x", 1)?, 2);
        c.write_slice("/a/b/x", 1, &IOBuffer::F32(vec![1.0, 2.0, 3.0, 4.0]))?;
        assert_eq!(
            c.read_slice("/a/b/x", 0..3)?,
            IOBuffer::F32(vec![0.0, 0.0, 1.0, 2.0, 3.0, 4.0])
        );
        assert_eq!(
            c.dataset_info("/a/b/x")?,
            Some(DatasetInfo {
                scalar_type: ScalarType::F32,
                rows: 3,
                columns: 2
            })
        );
        assert_eq!(c.children("/a")?, vec!["b".to_string()]);
        assert_eq!(c.children("/a/b")?, vec!["x".to_string()]);
        Ok(())
    }

    #[test]
    fn container_misuse() -> Result<(), Error> {
        let mut c = MemoryContainer::new();
        assert!(matches!(
            c.create_dataset("/missing/x", ScalarType::U8, 1),
            Err(Error::Container(_))
        ));
        c.create_dataset("/x", ScalarType::U8, 1)?;
        c.extend("/x", 2)?;
        assert!(matches!(
            c.write_slice("/x", 1, &IOBuffer::U8(vec![1, 2])),
            Err(Error::Container(_))
        ));
        assert!(matches!(
            c.write_slice("/x", 0, &IOBuffer::I8(vec![1])),
            Err(Error::Container(_))
        ));
        assert!(matches!(c.read_slice("/x", 1..3), Err(Error::Container(_))));
        Ok(())
    }

    #[test]
    fn prefix_placement() {
        let all = [
            PartCounts { points: 4, cells: 2, connectivity: 6 },
            PartCounts { points: 3, cells: 1, connectivity: 3 },
            PartCounts { points: 5, cells: 2, connectivity: 8 },
        ];
        let base = PartPlacement { part: 3, points: 10, cells: 5, connectivity: 20 };
        assert_eq!(exclusive_prefix(&all, 0, base), PartPlacement { part: 3, ..base });
        assert_eq!(
            exclusive_prefix(&all, 2, base),
            PartPlacement { part: 5, points: 17, cells: 8, connectivity: 29 }
        );
    }

    #[test]
    fn shared_container_sees_all_writes() -> Result<(), Error> {
        let shared = SharedContainer::default();
        let mut a = shared.clone();
        let mut b = shared.clone();
        a.create_group("/g")?;
        b.create_dataset("/g/d", ScalarType::I64, 1)?;
        a.extend("/g/d", 2)?;
        b.write_slice("/g/d", 1, &IOBuffer::I64(vec![7]))?;
        assert_eq!(shared.snapshot()?.read_slice("/g/d", 0..2)?, IOBuffer::I64(vec![0, 7]));
        Ok(())
    }
}
