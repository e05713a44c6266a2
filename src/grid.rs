//! Grid adaptors.
//!
//! Writers never access a mesh directly. Instead they query the capabilities below, which any
//! mesh type can implement. The grids defined in this module are plain in-memory implementations
//! of these traits.
//!
//! Points of structured grids are numbered with `x` running fastest, then `y`, then `z`, and the
//! same holds for cells.

use std::ops::Range;

use crate::model::{CellType, Extent};
use crate::Error;

/// Capabilities shared by all grids.
pub trait GridAdaptor {
    fn number_of_points(&self) -> usize;
    fn number_of_cells(&self) -> usize;
    fn point_coordinates(&self, point: usize) -> [f64; 3];

    fn points(&self) -> Range<usize> {
        0..self.number_of_points()
    }

    fn cells(&self) -> Range<usize> {
        0..self.number_of_cells()
    }
}

/// Grids with a regular index space.
pub trait StructuredAdaptor: GridAdaptor {
    /// Number of cells along each axis.
    fn extents(&self) -> [usize; 3];

    /// Position of the first point.
    fn origin(&self) -> [f64; 3] {
        self.point_coordinates(0)
    }
}

/// Axis-aligned grids with constant spacing.
pub trait ImageAdaptor: StructuredAdaptor {
    fn spacing(&self) -> [f64; 3];
}

/// Axis-aligned grids with arbitrary ordinates along each axis.
pub trait RectilinearAdaptor: StructuredAdaptor {
    /// Point positions along `axis`, one more than the number of cells along it.
    fn ordinates(&self, axis: usize) -> Vec<f64>;
}

/// Grids with explicit cells.
pub trait UnstructuredAdaptor: GridAdaptor {
    fn cell_type(&self, cell: usize) -> CellType;
    fn cell_points(&self, cell: usize) -> Vec<usize>;
}

/// Number of points of a structured grid with the given cells per axis.
pub fn structured_point_count(extents: [usize; 3]) -> usize {
    extents.iter().map(|n| n + 1).product()
}

/// Number of cells of a structured grid. Axes without cells do not contribute.
pub fn structured_cell_count(extents: [usize; 3]) -> usize {
    Extent::from_cells(extents).num_cells()
}

/// Index triplet of `point` in a structured grid.
pub fn structured_point_index(extents: [usize; 3], point: usize) -> [usize; 3] {
    let nx = extents[0] + 1;
    let ny = extents[1] + 1;
    [point % nx, (point / nx) % ny, point / (nx * ny)]
}

/// Uniform grid given by its origin and spacing.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageGrid {
    pub extents: [usize; 3],
    pub origin: [f64; 3],
    pub spacing: [f64; 3],
}

impl ImageGrid {
    pub fn new(extents: [usize; 3], origin: [f64; 3], spacing: [f64; 3]) -> Self {
        ImageGrid {
            extents,
            origin,
            spacing,
        }
    }
}

impl GridAdaptor for ImageGrid {
    fn number_of_points(&self) -> usize {
        structured_point_count(self.extents)
    }

    fn number_of_cells(&self) -> usize {
        structured_cell_count(self.extents)
    }

    fn point_coordinates(&self, point: usize) -> [f64; 3] {
        let idx = structured_point_index(self.extents, point);
        [0, 1, 2].map(|d| self.origin[d] + self.spacing[d] * idx[d] as f64)
    }
}

impl StructuredAdaptor for ImageGrid {
    fn extents(&self) -> [usize; 3] {
        self.extents
    }

    fn origin(&self) -> [f64; 3] {
        self.origin
    }
}

impl ImageAdaptor for ImageGrid {
    fn spacing(&self) -> [f64; 3] {
        self.spacing
    }
}

/// Axis-aligned grid with explicit ordinates per axis.
#[derive(Clone, Debug, PartialEq)]
pub struct RectilinearGrid {
    ordinates: [Vec<f64>; 3],
}

impl RectilinearGrid {
    /// Creates a grid from its ordinates. Each axis needs at least one ordinate.
    pub fn new(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> Result<Self, Error> {
        if x.is_empty() || y.is_empty() || z.is_empty() {
            return Err(Error::Size(
                "each axis of a rectilinear grid needs at least one ordinate".to_string(),
            ));
        }
        Ok(RectilinearGrid {
            ordinates: [x, y, z],
        })
    }
}

impl GridAdaptor for RectilinearGrid {
    fn number_of_points(&self) -> usize {
        structured_point_count(StructuredAdaptor::extents(self))
    }

    fn number_of_cells(&self) -> usize {
        structured_cell_count(StructuredAdaptor::extents(self))
    }

    fn point_coordinates(&self, point: usize) -> [f64; 3] {
        let idx = structured_point_index(StructuredAdaptor::extents(self), point);
        [0, 1, 2].map(|d| self.ordinates[d][idx[d]])
    }
}

impl StructuredAdaptor for RectilinearGrid {
    fn extents(&self) -> [usize; 3] {
        [0, 1, 2].map(|d| self.ordinates[d].len() - 1)
    }
}

impl RectilinearAdaptor for RectilinearGrid {
    fn ordinates(&self, axis: usize) -> Vec<f64> {
        self.ordinates[axis].clone()
    }
}

/// Curvilinear grid with explicit point positions.
#[derive(Clone, Debug, PartialEq)]
pub struct StructuredGrid {
    extents: [usize; 3],
    points: Vec<[f64; 3]>,
}

impl StructuredGrid {
    pub fn new(extents: [usize; 3], points: Vec<[f64; 3]>) -> Result<Self, Error> {
        let expected = structured_point_count(extents);
        if points.len() != expected {
            return Err(Error::Size(format!(
                "structured grid with extents {:?} needs {} points, got {}",
                extents,
                expected,
                points.len()
            )));
        }
        Ok(StructuredGrid { extents, points })
    }
}

impl GridAdaptor for StructuredGrid {
    fn number_of_points(&self) -> usize {
        self.points.len()
    }

    fn number_of_cells(&self) -> usize {
        structured_cell_count(self.extents)
    }

    fn point_coordinates(&self, point: usize) -> [f64; 3] {
        self.points[point]
    }
}

impl StructuredAdaptor for StructuredGrid {
    fn extents(&self) -> [usize; 3] {
        self.extents
    }
}

/// A cell of an unstructured grid.
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    pub cell_type: CellType,
    pub points: Vec<usize>,
}

impl Cell {
    pub fn new(cell_type: CellType, points: Vec<usize>) -> Self {
        Cell { cell_type, points }
    }
}

/// Grid of arbitrary cells.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnstructuredGrid {
    points: Vec<[f64; 3]>,
    cells: Vec<Cell>,
}

impl UnstructuredGrid {
    /// Creates a grid, checking that all cells reference existing points.
    pub fn new(points: Vec<[f64; 3]>, cells: Vec<Cell>) -> Result<Self, Error> {
        for (i, cell) in cells.iter().enumerate() {
            if let Some(p) = cell.points.iter().find(|&&p| p >= points.len()) {
                return Err(Error::Size(format!(
                    "cell {} references point {} of a grid with {} points",
                    i,
                    p,
                    points.len()
                )));
            }
        }
        Ok(UnstructuredGrid { points, cells })
    }
}

impl GridAdaptor for UnstructuredGrid {
    fn number_of_points(&self) -> usize {
        self.points.len()
    }

    fn number_of_cells(&self) -> usize {
        self.cells.len()
    }

    fn point_coordinates(&self, point: usize) -> [f64; 3] {
        self.points[point]
    }
}

impl UnstructuredAdaptor for UnstructuredGrid {
    fn cell_type(&self, cell: usize) -> CellType {
        self.cells[cell].cell_type
    }

    fn cell_points(&self, cell: usize) -> Vec<usize> {
        self.cells[cell].points.clone()
    }
}
