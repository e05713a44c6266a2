//! Writer for serial XML VTK piece files.
//!
//! A [`PieceWriter`] writes one grid, given as a [`GridKind`], together with the fields attached
//! to its points and cells. The kind of grid decides the file type and how the geometry is
//! described, everything else is shared.
//!
//! # Examples
//!
//! ```
//! use gridio::grid::{Cell, UnstructuredGrid};
//! use gridio::model::{CellType, Field};
//! use gridio::{GridKind, PieceWriter, XmlOptions};
//! use gridio::encoding::Encoder;
//!
//! let grid = UnstructuredGrid::new(
//!     vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
//!     vec![Cell::new(CellType::Triangle, vec![0, 1, 2])],
//! )?;
//! let mut writer = PieceWriter::new(GridKind::Unstructured(&grid))
//!     .with_options(XmlOptions::new().with_encoder(Encoder::ascii()));
//! writer.set_cell_field("id", Field::scalars(vec![7i32]))?;
//!
//! let mut out = Vec::new();
//! writer.write_to(&mut out)?;
//! let text = String::from_utf8(out).unwrap();
//! assert!(text.contains("<Piece NumberOfPoints=\"3\" NumberOfCells=\"1\">"));
//! # Ok::<(), gridio::Error>(())
//! ```

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::appendix::Appendix;
use crate::data_array::{self, ArraySerializer};
use crate::encoding::Encoder;
use crate::grid::{ImageAdaptor, RectilinearAdaptor, StructuredAdaptor, UnstructuredAdaptor};
use crate::model::{Extent, Field, IOBuffer, ScalarType};
use crate::options::{DataFormat, XmlOptions, XmlSettings};
use crate::xml::{DataType, FileType, XmlElement};
use crate::Error;

/// The grid written by a [`PieceWriter`].
#[derive(Copy, Clone)]
pub enum GridKind<'a> {
    Image(&'a dyn ImageAdaptor),
    Rectilinear(&'a dyn RectilinearAdaptor),
    Structured(&'a dyn StructuredAdaptor),
    Unstructured(&'a dyn UnstructuredAdaptor),
}

impl<'a> GridKind<'a> {
    pub fn data_type(&self) -> DataType {
        match self {
            GridKind::Image(_) => DataType::ImageData,
            GridKind::Rectilinear(_) => DataType::RectilinearGrid,
            GridKind::Structured(_) => DataType::StructuredGrid,
            GridKind::Unstructured(_) => DataType::UnstructuredGrid,
        }
    }

    pub fn number_of_points(&self) -> usize {
        match self {
            GridKind::Image(g) => g.number_of_points(),
            GridKind::Rectilinear(g) => g.number_of_points(),
            GridKind::Structured(g) => g.number_of_points(),
            GridKind::Unstructured(g) => g.number_of_points(),
        }
    }

    pub fn number_of_cells(&self) -> usize {
        match self {
            GridKind::Image(g) => g.number_of_cells(),
            GridKind::Rectilinear(g) => g.number_of_cells(),
            GridKind::Structured(g) => g.number_of_cells(),
            GridKind::Unstructured(g) => g.number_of_cells(),
        }
    }

    /// Cells per axis of structured grids.
    pub fn extents(&self) -> Option<[usize; 3]> {
        match self {
            GridKind::Image(g) => Some(g.extents()),
            GridKind::Rectilinear(g) => Some(g.extents()),
            GridKind::Structured(g) => Some(g.extents()),
            GridKind::Unstructured(_) => None,
        }
    }

    /// Distance between neighbouring points of image grids.
    pub fn spacing(&self) -> Option<[f64; 3]> {
        match self {
            GridKind::Image(g) => Some(g.spacing()),
            _ => None,
        }
    }

    /// Position of the first point of structured grids.
    pub fn origin(&self) -> Option<[f64; 3]> {
        match self {
            GridKind::Image(g) => Some(g.origin()),
            GridKind::Rectilinear(g) => Some(g.origin()),
            GridKind::Structured(g) => Some(g.origin()),
            GridKind::Unstructured(_) => None,
        }
    }

    fn point_coordinates(&self, point: usize) -> [f64; 3] {
        match self {
            GridKind::Image(g) => g.point_coordinates(point),
            GridKind::Rectilinear(g) => g.point_coordinates(point),
            GridKind::Structured(g) => g.point_coordinates(point),
            GridKind::Unstructured(g) => g.point_coordinates(point),
        }
    }

    /// All point coordinates, three values per point.
    fn coordinates(&self) -> Vec<f64> {
        (0..self.number_of_points())
            .flat_map(|p| self.point_coordinates(p))
            .collect()
    }
}

impl std::fmt::Debug for GridKind<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "GridKind::{:?}", self.data_type())
    }
}

/// Progress of a [`PieceWriter`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriterState {
    /// Fields may be set.
    Idle,
    BuildingGeometry,
    BuildingPointData,
    BuildingCellData,
    StreamingAppendix,
    /// The document was written. Call [`PieceWriter::reset`] to write another one.
    Done,
}

/// Placement of a piece within a larger structured grid.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct PieceLayout {
    /// Offset of the piece's first point in the index space of the whole grid.
    pub offset: [i32; 3],
    pub whole_extent: Extent,
    /// Origin of the whole grid.
    pub origin: [f64; 3],
}

/// A field together with its name.
pub(crate) type NamedField = (String, Field);

/// Description of a data array without its values, as used in parallel wrappers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ArrayDeclaration {
    pub name: String,
    pub scalar_type: ScalarType,
    pub num_components: usize,
}

/// Assembles a single XML piece file.
pub struct PieceWriter<'a> {
    grid: GridKind<'a>,
    options: XmlOptions,
    point_fields: Vec<NamedField>,
    cell_fields: Vec<NamedField>,
    meta_data: Vec<NamedField>,
    layout: Option<PieceLayout>,
    state: WriterState,
}

impl<'a> PieceWriter<'a> {
    pub fn new(grid: GridKind<'a>) -> Self {
        PieceWriter {
            grid,
            options: XmlOptions::default(),
            point_fields: Vec::new(),
            cell_fields: Vec::new(),
            meta_data: Vec::new(),
            layout: None,
            state: WriterState::Idle,
        }
    }

    pub fn with_options(mut self, options: XmlOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &XmlOptions {
        &self.options
    }

    pub fn grid(&self) -> GridKind<'a> {
        self.grid
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn file_type(&self) -> FileType {
        FileType::serial(self.grid.data_type())
    }

    /// Attaches a field with one tuple per point. Replaces a field of the same name.
    pub fn set_point_field(&mut self, name: impl Into<String>, field: Field) -> Result<(), Error> {
        self.check_idle("set_point_field")?;
        insert_field(&mut self.point_fields, name.into(), field);
        Ok(())
    }

    /// Attaches a field with one tuple per cell. Replaces a field of the same name.
    pub fn set_cell_field(&mut self, name: impl Into<String>, field: Field) -> Result<(), Error> {
        self.check_idle("set_cell_field")?;
        insert_field(&mut self.cell_fields, name.into(), field);
        Ok(())
    }

    /// Attaches a field that is not associated with points or cells, e.g. a time value.
    pub fn set_meta_data(&mut self, name: impl Into<String>, field: Field) -> Result<(), Error> {
        self.check_idle("set_meta_data")?;
        insert_field(&mut self.meta_data, name.into(), field);
        Ok(())
    }

    /// Drops all fields and makes the writer ready for the next document.
    pub fn reset(&mut self) {
        self.point_fields.clear();
        self.cell_fields.clear();
        self.meta_data.clear();
        self.state = WriterState::Idle;
    }

    pub(crate) fn set_layout(&mut self, layout: Option<PieceLayout>) {
        self.layout = layout;
    }

    fn check_idle(&self, operation: &str) -> Result<(), Error> {
        if self.state != WriterState::Idle {
            return Err(Error::InvalidState(format!(
                "{} called while the writer is in state {:?}",
                operation, self.state
            )));
        }
        Ok(())
    }

    /// Checks that every cell refers to existing points and that every field has one tuple per
    /// point or cell.
    pub fn validate(&self) -> Result<(), Error> {
        if let GridKind::Unstructured(g) = self.grid {
            let num_points = g.number_of_points();
            for cell in g.cells() {
                if let Some(p) = g.cell_points(cell).iter().find(|&&p| p >= num_points) {
                    return Err(Error::Size(format!(
                        "cell {} references point {} of a grid with {} points",
                        cell, p, num_points
                    )));
                }
            }
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

    pub(crate) fn point_declarations(&self) -> Vec<ArrayDeclaration> {
        declarations(&self.point_fields)
    }

    pub(crate) fn cell_declarations(&self) -> Vec<ArrayDeclaration> {
        declarations(&self.cell_fields)
    }

    /// Writes the document into `out`.
    ///
    /// All fields are validated before anything is written.
    pub fn write_to<W: Write>(&mut self, out: W) -> Result<(), Error> {
        if !matches!(self.state, WriterState::Idle | WriterState::Done) {
            return Err(Error::InvalidState(format!(
                "a previous write stopped in state {:?}, reset the writer first",
                self.state
            )));
        }
        self.validate()?;
        let settings = self.options.resolve()?;
        let file_type = self.file_type();
        log::debug!("writing {} piece", file_type.type_name());

        self.state = WriterState::BuildingGeometry;
        let mut ctx = WriteContext::new(file_type, &settings);
        let mut grid_element = ctx.grid_element(self.grid, self.layout.as_ref());
        let mut piece = match self.grid.extents() {
            Some(extents) => {
                let offset = self.layout.as_ref().map_or([0; 3], |l| l.offset);
                XmlElement::new("Piece")
                    .with_attribute("Extent", Extent::from_cells(extents).translated(offset))
            }
            None => XmlElement::new("Piece")
                .with_attribute("NumberOfPoints", self.grid.number_of_points())
                .with_attribute("NumberOfCells", self.grid.number_of_cells()),
        };
        piece.add_child(XmlElement::new("PointData"));
        piece.add_child(XmlElement::new("CellData"));
        ctx.add_geometry(self.grid, &mut piece)?;

        self.state = WriterState::BuildingPointData;
        let mut field_data = XmlElement::new("FieldData");
        for (name, field) in &self.meta_data {
            let mut array = ctx.field_array(name, field)?;
            array.set_attribute("NumberOfTuples", field.num_tuples());
            field_data.add_child(array);
        }
        for (name, field) in &self.point_fields {
            let array = ctx.field_array(name, field)?;
            piece.child_or_insert("PointData").add_child(array);
        }

        self.state = WriterState::BuildingCellData;
        for (name, field) in &self.cell_fields {
            let array = ctx.field_array(name, field)?;
            piece.child_or_insert("CellData").add_child(array);
        }

        if !self.meta_data.is_empty() {
            grid_element.add_child(field_data);
        }
        grid_element.add_child(piece);
        ctx.root.add_child(grid_element);

        self.state = WriterState::StreamingAppendix;
        ctx.finish(out)?;
        self.state = WriterState::Done;
        Ok(())
    }

    /// Writes the document to `base_path` with the file extension of the grid appended.
    ///
    /// Returns the path of the written file. The document is assembled completely before the
    /// file is created, so no file is left behind if writing fails.
    pub fn write(&mut self, base_path: impl AsRef<Path>) -> Result<PathBuf, Error> {
        let path = with_extension(base_path.as_ref(), &self.file_type().extension());
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        if let Err(err) = File::create(&path).and_then(|mut file| file.write_all(&buf)) {
            self.reopen();
            return Err(err.into());
        }
        log::debug!("wrote {}", path.display());
        Ok(path)
    }

    /// Makes a finished writer accept fields again while keeping the ones it has.
    ///
    /// Used when a completed document was not stored, so the same fields can be written again.
    pub(crate) fn reopen(&mut self) {
        if self.state == WriterState::Done {
            self.state = WriterState::Idle;
        }
    }
}

fn insert_field(fields: &mut Vec<NamedField>, name: String, field: Field) {
    match fields.iter_mut().find(|(n, _)| *n == name) {
        Some(entry) => entry.1 = field,
        None => fields.push((name, field)),
    }
}

fn declarations(fields: &[NamedField]) -> Vec<ArrayDeclaration> {
    fields
        .iter()
        .map(|(name, field)| {
            let field = field.to_vtk_layout();
            ArrayDeclaration {
                name: name.clone(),
                scalar_type: field.scalar_type(),
                num_components: field.num_components(),
            }
        })
        .collect()
}

/// Appends `.ext` to a path, keeping any dots already in the file name.
pub(crate) fn with_extension(base: &Path, ext: &str) -> PathBuf {
    let mut path = base.as_os_str().to_owned();
    path.push(".");
    path.push(ext);
    PathBuf::from(path)
}

/// The `VTKFile` element of a document of the given type.
pub(crate) fn file_root(file_type: FileType, settings: &XmlSettings) -> XmlElement {
    let mut root = XmlElement::new("VTKFile")
        .with_attribute("type", file_type.type_name())
        .with_attribute("version", "2.0")
        .with_attribute("byte_order", settings.byte_order.attribute_name())
        .with_attribute("header_type", settings.header.vtk_name());
    if let Some(name) = settings.compressor.vtk_name() {
        root.set_attribute("compressor", name);
    }
    root
}

pub(crate) fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// State of one document under construction.
struct WriteContext<'a> {
    file_type: FileType,
    root: XmlElement,
    appendix: Appendix<'a>,
    settings: XmlSettings,
    serializer: ArraySerializer,
}

impl<'a> WriteContext<'a> {
    fn new(file_type: FileType, settings: &XmlSettings) -> Self {
        WriteContext {
            file_type,
            root: file_root(file_type, settings),
            appendix: Appendix::new(),
            settings: settings.clone(),
            serializer: ArraySerializer::from(settings),
        }
    }

    /// The element named after the grid type, with the attributes describing the whole grid.
    fn grid_element(&self, grid: GridKind, layout: Option<&PieceLayout>) -> XmlElement {
        let mut element = XmlElement::new(self.file_type.data.name());
        if let Some(extents) = grid.extents() {
            let whole = match layout {
                Some(layout) => layout.whole_extent.clone(),
                None => Extent::from_cells(extents),
            };
            element.set_attribute("WholeExtent", whole);
        }
        if let GridKind::Image(image) = grid {
            let origin = layout.map_or_else(|| image.origin(), |l| l.origin);
            element.set_attribute("Origin", join(&origin));
            element.set_attribute("Spacing", join(&image.spacing()));
        }
        element
    }

    fn add_geometry(&mut self, grid: GridKind, piece: &mut XmlElement) -> Result<(), Error> {
        let precision = self.settings.coordinate_precision;
        match grid {
            GridKind::Image(_) => {}
            GridKind::Rectilinear(g) => {
                let coordinates = piece.add_child(XmlElement::new("Coordinates"));
                for (axis, name) in ["X", "Y", "Z"].iter().enumerate() {
                    let values = cast(IOBuffer::F64(g.ordinates(axis)), precision)?;
                    let array = self.data_array(name, Cow::Owned(values), 1)?;
                    coordinates.add_child(array);
                }
            }
            GridKind::Structured(_) | GridKind::Unstructured(_) => {
                let values = cast(IOBuffer::F64(grid.coordinates()), precision)?;
                let array = self.data_array("Coordinates", Cow::Owned(values), 3)?;
                piece.add_child(XmlElement::new("Points")).add_child(array);
            }
        }

        if let GridKind::Unstructured(g) = grid {
            let mut connectivity = Vec::new();
            let mut offsets = Vec::with_capacity(g.number_of_cells());
            let mut types = Vec::with_capacity(g.number_of_cells());
            for cell in g.cells() {
                let points = g.cell_points(cell);
                connectivity.extend(points.iter().map(|&p| p as u64));
                offsets.push(connectivity.len() as u64);
                types.push(g.cell_type(cell).vtk_id());
            }
            let index_type = self.settings.header.scalar_type();
            let header = self.settings.header;
            if let Some(&last) = offsets.last() {
                header.check(last, "connectivity size")?;
            }
            if let Some(&max) = connectivity.iter().max() {
                header.check(max, "point index")?;
            }
            let connectivity = cast(IOBuffer::U64(connectivity), index_type)?;
            let offsets = cast(IOBuffer::U64(offsets), index_type)?;

            let cells = piece.add_child(XmlElement::new("Cells"));
            cells.add_child(self.data_array("connectivity", Cow::Owned(connectivity), 1)?);
            cells.add_child(self.data_array("offsets", Cow::Owned(offsets), 1)?);
            cells.add_child(self.data_array("types", Cow::Owned(IOBuffer::U8(types)), 1)?);
        }
        Ok(())
    }

    fn field_array(&mut self, name: &str, field: &'a Field) -> Result<XmlElement, Error> {
        let field = field.to_vtk_layout();
        let num_components = field.num_components();
        let data = match field {
            Cow::Borrowed(f) => Cow::Borrowed(f.data()),
            Cow::Owned(f) => Cow::Owned(f.data().clone()),
        };
        self.data_array(name, data, num_components)
    }

    /// A `DataArray` element, with the payload either inlined or registered in the appendix.
    fn data_array(
        &mut self,
        name: &str,
        data: Cow<'a, IOBuffer>,
        num_components: usize,
    ) -> Result<XmlElement, Error> {
        let mut element = XmlElement::new("DataArray")
            .with_attribute("type", data.scalar_type().vtk_name())
            .with_attribute("Name", name)
            .with_attribute("NumberOfComponents", num_components)
            .with_attribute(
                "format",
                data_array::format_attribute(&self.settings.encoder, self.settings.data_format),
            );
        match self.settings.data_format {
            DataFormat::Inlined => {
                let bytes = self.serializer.serialize(&data)?;
                let text = String::from_utf8(bytes)
                    .map_err(|e| Error::Encoding(format!("inline data is not text: {}", e)))?;
                element.set_text(text);
            }
            DataFormat::Appended => {
                let serializer = self.serializer.clone();
                let token = self.appendix.add(move || serializer.serialize(&data));
                element.set_offset("offset", token);
            }
        }
        Ok(element)
    }

    /// Resolves the appendix and renders the document.
    fn finish<W: Write>(mut self, out: W) -> Result<(), Error> {
        let encoding = self.settings.encoder.appended_encoding_name();
        let has_appendix = !self.appendix.is_empty();
        if has_appendix {
            if let Some(encoding) = encoding {
                self.root
                    .add_child(XmlElement::new("AppendedData").with_attribute("encoding", encoding))
                    .set_appendix_content();
            }
        }
        let offsets = Rc::new(RefCell::new(BTreeMap::new()));
        let sink = Rc::clone(&offsets);
        self.appendix.set_observer(move |token, offset| {
            sink.borrow_mut().insert(token, offset);
        });
        let resolved = self.appendix.resolve()?;
        self.root.fill_offsets(&offsets.borrow());
        let declaration = !matches!(self.settings.encoder, Encoder::Raw);
        self.root.render(out, Some(&resolved), declaration)
    }
}

fn cast(values: IOBuffer, scalar_type: ScalarType) -> Result<IOBuffer, Error> {
    values.cast_to(scalar_type).ok_or_else(|| {
        Error::Size(format!(
            "values cannot be represented as {}",
            scalar_type.vtk_name()
        ))
    })
}
