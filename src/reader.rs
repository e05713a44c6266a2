//! Readers for XML VTK piece, wrapper and collection files.
//!
//! Files are parsed into a lightweight element tree. Appended data is cut off before parsing
//! since raw binary payloads are not valid XML. Data arrays are only decoded when a field is
//! requested.
//!
//! # Examples
//!
//! ```
//! use gridio::grid::ImageGrid;
//! use gridio::model::Field;
//! use gridio::reader::PieceFile;
//! use gridio::{GridKind, PieceWriter};
//!
//! let grid = ImageGrid::new([2, 1, 0], [0.0; 3], [1.0; 3]);
//! let mut writer = PieceWriter::new(GridKind::Image(&grid));
//! writer.set_cell_field("pressure", Field::scalars(vec![0.5f32, 1.5]))?;
//! let mut out = Vec::new();
//! writer.write_to(&mut out)?;
//!
//! let piece = PieceFile::parse(&out)?;
//! assert_eq!(piece.number_of_cells()?, 2);
//! let pressure = piece.cell_field("pressure")?;
//! assert_eq!(pressure.data().cast_into::<f32>(), Some(vec![0.5, 1.5]));
//! # Ok::<(), gridio::Error>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use trim_in_place::TrimInPlace;

use crate::blocks::HeaderType;
use crate::compression::Compressor;
use crate::data_array::ArraySerializer;
use crate::encoding::{self, Encoder};
use crate::grid::{structured_point_index, Cell};
use crate::model::{ByteOrder, CellType, Extent, Field, FieldShape, IOBuffer, ScalarType};
use crate::xml::{DataType, FileType, StorageFormat};
use crate::Error;

/// An element of a parsed document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Node {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
    pub text: String,
}

impl Node {
    fn from_start(start: &BytesStart) -> Result<Node, Error> {
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr?;
            attributes.push((
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                attr.unescape_value()?.into_owned(),
            ));
        }
        Ok(Node {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attributes,
            ..Default::default()
        })
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v.as_str()))
    }

    fn required(&self, key: &str) -> Result<&str, Error> {
        self.attribute(key).ok_or_else(|| {
            Error::Parse(format!("<{}> has no \"{}\" attribute", self.name, key))
        })
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children.iter().find(|c| c.name == name)
    }

    fn required_child(&self, name: &str) -> Result<&Node, Error> {
        self.child(name)
            .ok_or_else(|| Error::Parse(format!("<{}> has no <{}> element", self.name, name)))
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }
}

/// Parses a document into its root element.
///
/// Elements that are still open at the end of the input are closed implicitly.
pub fn parse_tree(xml: &[u8]) -> Result<Node, Error> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut stack: Vec<Node> = Vec::new();
    let mut root = None;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(start) => stack.push(Node::from_start(&start)?),
            Event::Empty(start) => {
                let node = Node::from_start(&start)?;
                attach(&mut stack, &mut root, node);
            }
            Event::End(_) => {
                if let Some(node) = stack.pop() {
                    attach(&mut stack, &mut root, node);
                }
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape()?);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    while let Some(node) = stack.pop() {
        attach(&mut stack, &mut root, node);
    }
    root.ok_or_else(|| Error::Parse("document has no root element".to_string()))
}

fn attach(stack: &mut [Node], root: &mut Option<Node>, mut node: Node) {
    node.text.trim_in_place();
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => {
            if root.is_none() {
                *root = Some(node);
            }
        }
    }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Splits a document into its XML part and the bytes following the `_` marker of the appended
/// data section, if there is one.
fn split_appended(bytes: &[u8]) -> Result<(&[u8], Option<&[u8]>), Error> {
    let start = match find(bytes, b"<AppendedData", 0) {
        Some(start) => start,
        None => return Ok((bytes, None)),
    };
    let tag_end = find(bytes, b">", start)
        .ok_or_else(|| Error::Parse("unterminated <AppendedData> element".to_string()))?;
    let marker = find(bytes, b"_", tag_end)
        .ok_or_else(|| Error::Parse("appended data has no '_' marker".to_string()))?;
    let end = bytes
        .windows(b"</AppendedData>".len())
        .rposition(|w| w == b"</AppendedData>")
        .filter(|&end| end > marker)
        .unwrap_or(bytes.len());
    Ok((&bytes[..=tag_end], Some(&bytes[marker + 1..end])))
}

fn parse_extent(node: &Node, key: &str) -> Result<Option<Extent>, Error> {
    node.attribute(key).map(str::parse).transpose()
}

fn parse_triple(node: &Node, key: &str) -> Result<Option<[f64; 3]>, Error> {
    let value = match node.attribute(key) {
        Some(value) => value,
        None => return Ok(None),
    };
    let values = value
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::Parse(format!("invalid {} \"{}\": {}", key, value, e)))?;
    match values.as_slice() {
        &[x, y, z] => Ok(Some([x, y, z])),
        _ => Err(Error::Parse(format!("{} must have 3 entries", key))),
    }
}

fn parse_number<T: std::str::FromStr>(node: &Node, key: &str) -> Result<T, Error> {
    let value = node.required(key)?;
    value
        .trim()
        .parse()
        .map_err(|_| Error::Parse(format!("invalid {} \"{}\" in <{}>", key, value, node.name)))
}

fn file_type_of(root: &Node) -> Result<FileType, Error> {
    if root.name != "VTKFile" {
        return Err(Error::Parse(format!(
            "expected a <VTKFile> root element, found <{}>",
            root.name
        )));
    }
    let name = root.required("type")?;
    FileType::try_from_type_name(name)
        .ok_or_else(|| Error::Parse(format!("unsupported file type {}", name)))
}

fn file_type_of_path(path: &Path) -> Result<FileType, Error> {
    let ext = path.extension().and_then(|ext| ext.to_str());
    ext.and_then(FileType::try_from_ext)
        .ok_or_else(|| Error::UnknownFileExtension(ext.map(str::to_string)))
}

/// Name, type and component count of a data array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArrayInfo {
    pub name: String,
    pub scalar_type: ScalarType,
    pub num_components: usize,
}

impl ArrayInfo {
    fn from_node(node: &Node) -> Result<ArrayInfo, Error> {
        let type_name = node.required("type")?;
        Ok(ArrayInfo {
            name: node.attribute("Name").unwrap_or_default().to_string(),
            scalar_type: ScalarType::from_vtk_name(type_name)
                .ok_or_else(|| Error::Parse(format!("unknown scalar type {}", type_name)))?,
            num_components: match node.attribute("NumberOfComponents") {
                Some(_) => parse_number(node, "NumberOfComponents")?,
                None => 1,
            },
        })
    }
}

fn shape_of(num_components: usize) -> FieldShape {
    match num_components {
        1 => FieldShape::Scalar,
        9 => FieldShape::Tensor(3, 3),
        n => FieldShape::Vector(n),
    }
}

struct Appended {
    encoder: Encoder,
    data: Vec<u8>,
}

/// A serial piece file.
pub struct PieceFile {
    file_type: FileType,
    header: HeaderType,
    compressor: Compressor,
    byte_order: ByteOrder,
    root: Node,
    appended: Option<Appended>,
}

impl PieceFile {
    pub fn open(path: impl AsRef<Path>) -> Result<PieceFile, Error> {
        let path = path.as_ref();
        let expected = file_type_of_path(path)?;
        let piece = PieceFile::parse(&fs::read(path)?)?;
        if piece.file_type != expected {
            return Err(Error::Parse(format!(
                "{} holds {} data",
                path.display(),
                piece.file_type.type_name()
            )));
        }
        Ok(piece)
    }

    pub fn parse(bytes: &[u8]) -> Result<PieceFile, Error> {
        let (xml, appended) = split_appended(bytes)?;
        let root = parse_tree(xml)?;
        let file_type = file_type_of(&root)?;
        if file_type.storage != StorageFormat::Serial {
            return Err(Error::Parse(format!(
                "{} is not a piece file",
                file_type.type_name()
            )));
        }
        let header = match root.attribute("header_type") {
            Some(name) => HeaderType::from_vtk_name(name)
                .ok_or_else(|| Error::Parse(format!("unknown header type {}", name)))?,
            None => HeaderType::UInt32,
        };
        let compressor = match root.attribute("compressor") {
            Some(name) => Compressor::from_vtk_name(name)
                .ok_or_else(|| Error::Parse(format!("unknown compressor {}", name)))?,
            None => Compressor::None,
        };
        let byte_order = match root.attribute("byte_order") {
            Some(name) => ByteOrder::from_attribute_name(name)
                .ok_or_else(|| Error::Parse(format!("unknown byte order {}", name)))?,
            None => ByteOrder::native(),
        };
        let appended = match (appended, root.child("AppendedData")) {
            (Some(data), Some(node)) => {
                let encoder = match node.attribute("encoding").unwrap_or("raw") {
                    "raw" => Encoder::Raw,
                    "base64" => Encoder::Base64,
                    other => {
                        return Err(Error::Parse(format!("unknown appended encoding {}", other)))
                    }
                };
                Some(Appended {
                    encoder,
                    data: data.to_vec(),
                })
            }
            _ => None,
        };
        log::debug!(
            "parsed {} piece with {:?} headers",
            file_type.type_name(),
            header
        );
        Ok(PieceFile {
            file_type,
            header,
            compressor,
            byte_order,
            root,
            appended,
        })
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn data_type(&self) -> DataType {
        self.file_type.data
    }

    pub fn header_type(&self) -> HeaderType {
        self.header
    }

    pub fn compressor(&self) -> Compressor {
        self.compressor
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    fn grid(&self) -> Result<&Node, Error> {
        self.root.required_child(self.file_type.data.name())
    }

    fn piece(&self) -> Result<&Node, Error> {
        self.grid()?.required_child("Piece")
    }

    pub fn whole_extent(&self) -> Result<Option<Extent>, Error> {
        parse_extent(self.grid()?, "WholeExtent")
    }

    /// Extent of this piece for structured grids.
    pub fn extent(&self) -> Result<Option<Extent>, Error> {
        parse_extent(self.piece()?, "Extent")
    }

    pub fn origin(&self) -> Result<Option<[f64; 3]>, Error> {
        parse_triple(self.grid()?, "Origin")
    }

    pub fn spacing(&self) -> Result<Option<[f64; 3]>, Error> {
        parse_triple(self.grid()?, "Spacing")
    }

    pub fn number_of_points(&self) -> Result<usize, Error> {
        match self.extent()? {
            Some(extent) => Ok(extent.num_points()),
            None => parse_number(self.piece()?, "NumberOfPoints"),
        }
    }

    pub fn number_of_cells(&self) -> Result<usize, Error> {
        match self.extent()? {
            Some(extent) => Ok(extent.num_cells()),
            None => parse_number(self.piece()?, "NumberOfCells"),
        }
    }

    fn arrays(&self, section: &str) -> Result<Vec<&Node>, Error> {
        let node = match section {
            "FieldData" => self.grid()?.child("FieldData"),
            _ => self.piece()?.child(section),
        };
        Ok(node
            .map(|n| n.children_named("DataArray").collect())
            .unwrap_or_default())
    }

    fn infos(&self, section: &str) -> Result<Vec<ArrayInfo>, Error> {
        self.arrays(section)?
            .into_iter()
            .map(ArrayInfo::from_node)
            .collect()
    }

    pub fn point_arrays(&self) -> Result<Vec<ArrayInfo>, Error> {
        self.infos("PointData")
    }

    pub fn cell_arrays(&self) -> Result<Vec<ArrayInfo>, Error> {
        self.infos("CellData")
    }

    pub fn meta_data_arrays(&self) -> Result<Vec<ArrayInfo>, Error> {
        self.infos("FieldData")
    }

    fn field(&self, section: &str, name: &str) -> Result<Field, Error> {
        let node = self
            .arrays(section)?
            .into_iter()
            .find(|n| n.attribute("Name") == Some(name))
            .ok_or_else(|| Error::Parse(format!("no {} array named {}", section, name)))?;
        let info = ArrayInfo::from_node(node)?;
        let data = self.decode(node, info.scalar_type)?;
        Field::new(data, shape_of(info.num_components))
    }

    /// Decodes the point field `name`.
    pub fn point_field(&self, name: &str) -> Result<Field, Error> {
        self.field("PointData", name)
    }

    pub fn cell_field(&self, name: &str) -> Result<Field, Error> {
        self.field("CellData", name)
    }

    pub fn meta_data(&self, name: &str) -> Result<Field, Error> {
        self.field("FieldData", name)
    }

    fn serializer(&self, encoder: Encoder) -> ArraySerializer {
        ArraySerializer {
            compressor: self.compressor,
            encoder,
            header: self.header,
            byte_order: self.byte_order,
        }
    }

    fn decode(&self, node: &Node, scalar_type: ScalarType) -> Result<IOBuffer, Error> {
        match node.attribute("format").unwrap_or("ascii") {
            "ascii" => encoding::parse_ascii(&node.text, scalar_type),
            "binary" => self
                .serializer(Encoder::Base64)
                .deserialize(node.text.as_bytes(), scalar_type),
            "appended" => {
                let offset: usize = parse_number(node, "offset")?;
                let appended = self.appended.as_ref().ok_or_else(|| {
                    Error::Parse("array refers to missing appended data".to_string())
                })?;
                let data = appended.data.get(offset..).ok_or_else(|| {
                    Error::Parse(format!(
                        "offset {} is beyond the {} bytes of appended data",
                        offset,
                        appended.data.len()
                    ))
                })?;
                self.serializer(appended.encoder.clone())
                    .deserialize(data, scalar_type)
            }
            other => Err(Error::Parse(format!("unknown array format {}", other))),
        }
    }

    fn decode_child(&self, parent: &Node, index: usize) -> Result<IOBuffer, Error> {
        let node = parent
            .children_named("DataArray")
            .nth(index)
            .ok_or_else(|| Error::Parse(format!("<{}> misses array {}", parent.name, index)))?;
        let info = ArrayInfo::from_node(node)?;
        self.decode(node, info.scalar_type)
    }

    /// Coordinates of all points.
    pub fn points(&self) -> Result<Vec<[f64; 3]>, Error> {
        match self.file_type.data {
            DataType::ImageData => {
                let extent = self.extent()?.unwrap_or_default();
                let origin = self.origin()?.unwrap_or([0.0; 3]);
                let spacing = self.spacing()?.unwrap_or([1.0; 3]);
                let cells = extent.cells();
                let start = [0, 1, 2].map(|d| *extent.0[d].start() as f64);
                Ok((0..extent.num_points())
                    .map(|p| {
                        let idx = structured_point_index(cells, p);
                        [0, 1, 2].map(|d| origin[d] + spacing[d] * (start[d] + idx[d] as f64))
                    })
                    .collect())
            }
            DataType::RectilinearGrid => {
                let coordinates = self.piece()?.required_child("Coordinates")?;
                let mut axes = Vec::with_capacity(3);
                for axis in 0..3 {
                    axes.push(to_f64(&self.decode_child(coordinates, axis)?)?);
                }
                let (x, y, z) = (&axes[0], &axes[1], &axes[2]);
                let cells = [x.len(), y.len(), z.len()].map(|n| n.saturating_sub(1));
                let count = x.len() * y.len() * z.len();
                Ok((0..count)
                    .map(|p| {
                        let [i, j, k] = structured_point_index(cells, p);
                        [x[i], y[j], z[k]]
                    })
                    .collect())
            }
            DataType::StructuredGrid | DataType::UnstructuredGrid => {
                let points = self.piece()?.required_child("Points")?;
                let coords = to_f64(&self.decode_child(points, 0)?)?;
                Ok(coords.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
            }
        }
    }

    /// Cells of an unstructured piece.
    pub fn cells(&self) -> Result<Vec<Cell>, Error> {
        let node = self.piece()?.required_child("Cells")?;
        let array = |name: &str| -> Result<IOBuffer, Error> {
            let array = node
                .children_named("DataArray")
                .find(|n| n.attribute("Name") == Some(name))
                .ok_or_else(|| Error::Parse(format!("<Cells> misses the {} array", name)))?;
            self.decode(array, ArrayInfo::from_node(array)?.scalar_type)
        };
        let connectivity = to_usize(&array("connectivity")?)?;
        let offsets = to_usize(&array("offsets")?)?;
        let types = array("types")?
            .cast_into::<u8>()
            .ok_or_else(|| Error::Parse("invalid cell types".to_string()))?;

        let mut begin = 0;
        let mut cells = Vec::with_capacity(types.len());
        for (&end, id) in offsets.iter().zip(types) {
            let cell_type = CellType::from_vtk_id(id)
                .ok_or_else(|| Error::Parse(format!("unknown cell type {}", id)))?;
            let points = connectivity.get(begin..end).ok_or_else(|| {
                Error::Parse(format!("cell offset {} exceeds the connectivity", end))
            })?;
            cells.push(Cell::new(cell_type, points.to_vec()));
            begin = end;
        }
        Ok(cells)
    }
}

fn to_f64(buf: &IOBuffer) -> Result<Vec<f64>, Error> {
    buf.cast_into()
        .ok_or_else(|| Error::Parse("coordinates are not representable as f64".to_string()))
}

fn to_usize(buf: &IOBuffer) -> Result<Vec<usize>, Error> {
    buf.cast_into()
        .ok_or_else(|| Error::Parse("negative or oversized index".to_string()))
}

/// A piece referenced by a parallel wrapper.
#[derive(Clone, Debug, PartialEq)]
pub struct PieceSource {
    pub extent: Option<Extent>,
    pub source: String,
}

/// A parallel wrapper file.
#[derive(Clone, Debug, PartialEq)]
pub struct ParallelFile {
    pub file_type: FileType,
    pub whole_extent: Option<Extent>,
    pub origin: Option<[f64; 3]>,
    pub spacing: Option<[f64; 3]>,
    pub ghost_level: u32,
    pub point_arrays: Vec<ArrayInfo>,
    pub cell_arrays: Vec<ArrayInfo>,
    pub pieces: Vec<PieceSource>,
    directory: PathBuf,
}

impl ParallelFile {
    pub fn open(path: impl AsRef<Path>) -> Result<ParallelFile, Error> {
        let path = path.as_ref();
        file_type_of_path(path)?;
        let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
        ParallelFile::parse(&fs::read(path)?, directory)
    }

    /// Parses a wrapper whose piece sources are relative to `directory`.
    pub fn parse(bytes: &[u8], directory: impl Into<PathBuf>) -> Result<ParallelFile, Error> {
        let root = parse_tree(bytes)?;
        let file_type = file_type_of(&root)?;
        if file_type.storage != StorageFormat::Parallel {
            return Err(Error::Parse(format!(
                "{} is not a parallel wrapper",
                file_type.type_name()
            )));
        }
        let grid = root.required_child(&file_type.type_name())?;
        let infos = |section: &str| -> Result<Vec<ArrayInfo>, Error> {
            match grid.child(section) {
                Some(node) => node
                    .children_named("PDataArray")
                    .map(ArrayInfo::from_node)
                    .collect(),
                None => Ok(Vec::new()),
            }
        };
        let pieces = grid
            .children_named("Piece")
            .map(|piece| {
                Ok(PieceSource {
                    extent: parse_extent(piece, "Extent")?,
                    source: piece.required("Source")?.to_string(),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(ParallelFile {
            file_type,
            whole_extent: parse_extent(grid, "WholeExtent")?,
            origin: parse_triple(grid, "Origin")?,
            spacing: parse_triple(grid, "Spacing")?,
            ghost_level: match grid.attribute("GhostLevel") {
                Some(_) => parse_number(grid, "GhostLevel")?,
                None => 0,
            },
            point_arrays: infos("PPointData")?,
            cell_arrays: infos("PCellData")?,
            pieces,
            directory: directory.into(),
        })
    }

    pub fn piece_paths(&self) -> Vec<PathBuf> {
        self.pieces
            .iter()
            .map(|p| self.directory.join(&p.source))
            .collect()
    }

    pub fn open_piece(&self, index: usize) -> Result<PieceFile, Error> {
        let piece = self.pieces.get(index).ok_or_else(|| {
            Error::InvalidState(format!(
                "piece {} requested from a wrapper with {} pieces",
                index,
                self.pieces.len()
            ))
        })?;
        PieceFile::open(self.directory.join(&piece.source))
    }
}

/// A data set listed in a `.pvd` collection.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionEntry {
    pub time: f64,
    pub part: u32,
    pub file: String,
}

/// Parses the entries of a `.pvd` collection in document order.
pub fn parse_collection(bytes: &[u8]) -> Result<Vec<CollectionEntry>, Error> {
    let root = parse_tree(bytes)?;
    if root.attribute("type") != Some("Collection") {
        return Err(Error::Parse("document is not a collection".to_string()));
    }
    root.required_child("Collection")?
        .children_named("DataSet")
        .map(|data_set| {
            Ok(CollectionEntry {
                time: parse_number(data_set, "timestep")?,
                part: match data_set.attribute("part") {
                    Some(_) => parse_number(data_set, "part")?,
                    None => 0,
                },
                file: data_set.required("file")?.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_with_open_elements() -> Result<(), Error> {
        let root = parse_tree(b"<?xml version=\"1.0\"?><A x=\"1\"><B>  text </B><C/><D y=\"&lt;\">")?;
        assert_eq!(root.name, "A");
        assert_eq!(root.attribute("x"), Some("1"));
        assert_eq!(root.child("B").map(|b| b.text.as_str()), Some("text"));
        assert!(root.child("C").is_some());
        assert_eq!(root.child("D").and_then(|d| d.attribute("y")), Some("<"));
        Ok(())
    }

    #[test]
    fn appended_section_is_split() -> Result<(), Error> {
        let doc = b"<VTKFile><AppendedData encoding=\"raw\">\n_\x00<_>\xff\n</AppendedData></VTKFile>";
        let (xml, appended) = split_appended(doc)?;
        assert!(xml.ends_with(b"encoding=\"raw\">"));
        assert_eq!(appended, Some(&b"\x00<_>\xff\n"[..]));
        let (xml, appended) = split_appended(b"<VTKFile/>")?;
        assert_eq!(xml, b"<VTKFile/>");
        assert_eq!(appended, None);
        Ok(())
    }

    #[test]
    fn collection_entries() -> Result<(), Error> {
        let doc = br#"<?xml version="1.0"?>
<VTKFile type="Collection" version="1.0">
  <Collection>
    <DataSet timestep="0.5" group="" part="0" name="" file="run-00000.vtu"/>
    <DataSet timestep="1" group="" part="0" name="" file="run-00001.vtu"/>
  </Collection>
</VTKFile>"#;
        let entries = parse_collection(doc)?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].time, 0.5);
        assert_eq!(entries[1].file, "run-00001.vtu");
        Ok(())
    }

    #[test]
    fn unknown_extension() {
        assert!(matches!(
            PieceFile::open("grid.vtk"),
            Err(Error::UnknownFileExtension(Some(ext))) if ext == "vtk"
        ));
    }
}
