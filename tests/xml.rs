use pretty_assertions::assert_eq;
use regex::bytes::Regex;

use gridio::blocks::HeaderType;
use gridio::compression::Compressor;
use gridio::data_array::ArraySerializer;
use gridio::encoding::Encoder;
use gridio::grid::{Cell, ImageGrid, RectilinearGrid, StructuredGrid, UnstructuredGrid};
use gridio::model::{ByteOrder, CellType, Extent, Field, FieldShape, IOBuffer, ScalarType};
use gridio::reader::PieceFile;
use gridio::writer::WriterState;
use gridio::{DataFormat, Error, GridKind, PieceWriter, XmlOptions};

type Result = std::result::Result<(), Error>;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn tmp_path(name: &str) -> std::path::PathBuf {
    std::path::Path::new(env!("CARGO_TARGET_TMPDIR")).join(name)
}

fn render(writer: &mut PieceWriter) -> std::result::Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    writer.write_to(&mut out)?;
    Ok(out)
}

fn two_cells() -> UnstructuredGrid {
    UnstructuredGrid::new(
        vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 1.0, 0.0],
        ],
        vec![
            Cell::new(CellType::Tetra, vec![0, 1, 2, 3]),
            Cell::new(CellType::Triangle, vec![1, 4, 2]),
        ],
    )
    .unwrap()
}

#[test]
fn image_inlined_base64_without_compression() -> Result {
    init();
    let grid = ImageGrid::new([1, 1, 0], [0.0; 3], [1.0; 3]);
    let mut writer = PieceWriter::new(GridKind::Image(&grid)).with_options(
        XmlOptions::new()
            .with_compressor(Compressor::None)
            .with_encoder(Encoder::Base64)
            .with_data_format(DataFormat::Inlined)
            .with_byte_order(ByteOrder::LittleEndian),
    );
    writer.set_point_field("u", Field::scalars(vec![1.0f64, 2.0, 3.0, 4.0]))?;
    let out = render(&mut writer)?;
    let text = String::from_utf8(out.clone()).unwrap();

    assert!(text.starts_with("<?xml"));
    assert!(text.contains(r#"<VTKFile type="ImageData" version="2.0" byte_order="LittleEndian" header_type="UInt64">"#));
    assert!(!text.contains("compressor="));
    assert!(text.contains(r#"WholeExtent="0 1 0 1 0 0""#));
    assert!(text.contains(r#"<Piece Extent="0 1 0 1 0 0">"#));
    assert!(!text.contains("AppendedData"));

    // Header and payload are encoded separately: [32] followed by the four doubles.
    let re = Regex::new(r#"Name="u" NumberOfComponents="1" format="binary">([^<]*)</DataArray>"#)
        .unwrap();
    let caps = re.captures(&out).expect("inlined data array");
    assert_eq!(
        &caps[1],
        &b"IAAAAAAAAAA=AAAAAAAA8D8AAAAAAAAAQAAAAAAAAAhAAAAAAAAAEEA="[..]
    );

    let piece = PieceFile::parse(&out)?;
    assert_eq!(piece.number_of_points()?, 4);
    assert_eq!(piece.extent()?, Some(Extent::from_cells([1, 1, 0])));
    assert_eq!(
        piece.point_field("u")?,
        Field::scalars(vec![1.0f64, 2.0, 3.0, 4.0])
    );
    Ok(())
}

#[test]
#[cfg(feature = "compression")]
fn image_inlined_compressed_blocks() -> Result {
    let grid = ImageGrid::new([1, 1, 0], [0.0; 3], [1.0; 3]);
    let settings = XmlOptions::new()
        .with_compressor(Compressor::zlib().with_block_size(2))
        .with_encoder(Encoder::Base64)
        .with_data_format(DataFormat::Inlined)
        .with_header_type(HeaderType::UInt32);
    let mut writer = PieceWriter::new(GridKind::Image(&grid)).with_options(settings.clone());
    writer.set_point_field("u", Field::scalars(vec![1.0f32, 2.0, 3.0, 4.0]))?;
    let out = render(&mut writer)?;

    let re = Regex::new(r#"format="binary">([^<]*)</DataArray>"#).unwrap();
    let encoded = re.captures(&out).expect("inlined data array")[1].to_vec();
    let serializer = ArraySerializer::from(&settings.resolve()?);
    assert_eq!(
        serializer.deserialize(&encoded, ScalarType::F32)?,
        IOBuffer::from(vec![1.0f32, 2.0, 3.0, 4.0])
    );

    let piece = PieceFile::parse(&out)?;
    assert_eq!(piece.header_type(), HeaderType::UInt32);
    assert!(matches!(piece.compressor(), Compressor::Zlib { .. }));
    assert_eq!(
        piece.point_field("u")?,
        Field::scalars(vec![1.0f32, 2.0, 3.0, 4.0])
    );
    Ok(())
}

#[test]
fn codec_combinations_read_back() -> Result {
    init();
    let grid = two_cells();
    let mut compressors = vec![Compressor::None];
    if cfg!(feature = "compression") {
        compressors.extend([
            Compressor::lz4().with_block_size(7),
            Compressor::zlib().with_block_size(64),
            Compressor::lzma(),
        ]);
    }
    let velocity = Field::vectors(
        vec![0.5f64, 1.5, 2.5, 3.5, 4.5, 5.5, 6.5, 7.5, 8.5, 9.5, 10.5, 11.5, 12.5, 13.5, 14.5],
        3,
    )?;
    let pressure = Field::scalars(vec![-1i32, 7]);

    for compressor in compressors {
        for (encoder, format) in [
            (Encoder::Base64, DataFormat::Inlined),
            (Encoder::Base64, DataFormat::Appended),
            (Encoder::Raw, DataFormat::Appended),
        ] {
            for header in [HeaderType::UInt32, HeaderType::UInt64] {
                let mut writer = PieceWriter::new(GridKind::Unstructured(&grid)).with_options(
                    XmlOptions::new()
                        .with_compressor(compressor)
                        .with_encoder(encoder.clone())
                        .with_data_format(format)
                        .with_header_type(header),
                );
                writer.set_point_field("velocity", velocity.clone())?;
                writer.set_cell_field("pressure", pressure.clone())?;
                let out = render(&mut writer)?;

                let piece = PieceFile::parse(&out)?;
                assert_eq!(piece.number_of_points()?, 5);
                assert_eq!(piece.number_of_cells()?, 2);
                assert_eq!(piece.point_field("velocity")?, velocity);
                assert_eq!(piece.cell_field("pressure")?, pressure);
                assert_eq!(
                    piece.cells()?,
                    vec![
                        Cell::new(CellType::Tetra, vec![0, 1, 2, 3]),
                        Cell::new(CellType::Triangle, vec![1, 4, 2]),
                    ]
                );
            }
        }
    }
    Ok(())
}

#[test]
fn ascii_values_are_inlined() -> Result {
    let grid = ImageGrid::new([2, 0, 0], [1.0, 0.0, 0.0], [0.5; 3]);
    let mut writer = PieceWriter::new(GridKind::Image(&grid))
        .with_options(XmlOptions::new().with_encoder(Encoder::ascii()));
    writer.set_point_field("id", Field::scalars(vec![3u16, 4, 5]))?;
    let text = String::from_utf8(render(&mut writer)?).unwrap();

    assert!(text.contains(r#"format="ascii">3 4 5</DataArray>"#));
    assert!(text.contains(r#"Origin="1 0 0" Spacing="0.5 0.5 0.5""#));
    assert!(!text.contains("compressor="));

    let piece = PieceFile::parse(text.as_bytes())?;
    assert_eq!(piece.origin()?, Some([1.0, 0.0, 0.0]));
    assert_eq!(piece.spacing()?, Some([0.5; 3]));
    assert_eq!(piece.point_field("id")?, Field::scalars(vec![3u16, 4, 5]));
    Ok(())
}

#[test]
fn appended_offsets_increase() -> Result {
    let grid = two_cells();
    let mut writer = PieceWriter::new(GridKind::Unstructured(&grid)).with_options(
        XmlOptions::new()
            .with_compressor(Compressor::None)
            .with_encoder(Encoder::Base64),
    );
    writer.set_point_field("a", Field::scalars(vec![1u8, 2, 3, 4, 5]))?;
    writer.set_point_field("b", Field::scalars(vec![1.0f64; 5]))?;
    writer.set_cell_field("c", Field::scalars(vec![9i64, 10]))?;
    let out = render(&mut writer)?;

    let re = Regex::new(r#"offset="(\d+)""#).unwrap();
    let mut offsets: Vec<u64> = re
        .captures_iter(&out)
        .map(|c| std::str::from_utf8(&c[1]).unwrap().parse().unwrap())
        .collect();
    // Geometry is registered before the fields. Every payload is a 12 character header
    // followed by the base64 encoded values: points, connectivity, offsets, types, a, b, c.
    offsets.sort_unstable();
    assert_eq!(offsets, vec![0, 172, 260, 296, 312, 332, 400]);

    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("<AppendedData encoding=\"base64\">\n_"));
    Ok(())
}

#[test]
fn raw_output_has_no_declaration() -> Result {
    let grid = ImageGrid::new([1, 0, 0], [0.0; 3], [1.0; 3]);
    let mut writer = PieceWriter::new(GridKind::Image(&grid)).with_options(
        XmlOptions::new()
            .with_encoder(Encoder::Raw)
            .with_compressor(Compressor::None),
    );
    writer.set_cell_field("k", Field::scalars(vec![42u32]))?;
    let out = render(&mut writer)?;
    assert!(out.starts_with(b"<VTKFile"));
    assert!(Regex::new(r#"<AppendedData encoding="raw">\n_"#)
        .unwrap()
        .is_match(&out));

    let piece = PieceFile::parse(&out)?;
    assert_eq!(piece.cell_field("k")?, Field::scalars(vec![42u32]));
    Ok(())
}

#[test]
fn raw_inlined_is_rejected() {
    let grid = ImageGrid::new([1, 0, 0], [0.0; 3], [1.0; 3]);
    let mut writer = PieceWriter::new(GridKind::Image(&grid)).with_options(
        XmlOptions::new()
            .with_encoder(Encoder::Raw)
            .with_data_format(DataFormat::Inlined),
    );
    assert!(matches!(
        render(&mut writer),
        Err(Error::Configuration(_))
    ));
}

#[test]
fn vectors_are_padded_to_three_components() -> Result {
    let grid = ImageGrid::new([1, 0, 0], [0.0; 3], [1.0; 3]);
    let mut writer = PieceWriter::new(GridKind::Image(&grid))
        .with_options(XmlOptions::new().with_compressor(Compressor::None));
    writer.set_point_field("uv", Field::vectors(vec![1.0f32, 2.0, 3.0, 4.0], 2)?)?;
    let out = render(&mut writer)?;
    let piece = PieceFile::parse(&out)?;

    let infos = piece.point_arrays()?;
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].num_components, 3);
    assert_eq!(
        piece.point_field("uv")?,
        Field::new(vec![1.0f32, 2.0, 0.0, 3.0, 4.0, 0.0], FieldShape::Vector(3))?
    );
    Ok(())
}

#[test]
fn rectilinear_coordinates() -> Result {
    let grid = RectilinearGrid::new(vec![0.0, 1.0, 3.0], vec![0.0, 2.0], vec![5.0])?;
    let mut writer = PieceWriter::new(GridKind::Rectilinear(&grid));
    writer.set_cell_field("rho", Field::scalars(vec![0.25f64, 0.75]))?;
    let out = render(&mut writer)?;
    let text = String::from_utf8_lossy(&out);
    assert!(text.contains("<RectilinearGrid WholeExtent=\"0 2 0 1 0 0\">"));
    assert!(text.contains("<Coordinates>"));

    let piece = PieceFile::parse(&out)?;
    assert_eq!(
        piece.points()?,
        vec![
            [0.0, 0.0, 5.0],
            [1.0, 0.0, 5.0],
            [3.0, 0.0, 5.0],
            [0.0, 2.0, 5.0],
            [1.0, 2.0, 5.0],
            [3.0, 2.0, 5.0],
        ]
    );
    assert_eq!(piece.cell_field("rho")?, Field::scalars(vec![0.25f64, 0.75]));
    Ok(())
}

#[test]
fn structured_points_in_single_precision() -> Result {
    let points = vec![
        [0.0, 0.0, 0.0],
        [1.0, 0.1, 0.0],
        [0.0, 1.0, 0.0],
        [1.0, 1.1, 0.0],
    ];
    let grid = StructuredGrid::new([1, 1, 0], points)?;
    let mut writer = PieceWriter::new(GridKind::Structured(&grid)).with_options(
        XmlOptions::new().with_coordinate_precision(ScalarType::F32),
    );
    let out = render(&mut writer)?;
    let text = String::from_utf8_lossy(&out);
    assert!(text.contains(r#"<DataArray type="Float32" Name="Coordinates" NumberOfComponents="3""#));

    let piece = PieceFile::parse(&out)?;
    let read = piece.points()?;
    assert_eq!(read.len(), 4);
    assert_eq!(read[3], [1.0, 1.1f32 as f64, 0.0]);
    Ok(())
}

#[test]
fn field_data_is_written_with_tuple_count() -> Result {
    let grid = two_cells();
    let mut writer = PieceWriter::new(GridKind::Unstructured(&grid))
        .with_options(XmlOptions::new().with_encoder(Encoder::ascii()));
    writer.set_meta_data("TimeValue", Field::scalars(vec![0.5f64]))?;
    let out = render(&mut writer)?;
    let text = String::from_utf8_lossy(&out);
    assert!(text.contains(r#"<FieldData>"#));
    assert!(text.contains(r#"NumberOfTuples="1""#));
    // Field data precedes the piece.
    assert!(text.find("<FieldData>") < text.find("<Piece"));

    let piece = PieceFile::parse(&out)?;
    assert_eq!(piece.meta_data("TimeValue")?, Field::scalars(vec![0.5f64]));
    Ok(())
}

#[test]
fn fields_are_frozen_after_write() -> Result {
    let grid = two_cells();
    let mut writer = PieceWriter::new(GridKind::Unstructured(&grid));
    writer.set_cell_field("id", Field::scalars(vec![1u8, 2]))?;
    render(&mut writer)?;
    assert_eq!(writer.state(), WriterState::Done);
    assert!(matches!(
        writer.set_cell_field("other", Field::scalars(vec![1u8, 2])),
        Err(Error::InvalidState(_))
    ));

    writer.reset();
    assert_eq!(writer.state(), WriterState::Idle);
    writer.set_cell_field("other", Field::scalars(vec![1u8, 2]))?;
    Ok(())
}

#[test]
fn mismatched_field_leaves_no_file() {
    let grid = two_cells();
    let mut writer = PieceWriter::new(GridKind::Unstructured(&grid));
    writer
        .set_point_field("short", Field::scalars(vec![1.0f64; 4]))
        .unwrap();
    let base = tmp_path("mismatched_field");
    let _ = std::fs::remove_file(base.with_extension("vtu"));

    match writer.write(&base) {
        Err(Error::FieldSizeMismatch {
            name,
            expected,
            actual,
        }) => {
            assert_eq!(name, "short");
            assert_eq!(expected, 5);
            assert_eq!(actual, 4);
        }
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(!base.with_extension("vtu").exists());
    assert_eq!(writer.state(), WriterState::Idle);
}

#[test]
fn write_file_and_open() -> Result {
    init();
    let grid = two_cells();
    let mut writer = PieceWriter::new(GridKind::Unstructured(&grid));
    writer.set_point_field("index", Field::scalars(vec![0i32, 1, 2, 3, 4]))?;
    let path = writer.write(tmp_path("two_cells"))?;
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("vtu"));

    let piece = PieceFile::open(&path)?;
    assert_eq!(piece.points()?[4], [1.0, 1.0, 0.0]);
    assert_eq!(
        piece.point_field("index")?,
        Field::scalars(vec![0i32, 1, 2, 3, 4])
    );
    assert!(matches!(
        PieceFile::open(tmp_path("two_cells.vtk")),
        Err(Error::UnknownFileExtension(_))
    ));
    Ok(())
}
