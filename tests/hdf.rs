use std::thread;

use pretty_assertions::assert_eq;

use gridio::grid::{Cell, GridAdaptor, ImageGrid, RectilinearGrid, UnstructuredGrid};
use gridio::hdf::{
    Attribute, Container, HdfWriter, MemoryContainer, SharedContainer, TransientReader, ROOT,
};
use gridio::model::{CellType, Field, IOBuffer};
use gridio::parallel::{Communicator, LocalCommunicator};
use gridio::{Error, GridKind};

type Result = std::result::Result<(), Error>;

fn triangle() -> UnstructuredGrid {
    UnstructuredGrid::new(
        vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        vec![Cell::new(CellType::Triangle, vec![0, 1, 2])],
    )
    .unwrap()
}

fn values(container: &impl Container, path: &str) -> std::result::Result<IOBuffer, Error> {
    let rows = container.dataset_info(path)?.map_or(0, |i| i.rows);
    container.read_slice(path, 0..rows)
}

#[test]
fn transient_steps_must_increase() -> Result {
    let _ = env_logger::builder().is_test(true).try_init();
    let grid = triangle();
    let mut writer =
        HdfWriter::new(MemoryContainer::new(), GridKind::Unstructured(&grid)).transient();
    writer.write_step(1.0)?;
    assert!(matches!(writer.write_step(1.0), Err(Error::OutOfOrderWrite(_))));
    assert!(matches!(writer.write_step(0.5), Err(Error::OutOfOrderWrite(_))));
    assert!(matches!(writer.write_step(f64::NAN), Err(Error::OutOfOrderWrite(_))));
    writer.write_step(2.0)?;
    assert_eq!(writer.steps(), 2);

    let container = writer.into_container();
    assert_eq!(
        values(&container, "/VTKHDF/Steps/Values")?,
        IOBuffer::F64(vec![1.0, 2.0])
    );
    assert_eq!(
        container.attribute("/VTKHDF/Steps", "NSteps")?,
        Some(Attribute::Values(IOBuffer::I64(vec![2])))
    );
    Ok(())
}

#[test]
fn foreign_steps_are_rejected() -> Result {
    let grid = triangle();
    let shared = SharedContainer::default();
    let mut first = HdfWriter::new(shared.clone(), GridKind::Unstructured(&grid)).transient();
    first.write_step(0.0)?;

    // A second writer does not know about the step already stored.
    let mut second = HdfWriter::new(shared.clone(), GridKind::Unstructured(&grid)).transient();
    assert!(matches!(second.write_step(1.0), Err(Error::OutOfOrderWrite(_))));
    assert_eq!(
        values(&shared, "/VTKHDF/Steps/Values")?,
        IOBuffer::F64(vec![0.0])
    );
    Ok(())
}

#[test]
fn static_and_transient_modes_are_exclusive() -> Result {
    let grid = triangle();
    let mut fixed = HdfWriter::new(MemoryContainer::new(), GridKind::Unstructured(&grid));
    assert!(matches!(fixed.write_step(0.0), Err(Error::InvalidState(_))));
    fixed.write()?;
    assert!(matches!(fixed.write(), Err(Error::InvalidState(_))));

    let mut transient =
        HdfWriter::new(MemoryContainer::new(), GridKind::Unstructured(&grid)).transient();
    assert!(matches!(transient.write(), Err(Error::InvalidState(_))));
    Ok(())
}

#[test]
fn unsupported_grids_and_sizes() {
    let grid = RectilinearGrid::new(vec![0.0, 1.0], vec![0.0], vec![0.0]).unwrap();
    let mut writer = HdfWriter::new(MemoryContainer::new(), GridKind::Rectilinear(&grid));
    assert!(matches!(writer.write(), Err(Error::Configuration(_))));

    let grid = triangle();
    let mut writer = HdfWriter::new(MemoryContainer::new(), GridKind::Unstructured(&grid));
    writer
        .set_cell_field("bad", Field::scalars(vec![1.0f64, 2.0]))
        .unwrap();
    assert!(matches!(
        writer.write(),
        Err(Error::FieldSizeMismatch { expected: 1, actual: 2, .. })
    ));
    assert!(!writer.container().has_group(ROOT).unwrap());
}

#[test]
fn image_static_layout() -> Result {
    let grid = ImageGrid::new([2, 1, 0], [1.0, 2.0, 3.0], [0.5; 3]);
    let mut writer = HdfWriter::new(MemoryContainer::new(), GridKind::Image(&grid));
    writer.set_point_field("phi", Field::scalars((0..6).map(|i| i as f32).collect::<Vec<_>>()))?;
    writer.set_cell_field("v", Field::vectors(vec![1i32, 2, 3, 4, 5, 6], 3)?)?;
    writer.set_field_data("label", Field::scalars(vec![7u8]))?;
    writer.write()?;
    let container = writer.into_container();

    assert_eq!(
        container.attribute(ROOT, "Type")?,
        Some(Attribute::Text("ImageData".to_string()))
    );
    assert_eq!(
        container.attribute(ROOT, "Version")?,
        Some(Attribute::Values(IOBuffer::I64(vec![2, 0])))
    );
    assert_eq!(
        container.attribute(ROOT, "WholeExtent")?,
        Some(Attribute::Values(IOBuffer::I64(vec![0, 2, 0, 1, 0, 0])))
    );
    assert_eq!(
        container.attribute(ROOT, "Spacing")?,
        Some(Attribute::Values(IOBuffer::F64(vec![0.5; 3])))
    );
    let info = container.dataset_info("/VTKHDF/CellData/v")?.unwrap();
    assert_eq!((info.rows, info.columns), (2, 3));
    assert_eq!(
        values(&container, "/VTKHDF/FieldData/label")?,
        IOBuffer::U8(vec![7])
    );
    assert!(!container.has_group("/VTKHDF/Steps")?);

    let reader = TransientReader::open(&container)?;
    assert_eq!(reader.times(), &[0.0]);
    let step = reader.step(0)?;
    assert_eq!(step.grid, None);
    assert_eq!(step.point_data[0].0, "phi");
    assert_eq!(
        step.point_data[0].1,
        Field::scalars(vec![0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0])
    );
    assert_eq!(step.cell_data[0].1.num_components(), 3);
    Ok(())
}

#[test]
fn ranks_write_parts_at_prefix_offsets() -> Result {
    let shared = SharedContainer::default();
    let handles: Vec<_> = LocalCommunicator::group(3)
        .into_iter()
        .map(|comm| {
            let container = shared.clone();
            thread::spawn(move || -> std::result::Result<(), Error> {
                let rank = comm.rank();
                // Rank 1 contributes an extra triangle.
                let z = rank as f64;
                let mut points = vec![[0.0, 0.0, z], [1.0, 0.0, z], [0.0, 1.0, z]];
                let mut cells = vec![Cell::new(CellType::Triangle, vec![0, 1, 2])];
                if rank == 1 {
                    points.push([1.0, 1.0, 1.0]);
                    cells.push(Cell::new(CellType::Triangle, vec![1, 3, 2]));
                }
                let grid = UnstructuredGrid::new(points, cells)?;
                let num_points = grid.number_of_points();
                let mut writer =
                    HdfWriter::with_communicator(container, comm, GridKind::Unstructured(&grid))
                        .transient();
                for step in 0..2 {
                    let value = (10 * step + rank) as f64;
                    writer.set_point_field("p", Field::scalars(vec![value; num_points]))?;
                    writer.write_step(step as f64)?;
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap()?;
    }

    let container = shared.snapshot()?;
    assert_eq!(
        values(&container, "/VTKHDF/NumberOfPoints")?,
        IOBuffer::I64(vec![3, 4, 3, 3, 4, 3])
    );
    assert_eq!(
        values(&container, "/VTKHDF/Steps/PointOffsets")?,
        IOBuffer::I64(vec![0, 10])
    );
    assert_eq!(
        values(&container, "/VTKHDF/Steps/PartOffsets")?,
        IOBuffer::I64(vec![0, 3])
    );
    assert_eq!(
        values(&container, "/VTKHDF/Steps/ConnectivityIdOffsets")?,
        IOBuffer::I64(vec![0, 12])
    );
    // Each part starts its offsets at zero.
    assert_eq!(
        values(&container, "/VTKHDF/Offsets")?,
        IOBuffer::I64(vec![0, 3, 0, 3, 6, 0, 3, 0, 3, 0, 3, 6, 0, 3])
    );

    let reader = TransientReader::open(&container)?;
    assert_eq!(reader.number_of_steps(), 2);
    let step = reader.step(1)?;
    let grid = step.grid.unwrap();
    assert_eq!(
        grid,
        UnstructuredGrid::new(
            vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
                [1.0, 0.0, 1.0],
                [0.0, 1.0, 1.0],
                [1.0, 1.0, 1.0],
                [0.0, 0.0, 2.0],
                [1.0, 0.0, 2.0],
                [0.0, 1.0, 2.0],
            ],
            vec![
                Cell::new(CellType::Triangle, vec![0, 1, 2]),
                Cell::new(CellType::Triangle, vec![3, 4, 5]),
                Cell::new(CellType::Triangle, vec![4, 6, 5]),
                Cell::new(CellType::Triangle, vec![7, 8, 9]),
            ],
        )?
    );
    assert_eq!(
        step.point_data,
        vec![(
            "p".to_string(),
            Field::scalars(vec![10.0, 10.0, 10.0, 11.0, 11.0, 11.0, 11.0, 12.0, 12.0, 12.0])
        )]
    );
    Ok(())
}

#[test]
fn fields_are_fixed_after_the_first_step() -> Result {
    let grid = triangle();
    let mut writer =
        HdfWriter::new(MemoryContainer::new(), GridKind::Unstructured(&grid)).transient();
    writer.set_point_field("a", Field::scalars(vec![1.0f64; 3]))?;
    writer.write_step(0.0)?;

    writer.set_point_field("b", Field::scalars(vec![1.0f64; 3]))?;
    assert!(matches!(writer.write_step(1.0), Err(Error::Container(_))));
    // The rejected step left the geometry untouched.
    let info = writer.container().dataset_info("/VTKHDF/Points")?.unwrap();
    assert_eq!(info.rows, 3);
    Ok(())
}
