use std::path::{Path, PathBuf};
use std::thread;

use pretty_assertions::assert_eq;

use gridio::grid::{Cell, ImageGrid, UnstructuredGrid};
use gridio::model::{CellType, Extent, Field};
use gridio::parallel::{Communicator, LocalCommunicator, ParallelOutput, ParallelWriter};
use gridio::reader::ParallelFile;
use gridio::{Error, GridKind, PieceWriter};

type Result = std::result::Result<(), Error>;

fn tmp_dir(name: &str) -> PathBuf {
    let dir = Path::new(env!("CARGO_TARGET_TMPDIR")).join(name);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Runs `f` on every rank of a local group and collects the results in rank order.
fn on_ranks<T: Send + 'static>(
    size: usize,
    f: impl Fn(LocalCommunicator) -> T + Send + Sync + Copy + 'static,
) -> Vec<T> {
    let handles: Vec<_> = LocalCommunicator::group(size)
        .into_iter()
        .map(|comm| thread::spawn(move || f(comm)))
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

fn write_quadrant(comm: LocalCommunicator) -> std::result::Result<ParallelOutput, Error> {
    let rank = comm.rank();
    let origin = [5.0 * (rank % 2) as f64, 5.0 * (rank / 2) as f64, 0.0];
    let grid = ImageGrid::new([5, 5, 0], origin, [1.0; 3]);
    let mut writer = ParallelWriter::new(comm, PieceWriter::new(GridKind::Image(&grid)));
    writer.set_point_field("rank", Field::scalars(vec![rank as i32; 36]))?;
    writer.set_cell_field("area", Field::scalars(vec![1.0f64; 25]))?;
    writer.write(tmp_dir("parallel_quadrants").join("image"))
}

#[test]
fn image_quadrants() -> Result {
    let _ = env_logger::builder().is_test(true).try_init();
    let outputs = on_ranks(4, write_quadrant)
        .into_iter()
        .collect::<std::result::Result<Vec<_>, Error>>()?;

    let whole = Extent::from_cells([10, 10, 0]);
    for output in &outputs {
        assert_eq!(output.whole_extent, Some(whole.clone()));
        assert_eq!(output.number_of_points, 121);
        assert_eq!(output.number_of_cells, 100);
        assert_eq!(output.wrapper, outputs[0].wrapper);
    }
    assert_eq!(
        outputs[3].piece.file_name().and_then(|n| n.to_str()),
        Some("image-3.vti")
    );

    let text = std::fs::read_to_string(&outputs[0].wrapper)?;
    assert!(text.contains(r#"<PImageData WholeExtent="0 10 0 10 0 0" GhostLevel="0" Origin="0 0 0" Spacing="1 1 1">"#));

    let wrapper = ParallelFile::open(&outputs[0].wrapper)?;
    assert_eq!(wrapper.whole_extent, Some(whole));
    assert_eq!(wrapper.point_arrays.len(), 1);
    assert_eq!(wrapper.point_arrays[0].name, "rank");
    assert_eq!(wrapper.cell_arrays[0].name, "area");
    let sources: Vec<_> = wrapper.pieces.iter().map(|p| p.source.as_str()).collect();
    assert_eq!(sources, vec!["image-0.vti", "image-1.vti", "image-2.vti", "image-3.vti"]);
    assert_eq!(
        wrapper.pieces[3].extent,
        Some(Extent([5..=10, 5..=10, 0..=0]))
    );

    let piece = wrapper.open_piece(2)?;
    assert_eq!(piece.extent()?, Some(Extent([0..=5, 5..=10, 0..=0])));
    assert_eq!(piece.whole_extent()?, wrapper.whole_extent);
    assert_eq!(piece.point_field("rank")?, Field::scalars(vec![2i32; 36]));
    Ok(())
}

#[test]
fn unstructured_counts_are_summed() -> Result {
    let outputs = on_ranks(2, |comm| {
        let rank = comm.rank();
        let x = rank as f64;
        let mut points = vec![[x, 0.0, 0.0], [x + 1.0, 0.0, 0.0], [x, 1.0, 0.0]];
        let mut cells = vec![Cell::new(CellType::Triangle, vec![0, 1, 2])];
        if rank == 1 {
            points.push([x + 1.0, 1.0, 0.0]);
            cells.push(Cell::new(CellType::Triangle, vec![1, 3, 2]));
        }
        let grid = UnstructuredGrid::new(points, cells)?;
        let mut writer =
            ParallelWriter::new(comm, PieceWriter::new(GridKind::Unstructured(&grid)));
        writer.set_cell_field("owner", Field::scalars(vec![rank as u8; rank + 1]))?;
        writer.write(tmp_dir("parallel_unstructured").join("mesh"))
    })
    .into_iter()
    .collect::<std::result::Result<Vec<_>, Error>>()?;

    assert_eq!(outputs[0].number_of_points, 7);
    assert_eq!(outputs[1].number_of_cells, 3);
    assert_eq!(outputs[0].whole_extent, None);

    let wrapper = ParallelFile::open(&outputs[0].wrapper)?;
    assert_eq!(wrapper.pieces.len(), 2);
    assert_eq!(wrapper.pieces[1].extent, None);
    assert_eq!(
        wrapper.open_piece(1)?.cell_field("owner")?,
        Field::scalars(vec![1u8, 1])
    );
    Ok(())
}

#[test]
fn mismatched_fields_fail_on_every_rank() {
    let base = tmp_dir("parallel_mismatch").join("image");
    let results = on_ranks(2, |comm| {
        let rank = comm.rank();
        let grid = ImageGrid::new([2, 2, 0], [2.0 * rank as f64, 0.0, 0.0], [1.0; 3]);
        let mut writer = ParallelWriter::new(comm, PieceWriter::new(GridKind::Image(&grid)));
        let name = if rank == 0 { "temperature" } else { "pressure" };
        writer.set_point_field(name, Field::scalars(vec![0.0f32; 9]))?;
        writer.write(tmp_dir("parallel_mismatch").join("image"))
    });
    for result in results {
        assert!(matches!(result, Err(Error::CollectiveMismatch(_))));
    }
    assert!(!base.with_extension("pvti").exists());
}

#[test]
fn failed_piece_fails_every_rank() {
    let base = tmp_dir("parallel_failed_piece").join("image");
    let results = on_ranks(3, |comm| {
        let rank = comm.rank();
        let grid = ImageGrid::new([1, 1, 0], [rank as f64, 0.0, 0.0], [1.0; 3]);
        let mut writer = ParallelWriter::new(comm, PieceWriter::new(GridKind::Image(&grid)));
        // Rank 2 has one value too few.
        let len = if rank == 2 { 3 } else { 4 };
        writer.set_point_field("u", Field::scalars(vec![1.0f64; len]))?;
        writer.write(tmp_dir("parallel_failed_piece").join("image"))
    });
    assert!(matches!(results[0], Err(Error::CollectiveMismatch(_))));
    assert!(matches!(results[1], Err(Error::CollectiveMismatch(_))));
    assert!(matches!(results[2], Err(Error::FieldSizeMismatch { .. })));
    assert!(!base.with_extension("pvti").exists());
}

#[test]
fn different_spacings_are_rejected() {
    let results = on_ranks(2, |comm| {
        let rank = comm.rank();
        let spacing = [1.0 + rank as f64, 1.0, 1.0];
        let grid = ImageGrid::new([2, 2, 0], [2.0 * rank as f64, 0.0, 0.0], spacing);
        let mut writer = ParallelWriter::new(comm, PieceWriter::new(GridKind::Image(&grid)));
        writer.write(tmp_dir("parallel_spacing").join("image"))
    });
    for result in results {
        assert!(matches!(result, Err(Error::CollectiveMismatch(_))));
    }
    assert!(!tmp_dir("parallel_spacing").join("image.pvti").exists());
}

#[test]
fn remote_failure_can_be_retried() {
    let dir = tmp_dir("parallel_retry");
    // A directory in place of rank 1's piece makes only that rank fail.
    let _ = std::fs::remove_file(dir.join("image.pvti"));
    let _ = std::fs::remove_file(dir.join("image-1.vti"));
    std::fs::create_dir_all(dir.join("image-1.vti")).unwrap();

    let results = on_ranks(2, |comm| {
        let rank = comm.rank();
        let dir = tmp_dir("parallel_retry");
        let grid = ImageGrid::new([1, 1, 0], [rank as f64, 0.0, 0.0], [1.0; 3]);
        let mut writer = ParallelWriter::new(comm, PieceWriter::new(GridKind::Image(&grid)));
        writer.set_point_field("u", Field::scalars(vec![rank as f32; 4]))?;

        let first = writer.write(dir.join("image"));
        match rank {
            1 => assert!(matches!(first, Err(Error::IO(_)))),
            _ => assert!(matches!(first, Err(Error::CollectiveMismatch(_)))),
        }
        writer.communicator().barrier()?;
        if rank == 1 {
            std::fs::remove_dir(dir.join("image-1.vti"))?;
        }
        writer.communicator().barrier()?;

        // Every rank kept its fields and writes them again.
        writer.write(dir.join("image"))
    });
    let outputs = results
        .into_iter()
        .collect::<std::result::Result<Vec<_>, Error>>()
        .unwrap();

    let wrapper = ParallelFile::open(&outputs[0].wrapper).unwrap();
    assert_eq!(
        wrapper.open_piece(1).unwrap().point_field("u").unwrap(),
        Field::scalars(vec![1.0f32; 4])
    );
}
