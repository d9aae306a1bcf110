//! Integration tests for opening and streaming grid sources.

use std::fs;

use grid_source::{detect_format, open, OpenOptions, SourceError};
use projection::Crs;
use test_utils::{
    assert_coords_approx_eq, create_test_grid, snodas_cells, snodas_description, two_by_two, write_prism_series,
    write_prj, write_tar, write_world_file, AsciiGrid, CONUS_ALBERS_PRJ, NAD83_PRJ, WGS84_PRJ,
};

#[test]
fn test_open_single_ascii_grid() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_by_two().write(dir.path(), "grid.asc");
    write_prj(&path, WGS84_PRJ);

    let mut dataset = open(&path, &OpenOptions::default()).unwrap();
    assert_eq!(dataset.format(), "esri-ascii");
    assert_eq!(dataset.crs().epsg_code(), Some(4326));
    assert_eq!(dataset.nodata(), -9999.0);
    assert_eq!(dataset.layer_count(), 1);
    assert_eq!(dataset.layer_infos()[0].label, "grid");

    let geometry = *dataset.geometry();
    assert_eq!((geometry.rows, geometry.cols), (2, 2));
    assert_coords_approx_eq!(geometry.cell_center(0, 0), (0.5, 1.5), 1e-12);

    let layers: Vec<_> = dataset.layers().collect::<Result<_, _>>().unwrap();
    assert_eq!(layers.len(), 1);
    assert_eq!(layers[0].values, vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(layers[0].value(1, 0), Some(3.0));
    assert_eq!(layers[0].value(2, 0), None);
}

#[test]
fn test_row_major_values_top_row_first() {
    let dir = tempfile::tempdir().unwrap();
    let path = AsciiGrid::new(4, 3, 0.0, 0.0, 1.0, create_test_grid(4, 3)).write(dir.path(), "ramp.asc");
    write_prj(&path, WGS84_PRJ);

    let mut dataset = open(&path, &OpenOptions::default()).unwrap();
    let layer = dataset.layers().next().unwrap().unwrap();
    for row in 0..3 {
        for col in 0..4 {
            assert_eq!(layer.value(row, col), Some((col * 1000 + row) as f64));
        }
    }
}

#[test]
fn test_open_gzip_grid() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_by_two().write_gz(dir.path(), "grid.asc.gz");
    write_prj(&path, NAD83_PRJ);

    assert_eq!(detect_format(&path), Some("esri-ascii"));
    let mut dataset = open(&path, &OpenOptions::default()).unwrap();
    assert_eq!(dataset.crs().epsg_code(), Some(4269));
    let layer = dataset.layers().next().unwrap().unwrap();
    assert_eq!(layer.values, vec![1.0, 2.0, 3.0, 4.0]);
}

#[test]
fn test_missing_prj_fails_without_override() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_by_two().write(dir.path(), "grid.asc");

    let err = open(&path, &OpenOptions::default()).unwrap_err();
    assert!(matches!(err, SourceError::MissingSpatialReference(_)));

    let options = OpenOptions::default().with_source_crs(Crs::parse("EPSG:4326").unwrap());
    let dataset = open(&path, &options).unwrap();
    assert_eq!(dataset.crs().epsg_code(), Some(4326));
}

#[test]
fn test_projected_prj() {
    let dir = tempfile::tempdir().unwrap();
    let grid = AsciiGrid::new(2, 1, -100_000.0, 200_000.0, 4000.0, vec![1.0, 2.0]);
    let path = grid.write(dir.path(), "albers.asc");
    write_prj(&path, CONUS_ALBERS_PRJ);

    let dataset = open(&path, &OpenOptions::default()).unwrap();
    assert_eq!(dataset.crs().epsg_code(), Some(5070));
}

#[test]
fn test_world_file_overrides_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_by_two().write(dir.path(), "grid.asc");
    write_prj(&path, WGS84_PRJ);
    write_world_file(&path, [0.5, 0.0, 0.0, -0.5, 10.25, 20.75]);

    let dataset = open(&path, &OpenOptions::default()).unwrap();
    assert_coords_approx_eq!(dataset.geometry().cell_center(0, 0), (10.25, 20.75), 1e-12);
    assert_coords_approx_eq!(dataset.geometry().cell_center(1, 1), (10.75, 20.25), 1e-12);
}

#[test]
fn test_prism_directory_streams_in_name_order() {
    let dir = tempfile::tempdir().unwrap();
    // Written out of order; the reader sorts by file name
    write_prism_series(dir.path(), "ppt", &["20170103", "20170101", "20170102"], &two_by_two());
    fs::write(dir.path().join("README.txt"), "not a grid").unwrap();

    assert_eq!(detect_format(dir.path()), Some("grid-directory"));
    let mut dataset = open(dir.path(), &OpenOptions::default()).unwrap();
    assert_eq!(dataset.units(), Some("mm"));

    let labels: Vec<&str> = dataset.layer_infos().iter().map(|l| l.label.as_str()).collect();
    assert_eq!(labels, vec!["2017-01-01", "2017-01-02", "2017-01-03"]);

    let firsts: Vec<f64> = dataset
        .layers()
        .map(|l| l.unwrap().values[0])
        .collect();
    // write order offsets: 0103 -> +0, 0101 -> +10, 0102 -> +20
    assert_eq!(firsts, vec![11.0, 21.0, 1.0]);
}

#[test]
fn test_stream_is_forward_only() {
    let dir = tempfile::tempdir().unwrap();
    write_prism_series(dir.path(), "tmean", &["20200101", "20200102", "20200103"], &two_by_two());
    let mut dataset = open(dir.path(), &OpenOptions::default()).unwrap();

    let selected: Vec<_> = dataset.select_layers(&[2, 0]).map(|l| l.unwrap().info.label).collect();
    assert_eq!(selected, vec!["2020-01-01", "2020-01-03"]);

    assert_eq!(dataset.layers().count(), 0);
    let mut stream = dataset.select_layers(&[1]);
    assert!(matches!(stream.next(), Some(Err(SourceError::Exhausted(1)))));
}

#[test]
fn test_inconsistent_layer_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let a = two_by_two().write(dir.path(), "a_20200101.asc");
    write_prj(&a, WGS84_PRJ);
    AsciiGrid::new(3, 1, 0.0, 0.0, 1.0, vec![1.0, 2.0, 3.0]).write(dir.path(), "b_20200102.asc");

    let mut dataset = open(dir.path(), &OpenOptions::default()).unwrap();
    let results: Vec<_> = dataset.layers().collect();
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(SourceError::InconsistentGeometry { .. })));
}

#[test]
fn test_tar_archive_with_gzip_entries() {
    let dir = tempfile::tempdir().unwrap();
    let plain = two_by_two().render();
    let staging = tempfile::tempdir().unwrap();
    let gz_path = AsciiGrid::new(2, 2, 0.0, 0.0, 1.0, vec![5.0, 6.0, 7.0, 8.0])
        .with_nodata(-9999.0)
        .write_gz(staging.path(), "b.asc.gz");
    let gz_bytes = fs::read(gz_path).unwrap();

    let tar = write_tar(
        dir.path(),
        "grids.tar",
        &[
            ("grids/a_2021010100.asc", plain.as_bytes()),
            ("grids/notes.txt", b"ignored".as_slice()),
            ("grids/a_2021010100.prj", WGS84_PRJ.as_bytes()),
            ("grids/b_2021010106.asc.gz", gz_bytes.as_slice()),
        ],
    );

    assert_eq!(detect_format(&tar), Some("grid-tar"));
    let mut dataset = open(&tar, &OpenOptions::default()).unwrap();
    assert_eq!(dataset.crs().epsg_code(), Some(4326));
    assert_eq!(dataset.layer_count(), 2);
    assert_eq!(dataset.layer_infos()[1].label, "2021-01-01T06:00");

    let layers: Vec<_> = dataset.layers().collect::<Result<_, _>>().unwrap();
    assert_eq!(layers[0].values, vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(layers[1].values, vec![5.0, 6.0, 7.0, 8.0]);
}

const SWE: &str = "us_ssmv11034tS__T0001TTNATS2014010105HP001";
const LIQUID: &str = "us_ssmv01025SlL00T0024TTNATS2014010105DP001";

/// Daily SNODAS archive holding SWE and liquid precipitation on a 3x2 grid.
fn snodas_tar(dir: &std::path::Path) -> std::path::PathBuf {
    let description = snodas_description(3, 2, -100.0, 40.0, 0.5);
    let swe = snodas_cells(&[1500, -9999, 250, 0, 1000, 2000]);
    let rain = snodas_cells(&[10, 20, 30, -9999, 0, 5]);
    let names: Vec<String> = [SWE, LIQUID]
        .iter()
        .flat_map(|stem| [format!("{}.dat.gz", stem), format!("{}.txt.gz", stem)])
        .collect();
    write_tar(
        dir,
        "SNODAS_20140101.tar",
        &[
            (names[0].as_str(), swe.as_slice()),
            (names[1].as_str(), description.as_slice()),
            (names[2].as_str(), rain.as_slice()),
            (names[3].as_str(), description.as_slice()),
        ],
    )
}

#[test]
fn test_snodas_archive_defaults_to_swe() {
    let dir = tempfile::tempdir().unwrap();
    let tar = snodas_tar(dir.path());

    assert_eq!(detect_format(&tar), Some("snodas-tar"));
    let mut dataset = open(&tar, &OpenOptions::default()).unwrap();
    assert_eq!(dataset.format(), "snodas-tar");
    assert_eq!(dataset.crs().epsg_code(), Some(4326));
    assert_eq!(dataset.nodata(), -9999.0);
    assert_eq!(dataset.layer_count(), 1);
    assert_coords_approx_eq!(dataset.geometry().cell_center(0, 0), (-99.75, 39.75), 1e-12);
    assert_coords_approx_eq!(dataset.geometry().cell_center(1, 2), (-98.75, 39.25), 1e-12);

    let info = &dataset.layer_infos()[0];
    assert_eq!(info.label, "2014-01-01");
    assert_eq!(info.variable.as_deref(), Some("SWE"));
    assert_eq!(info.units.as_deref(), Some("m"));
    assert_eq!(info.source_name, format!("{}.dat.gz", SWE));
    assert_eq!(info.interval(), Some(chrono::Duration::hours(1)));

    let layers: Vec<_> = dataset.layers().collect::<Result<_, _>>().unwrap();
    assert_eq!(layers[0].values, vec![1.5, -9999.0, 0.25, 0.0, 1.0, 2.0]);
}

#[test]
fn test_snodas_variable_selection() {
    let dir = tempfile::tempdir().unwrap();
    let tar = snodas_tar(dir.path());

    let options = OpenOptions::default().with_variable("liquid precipitation");
    let mut dataset = open(&tar, &options).unwrap();
    let info = dataset.layer_infos()[0].clone();
    assert_eq!(info.variable.as_deref(), Some("Liquid Precipitation"));
    assert_eq!(info.units.as_deref(), Some("kg/m2"));
    assert_eq!(info.interval(), Some(chrono::Duration::hours(24)));
    assert_eq!(info.label, "2014-01-01");
    let layers: Vec<_> = dataset.layers().collect::<Result<_, _>>().unwrap();
    assert_eq!(layers[0].values, vec![1.0, 2.0, 3.0, -9999.0, 0.0, 0.5]);

    let err = open(&tar, &OpenOptions::default().with_variable("Snow Depth")).unwrap_err();
    match err {
        SourceError::UnknownVariable { variable, available } => {
            assert_eq!(variable, "Snow Depth");
            assert_eq!(available, vec!["SWE", "Liquid Precipitation"]);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_daily_grid_covers_one_day() {
    let dir = tempfile::tempdir().unwrap();
    let grid = two_by_two();
    write_prism_series(dir.path(), "ppt", &["20170101"], &grid);
    let dataset = open(dir.path(), &OpenOptions::default()).unwrap();
    assert_eq!(dataset.layer_infos()[0].interval(), Some(chrono::Duration::days(1)));
}

#[test]
fn test_layer_nodata_normalised_to_dataset_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let a = two_by_two().write(dir.path(), "a.asc");
    write_prj(&a, WGS84_PRJ);
    AsciiGrid::new(2, 2, 0.0, 0.0, 1.0, vec![-1.0, 2.0, 3.0, 4.0])
        .with_nodata(-1.0)
        .write(dir.path(), "b.asc");

    let mut dataset = open(dir.path(), &OpenOptions::default()).unwrap();
    let layers: Vec<_> = dataset.layers().collect::<Result<_, _>>().unwrap();
    assert_eq!(layers[1].values[0], -9999.0);
}

#[test]
fn test_unrecognised_and_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.json");
    fs::write(&path, "{}").unwrap();
    assert!(matches!(
        open(&path, &OpenOptions::default()),
        Err(SourceError::Unrecognized(_))
    ));
    assert!(matches!(
        open(&dir.path().join("nope.asc"), &OpenOptions::default()),
        Err(SourceError::NotFound(_))
    ));
}

#[test]
fn test_close_releases_reader() {
    let dir = tempfile::tempdir().unwrap();
    let path = two_by_two().write(dir.path(), "grid.asc");
    write_prj(&path, WGS84_PRJ);
    let mut dataset = open(&path, &OpenOptions::default()).unwrap();
    dataset.close();
    assert_eq!(dataset.layers().count(), 0);
    assert_eq!(dataset.summary().layers.len(), 1);
}
