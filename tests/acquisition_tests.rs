//! Integration tests for hydrobuf
//!
//! These build real source trees and buffer files under temp directories
//! and exercise discovery, acquisition, and buffer merging end to end.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use flate2::{write::GzEncoder, Compression};
use hydrobuf::{
    buffer_store::BufferStore,
    container::{Container, GridContainer, GridCoords, SeriesContainer, VarAttributes},
    dataset_time::{DatasetTimeFinder, DatasetTimeMap},
    descriptor::{DataKind, Dimensionality, EnsembleSpec, VariableDescriptor},
    readers::read_grid,
    time_window::{TimeWindow, TimeWindowSpec, WindowSpec},
    VariableAcquirer,
};
use ndarray::{ArrayD, IxDyn};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

/// Route warnings into the test harness output; safe to call repeatedly.
fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, mo, d)
        .unwrap()
        .and_hms_opt(h, mi, 0)
        .unwrap()
}

fn epoch_secs(t: NaiveDateTime) -> f64 {
    t.and_utc().timestamp() as f64
}

fn sample_series(name: &str, times: Vec<NaiveDateTime>, values: Vec<f64>) -> Container {
    Container::Series(
        SeriesContainer::single(name, times, values, VarAttributes::default()).unwrap(),
    )
}

fn sample_grid(times: Vec<NaiveDateTime>, frames: &[[f32; 2]]) -> Container {
    let flat: Vec<f32> = frames.iter().flat_map(|f| f.iter().copied()).collect();
    let data = ArrayD::from_shape_vec(IxDyn(&[times.len(), 1, 2]), flat).unwrap();
    let coords = GridCoords {
        x: vec![10.0, 20.0],
        y: vec![45.0],
        levels: None,
    };
    let attrs = VarAttributes {
        units: Some("mm".to_string()),
        scale_factor: None,
        fill_value: Some(-9999.0),
        valid_range: Some((0.0, 500.0)),
    };
    Container::Grid(GridContainer::new(times, data, coords, attrs).unwrap())
}

/// Write a single-frame (no time axis) gridded NetCDF source.
fn write_grid_source(path: &Path, var_name: &str, values: [f32; 2]) {
    let mut file = netcdf::create(path).unwrap();
    file.add_dimension("y", 1).unwrap();
    file.add_dimension("x", 2).unwrap();

    let mut var = file.add_variable::<f32>(var_name, &["y", "x"]).unwrap();
    var.put_attribute("units", "mm").unwrap();
    var.put_values(&values, ..).unwrap();

    let mut x = file.add_variable::<f64>("x", &["x"]).unwrap();
    x.put_values(&[10.0, 20.0], ..).unwrap();
    let mut y = file.add_variable::<f64>("y", &["y"]).unwrap();
    y.put_values(&[45.0], ..).unwrap();
}

/// Write a time-stacked gridded NetCDF source (one frame per timestamp).
fn write_forecast_source(path: &Path, var_name: &str, times: &[NaiveDateTime], frames: &[[f32; 2]]) {
    let mut file = netcdf::create(path).unwrap();
    file.add_dimension("time", times.len()).unwrap();
    file.add_dimension("y", 1).unwrap();
    file.add_dimension("x", 2).unwrap();

    let mut time_var = file.add_variable::<f64>("time", &["time"]).unwrap();
    time_var
        .put_attribute("units", "seconds since 1970-01-01 00:00:00")
        .unwrap();
    let encoded: Vec<f64> = times.iter().map(|t| epoch_secs(*t)).collect();
    time_var.put_values(&encoded, ..).unwrap();

    let flat: Vec<f32> = frames.iter().flat_map(|f| f.iter().copied()).collect();
    let mut var = file
        .add_variable::<f32>(var_name, &["time", "y", "x"])
        .unwrap();
    var.put_values(&flat, ..).unwrap();
}

#[test]
fn test_buffer_series_round_trip() {
    let dir = tempdir().unwrap();
    let store = BufferStore::new(dir.path());

    let t1 = ts(2021, 4, 7, 22, 0);
    let t2 = ts(2021, 4, 7, 23, 0);
    let container = sample_series("q", vec![t1, t2], vec![1.5, 2.5]);

    store.write("q", 0, &[], &container).unwrap();
    let back = store.read("q", 0).unwrap().expect("chunk should exist");

    let series = back.as_series().expect("series container");
    assert_eq!(series.times(), &[t1, t2]);
    assert_eq!(series.column("q").unwrap(), &[1.5, 2.5]);
}

#[test]
fn test_buffer_grid_round_trip_with_metadata() {
    let dir = tempdir().unwrap();
    let store = BufferStore::new(dir.path());

    let t1 = ts(2021, 4, 7, 22, 0);
    let t2 = ts(2021, 4, 7, 23, 0);
    let container = sample_grid(vec![t1, t2], &[[1.0, 2.0], [3.0, 4.0]]);

    store.write("rain", 0, &[t1, t2], &container).unwrap();
    let back = store.read("rain", 0).unwrap().expect("chunk should exist");

    let grid = back.as_grid().expect("grid container");
    assert_eq!(grid.times(), &[t1, t2]);
    assert_eq!(grid.frame(0)[[0, 0]], 1.0);
    assert_eq!(grid.frame(1)[[0, 1]], 4.0);
    assert_eq!(grid.coords.x, vec![10.0, 20.0]);
    assert_eq!(grid.coords.y, vec![45.0]);
    assert_eq!(grid.attrs.units.as_deref(), Some("mm"));
    assert_eq!(grid.attrs.valid_range, Some((0.0, 500.0)));
}

#[test]
fn test_buffer_write_is_idempotent() {
    let dir = tempdir().unwrap();
    let store = BufferStore::new(dir.path());

    let t1 = ts(2021, 4, 7, 22, 0);
    let t2 = ts(2021, 4, 7, 23, 0);
    let container = sample_series("q", vec![t1, t2], vec![1.5, 2.5]);

    store.write("q", 0, &[], &container).unwrap();
    let once = store.read("q", 0).unwrap().unwrap();

    store.write("q", 0, &[], &container).unwrap();
    let twice = store.read("q", 0).unwrap().unwrap();

    assert_eq!(once, twice);
}

#[test]
fn test_buffer_disjoint_writes_union() {
    let dir = tempdir().unwrap();
    let store = BufferStore::new(dir.path());

    let t1 = ts(2021, 4, 7, 22, 0);
    let t2 = ts(2021, 4, 7, 23, 0);
    let t3 = ts(2021, 4, 8, 0, 0);

    store
        .write("q", 0, &[], &sample_series("q", vec![t1], vec![1.0]))
        .unwrap();
    store
        .write("q", 0, &[], &sample_series("q", vec![t2, t3], vec![2.0, 3.0]))
        .unwrap();

    let back = store.read("q", 0).unwrap().unwrap();
    let series = back.as_series().unwrap();
    assert_eq!(series.times(), &[t1, t2, t3]);
    assert_eq!(series.column("q").unwrap(), &[1.0, 2.0, 3.0]);
}

#[test]
fn test_buffer_grid_merge_fills_placeholder() {
    let dir = tempdir().unwrap();
    let store = BufferStore::new(dir.path());

    let t1 = ts(2021, 4, 7, 22, 0);
    let t2 = ts(2021, 4, 7, 23, 0);
    let t3 = ts(2021, 4, 8, 0, 0);
    let expected = [t1, t2, t3];

    // First pass: only t1 and t3 were readable; t2 becomes a NaN frame.
    let first = sample_grid(vec![t1, t3], &[[1.0, 1.0], [3.0, 3.0]]);
    store.write("rain", 0, &expected, &first).unwrap();

    let after_first = store.read("rain", 0).unwrap().unwrap();
    let grid = after_first.as_grid().unwrap();
    assert_eq!(grid.len(), 3);
    assert!(grid.frame(1)[[0, 0]].is_nan());

    // Second pass supplies real data for t2 only.
    let second = sample_grid(vec![t2], &[[2.0, 2.0]]);
    store.write("rain", 0, &expected, &second).unwrap();

    let merged = store.read("rain", 0).unwrap().unwrap();
    let grid = merged.as_grid().unwrap();
    assert_eq!(grid.frame(0)[[0, 0]], 1.0); // from disk
    assert_eq!(grid.frame(1)[[0, 0]], 2.0); // from fresh read
    assert_eq!(grid.frame(2)[[0, 0]], 3.0); // from disk
}

#[test]
fn test_buffer_read_missing_is_none() {
    let dir = tempdir().unwrap();
    let store = BufferStore::new(dir.path());

    // Missing file.
    assert!(store.read("q", 7).unwrap().is_none());

    // Existing file, missing group.
    let t1 = ts(2021, 4, 7, 22, 0);
    store
        .write("a", 0, &[], &sample_series("a", vec![t1], vec![1.0]))
        .unwrap();
    assert!(store.read("b", 0).unwrap().is_none());
    assert_eq!(store.variables(0).unwrap(), vec!["a".to_string()]);
}

#[test]
fn test_buffer_groups_are_independent() {
    let dir = tempdir().unwrap();
    let store = BufferStore::new(dir.path());

    let t1 = ts(2021, 4, 7, 22, 0);
    store
        .write("a", 0, &[], &sample_series("a", vec![t1], vec![1.0]))
        .unwrap();
    store
        .write("b", 0, &[t1], &sample_grid(vec![t1], &[[5.0, 6.0]]))
        .unwrap();

    // Appending group "b" must not disturb group "a".
    let a = store.read("a", 0).unwrap().unwrap();
    assert_eq!(a.as_series().unwrap().column("a").unwrap(), &[1.0]);
    let b = store.read("b", 0).unwrap().unwrap();
    assert_eq!(b.as_grid().unwrap().frame(0)[[0, 1]], 6.0);
}

#[test]
fn test_finder_selects_most_recent_with_data() {
    let dir = tempdir().unwrap();
    let template = format!("{}/obs_$yyyy$mm$dd$HH$MM.txt", dir.path().display());

    // Files at 21:00 and 23:00, nothing at 22:00.
    fs::write(dir.path().join("obs_202104072100.txt"), "1.0\n").unwrap();
    fs::write(dir.path().join("obs_202104072300.txt"), "2.0\n").unwrap();

    let descriptor =
        VariableDescriptor::new("rain_obs", Dimensionality::Point, DataKind::Observed, template);
    let finder = DatasetTimeFinder::new(4, Duration::hours(1));
    let mut map = DatasetTimeMap::new();

    let found = finder
        .find(&mut map, &descriptor, ts(2021, 4, 7, 23, 0))
        .unwrap();
    assert_eq!(found, Some(ts(2021, 4, 7, 23, 0)));
    assert_eq!(map.reference_time("rain_obs"), Some(ts(2021, 4, 7, 23, 0)));
}

#[test]
fn test_finder_second_call_served_from_map() {
    let dir = tempdir().unwrap();
    let template = format!("{}/obs_$yyyy$mm$dd$HH$MM.txt", dir.path().display());
    let file = dir.path().join("obs_202104072300.txt");
    fs::write(&file, "2.0\n").unwrap();

    let descriptor =
        VariableDescriptor::new("rain_obs", Dimensionality::Point, DataKind::Observed, template);
    let finder = DatasetTimeFinder::new(4, Duration::hours(1));
    let mut map = DatasetTimeMap::new();

    let first = finder
        .find(&mut map, &descriptor, ts(2021, 4, 7, 23, 0))
        .unwrap();

    // Remove the file: a second call must not rescan the file system.
    fs::remove_file(&file).unwrap();
    let second = finder
        .find(&mut map, &descriptor, ts(2021, 4, 7, 23, 0))
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(second, Some(ts(2021, 4, 7, 23, 0)));
}

#[test]
fn test_finder_total_absence_is_none() {
    let dir = tempdir().unwrap();
    let template = format!("{}/obs_$yyyy$mm$dd$HH$MM.txt", dir.path().display());

    let descriptor =
        VariableDescriptor::new("rain_obs", Dimensionality::Point, DataKind::Observed, template);
    let finder = DatasetTimeFinder::new(4, Duration::hours(1));
    let mut map = DatasetTimeMap::new();

    let found = finder
        .find(&mut map, &descriptor, ts(2021, 4, 7, 23, 0))
        .unwrap();
    assert_eq!(found, None);
    assert!(map.get("rain_obs").is_none());
}

#[test]
fn test_finder_requires_ancillary_companion() {
    let dir = tempdir().unwrap();
    let src = format!("{}/fc_$yyyy$mm$dd$HH$MM.nc", dir.path().display());
    let anc = format!("{}/obs_$yyyy$mm$dd$HH$MM.nc", dir.path().display());

    // Forecast issues at 22:00 and 23:00, but the observed companion only
    // exists at 22:00: the fully populated row at 22:00 wins.
    fs::write(dir.path().join("fc_202104072200.nc"), "x").unwrap();
    fs::write(dir.path().join("fc_202104072300.nc"), "x").unwrap();
    fs::write(dir.path().join("obs_202104072200.nc"), "x").unwrap();

    let descriptor =
        VariableDescriptor::new("rain_fc", Dimensionality::Grid2d, DataKind::Forecast, src)
            .with_ancillary(anc, DataKind::Observed);
    let finder = DatasetTimeFinder::new(4, Duration::hours(1));
    let mut map = DatasetTimeMap::new();

    let found = finder
        .find(&mut map, &descriptor, ts(2021, 4, 7, 23, 0))
        .unwrap();
    assert_eq!(found, Some(ts(2021, 4, 7, 22, 0)));
}

#[test]
fn test_finder_forecast_not_after_observed() {
    let dir = tempdir().unwrap();
    let src = format!("{}/fc_$yyyy$mm$dd$HH$MM.nc", dir.path().display());
    let anc = format!("{}/obs_$yyyy$mm$dd$HH$MM.nc", dir.path().display());

    // Observed companion at 23:00, forecast issue only at 22:00: no fully
    // populated row exists, and the partial fallback keeps the forecast at
    // 22:00 (before its paired observed column).
    fs::write(dir.path().join("obs_202104072300.nc"), "x").unwrap();
    fs::write(dir.path().join("fc_202104072200.nc"), "x").unwrap();

    let descriptor =
        VariableDescriptor::new("rain_fc", Dimensionality::Grid2d, DataKind::Forecast, src)
            .with_ancillary(anc, DataKind::Observed);
    let finder = DatasetTimeFinder::new(4, Duration::hours(1));
    let mut map = DatasetTimeMap::new();

    let found = finder
        .find(&mut map, &descriptor, ts(2021, 4, 7, 23, 0))
        .unwrap();
    assert_eq!(found, Some(ts(2021, 4, 7, 22, 0)));
}

#[test]
fn test_dataset_time_map_save_load() {
    let dir = tempdir().unwrap();
    let template = format!("{}/obs_$yyyy$mm$dd$HH$MM.txt", dir.path().display());
    fs::write(dir.path().join("obs_202104072300.txt"), "2.0\n").unwrap();

    let descriptor =
        VariableDescriptor::new("rain_obs", Dimensionality::Point, DataKind::Observed, template);
    let finder = DatasetTimeFinder::new(4, Duration::hours(1));
    let mut map = DatasetTimeMap::new();
    finder
        .find(&mut map, &descriptor, ts(2021, 4, 7, 23, 0))
        .unwrap();

    let artifact = dir.path().join("state").join("dataset_times.json");
    map.save(&artifact).unwrap();

    let loaded = DatasetTimeMap::load(&artifact).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded.reference_time("rain_obs"), Some(ts(2021, 4, 7, 23, 0)));
    // Loaded entries are unresolved until re-verified by a scan.
    assert!(!loaded.get("rain_obs").unwrap().resolved);
}

#[test]
fn test_acquire_observed_grid_with_gap() {
    init_logging();
    let src_dir = tempdir().unwrap();
    let buf_dir = tempdir().unwrap();

    // Sources at 21:00, 22:00 and 00:00; 23:00 is missing.
    write_grid_source(&src_dir.path().join("rain_202104072100.nc"), "rain", [1.0, 1.5]);
    write_grid_source(&src_dir.path().join("rain_202104072200.nc"), "rain", [2.0, 2.5]);
    write_grid_source(&src_dir.path().join("rain_202104080000.nc"), "rain", [4.0, 4.5]);

    let template = format!("{}/rain_$yyyy$mm$dd$HH$MM.nc", src_dir.path().display());
    let descriptor =
        VariableDescriptor::new("rain_obs", Dimensionality::Grid2d, DataKind::Observed, template)
            .with_source_name("rain");

    let window = TimeWindow::resolve(
        ts(2021, 4, 8, 0, 0),
        &TimeWindowSpec {
            observed: Some(WindowSpec::hourly(4)),
            forecast: None,
            extra: None,
        },
    )
    .unwrap();

    let store = BufferStore::new(buf_dir.path());
    let finder = DatasetTimeFinder::new(6, Duration::hours(1));
    let acquirer = VariableAcquirer::new(&store, finder, 2);
    let mut map = DatasetTimeMap::new();

    acquirer.acquire(&descriptor, &window, &mut map).unwrap();

    // Chunk 0 covers 21:00 and 22:00.
    let chunk0 = store.read("rain_obs", 0).unwrap().unwrap();
    let grid = chunk0.as_grid().unwrap();
    assert_eq!(grid.times(), &[ts(2021, 4, 7, 21, 0), ts(2021, 4, 7, 22, 0)]);
    assert_eq!(grid.frame(0)[[0, 0]], 1.0);
    assert_eq!(grid.frame(1)[[0, 1]], 2.5);
    assert_eq!(grid.coords.x, vec![10.0, 20.0]);

    // Chunk 1 covers 23:00 (missing, NaN) and 00:00.
    let chunk1 = store.read("rain_obs", 1).unwrap().unwrap();
    let grid = chunk1.as_grid().unwrap();
    assert!(grid.frame(0)[[0, 0]].is_nan());
    assert_eq!(grid.frame(1)[[0, 0]], 4.0);

    // Discovery recorded the run anchor as the reference timestamp.
    assert_eq!(map.reference_time("rain_obs"), Some(ts(2021, 4, 8, 0, 0)));
}

#[test]
fn test_acquire_point_ensemble_fan_out() {
    let src_dir = tempdir().unwrap();
    let buf_dir = tempdir().unwrap();

    fs::write(src_dir.path().join("q_001_2200.txt"), "1.5\n").unwrap();
    fs::write(src_dir.path().join("q_002_2200.txt"), "2.5\n").unwrap();
    fs::write(src_dir.path().join("q_001_2300.txt"), "1.6\n").unwrap();
    fs::write(src_dir.path().join("q_002_2300.txt"), "2.6\n").unwrap();

    let template = format!("{}/q_$ensemble_$HH$MM.txt", src_dir.path().display());
    let descriptor =
        VariableDescriptor::new("q_sim", Dimensionality::Point, DataKind::Observed, template)
            .with_ensemble(EnsembleSpec {
                start: 1,
                count: 2,
                width: 3,
            });

    let window = TimeWindow::resolve(
        ts(2021, 4, 7, 23, 0),
        &TimeWindowSpec {
            observed: Some(WindowSpec::hourly(2)),
            forecast: None,
            extra: None,
        },
    )
    .unwrap();

    let store = BufferStore::new(buf_dir.path());
    let finder = DatasetTimeFinder::new(4, Duration::hours(1));
    let acquirer = VariableAcquirer::new(&store, finder, 10);
    let mut map = DatasetTimeMap::new();

    acquirer.acquire(&descriptor, &window, &mut map).unwrap();

    // Each member lands in its own independently named group.
    let m1 = store.read("q_sim_001", 0).unwrap().unwrap();
    assert_eq!(
        m1.as_series().unwrap().column("q_sim_001").unwrap(),
        &[1.5, 1.6]
    );
    let m2 = store.read("q_sim_002", 0).unwrap().unwrap();
    assert_eq!(
        m2.as_series().unwrap().column("q_sim_002").unwrap(),
        &[2.5, 2.6]
    );
}

#[test]
fn test_acquire_point_multi_column_source() {
    let src_dir = tempdir().unwrap();
    let buf_dir = tempdir().unwrap();

    // Two whitespace-separated columns per line.
    fs::write(src_dir.path().join("q_2200.txt"), "1.0 9.0\n").unwrap();
    fs::write(src_dir.path().join("q_2300.txt"), "2.0 8.0\n").unwrap();

    let template = format!("{}/q_$HH$MM.txt", src_dir.path().display());
    let descriptor =
        VariableDescriptor::new("q_obs", Dimensionality::Point, DataKind::Observed, template);

    let window = TimeWindow::resolve(
        ts(2021, 4, 7, 23, 0),
        &TimeWindowSpec {
            observed: Some(WindowSpec::hourly(2)),
            forecast: None,
            extra: None,
        },
    )
    .unwrap();

    let store = BufferStore::new(buf_dir.path());
    let acquirer =
        VariableAcquirer::new(&store, DatasetTimeFinder::new(4, Duration::hours(1)), 10);
    let mut map = DatasetTimeMap::new();

    acquirer.acquire(&descriptor, &window, &mut map).unwrap();

    // Every column of the source survives into the buffer.
    let back = store.read("q_obs", 0).unwrap().unwrap();
    let series = back.as_series().unwrap();
    assert_eq!(series.column("q_obs_1").unwrap(), &[1.0, 2.0]);
    assert_eq!(series.column("q_obs_2").unwrap(), &[9.0, 8.0]);
}

#[test]
fn test_acquire_point_gzip_source() {
    let src_dir = tempdir().unwrap();
    let buf_dir = tempdir().unwrap();

    let gz_path = src_dir.path().join("q_2300.txt.gz");
    let mut encoder = GzEncoder::new(fs::File::create(&gz_path).unwrap(), Compression::default());
    encoder.write_all(b"7.25\n").unwrap();
    encoder.finish().unwrap();

    let template = format!("{}/q_$HH$MM.txt.gz", src_dir.path().display());
    let descriptor =
        VariableDescriptor::new("q_obs", Dimensionality::Point, DataKind::Observed, template);

    let window = TimeWindow::resolve(
        ts(2021, 4, 7, 23, 0),
        &TimeWindowSpec {
            observed: Some(WindowSpec::hourly(1)),
            forecast: None,
            extra: None,
        },
    )
    .unwrap();

    let store = BufferStore::new(buf_dir.path());
    let acquirer =
        VariableAcquirer::new(&store, DatasetTimeFinder::new(2, Duration::hours(1)), 10);
    let mut map = DatasetTimeMap::new();

    acquirer.acquire(&descriptor, &window, &mut map).unwrap();

    let back = store.read("q_obs", 0).unwrap().unwrap();
    assert_eq!(back.as_series().unwrap().column("q_obs").unwrap(), &[7.25]);
}

#[test]
fn test_acquire_forecast_keyed_by_reference_time() {
    let src_dir = tempdir().unwrap();
    let buf_dir = tempdir().unwrap();

    // One forecast issue at the run anchor, covering the two forecast steps.
    let fc_times = [ts(2021, 4, 8, 1, 0), ts(2021, 4, 8, 2, 0)];
    write_forecast_source(
        &src_dir.path().join("fc_2021040800.nc"),
        "rain_fc",
        &fc_times,
        &[[10.0, 11.0], [20.0, 21.0]],
    );

    let template = format!("{}/fc_$yyyy$mm$dd$HH.nc", src_dir.path().display());
    let descriptor =
        VariableDescriptor::new("rain_fc", Dimensionality::Grid2d, DataKind::Forecast, template)
            .with_source_name("rain_fc");

    let window = TimeWindow::resolve(
        ts(2021, 4, 8, 0, 0),
        &TimeWindowSpec {
            observed: Some(WindowSpec::hourly(1)),
            forecast: Some(WindowSpec::hourly(2)),
            extra: None,
        },
    )
    .unwrap();

    let store = BufferStore::new(buf_dir.path());
    let finder = DatasetTimeFinder::new(4, Duration::hours(1));
    let acquirer = VariableAcquirer::new(&store, finder, 10);
    let mut map = DatasetTimeMap::new();

    acquirer.acquire(&descriptor, &window, &mut map).unwrap();
    assert_eq!(map.reference_time("rain_fc"), Some(ts(2021, 4, 8, 0, 0)));

    let back = store.read("rain_fc", 0).unwrap().unwrap();
    let grid = back.as_grid().unwrap();
    assert_eq!(grid.len(), 3);
    // The run anchor itself precedes the forecast horizon: NaN frame.
    assert!(grid.frame(0)[[0, 0]].is_nan());
    assert_eq!(grid.frame(1)[[0, 0]], 10.0);
    assert_eq!(grid.frame(2)[[0, 1]], 21.0);
}

#[test]
fn test_acquire_missing_forecast_issue_leaves_variable_unavailable() {
    let src_dir = tempdir().unwrap();
    let buf_dir = tempdir().unwrap();

    let template = format!("{}/fc_$yyyy$mm$dd$HH.nc", src_dir.path().display());
    let descriptor =
        VariableDescriptor::new("rain_fc", Dimensionality::Grid2d, DataKind::Forecast, template)
            .with_source_name("rain_fc");

    let window = TimeWindow::resolve(
        ts(2021, 4, 8, 0, 0),
        &TimeWindowSpec {
            observed: None,
            forecast: Some(WindowSpec::hourly(2)),
            extra: None,
        },
    )
    .unwrap();

    let store = BufferStore::new(buf_dir.path());
    let acquirer =
        VariableAcquirer::new(&store, DatasetTimeFinder::new(4, Duration::hours(1)), 10);
    let mut map = DatasetTimeMap::new();

    // Not fatal: the run proceeds, and downstream readers see None.
    acquirer.acquire(&descriptor, &window, &mut map).unwrap();
    assert!(store.read("rain_fc", 0).unwrap().is_none());
}

#[test]
fn test_grid_time_dimension_without_coordinate_variable() {
    let src_dir = tempdir().unwrap();

    // A time dimension but no time coordinate variable.
    let path = src_dir.path().join("rain_nocoord.nc");
    {
        let mut file = netcdf::create(&path).unwrap();
        file.add_dimension("time", 1).unwrap();
        file.add_dimension("y", 1).unwrap();
        file.add_dimension("x", 2).unwrap();
        let mut var = file
            .add_variable::<f32>("rain", &["time", "y", "x"])
            .unwrap();
        var.put_values(&[5.0f32, 6.0], ..).unwrap();
    }

    let t = ts(2021, 4, 7, 23, 0);
    let container = read_grid(&path, "rain", &[t])
        .unwrap()
        .expect("readable despite the missing coordinate");
    assert_eq!(container.times(), &[t]);
    assert_eq!(container.frame(0)[[0, 1]], 6.0);

    // More frames than expected timestamps is unreadable, not fatal.
    let stacked = src_dir.path().join("rain_nocoord_stacked.nc");
    {
        let mut file = netcdf::create(&stacked).unwrap();
        file.add_dimension("time", 3).unwrap();
        file.add_dimension("y", 1).unwrap();
        file.add_dimension("x", 2).unwrap();
        let mut var = file
            .add_variable::<f32>("rain", &["time", "y", "x"])
            .unwrap();
        var.put_values(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], ..).unwrap();
    }
    assert!(read_grid(&stacked, "rain", &[t]).unwrap().is_none());
}

#[test]
fn test_warm_restart_newer_cached_time_keeps_its_paths() {
    let dir = tempdir().unwrap();
    let template = format!("{}/obs_$yyyy$mm$dd$HH$MM.txt", dir.path().display());
    let newer = dir.path().join("obs_202104072300.txt");
    fs::write(&newer, "2.0\n").unwrap();

    let descriptor =
        VariableDescriptor::new("rain_obs", Dimensionality::Point, DataKind::Observed, template);
    let finder = DatasetTimeFinder::new(4, Duration::hours(1));

    // First run finds 23:00 and persists the artifact.
    let mut map = DatasetTimeMap::new();
    finder
        .find(&mut map, &descriptor, ts(2021, 4, 7, 23, 0))
        .unwrap();
    let artifact = dir.path().join("dataset_times.json");
    map.save(&artifact).unwrap();

    // The 23:00 file is archived away; only 22:00 remains for the rescan.
    fs::remove_file(&newer).unwrap();
    fs::write(dir.path().join("obs_202104072200.txt"), "1.0\n").unwrap();

    let mut map = DatasetTimeMap::load(&artifact).unwrap();
    let found = finder
        .find(&mut map, &descriptor, ts(2021, 4, 7, 23, 0))
        .unwrap();
    assert_eq!(found, Some(ts(2021, 4, 7, 23, 0)));

    // The kept timestamp carries the paths it was saved with, not the paths
    // of the older scan hit.
    let entry = map.get("rain_obs").unwrap();
    assert_eq!(entry.member_paths.get(""), Some(&newer));
}

#[test]
fn test_rerun_does_not_lose_buffered_data() {
    init_logging();
    let src_dir = tempdir().unwrap();
    let buf_dir = tempdir().unwrap();

    let template = format!("{}/rain_$yyyy$mm$dd$HH$MM.nc", src_dir.path().display());
    let descriptor =
        VariableDescriptor::new("rain_obs", Dimensionality::Grid2d, DataKind::Observed, template)
            .with_source_name("rain");

    let window = TimeWindow::resolve(
        ts(2021, 4, 7, 23, 0),
        &TimeWindowSpec {
            observed: Some(WindowSpec::hourly(2)),
            forecast: None,
            extra: None,
        },
    )
    .unwrap();

    let store = BufferStore::new(buf_dir.path());
    let acquirer =
        VariableAcquirer::new(&store, DatasetTimeFinder::new(4, Duration::hours(1)), 10);

    // First run: only 22:00 is on disk.
    write_grid_source(&src_dir.path().join("rain_202104072200.nc"), "rain", [2.0, 2.5]);
    let mut map = DatasetTimeMap::new();
    acquirer.acquire(&descriptor, &window, &mut map).unwrap();

    // The 22:00 source disappears (archived away) and 23:00 arrives.
    fs::remove_file(src_dir.path().join("rain_202104072200.nc")).unwrap();
    write_grid_source(&src_dir.path().join("rain_202104072300.nc"), "rain", [3.0, 3.5]);

    // Second run, fresh map (new process).
    let mut map = DatasetTimeMap::new();
    acquirer.acquire(&descriptor, &window, &mut map).unwrap();

    let back = store.read("rain_obs", 0).unwrap().unwrap();
    let grid = back.as_grid().unwrap();
    // 22:00 survives from the buffer, 23:00 comes from the fresh read.
    assert_eq!(grid.frame(0)[[0, 0]], 2.0);
    assert_eq!(grid.frame(1)[[0, 0]], 3.0);
}
