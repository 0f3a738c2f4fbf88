//! End-to-end requests against the synthetic archive.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use hindcast::{load_hindcast, ExecutionMode, HindcastConfig, LoadOptions};
use hindcast_common::{
    Coordinate, DatasetKind, GridIndex, HindcastError, Region, VariableName, YearMonth,
};
use storage::{CacheKey, MonthlyCache};
use test_utils::{
    assert_approx_eq, assert_coords_approx_eq, bass_strait_archive, bass_strait_target,
    hourly_month, regular_axis, synthetic_value, temp_test_dir, ym, SyntheticArchive,
    BASS_STRAIT_CELL, BASS_STRAIT_INDEX,
};

fn config(cache_dir: &Path) -> HindcastConfig {
    let mut config = HindcastConfig::default();
    config.archive.base_url = "mem://hindcast".to_string();
    config.cache.dir = cache_dir.to_path_buf();
    config.fetch.max_retries = 0;
    config
}

fn aus_options() -> LoadOptions {
    LoadOptions {
        region: Region::Aus4m,
        ..LoadOptions::default()
    }
}

fn names(ds: &hindcast_common::AssembledDataset) -> Vec<String> {
    ds.column_names().map(|n| n.to_string()).collect()
}

#[test]
fn test_three_months_at_bass_strait() {
    let cache = temp_test_dir();
    let archive = bass_strait_archive();
    let out = load_hindcast(
        &archive,
        &config(cache.path()),
        bass_strait_target(),
        ym(2015, 1),
        ym(2015, 3),
        &aus_options(),
    )
    .unwrap();

    let ds = &out.dataset;
    assert_eq!(ds.rows(), 744 + 672 + 744);
    assert_eq!(names(ds), vec!["t02", "hs", "dir"]);
    assert!(ds.time.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(ds.time[0], ym(2015, 1).start_instant());
    assert!(ds.missing_months.is_empty());

    let resolved = out.resolution.resolved();
    assert_coords_approx_eq!(
        (resolved.lon, resolved.lat),
        (BASS_STRAIT_CELL.0, BASS_STRAIT_CELL.1),
        1e-9
    );
    assert_eq!(
        out.resolution.grid_index(),
        GridIndex::Cell {
            lat_index: BASS_STRAIT_INDEX.0,
            lon_index: BASS_STRAIT_INDEX.1
        }
    );
    assert!(out.resolution.offset_km() < 5.0);

    let hs_code = archive.variable_code("hs").unwrap();
    let hs = ds.column(&"hs".into()).unwrap();
    assert_approx_eq!(hs[0], synthetic_value(hs_code, ym(2015, 1), 0, 5, 5), 1e-9);
    assert_approx_eq!(hs[744], synthetic_value(hs_code, ym(2015, 2), 0, 5, 5), 1e-9);
    assert_approx_eq!(hs[2159], synthetic_value(hs_code, ym(2015, 3), 743, 5, 5), 1e-9);

    assert_eq!(out.report.fetched, 3);
    assert_eq!(out.report.skipped, 0);
    assert_eq!(out.metadata.rows, 2160);
    assert_eq!(out.metadata.region, Some(Region::Aus4m));
    assert!(out.persisted.is_none());
}

#[test]
fn test_second_run_is_served_from_cache() {
    let cache = temp_test_dir();
    let archive = bass_strait_archive();
    let config = config(cache.path());

    let first = load_hindcast(&archive, &config, bass_strait_target(), ym(2015, 1), ym(2015, 3), &aus_options())
        .unwrap();
    archive.reset_opens();
    let second = load_hindcast(&archive, &config, bass_strait_target(), ym(2015, 1), ym(2015, 3), &aus_options())
        .unwrap();

    assert_eq!(second.report.fetched, 0);
    assert_eq!(second.report.skipped, 3);
    // only the location scan touches the archive
    assert_eq!(archive.opens(), 1);
    assert_eq!(first.dataset.time, second.dataset.time);
    assert_eq!(first.dataset.columns, second.dataset.columns);
}

#[test]
fn test_new_extra_variable_refetches_cached_month() {
    let cache = temp_test_dir();
    let archive = bass_strait_archive();
    let config = config(cache.path());
    let with_fp = LoadOptions {
        extra_variables: vec!["fp".into()],
        ..aus_options()
    };

    let first = load_hindcast(&archive, &config, bass_strait_target(), ym(2015, 1), ym(2015, 1), &aus_options())
        .unwrap();
    assert_eq!(first.report.fetched, 1);

    let second = load_hindcast(&archive, &config, bass_strait_target(), ym(2015, 1), ym(2015, 1), &with_fp)
        .unwrap();
    assert_eq!(second.report.fetched, 1);
    assert_eq!(second.report.skipped, 0);
    let fp_code = archive.variable_code("fp").unwrap();
    let fp = second.dataset.column(&"fp".into()).unwrap();
    assert_eq!(fp.len(), 744);
    assert!(fp.iter().all(|v| v.is_finite()));
    assert_approx_eq!(fp[100], synthetic_value(fp_code, ym(2015, 1), 100, 5, 5), 1e-9);

    // the rewritten entry now serves both requests
    let third = load_hindcast(&archive, &config, bass_strait_target(), ym(2015, 1), ym(2015, 1), &with_fp)
        .unwrap();
    assert_eq!(third.report.skipped, 1);
    assert_eq!(third.dataset.columns, second.dataset.columns);
    let core_only = load_hindcast(&archive, &config, bass_strait_target(), ym(2015, 1), ym(2015, 1), &aus_options())
        .unwrap();
    assert_eq!(core_only.report.skipped, 1);
}

#[test]
fn test_land_cell_resolves_to_nearest_ocean_cell() {
    let cache = temp_test_dir();
    let archive = bass_strait_archive().with_land(BASS_STRAIT_INDEX.0, BASS_STRAIT_INDEX.1);
    let out = load_hindcast(
        &archive,
        &config(cache.path()),
        bass_strait_target(),
        ym(2015, 1),
        ym(2015, 1),
        &aus_options(),
    )
    .unwrap();

    assert_eq!(
        out.resolution.grid_index(),
        GridIndex::Cell {
            lat_index: 4,
            lon_index: 5
        }
    );
    let resolved = out.resolution.resolved();
    assert_coords_approx_eq!((resolved.lon, resolved.lat), (145.2, -40.1), 1e-9);
    assert!(out.dataset.column(&"hs".into()).unwrap().iter().all(|v| v.is_finite()));
}

#[test]
fn test_target_outside_grid_is_not_found() {
    let cache = temp_test_dir();
    let err = load_hindcast(
        &bass_strait_archive(),
        &config(cache.path()),
        Coordinate::new(150.0, -30.0),
        ym(2015, 1),
        ym(2015, 1),
        &aus_options(),
    )
    .unwrap_err();
    assert!(matches!(err, HindcastError::LocationNotFound { .. }));
}

#[test]
fn test_aliases_and_unknown_extras() {
    let cache = temp_test_dir();
    let archive = bass_strait_archive();
    let options = LoadOptions {
        extra_variables: vec!["wnd".into(), "t0m1".into(), "spr".into(), "hs".into()],
        ..aus_options()
    };
    let out = load_hindcast(
        &archive,
        &config(cache.path()),
        bass_strait_target(),
        ym(2015, 2),
        ym(2015, 2),
        &options,
    )
    .unwrap();

    let ds = &out.dataset;
    assert_eq!(names(ds), vec!["t02", "hs", "dir", "wnd", "t0m1", "spr"]);
    let u10m = archive.variable_code("u10m").unwrap();
    let tm0m1 = archive.variable_code("tm0m1").unwrap();
    assert_approx_eq!(
        ds.column(&"wnd".into()).unwrap()[10],
        synthetic_value(u10m, ym(2015, 2), 10, 5, 5),
        1e-9
    );
    assert_approx_eq!(
        ds.column(&"t0m1".into()).unwrap()[0],
        synthetic_value(tm0m1, ym(2015, 2), 0, 5, 5),
        1e-9
    );
    assert!(ds.column(&"spr".into()).unwrap().iter().all(|v| v.is_nan()));
    assert_eq!(
        out.metadata.extra_variables,
        vec![VariableName::new("wnd"), VariableName::new("t0m1"), VariableName::new("spr")]
    );
}

#[test]
fn test_truncated_variable_becomes_nan() {
    let cache = temp_test_dir();
    let archive = bass_strait_archive().with_truncated("dir", 12);
    let out = load_hindcast(
        &archive,
        &config(cache.path()),
        bass_strait_target(),
        ym(2015, 1),
        ym(2015, 1),
        &aus_options(),
    )
    .unwrap();
    let dir = out.dataset.column(&"dir".into()).unwrap();
    assert_eq!(dir.len(), 744);
    assert!(dir.iter().all(|v| v.is_nan()));
}

#[test]
fn test_failed_month_leaves_a_gap() {
    let cache = temp_test_dir();
    let archive = bass_strait_archive().with_failing_month(ym(2020, 2));
    let out = load_hindcast(
        &archive,
        &config(cache.path()),
        bass_strait_target(),
        ym(2019, 12),
        ym(2020, 3),
        &aus_options(),
    )
    .unwrap();

    let ds = &out.dataset;
    assert_eq!(ds.rows(), 744 * 3);
    assert_eq!(ds.missing_months, vec![ym(2020, 2)]);
    assert_eq!(ds.months_included, vec![ym(2019, 12), ym(2020, 1), ym(2020, 3)]);
    assert!(ds.time.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(ds.time[744 * 2], ym(2020, 3).start_instant());
    assert_eq!(out.report.failed_months, vec![ym(2020, 2)]);
    assert_eq!(out.metadata.missing_months, vec![ym(2020, 2)]);

    // the failed month was not cached and is attempted again next time
    archive.reset_opens();
    let again = load_hindcast(
        &archive,
        &config(cache.path()),
        bass_strait_target(),
        ym(2019, 12),
        ym(2020, 3),
        &aus_options(),
    )
    .unwrap();
    assert_eq!(again.report.skipped, 3);
    assert_eq!(archive.opens_for(ym(2020, 2)), 1);
}

#[test]
fn test_first_month_outage_leaves_a_gap() {
    let cache = temp_test_dir();
    let archive = bass_strait_archive().with_failing_month(ym(2015, 1));
    let out = load_hindcast(
        &archive,
        &config(cache.path()),
        bass_strait_target(),
        ym(2015, 1),
        ym(2015, 3),
        &aus_options(),
    )
    .unwrap();

    // the location scan moved on to February's file
    assert_eq!(
        out.resolution.grid_index(),
        GridIndex::Cell {
            lat_index: BASS_STRAIT_INDEX.0,
            lon_index: BASS_STRAIT_INDEX.1
        }
    );
    let ds = &out.dataset;
    assert_eq!(ds.rows(), 672 + 744);
    assert_eq!(ds.missing_months, vec![ym(2015, 1)]);
    assert_eq!(ds.months_included, vec![ym(2015, 2), ym(2015, 3)]);
    assert_eq!(ds.time[0], ym(2015, 2).start_instant());
    assert_eq!(out.report.failed_months, vec![ym(2015, 1)]);
}

#[test]
fn test_every_month_failing_is_empty_dataset() {
    let cache = temp_test_dir();
    let table_dir = temp_test_dir();
    let table = table_dir.path().join("aus_4m.csv");
    let mut file = fs::File::create(&table).unwrap();
    writeln!(file, "lon_index,lat_index,longitude,latitude").unwrap();
    writeln!(file, "5,5,145.2,-40.0").unwrap();

    let mut config = config(cache.path());
    config.lookup.valid_points.insert(Region::Aus4m, table);

    let archive = bass_strait_archive()
        .with_failing_month(ym(2015, 1))
        .with_failing_month(ym(2015, 2));
    let err = load_hindcast(
        &archive,
        &config,
        bass_strait_target(),
        ym(2015, 1),
        ym(2015, 2),
        &aus_options(),
    )
    .unwrap_err();

    assert!(err.is_empty_dataset());
    assert!(matches!(
        err,
        HindcastError::EmptyDataset { start, end } if start == ym(2015, 1) && end == ym(2015, 2)
    ));
}

#[test]
fn test_concurrent_completion_order_does_not_matter() {
    let cache = temp_test_dir();
    let mut archive = bass_strait_archive();
    // earlier months respond slower
    for m in 1..=6u32 {
        archive = archive.with_delay(ym(2016, m), Duration::from_millis(15 * (7 - m as u64)));
    }
    let options = LoadOptions {
        max_workers: Some(3),
        ..aus_options()
    };
    let concurrent = load_hindcast(
        &archive,
        &config(cache.path()),
        bass_strait_target(),
        ym(2016, 1),
        ym(2016, 6),
        &options,
    )
    .unwrap();

    let seq_cache = temp_test_dir();
    let sequential = load_hindcast(
        &archive,
        &config(seq_cache.path()),
        bass_strait_target(),
        ym(2016, 1),
        ym(2016, 6),
        &LoadOptions {
            concurrent: false,
            ..aus_options()
        },
    )
    .unwrap();

    assert_eq!(sequential.report.mode, ExecutionMode::Sequential);
    assert!(matches!(concurrent.report.mode, ExecutionMode::Concurrent { .. }));
    let expected: Vec<YearMonth> = (1..=6).map(|m| ym(2016, m)).collect();
    assert_eq!(concurrent.dataset.months_included, expected);
    assert!(concurrent.dataset.time.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(concurrent.dataset.time, sequential.dataset.time);
    assert_eq!(concurrent.dataset.columns, sequential.dataset.columns);
}

#[test]
fn test_corrupt_cache_entry_is_refetched() {
    let cache = temp_test_dir();
    let archive = bass_strait_archive();
    let config = config(cache.path());

    let first = load_hindcast(&archive, &config, bass_strait_target(), ym(2015, 1), ym(2015, 3), &aus_options())
        .unwrap();
    let key = CacheKey::for_month(&first.resolution, ym(2015, 2));
    let path = MonthlyCache::new(cache.path()).path_for(&key);
    fs::write(&path, b"not a gzip stream").unwrap();

    archive.reset_opens();
    let second = load_hindcast(&archive, &config, bass_strait_target(), ym(2015, 1), ym(2015, 3), &aus_options())
        .unwrap();

    assert_eq!(second.dataset.rows(), 2160);
    assert!(second.dataset.missing_months.is_empty());
    assert_eq!(first.dataset.columns, second.dataset.columns);
    assert_eq!(archive.opens_for(ym(2015, 2)), 1);
    // the entry was rewritten
    assert!(MonthlyCache::new(cache.path()).load(&key).is_ok());
}

#[test]
fn test_persist_and_discard_cache() {
    let cache = temp_test_dir();
    let output = temp_test_dir();
    let options = LoadOptions {
        output_dir: Some(output.path().to_path_buf()),
        keep_cache: Some(false),
        ..aus_options()
    };
    let out = load_hindcast(
        &bass_strait_archive(),
        &config(cache.path()),
        bass_strait_target(),
        ym(2015, 1),
        ym(2015, 2),
        &options,
    )
    .unwrap();

    let paths = out.persisted.as_ref().unwrap();
    let table = fs::read_to_string(&paths.table).unwrap();
    let mut lines = table.lines();
    assert_eq!(lines.next(), Some("time,t02,hs,dir"));
    assert!(lines.next().unwrap().starts_with("2015-01-01T00:00:00Z,"));
    assert_eq!(table.lines().count(), 1 + 744 + 672);

    let meta: serde_json::Value = serde_json::from_str(&fs::read_to_string(&paths.metadata).unwrap()).unwrap();
    assert_eq!(meta["rows"], 1416);
    assert_eq!(meta["kind"], "wave");
    assert_eq!(meta["region"], "aus_4m");

    assert_eq!(MonthlyCache::new(cache.path()).stats().entries, 0);
}

#[test]
fn test_persist_keeps_cache_by_default() {
    let cache = temp_test_dir();
    let output = temp_test_dir();
    let options = LoadOptions {
        output_dir: Some(output.path().to_path_buf()),
        ..aus_options()
    };
    load_hindcast(
        &bass_strait_archive(),
        &config(cache.path()),
        bass_strait_target(),
        ym(2015, 1),
        ym(2015, 2),
        &options,
    )
    .unwrap();
    assert_eq!(MonthlyCache::new(cache.path()).stats().entries, 2);
}

#[test]
fn test_cache_disabled_writes_nothing() {
    let cache = temp_test_dir();
    let options = LoadOptions {
        use_cache: Some(false),
        ..aus_options()
    };
    let out = load_hindcast(
        &bass_strait_archive(),
        &config(cache.path()),
        bass_strait_target(),
        ym(2015, 1),
        ym(2015, 2),
        &options,
    )
    .unwrap();
    assert_eq!(out.dataset.rows(), 1416);
    assert_eq!(out.report.fetched, 2);
    assert_eq!(MonthlyCache::new(cache.path()).stats().entries, 0);
}

#[test]
fn test_wind_request_uses_nearest_station() {
    let cache = temp_test_dir();
    let archive = SyntheticArchive::new(regular_axis(-44.0, 1.0, 4), vec![0.0], &["u10m", "wnddir"])
        .with_stations(vec![
            Coordinate::new(144.0, -44.0),
            Coordinate::new(145.0, -40.0),
            Coordinate::new(146.0, -38.0),
        ]);
    let options = LoadOptions {
        kind: DatasetKind::Wind,
        ..LoadOptions::default()
    };
    let out = load_hindcast(
        &archive,
        &config(cache.path()),
        bass_strait_target(),
        ym(2015, 4),
        ym(2015, 4),
        &options,
    )
    .unwrap();

    assert_eq!(out.resolution.grid_index(), GridIndex::Station { index: 1 });
    assert_eq!(names(&out.dataset), vec!["wnd", "wnddir"]);
    assert_eq!(out.dataset.rows(), hourly_month(ym(2015, 4)).len());
    let u10m = archive.variable_code("u10m").unwrap();
    assert_approx_eq!(
        out.dataset.column(&"wnd".into()).unwrap()[0],
        synthetic_value(u10m, ym(2015, 4), 0, 1, 0),
        1e-9
    );
    assert_eq!(out.metadata.region, None);
    assert_eq!(out.metadata.station_id.as_deref(), Some("station1"));
}

#[test]
fn test_invalid_requests() {
    let cache = temp_test_dir();
    let archive = bass_strait_archive();
    let config = config(cache.path());

    let reversed = load_hindcast(&archive, &config, bass_strait_target(), ym(2015, 3), ym(2015, 1), &aus_options())
        .unwrap_err();
    assert!(matches!(reversed, HindcastError::InvalidRequest(_)));

    let bad_lat = load_hindcast(
        &archive,
        &config,
        Coordinate::new(145.0, 95.0),
        ym(2015, 1),
        ym(2015, 1),
        &aus_options(),
    )
    .unwrap_err();
    assert!(matches!(bad_lat, HindcastError::InvalidRequest(_)));
    assert_eq!(archive.opens(), 0);
}
