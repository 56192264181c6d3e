use ndarray::Array2;
use seagrav::config::PipelineConfig;
use seagrav::core::gridding::{InterpolationMethod, ScatteredGridder};
use seagrav::core::free_water::{atmospheric_correction, free_water_correction, normal_gravity_grs80};
use seagrav::core::terrain_effect::{
    PrismTerrainModel, TerrainEffectModel, TerrainEffectParams, TerrainEffectRequest,
};
use seagrav::dataset::StationDataset;
use seagrav::io::dem::DemRaster;
use seagrav::io::gravity_table::{load_ground_survey, load_satellite, write_station_table};
use seagrav::io::projection::{Reprojector, StudyArea, UtmReprojector};
use seagrav::pipeline::{grid_bouguer_pair, CorrectionChain};
use seagrav::types::{BoundingBox, GeoTransform, StationType};
use std::io::Write;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Flat sea floor at -100 m over 15..17 E, 40.5..42.5 N
fn flat_sea() -> DemRaster {
    let data = Array2::from_elem((200, 200), -100.0f32);
    DemRaster::new(data, GeoTransform::north_up(15.0, 42.5, 0.01, 0.01), None).unwrap()
}

fn small_terrain_params() -> TerrainEffectParams {
    TerrainEffectParams {
        inner_radius_m: 2_000.0,
        outer_radius_m: 20_000.0,
        inner_step_m: 250.0,
        outer_step_m: 2_500.0,
        curvature: false,
        ..TerrainEffectParams::default()
    }
}

fn write_ground_table(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("grav_OGS60.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "id,lat,lon,h,g").unwrap();
    let mut id = 1310;
    for &lat in &[41.55, 41.65] {
        for &lon in &[16.05, 16.10, 16.15] {
            // one unreadable gravity value
            let g = if id == 1313 { "--".to_string() } else { format!("{:.1}", 980_300.0 + id as f64 - 1300.0) };
            writeln!(file, "{},{},{},-100.0,{}", id, lat, lon, g).unwrap();
            id += 1;
        }
    }
    path
}

fn write_satellite_table(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("grav_ss.txt");
    let mut file = std::fs::File::create(&path).unwrap();
    for i in 0..5 {
        for j in 0..5 {
            let lon = 16.0 + 0.05 * j as f64;
            let lat = 41.5 + 0.05 * i as f64;
            writeln!(file, "{:.2} {:.2} 30.0 1.5", lon, lat).unwrap();
        }
    }
    path
}

fn prepare(ds: &mut StationDataset, dem: &DemRaster) {
    let (x, y) = UtmReprojector.reproject(ds.lon(), ds.lat(), 4326, 32633).unwrap();
    ds.attach_metric_position(x, y).unwrap();
    let hdtbm = dem.sample_points(ds.lon(), ds.lat()).unwrap();
    ds.attach_model_height(hdtbm).unwrap();
}

#[test]
fn test_tables_through_chain_and_gridding() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::default();
    let dem = flat_sea();

    let mut ground = load_ground_survey(write_ground_table(dir.path()), &config.survey).unwrap();
    let mut satellite = load_satellite(write_satellite_table(dir.path()), &config.satellite_tag).unwrap();
    assert_eq!(ground.len(), 5);
    assert!(ground.station_ids().unwrap().iter().all(|&id| id != 1311));
    assert_eq!(satellite.len(), 25);

    prepare(&mut ground, &dem);
    prepare(&mut satellite, &dem);

    let model = PrismTerrainModel::new(small_terrain_params(), &dem, &dem).unwrap();
    let chain = CorrectionChain::new(&config, &model);
    let ground = chain.correct(&ground).unwrap();
    let satellite = chain.correct(&satellite).unwrap();

    // reported depths agree with the flat model
    let summary = ground.reconciliation.unwrap();
    assert_eq!(summary.kept, 5);
    assert_eq!(summary.replaced, 0);

    let ds = &ground.dataset;
    let fa = ds.free_air_anomaly().unwrap();
    let te = ds.terrain_effect().unwrap();
    let ba = ds.bouguer_anomaly().unwrap();
    let ids = ds.station_ids().unwrap();
    for i in 0..ds.len() {
        if ids[i] == 1313 {
            assert!(fa[i].is_nan() && ba[i].is_nan());
            assert!(te[i].is_finite());
        } else {
            assert!((ba[i] - (fa[i] - te[i])).abs() <= 1e-9);
        }
    }

    // sea-surface points over a water column: negative effect, Bouguer above free-air
    let sba = satellite.dataset.bouguer_anomaly().unwrap();
    assert!(satellite.dataset.terrain_effect().unwrap().iter().all(|&t| t < 0.0));
    assert!(sba.iter().all(|&b| b > 30.0));

    let area = StudyArea::new(
        BoundingBox { min_x: 16.0, max_x: 16.2, min_y: 41.5, max_y: 41.7 },
        4326,
        32633,
        &UtmReprojector,
    )
    .unwrap();
    let gridder = ScatteredGridder::new(InterpolationMethod::default());
    let (ground_grid, satellite_grid) =
        grid_bouguer_pair(&ground.dataset, &satellite.dataset, &area.metric, 1_000.0, &gridder).unwrap();

    assert_eq!(ground_grid.shape(), satellite_grid.shape());
    assert!(ground_grid.nan_count() > 0);
    for (g, s) in ground_grid.values.iter().zip(satellite_grid.values.iter()) {
        if g.is_nan() {
            assert!(s.is_nan());
        }
    }

    let table = dir.path().join("stations_ogs60.txt");
    write_station_table(&table, &ground.dataset).unwrap();
    let text = std::fs::read_to_string(&table).unwrap();
    assert!(text.starts_with("# id lon lat xm ym hs hdtbm hnew gobs gth fwc fa te ba"));
    assert_eq!(text.lines().count(), 6);
}

#[test]
fn test_chain_is_repeatable_on_the_same_input() {
    init_logger();
    let dir = tempfile::tempdir().unwrap();
    let config = PipelineConfig::default();
    let dem = flat_sea();

    let mut ground = load_ground_survey(write_ground_table(dir.path()), &config.survey).unwrap();
    prepare(&mut ground, &dem);

    let model = PrismTerrainModel::new(small_terrain_params(), &dem, &dem).unwrap();
    let chain = CorrectionChain::new(&config, &model);
    let first = chain.correct(&ground).unwrap();
    let second = chain.correct(&ground).unwrap();

    assert!(ground.bouguer_anomaly().is_none());
    assert_eq!(first.terrain, second.terrain);
    for (a, b) in first
        .dataset
        .bouguer_anomaly()
        .unwrap()
        .iter()
        .zip(second.dataset.bouguer_anomaly().unwrap().iter())
    {
        assert!(a == b || (a.is_nan() && b.is_nan()));
    }
}

#[test]
fn test_station_off_the_model_stays_unconfirmed() {
    init_logger();
    let config = PipelineConfig::default();
    let dem = flat_sea();

    // second station lies east of the terrain model
    let mut ground = StationDataset::ground_survey(
        "ogs60",
        ndarray::array![1, 2],
        ndarray::array![16.1, 18.0],
        ndarray::array![41.6, 41.6],
        ndarray::array![-60.0, -60.0],
        ndarray::array![980_320.0, 980_320.0],
    )
    .unwrap();
    let hdtbm = dem.sample_points(ground.lon(), ground.lat()).unwrap();
    ground.attach_model_height(hdtbm).unwrap();

    let model = PrismTerrainModel::new(small_terrain_params(), &dem, &dem).unwrap();
    let out = CorrectionChain::new(&config, &model).correct(&ground).unwrap();

    let hnew = out.dataset.reconciled_height().unwrap();
    assert_eq!(hnew[0], -100.0);
    assert!(hnew[1].is_nan());
    assert!(out.dataset.bouguer_anomaly().unwrap()[1].is_nan());
    assert_eq!(out.reconciliation.unwrap().unconfirmed, 1);
}

#[test]
fn test_bottom_and_surface_agree_over_a_homogeneous_sea() {
    init_logger();
    let config = PipelineConfig::default();
    let dem = flat_sea();
    let model = PrismTerrainModel::new(small_terrain_params(), &dem, &dem).unwrap();
    let (lon, lat) = (ndarray::array![16.1], ndarray::array![41.6]);

    // free-air anomaly of a flat sea over a rock reference: the water slab deficit
    let fa_true = model
        .terrain_effect(&TerrainEffectRequest::new(&lon, &lat, StationType::SeaSurface))
        .unwrap()
        .terrain_effect[0];
    let slab = 2.0 * std::f64::consts::PI * 6.6743e-11 * (1030.0 - 2670.0) * 100.0 * 1e5;
    assert!((fa_true - slab).abs() < 0.05 * slab.abs());

    // what a gravimeter on the sea floor reads there
    let gobs = normal_gravity_grs80(41.6) - atmospheric_correction(0.0) + free_water_correction(-100.0, 1030.0)
        + fa_true
        - config.survey.datum_offset_mgal;

    let mut ground = StationDataset::ground_survey(
        "ogs60",
        ndarray::array![1],
        lon.clone(),
        lat.clone(),
        ndarray::array![-100.0],
        ndarray::array![gobs],
    )
    .unwrap();
    let mut satellite = StationDataset::satellite("ss", lon, lat, ndarray::array![fa_true], None).unwrap();
    prepare(&mut ground, &dem);
    prepare(&mut satellite, &dem);

    let chain = CorrectionChain::new(&config, &model);
    let ground = chain.correct(&ground).unwrap();
    let satellite = chain.correct(&satellite).unwrap();

    let bottom_ba = ground.dataset.bouguer_anomaly().unwrap()[0];
    let surface_ba = satellite.dataset.bouguer_anomaly().unwrap()[0];
    assert!((ground.dataset.free_air_anomaly().unwrap()[0] - fa_true).abs() < 1e-6);
    assert!(bottom_ba.abs() < 1e-6, "sea-bottom Bouguer {}", bottom_ba);
    assert!(surface_ba.abs() < 1e-6, "sea-surface Bouguer {}", surface_ba);
    assert!((bottom_ba - surface_ba).abs() < 1e-6);
}
