//! Sequential correction pipeline.
//!
//! raw tables -> reprojection -> DTBM sampling -> depth reconciliation ->
//! free-water anomaly -> terrain effect -> Bouguer anomaly -> grids -> figures.
//! Every stage returns a `GravResult`; the first failure stops the run.

use crate::config::PipelineConfig;
use crate::core::depth::{DepthReconciler, ReconciliationSummary};
use crate::core::free_water::{FreeWaterCorrector, FreeWaterParams};
use crate::core::gridding::{apply_nan_mask, GriddedField, Gridder, ScatteredGridder};
use crate::core::terrain_effect::{
    write_terrain_effect_table, PrismTerrainModel, TerrainEffectModel, TerrainEffectRequest, TerrainEffectResult,
};
use crate::core::bouguer::bouguer_anomaly;
use crate::dataset::StationDataset;
use crate::io::coastline::Coastline;
use crate::io::dem::{write_geotiff, DemRaster};
use crate::io::gravity_table::{load_ground_survey, load_satellite, write_station_table};
use crate::io::projection::{GdalReprojector, Reprojector, StudyArea};
use crate::io::quicklook::{ColorRamp, Quicklook};
use crate::types::{BoundingBox, DatasetKind, GravError, GravResult, StationType};
use std::path::PathBuf;
use std::time::Instant;

/// Check every input before any processing; create the output directories
pub fn validate_inputs(config: &PipelineConfig) -> GravResult<()> {
    let paths = &config.paths;
    let data_dir = paths.data_dir();
    if !data_dir.is_dir() {
        return Err(GravError::MissingPath(data_dir.display().to_string()));
    }

    let inputs = &paths.inputs;
    for file in [
        &inputs.ground_table,
        &inputs.satellite_table,
        &inputs.local_dtm,
        &inputs.regional_dtm,
        &inputs.coastline,
    ] {
        let path = paths.input(file);
        if !path.is_file() {
            return Err(GravError::MissingPath(path.display().to_string()));
        }
    }

    for dir in [paths.figures_dir(), paths.output_dir()] {
        std::fs::create_dir_all(&dir)?;
        log::debug!("Output directory ready: {}", dir.display());
    }
    log::info!("All input paths found under {}", data_dir.display());
    Ok(())
}

/// Terrain models are sampled at geographic station coordinates, so they
/// must share the geographic CRS. Rasters without a code are taken as is.
pub fn check_model_crs(raster: &DemRaster, name: &str, expected_epsg: u32) -> GravResult<()> {
    match raster.epsg() {
        Some(code) if code != expected_epsg => Err(GravError::Projection(format!(
            "{} is in EPSG:{}, stations are sampled in EPSG:{}",
            name, code, expected_epsg
        ))),
        Some(_) => Ok(()),
        None => {
            log::warn!("{} carries no EPSG code, assuming EPSG:{}", name, expected_epsg);
            Ok(())
        }
    }
}

/// One dataset after the correction stages
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectedDataset {
    pub dataset: StationDataset,
    pub terrain: TerrainEffectResult,
    /// Only for ground surveys
    pub reconciliation: Option<ReconciliationSummary>,
}

/// In-memory correction stages: depth reconciliation, free-water anomaly,
/// terrain effect and Bouguer anomaly.
///
/// Works on a copy of the input dataset, so the input is never left half
/// processed and running the chain twice gives the same arrays.
pub struct CorrectionChain<'a> {
    reconciler: DepthReconciler,
    corrector: FreeWaterCorrector,
    terrain: &'a dyn TerrainEffectModel,
}

impl<'a> CorrectionChain<'a> {
    pub fn new(config: &PipelineConfig, terrain: &'a dyn TerrainEffectModel) -> Self {
        Self {
            reconciler: DepthReconciler::new(config.survey.depth_tolerance),
            corrector: FreeWaterCorrector::new(FreeWaterParams {
                datum_offset_mgal: config.survey.datum_offset_mgal,
                water_density: config.terrain.water_density,
            }),
            terrain,
        }
    }

    pub fn correct(&self, input: &StationDataset) -> GravResult<CorrectedDataset> {
        match input.kind() {
            DatasetKind::GroundSurvey => self.correct_ground(input),
            DatasetKind::SatelliteDerived => self.correct_satellite(input),
        }
    }

    /// Sea-bottom readings: heights reconciled, then free-water reduced
    fn correct_ground(&self, input: &StationDataset) -> GravResult<CorrectedDataset> {
        log::info!("Correcting ground survey '{}' ({} stations)", input.tag(), input.len());
        let mut ds = input.clone();

        let hs = ds.require("hs", ds.reported_height())?;
        let hdtbm = ds.require("hdtbm", ds.model_height())?;
        let (hnew, summary) = self.reconciler.reconcile(hs, hdtbm)?;

        let gobs = ds.require("gobs", ds.observed_gravity())?;
        let free_water = self.corrector.apply(ds.lat(), &hnew, gobs)?;

        let request = TerrainEffectRequest::new(ds.lon(), ds.lat(), StationType::SeaBottom).with_elevation(&hnew);
        let terrain = self.terrain.terrain_effect(&request)?;
        let ba = bouguer_anomaly(&free_water.anomaly, &terrain.terrain_effect)?;

        ds.attach_reconciled_height(hnew)?;
        ds.attach_free_water(free_water.normal_gravity, free_water.correction, free_water.anomaly)?;
        ds.attach_terrain_effect(terrain.terrain_effect.clone())?;
        ds.attach_bouguer_anomaly(ba)?;

        Ok(CorrectedDataset {
            dataset: ds,
            terrain,
            reconciliation: Some(summary),
        })
    }

    /// Satellite free-air values: sea-surface points, heights from the models
    fn correct_satellite(&self, input: &StationDataset) -> GravResult<CorrectedDataset> {
        log::info!("Correcting satellite dataset '{}' ({} points)", input.tag(), input.len());
        let mut ds = input.clone();

        let request = TerrainEffectRequest::new(ds.lon(), ds.lat(), StationType::Land).with_auto_sea_surface(true);
        let terrain = self.terrain.terrain_effect(&request)?;
        let fa = ds.require("fa", ds.free_air_anomaly())?;
        let ba = bouguer_anomaly(fa, &terrain.terrain_effect)?;

        ds.attach_terrain_effect(terrain.terrain_effect.clone())?;
        ds.attach_bouguer_anomaly(ba)?;

        Ok(CorrectedDataset {
            dataset: ds,
            terrain,
            reconciliation: None,
        })
    }
}

/// Grid the Bouguer anomaly of two datasets on one lattice and give the
/// second grid the no-data footprint of the first
pub fn grid_bouguer_pair(
    reference: &StationDataset,
    other: &StationDataset,
    extent: &BoundingBox,
    step: f64,
    gridder: &dyn Gridder,
) -> GravResult<(GriddedField, GriddedField)> {
    let grid = |ds: &StationDataset| -> GravResult<GriddedField> {
        let x = ds.require("xm", ds.easting())?;
        let y = ds.require("ym", ds.northing())?;
        let ba = ds.require("ba", ds.bouguer_anomaly())?;
        gridder.grid(x, y, ba, extent, step)
    };

    let reference_grid = grid(reference)?;
    let other_grid = grid(other)?;
    let masked = apply_nan_mask(&reference_grid, &other_grid)?;
    log::info!(
        "Grid '{}' masked with the footprint of '{}': {} undefined cells",
        other.tag(),
        reference.tag(),
        masked.nan_count()
    );
    Ok((reference_grid, masked))
}

/// Per-dataset outcome
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetReport {
    pub tag: String,
    pub stations: usize,
    pub undefined_bouguer: usize,
    pub bouguer_range: Option<(f64, f64)>,
}

impl DatasetReport {
    fn from_dataset(ds: &StationDataset) -> Self {
        let ba = ds.bouguer_anomaly();
        Self {
            tag: ds.tag().to_string(),
            stations: ds.len(),
            undefined_bouguer: ba.map_or(ds.len(), StationDataset::count_nan),
            bouguer_range: ba.and_then(|v| {
                v.iter()
                    .filter(|x| !x.is_nan())
                    .fold(None, |acc: Option<(f64, f64)>, &x| match acc {
                        None => Some((x, x)),
                        Some((lo, hi)) => Some((lo.min(x), hi.max(x))),
                    })
            }),
        }
    }
}

/// Summary of a complete run
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub datasets: Vec<DatasetReport>,
    pub reconciliation: ReconciliationSummary,
    /// Land polygons kept around the study area
    pub coastline_polygons: usize,
    /// Prisms summed for every station
    pub prisms_per_station: usize,
    pub grid_shape: (usize, usize),
    pub outputs: Vec<PathBuf>,
}

/// Complete file-to-figure run over one configuration
pub struct GravityPipeline {
    config: PipelineConfig,
    reprojector: Box<dyn Reprojector>,
}

impl GravityPipeline {
    pub fn new(config: PipelineConfig) -> GravResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            reprojector: Box::new(GdalReprojector),
        })
    }

    pub fn with_reprojector(mut self, reprojector: Box<dyn Reprojector>) -> Self {
        self.reprojector = reprojector;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self) -> GravResult<PipelineReport> {
        let start_time = Instant::now();
        let config = &self.config;
        let paths = &config.paths;
        let inputs = &paths.inputs;
        let mut outputs = Vec::new();

        log::info!("Step 1: Validate inputs");
        validate_inputs(config)?;
        let area = StudyArea::new(
            config.study_area,
            config.crs.geographic_epsg,
            config.crs.projected_epsg,
            self.reprojector.as_ref(),
        )?;

        log::info!("Step 2: Load gravity data");
        let mut ground = load_ground_survey(paths.input(&inputs.ground_table), &config.survey)?;
        let (lon, lat) = self.reprojector.reproject(
            ground.lon(),
            ground.lat(),
            config.crs.survey_epsg,
            config.crs.geographic_epsg,
        )?;
        ground.set_geographic(lon, lat)?;
        let mut satellite = load_satellite(paths.input(&inputs.satellite_table), &config.satellite_tag)?;

        log::info!("Step 3: Project stations to EPSG:{}", config.crs.projected_epsg);
        for ds in [&mut ground, &mut satellite] {
            let (x, y) = self.reprojector.reproject(
                ds.lon(),
                ds.lat(),
                config.crs.geographic_epsg,
                config.crs.projected_epsg,
            )?;
            ds.attach_metric_position(x, y)?;
        }

        log::info!("Step 4: Read terrain models and sample station depths");
        let local = DemRaster::open(paths.input(&inputs.local_dtm))?;
        let regional = DemRaster::open(paths.input(&inputs.regional_dtm))?;
        check_model_crs(&local, "Local DTBM", config.crs.geographic_epsg)?;
        check_model_crs(&regional, "Regional DTBM", config.crs.geographic_epsg)?;
        let coastline = Coastline::load(
            paths.input(&inputs.coastline),
            &widen(&config.study_area, config.terrain.outer_radius_m),
        )?;
        for ds in [&mut ground, &mut satellite] {
            let hdtbm = local.sample_points(ds.lon(), ds.lat())?;
            ds.attach_model_height(hdtbm)?;
        }

        log::info!("Step 5: Plot DTBM and stations");
        outputs.extend(self.plot_inputs(&local, &ground, &satellite)?);

        log::info!("Step 6: Corrections (depth, free-water, terrain, Bouguer)");
        let model = PrismTerrainModel::new(config.terrain, &local, &regional)?.with_coastline(&coastline);
        let chain = CorrectionChain::new(config, &model);
        let ground = chain.correct(&ground)?;
        let satellite = chain.correct(&satellite)?;

        for corrected in [&ground, &satellite] {
            let ds = &corrected.dataset;
            let te_path = paths.output_dir().join(ds.tag()).join("terrain_effect.txt");
            write_terrain_effect_table(&te_path, ds.lon(), ds.lat(), &corrected.terrain)?;
            outputs.push(te_path);

            let table_path = paths.output_dir().join(format!("stations_{}.txt", ds.tag()));
            write_station_table(&table_path, ds)?;
            outputs.push(table_path);
        }

        log::info!("Step 7: Grid Bouguer anomalies ({} m)", config.gridding.step_m);
        let gridder = ScatteredGridder::new(config.gridding.method);
        let (ground_grid, satellite_grid) = grid_bouguer_pair(
            &ground.dataset,
            &satellite.dataset,
            &area.metric,
            config.gridding.step_m,
            &gridder,
        )?;

        log::info!("Step 8: Write Bouguer grids");
        for (tag, grid) in [
            (ground.dataset.tag(), &ground_grid),
            (satellite.dataset.tag(), &satellite_grid),
        ] {
            outputs.extend(self.write_grid(tag, grid)?);
        }

        let report = PipelineReport {
            datasets: vec![
                DatasetReport::from_dataset(&ground.dataset),
                DatasetReport::from_dataset(&satellite.dataset),
            ],
            reconciliation: ground.reconciliation.unwrap_or_default(),
            coastline_polygons: coastline.polygon_count(),
            prisms_per_station: model.cell_count(),
            grid_shape: ground_grid.shape(),
            outputs,
        };
        log::info!(
            "Pipeline completed in {:.1} s, {} files written",
            start_time.elapsed().as_secs_f64(),
            report.outputs.len()
        );
        Ok(report)
    }

    fn plot_inputs(
        &self,
        local: &DemRaster,
        ground: &StationDataset,
        satellite: &StationDataset,
    ) -> GravResult<Vec<PathBuf>> {
        let figures = self.config.paths.figures_dir();
        let mut written = Vec::new();

        let full_range = local.value_range().unwrap_or(self.config.plot.dtbm_range);
        let data = local.data().mapv(|v| v as f64);
        let mut overview = Quicklook::render(&data, *local.transform(), ColorRamp::Terrain, full_range);
        overview.draw_box(&self.config.study_area, [0, 0, 0]);
        let path = figures.join("dtbm_area.png");
        overview.save_png(&path)?;
        written.push(path);

        let cropped = local.crop(&self.config.study_area)?;
        let data = cropped.data().mapv(|v| v as f64);
        let mut stations = Quicklook::render(&data, *cropped.transform(), ColorRamp::Terrain, self.config.plot.dtbm_range);
        stations.draw_points(satellite.lon(), satellite.lat(), [255, 0, 0], 0);
        stations.draw_points(ground.lon(), ground.lat(), [0, 0, 0], 1);
        let path = figures.join("grav_data.png");
        stations.save_png(&path)?;
        written.push(path);

        Ok(written)
    }

    fn write_grid(&self, tag: &str, grid: &GriddedField) -> GravResult<Vec<PathBuf>> {
        let figures = self.config.paths.figures_dir();
        let transform = grid.transform()?;

        let tif = figures.join(format!("bouguer_{}.tif", tag));
        write_geotiff(&grid.values, &transform, self.config.crs.projected_epsg, &tif)?;

        let png = figures.join(format!("bouguer_{}.png", tag));
        Quicklook::render(&grid.values, transform, ColorRamp::Rainbow, self.config.plot.bouguer_range).save_png(&png)?;
        Ok(vec![tif, png])
    }
}

/// Study area grown by a distance in meters (as degrees at the box latitude)
fn widen(area: &BoundingBox, margin_m: f64) -> BoundingBox {
    let dlat = margin_m / 111_000.0;
    let mid_lat = 0.5 * (area.min_y + area.max_y);
    let dlon = margin_m / (111_000.0 * mid_lat.to_radians().cos().max(0.1));
    BoundingBox {
        min_x: area.min_x - dlon,
        max_x: area.max_x + dlon,
        min_y: area.min_y - dlat,
        max_y: area.max_y + dlat,
    }
}

/// Name used for run logs: `<prefix>_<YYYYmmdd_HHMMSS>.log`
pub fn log_file_name(prefix: &str, time: chrono::DateTime<chrono::Local>) -> String {
    format!("{}_{}.log", prefix, time.format("%Y%m%d_%H%M%S"))
}

/// Output path of a run log
pub fn log_file_path(config: &PipelineConfig, prefix: &str, time: chrono::DateTime<chrono::Local>) -> PathBuf {
    config.paths.output_dir().join(log_file_name(prefix, time))
}
