//! Terrain effect from right-rectangular prisms.
//!
//! The terrain and bathymetry around each station are discretized into
//! vertical prisms, two resolution bands deep:
//!   - near field: cells of `inner_step_m` whose centers lie within
//!     `inner_radius_m`, heights from the local model (regional fallback)
//!   - far field: cells of `outer_step_m` out to `outer_radius_m`, heights
//!     from the regional model; cells crossing the inner radius are split
//!     into inner-size cells so the two bands tile without overlap
//!
//! Each prism contributes the closed-form vertical attraction of
//! Nagy (1966) / Plouff (1976). Mass above sea level carries rock density,
//! bathymetry carries the water-minus-rock contrast, so the result is the
//! effect of replacing the real surface by a flat sea-level Earth.
//!
//! Sea-bottom stations are evaluated at sea level. Their readings have
//! already been continued to the surface by the free-water correction, which
//! leaves the water column above them to the prisms like for any sea-surface
//! point.

use crate::core::free_water::{GRAVITATIONAL_CONSTANT, SI_TO_MGAL};
use crate::io::coastline::Coastline;
use crate::io::dem::DemRaster;
use crate::types::{check_len, GravError, GravResult, StationField, StationType};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Mean Earth radius used for the curvature drop (m)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_E2: f64 = 0.006_694_379_990_14;

/// Terrain effect parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainEffectParams {
    /// Near-field radius R1 (m)
    pub inner_radius_m: f64,
    /// Far-field radius R2 (m)
    pub outer_radius_m: f64,
    /// Near-field cell size gs1 (m)
    pub inner_step_m: f64,
    /// Far-field cell size gs2 (m)
    pub outer_step_m: f64,
    /// Lower distant prisms by d^2 / 2R to follow the Earth's curvature
    pub curvature: bool,
    pub rock_density: f64,
    pub water_density: f64,
}

impl Default for TerrainEffectParams {
    fn default() -> Self {
        Self {
            inner_radius_m: 9_000.0,
            outer_radius_m: 180_000.0,
            inner_step_m: 100.0,
            outer_step_m: 2_500.0,
            curvature: true,
            rock_density: 2670.0,
            water_density: 1030.0,
        }
    }
}

impl TerrainEffectParams {
    pub fn validate(&self) -> GravResult<()> {
        let positive = [
            self.inner_radius_m,
            self.outer_radius_m,
            self.inner_step_m,
            self.outer_step_m,
        ]
        .iter()
        .all(|v| v.is_finite() && *v > 0.0);
        if !positive {
            return Err(GravError::Config(format!(
                "Terrain radii and steps must be positive: {:?}",
                self
            )));
        }
        if self.inner_radius_m >= self.outer_radius_m {
            return Err(GravError::Config(format!(
                "Inner terrain radius ({} m) must be smaller than the outer radius ({} m)",
                self.inner_radius_m, self.outer_radius_m
            )));
        }
        if self.inner_step_m > self.outer_step_m {
            return Err(GravError::Config(format!(
                "Near-field step ({} m) is coarser than the far-field step ({} m)",
                self.inner_step_m, self.outer_step_m
            )));
        }
        if !(self.rock_density > 0.0 && self.water_density >= 0.0) {
            return Err(GravError::Config("Densities must be positive".to_string()));
        }
        Ok(())
    }
}

/// Stations of one dataset submitted to a terrain model
#[derive(Debug, Clone)]
pub struct TerrainEffectRequest<'a> {
    pub lon: &'a StationField,
    pub lat: &'a StationField,
    /// Station heights (m, positive up). Derived from the models when absent.
    pub elevation: Option<&'a StationField>,
    pub station_type: StationType,
    /// Move land stations that fall in water to the sea surface
    pub auto_identify_sea_surface: bool,
}

impl<'a> TerrainEffectRequest<'a> {
    pub fn new(lon: &'a StationField, lat: &'a StationField, station_type: StationType) -> Self {
        Self {
            lon,
            lat,
            elevation: None,
            station_type,
            auto_identify_sea_surface: false,
        }
    }

    pub fn with_elevation(mut self, elevation: &'a StationField) -> Self {
        self.elevation = Some(elevation);
        self
    }

    pub fn with_auto_sea_surface(mut self, enabled: bool) -> Self {
        self.auto_identify_sea_surface = enabled;
        self
    }

    pub fn len(&self) -> usize {
        self.lon.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lon.is_empty()
    }

    fn validate(&self) -> GravResult<()> {
        check_len("lat", self.lon.len(), self.lat.len())?;
        if let Some(elevation) = self.elevation {
            check_len("elevation", self.lon.len(), elevation.len())?;
        }
        Ok(())
    }
}

/// Terrain effect per station, aligned with the request
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainEffectResult {
    /// mGal
    pub terrain_effect: StationField,
    /// Heights actually used (given or derived)
    pub station_elevation: StationField,
    pub station_types: Vec<StationType>,
}

/// Forward model of the attraction of the surrounding terrain.
///
/// Implementations are pure: the same request gives the same result.
pub trait TerrainEffectModel {
    fn terrain_effect(&self, request: &TerrainEffectRequest<'_>) -> GravResult<TerrainEffectResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Near,
    Far,
}

/// Horizontal footprint of one prism, relative to the station
#[derive(Debug, Clone, Copy)]
struct Cell {
    dx: f64,
    dy: f64,
    half: f64,
    band: Band,
}

/// Vertical attraction of a rectangular prism per unit density and G.
///
/// Bounds are relative to the station with z pointing up; the result is
/// positive (downward pull) for mass below the station. The vertical span
/// must not contain z = 0 in its interior.
fn prism_kernel_sum(x: [f64; 2], y: [f64; 2], z: [f64; 2]) -> f64 {
    let mut sum = 0.0;
    for (i, &xi) in x.iter().enumerate() {
        for (j, &yj) in y.iter().enumerate() {
            for (k, &zk) in z.iter().enumerate() {
                let sign = if (i + j + k) % 2 == 1 { 1.0 } else { -1.0 };
                sum += sign * prism_kernel(xi, yj, zk);
            }
        }
    }
    sum
}

fn prism_kernel(x: f64, y: f64, z: f64) -> f64 {
    let r = (x * x + y * y + z * z).sqrt();
    if r == 0.0 {
        return 0.0;
    }
    let mut value = 0.0;
    if x != 0.0 {
        value += x * log_plus_r(y, r, x * x + z * z);
    }
    if y != 0.0 {
        value += y * log_plus_r(x, r, y * y + z * z);
    }
    if z != 0.0 {
        value -= z * (x * y / (z * r)).atan();
    }
    value
}

/// ln(a + r) without cancellation for negative `a`; `rest = r^2 - a^2`
fn log_plus_r(a: f64, r: f64, rest: f64) -> f64 {
    if a >= 0.0 {
        (a + r).ln()
    } else if rest > 0.0 {
        (rest / (r - a)).ln()
    } else {
        0.0
    }
}

/// Vertical attraction (m/s^2 per kg/m^3 / G) of a prism, split at the
/// station level when the station lies inside its vertical span
pub(crate) fn prism_gz(x: [f64; 2], y: [f64; 2], z: [f64; 2]) -> f64 {
    if z[0] < 0.0 && z[1] > 0.0 {
        prism_kernel_sum(x, y, [z[0], 0.0]) + prism_kernel_sum(x, y, [0.0, z[1]])
    } else {
        prism_kernel_sum(x, y, z)
    }
}

/// Meters per degree of longitude and latitude on WGS84
fn meters_per_degree(lat_deg: f64) -> (f64, f64) {
    let phi = lat_deg.to_radians();
    let w = 1.0 - WGS84_E2 * phi.sin().powi(2);
    let n = WGS84_A / w.sqrt();
    let m = WGS84_A * (1.0 - WGS84_E2) / w.powf(1.5);
    (n * phi.cos() * std::f64::consts::PI / 180.0, m * std::f64::consts::PI / 180.0)
}

/// Prism terrain model over a local and a regional DTBM (both in lon/lat)
pub struct PrismTerrainModel<'a> {
    params: TerrainEffectParams,
    local: &'a DemRaster,
    regional: &'a DemRaster,
    coastline: Option<&'a Coastline>,
    cells: Vec<Cell>,
}

impl<'a> PrismTerrainModel<'a> {
    pub fn new(params: TerrainEffectParams, local: &'a DemRaster, regional: &'a DemRaster) -> GravResult<Self> {
        params.validate()?;
        let cells = build_cells(&params);
        log::debug!(
            "Prism mesh: {} cells (R1 {} m @ {} m, R2 {} m @ {} m)",
            cells.len(),
            params.inner_radius_m,
            params.inner_step_m,
            params.outer_radius_m,
            params.outer_step_m
        );
        Ok(Self {
            params,
            local,
            regional,
            coastline: None,
            cells,
        })
    }

    pub fn with_coastline(mut self, coastline: &'a Coastline) -> Self {
        self.coastline = Some(coastline);
        self
    }

    pub fn params(&self) -> &TerrainEffectParams {
        &self.params
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    fn model_height(&self, lon: f64, lat: f64, band: Band) -> f64 {
        let (first, second) = match band {
            Band::Near => (self.local, self.regional),
            Band::Far => (self.regional, self.local),
        };
        let h = first.sample_bilinear(lon, lat);
        if h.is_nan() {
            second.sample_bilinear(lon, lat)
        } else {
            h
        }
    }

    /// Type and height of a station once derivation rules are applied
    fn resolve_station(&self, request: &TerrainEffectRequest<'_>, i: usize) -> (StationType, f64) {
        let (lon, lat) = (request.lon[i], request.lat[i]);
        let mut station_type = request.station_type;

        if request.auto_identify_sea_surface && station_type == StationType::Land {
            let in_water = match self.coastline {
                Some(coast) => coast.is_water(lon, lat),
                None => self.model_height(lon, lat, Band::Near) < 0.0,
            };
            if in_water {
                station_type = StationType::SeaSurface;
            }
        }

        let elevation = match (request.elevation, station_type) {
            (Some(elevation), _) => elevation[i],
            (None, StationType::SeaSurface) => 0.0,
            (None, _) => self.model_height(lon, lat, Band::Near),
        };
        (station_type, elevation)
    }

    /// Height at which the prisms are evaluated for a resolved station
    fn evaluation_height(station_type: StationType, elevation: f64) -> f64 {
        match station_type {
            StationType::SeaBottom if !elevation.is_nan() => 0.0,
            _ => elevation,
        }
    }

    /// Terrain effect (mGal) at one station; NaN height gives NaN
    fn station_effect(&self, lon: f64, lat: f64, elevation: f64) -> (f64, usize) {
        if !(elevation.is_finite() && lon.is_finite() && lat.is_finite()) {
            return (f64::NAN, 0);
        }
        let (m_lon, m_lat) = meters_per_degree(lat);
        let rock = self.params.rock_density;
        let contrast = self.params.water_density - rock;

        let mut gz = 0.0;
        let mut missing = 0usize;
        for cell in &self.cells {
            let h = self.model_height(lon + cell.dx / m_lon, lat + cell.dy / m_lat, cell.band);
            if h.is_nan() {
                missing += 1;
                continue;
            }
            if h == 0.0 {
                continue;
            }
            let drop = if self.params.curvature {
                (cell.dx * cell.dx + cell.dy * cell.dy) / (2.0 * EARTH_RADIUS_M)
            } else {
                0.0
            };
            let (top, bottom, density) = if h > 0.0 { (h, 0.0, rock) } else { (0.0, h, contrast) };
            gz += density
                * prism_gz(
                    [cell.dx - cell.half, cell.dx + cell.half],
                    [cell.dy - cell.half, cell.dy + cell.half],
                    [bottom - drop - elevation, top - drop - elevation],
                );
        }
        (GRAVITATIONAL_CONSTANT * gz * SI_TO_MGAL, missing)
    }
}

impl TerrainEffectModel for PrismTerrainModel<'_> {
    fn terrain_effect(&self, request: &TerrainEffectRequest<'_>) -> GravResult<TerrainEffectResult> {
        request.validate()?;
        let n = request.len();
        log::info!(
            "Computing terrain effect for {} {} stations ({} prisms each)",
            n,
            request.station_type,
            self.cells.len()
        );

        let mut terrain_effect = StationField::zeros(n);
        let mut station_elevation = StationField::zeros(n);
        let mut station_types = Vec::with_capacity(n);
        let mut reclassified = 0usize;
        let mut missing_cells = 0usize;

        for i in 0..n {
            let (station_type, elevation) = self.resolve_station(request, i);
            if station_type != request.station_type {
                reclassified += 1;
            }
            let height = Self::evaluation_height(station_type, elevation);
            let (te, missing) = self.station_effect(request.lon[i], request.lat[i], height);
            terrain_effect[i] = te;
            station_elevation[i] = elevation;
            station_types.push(station_type);
            missing_cells += missing;
        }

        if reclassified > 0 {
            log::info!("{} stations re-classified as sea-surface stations", reclassified);
        }
        if missing_cells > 0 {
            log::debug!("{} prisms skipped outside DTBM coverage", missing_cells);
        }
        let undefined = terrain_effect.iter().filter(|v| v.is_nan()).count();
        if undefined > 0 {
            log::warn!("{} stations have no usable height, terrain effect is NaN", undefined);
        }

        Ok(TerrainEffectResult {
            terrain_effect,
            station_elevation,
            station_types,
        })
    }
}

fn build_cells(params: &TerrainEffectParams) -> Vec<Cell> {
    let (r1, r2) = (params.inner_radius_m, params.outer_radius_m);
    let (gs1, gs2) = (params.inner_step_m, params.outer_step_m);
    let mut cells = Vec::new();

    let n1 = (r1 / gs1).ceil() as i64;
    for i in -n1..=n1 {
        for j in -n1..=n1 {
            let (dx, dy) = (i as f64 * gs1, j as f64 * gs1);
            if dx.hypot(dy) <= r1 {
                cells.push(Cell { dx, dy, half: gs1 / 2.0, band: Band::Near });
            }
        }
    }

    let subdivisions = (gs2 / gs1).round().max(1.0) as i64;
    let sub = gs2 / subdivisions as f64;
    let n2 = (r2 / gs2).ceil() as i64;
    for i in -n2..=n2 {
        for j in -n2..=n2 {
            let (dx, dy) = (i as f64 * gs2, j as f64 * gs2);
            if dx.hypot(dy) > r2 {
                continue;
            }
            let half = gs2 / 2.0;
            let nearest = (dx.abs() - half).max(0.0).hypot((dy.abs() - half).max(0.0));
            let farthest = (dx.abs() + half).hypot(dy.abs() + half);
            if nearest > r1 {
                cells.push(Cell { dx, dy, half, band: Band::Far });
            } else if farthest > r1 {
                for a in 0..subdivisions {
                    for b in 0..subdivisions {
                        let sx = dx - half + (a as f64 + 0.5) * sub;
                        let sy = dy - half + (b as f64 + 0.5) * sub;
                        if sx.hypot(sy) > r1 {
                            cells.push(Cell { dx: sx, dy: sy, half: sub / 2.0, band: Band::Far });
                        }
                    }
                }
            }
        }
    }
    cells
}

/// Write per-station terrain effects as a whitespace table
pub fn write_terrain_effect_table<P: AsRef<Path>>(
    path: P,
    lon: &StationField,
    lat: &StationField,
    result: &TerrainEffectResult,
) -> GravResult<()> {
    let n = lon.len();
    check_len("lat", n, lat.len())?;
    check_len("te", n, result.terrain_effect.len())?;
    check_len("station_types", n, result.station_types.len())?;

    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent)?;
    }
    log::info!("Writing terrain effect to: {}", path.as_ref().display());

    let mut out = BufWriter::new(File::create(path.as_ref())?);
    writeln!(out, "# lon lat elevation_m station_type te_mgal")?;
    for i in 0..n {
        writeln!(
            out,
            "{:.6} {:.6} {:.2} {} {:.4}",
            lon[i],
            lat[i],
            result.station_elevation[i],
            result.station_types[i].code(),
            result.terrain_effect[i]
        )?;
    }
    out.flush()?;
    Ok(())
}
