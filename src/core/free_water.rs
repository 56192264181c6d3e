//! Normal gravity and free-water reduction of sea-bottom readings.
//!
//! References:
//! - Moritz, H. (1980). Geodetic Reference System 1980. Bulletin Géodésique 54.
//! - Hinze, W. J. et al. (2005). New standards for reducing gravity data:
//!   The North American gravity database. Geophysics 70(4).

use crate::types::{check_len, GravResult, StationField};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// GRS80 normal gravity at the equator (mGal)
pub const GRS80_GAMMA_E: f64 = 978_032.677_15;
/// GRS80 Somigliana constant k
pub const GRS80_K: f64 = 0.001_931_851_353;
/// GRS80 first eccentricity squared
pub const GRS80_E2: f64 = 0.006_694_380_022_90;
/// Newtonian constant of gravitation (m^3 kg^-1 s^-2)
pub const GRAVITATIONAL_CONSTANT: f64 = 6.674_30e-11;
/// Normal free-air gradient (mGal/m)
pub const FREE_AIR_GRADIENT: f64 = 0.3086;
/// m/s^2 to mGal
pub const SI_TO_MGAL: f64 = 1.0e5;

/// Closed-form Somigliana normal gravity on the GRS80 ellipsoid (mGal)
pub fn normal_gravity_grs80(latitude_deg: f64) -> f64 {
    let s2 = latitude_deg.to_radians().sin().powi(2);
    GRS80_GAMMA_E * (1.0 + GRS80_K * s2) / (1.0 - GRS80_E2 * s2).sqrt()
}

/// Atmospheric correction (mGal) at a height above sea level (m).
///
/// At sea level this is 0.874 mGal.
pub fn atmospheric_correction(height_m: f64) -> f64 {
    0.874 - 9.9e-5 * height_m + 3.56e-9 * height_m * height_m
}

/// Vertical gravity gradient inside a water column (mGal/m): the free-air
/// gradient reduced by twice the attraction of a water slab.
pub fn water_column_gradient(water_density: f64) -> f64 {
    FREE_AIR_GRADIENT - 4.0 * std::f64::consts::PI * GRAVITATIONAL_CONSTANT * water_density * SI_TO_MGAL
}

/// Free-water correction (mGal) for a station at `height_m` (negative below sea level).
///
/// Grows linearly with depth; NaN heights give NaN.
pub fn free_water_correction(height_m: f64, water_density: f64) -> f64 {
    -height_m * water_column_gradient(water_density)
}

/// Free-water stage parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreeWaterParams {
    /// Systematic offset added to every observed reading (mGal)
    pub datum_offset_mgal: f64,
    /// Sea water density (kg/m^3)
    pub water_density: f64,
}

impl Default for FreeWaterParams {
    fn default() -> Self {
        Self {
            datum_offset_mgal: -15.42,
            water_density: 1030.0,
        }
    }
}

/// Outputs of the free-water stage, aligned with the input stations
#[derive(Debug, Clone, PartialEq)]
pub struct FreeWaterResult {
    /// Normal gravity minus the sea-level atmospheric correction (gth)
    pub normal_gravity: StationField,
    /// Depth correction (fwc)
    pub correction: StationField,
    /// Free-water anomaly (fa)
    pub anomaly: StationField,
}

/// Free-water correction processor
#[derive(Debug, Clone, Default)]
pub struct FreeWaterCorrector {
    params: FreeWaterParams,
}

impl FreeWaterCorrector {
    pub fn new(params: FreeWaterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &FreeWaterParams {
        &self.params
    }

    /// `fa = gobs + offset - (gth + fwc)` for every station
    pub fn anomaly(&self, observed: f64, normal_gravity: f64, correction: f64) -> f64 {
        observed + self.params.datum_offset_mgal - (normal_gravity + correction)
    }

    pub fn apply(
        &self,
        latitude: &StationField,
        height: &StationField,
        observed: &StationField,
    ) -> GravResult<FreeWaterResult> {
        let n = latitude.len();
        check_len("hnew", n, height.len())?;
        check_len("gobs", n, observed.len())?;

        log::debug!(
            "Free-water parameters: datum offset {:.2} mGal, water density {:.0} kg/m3",
            self.params.datum_offset_mgal,
            self.params.water_density
        );

        // stations are referenced to sea level, so the atmospheric term is constant
        let atm = atmospheric_correction(0.0);
        let normal_gravity = latitude.mapv(|lat| normal_gravity_grs80(lat) - atm);
        let correction = height.mapv(|h| free_water_correction(h, self.params.water_density));

        let mut anomaly = StationField::zeros(n);
        Zip::from(&mut anomaly)
            .and(observed)
            .and(&normal_gravity)
            .and(&correction)
            .for_each(|fa, &gobs, &gth, &fwc| *fa = self.anomaly(gobs, gth, fwc));

        let nan_count = anomaly.iter().filter(|v| v.is_nan()).count();
        if nan_count > 0 {
            log::warn!("{} stations have an undefined free-water anomaly", nan_count);
        }
        log::info!("Free-water anomaly computed for {} stations", n);

        Ok(FreeWaterResult {
            normal_gravity,
            correction,
            anomaly,
        })
    }
}
