//! Coordinate reprojection between EPSG coordinate systems.
//!
//! - `GdalReprojector`: any EPSG pair GDAL/PROJ knows, including datum shifts
//! - `UtmReprojector`: closed-form WGS84 <-> UTM, no native dependency

use crate::types::{check_len, BoundingBox, GravError, GravResult, StationField};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use std::f64::consts::PI;

/// EPSG code of WGS84 geographic coordinates
pub const EPSG_WGS84: u32 = 4326;

/// Converts coordinate arrays from one EPSG system to another.
///
/// Geographic systems take (lon, lat) in degrees; projected systems
/// (easting, northing) in meters. Non-finite inputs give NaN outputs.
pub trait Reprojector {
    fn reproject(
        &self,
        xs: &StationField,
        ys: &StationField,
        src_epsg: u32,
        dst_epsg: u32,
    ) -> GravResult<(StationField, StationField)>;
}

/// Reprojection through GDAL's `OGRCoordinateTransformation`
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalReprojector;

impl GdalReprojector {
    fn spatial_ref(epsg: u32) -> GravResult<SpatialRef> {
        let srs = SpatialRef::from_epsg(epsg)?;
        // keep (lon, lat) / (x, y) order regardless of the authority axis order
        srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
        Ok(srs)
    }
}

impl Reprojector for GdalReprojector {
    fn reproject(
        &self,
        xs: &StationField,
        ys: &StationField,
        src_epsg: u32,
        dst_epsg: u32,
    ) -> GravResult<(StationField, StationField)> {
        check_len("y", xs.len(), ys.len())?;
        if src_epsg == dst_epsg {
            return Ok((xs.clone(), ys.clone()));
        }
        log::debug!("Reprojecting {} points EPSG:{} -> EPSG:{}", xs.len(), src_epsg, dst_epsg);

        let transform = CoordTransform::new(&Self::spatial_ref(src_epsg)?, &Self::spatial_ref(dst_epsg)?)?;

        // PROJ fails the whole batch on a single NaN, so only finite points go through
        let valid: Vec<usize> = (0..xs.len())
            .filter(|&i| xs[i].is_finite() && ys[i].is_finite())
            .collect();
        let mut x: Vec<f64> = valid.iter().map(|&i| xs[i]).collect();
        let mut y: Vec<f64> = valid.iter().map(|&i| ys[i]).collect();
        let mut z = vec![0.0; valid.len()];
        if !valid.is_empty() {
            transform.transform_coords(&mut x, &mut y, &mut z).map_err(|e| {
                GravError::Projection(format!("EPSG:{} -> EPSG:{} failed: {}", src_epsg, dst_epsg, e))
            })?;
        }

        let mut out_x = StationField::from_elem(xs.len(), f64::NAN);
        let mut out_y = StationField::from_elem(xs.len(), f64::NAN);
        for (k, &i) in valid.iter().enumerate() {
            out_x[i] = x[k];
            out_y[i] = y[k];
        }
        Ok((out_x, out_y))
    }
}

/// Transverse Mercator on the WGS84 ellipsoid (Snyder's series)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtmZone {
    zone: u8,
    northern: bool,
    central_meridian: f64,
}

impl UtmZone {
    const A: f64 = 6_378_137.0;
    const F: f64 = 1.0 / 298.257_223_563;
    const K0: f64 = 0.9996;
    const FALSE_EASTING: f64 = 500_000.0;

    pub fn new(zone: u8, northern: bool) -> GravResult<Self> {
        if !(1..=60).contains(&zone) {
            return Err(GravError::Projection(format!("UTM zone must be 1-60, got {}", zone)));
        }
        Ok(Self {
            zone,
            northern,
            central_meridian: (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0,
        })
    }

    /// WGS84 / UTM zone from its EPSG code (326zz north, 327zz south)
    pub fn from_epsg(epsg: u32) -> Option<Self> {
        match epsg {
            32601..=32660 => Self::new((epsg - 32600) as u8, true).ok(),
            32701..=32760 => Self::new((epsg - 32700) as u8, false).ok(),
            _ => None,
        }
    }

    pub fn zone(&self) -> u8 {
        self.zone
    }

    pub fn epsg(&self) -> u32 {
        if self.northern {
            32600 + self.zone as u32
        } else {
            32700 + self.zone as u32
        }
    }

    fn false_northing(&self) -> f64 {
        if self.northern {
            0.0
        } else {
            10_000_000.0
        }
    }

    /// (lon, lat) degrees -> (easting, northing) meters
    pub fn forward(&self, lon: f64, lat: f64) -> (f64, f64) {
        let phi = lat * PI / 180.0;
        let dlam = (lon - self.central_meridian) * PI / 180.0;

        let e2 = 2.0 * Self::F - Self::F * Self::F;
        let ep2 = e2 / (1.0 - e2);
        let (e4, e6) = (e2 * e2, e2 * e2 * e2);

        let n = Self::A / (1.0 - e2 * phi.sin().powi(2)).sqrt();
        let t = phi.tan().powi(2);
        let c = ep2 * phi.cos().powi(2);
        let a = dlam * phi.cos();

        let m = Self::A
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * phi).sin());

        let easting = Self::K0
            * n
            * (a + (1.0 - t + c) * a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0)
            + Self::FALSE_EASTING;
        let northing = Self::K0
            * (m + n
                * phi.tan()
                * (a * a / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0))
            + self.false_northing();

        (easting, northing)
    }

    /// (easting, northing) meters -> (lon, lat) degrees
    pub fn inverse(&self, easting: f64, northing: f64) -> (f64, f64) {
        let x = easting - Self::FALSE_EASTING;
        let y = northing - self.false_northing();

        let e2 = 2.0 * Self::F - Self::F * Self::F;
        let ep2 = e2 / (1.0 - e2);
        let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

        let mu = y / Self::K0 / (Self::A * (1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2.powi(3) / 256.0));
        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let sin2 = phi1.sin().powi(2);
        let n1 = Self::A / (1.0 - e2 * sin2).sqrt();
        let r1 = Self::A * (1.0 - e2) / (1.0 - e2 * sin2).powf(1.5);
        let t1 = phi1.tan().powi(2);
        let c1 = ep2 * phi1.cos().powi(2);
        let d = x / (n1 * Self::K0);

        let phi = phi1
            - (n1 * phi1.tan() / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);
        let dlam = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5) / 120.0)
            / phi1.cos();

        (self.central_meridian + dlam * 180.0 / PI, phi * 180.0 / PI)
    }
}

/// Closed-form reprojection between WGS84 geographic and WGS84 / UTM
#[derive(Debug, Clone, Copy, Default)]
pub struct UtmReprojector;

impl UtmReprojector {
    fn zone(epsg: u32) -> GravResult<UtmZone> {
        UtmZone::from_epsg(epsg).ok_or_else(|| {
            GravError::Projection(format!(
                "EPSG:{} is not WGS84 / UTM; use the GDAL reprojector for other systems",
                epsg
            ))
        })
    }
}

impl Reprojector for UtmReprojector {
    fn reproject(
        &self,
        xs: &StationField,
        ys: &StationField,
        src_epsg: u32,
        dst_epsg: u32,
    ) -> GravResult<(StationField, StationField)> {
        check_len("y", xs.len(), ys.len())?;
        if src_epsg == dst_epsg {
            return Ok((xs.clone(), ys.clone()));
        }

        let (lon, lat) = if src_epsg == EPSG_WGS84 {
            (xs.clone(), ys.clone())
        } else {
            let zone = Self::zone(src_epsg)?;
            let mut lon = StationField::zeros(xs.len());
            let mut lat = StationField::zeros(xs.len());
            for i in 0..xs.len() {
                let (lo, la) = zone.inverse(xs[i], ys[i]);
                lon[i] = lo;
                lat[i] = la;
            }
            (lon, lat)
        };
        if dst_epsg == EPSG_WGS84 {
            return Ok((lon, lat));
        }

        let zone = Self::zone(dst_epsg)?;
        let mut x = StationField::zeros(xs.len());
        let mut y = StationField::zeros(xs.len());
        for i in 0..xs.len() {
            let (e, n) = zone.forward(lon[i], lat[i]);
            x[i] = e;
            y[i] = n;
        }
        Ok((x, y))
    }
}

/// Study-area limits in geographic and metric coordinates.
///
/// The metric box is always derived from the geographic one: it is the
/// envelope of the four reprojected corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StudyArea {
    pub geographic: BoundingBox,
    pub metric: BoundingBox,
    pub geographic_epsg: u32,
    pub projected_epsg: u32,
}

impl StudyArea {
    pub fn new(
        geographic: BoundingBox,
        geographic_epsg: u32,
        projected_epsg: u32,
        reprojector: &dyn Reprojector,
    ) -> GravResult<Self> {
        geographic.validate()?;
        let xs = StationField::from(vec![geographic.min_x, geographic.max_x, geographic.max_x, geographic.min_x]);
        let ys = StationField::from(vec![geographic.min_y, geographic.min_y, geographic.max_y, geographic.max_y]);
        let (mx, my) = reprojector.reproject(&xs, &ys, geographic_epsg, projected_epsg)?;
        let metric = BoundingBox::enclosing(
            mx.as_slice().unwrap_or(&[]),
            my.as_slice().unwrap_or(&[]),
        )?;

        log::info!(
            "Study area: lon [{}, {}] lat [{}, {}] -> x [{:.0}, {:.0}] y [{:.0}, {:.0}] (EPSG:{}, {:.1} x {:.1} km)",
            geographic.min_x,
            geographic.max_x,
            geographic.min_y,
            geographic.max_y,
            metric.min_x,
            metric.max_x,
            metric.min_y,
            metric.max_y,
            projected_epsg,
            metric.width() / 1000.0,
            metric.height() / 1000.0
        );
        Ok(Self {
            geographic,
            metric,
            geographic_epsg,
            projected_epsg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_utm_zone_from_epsg() {
        let zone = UtmZone::from_epsg(32633).unwrap();
        assert_eq!(zone.zone(), 33);
        assert_eq!(zone.epsg(), 32633);
        assert_eq!(UtmZone::from_epsg(32733).unwrap().epsg(), 32733);
        assert!(UtmZone::from_epsg(4326).is_none());
        assert!(UtmZone::new(61, true).is_err());
    }

    #[test]
    fn test_utm_central_meridian_and_roundtrip() {
        let zone = UtmZone::from_epsg(32633).unwrap();
        // on the central meridian the easting is the false easting
        let (e, n) = zone.forward(15.0, 41.5);
        assert!((e - 500_000.0).abs() < 1e-6);
        assert!((n - 4_594_000.0).abs() < 2_000.0);

        let (e, n) = zone.forward(16.35, 41.5);
        assert!(e > 600_000.0 && e < 620_000.0);
        let (lon, lat) = zone.inverse(e, n);
        assert!((lon - 16.35).abs() < 1e-6);
        assert!((lat - 41.5).abs() < 1e-6);
    }

    #[test]
    fn test_utm_reprojector_arrays() {
        let reprojector = UtmReprojector;
        let lon = array![15.9, 16.4, f64::NAN];
        let lat = array![41.2, 41.8, 41.5];
        let (x, y) = reprojector.reproject(&lon, &lat, 4326, 32633).unwrap();
        assert!(x[2].is_nan());
        assert!(x[1] > x[0] && y[1] > y[0]);

        let (lon2, lat2) = reprojector.reproject(&x, &y, 32633, 4326).unwrap();
        assert!((lon2[0] - 15.9).abs() < 1e-6 && (lat2[1] - 41.8).abs() < 1e-6);

        assert!(reprojector.reproject(&lon, &lat, 4265, 4326).is_err());
        let (same_x, _) = reprojector.reproject(&lon, &lat, 4326, 4326).unwrap();
        assert_eq!(same_x[0], 15.9);
    }

    #[test]
    fn test_study_area_metric_box_is_derived() {
        let geographic = BoundingBox { min_x: 15.85, max_x: 16.85, min_y: 41.15, max_y: 41.85 };
        let area = StudyArea::new(geographic, 4326, 32633, &UtmReprojector).unwrap();
        assert!(area.metric.min_x < area.metric.max_x);
        assert!(area.metric.min_y < area.metric.max_y);
        // roughly 85 km by 79 km
        assert!((area.metric.width() - 84_700.0).abs() < 1_000.0);
        assert!((area.metric.height() - 79_000.0).abs() < 1_000.0);
    }
}
