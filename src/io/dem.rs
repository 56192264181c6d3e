use crate::types::{BoundingBox, GeoTransform, GravError, GravResult, StationField};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::{s, Array2};
use std::path::Path;

/// Digital Terrain-Bathymetric Model held in memory.
///
/// Heights are meters, positive up. Samples outside the raster or on
/// no-data pixels come back as NaN.
#[derive(Debug, Clone)]
pub struct DemRaster {
    data: Array2<f32>,
    transform: GeoTransform,
    nodata: Option<f32>,
    epsg: Option<u32>,
}

impl DemRaster {
    /// Wrap an in-memory grid (rows north to south)
    pub fn new(data: Array2<f32>, transform: GeoTransform, nodata: Option<f32>) -> GravResult<Self> {
        let (rows, cols) = data.dim();
        if rows == 0 || cols == 0 {
            return Err(GravError::InvalidFormat("DTBM raster is empty".to_string()));
        }
        if transform.rotation_x != 0.0 || transform.rotation_y != 0.0 {
            return Err(GravError::InvalidFormat(
                "Rotated DTBM geotransforms are not supported".to_string(),
            ));
        }
        if transform.pixel_width == 0.0 || transform.pixel_height == 0.0 {
            return Err(GravError::InvalidFormat("DTBM pixel size is zero".to_string()));
        }
        Ok(Self {
            data,
            transform,
            nodata,
            epsg: None,
        })
    }

    /// Read band 1 of a raster file. The GDAL dataset is closed before returning.
    pub fn open<P: AsRef<Path>>(path: P) -> GravResult<Self> {
        log::info!("Reading DTBM from: {}", path.as_ref().display());

        let dataset = Dataset::open(path.as_ref())?;
        let geo_transform = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();
        log::debug!("DTBM size: {}x{}", width, height);
        log::debug!("DTBM geotransform: {:?}", geo_transform);

        let epsg = dataset
            .spatial_ref()
            .ok()
            .and_then(|srs| srs.auth_code().ok())
            .map(|code| code as u32);

        let rasterband = dataset.rasterband(1)?;
        let nodata = rasterband.no_data_value().map(|v| v as f32);
        let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let data = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| GravError::Processing(format!("Failed to reshape DTBM data: {}", e)))?;

        let mut raster = Self::new(data, GeoTransform::from_gdal(geo_transform), nodata)?;
        raster.epsg = epsg;
        Ok(raster)
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Extent covered by the pixels
    pub fn bounds(&self) -> BoundingBox {
        let (rows, cols) = self.dim();
        let gt = &self.transform;
        let x0 = gt.top_left_x;
        let x1 = gt.top_left_x + cols as f64 * gt.pixel_width;
        let y0 = gt.top_left_y;
        let y1 = gt.top_left_y + rows as f64 * gt.pixel_height;
        BoundingBox {
            min_x: x0.min(x1),
            max_x: x0.max(x1),
            min_y: y0.min(y1),
            max_y: y0.max(y1),
        }
    }

    fn value(&self, row: usize, col: usize) -> f64 {
        let v = self.data[[row, col]];
        if !v.is_finite() || self.nodata.map_or(false, |nd| v == nd) {
            f64::NAN
        } else {
            v as f64
        }
    }

    /// Value of the pixel containing (x, y)
    pub fn sample_nearest(&self, x: f64, y: f64) -> f64 {
        let (col, row) = self.transform.map_to_pixel(x, y);
        let (rows, cols) = self.dim();
        if !(col >= 0.0 && row >= 0.0) || col >= cols as f64 || row >= rows as f64 {
            return f64::NAN;
        }
        self.value(row as usize, col as usize)
    }

    /// Bilinear interpolation between pixel centers.
    ///
    /// Within half a pixel of the border the nearest pixel is used.
    pub fn sample_bilinear(&self, x: f64, y: f64) -> f64 {
        let (col, row) = self.transform.map_to_pixel(x, y);
        let (rows, cols) = self.dim();
        let (cc, rc) = (col - 0.5, row - 0.5);
        if cc < 0.0 || rc < 0.0 || cc >= (cols - 1) as f64 || rc >= (rows - 1) as f64 {
            return self.sample_nearest(x, y);
        }

        let x1 = cc.floor() as usize;
        let y1 = rc.floor() as usize;
        let dx = cc - x1 as f64;
        let dy = rc - y1 as f64;

        let v11 = self.value(y1, x1);
        let v21 = self.value(y1, x1 + 1);
        let v12 = self.value(y1 + 1, x1);
        let v22 = self.value(y1 + 1, x1 + 1);

        v11 * (1.0 - dx) * (1.0 - dy) + v21 * dx * (1.0 - dy) + v12 * (1.0 - dx) * dy + v22 * dx * dy
    }

    /// Nearest-pixel values at many points (NaN outside coverage)
    pub fn sample_points(&self, xs: &StationField, ys: &StationField) -> GravResult<StationField> {
        crate::types::check_len("y", xs.len(), ys.len())?;
        let values: StationField = xs
            .iter()
            .zip(ys.iter())
            .map(|(&x, &y)| self.sample_nearest(x, y))
            .collect();

        let missing = values.iter().filter(|v| v.is_nan()).count();
        if missing > 0 {
            log::warn!("{} of {} points fall outside DTBM coverage", missing, values.len());
        }
        Ok(values)
    }

    /// Sub-raster covering `bbox` (whole pixels)
    pub fn crop(&self, bbox: &BoundingBox) -> GravResult<Self> {
        let (rows, cols) = self.dim();
        let gt = &self.transform;
        let (c0, r0) = gt.map_to_pixel(bbox.min_x, bbox.max_y);
        let (c1, r1) = gt.map_to_pixel(bbox.max_x, bbox.min_y);

        let clamp = |v: f64, n: usize| v.max(0.0).min(n as f64) as usize;
        let (c0, c1) = (clamp(c0.min(c1).floor(), cols), clamp(c0.max(c1).ceil(), cols));
        let (r0, r1) = (clamp(r0.min(r1).floor(), rows), clamp(r0.max(r1).ceil(), rows));
        if c0 >= c1 || r0 >= r1 {
            return Err(GravError::Processing(format!(
                "Crop box {:?} does not overlap the DTBM",
                bbox
            )));
        }

        let data = self.data.slice(s![r0..r1, c0..c1]).to_owned();
        let transform = GeoTransform {
            top_left_x: gt.top_left_x + c0 as f64 * gt.pixel_width,
            top_left_y: gt.top_left_y + r0 as f64 * gt.pixel_height,
            ..*gt
        };
        Ok(Self {
            data,
            transform,
            nodata: self.nodata,
            epsg: self.epsg,
        })
    }

    /// (min, max) over valid pixels
    pub fn value_range(&self) -> Option<(f64, f64)> {
        let (rows, cols) = self.dim();
        let mut range: Option<(f64, f64)> = None;
        for r in 0..rows {
            for c in 0..cols {
                let v = self.value(r, c);
                if v.is_nan() {
                    continue;
                }
                range = Some(match range {
                    Some((lo, hi)) => (lo.min(v), hi.max(v)),
                    None => (v, v),
                });
            }
        }
        range
    }
}

/// Save a grid as a Float32 GeoTIFF with NaN no-data
pub fn write_geotiff<P: AsRef<Path>>(
    grid: &Array2<f64>,
    transform: &GeoTransform,
    epsg: u32,
    output_path: P,
) -> GravResult<()> {
    log::info!("Saving grid as GeoTIFF: {}", output_path.as_ref().display());

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = grid.dim();

    let mut dataset = driver.create_with_band_type::<f32, _>(
        output_path.as_ref(),
        width as isize,
        height as isize,
        1,
    )?;
    dataset.set_geo_transform(&transform.to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(epsg)?)?;

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<f32> = grid.iter().map(|&v| v as f32).collect();
    let buffer = gdal::raster::Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;
    rasterband.set_no_data_value(Some(f64::NAN))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ramp() -> DemRaster {
        // 3x4 pixels of 1 degree, top-left at (10, 45)
        let data = array![
            [0.0f32, 1.0, 2.0, 3.0],
            [10.0, 11.0, 12.0, 13.0],
            [20.0, 21.0, -9999.0, 23.0],
        ];
        DemRaster::new(data, GeoTransform::north_up(10.0, 45.0, 1.0, 1.0), Some(-9999.0)).unwrap()
    }

    #[test]
    fn test_nearest_sampling_and_coverage() {
        let dem = ramp();
        assert_eq!(dem.sample_nearest(10.2, 44.9), 0.0);
        assert_eq!(dem.sample_nearest(13.9, 42.1), 23.0);
        assert!(dem.sample_nearest(12.5, 42.5).is_nan()); // no-data
        assert!(dem.sample_nearest(9.9, 44.0).is_nan()); // west of raster
        assert!(dem.sample_nearest(11.0, 41.9).is_nan()); // south of raster
    }

    #[test]
    fn test_bilinear_between_centers() {
        let dem = ramp();
        // halfway between the centers of (0,0) and (0,1)
        assert!((dem.sample_bilinear(11.0, 44.5) - 0.5).abs() < 1e-9);
        // halfway between rows 0 and 1 at column 0
        assert!((dem.sample_bilinear(10.5, 44.0) - 5.0).abs() < 1e-9);
        // touching the no-data pixel
        assert!(dem.sample_bilinear(12.2, 43.2).is_nan());
    }

    #[test]
    fn test_sample_points_propagates_nan() {
        let dem = ramp();
        let values = dem
            .sample_points(&array![10.5, 30.0, 11.5], &array![44.5, 44.5, 43.5])
            .unwrap();
        assert_eq!(values[0], 0.0);
        assert!(values[1].is_nan());
        assert_eq!(values[2], 11.0);
    }

    #[test]
    fn test_crop_and_bounds() {
        let dem = ramp();
        let bounds = dem.bounds();
        assert_eq!(bounds, BoundingBox { min_x: 10.0, max_x: 14.0, min_y: 42.0, max_y: 45.0 });

        let cropped = dem
            .crop(&BoundingBox { min_x: 11.2, max_x: 12.8, min_y: 43.5, max_y: 44.5 })
            .unwrap();
        assert_eq!(cropped.dim(), (2, 2));
        assert_eq!(cropped.sample_nearest(11.5, 44.5), 1.0);
        assert_eq!(cropped.value_range(), Some((1.0, 12.0)));
    }
}
