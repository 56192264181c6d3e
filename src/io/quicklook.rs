//! Quicklook PNG figures rendered through GDAL's MEM and PNG drivers.

use crate::types::{BoundingBox, GeoTransform, GravResult, StationField};
use gdal::DriverManager;
use ndarray::{s, Array2, Array3};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Piecewise-linear colour ramps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorRamp {
    /// Bathymetry blues through coastal greens to highland browns
    Terrain,
    /// Blue to red, for anomalies
    Rainbow,
}

impl ColorRamp {
    fn stops(&self) -> &'static [(f64, [u8; 3])] {
        match self {
            ColorRamp::Terrain => &[
                (0.00, [51, 51, 153]),
                (0.15, [0, 153, 255]),
                (0.25, [0, 204, 102]),
                (0.50, [255, 255, 153]),
                (0.75, [128, 92, 84]),
                (1.00, [255, 255, 255]),
            ],
            ColorRamp::Rainbow => &[
                (0.00, [48, 18, 59]),
                (0.20, [40, 120, 230]),
                (0.40, [30, 200, 150]),
                (0.60, [170, 230, 50]),
                (0.80, [250, 150, 30]),
                (1.00, [170, 20, 10]),
            ],
        }
    }

    /// Colour at `t` in [0, 1] (clamped)
    pub fn color(&self, t: f64) -> [u8; 3] {
        let stops = self.stops();
        let t = t.clamp(0.0, 1.0);
        for pair in stops.windows(2) {
            let (t0, c0) = pair[0];
            let (t1, c1) = pair[1];
            if t <= t1 {
                let f = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
                let mut rgb = [0u8; 3];
                for k in 0..3 {
                    rgb[k] = (c0[k] as f64 + f * (c1[k] as f64 - c0[k] as f64)).round() as u8;
                }
                return rgb;
            }
        }
        stops[stops.len() - 1].1
    }
}

/// Colour-scale bounds in ascending order, whatever order they were given in
pub fn normalize_range(range: (f64, f64)) -> (f64, f64) {
    if range.0 <= range.1 {
        range
    } else {
        log::debug!("Colour bounds {:?} are inverted, using ({}, {})", range, range.1, range.0);
        (range.1, range.0)
    }
}

/// RGBA raster image, `(rows, cols, 4)`
#[derive(Debug, Clone, PartialEq)]
pub struct Quicklook {
    pixels: Array3<u8>,
    transform: GeoTransform,
}

impl Quicklook {
    /// Colour a grid; NaN cells are transparent
    pub fn render(values: &Array2<f64>, transform: GeoTransform, ramp: ColorRamp, range: (f64, f64)) -> Self {
        let (lo, hi) = normalize_range(range);
        let span = if hi > lo { hi - lo } else { 1.0 };
        let (rows, cols) = values.dim();
        let mut pixels = Array3::<u8>::zeros((rows, cols, 4));

        for ((r, c), &v) in values.indexed_iter() {
            if v.is_nan() {
                continue;
            }
            let rgb = ramp.color((v - lo) / span);
            pixels[[r, c, 0]] = rgb[0];
            pixels[[r, c, 1]] = rgb[1];
            pixels[[r, c, 2]] = rgb[2];
            pixels[[r, c, 3]] = 255;
        }
        Self { pixels, transform }
    }

    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        let (rows, cols, _) = self.pixels.dim();
        (rows, cols)
    }

    pub fn pixel(&self, row: usize, col: usize) -> [u8; 4] {
        [
            self.pixels[[row, col, 0]],
            self.pixels[[row, col, 1]],
            self.pixels[[row, col, 2]],
            self.pixels[[row, col, 3]],
        ]
    }

    fn paint(&mut self, row: i64, col: i64, rgb: [u8; 3]) {
        let (rows, cols) = self.dim();
        if row < 0 || col < 0 || row as usize >= rows || col as usize >= cols {
            return;
        }
        let (r, c) = (row as usize, col as usize);
        self.pixels[[r, c, 0]] = rgb[0];
        self.pixels[[r, c, 1]] = rgb[1];
        self.pixels[[r, c, 2]] = rgb[2];
        self.pixels[[r, c, 3]] = 255;
    }

    /// Square markers at map coordinates
    pub fn draw_points(&mut self, xs: &StationField, ys: &StationField, rgb: [u8; 3], radius: i64) {
        for (&x, &y) in xs.iter().zip(ys.iter()) {
            if !(x.is_finite() && y.is_finite()) {
                continue;
            }
            let (col, row) = self.transform.map_to_pixel(x, y);
            let (row, col) = (row.floor() as i64, col.floor() as i64);
            for dr in -radius..=radius {
                for dc in -radius..=radius {
                    self.paint(row + dr, col + dc, rgb);
                }
            }
        }
    }

    /// One-pixel outline of a box in map coordinates
    pub fn draw_box(&mut self, bbox: &BoundingBox, rgb: [u8; 3]) {
        let (c0, r0) = self.transform.map_to_pixel(bbox.min_x, bbox.max_y);
        let (c1, r1) = self.transform.map_to_pixel(bbox.max_x, bbox.min_y);
        let (c0, c1) = (c0.min(c1).floor() as i64, c0.max(c1).floor() as i64);
        let (r0, r1) = (r0.min(r1).floor() as i64, r0.max(r1).floor() as i64);
        for c in c0..=c1 {
            self.paint(r0, c, rgb);
            self.paint(r1, c, rgb);
        }
        for r in r0..=r1 {
            self.paint(r, c0, rgb);
            self.paint(r, c1, rgb);
        }
    }

    /// Encode as PNG (4 bands, alpha for no-data)
    pub fn save_png<P: AsRef<Path>>(&self, output_path: P) -> GravResult<()> {
        log::info!("Saving quicklook: {}", output_path.as_ref().display());
        let (rows, cols) = self.dim();

        let mem_driver = DriverManager::get_driver_by_name("MEM")?;
        let mut dataset = mem_driver.create_with_band_type::<u8, _>("", cols as isize, rows as isize, 4)?;
        dataset.set_geo_transform(&self.transform.to_gdal())?;

        for band in 0..4 {
            let data: Vec<u8> = self.pixels.slice(s![.., .., band]).iter().copied().collect();
            let buffer = gdal::raster::Buffer::new((cols, rows), data);
            let mut rasterband = dataset.rasterband(band as isize + 1)?;
            rasterband.write((0, 0), (cols, rows), &buffer)?;
        }

        let png_driver = DriverManager::get_driver_by_name("PNG")?;
        dataset.create_copy(&png_driver, output_path.as_ref(), &[])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_ramp_endpoints_and_clamping() {
        let ramp = ColorRamp::Rainbow;
        assert_eq!(ramp.color(0.0), [48, 18, 59]);
        assert_eq!(ramp.color(1.0), [170, 20, 10]);
        assert_eq!(ramp.color(-3.0), ramp.color(0.0));
        assert_eq!(ramp.color(7.0), ramp.color(1.0));
        assert_eq!(ColorRamp::Terrain.color(0.5), [255, 255, 153]);
    }

    #[test]
    fn test_inverted_range_is_normalized() {
        assert_eq!(normalize_range((80.0, 40.0)), (40.0, 80.0));
        assert_eq!(normalize_range((-150.0, 500.0)), (-150.0, 500.0));
    }

    #[test]
    fn test_render_makes_nan_transparent() {
        let values = array![[40.0, f64::NAN], [60.0, 80.0]];
        let gt = GeoTransform::north_up(0.0, 2.0, 1.0, 1.0);
        let img = Quicklook::render(&values, gt, ColorRamp::Rainbow, (80.0, 40.0));

        assert_eq!(img.pixel(0, 1)[3], 0);
        assert_eq!(img.pixel(0, 0), [48, 18, 59, 255]);
        assert_eq!(img.pixel(1, 1), [170, 20, 10, 255]);
    }

    #[test]
    fn test_markers_and_box_stay_inside_image() {
        let values = Array2::from_elem((10, 10), 0.0);
        let gt = GeoTransform::north_up(0.0, 10.0, 1.0, 1.0);
        let mut img = Quicklook::render(&values, gt, ColorRamp::Terrain, (0.0, 1.0));

        img.draw_points(&array![0.5, 50.0], &array![9.5, 50.0], [255, 0, 0], 1);
        assert_eq!(img.pixel(0, 0), [255, 0, 0, 255]);
        assert_eq!(img.pixel(1, 1), [255, 0, 0, 255]);

        img.draw_box(&BoundingBox { min_x: 2.5, max_x: 6.5, min_y: 2.5, max_y: 6.5 }, [0, 0, 0]);
        assert_eq!(img.pixel(3, 2), [0, 0, 0, 255]);
        assert_eq!(img.pixel(7, 6), [0, 0, 0, 255]);
        assert_ne!(img.pixel(5, 4), [0, 0, 0, 255]);
    }
}
