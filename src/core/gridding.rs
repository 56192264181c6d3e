//! Interpolation of scattered station values onto a regular metric lattice.

use crate::types::{check_len, BoundingBox, GeoTransform, GravError, GravResult, StationField};
use geo::{ConvexHull, Intersects, MultiPoint, Point};
use ndarray::{Array1, Array2, Zip};
use serde::{Deserialize, Serialize};
use spade::{DelaunayTriangulation, FloatTriangulation, HasPosition, Point2, Triangulation};

/// Interpolation scheme for scattered data
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMethod {
    /// Value of the closest station
    Nearest,
    /// Inverse distance weighting over all stations
    InverseDistance { power: f64 },
    /// Piecewise linear over the Delaunay triangulation
    Linear,
    /// Sibson natural-neighbour interpolation with C1 gradient blending
    Cubic,
}

impl Default for InterpolationMethod {
    fn default() -> Self {
        InterpolationMethod::Cubic
    }
}

/// Sibson blend between the C0 and gradient-based estimates
const C1_FLATNESS: f64 = 0.5;

/// Regular grid with north-up rows: `values[[r, c]]` sits at `(xs[c], ys[r])`
#[derive(Debug, Clone, PartialEq)]
pub struct GriddedField {
    pub xs: Array1<f64>,
    pub ys: Array1<f64>,
    pub values: Array2<f64>,
}

impl GriddedField {
    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn nan_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }

    /// (min, max) over defined cells
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.values
            .iter()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Geotransform with the lattice nodes at pixel centers
    pub fn transform(&self) -> GravResult<GeoTransform> {
        if self.xs.len() < 2 || self.ys.len() < 2 {
            return Err(GravError::Processing(
                "Grid needs at least 2x2 nodes for a geotransform".to_string(),
            ));
        }
        let dx = self.xs[1] - self.xs[0];
        let dy = self.ys[0] - self.ys[1];
        Ok(GeoTransform::north_up(
            self.xs[0] - dx / 2.0,
            self.ys[0] + dy / 2.0,
            dx,
            dy,
        ))
    }
}

/// Interpolates irregular points over a bounding box
pub trait Gridder {
    fn grid(
        &self,
        x: &StationField,
        y: &StationField,
        values: &StationField,
        extent: &BoundingBox,
        step: f64,
    ) -> GravResult<GriddedField>;
}

/// Gridder for scattered stations, NaN outside their convex hull
#[derive(Debug, Clone, Copy, Default)]
pub struct ScatteredGridder {
    method: InterpolationMethod,
}

impl ScatteredGridder {
    pub fn new(method: InterpolationMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> InterpolationMethod {
        self.method
    }
}

/// Station with a defined value, as a triangulation vertex
#[derive(Debug, Clone, Copy)]
struct Node {
    x: f64,
    y: f64,
    value: f64,
}

impl HasPosition for Node {
    type Scalar = f64;

    fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

fn triangulate(points: &[(f64, f64, f64)]) -> GravResult<DelaunayTriangulation<Node>> {
    let nodes: Vec<Node> = points
        .iter()
        .filter(|p| !p.2.is_nan())
        .map(|&(x, y, value)| Node { x, y, value })
        .collect();
    let tri = DelaunayTriangulation::<Node>::bulk_load(nodes)
        .map_err(|e| GravError::Processing(format!("Cannot triangulate stations: {}", e)))?;
    if tri.num_inner_faces() == 0 {
        log::warn!(
            "{} stations span no triangle; triangulated grid stays empty",
            tri.num_vertices()
        );
    }
    Ok(tri)
}

/// Squared distance to and value of the closest station
fn nearest(px: f64, py: f64, points: &[(f64, f64, f64)]) -> (f64, f64) {
    let mut best = (f64::INFINITY, f64::NAN);
    for &(x, y, v) in points {
        let d2 = (x - px).powi(2) + (y - py).powi(2);
        if d2 < best.0 {
            best = (d2, v);
        }
    }
    best
}

fn inverse_distance(px: f64, py: f64, points: &[(f64, f64, f64)], power: f64) -> f64 {
    let (mut num, mut den) = (0.0, 0.0);
    for &(x, y, v) in points.iter().filter(|p| !p.2.is_nan()) {
        let d2 = (x - px).powi(2) + (y - py).powi(2);
        let w = d2.powf(-power / 2.0);
        num += w * v;
        den += w;
    }
    num / den
}

/// Evaluate `value_at(x, y, nearest)` on every lattice node inside the hull.
///
/// A node whose closest station carries NaN stays NaN whatever the method.
fn fill<F>(
    xs: &Array1<f64>,
    ys: &Array1<f64>,
    hull: &geo::Polygon<f64>,
    points: &[(f64, f64, f64)],
    mut value_at: F,
) -> Array2<f64>
where
    F: FnMut(f64, f64, (f64, f64)) -> f64,
{
    let mut grid = Array2::from_elem((ys.len(), xs.len()), f64::NAN);
    for (r, &gy) in ys.iter().enumerate() {
        for (c, &gx) in xs.iter().enumerate() {
            if !hull.intersects(&Point::new(gx, gy)) {
                continue;
            }
            let closest = nearest(gx, gy, points);
            if !closest.1.is_nan() {
                grid[[r, c]] = value_at(gx, gy, closest);
            }
        }
    }
    grid
}

/// Lattice nodes from `start` to `end` inclusive of `start`
fn axis(start: f64, end: f64, step: f64) -> Array1<f64> {
    let n = ((end - start) / step + 1e-9).floor() as usize + 1;
    Array1::from_iter((0..n).map(|i| start + i as f64 * step))
}

impl Gridder for ScatteredGridder {
    fn grid(
        &self,
        x: &StationField,
        y: &StationField,
        values: &StationField,
        extent: &BoundingBox,
        step: f64,
    ) -> GravResult<GriddedField> {
        check_len("y", x.len(), y.len())?;
        check_len("values", x.len(), values.len())?;
        extent.validate()?;
        if !(step.is_finite() && step > 0.0) {
            return Err(GravError::Config(format!("Grid step must be positive, got {}", step)));
        }

        let points: Vec<(f64, f64, f64)> = x
            .iter()
            .zip(y.iter())
            .zip(values.iter())
            .filter(|((px, py), _)| px.is_finite() && py.is_finite())
            .map(|((&px, &py), &v)| (px, py, v))
            .collect();
        if points.is_empty() {
            return Err(GravError::Processing("No stations with valid positions to grid".to_string()));
        }

        let hull = MultiPoint::from(points.iter().map(|&(px, py, _)| Point::new(px, py)).collect::<Vec<_>>())
            .convex_hull();

        let xs = axis(extent.min_x, extent.max_x, step);
        let ys = axis(extent.min_y, extent.max_y, step).slice(ndarray::s![..;-1]).to_owned();
        let grid = match self.method {
            InterpolationMethod::Nearest => fill(&xs, &ys, &hull, &points, |_, _, closest| closest.1),
            InterpolationMethod::InverseDistance { power } => {
                fill(&xs, &ys, &hull, &points, |gx, gy, closest| {
                    if closest.0 < 1e-12 {
                        closest.1
                    } else {
                        inverse_distance(gx, gy, &points, power)
                    }
                })
            }
            InterpolationMethod::Linear => {
                let tri = triangulate(&points)?;
                let linear = tri.barycentric();
                fill(&xs, &ys, &hull, &points, |gx, gy, _| {
                    linear
                        .interpolate(|v| v.data().value, Point2::new(gx, gy))
                        .unwrap_or(f64::NAN)
                })
            }
            InterpolationMethod::Cubic => {
                let tri = triangulate(&points)?;
                let natural = tri.natural_neighbor();
                let gradients = natural.estimate_gradients(|v| v.data().value);
                fill(&xs, &ys, &hull, &points, |gx, gy, _| {
                    natural
                        .interpolate_gradient(|v| v.data().value, &gradients, C1_FLATNESS, Point2::new(gx, gy))
                        .unwrap_or(f64::NAN)
                })
            }
        };

        let field = GriddedField { xs, ys, values: grid };
        let (rows, cols) = field.shape();
        log::info!(
            "Gridded {} stations onto {}x{} nodes ({:?}), {} cells without data",
            points.len(),
            rows,
            cols,
            self.method,
            field.nan_count()
        );
        Ok(field)
    }
}

/// Copy the no-data footprint of `reference` onto `target`.
///
/// Both grids must share the same lattice. Every NaN cell of the reference
/// is NaN in the result; the other cells keep the target values.
pub fn apply_nan_mask(reference: &GriddedField, target: &GriddedField) -> GravResult<GriddedField> {
    if reference.shape() != target.shape() {
        return Err(GravError::Processing(format!(
            "Cannot mask a {:?} grid with a {:?} grid",
            target.shape(),
            reference.shape()
        )));
    }

    let mut masked = target.clone();
    Zip::from(&mut masked.values)
        .and(&reference.values)
        .for_each(|t, &r| {
            if r.is_nan() {
                *t = f64::NAN;
            }
        });
    log::debug!(
        "Mask reuse: {} -> {} undefined cells",
        target.nan_count(),
        masked.nan_count()
    );
    Ok(masked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn square_stations() -> (StationField, StationField) {
        (array![0.0, 4000.0, 4000.0, 0.0], array![0.0, 0.0, 4000.0, 4000.0])
    }

    #[test]
    fn test_axis_includes_both_ends_when_aligned() {
        assert_eq!(axis(0.0, 3000.0, 1000.0), array![0.0, 1000.0, 2000.0, 3000.0]);
        assert_eq!(axis(0.0, 2500.0, 1000.0).len(), 3);
        // 0.3 / 0.1 is just below 3 in binary
        assert_eq!(axis(0.0, 0.3, 0.1).len(), 4);
    }

    #[test]
    fn test_grid_is_north_up() {
        let (x, y) = square_stations();
        let v = array![1.0, 2.0, 3.0, 4.0];
        let extent = BoundingBox { min_x: 0.0, max_x: 4000.0, min_y: 0.0, max_y: 4000.0 };
        let field = ScatteredGridder::new(InterpolationMethod::Nearest)
            .grid(&x, &y, &v, &extent, 1000.0)
            .unwrap();

        assert_eq!(field.shape(), (5, 5));
        assert_eq!(field.ys[0], 4000.0);
        assert_eq!(field.values[[0, 0]], 4.0); // north-west corner
        assert_eq!(field.values[[4, 4]], 2.0); // south-east corner
        assert_eq!(field.nan_count(), 0);

        let gt = field.transform().unwrap();
        assert_eq!(gt.pixel_center(0, 0), (0.0, 4000.0));
    }

    #[test]
    fn test_cells_outside_hull_are_nan() {
        // triangle covering the south-west half
        let x = array![0.0, 4000.0, 0.0];
        let y = array![0.0, 0.0, 4000.0];
        let v = array![10.0, 10.0, 10.0];
        let extent = BoundingBox { min_x: 0.0, max_x: 4000.0, min_y: 0.0, max_y: 4000.0 };
        let field = ScatteredGridder::new(InterpolationMethod::InverseDistance { power: 2.0 })
            .grid(&x, &y, &v, &extent, 1000.0)
            .unwrap();

        assert!(field.values[[0, 4]].is_nan()); // north-east corner
        assert_eq!(field.values[[4, 0]], 10.0);
        assert!((field.values[[2, 2]] - 10.0).abs() < 1e-9); // on the hull edge
    }

    #[test]
    fn test_idw_between_values_and_exact_at_stations() {
        let (x, y) = square_stations();
        let v = array![0.0, 10.0, 20.0, 30.0];
        let extent = BoundingBox { min_x: 0.0, max_x: 4000.0, min_y: 0.0, max_y: 4000.0 };
        let field = ScatteredGridder::new(InterpolationMethod::InverseDistance { power: 2.0 })
            .grid(&x, &y, &v, &extent, 1000.0)
            .unwrap();

        assert_eq!(field.values[[4, 0]], 0.0);
        assert!((field.values[[2, 2]] - 15.0).abs() < 1e-9);
        assert!(field.values.iter().all(|&g| (0.0..=30.0).contains(&g)));
    }

    #[test]
    fn test_nan_station_masks_its_neighbourhood() {
        let (x, y) = square_stations();
        let v = array![1.0, f64::NAN, 3.0, 4.0];
        let extent = BoundingBox { min_x: 0.0, max_x: 4000.0, min_y: 0.0, max_y: 4000.0 };
        for method in [
            InterpolationMethod::Nearest,
            InterpolationMethod::InverseDistance { power: 2.0 },
            InterpolationMethod::Linear,
            InterpolationMethod::Cubic,
        ] {
            let field = ScatteredGridder::new(method).grid(&x, &y, &v, &extent, 1000.0).unwrap();
            assert!(field.values[[4, 4]].is_nan(), "{:?}", method);
            assert!(field.values[[4, 3]].is_nan(), "{:?}", method);
            assert!(!field.values[[1, 1]].is_nan(), "{:?}", method);
        }
    }

    #[test]
    fn test_triangulated_methods_reproduce_a_plane() {
        // irregular stations, none on the lattice
        let x = array![130.0, 3870.0, 3950.0, 210.0, 1720.0, 2890.0, 960.0, 2410.0];
        let y = array![90.0, 160.0, 3910.0, 3840.0, 1130.0, 2270.0, 2650.0, 3120.0];
        let plane = |px: f64, py: f64| 12.0 + 0.004 * px - 0.0025 * py;
        let v: StationField = x.iter().zip(y.iter()).map(|(&px, &py)| plane(px, py)).collect();
        let extent = BoundingBox { min_x: 0.0, max_x: 4000.0, min_y: 0.0, max_y: 4000.0 };

        for method in [InterpolationMethod::Linear, InterpolationMethod::Cubic] {
            let field = ScatteredGridder::new(method).grid(&x, &y, &v, &extent, 250.0).unwrap();
            let mut defined = 0;
            for (r, &gy) in field.ys.iter().enumerate() {
                for (c, &gx) in field.xs.iter().enumerate() {
                    let g = field.values[[r, c]];
                    if !g.is_nan() {
                        assert!((g - plane(gx, gy)).abs() < 1e-6, "{:?} at ({}, {}): {}", method, gx, gy, g);
                        defined += 1;
                    }
                }
            }
            assert!(defined > 150, "{:?}: {} defined cells", method, defined);
            // corners lie outside the station hull
            assert!(field.values[[0, 0]].is_nan());
        }
    }

    #[test]
    fn test_cubic_is_the_default_method() {
        assert_eq!(ScatteredGridder::default().method(), InterpolationMethod::Cubic);
    }

    #[test]
    fn test_mask_reuse_law() {
        let xs = array![0.0, 1.0, 2.0];
        let ys = array![1.0, 0.0];
        let reference = GriddedField {
            xs: xs.clone(),
            ys: ys.clone(),
            values: array![[f64::NAN, 1.0, 2.0], [3.0, f64::NAN, 5.0]],
        };
        let target = GriddedField {
            xs,
            ys,
            values: array![[7.0, 8.0, f64::NAN], [9.0, 10.0, 11.0]],
        };
        let masked = apply_nan_mask(&reference, &target).unwrap();

        Zip::from(&reference.values).and(&masked.values).for_each(|&r, &m| {
            if r.is_nan() {
                assert!(m.is_nan());
            }
        });
        assert_eq!(masked.values[[0, 1]], 8.0);
        assert!(masked.values[[0, 2]].is_nan());
        assert_eq!(masked.values[[1, 2]], 11.0);
        // target untouched
        assert_eq!(target.values[[0, 0]], 7.0);
    }

    #[test]
    fn test_mask_shape_mismatch_is_error() {
        let a = GriddedField { xs: array![0.0], ys: array![0.0], values: Array2::zeros((1, 1)) };
        let b = GriddedField { xs: array![0.0, 1.0], ys: array![0.0], values: Array2::zeros((1, 2)) };
        assert!(apply_nan_mask(&a, &b).is_err());
    }
}
