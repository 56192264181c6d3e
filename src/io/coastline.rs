//! Land polygons for land/water classification of stations.

use crate::types::{BoundingBox, GravResult};
use geo::{Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use shapefile::{PolygonRing, Reader, Shape};
use std::path::Path;

/// Coastline as a set of land polygons in geographic degrees
#[derive(Debug, Clone)]
pub struct Coastline {
    land: MultiPolygon<f64>,
}

impl Coastline {
    pub fn from_polygons(polygons: Vec<Polygon<f64>>) -> Self {
        Self {
            land: MultiPolygon(polygons),
        }
    }

    /// Load land polygons from a shapefile.
    ///
    /// Only polygons whose envelope overlaps `area` are kept. Inner rings
    /// become holes of the preceding outer ring.
    pub fn load<P: AsRef<Path>>(path: P, area: &BoundingBox) -> GravResult<Self> {
        log::info!("Reading coastline from: {}", path.as_ref().display());

        let mut reader = Reader::from_path(path.as_ref())?;
        let mut polygons = Vec::new();
        let mut skipped_shapes = 0usize;

        for result in reader.iter_shapes_and_records() {
            let (shape, _record) = result?;
            let polygon = match shape {
                Shape::Polygon(polygon) => polygon,
                _ => {
                    skipped_shapes += 1;
                    continue;
                }
            };

            let mut outer: Option<(LineString<f64>, Vec<LineString<f64>>)> = None;
            for ring in polygon.rings() {
                let line = LineString::from(
                    ring.points()
                        .iter()
                        .map(|p| Coord { x: p.x, y: p.y })
                        .collect::<Vec<_>>(),
                );
                match ring {
                    PolygonRing::Outer(_) => {
                        if let Some((exterior, holes)) = outer.take() {
                            push_if_overlapping(&mut polygons, exterior, holes, area);
                        }
                        outer = Some((line, Vec::new()));
                    }
                    PolygonRing::Inner(_) => {
                        if let Some((_, holes)) = outer.as_mut() {
                            holes.push(line);
                        }
                    }
                }
            }
            if let Some((exterior, holes)) = outer {
                push_if_overlapping(&mut polygons, exterior, holes, area);
            }
        }

        if skipped_shapes > 0 {
            log::debug!("Ignored {} non-polygon shapes", skipped_shapes);
        }
        log::info!("Loaded {} land polygons", polygons.len());
        if polygons.is_empty() {
            log::warn!("No coastline polygon overlaps the study area; every point counts as water");
        }

        Ok(Self::from_polygons(polygons))
    }

    pub fn polygon_count(&self) -> usize {
        self.land.0.len()
    }

    pub fn is_land(&self, lon: f64, lat: f64) -> bool {
        self.land.contains(&Point::new(lon, lat))
    }

    pub fn is_water(&self, lon: f64, lat: f64) -> bool {
        !self.is_land(lon, lat)
    }
}

fn push_if_overlapping(
    polygons: &mut Vec<Polygon<f64>>,
    exterior: LineString<f64>,
    holes: Vec<LineString<f64>>,
    area: &BoundingBox,
) {
    let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
    for c in exterior.coords() {
        min_x = min_x.min(c.x);
        max_x = max_x.max(c.x);
        min_y = min_y.min(c.y);
        max_y = max_y.max(c.y);
    }
    let overlaps = min_x <= area.max_x && max_x >= area.min_x && min_y <= area.max_y && max_y >= area.min_y;
    if overlaps {
        polygons.push(Polygon::new(exterior, holes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, size: f64) -> LineString<f64> {
        LineString::from(vec![
            (x0, y0),
            (x0 + size, y0),
            (x0 + size, y0 + size),
            (x0, y0 + size),
            (x0, y0),
        ])
    }

    #[test]
    fn test_land_and_water_classification() {
        let island = Polygon::new(square(16.0, 41.0, 1.0), vec![square(16.4, 41.4, 0.2)]);
        let coast = Coastline::from_polygons(vec![island]);

        assert!(coast.is_land(16.1, 41.1));
        assert!(coast.is_water(15.9, 41.5));
        // inside the lagoon
        assert!(coast.is_water(16.5, 41.5));
    }

    #[test]
    fn test_overlap_filter() {
        let area = BoundingBox { min_x: 15.85, max_x: 16.85, min_y: 41.15, max_y: 41.85 };
        let mut polygons = Vec::new();
        // mainland enclosing the whole area, no vertex inside it
        push_if_overlapping(&mut polygons, square(10.0, 38.0, 10.0), vec![], &area);
        // far away island
        push_if_overlapping(&mut polygons, square(30.0, 30.0, 1.0), vec![], &area);
        assert_eq!(polygons.len(), 1);
    }
}
