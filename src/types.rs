use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Per-station scalar field (one value per gravity station)
pub type StationField = Array1<f64>;

/// Axis-aligned box, used both for lon/lat limits and metric limits.
///
/// For geographic boxes `min_x`/`max_x` are longitudes and `min_y`/`max_y`
/// latitudes; for metric boxes they are easting/northing in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Create a box, rejecting empty or inverted extents
    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> GravResult<Self> {
        let bbox = Self { min_x, max_x, min_y, max_y };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> GravResult<()> {
        let finite = [self.min_x, self.max_x, self.min_y, self.max_y]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.min_x >= self.max_x || self.min_y >= self.max_y {
            return Err(GravError::Config(format!(
                "Invalid bounding box: x [{}, {}], y [{}, {}] (expected x0<x1 and y0<y1)",
                self.min_x, self.max_x, self.min_y, self.max_y
            )));
        }
        Ok(())
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Smallest box enclosing all given points
    pub fn enclosing(xs: &[f64], ys: &[f64]) -> GravResult<Self> {
        let fold = |v: &[f64]| {
            v.iter()
                .filter(|x| x.is_finite())
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)))
        };
        let (min_x, max_x) = fold(xs);
        let (min_y, max_y) = fold(ys);
        Self::new(min_x, max_x, min_y, max_y)
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square-or-rectangular pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Fractional (col, row) for a map coordinate, pixel corners at integers
    pub fn map_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let col = (x - self.top_left_x) / self.pixel_width;
        let row = (y - self.top_left_y) / self.pixel_height;
        (col, row)
    }

    /// Map coordinate of a pixel center
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.top_left_x + (col as f64 + 0.5) * self.pixel_width,
            self.top_left_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }
}

/// Source recipe of a gravity dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DatasetKind {
    /// Direct gravimeter readings (sea-bottom or land stations), `gobs` present
    GroundSurvey,
    /// Satellite-altimetry derived free-air anomaly, `fa` given directly
    SatelliteDerived,
}

/// Position of a station relative to the terrain surface.
///
/// Integer codes match the historical station-type convention
/// (0 = on land surface, 1 = sea surface, 2 = sea bottom).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StationType {
    Land,
    SeaSurface,
    SeaBottom,
}

impl StationType {
    pub fn code(&self) -> u8 {
        match self {
            StationType::Land => 0,
            StationType::SeaSurface => 1,
            StationType::SeaBottom => 2,
        }
    }

    pub fn from_code(code: u8) -> GravResult<Self> {
        match code {
            0 => Ok(StationType::Land),
            1 => Ok(StationType::SeaSurface),
            2 => Ok(StationType::SeaBottom),
            other => Err(GravError::Config(format!("Unknown station type code: {}", other))),
        }
    }
}

impl std::fmt::Display for StationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StationType::Land => write!(f, "land"),
            StationType::SeaSurface => write!(f, "sea-surface"),
            StationType::SeaBottom => write!(f, "sea-bottom"),
        }
    }
}

/// Error types for gravity processing
#[derive(Debug, thiserror::Error)]
pub enum GravError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Required path does not exist: {0}")]
    MissingPath(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Field '{field}' has {found} values, dataset has {expected} stations")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Shapefile error: {0}")]
    Shapefile(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<shapefile::Error> for GravError {
    fn from(e: shapefile::Error) -> Self {
        GravError::Shapefile(e.to_string())
    }
}

/// Result type for gravity processing operations
pub type GravResult<T> = Result<T, GravError>;

/// Fail with `LengthMismatch` unless `found == expected`
pub(crate) fn check_len(field: &'static str, expected: usize, found: usize) -> GravResult<()> {
    if expected != found {
        return Err(GravError::LengthMismatch { field, expected, found });
    }
    Ok(())
}
