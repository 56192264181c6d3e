//! I/O modules for gravity tables, terrain models, coastlines and figures

pub mod gravity_table;
pub mod dem;
pub mod coastline;
pub mod projection;
pub mod quicklook;

pub use gravity_table::{load_ground_survey, load_satellite, write_station_table, NumericTable};
pub use dem::{write_geotiff, DemRaster};
pub use coastline::Coastline;
pub use projection::{GdalReprojector, Reprojector, StudyArea, UtmReprojector, UtmZone};
pub use quicklook::{ColorRamp, Quicklook};
