//! Pipeline configuration.
//!
//! Built once at start-up (defaults or a JSON file) and handed by reference
//! to every stage. Defaults reproduce the Gulf of Manfredonia study.

use crate::core::depth::DepthTolerance;
use crate::core::gridding::InterpolationMethod;
use crate::core::terrain_effect::TerrainEffectParams;
use crate::types::{BoundingBox, GravError, GravResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Input files, relative to `data_dir` unless absolute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputFiles {
    pub ground_table: PathBuf,
    pub satellite_table: PathBuf,
    pub local_dtm: PathBuf,
    pub regional_dtm: PathBuf,
    pub coastline: PathBuf,
}

impl Default for InputFiles {
    fn default() -> Self {
        Self {
            ground_table: PathBuf::from("ogs/grav/grav_OGS60.csv"),
            satellite_table: PathBuf::from("ss/grav_ss.txt"),
            local_dtm: PathBuf::from("dtbm/ManfredoniaDBTM.tif"),
            regional_dtm: PathBuf::from("dtbm/GEBCOTopoBatItaly.tif"),
            coastline: PathBuf::from("coastline/coastline_ply.shp"),
        }
    }
}

/// Project directory layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub home: PathBuf,
    pub data_dir: PathBuf,
    pub figures_dir: PathBuf,
    pub output_dir: PathBuf,
    pub inputs: InputFiles,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            home: PathBuf::from("."),
            data_dir: PathBuf::from("data"),
            figures_dir: PathBuf::from("figures"),
            output_dir: PathBuf::from("te_corrections"),
            inputs: InputFiles::default(),
        }
    }
}

impl PathConfig {
    fn under_home(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.home.join(p)
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.under_home(&self.data_dir)
    }

    pub fn figures_dir(&self) -> PathBuf {
        self.under_home(&self.figures_dir)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.under_home(&self.output_dir)
    }

    pub fn input(&self, p: &Path) -> PathBuf {
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.data_dir().join(p)
        }
    }
}

/// Coordinate reference systems used by the run
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CrsConfig {
    /// Geographic CRS of the pipeline (WGS84)
    pub geographic_epsg: u32,
    /// Planar CRS for gridding
    pub projected_epsg: u32,
    /// Datum of the ground survey coordinates as delivered
    pub survey_epsg: u32,
}

impl Default for CrsConfig {
    fn default() -> Self {
        Self {
            geographic_epsg: 4326,
            projected_epsg: 32633,
            survey_epsg: 4265,
        }
    }
}

/// Ground survey specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    pub tag: String,
    pub year: u16,
    /// Historical Potsdam datum error added to the observed readings (mGal)
    pub datum_offset_mgal: f64,
    /// Station ids known to be bad
    pub denylist: Vec<u64>,
    pub depth_tolerance: DepthTolerance,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            tag: "ogs60".to_string(),
            year: 1960,
            datum_offset_mgal: -15.42,
            denylist: vec![1311],
            depth_tolerance: DepthTolerance::default(),
        }
    }
}

/// Final gridding settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GriddingConfig {
    pub step_m: f64,
    pub method: InterpolationMethod,
}

impl Default for GriddingConfig {
    fn default() -> Self {
        Self {
            step_m: 1000.0,
            method: InterpolationMethod::default(),
        }
    }
}

/// Colour scale bounds for quicklook figures
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub dtbm_range: (f64, f64),
    pub bouguer_range: (f64, f64),
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            dtbm_range: (-150.0, 500.0),
            bouguer_range: (80.0, 40.0),
        }
    }
}

/// Complete, immutable configuration of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathConfig,
    /// Study area limits in geographic degrees
    pub study_area: BoundingBox,
    pub crs: CrsConfig,
    pub survey: SurveyConfig,
    pub satellite_tag: String,
    pub terrain: TerrainEffectParams,
    pub gridding: GriddingConfig,
    pub plot: PlotConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            paths: PathConfig::default(),
            study_area: BoundingBox {
                min_x: 15.85,
                max_x: 16.85,
                min_y: 41.15,
                max_y: 41.85,
            },
            crs: CrsConfig::default(),
            survey: SurveyConfig::default(),
            satellite_tag: "ss".to_string(),
            terrain: TerrainEffectParams::default(),
            gridding: GriddingConfig::default(),
            plot: PlotConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a JSON configuration; absent fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> GravResult<Self> {
        log::info!("Reading configuration from: {}", path.as_ref().display());
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> GravResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> GravResult<()> {
        self.study_area.validate()?;
        self.terrain.validate()?;
        self.survey.depth_tolerance.validate()?;

        if !(self.gridding.step_m.is_finite() && self.gridding.step_m > 0.0) {
            return Err(GravError::Config(format!(
                "Grid step must be positive, got {}",
                self.gridding.step_m
            )));
        }
        if let InterpolationMethod::InverseDistance { power } = self.gridding.method {
            if !(power.is_finite() && power > 0.0) {
                return Err(GravError::Config(format!(
                    "Inverse distance power must be positive, got {}",
                    power
                )));
            }
        }
        if self.survey.tag == self.satellite_tag {
            return Err(GravError::Config(format!(
                "Dataset tags must differ, both are '{}'",
                self.satellite_tag
            )));
        }
        if !self.survey.datum_offset_mgal.is_finite() {
            return Err(GravError::Config("Datum offset must be finite".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.crs.projected_epsg, 32633);
        assert_eq!(config.survey.denylist, vec![1311]);
        assert!((config.survey.datum_offset_mgal + 15.42).abs() < 1e-12);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "survey": {{ "datum_offset_mgal": -14.6 }}, "gridding": {{ "step_m": 500.0 }} }}"#
        )
        .unwrap();

        let config = PipelineConfig::from_json_file(file.path()).unwrap();
        assert!((config.survey.datum_offset_mgal + 14.6).abs() < 1e-12);
        assert_eq!(config.survey.tag, "ogs60");
        assert_eq!(config.gridding.step_m, 500.0);
        assert_eq!(config.gridding.method, InterpolationMethod::Cubic);
        assert_eq!(config.terrain.outer_radius_m, 180_000.0);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = PipelineConfig::default();
        config.gridding.step_m = 0.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.study_area.min_y = 42.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.terrain.inner_radius_m = 200_000.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.gridding.method = InterpolationMethod::InverseDistance { power: -1.0 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_roundtrip_keeps_paths() {
        let mut config = PipelineConfig::default();
        config.paths.home = PathBuf::from("/srv/manfredonia");
        let text = config.to_json_string().unwrap();
        let back: PipelineConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(back.paths.data_dir(), PathBuf::from("/srv/manfredonia/data"));
        assert_eq!(
            back.paths.input(&back.paths.inputs.local_dtm),
            PathBuf::from("/srv/manfredonia/data/dtbm/ManfredoniaDBTM.tif")
        );
    }
}
