//! seagrav: marine gravity reduction
//!
//! Takes sea-bottom gravity surveys and satellite-derived free-air anomalies
//! through depth reconciliation, the free-water correction, a prism terrain
//! effect over a combined topography/bathymetry model and the Bouguer
//! anomaly, then grids both datasets over a common study area with a shared
//! no-data footprint.

pub mod types;
pub mod config;
pub mod dataset;
pub mod io;
pub mod core;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use types::{BoundingBox, DatasetKind, GeoTransform, GravError, GravResult, StationField, StationType};
pub use config::PipelineConfig;
pub use dataset::StationDataset;
pub use pipeline::{CorrectionChain, GravityPipeline, PipelineReport};

#[cfg(feature = "python")]
mod python {
    use crate::config::PipelineConfig;
    use crate::core::depth::{DepthReconciler, DepthTolerance};
    use crate::core::free_water::{FreeWaterCorrector, FreeWaterParams};
    use crate::core::gridding::{apply_nan_mask, GriddedField};
    use crate::pipeline::GravityPipeline;
    use crate::types::GravError;
    use ndarray::{Array1, Array2};
    use numpy::{PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2, ToPyArray};
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;

    fn to_py_err(e: GravError) -> PyErr {
        match e {
            GravError::Config(_) | GravError::LengthMismatch { .. } | GravError::InvalidFormat(_) => {
                PyValueError::new_err(e.to_string())
            }
            _ => PyRuntimeError::new_err(e.to_string()),
        }
    }

    fn numpy_to_array1(arr: PyReadonlyArray1<f64>) -> Array1<f64> {
        arr.as_array().to_owned()
    }

    fn numpy_to_array2(arr: PyReadonlyArray2<f64>) -> Array2<f64> {
        arr.as_array().to_owned()
    }

    /// Reconcile reported heights with terrain-model heights.
    /// Returns (hnew, kept, replaced, unconfirmed).
    #[pyfunction]
    #[pyo3(signature = (reported, model, absolute_m = 2.0, relative = 0.05))]
    fn reconcile_depths<'py>(
        py: Python<'py>,
        reported: PyReadonlyArray1<f64>,
        model: PyReadonlyArray1<f64>,
        absolute_m: f64,
        relative: f64,
    ) -> PyResult<(&'py PyArray1<f64>, usize, usize, usize)> {
        let tolerance = DepthTolerance { absolute_m, relative };
        tolerance.validate().map_err(to_py_err)?;
        let (hnew, summary) = DepthReconciler::new(tolerance)
            .reconcile(&numpy_to_array1(reported), &numpy_to_array1(model))
            .map_err(to_py_err)?;
        Ok((hnew.to_pyarray(py), summary.kept, summary.replaced, summary.unconfirmed))
    }

    /// Free-water anomaly. Returns (gth, fwc, fa) in mGal.
    #[pyfunction]
    #[pyo3(signature = (latitude, height, observed, datum_offset_mgal = -15.42, water_density = 1030.0))]
    fn free_water_anomaly<'py>(
        py: Python<'py>,
        latitude: PyReadonlyArray1<f64>,
        height: PyReadonlyArray1<f64>,
        observed: PyReadonlyArray1<f64>,
        datum_offset_mgal: f64,
        water_density: f64,
    ) -> PyResult<(&'py PyArray1<f64>, &'py PyArray1<f64>, &'py PyArray1<f64>)> {
        let corrector = FreeWaterCorrector::new(FreeWaterParams {
            datum_offset_mgal,
            water_density,
        });
        let result = corrector
            .apply(
                &numpy_to_array1(latitude),
                &numpy_to_array1(height),
                &numpy_to_array1(observed),
            )
            .map_err(to_py_err)?;
        Ok((
            result.normal_gravity.to_pyarray(py),
            result.correction.to_pyarray(py),
            result.anomaly.to_pyarray(py),
        ))
    }

    #[pyfunction]
    fn bouguer_anomaly<'py>(
        py: Python<'py>,
        free_air: PyReadonlyArray1<f64>,
        terrain_effect: PyReadonlyArray1<f64>,
    ) -> PyResult<&'py PyArray1<f64>> {
        let ba = crate::core::bouguer::bouguer_anomaly(&numpy_to_array1(free_air), &numpy_to_array1(terrain_effect))
            .map_err(to_py_err)?;
        Ok(ba.to_pyarray(py))
    }

    /// Set every cell of `target` to NaN where `reference` is NaN
    #[pyfunction]
    fn mask_like<'py>(
        py: Python<'py>,
        reference: PyReadonlyArray2<f64>,
        target: PyReadonlyArray2<f64>,
    ) -> PyResult<&'py PyArray2<f64>> {
        let wrap = |values: Array2<f64>| {
            let (rows, cols) = values.dim();
            GriddedField {
                xs: Array1::from_iter((0..cols).map(|c| c as f64)),
                ys: Array1::from_iter((0..rows).rev().map(|r| r as f64)),
                values,
            }
        };
        let masked = apply_nan_mask(&wrap(numpy_to_array2(reference)), &wrap(numpy_to_array2(target)))
            .map_err(to_py_err)?;
        Ok(masked.values.to_pyarray(py))
    }

    /// Run the whole pipeline from a JSON configuration; returns the written files
    #[pyfunction]
    fn run_pipeline(config_path: String) -> PyResult<Vec<String>> {
        let config = PipelineConfig::from_json_file(&config_path).map_err(to_py_err)?;
        let report = GravityPipeline::new(config)
            .and_then(|p| p.run())
            .map_err(to_py_err)?;
        Ok(report
            .outputs
            .iter()
            .map(|p| p.display().to_string())
            .collect())
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(reconcile_depths, m)?)?;
        m.add_function(wrap_pyfunction!(free_water_anomaly, m)?)?;
        m.add_function(wrap_pyfunction!(bouguer_anomaly, m)?)?;
        m.add_function(wrap_pyfunction!(mask_like, m)?)?;
        m.add_function(wrap_pyfunction!(run_pipeline, m)?)?;
        Ok(())
    }
}
