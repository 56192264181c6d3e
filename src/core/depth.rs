use crate::types::{check_len, GravError, GravResult, StationField};
use serde::{Deserialize, Serialize};

/// Tolerance band for accepting a reported station height.
///
/// A reported height `hs` is kept while
/// `|hdtbm - hs| < absolute_m + relative * |hdtbm|`; otherwise the
/// terrain-model height `hdtbm` replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DepthTolerance {
    /// Absolute part of the band (meters)
    pub absolute_m: f64,
    /// Relative part of the band, as a fraction of the model depth
    pub relative: f64,
}

impl Default for DepthTolerance {
    fn default() -> Self {
        Self {
            absolute_m: 2.0,
            relative: 0.05,
        }
    }
}

impl DepthTolerance {
    pub fn validate(&self) -> GravResult<()> {
        if !(self.absolute_m >= 0.0 && self.relative >= 0.0) {
            return Err(GravError::Config(format!(
                "Depth tolerance must be non-negative: {} m + {}",
                self.absolute_m, self.relative
            )));
        }
        Ok(())
    }

    /// Width of the band around a model height
    pub fn threshold(&self, model_height: f64) -> f64 {
        self.absolute_m + self.relative * model_height.abs()
    }
}

/// Outcome for a single station
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthDecision {
    Kept,
    Replaced,
    /// No model value (outside raster coverage or no-data)
    Unconfirmed,
}

/// Counts of each decision over a dataset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationSummary {
    pub kept: usize,
    pub replaced: usize,
    pub unconfirmed: usize,
}

/// Decide one station height. NaN in either input yields NaN.
pub fn reconcile_height(reported: f64, model: f64, tolerance: &DepthTolerance) -> (f64, DepthDecision) {
    if model.is_nan() || reported.is_nan() {
        return (f64::NAN, DepthDecision::Unconfirmed);
    }
    if (model - reported).abs() >= tolerance.threshold(model) {
        (model, DepthDecision::Replaced)
    } else {
        (reported, DepthDecision::Kept)
    }
}

/// Station depth reconciliation against a terrain-bathymetry model
#[derive(Debug, Clone, Default)]
pub struct DepthReconciler {
    tolerance: DepthTolerance,
}

impl DepthReconciler {
    pub fn new(tolerance: DepthTolerance) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> &DepthTolerance {
        &self.tolerance
    }

    /// Build the reconciled height array; the inputs are left untouched
    pub fn reconcile(
        &self,
        reported: &StationField,
        model: &StationField,
    ) -> GravResult<(StationField, ReconciliationSummary)> {
        check_len("hdtbm", reported.len(), model.len())?;

        let mut summary = ReconciliationSummary::default();
        let reconciled: StationField = reported
            .iter()
            .zip(model.iter())
            .map(|(&hs, &hdtbm)| {
                let (h, decision) = reconcile_height(hs, hdtbm, &self.tolerance);
                match decision {
                    DepthDecision::Kept => summary.kept += 1,
                    DepthDecision::Replaced => summary.replaced += 1,
                    DepthDecision::Unconfirmed => summary.unconfirmed += 1,
                }
                h
            })
            .collect();

        log::info!(
            "Depth reconciliation: {} kept, {} replaced by model, {} unconfirmed",
            summary.kept,
            summary.replaced,
            summary.unconfirmed
        );
        if summary.unconfirmed > 0 {
            log::warn!(
                "{} stations have no model depth and stay unconfirmed (NaN)",
                summary.unconfirmed
            );
        }

        Ok((reconciled, summary))
    }
}
