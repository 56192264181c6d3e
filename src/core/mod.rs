//! Core gravity correction modules

pub mod depth;
pub mod free_water;
pub mod terrain_effect;
pub mod bouguer;
pub mod gridding;

// Re-export main types
pub use depth::{DepthReconciler, DepthTolerance, DepthDecision, ReconciliationSummary};
pub use free_water::{FreeWaterCorrector, FreeWaterParams, FreeWaterResult};
pub use terrain_effect::{
    PrismTerrainModel, TerrainEffectModel, TerrainEffectParams, TerrainEffectRequest, TerrainEffectResult,
};
pub use bouguer::bouguer_anomaly;
pub use gridding::{apply_nan_mask, GriddedField, Gridder, InterpolationMethod, ScatteredGridder};
