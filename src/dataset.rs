//! Station datasets: one structure-of-arrays per gravity source.
//!
//! Every field is an `Array1<f64>` aligned by station index. Fields produced
//! by a processing stage stay `None` until that stage has completed for the
//! whole dataset; the `attach_*` setters check the length before touching
//! the dataset, so a stage either fills a field for every station or leaves
//! the dataset as it was.

use crate::types::{check_len, DatasetKind, GravError, GravResult, StationField};
use ndarray::Array1;

/// Ordered collection of gravity stations sharing a source and a recipe
#[derive(Debug, Clone, PartialEq)]
pub struct StationDataset {
    tag: String,
    kind: DatasetKind,
    /// Survey year of the measurements, when known
    pub survey_year: Option<u16>,
    station_ids: Option<Array1<u64>>,
    lon: StationField,
    lat: StationField,
    easting: Option<StationField>,
    northing: Option<StationField>,
    /// Reported station height (m, positive up)
    reported_height: Option<StationField>,
    /// Height sampled from the terrain-bathymetry model
    model_height: Option<StationField>,
    /// Reported height after the tolerance test against the model
    reconciled_height: Option<StationField>,
    observed_gravity: Option<StationField>,
    normal_gravity: Option<StationField>,
    free_water_correction: Option<StationField>,
    free_air_anomaly: Option<StationField>,
    free_air_error: Option<StationField>,
    terrain_effect: Option<StationField>,
    bouguer_anomaly: Option<StationField>,
}

impl StationDataset {
    fn empty(tag: &str, kind: DatasetKind, lon: StationField, lat: StationField) -> Self {
        Self {
            tag: tag.to_string(),
            kind,
            survey_year: None,
            station_ids: None,
            lon,
            lat,
            easting: None,
            northing: None,
            reported_height: None,
            model_height: None,
            reconciled_height: None,
            observed_gravity: None,
            normal_gravity: None,
            free_water_correction: None,
            free_air_anomaly: None,
            free_air_error: None,
            terrain_effect: None,
            bouguer_anomaly: None,
        }
    }

    /// Ground-based survey with observed gravity and reported heights
    pub fn ground_survey(
        tag: &str,
        station_ids: Array1<u64>,
        lon: StationField,
        lat: StationField,
        reported_height: StationField,
        observed_gravity: StationField,
    ) -> GravResult<Self> {
        let n = lon.len();
        check_len("lat", n, lat.len())?;
        check_len("station_id", n, station_ids.len())?;
        check_len("hs", n, reported_height.len())?;
        check_len("gobs", n, observed_gravity.len())?;

        let mut dataset = Self::empty(tag, DatasetKind::GroundSurvey, lon, lat);
        dataset.station_ids = Some(station_ids);
        dataset.reported_height = Some(reported_height);
        dataset.observed_gravity = Some(observed_gravity);
        Ok(dataset)
    }

    /// Satellite-derived grid nodes carrying a precomputed free-air anomaly
    pub fn satellite(
        tag: &str,
        lon: StationField,
        lat: StationField,
        free_air_anomaly: StationField,
        free_air_error: Option<StationField>,
    ) -> GravResult<Self> {
        let n = lon.len();
        check_len("lat", n, lat.len())?;
        check_len("fa", n, free_air_anomaly.len())?;
        if let Some(err) = &free_air_error {
            check_len("fa_err", n, err.len())?;
        }

        let mut dataset = Self::empty(tag, DatasetKind::SatelliteDerived, lon, lat);
        dataset.free_air_anomaly = Some(free_air_anomaly);
        dataset.free_air_error = free_air_error;
        Ok(dataset)
    }

    pub fn with_survey_year(mut self, year: u16) -> Self {
        self.survey_year = Some(year);
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn kind(&self) -> DatasetKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.lon.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lon.is_empty()
    }

    pub fn station_ids(&self) -> Option<&Array1<u64>> {
        self.station_ids.as_ref()
    }

    pub fn lon(&self) -> &StationField {
        &self.lon
    }

    pub fn lat(&self) -> &StationField {
        &self.lat
    }

    pub fn easting(&self) -> Option<&StationField> {
        self.easting.as_ref()
    }

    pub fn northing(&self) -> Option<&StationField> {
        self.northing.as_ref()
    }

    pub fn reported_height(&self) -> Option<&StationField> {
        self.reported_height.as_ref()
    }

    pub fn model_height(&self) -> Option<&StationField> {
        self.model_height.as_ref()
    }

    pub fn reconciled_height(&self) -> Option<&StationField> {
        self.reconciled_height.as_ref()
    }

    pub fn observed_gravity(&self) -> Option<&StationField> {
        self.observed_gravity.as_ref()
    }

    pub fn normal_gravity(&self) -> Option<&StationField> {
        self.normal_gravity.as_ref()
    }

    pub fn free_water_correction(&self) -> Option<&StationField> {
        self.free_water_correction.as_ref()
    }

    pub fn free_air_anomaly(&self) -> Option<&StationField> {
        self.free_air_anomaly.as_ref()
    }

    pub fn free_air_error(&self) -> Option<&StationField> {
        self.free_air_error.as_ref()
    }

    pub fn terrain_effect(&self) -> Option<&StationField> {
        self.terrain_effect.as_ref()
    }

    pub fn bouguer_anomaly(&self) -> Option<&StationField> {
        self.bouguer_anomaly.as_ref()
    }

    /// Fetch a stage output, failing if the producing stage has not run
    pub fn require<'a>(
        &self,
        field: &'static str,
        value: Option<&'a StationField>,
    ) -> GravResult<&'a StationField> {
        value.ok_or_else(|| {
            GravError::Processing(format!(
                "Dataset '{}' has no '{}' field; the stage producing it has not run",
                self.tag, field
            ))
        })
    }

    /// Replace the geographic coordinates (datum shift after loading)
    pub fn set_geographic(&mut self, lon: StationField, lat: StationField) -> GravResult<()> {
        check_len("lon", self.len(), lon.len())?;
        check_len("lat", self.len(), lat.len())?;
        self.lon = lon;
        self.lat = lat;
        Ok(())
    }

    pub fn attach_metric_position(
        &mut self,
        easting: StationField,
        northing: StationField,
    ) -> GravResult<()> {
        check_len("xm", self.len(), easting.len())?;
        check_len("ym", self.len(), northing.len())?;
        self.easting = Some(easting);
        self.northing = Some(northing);
        Ok(())
    }

    pub fn attach_model_height(&mut self, model_height: StationField) -> GravResult<()> {
        check_len("hdtbm", self.len(), model_height.len())?;
        self.model_height = Some(model_height);
        Ok(())
    }

    pub fn attach_reconciled_height(&mut self, height: StationField) -> GravResult<()> {
        check_len("hnew", self.len(), height.len())?;
        self.reconciled_height = Some(height);
        Ok(())
    }

    /// Attach the three free-water stage outputs together
    pub fn attach_free_water(
        &mut self,
        normal_gravity: StationField,
        correction: StationField,
        anomaly: StationField,
    ) -> GravResult<()> {
        check_len("gth", self.len(), normal_gravity.len())?;
        check_len("fwc", self.len(), correction.len())?;
        check_len("fa", self.len(), anomaly.len())?;
        self.normal_gravity = Some(normal_gravity);
        self.free_water_correction = Some(correction);
        self.free_air_anomaly = Some(anomaly);
        Ok(())
    }

    pub fn attach_terrain_effect(&mut self, terrain_effect: StationField) -> GravResult<()> {
        check_len("te", self.len(), terrain_effect.len())?;
        self.terrain_effect = Some(terrain_effect);
        Ok(())
    }

    pub fn attach_bouguer_anomaly(&mut self, anomaly: StationField) -> GravResult<()> {
        check_len("ba", self.len(), anomaly.len())?;
        self.bouguer_anomaly = Some(anomaly);
        Ok(())
    }

    /// Drop stations whose id is listed; returns the number removed.
    ///
    /// Only meaningful right after loading: it is refused once any stage
    /// output has been attached.
    pub fn drop_stations(&mut self, denylist: &[u64]) -> GravResult<usize> {
        let ids = match &self.station_ids {
            Some(ids) => ids,
            None => return Ok(0),
        };
        if self.has_stage_output() {
            return Err(GravError::Processing(format!(
                "Dataset '{}': stations can only be excluded before processing starts",
                self.tag
            )));
        }

        let keep: Vec<usize> = ids
            .iter()
            .enumerate()
            .filter(|(_, id)| !denylist.contains(id))
            .map(|(i, _)| i)
            .collect();
        let removed = self.len() - keep.len();
        if removed == 0 {
            return Ok(0);
        }

        let pick = |field: &StationField| -> StationField { keep.iter().map(|&i| field[i]).collect() };
        self.station_ids = Some(keep.iter().map(|&i| ids[i]).collect());
        self.lon = pick(&self.lon);
        self.lat = pick(&self.lat);
        for field in [
            &mut self.easting,
            &mut self.northing,
            &mut self.reported_height,
            &mut self.model_height,
            &mut self.reconciled_height,
            &mut self.observed_gravity,
            &mut self.normal_gravity,
            &mut self.free_water_correction,
            &mut self.free_air_anomaly,
            &mut self.free_air_error,
            &mut self.terrain_effect,
            &mut self.bouguer_anomaly,
        ] {
            *field = field.as_ref().map(pick);
        }
        Ok(removed)
    }

    /// Whether any processing stage has written into the dataset.
    /// A satellite free-air anomaly is an input, a ground one is not.
    fn has_stage_output(&self) -> bool {
        let ground_fa = self.kind == DatasetKind::GroundSurvey && self.free_air_anomaly.is_some();
        ground_fa
            || [
                &self.easting,
                &self.northing,
                &self.model_height,
                &self.reconciled_height,
                &self.normal_gravity,
                &self.free_water_correction,
                &self.terrain_effect,
                &self.bouguer_anomaly,
            ]
            .iter()
            .any(|f| f.is_some())
    }

    /// Number of stations with a NaN in the given field
    pub fn count_nan(field: &StationField) -> usize {
        field.iter().filter(|v| v.is_nan()).count()
    }
}
