use crate::types::{check_len, GravResult, StationField};

/// Bouguer anomaly `ba = fa - te`, station by station.
///
/// No reordering and no filtering: output index `i` always belongs to
/// input station `i`, and NaN in either input stays NaN.
pub fn bouguer_anomaly(free_air: &StationField, terrain_effect: &StationField) -> GravResult<StationField> {
    check_len("te", free_air.len(), terrain_effect.len())?;
    let ba = free_air - terrain_effect;

    let undefined = ba.iter().filter(|v| v.is_nan()).count();
    log::info!(
        "Bouguer anomaly computed for {} stations ({} undefined)",
        ba.len(),
        undefined
    );
    Ok(ba)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_bouguer_is_elementwise_difference() {
        let fa = array![55.2, 61.0, -3.5, f64::NAN];
        let te = array![-4.1, 0.0, 12.25, 1.0];
        let ba = bouguer_anomaly(&fa, &te).unwrap();

        assert_eq!(ba.len(), 4);
        for i in 0..3 {
            assert!((ba[i] - (fa[i] - te[i])).abs() <= 1e-9);
        }
        assert!(ba[3].is_nan());
    }

    #[test]
    fn test_misaligned_inputs_are_rejected() {
        assert!(bouguer_anomaly(&array![1.0, 2.0], &array![1.0]).is_err());
    }
}
