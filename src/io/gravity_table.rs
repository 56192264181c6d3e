//! Plain-text gravity tables.
//!
//! Tables are numeric, one station per line, separated by whitespace or
//! commas. Blank lines and `#` comments are skipped and cells that do not
//! parse as numbers read as NaN.

use crate::config::SurveyConfig;
use crate::dataset::StationDataset;
use crate::types::{GravError, GravResult, StationField};
use ndarray::Array1;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Rectangular numeric table
#[derive(Debug, Clone, PartialEq)]
pub struct NumericTable {
    rows: Vec<Vec<f64>>,
    columns: usize,
}

impl NumericTable {
    /// Parse table text, skipping `skip_header` leading lines
    pub fn parse(text: &str, skip_header: usize) -> GravResult<Self> {
        let mut rows = Vec::new();
        let mut columns = 0;

        for (line_no, line) in text.lines().enumerate().skip(skip_header) {
            let content = line.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            let row = parse_row(content);
            if rows.is_empty() {
                columns = row.len();
            } else if row.len() != columns {
                return Err(GravError::InvalidFormat(format!(
                    "Line {} has {} columns, expected {}",
                    line_no + 1,
                    row.len(),
                    columns
                )));
            }
            rows.push(row);
        }

        Ok(Self { rows, columns })
    }

    pub fn read<P: AsRef<Path>>(path: P, skip_header: usize) -> GravResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&text, skip_header)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    pub fn column(&self, index: usize) -> GravResult<StationField> {
        if index >= self.columns {
            return Err(GravError::InvalidFormat(format!(
                "Column {} requested from a {}-column table",
                index, self.columns
            )));
        }
        Ok(self.rows.iter().map(|row| row[index]).collect())
    }

    fn require_columns(&self, needed: usize, what: &str) -> GravResult<()> {
        if self.is_empty() {
            return Err(GravError::InvalidFormat(format!("{} table has no data rows", what)));
        }
        if self.columns < needed {
            return Err(GravError::InvalidFormat(format!(
                "{} table needs {} columns, found {}",
                what, needed, self.columns
            )));
        }
        Ok(())
    }
}

fn parse_row(line: &str) -> Vec<f64> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().unwrap_or(f64::NAN))
        .collect()
}

/// Load a ground survey table (`id lat lon height gobs`, one header line).
///
/// Coordinates stay in the survey datum; stations on the denylist are
/// removed before the dataset is returned.
pub fn load_ground_survey<P: AsRef<Path>>(path: P, survey: &SurveyConfig) -> GravResult<StationDataset> {
    log::info!("Loading ground survey '{}' from: {}", survey.tag, path.as_ref().display());
    let table = NumericTable::read(path.as_ref(), 1)?;
    table.require_columns(5, "Ground survey")?;

    let ids = table
        .column(0)?
        .iter()
        .enumerate()
        .map(|(row, &id)| {
            if id.is_finite() && id >= 0.0 && id.fract() == 0.0 {
                Ok(id as u64)
            } else {
                Err(GravError::InvalidFormat(format!(
                    "Row {}: station id '{}' is not a non-negative integer",
                    row + 1,
                    id
                )))
            }
        })
        .collect::<GravResult<Array1<u64>>>()?;

    let mut dataset = StationDataset::ground_survey(
        &survey.tag,
        ids,
        table.column(2)?,
        table.column(1)?,
        table.column(3)?,
        table.column(4)?,
    )?
    .with_survey_year(survey.year);

    let removed = dataset.drop_stations(&survey.denylist)?;
    if removed > 0 {
        log::info!(
            "Excluded {} denylisted stations from '{}' ({:?})",
            removed,
            survey.tag,
            survey.denylist
        );
    }
    log::info!("Loaded {} stations for '{}'", dataset.len(), survey.tag);
    Ok(dataset)
}

/// Load a satellite gravity table (`lon lat fa fa_err`, no header)
pub fn load_satellite<P: AsRef<Path>>(path: P, tag: &str) -> GravResult<StationDataset> {
    log::info!("Loading satellite gravity '{}' from: {}", tag, path.as_ref().display());
    let table = NumericTable::read(path.as_ref(), 0)?;
    table.require_columns(3, "Satellite gravity")?;

    let error = if table.columns() >= 4 {
        Some(table.column(3)?)
    } else {
        None
    };
    let dataset = StationDataset::satellite(tag, table.column(0)?, table.column(1)?, table.column(2)?, error)?;
    log::info!("Loaded {} points for '{}'", dataset.len(), tag);
    Ok(dataset)
}

/// Write every populated station field of a dataset as a text table
pub fn write_station_table<P: AsRef<Path>>(path: P, dataset: &StationDataset) -> GravResult<()> {
    log::info!("Writing station table: {}", path.as_ref().display());

    let mut names: Vec<&str> = vec!["lon", "lat"];
    let mut fields: Vec<&StationField> = vec![dataset.lon(), dataset.lat()];
    let optional = [
        ("xm", dataset.easting()),
        ("ym", dataset.northing()),
        ("hs", dataset.reported_height()),
        ("hdtbm", dataset.model_height()),
        ("hnew", dataset.reconciled_height()),
        ("gobs", dataset.observed_gravity()),
        ("gth", dataset.normal_gravity()),
        ("fwc", dataset.free_water_correction()),
        ("fa", dataset.free_air_anomaly()),
        ("fa_err", dataset.free_air_error()),
        ("te", dataset.terrain_effect()),
        ("ba", dataset.bouguer_anomaly()),
    ];
    for (name, field) in optional {
        if let Some(field) = field {
            names.push(name);
            fields.push(field);
        }
    }

    let mut out = BufWriter::new(File::create(path.as_ref())?);
    let ids = dataset.station_ids();
    if ids.is_some() {
        write!(out, "# id ")?;
    } else {
        write!(out, "# ")?;
    }
    writeln!(out, "{}", names.join(" "))?;

    for i in 0..dataset.len() {
        if let Some(ids) = ids {
            write!(out, "{} ", ids[i])?;
        }
        let row: Vec<String> = fields.iter().map(|f| format!("{:.6}", f[i])).collect();
        writeln!(out, "{}", row.join(" "))?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_mixed_separators_and_comments() {
        let text = "id lat lon h g\n\
                    1301, 41.50, 16.10, -12.0, 980300.1\n\
                    \n\
                    # re-measured\n\
                    1302 41.51\t16.12 -- 980301.5\n";
        let table = NumericTable::parse(text, 1).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.columns(), 5);
        assert_eq!(table.column(0).unwrap()[1], 1302.0);
        assert!(table.column(3).unwrap()[1].is_nan());
        assert!(table.column(5).is_err());
    }

    #[test]
    fn test_ragged_rows_are_rejected() {
        assert!(NumericTable::parse("1 2 3\n4 5\n", 0).is_err());
    }

    #[test]
    fn test_ground_survey_drops_denylisted_station() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "station lat lon height gobs").unwrap();
        writeln!(file, "1310 41.40 16.00 -10.0 980310.0").unwrap();
        writeln!(file, "1311 41.45 16.05 -11.0 980311.0").unwrap();
        writeln!(file, "1312 41.50 16.10 -12.0 980312.0").unwrap();

        let survey = SurveyConfig::default();
        let ds = load_ground_survey(file.path(), &survey).unwrap();
        assert_eq!(ds.len(), 2);
        assert!(ds.station_ids().unwrap().iter().all(|&id| id != 1311));
        // lon comes from the third column, lat from the second
        assert_eq!(ds.lon()[1], 16.10);
        assert_eq!(ds.lat()[1], 41.50);
        assert_eq!(ds.survey_year, Some(1960));
    }

    #[test]
    fn test_satellite_table_without_header() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "15.90 41.20 35.1 2.0").unwrap();
        writeln!(file, "15.91 41.20 35.6 2.1").unwrap();

        let ds = load_satellite(file.path(), "ss").unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.free_air_anomaly().unwrap()[1], 35.6);
        assert_eq!(ds.free_air_error().unwrap()[0], 2.0);
        assert!(ds.observed_gravity().is_none());
    }

    #[test]
    fn test_station_table_lists_populated_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations_ss.txt");
        let mut ds = StationDataset::satellite(
            "ss",
            ndarray::array![15.9],
            ndarray::array![41.2],
            ndarray::array![35.1],
            None,
        )
        .unwrap();
        ds.attach_terrain_effect(ndarray::array![-3.5]).unwrap();
        write_station_table(&path, &ds).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("# lon lat fa te"));
        assert_eq!(lines.next(), Some("15.900000 41.200000 35.100000 -3.500000"));
    }
}
