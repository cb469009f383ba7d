use crate::types::{PipelineError, PipelineResult};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

/// One row of the inter-calibration resource
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CalibrationRow {
    pub satellite: String,
    pub year: i32,
    pub c0: f64,
    pub c1: f64,
    pub c2: f64,
}

/// Quadratic coefficients for one (satellite, year)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationCoefficients {
    pub c0: f64,
    pub c1: f64,
    pub c2: f64,
}

impl From<&CalibrationRow> for CalibrationCoefficients {
    fn from(row: &CalibrationRow) -> Self {
        Self {
            c0: row.c0,
            c1: row.c1,
            c2: row.c2,
        }
    }
}

/// Extract the satellite code from an image source id.
///
/// The code is the 3 characters preceding the trailing 4-digit year,
/// e.g. `NOAA/DMSP-OLS/NIGHTTIME_LIGHTS/F152007` -> `F15`.
pub fn satellite_code(source_id: &str) -> PipelineResult<&str> {
    let len = source_id.len();
    if len < 7 || !source_id.is_char_boundary(len - 7) || !source_id.is_char_boundary(len - 4) {
        return Err(PipelineError::ImageMetadata(format!(
            "Source id too short to carry a satellite code: {:?}",
            source_id
        )));
    }
    Ok(&source_id[len - 7..len - 4])
}

/// Per-satellite, per-year radiometric inter-calibration table.
///
/// Loaded once and never mutated; share it by reference.
#[derive(Debug, Clone, Default)]
pub struct CalibrationTable {
    rows: Vec<CalibrationRow>,
    duplicates: Vec<(String, i32)>,
}

impl CalibrationTable {
    /// Load the table from a CSV file with `satellite,year,c0,c1,c2` columns
    pub fn from_path<P: AsRef<Path>>(path: P, strict: bool) -> PipelineResult<Self> {
        log::info!("Loading calibration table: {}", path.as_ref().display());
        let file = std::fs::File::open(path.as_ref())?;
        Self::from_reader(file, strict)
    }

    /// Parse the table from any CSV source. Extra columns are ignored.
    ///
    /// With `strict`, a (satellite, year) pair listed more than once is an error;
    /// otherwise the duplicates are logged and the first row wins on lookup.
    pub fn from_reader<R: Read>(reader: R, strict: bool) -> PipelineResult<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut rows: Vec<CalibrationRow> = Vec::new();
        for record in csv_reader.deserialize::<CalibrationRow>() {
            rows.push(record?);
        }

        let table = Self::from_rows(rows);

        if !table.duplicates.is_empty() {
            for (satellite, year) in &table.duplicates {
                log::warn!(
                    "Calibration table lists {} {} more than once; the first row will be used",
                    satellite,
                    year
                );
            }
            if strict {
                return Err(PipelineError::InvalidFormat(format!(
                    "Calibration table has {} ambiguous (satellite, year) pairs",
                    table.duplicates.len()
                )));
            }
        }

        log::debug!("Loaded {} calibration rows", table.rows.len());
        Ok(table)
    }

    pub fn from_rows(rows: Vec<CalibrationRow>) -> Self {
        let mut seen: HashMap<(&str, i32), usize> = HashMap::new();
        for row in &rows {
            *seen.entry((row.satellite.as_str(), row.year)).or_insert(0) += 1;
        }
        let mut duplicates: Vec<(String, i32)> = seen
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|((satellite, year), _)| (satellite.to_string(), year))
            .collect();
        duplicates.sort();

        Self { rows, duplicates }
    }

    /// Coefficients for an exact (satellite, year) match
    pub fn lookup(&self, satellite: &str, year: i32) -> PipelineResult<CalibrationCoefficients> {
        let mut matches = self
            .rows
            .iter()
            .filter(|row| row.satellite == satellite && row.year == year);

        let first = matches.next().ok_or_else(|| PipelineError::CalibrationLookup {
            satellite: satellite.to_string(),
            year,
        })?;

        let extra = matches.count();
        if extra > 0 {
            log::warn!(
                "Ambiguous calibration lookup for {} {}: {} rows match, using the first",
                satellite,
                year,
                extra + 1
            );
        }

        Ok(first.into())
    }

    /// Coefficients for the satellite encoded in an image source id
    pub fn lookup_for_source_id(
        &self,
        source_id: &str,
        year: i32,
    ) -> PipelineResult<CalibrationCoefficients> {
        let satellite = satellite_code(source_id)?;
        self.lookup(satellite, year)
    }

    /// (satellite, year) pairs listed more than once
    pub fn duplicates(&self) -> &[(String, i32)] {
        &self.duplicates
    }

    pub fn rows(&self) -> &[CalibrationRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
satellite,year,c0,c1,c2,R2,N
F12,1999,0.0000,1.0000,0.0000,1.0000,1
F14,2000,0.1254,1.3722,-0.0060,0.9260,1
F15,2007,1.3606,1.2974,-0.0045,0.8770,1
F16,2007,0.2007,1.2851,-0.0044,0.8820,1
";

    #[test]
    fn test_lookup_returns_stored_coefficients() {
        let table = CalibrationTable::from_reader(TABLE.as_bytes(), true).unwrap();
        assert_eq!(table.len(), 4);

        for row in table.rows() {
            let coeffs = table.lookup(&row.satellite, row.year).unwrap();
            assert_eq!(coeffs, CalibrationCoefficients::from(row));
        }
    }

    #[test]
    fn test_lookup_for_source_id() {
        let table = CalibrationTable::from_reader(TABLE.as_bytes(), true).unwrap();
        let coeffs = table.lookup_for_source_id("testtestF152007", 2007).unwrap();
        assert_eq!(coeffs.c0, 1.3606);
        assert_eq!(coeffs.c1, 1.2974);
        assert_eq!(coeffs.c2, -0.0045);
    }

    #[test]
    fn test_missing_pair_is_an_error() {
        let table = CalibrationTable::from_reader(TABLE.as_bytes(), true).unwrap();
        let err = table.lookup("F15", 1992).unwrap_err();
        assert!(matches!(err, PipelineError::CalibrationLookup { ref satellite, year: 1992 } if satellite == "F15"));
        assert!(table.lookup("F99", 2007).is_err());
    }

    #[test]
    fn test_satellite_code_extraction() {
        assert_eq!(satellite_code("NOAA/DMSP-OLS/NIGHTTIME_LIGHTS/F152007").unwrap(), "F15");
        assert_eq!(satellite_code("F101992").unwrap(), "F10");
        assert!(matches!(satellite_code("F15"), Err(PipelineError::ImageMetadata(_))));
    }

    #[test]
    fn test_duplicate_rows_first_wins() {
        let csv = "satellite,year,c0,c1,c2\nF15,2007,1.0,2.0,3.0\nF15,2007,4.0,5.0,6.0\n";
        let table = CalibrationTable::from_reader(csv.as_bytes(), false).unwrap();
        assert_eq!(table.duplicates(), &[("F15".to_string(), 2007)]);

        let coeffs = table.lookup("F15", 2007).unwrap();
        assert_eq!(coeffs.c0, 1.0);
    }

    #[test]
    fn test_duplicate_rows_rejected_when_strict() {
        let csv = "satellite,year,c0,c1,c2\nF15,2007,1.0,2.0,3.0\nF15,2007,4.0,5.0,6.0\n";
        let result = CalibrationTable::from_reader(csv.as_bytes(), true);
        assert!(matches!(result, Err(PipelineError::InvalidFormat(_))));
    }

    #[test]
    fn test_malformed_row_is_reported() {
        let csv = "satellite,year,c0,c1,c2\nF15,not-a-year,1.0,2.0,3.0\n";
        assert!(matches!(
            CalibrationTable::from_reader(csv.as_bytes(), false),
            Err(PipelineError::Csv(_))
        ));
    }
}
