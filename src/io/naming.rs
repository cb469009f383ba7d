//! Export file naming: `lat_<float>_lon_<float>_<year>.<ext>`
//!
//! Coordinates are written with the shortest round-trip float formatting
//! (`40.4168`, `-3.7038`, `2.0`), so parsing a name recovers the exact
//! coordinates it was built from.

use crate::types::{Location, PipelineError, PipelineResult};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

const FLOAT: &str = r"[-+]?\d+(?:\.\d+)?(?:[eE][-+]?\d+)?";

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let pattern = format!(
            r"^lat_({float})_lon_({float})_(\d{{4}})(?:\.([A-Za-z0-9]+))?$",
            float = FLOAT
        );
        Regex::new(&pattern).expect("export name pattern is a valid regex")
    })
}

/// Parsed components of an export file name
#[derive(Debug, Clone, PartialEq)]
pub struct ExportName {
    pub location: Location,
    pub year: i32,
    pub extension: Option<String>,
}

impl ExportName {
    pub fn new(location: Location, year: i32) -> Self {
        Self {
            location,
            year,
            extension: None,
        }
    }

    /// Name without extension, used as the export's file name prefix
    pub fn file_stem(&self) -> String {
        format!(
            "lat_{:?}_lon_{:?}_{}",
            self.location.lat, self.location.lon, self.year
        )
    }

    /// Parse a bare file name (with or without extension)
    pub fn parse(file_name: &str) -> PipelineResult<Self> {
        let caps = name_pattern()
            .captures(file_name)
            .ok_or_else(|| PipelineError::InvalidFilename(file_name.to_string()))?;

        let lat = caps[1]
            .parse::<f64>()
            .map_err(|e| PipelineError::InvalidFilename(format!("{}: bad latitude: {}", file_name, e)))?;
        let lon = caps[2]
            .parse::<f64>()
            .map_err(|e| PipelineError::InvalidFilename(format!("{}: bad longitude: {}", file_name, e)))?;
        let year = caps[3]
            .parse::<i32>()
            .map_err(|e| PipelineError::InvalidFilename(format!("{}: bad year: {}", file_name, e)))?;

        Ok(Self {
            location: Location::new(lat, lon),
            year,
            extension: caps.get(4).map(|m| m.as_str().to_string()),
        })
    }

    /// Parse the file-name component of a path
    pub fn from_path(path: &Path) -> PipelineResult<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PipelineError::InvalidFilename(path.display().to_string()))?;
        Self::parse(file_name)
    }
}

impl std::fmt::Display for ExportName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.extension {
            Some(ext) => write!(f, "{}.{}", self.file_stem(), ext),
            None => write!(f, "{}", self.file_stem()),
        }
    }
}
