//! Pipeline configuration, loaded from JSON

use crate::core::orchestrator::{ExportSettings, DEFAULT_POLL_INTERVAL};
use crate::io::imagery::ServiceConfig;
use crate::types::{PipelineError, PipelineResult, Projection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DMSP_COLLECTION: &str = "NOAA/DMSP-OLS/NIGHTTIME_LIGHTS";
pub const DMSP_BAND: &str = "stable_lights";
pub const POPULATION_COLLECTION: &str = "CIESIN/GPWv411/GPW_Population_Count";
pub const POPULATION_BAND: &str = "population_count";

/// Complete configuration of an export batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub collection_id: String,
    pub band: String,
    pub start_year: i32,
    /// Inclusive
    pub end_year: i32,
    pub interval: u32,
    pub buffer_radius_m: f64,
    /// Storage folder the service writes exports to
    pub target_folder: String,

    /// Apply DMSP-OLS inter-calibration before export
    pub calibrate: bool,
    pub calibration_table: Option<PathBuf>,
    /// Reject calibration tables with ambiguous rows
    pub strict_calibration_table: bool,

    /// Fixed output projection; both must be set together
    pub crs: Option<String>,
    pub crs_transform: Option<Vec<f64>>,
    /// Collection whose first image supplies the projection when none is fixed
    pub reference_collection: Option<String>,

    pub poll_interval_secs: u64,
    /// Wall-clock polling budget per job
    pub max_poll_secs: Option<u64>,
    pub max_concurrent_locations: usize,

    pub service: ServiceConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::night_lights()
    }
}

impl PipelineConfig {
    /// Calibrated yearly DMSP-OLS stable lights, 1992-2012
    pub fn night_lights() -> Self {
        Self {
            collection_id: DMSP_COLLECTION.to_string(),
            band: DMSP_BAND.to_string(),
            start_year: 1992,
            end_year: 2012,
            interval: 1,
            buffer_radius_m: 1.5e6,
            target_folder: "NightLightsExports".to_string(),
            calibrate: true,
            calibration_table: Some(PathBuf::from("data/Elvidge_DMSP_intercalib_coef.csv")),
            strict_calibration_table: false,
            crs: None,
            crs_transform: None,
            reference_collection: None,
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            max_poll_secs: None,
            max_concurrent_locations: 1,
            service: ServiceConfig::default(),
        }
    }

    /// Raw population counts every 5 years, 2000-2020, on the DMSP grid
    pub fn population() -> Self {
        Self {
            collection_id: POPULATION_COLLECTION.to_string(),
            band: POPULATION_BAND.to_string(),
            start_year: 2000,
            end_year: 2020,
            interval: 5,
            target_folder: "CensusExport".to_string(),
            calibrate: false,
            calibration_table: None,
            reference_collection: Some(DMSP_COLLECTION.to_string()),
            ..Self::night_lights()
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        log::info!("Loading configuration: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> PipelineResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.start_year > self.end_year {
            return Err(PipelineError::Config(format!(
                "start_year {} is after end_year {}",
                self.start_year, self.end_year
            )));
        }
        if self.interval == 0 {
            return Err(PipelineError::Config("interval must be at least 1".to_string()));
        }
        if !(self.buffer_radius_m > 0.0) {
            return Err(PipelineError::Config(format!(
                "buffer_radius_m must be positive, got {}",
                self.buffer_radius_m
            )));
        }
        if self.poll_interval_secs == 0 {
            return Err(PipelineError::Config("poll_interval_secs must be at least 1".to_string()));
        }
        if self.calibrate && self.calibration_table.is_none() {
            return Err(PipelineError::Config(
                "calibrate requires a calibration_table".to_string(),
            ));
        }
        if self.crs.is_some() != self.crs_transform.is_some() {
            return Err(PipelineError::Config(
                "crs and crs_transform must be given together".to_string(),
            ));
        }
        if self.target_folder.is_empty() {
            return Err(PipelineError::Config("target_folder is empty".to_string()));
        }
        Ok(())
    }

    /// Export years: `start_year..=end_year` stepping by `interval`
    pub fn years(&self) -> Vec<i32> {
        (self.start_year..=self.end_year)
            .step_by(self.interval.max(1) as usize)
            .collect()
    }

    pub fn projection(&self) -> Option<Projection> {
        match (&self.crs, &self.crs_transform) {
            (Some(crs), Some(transform)) => Some(Projection {
                crs: crs.clone(),
                crs_transform: transform.clone(),
            }),
            _ => None,
        }
    }

    pub fn export_settings(&self) -> ExportSettings {
        ExportSettings {
            collection_id: self.collection_id.clone(),
            band: self.band.clone(),
            buffer_radius_m: self.buffer_radius_m,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_poll: self.max_poll_secs.map(Duration::from_secs),
            projection: self.projection(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_schedule() {
        let config = PipelineConfig {
            start_year: 2000,
            end_year: 2010,
            interval: 5,
            ..PipelineConfig::night_lights()
        };
        assert_eq!(config.years(), vec![2000, 2005, 2010]);
        assert_eq!(PipelineConfig::night_lights().years().len(), 21);
        assert_eq!(PipelineConfig::population().years(), vec![2000, 2005, 2010, 2015, 2020]);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{"start_year": 2007, "buffer_radius_m": 250000.0, "target_folder": "NightLightsExports0903"}"#,
        )
        .unwrap();
        assert_eq!(config.start_year, 2007);
        assert_eq!(config.end_year, 2012);
        assert_eq!(config.collection_id, DMSP_COLLECTION);
        assert_eq!(config.poll_interval_secs, 10);
        assert!(config.calibrate);
    }

    #[test]
    fn test_validation_errors() {
        let inverted = PipelineConfig { start_year: 2013, ..PipelineConfig::night_lights() };
        assert!(matches!(inverted.validate(), Err(PipelineError::Config(_))));

        let zero_step = PipelineConfig { interval: 0, ..PipelineConfig::night_lights() };
        assert!(zero_step.validate().is_err());

        let half_projection = PipelineConfig {
            crs: Some("EPSG:4326".to_string()),
            ..PipelineConfig::night_lights()
        };
        assert!(half_projection.validate().is_err());

        let no_table = PipelineConfig { calibration_table: None, ..PipelineConfig::night_lights() };
        assert!(no_table.validate().is_err());

        assert!(PipelineConfig::population().validate().is_ok());
    }

    #[test]
    fn test_export_settings() {
        let config = PipelineConfig {
            crs: Some("EPSG:4326".to_string()),
            crs_transform: Some(vec![0.0083, 0.0, -180.0, 0.0, -0.0083, 75.0]),
            max_poll_secs: Some(3600),
            ..PipelineConfig::night_lights()
        };
        let settings = config.export_settings();
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.max_poll, Some(Duration::from_secs(3600)));
        assert_eq!(settings.projection.unwrap().crs, "EPSG:4326");
    }
}
