use chrono::NaiveDate;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Single-band raster data (rows x cols)
pub type Raster = Array2<f32>;

/// Stacked rasters (year x rows x cols)
pub type RasterCube = Array3<f32>;

/// Mean meters per degree of latitude on a spherical earth
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Point of interest
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:?}, {:?})", self.lat, self.lon)
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Bounds of a circular buffer of `radius_m` meters around a point.
    ///
    /// Uses a spherical earth. The longitude half-span grows with `1/cos(lat)`
    /// and is capped at the full globe near the poles.
    pub fn around(location: Location, radius_m: f64) -> Self {
        let dlat = radius_m / METERS_PER_DEGREE;
        let cos_lat = location.lat.to_radians().cos().abs();
        let dlon = if cos_lat < 1e-9 {
            180.0
        } else {
            (radius_m / (METERS_PER_DEGREE * cos_lat)).min(180.0)
        };

        Self {
            min_lon: (location.lon - dlon).max(-180.0),
            max_lon: (location.lon + dlon).min(180.0),
            min_lat: (location.lat - dlat).max(-90.0),
            max_lat: (location.lat + dlat).min(90.0),
        }
    }

    pub fn contains(&self, location: Location) -> bool {
        location.lon >= self.min_lon
            && location.lon <= self.max_lon
            && location.lat >= self.min_lat
            && location.lat <= self.max_lat
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl From<[f64; 6]> for GeoTransform {
    fn from(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }
}

/// Output projection of an export: CRS code plus affine CRS transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub crs: String,
    pub crs_transform: Vec<f64>,
}

/// Inclusive calendar date range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// January 1st through December 31st of `year`
    pub fn for_year(year: i32) -> PipelineResult<Self> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| PipelineError::InvalidFormat(format!("Invalid year: {}", year)))?;
        let end = NaiveDate::from_ymd_opt(year, 12, 31)
            .ok_or_else(|| PipelineError::InvalidFormat(format!("Invalid year: {}", year)))?;
        Ok(Self { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// One image of a remote catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateImage {
    /// Full asset id, e.g. `NOAA/DMSP-OLS/NIGHTTIME_LIGHTS/F152007`
    pub source_id: Option<String>,
    /// Catalog-internal monotonic index (`system:index`)
    pub system_index: String,
    pub acquired: NaiveDate,
    pub band: String,
    #[serde(default)]
    pub projection: Option<Projection>,
}

impl CandidateImage {
    pub fn year(&self) -> i32 {
        use chrono::Datelike;
        self.acquired.year()
    }
}

/// Error types for the export/calibration pipeline
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No calibration coefficients for satellite {satellite} in {year}")]
    CalibrationLookup { satellite: String, year: i32 },

    #[error("Image metadata error: {0}")]
    ImageMetadata(String),

    #[error("No image for {location} in {year}")]
    NoImageForYear { location: Location, year: i32 },

    #[error("Export job {job_id} failed: {detail}")]
    JobFailed { job_id: String, detail: String },

    #[error("Export job {job_id} did not finish within {waited_secs}s")]
    JobTimeout { job_id: String, waited_secs: u64 },

    #[error("Polling of export job {0} was cancelled")]
    Cancelled(String),

    #[error("Invalid job state transition for {job_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        job_id: String,
        from: crate::core::orchestrator::JobState,
        to: crate::core::orchestrator::JobState,
    },

    #[error("Rasters out of chronological order: year {found} follows {previous} ({path})")]
    AssemblyOrder {
        previous: i32,
        found: i32,
        path: PathBuf,
    },

    #[error("Year {year} appears more than once ({path})")]
    DuplicateYear { year: i32, path: PathBuf },

    #[error("Raster {path} has shape {found:?}, expected {expected:?}")]
    RasterShapeMismatch {
        path: PathBuf,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Invalid export file name: {0}")]
    InvalidFilename(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl PipelineError {
    /// Errors that trigger the single fallback-image retry
    pub fn is_recoverable_by_fallback(&self) -> bool {
        matches!(
            self,
            PipelineError::CalibrationLookup { .. } | PipelineError::ImageMetadata(_)
        )
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_region_equator() {
        let bbox = BoundingBox::around(Location::new(0.0, 10.0), METERS_PER_DEGREE);
        assert!((bbox.min_lat + 1.0).abs() < 1e-9);
        assert!((bbox.max_lat - 1.0).abs() < 1e-9);
        assert!((bbox.min_lon - 9.0).abs() < 1e-9);
        assert!((bbox.max_lon - 11.0).abs() < 1e-9);
    }

    #[test]
    fn test_buffer_region_widens_with_latitude() {
        let madrid = Location::new(40.4168, -3.7038);
        let bbox = BoundingBox::around(madrid, 2.5e5);
        let lat_span = bbox.max_lat - bbox.min_lat;
        let lon_span = bbox.max_lon - bbox.min_lon;
        assert!(lon_span > lat_span);
        assert!(bbox.contains(madrid));
    }

    #[test]
    fn test_buffer_region_clamped_at_pole() {
        let bbox = BoundingBox::around(Location::new(89.9, 0.0), 1.5e6);
        assert_eq!(bbox.max_lat, 90.0);
        assert_eq!(bbox.min_lon, -180.0);
        assert_eq!(bbox.max_lon, 180.0);
    }

    #[test]
    fn test_year_range_is_inclusive() {
        let range = DateRange::for_year(2007).unwrap();
        assert!(range.contains(NaiveDate::from_ymd_opt(2007, 1, 1).unwrap()));
        assert!(range.contains(NaiveDate::from_ymd_opt(2007, 12, 31).unwrap()));
        assert!(!range.contains(NaiveDate::from_ymd_opt(2008, 1, 1).unwrap()));
    }

    #[test]
    fn test_fallback_classification() {
        let lookup = PipelineError::CalibrationLookup { satellite: "F15".into(), year: 2007 };
        assert!(lookup.is_recoverable_by_fallback());
        assert!(PipelineError::ImageMetadata("no id".into()).is_recoverable_by_fallback());
        assert!(!PipelineError::Processing("x".into()).is_recoverable_by_fallback());
    }
}
