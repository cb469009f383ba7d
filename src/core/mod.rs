//! Core export/calibration pipeline

pub mod calibration_table;
pub mod calibrate;
pub mod selector;
pub mod orchestrator;
pub mod assembler;
pub mod batch;

// Re-export main types
pub use calibration_table::{CalibrationTable, CalibrationRow, CalibrationCoefficients, satellite_code};
pub use calibrate::{Calibrator, CalibratedImage, PixelTransform, apply_to_raster};
pub use selector::{select_primary, select_fallback, filter_year};
pub use orchestrator::{ExportOrchestrator, ExportSettings, ExportJob, ExportImage, JobState, Selection};
pub use assembler::{TimeSeriesDataset, RasterFile, assemble, assemble_location, assemble_with, assemble_location_with};
pub use batch::{BatchRunner, BatchSummary};
