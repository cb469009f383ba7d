//! nightlights: calibrated nighttime-light time series from remote imagery exports
//!
//! This library drives the asynchronous export jobs of a remote imagery
//! service for a set of locations and years, applies DMSP-OLS radiometric
//! inter-calibration with a single fallback-image retry, and assembles the
//! exported GeoTIFFs into chronologically ordered per-location datasets.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    Location, BoundingBox, CandidateImage, DateRange, Projection, Raster,
    PipelineError, PipelineResult,
};
pub use config::PipelineConfig;
pub use io::{ImageryService, HttpImageryService, ExportName};
pub use core::{
    CalibrationTable, Calibrator, ExportOrchestrator, BatchRunner, BatchSummary,
    TimeSeriesDataset, assemble, assemble_location,
};

/// Python bindings for the training and visualization consumers
#[cfg(feature = "python")]
mod python {
    use crate::core::{assemble, assemble_location, CalibrationTable};
    use crate::types::{Location, PipelineError};
    use crate::io::ExportName;
    use numpy::ToPyArray;
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;
    use pyo3::types::PyDict;

    fn to_py_err(e: PipelineError) -> PyErr {
        match e {
            PipelineError::AssemblyOrder { .. }
            | PipelineError::InvalidFilename(_)
            | PipelineError::CalibrationLookup { .. } => PyValueError::new_err(e.to_string()),
            other => PyRuntimeError::new_err(other.to_string()),
        }
    }

    /// Stack the exported rasters of a folder into `{band, years, data}`.
    /// `data` has shape (year, rows, cols).
    #[pyfunction]
    #[pyo3(signature = (folder_path, band_name, lat=None, lon=None))]
    fn assemble_time_series(
        py: Python,
        folder_path: String,
        band_name: String,
        lat: Option<f64>,
        lon: Option<f64>,
    ) -> PyResult<PyObject> {
        let dataset = match (lat, lon) {
            (Some(lat), Some(lon)) => assemble_location(&folder_path, Location::new(lat, lon), &band_name),
            (None, None) => assemble(&folder_path, &band_name),
            _ => return Err(PyValueError::new_err("lat and lon must be given together")),
        }
        .map_err(to_py_err)?;

        let result = PyDict::new(py);
        result.set_item("band", dataset.band_name.clone())?;
        result.set_item("years", dataset.years.clone())?;
        result.set_item("data", dataset.data.to_pyarray(py))?;
        Ok(result.into())
    }

    /// Calibration coefficients `(c0, c1, c2)` for an image id and year
    #[pyfunction]
    fn calibration_lookup(table_path: String, source_id: String, year: i32) -> PyResult<(f64, f64, f64)> {
        let table = CalibrationTable::from_path(&table_path, false).map_err(to_py_err)?;
        let c = table.lookup_for_source_id(&source_id, year).map_err(to_py_err)?;
        Ok((c.c0, c.c1, c.c2))
    }

    /// File name prefix of the export for a location and year
    #[pyfunction]
    fn export_file_stem(lat: f64, lon: f64, year: i32) -> String {
        ExportName::new(Location::new(lat, lon), year).file_stem()
    }

    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(assemble_time_series, m)?)?;
        m.add_function(wrap_pyfunction!(calibration_lookup, m)?)?;
        m.add_function(wrap_pyfunction!(export_file_stem, m)?)?;
        Ok(())
    }
}
