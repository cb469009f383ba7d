//! I/O modules: remote imagery service, raster files, export naming, sample locations

pub mod imagery;
pub mod raster;
pub mod naming;
pub mod samples;

pub use imagery::{ImageryService, HttpImageryService, ServiceConfig, ExportRequest, JobHandle, RemoteState, StatusReport};
pub use raster::{read_raster, to_u8_image, RasterBand};
pub use naming::ExportName;
pub use samples::load_locations;
