use crate::types::{GeoTransform, PipelineError, PipelineResult, Raster};
use gdal::Dataset;
use ndarray::Array2;
use std::path::Path;

/// First band of a raster file with its georeferencing
#[derive(Debug, Clone)]
pub struct RasterBand {
    pub data: Raster,
    pub geo_transform: Option<GeoTransform>,
}

/// Read band 1 of a GeoTIFF (or any GDAL-readable raster) as `f32`
pub fn read_raster<P: AsRef<Path>>(path: P) -> PipelineResult<RasterBand> {
    log::debug!("Reading raster: {}", path.as_ref().display());

    let dataset = Dataset::open(path.as_ref())?;
    let (width, height) = dataset.raster_size();

    let rasterband = dataset.rasterband(1)?;
    let band_data = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

    let data = Array2::from_shape_vec((height, width), band_data.data).map_err(|e| {
        PipelineError::Processing(format!(
            "Failed to reshape raster {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;

    let geo_transform = match dataset.geo_transform() {
        Ok(gt) => Some(GeoTransform::from(gt)),
        Err(e) => {
            log::debug!("No geotransform for {}: {}", path.as_ref().display(), e);
            None
        }
    };

    Ok(RasterBand {
        data,
        geo_transform,
    })
}

/// Convert a raster to 8-bit grayscale for image consumers.
///
/// Values saturate at 0 and 255; NaN becomes 0.
pub fn to_u8_image(raster: &Raster) -> Array2<u8> {
    raster.mapv(|v| v as u8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_to_u8_image_saturates() {
        let raster = array![[0.0, 63.0, 63.9], [-5.0, 300.0, f32::NAN]];
        let img = to_u8_image(&raster);
        assert_eq!(img, array![[0u8, 63, 63], [0, 255, 0]]);
    }

    #[test]
    fn test_read_missing_file() {
        let result = read_raster("/nonexistent/lat_0.0_lon_0.0_2000.tif");
        assert!(matches!(result, Err(PipelineError::Gdal(_))));
    }
}
