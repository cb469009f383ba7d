use crate::core::calibration_table::{CalibrationCoefficients, CalibrationTable};
use crate::types::{CandidateImage, PipelineError, PipelineResult, Raster, RasterCube};
use ndarray::{Axis, Zip};
use serde::{Deserialize, Serialize};

/// Sensor saturation value of the 6-bit DMSP-OLS digital numbers
pub const SATURATION_DN: f64 = 63.0;

/// Calibrated values at or below this are treated as background
pub const BACKGROUND_DN: f64 = 6.0;

impl CalibrationCoefficients {
    /// Apply `c0 + c1*X + c2*X^2` to one raw value and clip the result.
    ///
    /// Values above 63 become 63, then values at or below 6 become 0.
    /// NaN (no data) passes through unchanged. Clipping runs on the `f32`
    /// output so rounding cannot land a value on the background threshold.
    pub fn apply(&self, x: f32) -> f32 {
        let x = x as f64;
        let mut value = (self.c0 + self.c1 * x + self.c2 * x * x) as f32;
        if value > SATURATION_DN as f32 {
            value = SATURATION_DN as f32;
        }
        if value <= BACKGROUND_DN as f32 {
            value = 0.0;
        }
        value
    }

    /// Band-math expression evaluated server-side on the selected band `X`
    pub fn expression(&self) -> String {
        format!("{} + ({} * X) + ({} * X * X)", self.c0, self.c1, self.c2)
    }
}

/// A candidate image with its calibration attached.
///
/// The transform itself runs where the pixels live: remotely as part of the
/// export, or locally through [`Calibrator::calibrate_raster`].
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedImage {
    pub image: CandidateImage,
    pub year: i32,
    pub coefficients: CalibrationCoefficients,
}

/// Pixel transform sent with an export request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelTransform {
    pub expression: String,
    pub band: String,
    pub saturate_above: f64,
    pub zero_at_or_below: f64,
}

impl CalibratedImage {
    pub fn expression(&self) -> String {
        self.coefficients.expression()
    }

    pub fn pixel_transform(&self) -> PixelTransform {
        PixelTransform {
            expression: self.expression(),
            band: self.image.band.clone(),
            saturate_above: SATURATION_DN,
            zero_at_or_below: BACKGROUND_DN,
        }
    }
}

/// Radiometric inter-calibration of DMSP-OLS imagery
pub struct Calibrator<'a> {
    table: &'a CalibrationTable,
}

impl<'a> Calibrator<'a> {
    pub fn new(table: &'a CalibrationTable) -> Self {
        Self { table }
    }

    /// Resolve coefficients for `image` as acquired in `year`
    pub fn calibrate(&self, image: &CandidateImage, year: i32) -> PipelineResult<CalibratedImage> {
        let source_id = image.source_id.as_deref().ok_or_else(|| {
            PipelineError::ImageMetadata(format!(
                "Image {} has no source id",
                image.system_index
            ))
        })?;

        let coefficients = self.table.lookup_for_source_id(source_id, year)?;
        log::debug!(
            "Calibrating {} for {}: {}",
            source_id,
            year,
            coefficients.expression()
        );

        Ok(CalibratedImage {
            image: image.clone(),
            year,
            coefficients,
        })
    }

    /// Calibrate raw pixel values already held in memory
    pub fn calibrate_raster(
        &self,
        raster: &Raster,
        source_id: &str,
        year: i32,
    ) -> PipelineResult<Raster> {
        let coefficients = self.table.lookup_for_source_id(source_id, year)?;
        Ok(apply_to_raster(raster, &coefficients))
    }

    /// Calibrate a raw year x rows x cols cube; frame `i` was acquired by
    /// `sources[i] = (source_id, year)`. Coefficients are resolved for every
    /// frame before any pixel is touched.
    pub fn calibrate_series(&self, cube: &RasterCube, sources: &[(String, i32)]) -> PipelineResult<RasterCube> {
        let frames = cube.len_of(Axis(0));
        if frames != sources.len() {
            return Err(PipelineError::Processing(format!(
                "Cube has {} frames but {} sources were given",
                frames,
                sources.len()
            )));
        }

        let coefficients: Vec<CalibrationCoefficients> = sources
            .iter()
            .map(|(source_id, year)| self.table.lookup_for_source_id(source_id, *year))
            .collect::<PipelineResult<_>>()?;

        log::info!("Calibrating {} frames", frames);
        let mut calibrated = cube.clone();

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;

            calibrated
                .axis_iter_mut(Axis(0))
                .into_par_iter()
                .zip(coefficients.par_iter())
                .for_each(|(mut frame, c)| frame.mapv_inplace(|x| c.apply(x)));
        }

        #[cfg(not(feature = "parallel"))]
        {
            for (mut frame, c) in calibrated.axis_iter_mut(Axis(0)).zip(coefficients.iter()) {
                frame.mapv_inplace(|x| c.apply(x));
            }
        }

        Ok(calibrated)
    }
}

/// Pixel-wise calibration of a whole raster
pub fn apply_to_raster(raster: &Raster, coefficients: &CalibrationCoefficients) -> Raster {
    let (rows, cols) = raster.dim();
    log::debug!("Applying calibration to {}x{} raster", rows, cols);

    #[cfg(feature = "parallel")]
    {
        Zip::from(raster).par_map_collect(|&x| coefficients.apply(x))
    }

    #[cfg(not(feature = "parallel"))]
    {
        Zip::from(raster).map_collect(|&x| coefficients.apply(x))
    }
}
