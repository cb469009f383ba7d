//! Chronological assembly of exported rasters into a time-indexed dataset

use crate::io::naming::ExportName;
use crate::io::raster::{read_raster, RasterBand};
use crate::types::{GeoTransform, Location, PipelineError, PipelineResult, RasterCube};
use ndarray::{Array3, ArrayView2, Axis};
use std::path::{Path, PathBuf};

/// Extension of the rasters written by the export jobs
pub const DEFAULT_EXTENSION: &str = "tif";

/// One exported raster on disk
#[derive(Debug, Clone, PartialEq)]
pub struct RasterFile {
    pub path: PathBuf,
    pub name: ExportName,
    pub band: String,
}

impl RasterFile {
    pub fn year(&self) -> i32 {
        self.name.year
    }
}

/// Ordered (year, raster) sequence of one band
#[derive(Debug, Clone)]
pub struct TimeSeriesDataset {
    pub band_name: String,
    /// Set when the dataset was assembled for a single location
    pub location: Option<Location>,
    pub years: Vec<i32>,
    pub paths: Vec<PathBuf>,
    /// year x rows x cols
    pub data: RasterCube,
    pub geo_transform: Option<GeoTransform>,
}

impl TimeSeriesDataset {
    pub fn len(&self) -> usize {
        self.years.len()
    }

    pub fn is_empty(&self) -> bool {
        self.years.is_empty()
    }

    /// (rows, cols) shared by all frames
    pub fn frame_shape(&self) -> (usize, usize) {
        let (_, rows, cols) = self.data.dim();
        (rows, cols)
    }

    /// Frames in chronological order
    pub fn frames(&self) -> impl Iterator<Item = (i32, ArrayView2<'_, f32>)> + '_ {
        self.years
            .iter()
            .copied()
            .zip(self.data.axis_iter(Axis(0)))
    }

    /// First frame of `year`
    pub fn get(&self, year: i32) -> Option<ArrayView2<'_, f32>> {
        self.years
            .iter()
            .position(|&y| y == year)
            .map(|i| self.data.index_axis(Axis(0), i))
    }
}

/// Export rasters in `dir` with the given extension, sorted lexically by path.
///
/// Every matching file must follow the export naming grammar.
pub fn list_raster_files<P: AsRef<Path>>(dir: P, extension: &str, band: &str) -> PipelineResult<Vec<RasterFile>> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(dir.as_ref())? {
        let path = entry?.path();
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e == extension)
            .unwrap_or(false);
        if matches_ext && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let name = ExportName::from_path(&path)?;
            Ok(RasterFile {
                path,
                name,
                band: band.to_string(),
            })
        })
        .collect()
}

/// Years must be non-decreasing in listing order; with `strict` they must increase
pub fn validate_chronology(files: &[RasterFile], strict: bool) -> PipelineResult<()> {
    for pair in files.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);
        if current.year() < previous.year() {
            return Err(PipelineError::AssemblyOrder {
                previous: previous.year(),
                found: current.year(),
                path: current.path.clone(),
            });
        }
        if strict && current.year() == previous.year() {
            return Err(PipelineError::DuplicateYear {
                year: current.year(),
                path: current.path.clone(),
            });
        }
    }
    Ok(())
}

/// Assemble all export rasters in `dir`, read with GDAL
pub fn assemble<P: AsRef<Path>>(dir: P, band_name: &str) -> PipelineResult<TimeSeriesDataset> {
    assemble_with(dir, band_name, DEFAULT_EXTENSION, |path: &Path| read_raster(path))
}

/// Assemble the rasters of one location from a shared export folder
pub fn assemble_location<P: AsRef<Path>>(
    dir: P,
    location: Location,
    band_name: &str,
) -> PipelineResult<TimeSeriesDataset> {
    assemble_location_with(dir, location, band_name, DEFAULT_EXTENSION, |path: &Path| {
        read_raster(path)
    })
}

/// Like [`assemble`], with a caller-supplied raster reader
pub fn assemble_with<P, F>(dir: P, band_name: &str, extension: &str, loader: F) -> PipelineResult<TimeSeriesDataset>
where
    P: AsRef<Path>,
    F: FnMut(&Path) -> PipelineResult<RasterBand>,
{
    let files = list_raster_files(dir.as_ref(), extension, band_name)?;
    validate_chronology(&files, false)?;
    stack(dir.as_ref(), files, band_name, None, loader)
}

/// Like [`assemble_location`], with a caller-supplied raster reader
pub fn assemble_location_with<P, F>(
    dir: P,
    location: Location,
    band_name: &str,
    extension: &str,
    loader: F,
) -> PipelineResult<TimeSeriesDataset>
where
    P: AsRef<Path>,
    F: FnMut(&Path) -> PipelineResult<RasterBand>,
{
    let files: Vec<RasterFile> = list_raster_files(dir.as_ref(), extension, band_name)?
        .into_iter()
        .filter(|f| f.name.location == location)
        .collect();
    validate_chronology(&files, true)?;
    stack(dir.as_ref(), files, band_name, Some(location), loader)
}

fn stack<F>(
    dir: &Path,
    files: Vec<RasterFile>,
    band_name: &str,
    location: Option<Location>,
    mut loader: F,
) -> PipelineResult<TimeSeriesDataset>
where
    F: FnMut(&Path) -> PipelineResult<RasterBand>,
{
    if files.is_empty() {
        return Err(PipelineError::Processing(format!(
            "No export rasters found in {}",
            dir.display()
        )));
    }

    let mut frames = Vec::with_capacity(files.len());
    let mut geo_transform = None;
    let mut expected: Option<(usize, usize)> = None;

    for (i, file) in files.iter().enumerate() {
        let band = loader(&file.path)?;
        let shape = band.data.dim();
        if let Some(first) = expected {
            if first != shape {
                return Err(PipelineError::RasterShapeMismatch {
                    path: file.path.clone(),
                    expected: first,
                    found: shape,
                });
            }
        } else {
            expected = Some(shape);
        }
        if i == 0 {
            geo_transform = band.geo_transform;
        }
        frames.push(band.data);
    }

    let (rows, cols) = expected.unwrap_or((0, 0));
    let mut data = Array3::<f32>::zeros((frames.len(), rows, cols));
    for (mut slot, frame) in data.axis_iter_mut(Axis(0)).zip(frames.iter()) {
        slot.assign(frame);
    }

    let years: Vec<i32> = files.iter().map(RasterFile::year).collect();
    log::info!(
        "Assembled {} frames of {} ({}x{}) from {}: {:?}",
        years.len(),
        band_name,
        rows,
        cols,
        dir.display(),
        years
    );

    Ok(TimeSeriesDataset {
        band_name: band_name.to_string(),
        location,
        years,
        paths: files.into_iter().map(|f| f.path).collect(),
        data,
        geo_transform,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Raster;

    fn file(name: &str) -> RasterFile {
        let path = PathBuf::from(name);
        RasterFile {
            name: ExportName::from_path(&path).unwrap(),
            path,
            band: "stable_lights".to_string(),
        }
    }

    #[test]
    fn test_chronology_accepts_sorted_years() {
        let files = vec![
            file("lat_1.0_lon_2.0_2000.tif"),
            file("lat_1.0_lon_2.0_2005.tif"),
            file("lat_1.0_lon_2.0_2010.tif"),
        ];
        assert!(validate_chronology(&files, true).is_ok());
    }

    #[test]
    fn test_chronology_rejects_decreasing_years() {
        let files = vec![
            file("lat_1.0_lon_2.0_2005.tif"),
            file("lat_1.0_lon_2.0_2000.tif"),
        ];
        assert!(matches!(
            validate_chronology(&files, false),
            Err(PipelineError::AssemblyOrder { previous: 2005, found: 2000, .. })
        ));
    }

    #[test]
    fn test_duplicate_years_only_rejected_when_strict() {
        let files = vec![
            file("lat_1.0_lon_2.0_2000.tif"),
            file("lat_3.0_lon_2.0_2000.tif"),
        ];
        assert!(validate_chronology(&files, false).is_ok());
        assert!(matches!(
            validate_chronology(&files, true),
            Err(PipelineError::DuplicateYear { year: 2000, .. })
        ));
    }

    #[test]
    fn test_frames_follow_years() {
        let data = Array3::from_shape_fn((2, 2, 2), |(t, _, _)| t as f32);
        let dataset = TimeSeriesDataset {
            band_name: "stable_lights".to_string(),
            location: None,
            years: vec![2000, 2005],
            paths: vec![],
            data,
            geo_transform: None,
        };
        let frames: Vec<(i32, f32)> = dataset.frames().map(|(y, f)| (y, f[[0, 0]])).collect();
        assert_eq!(frames, vec![(2000, 0.0), (2005, 1.0)]);
        assert_eq!(dataset.get(2005).unwrap(), Raster::from_elem((2, 2), 1.0));
        assert!(dataset.get(2010).is_none());
    }
}
