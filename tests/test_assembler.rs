use nightlights::core::assembler::{assemble_location_with, assemble_with};
use nightlights::io::{ExportName, RasterBand};
use nightlights::types::{Location, PipelineError, PipelineResult};
use ndarray::Array2;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Fake reader: every pixel holds the year parsed from the file name
fn year_raster(path: &Path) -> PipelineResult<RasterBand> {
    let name = ExportName::from_path(path)?;
    Ok(RasterBand {
        data: Array2::from_elem((3, 4), name.year as f32),
        geo_transform: None,
    })
}

fn export_dir(names: &[&str]) -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    for name in names {
        fs::write(dir.path().join(name), b"").expect("Failed to write raster stub");
    }
    dir
}

#[test]
fn test_assemble_in_chronological_order() {
    let dir = export_dir(&[
        "lat_1.0_lon_2.0_2010.tif",
        "lat_1.0_lon_2.0_2000.tif",
        "lat_1.0_lon_2.0_2005.tif",
        "notes.txt",
    ]);

    let dataset = assemble_with(dir.path(), "stable_lights", "tif", year_raster)
        .expect("Failed to assemble");

    assert_eq!(dataset.years, vec![2000, 2005, 2010]);
    assert_eq!(dataset.band_name, "stable_lights");
    assert_eq!(dataset.frame_shape(), (3, 4));
    for (year, frame) in dataset.frames() {
        assert!(frame.iter().all(|&v| v == year as f32));
    }
    assert!(dataset.paths[0].ends_with("lat_1.0_lon_2.0_2000.tif"));
}

#[test]
fn test_listing_order_out_of_chronology_is_rejected() {
    // Lexical order of these names yields years 2005, 2000, 2010
    let dir = export_dir(&[
        "lat_1.0_lon_2.0_2005.tif",
        "lat_2.0_lon_2.0_2000.tif",
        "lat_3.0_lon_2.0_2010.tif",
    ]);

    let err = assemble_with(dir.path(), "stable_lights", "tif", year_raster).unwrap_err();
    match err {
        PipelineError::AssemblyOrder { previous, found, path } => {
            assert_eq!((previous, found), (2005, 2000));
            assert!(path.ends_with("lat_2.0_lon_2.0_2000.tif"));
        }
        other => panic!("expected AssemblyOrder, got {}", other),
    }
}

#[test]
fn test_assemble_one_location_from_shared_folder() {
    let dir = export_dir(&[
        "lat_40.4168_lon_-3.7038_2007.tif",
        "lat_40.4168_lon_-3.7038_2008.tif",
        "lat_6.455_lon_3.3841_2007.tif",
        "lat_6.455_lon_3.3841_2008.tif",
    ]);

    // The whole folder interleaves two cities
    assert!(matches!(
        assemble_with(dir.path(), "stable_lights", "tif", year_raster),
        Err(PipelineError::AssemblyOrder { .. })
    ));

    let madrid = Location::new(40.4168, -3.7038);
    let dataset = assemble_location_with(dir.path(), madrid, "stable_lights", "tif", year_raster)
        .expect("Failed to assemble Madrid");
    assert_eq!(dataset.years, vec![2007, 2008]);
    assert_eq!(dataset.location, Some(madrid));
    assert!(dataset.paths.iter().all(|p| p
        .to_string_lossy()
        .contains("lat_40.4168_lon_-3.7038")));
}

#[test]
fn test_duplicate_year_for_location_is_rejected() {
    let dir = export_dir(&[
        "lat_1.0_lon_2.0_2000.tif",
        "lat_1.0_lon_2.0_2000.TIF",
    ]);

    let location = Location::new(1.0, 2.0);
    let dataset = assemble_location_with(dir.path(), location, "stable_lights", "tif", year_raster)
        .expect("Upper-case extension is not a tif export");
    assert_eq!(dataset.years, vec![2000]);

    let dir = export_dir(&["lat_1.0_lon_2.0_2000.tif", "lat_1.00_lon_2.0_2000.tif"]);
    assert!(matches!(
        assemble_location_with(dir.path(), location, "stable_lights", "tif", year_raster),
        Err(PipelineError::DuplicateYear { year: 2000, .. })
    ));
}

#[test]
fn test_shape_mismatch_is_rejected() {
    let dir = export_dir(&["lat_1.0_lon_2.0_2000.tif", "lat_1.0_lon_2.0_2001.tif"]);

    let loader = |path: &Path| -> PipelineResult<RasterBand> {
        let name = ExportName::from_path(path)?;
        let shape = if name.year == 2000 { (3, 4) } else { (4, 4) };
        Ok(RasterBand {
            data: Array2::zeros(shape),
            geo_transform: None,
        })
    };

    match assemble_with(dir.path(), "stable_lights", "tif", loader).unwrap_err() {
        PipelineError::RasterShapeMismatch { expected, found, .. } => {
            assert_eq!(expected, (3, 4));
            assert_eq!(found, (4, 4));
        }
        other => panic!("expected RasterShapeMismatch, got {}", other),
    }
}

#[test]
fn test_nonconforming_names_and_empty_folders() {
    let dir = export_dir(&["madrid_2007.tif"]);
    assert!(matches!(
        assemble_with(dir.path(), "stable_lights", "tif", year_raster),
        Err(PipelineError::InvalidFilename(_))
    ));

    let empty = export_dir(&[]);
    assert!(matches!(
        assemble_with(empty.path(), "stable_lights", "tif", year_raster),
        Err(PipelineError::Processing(_))
    ));
}
