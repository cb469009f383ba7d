use crate::types::{Location, PipelineResult};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct SampleRow {
    lat: f64,
    lng: f64,
}

/// Read sample locations from a CSV with `lat` and `lng` columns, keeping file order.
/// Other columns (city name, population, an unnamed index) are ignored.
pub fn load_locations<P: AsRef<Path>>(path: P) -> PipelineResult<Vec<Location>> {
    log::info!("Loading sample locations: {}", path.as_ref().display());
    let file = std::fs::File::open(path.as_ref())?;
    read_locations(file)
}

pub fn read_locations<R: Read>(reader: R) -> PipelineResult<Vec<Location>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut locations = Vec::new();
    for record in csv_reader.deserialize::<SampleRow>() {
        let row = record?;
        locations.push(Location::new(row.lat, row.lng));
    }

    log::debug!("Read {} sample locations", locations.len());
    Ok(locations)
}
