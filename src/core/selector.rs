//! Primary and fallback image selection from a catalog listing

use crate::types::{CandidateImage, DateRange, PipelineResult};

/// Catalog images acquired within `year`, in catalog-native order
pub fn filter_year(catalog: &[CandidateImage], year: i32) -> PipelineResult<Vec<&CandidateImage>> {
    let range = DateRange::for_year(year)?;
    Ok(catalog
        .iter()
        .filter(|image| range.contains(image.acquired))
        .collect())
}

/// First image of the year in catalog-native order
pub fn select_primary(catalog: &[CandidateImage], year: i32) -> PipelineResult<Option<&CandidateImage>> {
    Ok(filter_year(catalog, year)?.into_iter().next())
}

/// First image of the year when the catalog is sorted by `system_index`, descending.
///
/// Ties keep catalog order.
pub fn select_fallback(catalog: &[CandidateImage], year: i32) -> PipelineResult<Option<&CandidateImage>> {
    let mut images = filter_year(catalog, year)?;
    images.sort_by(|a, b| b.system_index.cmp(&a.system_index));
    Ok(images.into_iter().next())
}
