//! Export job orchestration: image resolution, calibration with a single
//! fallback retry, job submission and polling to a terminal state.

use crate::core::calibrate::{CalibratedImage, Calibrator};
use crate::core::calibration_table::CalibrationTable;
use crate::core::selector::{select_fallback, select_primary};
use crate::io::imagery::{ExportRequest, ImageryService, JobHandle, RemoteState};
use crate::io::naming::ExportName;
use crate::types::{
    BoundingBox, CandidateImage, DateRange, Location, PipelineError, PipelineResult, Projection,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default status polling interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Lifecycle of an export job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Created,
    Running,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    fn can_become(self, next: JobState) -> bool {
        use JobState::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Created, _) => true,
            (Running, Completed) | (Running, Failed) => true,
            _ => false,
        }
    }
}

impl From<RemoteState> for JobState {
    fn from(state: RemoteState) -> Self {
        match state {
            RemoteState::Ready => JobState::Created,
            RemoteState::Running => JobState::Running,
            RemoteState::Completed => JobState::Completed,
            RemoteState::Failed | RemoteState::Cancelled => JobState::Failed,
        }
    }
}

/// Local view of one remote export job
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub handle: JobHandle,
    pub location: Location,
    pub year: i32,
    pub target_name: String,
    pub folder: String,
    pub region: BoundingBox,
    pub state: JobState,
    pub used_fallback: bool,
    pub submitted_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub detail: Option<String>,
}

impl ExportJob {
    pub fn id(&self) -> &str {
        &self.handle.id
    }

    /// Move to `next`. Terminal states are absorbing and a running job never
    /// returns to `Created`.
    pub fn transition(&mut self, next: JobState) -> PipelineResult<()> {
        if !self.state.can_become(next) {
            return Err(PipelineError::InvalidTransition {
                job_id: self.handle.id.clone(),
                from: self.state,
                to: next,
            });
        }
        if next != self.state {
            log::info!("Job {} ({}): {:?} -> {:?}", self.handle.id, self.target_name, self.state, next);
            if next.is_terminal() {
                self.finished_at = Some(Utc::now());
            }
        }
        self.state = next;
        Ok(())
    }
}

/// Image to export: raw values or with a calibration attached
#[derive(Debug, Clone, PartialEq)]
pub enum ExportImage {
    Raw(CandidateImage),
    Calibrated(CalibratedImage),
}

impl ExportImage {
    pub fn candidate(&self) -> &CandidateImage {
        match self {
            ExportImage::Raw(image) => image,
            ExportImage::Calibrated(calibrated) => &calibrated.image,
        }
    }
}

/// Outcome of image resolution for one (location, year)
#[derive(Debug)]
pub enum Selection {
    Primary(ExportImage),
    Fallback {
        image: ExportImage,
        primary_error: PipelineError,
    },
    Exhausted(PipelineError),
}

/// Settings of an orchestrator, independent of the location being exported
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub collection_id: String,
    pub band: String,
    pub buffer_radius_m: f64,
    pub poll_interval: Duration,
    /// Wall-clock polling budget per job; `None` polls until a terminal state
    pub max_poll: Option<Duration>,
    /// Projection forced on every export; otherwise the image's own is used
    pub projection: Option<Projection>,
}

/// A (location, year) that produced a completed export
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedExport {
    pub location: Location,
    pub year: i32,
    pub job_id: String,
    pub target_name: String,
    pub used_fallback: bool,
}

/// A (location, year) that was skipped, with the reason
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedExport {
    pub location: Location,
    pub year: i32,
    pub reason: String,
}

/// Results of all years of one location
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LocationReport {
    pub completed: Vec<CompletedExport>,
    pub skipped: Vec<SkippedExport>,
}

/// Drives export jobs against an imagery service.
///
/// Calibrated exports need a calibration table; without one images are
/// exported raw and no fallback is attempted.
pub struct ExportOrchestrator<S: ImageryService + ?Sized> {
    service: Arc<S>,
    table: Option<Arc<CalibrationTable>>,
    settings: ExportSettings,
}

impl<S: ImageryService + ?Sized> Clone for ExportOrchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
            table: self.table.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<S: ImageryService + ?Sized> ExportOrchestrator<S> {
    pub fn new(service: Arc<S>, table: Option<Arc<CalibrationTable>>, settings: ExportSettings) -> Self {
        Self {
            service,
            table,
            settings,
        }
    }

    pub fn settings(&self) -> &ExportSettings {
        &self.settings
    }

    /// Fix the projection used by all subsequent exports
    pub fn set_projection(&mut self, projection: Option<Projection>) {
        self.settings.projection = projection;
    }

    /// Projection of the first image of `collection_id`, if it carries one.
    ///
    /// The reference collection is listed without a band restriction; it
    /// usually does not carry the exported band.
    pub async fn resolve_projection(&self, collection_id: &str) -> PipelineResult<Option<Projection>> {
        let images = self.service.list_catalog(collection_id, None, None).await?;
        let projection = images.into_iter().next().and_then(|image| image.projection);
        match &projection {
            Some(p) => log::info!("Using projection {} from {}", p.crs, collection_id),
            None => log::warn!("Collection {} exposes no projection", collection_id),
        }
        Ok(projection)
    }

    /// Pick the image to export for `year` from a catalog listing.
    ///
    /// Calibration of the primary image is retried exactly once on the
    /// fallback image when it fails for lack of coefficients or metadata.
    pub fn resolve_image(&self, catalog: &[CandidateImage], location: Location, year: i32) -> PipelineResult<Selection> {
        let no_image = || PipelineError::NoImageForYear { location, year };

        let primary = match select_primary(catalog, year)? {
            Some(image) => image,
            None => return Ok(Selection::Exhausted(no_image())),
        };

        let table = match &self.table {
            Some(table) => table,
            None => return Ok(Selection::Primary(ExportImage::Raw(primary.clone()))),
        };
        let calibrator = Calibrator::new(table);

        let primary_error = match calibrator.calibrate(primary, year) {
            Ok(calibrated) => return Ok(Selection::Primary(ExportImage::Calibrated(calibrated))),
            Err(e) if e.is_recoverable_by_fallback() => e,
            Err(e) => return Ok(Selection::Exhausted(e)),
        };

        log::warn!(
            "Calibration of {} failed for {} {}: {}; trying fallback image",
            primary.system_index,
            location,
            year,
            primary_error
        );

        let fallback = match select_fallback(catalog, year)? {
            Some(image) => image,
            None => return Ok(Selection::Exhausted(no_image())),
        };

        match calibrator.calibrate(fallback, year) {
            Ok(calibrated) => {
                log::info!("Calibrated fallback image {}", fallback.system_index);
                Ok(Selection::Fallback {
                    image: ExportImage::Calibrated(calibrated),
                    primary_error,
                })
            }
            Err(e) => Ok(Selection::Exhausted(e)),
        }
    }

    /// Resolve the image for (location, year) and submit its export
    pub async fn submit(&self, location: Location, year: i32, folder: &str) -> PipelineResult<ExportJob> {
        let catalog = self
            .service
            .list_catalog(
                &self.settings.collection_id,
                Some(self.settings.band.as_str()),
                Some(DateRange::for_year(year)?),
            )
            .await?;

        let (image, used_fallback) = match self.resolve_image(&catalog, location, year)? {
            Selection::Primary(image) => (image, false),
            Selection::Fallback { image, .. } => (image, true),
            Selection::Exhausted(e) => return Err(e),
        };

        let candidate = image.candidate();
        let image_id = candidate
            .source_id
            .clone()
            .unwrap_or_else(|| candidate.system_index.clone());

        let projection = self
            .settings
            .projection
            .clone()
            .or_else(|| candidate.projection.clone())
            .ok_or_else(|| {
                PipelineError::ImageMetadata(format!("Image {} has no projection", image_id))
            })?;

        let region = BoundingBox::around(location, self.settings.buffer_radius_m);
        let target_name = ExportName::new(location, year).file_stem();

        let request = ExportRequest {
            image_id,
            band: self.settings.band.clone(),
            transform: match &image {
                ExportImage::Calibrated(calibrated) => Some(calibrated.pixel_transform()),
                ExportImage::Raw(_) => None,
            },
            region,
            folder: folder.to_string(),
            file_name_prefix: target_name.clone(),
            crs: projection.crs,
            crs_transform: projection.crs_transform,
        };

        let handle = self.service.submit_export(&request).await?;
        log::info!("Starting task for: {} (job {})", target_name, handle.id);

        Ok(ExportJob {
            handle,
            location,
            year,
            target_name,
            folder: folder.to_string(),
            region,
            state: JobState::Created,
            used_fallback,
            submitted_at: Utc::now(),
            finished_at: None,
            detail: None,
        })
    }

    /// Poll a job every `poll_interval` until it completes or fails.
    ///
    /// Status is re-queried on every cycle. Exceeding `max_poll` marks the job
    /// failed locally and returns `JobTimeout`; cancelling `cancel` returns
    /// `Cancelled` without touching the remote job.
    pub async fn poll_until_terminal(
        &self,
        job: &mut ExportJob,
        cancel: &CancellationToken,
    ) -> PipelineResult<JobState> {
        let started = tokio::time::Instant::now();

        loop {
            let report = self.service.poll_status(&job.handle).await?;
            let state = JobState::from(report.state);
            if !state.is_terminal() && !job.state.can_become(state) {
                // The remote job is still alive; keep our furthest state and poll again
                log::warn!(
                    "Job {} reported {:?} while {:?}, still polling",
                    job.handle.id,
                    report.state,
                    job.state
                );
            } else {
                job.transition(state)?;
            }

            match state {
                JobState::Completed => return Ok(state),
                JobState::Failed => {
                    job.detail = report.error_message;
                    return Ok(state);
                }
                _ => log::debug!("Status: {:?}", report.state),
            }

            let mut wait = self.settings.poll_interval;
            if let Some(budget) = self.settings.max_poll {
                let elapsed = started.elapsed();
                if elapsed >= budget {
                    job.transition(JobState::Failed)?;
                    job.detail = Some("polling budget exhausted".to_string());
                    return Err(PipelineError::JobTimeout {
                        job_id: job.handle.id.clone(),
                        waited_secs: elapsed.as_secs(),
                    });
                }
                wait = wait.min(budget - elapsed);
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    log::warn!("Stopped polling job {} ({})", job.handle.id, job.target_name);
                    return Err(PipelineError::Cancelled(job.handle.id.clone()));
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Submit and poll one (location, year) export.
    ///
    /// A job the service reports as failed is logged and returned as `JobFailed`.
    pub async fn run_export(
        &self,
        location: Location,
        year: i32,
        folder: &str,
        cancel: &CancellationToken,
    ) -> PipelineResult<ExportJob> {
        let mut job = self.submit(location, year, folder).await?;

        match self.poll_until_terminal(&mut job, cancel).await? {
            JobState::Failed => {
                let detail = job.detail.clone().unwrap_or_else(|| "no detail".to_string());
                log::error!("Export {} failed: {}", job.target_name, detail);
                Err(PipelineError::JobFailed {
                    job_id: job.handle.id.clone(),
                    detail,
                })
            }
            _ => Ok(job),
        }
    }

    /// Export all `years` of one location, strictly in order.
    ///
    /// Per-year failures are recorded and do not stop later years; cancellation
    /// skips the remaining years.
    pub async fn export_location(
        &self,
        location: Location,
        years: &[i32],
        folder: &str,
        cancel: &CancellationToken,
    ) -> LocationReport {
        let mut report = LocationReport::default();

        for (i, &year) in years.iter().enumerate() {
            if cancel.is_cancelled() {
                for &remaining in &years[i..] {
                    report.skipped.push(SkippedExport {
                        location,
                        year: remaining,
                        reason: "cancelled".to_string(),
                    });
                }
                break;
            }

            log::info!("Year: {}", year);
            match self.run_export(location, year, folder, cancel).await {
                Ok(job) => report.completed.push(CompletedExport {
                    location,
                    year,
                    job_id: job.handle.id,
                    target_name: job.target_name,
                    used_fallback: job.used_fallback,
                }),
                Err(e) => {
                    log::warn!("Skipping {} {}: {}", location, year, e);
                    report.skipped.push(SkippedExport {
                        location,
                        year,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> ExportJob {
        ExportJob {
            handle: JobHandle { id: "job-1".to_string() },
            location: Location::new(40.4168, -3.7038),
            year: 2007,
            target_name: "lat_40.4168_lon_-3.7038_2007".to_string(),
            folder: "exports".to_string(),
            region: BoundingBox::around(Location::new(40.4168, -3.7038), 2.5e5),
            state: JobState::Created,
            used_fallback: false,
            submitted_at: Utc::now(),
            finished_at: None,
            detail: None,
        }
    }

    #[test]
    fn test_forward_transitions() {
        let mut job = job();
        job.transition(JobState::Created).unwrap();
        job.transition(JobState::Running).unwrap();
        job.transition(JobState::Running).unwrap();
        job.transition(JobState::Completed).unwrap();
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        let mut job = job();
        job.transition(JobState::Failed).unwrap();
        job.transition(JobState::Failed).unwrap();
        assert!(matches!(
            job.transition(JobState::Running),
            Err(PipelineError::InvalidTransition { .. })
        ));
        assert!(job.transition(JobState::Completed).is_err());
        assert_eq!(job.state, JobState::Failed);
    }

    #[test]
    fn test_running_never_reverts() {
        let mut job = job();
        job.transition(JobState::Running).unwrap();
        assert!(job.transition(JobState::Created).is_err());
    }

    #[test]
    fn test_remote_state_mapping() {
        assert_eq!(JobState::from(RemoteState::Ready), JobState::Created);
        assert_eq!(JobState::from(RemoteState::Cancelled), JobState::Failed);
        assert!(JobState::from(RemoteState::Completed).is_terminal());
    }
}
