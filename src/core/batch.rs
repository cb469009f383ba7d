use crate::core::orchestrator::{CompletedExport, ExportOrchestrator, LocationReport, SkippedExport};
use crate::io::imagery::ImageryService;
use crate::types::Location;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Outcome of an unattended batch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub completed: Vec<CompletedExport>,
    pub skipped: Vec<SkippedExport>,
}

impl BatchSummary {
    fn absorb(&mut self, report: LocationReport) {
        self.completed.extend(report.completed);
        self.skipped.extend(report.skipped);
    }

    pub fn fallback_count(&self) -> usize {
        self.completed.iter().filter(|c| c.used_fallback).count()
    }
}

/// Runs every year of every location.
///
/// Years of one location are always exported in order. With
/// `max_concurrent_locations > 1` several locations run side by side; the
/// summary is still ordered by location.
pub struct BatchRunner<S: ImageryService + ?Sized> {
    orchestrator: ExportOrchestrator<S>,
    years: Vec<i32>,
    folder: String,
    max_concurrent_locations: usize,
}

impl<S: ImageryService + ?Sized + 'static> BatchRunner<S> {
    pub fn new(orchestrator: ExportOrchestrator<S>, years: Vec<i32>, folder: impl Into<String>) -> Self {
        Self {
            orchestrator,
            years,
            folder: folder.into(),
            max_concurrent_locations: 1,
        }
    }

    pub fn with_max_concurrent_locations(mut self, n: usize) -> Self {
        self.max_concurrent_locations = n.max(1);
        self
    }

    pub async fn run(&self, locations: &[Location], cancel: &CancellationToken) -> BatchSummary {
        log::info!(
            "Exporting {} locations x {} years to {}",
            locations.len(),
            self.years.len(),
            self.folder
        );

        let summary = if self.max_concurrent_locations <= 1 {
            self.run_sequential(locations, cancel).await
        } else {
            self.run_concurrent(locations, cancel).await
        };

        log::info!(
            "Finished Exporting: {} completed ({} via fallback image), {} skipped",
            summary.completed.len(),
            summary.fallback_count(),
            summary.skipped.len()
        );
        summary
    }

    async fn run_sequential(&self, locations: &[Location], cancel: &CancellationToken) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for (i, &location) in locations.iter().enumerate() {
            log::info!("Location {}/{}: {}", i + 1, locations.len(), location);
            let report = self
                .orchestrator
                .export_location(location, &self.years, &self.folder, cancel)
                .await;
            summary.absorb(report);
        }
        summary
    }

    async fn run_concurrent(&self, locations: &[Location], cancel: &CancellationToken) -> BatchSummary {
        let permits = Arc::new(Semaphore::new(self.max_concurrent_locations));
        let total = locations.len();
        let mut tasks = JoinSet::new();

        for (i, &location) in locations.iter().enumerate() {
            let orchestrator = self.orchestrator.clone();
            let years = self.years.clone();
            let folder = self.folder.clone();
            let cancel = cancel.clone();
            let permits = Arc::clone(&permits);

            tasks.spawn(async move {
                let report = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        log::info!("Location {}/{}: {}", i + 1, total, location);
                        orchestrator.export_location(location, &years, &folder, &cancel).await
                    }
                    Err(_) => LocationReport::default(),
                };
                (i, report)
            });
        }

        let mut reports: Vec<(usize, LocationReport)> = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => reports.push(entry),
                Err(e) => log::error!("Location task aborted: {}", e),
            }
        }
        reports.sort_by_key(|(i, _)| *i);

        let mut summary = BatchSummary::default();
        for (_, report) in reports {
            summary.absorb(report);
        }
        summary
    }
}
