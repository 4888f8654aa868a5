//! Fleet orchestrator
//!
//! Discovers devices, runs one backup job per active device on a bounded
//! pool, records their status and repeats on a fixed cycle until stopped.

use crate::config::OrchestratorConfig;
use crate::device::{select_backup_candidates, DeviceDescriptor};
use crate::discovery::{DeviceDirectory, DeviceScanner, DiscoverySource};
use crate::jobs::{run_job, JobFactory, JobReport};
use crate::progress::ProgressSink;
use crate::status::{HealthSummary, StatusBoard};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleOutcome {
    pub source: Option<DiscoverySource>,
    pub discovered: usize,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
    /// Devices skipped because a previous job is still running
    pub skipped: usize,
}

impl CycleOutcome {
    /// A cycle fails when discovery fails or when no submitted job succeeds
    pub fn is_failure(&self) -> bool {
        self.source == Some(DiscoverySource::Failed)
            || (self.submitted > 0 && self.succeeded == 0)
    }
}

/// Extra wait added after `failures` consecutive failed cycles
pub fn adaptive_delay(failures: u32) -> Duration {
    match failures {
        0 => Duration::ZERO,
        1..=2 => Duration::from_secs(30),
        3..=4 => Duration::from_secs(120),
        _ => Duration::from_secs(300),
    }
}

pub struct FleetOrchestrator {
    config: OrchestratorConfig,
    directory: Arc<dyn DeviceDirectory>,
    scanner: Option<Arc<dyn DeviceScanner>>,
    factory: Arc<dyn JobFactory>,
    status: Arc<StatusBoard>,
    pool: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl FleetOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        directory: Arc<dyn DeviceDirectory>,
        factory: Arc<dyn JobFactory>,
    ) -> Self {
        let workers = config.max_workers.max(1);
        Self {
            config,
            directory,
            scanner: None,
            factory,
            status: Arc::new(StatusBoard::new()),
            pool: Arc::new(Semaphore::new(workers)),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn DeviceScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn with_status(mut self, status: Arc<StatusBoard>) -> Self {
        self.status = status;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn status(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.status)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn health(&self) -> HealthSummary {
        self.status.health()
    }

    /// Ask the loop to stop after the current cycle
    pub fn stop(&self) {
        info!("Stop requested");
        self.cancel.cancel();
    }

    /// Run cycles until stopped
    pub async fn run(&self) {
        info!(
            kind = %self.factory.kind(),
            max_workers = self.config.max_workers,
            interval_secs = self.config.cycle_interval_secs,
            "Backup orchestrator started"
        );
        self.status.set_running(true);

        while !self.cancel.is_cancelled() {
            let outcome = self.run_cycle().await;
            let failures = self.status.end_cycle(outcome.is_failure());
            let wait = self.config.cycle_interval() + adaptive_delay(failures);

            if failures > 0 {
                warn!(failures, wait_secs = wait.as_secs(), "Cycle failed, backing off");
            } else {
                debug!(wait_secs = wait.as_secs(), "Waiting for next cycle");
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {},
            }
        }

        if let Some(scanner) = &self.scanner {
            scanner.stop().await;
        }
        self.status.set_running(false);
        info!("Backup orchestrator stopped");
    }

    /// One discovery and backup pass over the fleet
    pub async fn run_cycle(&self) -> CycleOutcome {
        self.status.begin_cycle();

        let (devices, source) = self.discover().await;
        let discovered = devices.len();
        let candidates = select_backup_candidates(devices);
        self.status.record_discovery(source, candidates.len());

        info!(
            source = ?source,
            discovered,
            active = candidates.len(),
            "Starting backup cycle"
        );

        let mut outcome = self.dispatch(candidates).await;
        outcome.source = Some(source);
        outcome.discovered = discovered;

        info!(
            submitted = outcome.submitted,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            timed_out = outcome.timed_out,
            skipped = outcome.skipped,
            "Backup cycle finished"
        );
        outcome
    }

    /// Back up the devices matching `selectors` (id or name) once
    pub async fn run_once(&self, selectors: &[String]) -> CycleOutcome {
        let (devices, source) = self.discover().await;
        let discovered = devices.len();

        let selected: Vec<DeviceDescriptor> = devices
            .into_iter()
            .filter(|d| selectors.iter().any(|s| *s == d.id || *s == d.name))
            .filter(|d| match d.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(device_id = %d.id, error = %e, "Skipping device");
                    false
                },
            })
            .collect();

        for selector in selectors {
            if !selected.iter().any(|d| *selector == d.id || *selector == d.name) {
                warn!(device = %selector, "Requested device was not discovered");
            }
        }

        let mut outcome = self.dispatch(selected).await;
        outcome.source = Some(source);
        outcome.discovered = discovered;
        outcome
    }

    async fn discover(&self) -> (Vec<DeviceDescriptor>, DiscoverySource) {
        let reason = match tokio::time::timeout(
            self.config.directory_timeout(),
            self.directory.devices(),
        )
        .await
        {
            Ok(Ok(devices)) => return (devices, DiscoverySource::Directory),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "no answer within {}s",
                self.config.directory_timeout().as_secs()
            ),
        };

        let Some(scanner) = &self.scanner else {
            error!(reason = %reason, "Device directory unavailable and no scanner configured");
            self.status
                .record_error(&format!("Device discovery failed: {reason}"));
            return (Vec::new(), DiscoverySource::Failed);
        };

        warn!(reason = %reason, "Device directory unavailable, falling back to scanner");
        if scanner.start().await {
            tokio::select! {
                _ = self.cancel.cancelled() => {},
                _ = tokio::time::sleep(self.config.scan_settle()) => {},
            }
        }

        match scanner.get_all_devices_info().await {
            Ok(devices) => (devices.into_values().collect(), DiscoverySource::Scanner),
            Err(e) => {
                error!(error = %e, "Scanner fallback failed");
                self.status
                    .record_error(&format!("Device discovery failed: {e}"));
                (Vec::new(), DiscoverySource::Failed)
            },
        }
    }

    async fn dispatch(&self, devices: Vec<DeviceDescriptor>) -> CycleOutcome {
        let mut outcome = CycleOutcome::default();
        let mut handles: Vec<(String, JoinHandle<Option<JobReport>>)> = Vec::new();
        let job_timeout = self.config.job_timeout();

        for device in devices {
            let Some(guard) = self.status.try_claim(&device.id) else {
                debug!(device_id = %device.id, "Previous backup still running, skipping");
                outcome.skipped += 1;
                continue;
            };

            let pool = Arc::clone(&self.pool);
            let status = Arc::clone(&self.status);
            let factory = Arc::clone(&self.factory);
            let device_id = device.id.clone();

            // `None` when the job ran past its deadline
            let handle = tokio::spawn(async move {
                let _guard = guard;
                let Ok(_permit) = pool.acquire_owned().await else {
                    return Some(JobReport::failed());
                };

                status.begin(&device);
                let sink = {
                    let status = Arc::clone(&status);
                    let id = device.id.clone();
                    ProgressSink::new(&device.id, move |event| status.record_progress(&id, event))
                };

                let job = factory.create(device.clone());
                match tokio::time::timeout(job_timeout, run_job(job.as_ref(), &sink)).await {
                    Ok(report) => {
                        status.finish(&device.id, &report);
                        Some(report)
                    },
                    Err(_) => {
                        error!(
                            device_id = %device.id,
                            timeout_secs = job_timeout.as_secs(),
                            "Backup timed out"
                        );
                        status.fail(
                            &device.id,
                            &format!("Backup timed out after {}s", job_timeout.as_secs()),
                        );
                        None
                    },
                }
            });

            handles.push((device_id, handle));
            outcome.submitted += 1;
        }

        for (device_id, handle) in handles {
            match handle.await {
                Ok(Some(report)) if report.success => outcome.succeeded += 1,
                Ok(Some(_)) => outcome.failed += 1,
                Ok(None) => outcome.timed_out += 1,
                Err(e) => {
                    error!(device_id = %device_id, error = %e, "Backup task aborted");
                    self.status
                        .fail(&device_id, &format!("Backup task aborted: {e}"));
                    outcome.failed += 1;
                },
            }
        }

        outcome
    }
}
