//! Per-device backup status shared between the orchestrator and readers
//!
//! One lock guards every record. It is only held to copy or mutate plain
//! values, never across I/O.

use crate::device::DeviceDescriptor;
use crate::discovery::DiscoverySource;
use crate::jobs::{JobReport, SyncSummary};
use crate::progress::{EventStatus, ProgressEvent};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// `ended` value of a job that did not finish on its own
pub const ABNORMAL_END: i64 = -1;

const ERROR_WINDOW_MINUTES: i64 = 60;
const MAX_RECENT_ERRORS: usize = 100;

/// Snapshot of one device's backup history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackupStatus {
    pub name: String,
    /// Device state as reported by discovery
    pub status: String,
    /// Unix seconds when the current or last job started, 0 if never
    pub started: i64,
    /// Unix seconds when the last job ended; 0 if never, negative if abnormal
    pub ended: i64,
    pub processing: bool,
    /// Number of attempts so far
    pub count: u64,
    pub synced: Option<SyncSummary>,
    pub last_comparison: Option<f64>,
    pub progress: Option<ProgressEvent>,
}

impl BackupStatus {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: String::new(),
            started: 0,
            ended: 0,
            processing: false,
            count: 0,
            synced: None,
            last_comparison: None,
            progress: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentError {
    pub at: DateTime<Utc>,
    pub device_id: Option<String>,
    pub message: String,
}

/// Device counts by backup state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub running: bool,
    pub cycle_count: u64,
    pub last_cycle_start: Option<DateTime<Utc>>,
    pub last_discovery_source: Option<DiscoverySource>,
    pub last_device_count: usize,
    pub consecutive_failed_cycles: u32,
    pub devices: StateCounts,
    pub recent_errors: Vec<RecentError>,
}

#[derive(Default)]
struct CycleStats {
    running: bool,
    cycle_count: u64,
    last_cycle_start: Option<DateTime<Utc>>,
    last_discovery_source: Option<DiscoverySource>,
    last_device_count: usize,
    consecutive_failed_cycles: u32,
    recent_errors: VecDeque<RecentError>,
}

#[derive(Default)]
struct BoardState {
    records: BTreeMap<String, BackupStatus>,
    in_flight: HashSet<String>,
    cycles: CycleStats,
}

#[derive(Default)]
pub struct StatusBoard {
    state: Mutex<BoardState>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `device_id` as having a job in flight.
    ///
    /// Returns `None` while a previous job for the same device still runs.
    pub fn try_claim(self: &Arc<Self>, device_id: &str) -> Option<InFlightGuard> {
        let mut state = self.lock();
        if !state.in_flight.insert(device_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            board: Arc::clone(self),
            device_id: device_id.to_string(),
        })
    }

    pub fn is_in_flight(&self, device_id: &str) -> bool {
        self.lock().in_flight.contains(device_id)
    }

    pub fn begin(&self, device: &DeviceDescriptor) {
        let mut state = self.lock();
        let record = state
            .records
            .entry(device.id.clone())
            .or_insert_with(|| BackupStatus::new(device.label()));
        record.name = device.label().to_string();
        record.status = device.status.clone();
        record.started = Utc::now().timestamp();
        record.processing = true;
        record.count += 1;
    }

    pub fn record_progress(&self, device_id: &str, event: &ProgressEvent) {
        let mut state = self.lock();
        if event.status == EventStatus::Error {
            push_error(&mut state.cycles, Some(device_id), &event.message);
        }
        let record = state
            .records
            .entry(device_id.to_string())
            .or_insert_with(|| BackupStatus::new(device_id));
        record.progress = Some(event.clone());
    }

    pub fn finish(&self, device_id: &str, report: &JobReport) {
        let mut state = self.lock();
        let record = state
            .records
            .entry(device_id.to_string())
            .or_insert_with(|| BackupStatus::new(device_id));
        record.ended = Utc::now().timestamp();
        record.processing = false;
        if report.comparison.is_some() {
            record.last_comparison = report.comparison;
        }
        if report.sync.is_some() {
            record.synced = report.sync.clone();
        }
    }

    /// Record a job that had to be abandoned, e.g. after a timeout
    pub fn fail(&self, device_id: &str, message: &str) {
        let mut state = self.lock();
        push_error(&mut state.cycles, Some(device_id), message);
        let record = state
            .records
            .entry(device_id.to_string())
            .or_insert_with(|| BackupStatus::new(device_id));
        record.ended = ABNORMAL_END;
        record.processing = false;
        record.progress = Some(ProgressEvent::error(message));
    }

    pub fn get(&self, device_id: &str) -> Option<BackupStatus> {
        self.lock().records.get(device_id).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, BackupStatus> {
        self.lock().records.clone()
    }

    pub fn processing_count(&self) -> usize {
        self.lock().records.values().filter(|r| r.processing).count()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or_default()
    }

    pub fn set_running(&self, running: bool) {
        self.lock().cycles.running = running;
    }

    pub fn begin_cycle(&self) {
        let mut state = self.lock();
        state.cycles.cycle_count += 1;
        state.cycles.last_cycle_start = Some(Utc::now());
    }

    pub fn record_discovery(&self, source: DiscoverySource, device_count: usize) {
        let mut state = self.lock();
        state.cycles.last_discovery_source = Some(source);
        state.cycles.last_device_count = device_count;
    }

    /// Update the failed-cycle streak and return its new length
    pub fn end_cycle(&self, failed: bool) -> u32 {
        let mut state = self.lock();
        if failed {
            state.cycles.consecutive_failed_cycles += 1;
        } else {
            state.cycles.consecutive_failed_cycles = 0;
        }
        state.cycles.consecutive_failed_cycles
    }

    pub fn record_error(&self, message: &str) {
        push_error(&mut self.lock().cycles, None, message);
    }

    pub fn health(&self) -> HealthSummary {
        let state = self.lock();
        let cutoff = Utc::now() - Duration::minutes(ERROR_WINDOW_MINUTES);

        let mut devices = StateCounts::default();
        for record in state.records.values() {
            if record.processing {
                devices.processing += 1;
            } else if record.ended < 0 {
                devices.failed += 1;
            } else if record.ended > 0 {
                devices.completed += 1;
            } else {
                devices.pending += 1;
            }
        }

        HealthSummary {
            running: state.cycles.running,
            cycle_count: state.cycles.cycle_count,
            last_cycle_start: state.cycles.last_cycle_start,
            last_discovery_source: state.cycles.last_discovery_source,
            last_device_count: state.cycles.last_device_count,
            consecutive_failed_cycles: state.cycles.consecutive_failed_cycles,
            devices,
            recent_errors: state
                .cycles
                .recent_errors
                .iter()
                .filter(|e| e.at >= cutoff)
                .cloned()
                .collect(),
        }
    }
}

fn push_error(cycles: &mut CycleStats, device_id: Option<&str>, message: &str) {
    if cycles.recent_errors.len() == MAX_RECENT_ERRORS {
        cycles.recent_errors.pop_front();
    }
    cycles.recent_errors.push_back(RecentError {
        at: Utc::now(),
        device_id: device_id.map(str::to_string),
        message: message.to_string(),
    });
}

/// Releases the device's in-flight claim when dropped
pub struct InFlightGuard {
    board: Arc<StatusBoard>,
    device_id: String,
}

impl InFlightGuard {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.board.lock().in_flight.remove(&self.device_id);
    }
}

impl std::fmt::Debug for InFlightGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightGuard")
            .field("device_id", &self.device_id)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn device() -> DeviceDescriptor {
        DeviceDescriptor::new("d1", "ETHOSCOPE_001", "10.0.0.1").with_status("running")
    }

    #[test]
    fn test_claim_is_exclusive_until_dropped() {
        let board = Arc::new(StatusBoard::new());
        let guard = board.try_claim("d1").unwrap();
        assert!(board.try_claim("d1").is_none());
        assert!(board.try_claim("d2").is_some());

        drop(guard);
        assert!(!board.is_in_flight("d1"));
        assert!(board.try_claim("d1").is_some());
    }

    #[test]
    fn test_lifecycle_updates_record() {
        let board = StatusBoard::new();
        board.begin(&device());
        assert!(board.get("d1").unwrap().processing);
        assert_eq!(board.processing_count(), 1);

        board.record_progress("d1", &ProgressEvent::info("Mirrored 3 tables"));
        board.finish(
            "d1",
            &JobReport {
                success: true,
                comparison: Some(100.0),
                sync: None,
            },
        );

        let record = board.get("d1").unwrap();
        assert!(!record.processing);
        assert_eq!(record.count, 1);
        assert!(record.ended >= record.started);
        assert_eq!(record.last_comparison, Some(100.0));
        assert_eq!(record.progress.unwrap().message, "Mirrored 3 tables");

        // A failed attempt keeps the previous comparison.
        board.begin(&device());
        board.finish("d1", &JobReport::failed());
        let record = board.get("d1").unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(record.last_comparison, Some(100.0));
    }

    #[test]
    fn test_fail_marks_abnormal_end() {
        let board = StatusBoard::new();
        board.begin(&device());
        board.fail("d1", "Backup timed out after 600s");

        let record = board.get("d1").unwrap();
        assert_eq!(record.ended, ABNORMAL_END);
        assert!(!record.processing);

        let health = board.health();
        assert_eq!(health.devices.failed, 1);
        assert_eq!(health.recent_errors.len(), 1);
    }

    #[test]
    fn test_failed_cycle_streak() {
        let board = StatusBoard::new();
        assert_eq!(board.end_cycle(true), 1);
        assert_eq!(board.end_cycle(true), 2);
        assert_eq!(board.end_cycle(false), 0);
    }

    #[test]
    fn test_json_snapshot() {
        let board = StatusBoard::new();
        board.begin(&device());
        let json = board.to_json();
        assert_eq!(json["d1"]["name"], "ETHOSCOPE_001");
        assert_eq!(json["d1"]["processing"], true);
        assert_eq!(json["d1"]["count"], 1);
    }
}
