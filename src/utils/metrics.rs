//! Cycle telemetry for the real-time modules.
//!
//! Two independent paths:
//! - **EventRecorder:** Lock-free queue (16K capacity) → background CSV export (nanosecond timestamps).
//! - **Metrics:** Shared mutex buffer with per-role counters, bounded to 1000 points per history.
//!
//! Every module cycle ends in exactly one event: completed, skipped, step failed or tag fault.

use std::{
    collections::VecDeque,
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_queue::ArrayQueue;
use log::error;
use parking_lot::Mutex;

use crate::{
    client::supervision::Slot,
    datastore::namespace::SUPERVISION_LEN,
    realtime::module::{CycleOutcome, StatusCheck},
};

#[derive(Debug, Clone)]
pub enum Event {
    CycleCompleted {
        seq: u64,
        ts_ns: u64,
        role: Slot,
        elapsed_us: u64,
        residual_us: i64,
    },
    /// Readiness gate refused the cycle.
    CycleSkipped {
        seq: u64,
        ts_ns: u64,
        role: Slot,
        reason: StatusCheck,
    },
    StepFailed {
        seq: u64,
        ts_ns: u64,
        role: Slot,
        reason: String,
    },
    /// Critical tag I/O failed; the module disabled itself.
    TagFault {
        seq: u64,
        ts_ns: u64,
        role: Slot,
        reason: String,
    },
}

/// Free text goes into the last column; commas would shift the columns.
fn csv_text(text: &str) -> String {
    text.replace([',', '\n'], ";")
}

impl Event {
    /// CSV row: seq,role,event,ts_ns,field1,field2
    pub fn to_csv_row(&self) -> String {
        match self {
            Event::CycleCompleted { seq, ts_ns, role, elapsed_us, residual_us } => {
                format!("{},{},CycleCompleted,{},{},{}", seq, role, ts_ns, elapsed_us, residual_us)
            }
            Event::CycleSkipped { seq, ts_ns, role, reason } => {
                format!("{},{},CycleSkipped,{},{},", seq, role, ts_ns, reason)
            }
            Event::StepFailed { seq, ts_ns, role, reason } => {
                format!("{},{},StepFailed,{},,{}", seq, role, ts_ns, csv_text(reason))
            }
            Event::TagFault { seq, ts_ns, role, reason } => {
                format!("{},{},TagFault,{},,{}", seq, role, ts_ns, csv_text(reason))
            }
        }
    }
}

const EVENT_QUEUE_CAPACITY: usize = 16_384;
const EXPORT_POLL_MS: u64 = 10;

/// Non-blocking event recorder with background CSV export.
///
/// `record()` appends to a lock-free queue and returns immediately; events are dropped
/// when the queue is full so a module thread never blocks on telemetry.
#[derive(Clone)]
pub struct EventRecorder {
    queue: Arc<ArrayQueue<Event>>,
    run_start: Instant,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(EVENT_QUEUE_CAPACITY)),
            run_start: Instant::now(),
        }
    }

    #[inline]
    pub fn record(&self, event: Event) {
        let _ = self.queue.push(event);
    }

    /// Nanoseconds since recorder creation.
    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.run_start.elapsed().as_nanos() as u64
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn drain(&self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.queue.len());
        while let Some(event) = self.queue.pop() {
            events.push(event);
        }
        events
    }

    /// Spawns a thread draining the queue into `output_csv` until `active` is cleared
    /// and the queue is empty.
    pub fn start_exporter(
        &self,
        output_csv: PathBuf,
        active: Arc<AtomicBool>,
    ) -> thread::JoinHandle<()> {
        let queue = self.queue.clone();

        thread::spawn(move || match File::create(&output_csv) {
            Ok(file) => {
                let mut writer = BufWriter::new(file);
                let _ = writeln!(writer, "seq,role,event,ts_ns,field1,field2");

                loop {
                    match queue.pop() {
                        Some(event) => {
                            let _ = writeln!(writer, "{}", event.to_csv_row());
                        }
                        None => {
                            if !active.load(Ordering::Acquire) && queue.is_empty() {
                                break;
                            }
                            let _ = writer.flush();
                            thread::sleep(Duration::from_millis(EXPORT_POLL_MS));
                        }
                    }
                }

                let _ = writer.flush();
            }
            Err(e) => {
                error!("Failed to create event CSV {}: {}", output_csv.display(), e);
            }
        })
    }
}

/// Counters and bounded histories for one role.
#[derive(Debug, Default, Clone)]
pub struct RoleMetrics {
    pub cycles: u64,
    pub completed: u64,
    pub skipped: u64,
    pub step_failures: u64,
    pub tag_faults: u64,
    /// Completed cycles whose step took longer than the cycle time.
    pub overruns: u64,
    pub step_time_us: VecDeque<u64>,
    pub residual_ms: VecDeque<f64>,
}

#[derive(Debug, Default, Clone)]
pub struct Metrics {
    pub roles: [RoleMetrics; SUPERVISION_LEN],
    pub total_cycles: u64,
}

impl Metrics {
    pub fn role(&self, slot: Slot) -> &RoleMetrics {
        &self.roles[slot.index()]
    }

    pub fn role_mut(&mut self, slot: Slot) -> &mut RoleMetrics {
        &mut self.roles[slot.index()]
    }

    pub fn record_outcome(&mut self, slot: Slot, outcome: &CycleOutcome) {
        self.total_cycles += 1;
        let role = self.role_mut(slot);
        role.cycles += 1;
        match outcome {
            CycleOutcome::Completed { elapsed, residual } => {
                role.completed += 1;
                if *residual < 0.0 {
                    role.overruns += 1;
                }
                push_capped_u64(&mut role.step_time_us, elapsed.as_micros() as u64);
                push_capped(&mut role.residual_ms, residual * 1_000.0);
            }
            CycleOutcome::Skipped(_) | CycleOutcome::Disabled => role.skipped += 1,
            CycleOutcome::StepFailed(_) => role.step_failures += 1,
            CycleOutcome::Faulted(_) => role.tag_faults += 1,
        }
    }
}

pub type SharedMetrics = Arc<Mutex<Metrics>>;

pub const MAX_POINTS: usize = 1_000;

/// Appends value to metrics buffer; removes oldest if at capacity (FIFO).
#[inline]
pub fn push_capped(buf: &mut VecDeque<f64>, val: f64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[inline]
pub fn push_capped_u64(buf: &mut VecDeque<u64>, val: u64) {
    if buf.len() >= MAX_POINTS {
        buf.pop_front();
    }
    buf.push_back(val);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

pub fn calculate_stats(data: &VecDeque<f64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }

    let count = data.len();
    let min = data.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = data.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().sum::<f64>() / count as f64;

    Some(Stats { min, max, mean, count })
}

pub fn calculate_stats_u64(data: &VecDeque<u64>) -> Option<Stats> {
    if data.is_empty() {
        return None;
    }

    let count = data.len();
    let min = data.iter().map(|&x| x as f64).fold(f64::INFINITY, f64::min);
    let max = data.iter().map(|&x| x as f64).fold(f64::NEG_INFINITY, f64::max);
    let mean = data.iter().map(|&x| x as f64).sum::<f64>() / count as f64;

    Some(Stats { min, max, mean, count })
}

/// What a module carries to report its cycles: the shared counters and the event queue.
#[derive(Clone, Default)]
pub struct Telemetry {
    pub metrics: SharedMetrics,
    pub recorder: EventRecorder,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, slot: Slot, seq: u64, outcome: &CycleOutcome) {
        let ts_ns = self.recorder.now_ns();
        let event = match outcome {
            CycleOutcome::Completed { elapsed, residual } => Event::CycleCompleted {
                seq,
                ts_ns,
                role: slot,
                elapsed_us: elapsed.as_micros() as u64,
                residual_us: (residual * 1e6) as i64,
            },
            CycleOutcome::Skipped(reason) => Event::CycleSkipped {
                seq,
                ts_ns,
                role: slot,
                reason: *reason,
            },
            CycleOutcome::Disabled => Event::CycleSkipped {
                seq,
                ts_ns,
                role: slot,
                reason: StatusCheck::NotConnected,
            },
            CycleOutcome::StepFailed(reason) => Event::StepFailed {
                seq,
                ts_ns,
                role: slot,
                reason: reason.clone(),
            },
            CycleOutcome::Faulted(reason) => Event::TagFault {
                seq,
                ts_ns,
                role: slot,
                reason: reason.clone(),
            },
        };
        self.recorder.record(event);
        self.metrics.lock().record_outcome(slot, outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histories_are_capped() {
        let mut buf = VecDeque::new();
        for i in 0..(MAX_POINTS + 10) {
            push_capped(&mut buf, i as f64);
        }
        assert_eq!(buf.len(), MAX_POINTS);
        assert_eq!(buf.front().copied(), Some(10.0));
    }

    #[test]
    fn negative_residual_counts_as_overrun() {
        let mut m = Metrics::default();
        m.record_outcome(
            Slot::Controller,
            &CycleOutcome::Completed {
                elapsed: Duration::from_millis(30),
                residual: -0.01,
            },
        );
        m.record_outcome(Slot::Controller, &CycleOutcome::Skipped(StatusCheck::SelfFault));
        let c = m.role(Slot::Controller);
        assert_eq!((c.cycles, c.completed, c.skipped, c.overruns), (2, 1, 1, 1));
        assert_eq!(m.role(Slot::Simulator).cycles, 0);
    }

    #[test]
    fn csv_rows_keep_column_count() {
        let row = Event::StepFailed {
            seq: 3,
            ts_ns: 10,
            role: Slot::Estimator,
            reason: "filter step failed: y, u mismatch".into(),
        }
        .to_csv_row();
        assert_eq!(row.split(',').count(), 6);
    }

    #[test]
    fn telemetry_feeds_both_paths() {
        let t = Telemetry::new();
        t.record(Slot::Simulator, 1, &CycleOutcome::Faulted("read of Inputs failed".into()));
        assert_eq!(t.recorder.pending(), 1);
        assert_eq!(t.metrics.lock().role(Slot::Simulator).tag_faults, 1);
    }
}
