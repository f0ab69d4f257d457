//! trigger.rs
//! Drift-compensating periodic release of one callback on its own thread.
//!
//! - Deadlines are absolute: each fire first schedules `deadline + interval`, then runs the callback.
//! - Waiting: coarse wait on the stop channel until shortly before the deadline, then SpinSleeper.
//! - An overrunning callback makes the next release immediate; releases are never skipped.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};
use parking_lot::Mutex;
use spin_sleep::{SpinSleeper, SpinStrategy};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::{
    error::{LinkError, LinkResult},
    realtime::module::{RealtimeModule, SharedModule},
};

/// Hand-over from the coarse channel wait to the spin sleeper.
const SPIN_MARGIN: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TriggerStats {
    pub fires: u64,
    /// Callbacks that ended after the following deadline.
    pub overruns: u64,
    pub last_lateness: Duration,
    pub max_lateness: Duration,
    pub next_deadline: Option<Instant>,
}

pub struct PeriodicTrigger {
    name: String,
    interval: Duration,
    running: Arc<AtomicBool>,
    stats: Arc<Mutex<TriggerStats>>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTrigger {
    /// Schedules the first release at now + `interval` and starts the release thread.
    pub fn new<F>(name: &str, interval: Duration, callback: F) -> LinkResult<Self>
    where
        F: FnMut() + Send + 'static,
    {
        if interval.is_zero() {
            return Err(LinkError::Config(format!("trigger {}: interval must be positive", name)));
        }

        let first_deadline = Instant::now()
            .checked_add(interval)
            .ok_or_else(|| LinkError::Config(format!("trigger {}: interval {:?} is out of range", name, interval)))?;
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(Mutex::new(TriggerStats {
            next_deadline: Some(first_deadline),
            ..TriggerStats::default()
        }));
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let thread_name = name.to_string();
        let loop_running = running.clone();
        let loop_stats = stats.clone();
        let handle = thread::Builder::new()
            .name(format!("trigger-{}", name))
            .spawn_with_priority(ThreadPriority::Max, move |priority| {
                if let Err(e) = priority {
                    debug!("[Trigger:{}] running at default priority: {:?}", thread_name, e);
                }
                release_loop(
                    &thread_name,
                    interval,
                    first_deadline,
                    callback,
                    &stop_rx,
                    &loop_running,
                    &loop_stats,
                );
            })
            .map_err(|e| {
                running.store(false, Ordering::Release);
                LinkError::Config(format!("trigger {}: cannot spawn thread: {}", name, e))
            })?;

        info!("[Trigger:{}] started, interval {:?}", name, interval);

        Ok(Self {
            name: name.to_string(),
            interval,
            running,
            stats,
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Binds a trigger to a module's step. The module must have written its initial value.
    pub fn for_module<M>(module: SharedModule<M>) -> LinkResult<Self>
    where
        M: RealtimeModule + ?Sized + 'static,
    {
        let (name, interval, initialized) = {
            let m = module.lock();
            (m.name().to_string(), m.cycle_time(), m.state().initialized)
        };
        if !initialized {
            return Err(LinkError::NotInitialized(name));
        }

        Self::new(&name, interval, move || {
            let outcome = module.lock().asynchronous_step();
            debug!("cycle outcome: {:?}", outcome);
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> TriggerStats {
        *self.stats.lock()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.stats.lock().next_deadline
    }

    /// Cancels the pending release. An in-flight callback runs to completion.
    /// Joins the release thread unless called from inside the callback.
    pub fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::AcqRel);
        // Dropping the sender wakes the coarse wait.
        self.stop_tx.take();

        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                debug!("[Trigger:{}] stopped from its own callback", self.name);
            } else if handle.join().is_err() {
                error!("[Trigger:{}] callback panicked", self.name);
            }
        }

        self.stats.lock().next_deadline = None;
        if was_running {
            info!("[Trigger:{}] stopped", self.name);
        }
    }
}

impl Drop for PeriodicTrigger {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Clears the running flag however the release loop ends, unwinding included.
struct ClearOnExit<'a>(&'a AtomicBool);

impl Drop for ClearOnExit<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn release_loop<F: FnMut()>(
    name: &str,
    interval: Duration,
    first_deadline: Instant,
    mut callback: F,
    stop_rx: &Receiver<()>,
    running: &AtomicBool,
    stats: &Mutex<TriggerStats>,
) {
    let _clear = ClearOnExit(running);
    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    let mut deadline = first_deadline;

    while running.load(Ordering::Acquire) {
        if let Some(coarse) = deadline.checked_sub(SPIN_MARGIN) {
            if coarse > Instant::now() {
                match stop_rx.recv_deadline(coarse) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }

        let now = Instant::now();
        if now < deadline {
            sleeper.sleep(deadline - now);
        }
        if !running.load(Ordering::Acquire) {
            break;
        }

        let lateness = Instant::now().saturating_duration_since(deadline);
        let Some(next) = deadline.checked_add(interval) else {
            error!("[Trigger:{}] next deadline is out of range", name);
            break;
        };
        deadline = next;
        {
            let mut s = stats.lock();
            s.fires += 1;
            s.last_lateness = lateness;
            s.max_lateness = s.max_lateness.max(lateness);
            s.next_deadline = Some(deadline);
        }

        callback();

        if Instant::now() > deadline {
            stats.lock().overruns += 1;
            debug!("[Trigger:{}] callback overran its interval", name);
        }
    }

    debug!("[Trigger:{}] release loop exiting", name);
}
