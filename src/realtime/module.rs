//! module.rs
//! Shared machinery of the real-time modules: lifecycle, the readiness gate and tag I/O policy.
//!
//! Every role owns a `ModuleCore` and differs only in which tags it reads and writes.
//! Critical tag faults disable the module; best-effort writes are logged and swallowed.

use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    client::{supervision::Slot, tag_client::TagClient},
    config::{ClientOptions, ClientType, ModuleOptions},
    datastore::namespace::TagField,
    error::{LinkError, LinkResult},
    utils::metrics::Telemetry,
};

/// Bookkeeping owned by one module instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModuleState {
    pub enabled: bool,
    /// Result of the last readiness check.
    pub ready: bool,
    /// Initial value written; required before the periodic phase.
    pub initialized: bool,
    pub iter_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCheck {
    Ready,
    NotConnected,
    NotManuallyEnabled,
    SelfFault,
    UpstreamFault(Slot),
}

impl StatusCheck {
    pub fn is_ready(&self) -> bool {
        matches!(self, StatusCheck::Ready)
    }
}

impl fmt::Display for StatusCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCheck::Ready => f.write_str("ready"),
            StatusCheck::NotConnected => f.write_str("not connected"),
            StatusCheck::NotManuallyEnabled => f.write_str("not manually enabled"),
            StatusCheck::SelfFault => f.write_str("self fault"),
            StatusCheck::UpstreamFault(slot) => write!(f, "upstream fault ({})", slot),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// `residual` is cycle time minus step time in seconds; negative on overrun.
    Completed { elapsed: Duration, residual: f64 },
    Skipped(StatusCheck),
    StepFailed(String),
    Disabled,
    Faulted(String),
}

impl CycleOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, CycleOutcome::Completed { .. })
    }
}

/// What a trigger drives. Object safe so consoles can hold mixed roles.
pub trait RealtimeModule: Send {
    fn core(&self) -> &ModuleCore;

    fn core_mut(&mut self) -> &mut ModuleCore;

    /// One cycle of work. Never panics on tag or engine failures.
    fn asynchronous_step(&mut self) -> CycleOutcome;

    fn init(&mut self, initial: &[f64]) -> bool {
        self.core_mut().init(initial)
    }

    fn start(&mut self) -> LinkResult<()> {
        self.core_mut().start()
    }

    fn stop(&mut self) {
        self.core_mut().stop()
    }

    fn check_status(&mut self) -> StatusCheck {
        self.core_mut().check_status()
    }

    fn state(&self) -> ModuleState {
        self.core().state
    }

    fn name(&self) -> &str {
        &self.core().name
    }

    fn slot(&self) -> Slot {
        self.core().slot
    }

    fn cycle_time(&self) -> Duration {
        self.core().options.cycle_duration()
    }
}

pub type SharedModule<M> = Arc<Mutex<M>>;

pub fn shared<M: RealtimeModule>(module: M) -> SharedModule<M> {
    Arc::new(Mutex::new(module))
}

pub struct ModuleCore {
    name: String,
    slot: Slot,
    upstream: Vec<Slot>,
    output: TagField,
    pub(crate) client: TagClient,
    pub(crate) options: ModuleOptions,
    pub(crate) state: ModuleState,
    telemetry: Option<Telemetry>,
    seq: u64,
}

impl ModuleCore {
    /// `output` is the tag `init` writes the initial value to.
    pub fn new(
        slot: Slot,
        upstream: Vec<Slot>,
        output: TagField,
        client_options: ClientOptions,
        options: ModuleOptions,
    ) -> LinkResult<Self> {
        options.validate()?;

        let expected = expected_client(slot);
        if client_options.client_type != expected {
            return Err(LinkError::Config(format!(
                "{} module needs a {} client, got {}",
                slot.name(),
                expected.name(),
                client_options.client_type.name()
            )));
        }
        if !client_options.namespace.contains(output) {
            return Err(LinkError::Config(format!(
                "namespace has no {} tag for the {} module",
                output.path(),
                slot.name()
            )));
        }

        Ok(Self {
            name: slot.name().to_string(),
            slot,
            upstream,
            output,
            client: TagClient::new(client_options),
            options,
            state: ModuleState::default(),
            telemetry: None,
            seq: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn upstream(&self) -> &[Slot] {
        &self.upstream
    }

    pub fn options(&self) -> &ModuleOptions {
        &self.options
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    pub fn client(&self) -> &TagClient {
        &self.client
    }

    pub fn set_telemetry(&mut self, telemetry: Telemetry) {
        self.telemetry = Some(telemetry);
    }

    pub fn require(&self, field: TagField) -> LinkResult<()> {
        if self.client.namespace().contains(field) {
            Ok(())
        } else {
            Err(LinkError::Config(format!(
                "namespace has no {} tag for the {} module",
                field.path(),
                self.name
            )))
        }
    }

    /// Connects and writes the initial value. Failures are reported and leave the module disabled.
    pub fn init(&mut self, initial: &[f64]) -> bool {
        if let Err(e) = self.client.connect() {
            error!("[{}] init failed, module disabled: {}", self.name, e);
            self.state.enabled = false;
            return false;
        }

        match self.client.write_field(self.output, initial) {
            Ok(()) => {
                self.state.enabled = true;
                self.state.initialized = true;
                self.state.ready = true;
                info!(
                    "[{}] initial value written to {}",
                    self.name,
                    self.output.path()
                );
                true
            }
            Err(e) => {
                error!("[{}] initial value not written, module disabled: {}", self.name, e);
                self.state.enabled = false;
                false
            }
        }
    }

    pub fn start(&mut self) -> LinkResult<()> {
        self.client.connect()?;
        if !self.state.enabled {
            info!("[{}] started", self.name);
        }
        self.state.enabled = true;
        Ok(())
    }

    pub fn stop(&mut self) {
        if self.state.enabled || self.client.is_connected() {
            info!("[{}] stopped", self.name);
        }
        self.client.disconnect();
        self.state.enabled = false;
        self.state.ready = false;
    }

    /// Readiness gate, evaluated fresh every cycle and short-circuiting on the first failure.
    pub fn check_status(&mut self) -> StatusCheck {
        let verdict = self.evaluate_status();
        self.state.ready = verdict.is_ready();
        verdict
    }

    fn evaluate_status(&mut self) -> StatusCheck {
        if !(self.state.initialized && self.client.is_connected()) {
            return StatusCheck::NotConnected;
        }

        if self.options.user_controlled {
            match self.client.check_switches(self.slot) {
                Ok(true) => {}
                Ok(false) => return StatusCheck::NotManuallyEnabled,
                Err(e) => {
                    warn!("[{}] switches unreadable: {}", self.name, e);
                    return StatusCheck::NotConnected;
                }
            }
        }

        let flags = match self.client.flags() {
            Ok(flags) => flags,
            Err(e) => {
                warn!("[{}] flags unreadable: {}", self.name, e);
                return StatusCheck::NotConnected;
            }
        };
        if flags.get(self.slot) {
            return StatusCheck::SelfFault;
        }
        if let Some(up) = self.upstream.iter().find(|up| flags.get(**up)) {
            return StatusCheck::UpstreamFault(*up);
        }

        StatusCheck::Ready
    }

    /// Common entry for a gated cycle. `None` means go ahead.
    pub(crate) fn gate(&mut self) -> Option<CycleOutcome> {
        if !self.state.enabled {
            return Some(CycleOutcome::Disabled);
        }
        match self.check_status() {
            StatusCheck::Ready => None,
            verdict => {
                warn!("[{}] cycle skipped: {}", self.name, verdict);
                Some(CycleOutcome::Skipped(verdict))
            }
        }
    }

    /// Entry for an ungated cycle: runs whenever enabled and connected.
    pub(crate) fn gate_ungated(&mut self) -> Option<CycleOutcome> {
        if !self.state.enabled {
            return Some(CycleOutcome::Disabled);
        }
        if !self.client.is_connected() {
            self.state.ready = false;
            return Some(CycleOutcome::Skipped(StatusCheck::NotConnected));
        }
        self.state.ready = true;
        None
    }

    pub(crate) fn read_critical(&mut self, field: TagField) -> LinkResult<Vec<f64>> {
        self.client.read_field(field)
    }

    pub(crate) fn write_critical(&mut self, field: TagField, values: &[f64]) -> LinkResult<()> {
        self.client.write_field(field, values)
    }

    /// Reads a tag the cycle can live without; absent tags read as empty.
    pub(crate) fn read_optional(&mut self, field: TagField) -> Vec<f64> {
        if !self.client.namespace().contains(field) {
            return Vec::new();
        }
        match self.client.read_field(field) {
            Ok(values) => values,
            Err(e) => {
                warn!("[{}] {}", self.name, e);
                Vec::new()
            }
        }
    }

    /// Writes when the namespace hosts the tag; failures are logged only.
    pub(crate) fn write_best_effort(&mut self, field: TagField, values: &[f64]) {
        if !self.client.namespace().contains(field) {
            return;
        }
        if let Err(e) = self.client.write_field(field, values) {
            warn!("[{}] {}", self.name, e);
        }
    }

    /// Critical tag fault: the module disables itself until an explicit start.
    pub(crate) fn fault(&mut self, err: LinkError) -> CycleOutcome {
        error!("[{}] critical tag fault, module disabled: {}", self.name, err);
        self.state.enabled = false;
        self.state.ready = false;
        CycleOutcome::Faulted(err.to_string())
    }

    pub(crate) fn step_failed(&mut self, reason: String) -> CycleOutcome {
        warn!("[{}] {}; outputs left unchanged", self.name, reason);
        CycleOutcome::StepFailed(reason)
    }

    /// Closes a successful cycle: counts it, publishes diagnostics, returns the outcome.
    pub(crate) fn complete(&mut self, started: Instant) -> CycleOutcome {
        self.state.iter_count += 1;
        let elapsed = started.elapsed();
        let residual = self.options.cycle_time - elapsed.as_secs_f64();
        if residual < 0.0 {
            warn!(
                "[{}] step took {:.3}s, longer than the {:.3}s cycle",
                self.name,
                elapsed.as_secs_f64(),
                self.options.cycle_time
            );
        }

        let index = self.slot.index();
        for (field, value) in [
            (TagField::StepTimes, elapsed.as_secs_f64()),
            (TagField::Iterations, self.state.iter_count as f64),
        ] {
            if self.client.namespace().contains(field) {
                if let Err(e) = self.client.write_field_at(field, index, value) {
                    warn!("[{}] {}", self.name, e);
                }
            }
        }

        debug!(
            "[{}] cycle {} done in {:?} (residual {:.4}s)",
            self.name, self.state.iter_count, elapsed, residual
        );
        CycleOutcome::Completed { elapsed, residual }
    }

    /// Hands the outcome to telemetry, if attached.
    pub(crate) fn record(&mut self, outcome: CycleOutcome) -> CycleOutcome {
        self.seq += 1;
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(self.slot, self.seq, &outcome);
        }
        outcome
    }
}

fn expected_client(slot: Slot) -> ClientType {
    match slot {
        Slot::Simulator => ClientType::Simulator,
        Slot::Estimator => ClientType::Estimator,
        _ => ClientType::Controller,
    }
}
