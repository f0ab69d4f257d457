//! config.rs
//! Options for the store, its clients and the real-time modules, plus a JSON-loadable
//! top-level configuration used by the binaries.

use std::{
    fs,
    net::{SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::{
    datastore::namespace::{DimensionTable, Namespace, ServerType},
    error::{LinkError, LinkResult},
    realtime::estimator::EstimatorCapability,
};

pub const DEFAULT_ADDRESS: &str = "tcp://localhost:4840/rtmpc/server/";
pub const DEFAULT_PORT: u16 = 4840;
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub server_type: ServerType,
    pub store_params: bool,
    pub store_predictions: bool,
    pub n_steps_pred: usize,
    /// Persistence is not part of this crate; the flag is accepted and reported.
    pub with_db: bool,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name: "Realtime MPC data store".to_string(),
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            server_type: ServerType::WithEstimator,
            store_params: true,
            store_predictions: false,
            n_steps_pred: 0,
            with_db: false,
        }
    }
}

impl ServerOptions {
    pub fn validate(&self) -> LinkResult<()> {
        if self.name.trim().is_empty() {
            return Err(LinkError::Config("server name must not be empty".into()));
        }
        if self.store_predictions && self.n_steps_pred == 0 {
            log::warn!("store_predictions is set but n_steps_pred is 0; prediction tags will be placeholders");
        }
        resolve_endpoint(&self.address, self.port).map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Simulator,
    Controller,
    Estimator,
    Manual,
}

impl ClientType {
    pub fn name(&self) -> &'static str {
        match self {
            ClientType::Simulator => "simulator",
            ClientType::Controller => "controller",
            ClientType::Estimator => "estimator",
            ClientType::Manual => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientOptions {
    pub address: String,
    pub port: u16,
    pub client_type: ClientType,
    pub namespace: Namespace,
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
}

fn default_io_timeout_ms() -> u64 {
    DEFAULT_IO_TIMEOUT_MS
}

impl ClientOptions {
    pub fn new(address: &str, port: u16, client_type: ClientType, namespace: Namespace) -> Self {
        Self {
            address: address.to_string(),
            port,
            client_type,
            namespace,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
        }
    }

    /// Same endpoint and namespace, different role.
    pub fn with_client_type(&self, client_type: ClientType) -> Self {
        Self {
            client_type,
            ..self.clone()
        }
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleOptions {
    /// Seconds between two releases of the module's step.
    pub cycle_time: f64,
    /// When set, the module's switch bit must be 1 before it runs.
    pub user_controlled: bool,
    /// Controller only: warm-start from the state estimate instead of the plant state.
    pub output_feedback: bool,
}

impl Default for ModuleOptions {
    fn default() -> Self {
        Self {
            cycle_time: 1.0,
            user_controlled: true,
            output_feedback: false,
        }
    }
}

impl ModuleOptions {
    pub fn validate(&self) -> LinkResult<()> {
        let representable = Duration::try_from_secs_f64(self.cycle_time)
            .is_ok_and(|d| !d.is_zero() && Instant::now().checked_add(d).is_some());
        if !representable {
            return Err(LinkError::Config(format!(
                "cycle_time must be a positive number of seconds, got {}",
                self.cycle_time
            )));
        }
        Ok(())
    }

    /// Zero when `cycle_time` does not validate.
    pub fn cycle_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.cycle_time).unwrap_or(Duration::ZERO)
    }
}

/// Everything the binaries need to bring up a store and its modules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub server: ServerOptions,
    pub dimensions: DimensionTable,
    pub simulator: ModuleOptions,
    pub controller: ModuleOptions,
    pub estimator: ModuleOptions,
    pub estimator_kind: EstimatorCapability,
    pub export_dir: PathBuf,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            server: ServerOptions::default(),
            dimensions: DimensionTable {
                n_x: 4,
                n_z: 0,
                n_u: 2,
                n_y: 4,
                n_p: 2,
                n_tvp: 0,
                n_aux: 0,
                n_steps_pred: 0,
            },
            simulator: ModuleOptions {
                cycle_time: 1.0,
                user_controlled: false,
                output_feedback: false,
            },
            controller: ModuleOptions {
                cycle_time: 2.0,
                user_controlled: true,
                output_feedback: false,
            },
            estimator: ModuleOptions {
                cycle_time: 1.0,
                user_controlled: true,
                output_feedback: false,
            },
            estimator_kind: EstimatorCapability::StateFeedback,
            export_dir: PathBuf::from("data/logs"),
        }
    }
}

impl LinkConfig {
    pub fn load(path: &Path) -> LinkResult<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            LinkError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: LinkConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> LinkResult<()> {
        self.server.validate()?;
        self.simulator.validate()?;
        self.controller.validate()?;
        self.estimator.validate()?;
        if self.dimensions.n_x == 0 {
            return Err(LinkError::Config("a controlled system needs at least one state".into()));
        }
        Ok(())
    }
}

/// Turns `scheme://host[:port]/path` plus an explicit port into a socket address.
/// The port inside the URI is ignored; `port` wins. IPv4 results are preferred.
pub fn resolve_endpoint(address: &str, port: u16) -> LinkResult<SocketAddr> {
    let bad = |reason: &str| LinkError::Config(format!("endpoint '{}': {}", address, reason));

    let rest = address.split_once("://").map(|(_, r)| r).unwrap_or(address);
    let authority = rest.split('/').next().unwrap_or_default();
    let host = if let Some(v6) = authority.strip_prefix('[') {
        v6.split(']').next().unwrap_or_default()
    } else {
        authority.split(':').next().unwrap_or_default()
    };
    if host.is_empty() {
        return Err(bad("missing host"));
    }

    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| bad(&e.to_string()))?
        .collect();

    candidates
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| candidates.first())
        .copied()
        .ok_or_else(|| bad("host did not resolve"))
}
