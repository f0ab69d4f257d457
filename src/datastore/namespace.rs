//! namespace.rs
//! Tag namespace: sections, fields, dotted paths and the `ns=<idx>;s=<path>` address format.
//!
//! The table is built once from the dimension table and never changes shape afterwards.
//! Clients receive a copy of it, so it is `Clone + Serialize`.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, LinkResult};

/// Index handed out by the store when it registers its namespace (0 and 1 are reserved).
pub const FIRST_USER_NAMESPACE: u16 = 2;

/// Flags and Switches are always this long: one bit per role slot.
pub const SUPERVISION_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServerType {
    Basic,
    #[default]
    WithEstimator,
    WithMonitoring,
}

impl ServerType {
    pub fn has_estimator(&self) -> bool {
        matches!(self, ServerType::WithEstimator | ServerType::WithMonitoring)
    }

    pub fn has_monitoring(&self) -> bool {
        matches!(self, ServerType::WithMonitoring)
    }
}

/// Sizes of the controlled system. Zero is allowed everywhere; the tag then
/// becomes a length-1 placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionTable {
    pub n_x: usize,
    pub n_z: usize,
    pub n_u: usize,
    pub n_y: usize,
    pub n_p: usize,
    pub n_tvp: usize,
    pub n_aux: usize,
    pub n_steps_pred: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    PlantData,
    ControllerData,
    EstimatorData,
    SupervisionData,
    MonitoringData,
}

impl Section {
    pub fn name(&self) -> &'static str {
        match self {
            Section::PlantData => "PlantData",
            Section::ControllerData => "ControllerData",
            Section::EstimatorData => "EstimatorData",
            Section::SupervisionData => "SupervisionData",
            Section::MonitoringData => "MonitoringData",
        }
    }
}

/// Every tag the store can host. The short names follow the section keys
/// (`x`, `u_opt`, `xhat`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagField {
    X,
    Z,
    Y,
    U,
    P,
    XInit,
    UOpt,
    Tvp,
    XPred,
    UPred,
    XHat,
    ZHat,
    PHat,
    Flags,
    Switches,
    Aux,
    StepTimes,
    Iterations,
}

impl TagField {
    pub fn path(&self) -> &'static str {
        match self {
            TagField::X => "States.X",
            TagField::Z => "States.Z",
            TagField::Y => "Measurements",
            TagField::U => "Inputs",
            TagField::P => "Parameters",
            TagField::XInit => "InitialState",
            TagField::UOpt => "OptimalOutputs",
            TagField::Tvp => "TVParameters",
            TagField::XPred => "PredictedStates",
            TagField::UPred => "PredictedOutputs",
            TagField::XHat => "Estimates.X",
            TagField::ZHat => "Estimates.Z",
            TagField::PHat => "Estimates.P",
            TagField::Flags => "Flags",
            TagField::Switches => "Switches",
            TagField::Aux => "Monitoring.Aux",
            TagField::StepTimes => "Monitoring.StepTimes",
            TagField::Iterations => "Monitoring.Iterations",
        }
    }

    pub fn section(&self) -> Section {
        match self {
            TagField::X | TagField::Z | TagField::Y | TagField::U | TagField::P => {
                Section::PlantData
            }
            TagField::XInit | TagField::UOpt | TagField::Tvp | TagField::XPred | TagField::UPred => {
                Section::ControllerData
            }
            TagField::XHat | TagField::ZHat | TagField::PHat => Section::EstimatorData,
            TagField::Flags | TagField::Switches => Section::SupervisionData,
            TagField::Aux | TagField::StepTimes | TagField::Iterations => Section::MonitoringData,
        }
    }
}

/// `ns=<index>;s=<DottedPath>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagAddress {
    pub ns: u16,
    pub path: String,
}

impl TagAddress {
    pub fn new(ns: u16, path: impl Into<String>) -> Self {
        Self {
            ns,
            path: path.into(),
        }
    }
}

impl fmt::Display for TagAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};s={}", self.ns, self.path)
    }
}

impl FromStr for TagAddress {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || LinkError::Address(s.to_string());
        let (ns_part, path_part) = s.trim().split_once(';').ok_or_else(bad)?;
        let ns = ns_part
            .strip_prefix("ns=")
            .and_then(|n| n.parse::<u16>().ok())
            .ok_or_else(bad)?;
        let path = path_part.strip_prefix("s=").ok_or_else(bad)?;
        if path.is_empty() || path.split('.').any(|segment| segment.is_empty()) {
            return Err(bad());
        }
        Ok(TagAddress::new(ns, path))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSpec {
    pub field: TagField,
    pub len: usize,
}

/// The namespace table shared between the store and its clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub index: u16,
    pub tags: Vec<TagSpec>,
}

/// Zero-sized fields still get one slot so no tag is ever empty.
#[inline]
pub fn placeholder_len(n: usize) -> usize {
    n.max(1)
}

impl Namespace {
    pub fn build(
        index: u16,
        server_type: ServerType,
        store_params: bool,
        store_predictions: bool,
        dims: &DimensionTable,
    ) -> Self {
        let n_steps_pred = if store_predictions { dims.n_steps_pred } else { 0 };
        let mut tags = Vec::new();
        let mut add = |field: TagField, n: usize| {
            tags.push(TagSpec {
                field,
                len: placeholder_len(n),
            })
        };

        add(TagField::X, dims.n_x);
        add(TagField::Z, dims.n_z);
        add(TagField::Y, dims.n_y);
        add(TagField::U, dims.n_u);
        if store_params {
            add(TagField::P, dims.n_p);
        }

        add(TagField::XInit, dims.n_x);
        add(TagField::UOpt, dims.n_u);
        if store_params {
            add(TagField::Tvp, dims.n_tvp);
        }
        if store_predictions {
            add(TagField::XPred, dims.n_x * n_steps_pred);
            add(TagField::UPred, dims.n_u * n_steps_pred);
        }

        if server_type.has_estimator() {
            add(TagField::XHat, dims.n_x);
            add(TagField::ZHat, dims.n_z);
            add(TagField::PHat, dims.n_p);
        }

        add(TagField::Flags, SUPERVISION_LEN);
        add(TagField::Switches, SUPERVISION_LEN);

        if server_type.has_monitoring() {
            add(TagField::Aux, dims.n_aux);
            add(TagField::StepTimes, SUPERVISION_LEN);
            add(TagField::Iterations, SUPERVISION_LEN);
        }

        Namespace { index, tags }
    }

    pub fn contains(&self, field: TagField) -> bool {
        self.spec(field).is_some()
    }

    pub fn spec(&self, field: TagField) -> Option<&TagSpec> {
        self.tags.iter().find(|t| t.field == field)
    }

    pub fn len_of(&self, field: TagField) -> Option<usize> {
        self.spec(field).map(|t| t.len)
    }

    pub fn address(&self, field: TagField) -> Option<TagAddress> {
        self.spec(field)
            .map(|t| TagAddress::new(self.index, t.field.path()))
    }

    pub fn field_for_path(&self, path: &str) -> Option<TagField> {
        self.tags
            .iter()
            .map(|t| t.field)
            .find(|f| f.path() == path)
    }

    pub fn section_fields(&self, section: Section) -> Vec<TagField> {
        self.tags
            .iter()
            .map(|t| t.field)
            .filter(|f| f.section() == section)
            .collect()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }
}
