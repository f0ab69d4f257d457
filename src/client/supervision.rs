//! supervision.rs
//! Flags and Switches: one bit per role slot.
//!
//! Flag = 1 means the role reports a fault, Switch = 1 means the role may run.
//! Position -1 addresses the whole vector.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    client::tag_client::TagClient,
    config::ClientType,
    datastore::namespace::{SUPERVISION_LEN, TagField},
    error::{LinkError, LinkResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Controller = 0,
    Simulator = 1,
    Estimator = 2,
    Monitoring = 3,
    Extra = 4,
}

impl Slot {
    pub const ALL: [Slot; SUPERVISION_LEN] = [
        Slot::Controller,
        Slot::Simulator,
        Slot::Estimator,
        Slot::Monitoring,
        Slot::Extra,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Slot::Controller => "controller",
            Slot::Simulator => "simulator",
            Slot::Estimator => "estimator",
            Slot::Monitoring => "monitoring",
            Slot::Extra => "extra",
        }
    }

    pub fn for_client(client_type: ClientType) -> Option<Slot> {
        match client_type {
            ClientType::Controller => Some(Slot::Controller),
            ClientType::Simulator => Some(Slot::Simulator),
            ClientType::Estimator => Some(Slot::Estimator),
            ClientType::Manual => None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<usize> for Slot {
    type Error = LinkError;

    fn try_from(pos: usize) -> Result<Self, Self::Error> {
        Slot::ALL
            .get(pos)
            .copied()
            .ok_or(LinkError::Supervision(pos.min(i32::MAX as usize) as i32))
    }
}

/// Which part of a supervision vector an update touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    All,
    At(Slot),
}

impl TryFrom<i32> for Selector {
    type Error = LinkError;

    fn try_from(pos: i32) -> Result<Self, Self::Error> {
        match pos {
            -1 => Ok(Selector::All),
            p if p >= 0 => Slot::try_from(p as usize)
                .map(Selector::At)
                .map_err(|_| LinkError::Supervision(pos)),
            _ => Err(LinkError::Supervision(pos)),
        }
    }
}

impl From<Slot> for Selector {
    fn from(slot: Slot) -> Self {
        Selector::At(slot)
    }
}

/// Decoded Flags or Switches vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SupervisionBits(pub [bool; SUPERVISION_LEN]);

impl SupervisionBits {
    /// Any non-zero entry counts as set.
    pub fn from_values(values: &[f64]) -> Self {
        let mut bits = [false; SUPERVISION_LEN];
        for (bit, v) in bits.iter_mut().zip(values) {
            *bit = *v != 0.0;
        }
        SupervisionBits(bits)
    }

    #[inline]
    pub fn get(&self, slot: Slot) -> bool {
        self.0[slot.index()]
    }

    pub fn to_values(&self) -> Vec<f64> {
        self.0.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect()
    }

    pub fn any(&self) -> bool {
        self.0.iter().any(|&b| b)
    }
}

impl fmt::Display for SupervisionBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits: Vec<&str> = self.0.iter().map(|&b| if b { "1" } else { "0" }).collect();
        write!(f, "[{}]", digits.join(","))
    }
}

impl TagClient {
    fn read_bits(&mut self, field: TagField) -> LinkResult<SupervisionBits> {
        let values = self.read_field(field)?;
        if values.len() != SUPERVISION_LEN {
            return Err(LinkError::Read {
                tag: field.path().to_string(),
                reason: format!("expected {} entries, got {}", SUPERVISION_LEN, values.len()),
            });
        }
        Ok(SupervisionBits::from_values(&values))
    }

    fn update_bits(&mut self, field: TagField, selector: Selector, values: &[f64]) -> LinkResult<()> {
        match selector {
            Selector::All => self.write_field(field, values),
            Selector::At(slot) => match values {
                [value] => self.write_field_at(field, slot.index(), *value),
                _ => Err(LinkError::Write {
                    tag: field.path().to_string(),
                    reason: format!("single-slot update takes one value, got {}", values.len()),
                }),
            },
        }
    }

    /// Whole Flags vector.
    pub fn flags(&mut self) -> LinkResult<SupervisionBits> {
        self.read_bits(TagField::Flags)
    }

    /// Whole Switches vector.
    pub fn switches(&mut self) -> LinkResult<SupervisionBits> {
        self.read_bits(TagField::Switches)
    }

    /// True when `slot` reports a fault.
    pub fn check_flags(&mut self, slot: Slot) -> LinkResult<bool> {
        Ok(self.flags()?.get(slot))
    }

    /// True when `slot` is enabled to run.
    pub fn check_switches(&mut self, slot: Slot) -> LinkResult<bool> {
        Ok(self.switches()?.get(slot))
    }

    pub fn update_flags(&mut self, selector: Selector, values: &[f64]) -> LinkResult<()> {
        self.update_bits(TagField::Flags, selector, values)
    }

    /// The remote-control primitive: enables or disables roles without touching their processes.
    pub fn update_switches(&mut self, selector: Selector, values: &[f64]) -> LinkResult<()> {
        self.update_bits(TagField::Switches, selector, values)
    }

    pub fn set_flag(&mut self, slot: Slot, raised: bool) -> LinkResult<()> {
        self.update_flags(Selector::At(slot), &[if raised { 1.0 } else { 0.0 }])
    }

    pub fn set_switch(&mut self, slot: Slot, enabled: bool) -> LinkResult<()> {
        self.update_switches(Selector::At(slot), &[if enabled { 1.0 } else { 0.0 }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minus_one_selects_whole_vector() {
        assert_eq!(Selector::try_from(-1i32).unwrap(), Selector::All);
        assert_eq!(Selector::try_from(2i32).unwrap(), Selector::At(Slot::Estimator));
    }

    #[test]
    fn out_of_range_positions_are_rejected() {
        for pos in [-2i32, 5, 42] {
            assert!(matches!(
                Selector::try_from(pos),
                Err(LinkError::Supervision(p)) if p == pos
            ));
        }
    }

    #[test]
    fn bits_decode_nonzero_as_set() {
        let bits = SupervisionBits::from_values(&[1.0, 0.0, 1.0, 0.0, 0.0]);
        assert!(bits.get(Slot::Controller));
        assert!(!bits.get(Slot::Simulator));
        assert!(bits.get(Slot::Estimator));
        assert_eq!(bits.to_string(), "[1,0,1,0,0]");
        assert_eq!(bits.to_values(), vec![1.0, 0.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn slot_indices_follow_convention() {
        let indices: Vec<usize> = Slot::ALL.iter().map(|s| s.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(Slot::for_client(ClientType::Manual), None);
    }
}
