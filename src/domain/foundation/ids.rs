//! Strongly-typed identifier value objects.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ValidationError;

/// Opaque identifier for a hosted machine.
///
/// Ids are normalized on construction: a leading `#` (statechart reference
/// syntax) is stripped, so `#counter` and `counter` resolve to the same
/// machine. Scoped ids embed their channel group as
/// `<base>_<group_id_hex>_<uuid>` and are never reused across groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineId(String);

impl MachineId {
    /// Creates a machine id from a raw string, normalizing a leading `#`.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, ValidationError> {
        let trimmed = raw.as_ref().trim().trim_start_matches('#');
        if trimmed.is_empty() {
            return Err(ValidationError::empty_field("machine_id"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Creates a group-scoped machine id for `base` within `group`.
    ///
    /// The uuid suffix guarantees the id is never reused, even if the same
    /// base name is registered again after the group is released.
    pub fn scoped(base: impl AsRef<str>, group: GroupId) -> Result<Self, ValidationError> {
        let base = base.as_ref().trim().trim_start_matches('#');
        if base.is_empty() {
            return Err(ValidationError::empty_field("machine_id"));
        }
        Ok(Self(format!(
            "{}_{}_{}",
            base,
            group.as_hex(),
            Uuid::new_v4().simple()
        )))
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fallback source id for callers outside any machine.
    pub fn external_caller() -> Self {
        Self("external".to_string())
    }

    /// Checks whether this id carries the scope marker of `group`.
    pub fn is_scoped_to(&self, group: GroupId) -> bool {
        self.0.contains(&format!("_{}_", group.as_hex()))
    }
}

impl fmt::Display for MachineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MachineId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Identifier for a channel group.
///
/// Allocated monotonically by the orchestrator; rendered in hex inside
/// scoped machine ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(u64);

impl GroupId {
    /// Creates a group id from a raw counter value.
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw counter value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Returns the hex form used inside scoped machine ids.
    pub fn as_hex(&self) -> String {
        format!("{:x}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

/// Unique identifier for an event envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random EventId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlates a request envelope with its response slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Creates a new random CorrelationId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn machine_id_strips_leading_hash() {
        let id = MachineId::new("#counter").unwrap();
        assert_eq!(id.as_str(), "counter");
        assert_eq!(id, MachineId::new("counter").unwrap());
    }

    #[test]
    fn machine_id_rejects_empty() {
        assert!(MachineId::new("").is_err());
        assert!(MachineId::new("#").is_err());
        assert!(MachineId::new("   ").is_err());
    }

    #[test]
    fn scoped_id_embeds_group_hex() {
        let group = GroupId::new(0xa3);
        let id = MachineId::scoped("counter", group).unwrap();

        assert!(id.as_str().starts_with("counter_a3_"));
        assert!(id.is_scoped_to(group));
        assert!(!id.is_scoped_to(GroupId::new(0xa4)));
    }

    #[test]
    fn scoped_ids_are_never_reused() {
        let group = GroupId::new(1);
        let first = MachineId::scoped("counter", group).unwrap();
        let second = MachineId::scoped("counter", group).unwrap();

        assert_ne!(first, second);
    }

    #[test]
    fn group_id_hex_rendering() {
        assert_eq!(GroupId::new(255).as_hex(), "ff");
        assert_eq!(GroupId::new(0).as_hex(), "0");
    }

    #[test]
    fn event_id_is_unique() {
        assert_ne!(EventId::new(), EventId::new());
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(base in "[a-zA-Z][a-zA-Z0-9-]{0,24}") {
            let once = MachineId::new(format!("#{}", base)).unwrap();
            let twice = MachineId::new(once.as_str()).unwrap();
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn scoped_ids_always_carry_their_group(base in "[a-z][a-z0-9]{0,16}", raw in 0u64..u64::MAX) {
            let group = GroupId::new(raw);
            let id = MachineId::scoped(&base, group).unwrap();
            prop_assert!(id.is_scoped_to(group));
        }
    }
}
