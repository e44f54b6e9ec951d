//! Machine registry and channel-group bookkeeping.
//!
//! The registry exclusively owns machine records. Lookups take a read
//! lock only; registration, removal, and group release take the write
//! lock briefly. Group membership is tracked separately so broadcasts and
//! group release stay O(members).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::domain::foundation::{GroupId, MachineId, OrchestratorError, Timestamp};
use crate::ports::MachineAdapter;

use super::mailbox::Mailbox;
use super::stats::MachineCounters;

/// Everything the orchestrator knows about one hosted machine.
pub(crate) struct MachineRecord {
    pub id: MachineId,
    pub adapter: Arc<dyn MachineAdapter>,
    pub mailbox: Mailbox,
    pub group: Option<GroupId>,
    pub created_at: Timestamp,
    pub counters: MachineCounters,
}

impl std::fmt::Debug for MachineRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachineRecord")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl MachineRecord {
    pub(crate) fn new(
        id: MachineId,
        adapter: Arc<dyn MachineAdapter>,
        mailbox_capacity: usize,
        group: Option<GroupId>,
    ) -> Self {
        Self {
            id,
            adapter,
            mailbox: Mailbox::new(mailbox_capacity),
            group,
            created_at: Timestamp::now(),
            counters: MachineCounters::default(),
        }
    }
}

#[derive(Debug)]
struct GroupEntry {
    name: String,
    members: Vec<MachineId>,
}

/// Registry of machine records and channel groups.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    machines: RwLock<HashMap<MachineId, Arc<MachineRecord>>>,
    groups: RwLock<HashMap<u64, GroupEntry>>,
    next_group_id: AtomicU64,
    read_only: AtomicBool,
}

impl Registry {
    /// Installs a record; the machine is routable as soon as this returns.
    ///
    /// Registering into a released group fails with `GroupReleased`. The
    /// group and machine locks are never held at the same time.
    pub(crate) fn insert(&self, record: Arc<MachineRecord>) -> Result<(), OrchestratorError> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Shutdown);
        }
        if let Some(group) = record.group {
            let mut groups = self.write_groups();
            let Some(entry) = groups.get_mut(&group.value()) else {
                return Err(OrchestratorError::GroupReleased {
                    group: group.to_string(),
                });
            };
            entry.members.push(record.id.clone());
        }
        let mut machines = self.write_machines();
        match machines.entry(record.id.clone()) {
            std::collections::hash_map::Entry::Occupied(_) => {
                drop(machines);
                if let Some(group) = record.group {
                    if let Some(entry) = self.write_groups().get_mut(&group.value()) {
                        entry.members.retain(|id| id != &record.id);
                    }
                }
                Err(OrchestratorError::duplicate_registration(&record.id))
            }
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    pub(crate) fn lookup(&self, id: &MachineId) -> Option<Arc<MachineRecord>> {
        self.read_machines().get(id).cloned()
    }

    /// Allocates a new channel group and returns its monotonic id.
    pub(crate) fn create_group(&self, name: impl Into<String>) -> GroupId {
        let id = self.next_group_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.write_groups().insert(
            id,
            GroupEntry {
                name: name.into(),
                members: Vec::new(),
            },
        );
        GroupId::new(id)
    }

    /// Removes a group and all of its member records.
    ///
    /// Returns the removed records (with the group's name for logging) so
    /// the caller can close their mailboxes and fail queued requests.
    pub(crate) fn release_group(&self, group: GroupId) -> (String, Vec<Arc<MachineRecord>>) {
        let entry = self.write_groups().remove(&group.value());
        let Some(entry) = entry else {
            return (String::new(), Vec::new());
        };
        let mut machines = self.write_machines();
        let removed = entry
            .members
            .iter()
            .filter_map(|id| machines.remove(id))
            .collect();
        (entry.name, removed)
    }

    /// Members of a group, excluding `except` (used for broadcasts).
    pub(crate) fn group_members_except(
        &self,
        group: GroupId,
        except: &MachineId,
    ) -> Vec<MachineId> {
        self.read_groups()
            .get(&group.value())
            .map(|entry| {
                entry
                    .members
                    .iter()
                    .filter(|id| *id != except)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn machine_count(&self) -> usize {
        self.read_machines().len()
    }

    pub(crate) fn group_count(&self) -> usize {
        self.read_groups().len()
    }

    /// Sum of queued dispatches across all mailboxes.
    pub(crate) fn total_queued(&self) -> usize {
        self.read_machines()
            .values()
            .map(|record| record.mailbox.queued())
            .sum()
    }

    /// All records, for shutdown sweeps.
    pub(crate) fn all_records(&self) -> Vec<Arc<MachineRecord>> {
        self.read_machines().values().cloned().collect()
    }

    /// Rejects further registrations; part of orchestrator shutdown.
    pub(crate) fn set_read_only(&self) {
        self.read_only.store(true, Ordering::SeqCst);
    }

    fn read_machines(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<MachineId, Arc<MachineRecord>>> {
        self.machines.read().expect("Registry: machines lock poisoned")
    }

    fn write_machines(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<MachineId, Arc<MachineRecord>>> {
        self.machines.write().expect("Registry: machines lock poisoned")
    }

    fn read_groups(&self) -> std::sync::RwLockReadGuard<'_, HashMap<u64, GroupEntry>> {
        self.groups.read().expect("Registry: groups lock poisoned")
    }

    fn write_groups(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<u64, GroupEntry>> {
        self.groups.write().expect("Registry: groups lock poisoned")
    }
}
