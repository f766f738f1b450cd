//! Session ledger: every object installed by the current policy
//!
//! The ledger is rebuilt from scratch on each transition and swapped in only
//! after the engine commits, so at any time it names exactly the objects the
//! engine has installed on vpnfw's behalf.

use crate::core::filter::ObjectKind;
use crate::core::identity::StableId;
use serde::Serialize;

/// One installed object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionRecord {
    pub kind: ObjectKind,
    pub id: StableId,
    /// Position in the coordinator's creation order. Informational only.
    pub sequence: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionLedger {
    records: Vec<SessionRecord>,
}

impl SessionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: ObjectKind, id: StableId, sequence: u64) {
        self.records.push(SessionRecord { kind, id, sequence });
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, kind: ObjectKind, id: StableId) -> bool {
        self.records.iter().any(|r| r.kind == kind && r.id == id)
    }

    pub fn count(&self, kind: ObjectKind) -> usize {
        self.records.iter().filter(|r| r.kind == kind).count()
    }

    /// Identities in the ledger, ignoring sequence numbers
    pub fn identities(&self) -> Vec<(ObjectKind, StableId)> {
        self.records.iter().map(|r| (r.kind, r.id)).collect()
    }
}
