//! Boundary to the kernel filtering engine
//!
//! vpnfw never talks to a packet filter directly. Everything goes through
//! [`FilterEngine`], a narrow transactional interface: begin, add, delete,
//! commit, abort. Two implementations ship with the crate:
//!
//! - [`MemoryEngine`](crate::core::memory::MemoryEngine): in-process, used for
//!   dry runs and tests
//! - [`NftEngine`](crate::core::nft_json::NftEngine): nftables on Linux
//!
//! All calls are blocking. Callers serialize access themselves
//! (see [`TransactionCoordinator`](crate::core::transaction::TransactionCoordinator)).

use crate::core::error::EngineError;
use crate::core::filter::{FilterSpec, ObjectKind, ProviderSpec, SublayerSpec};
use crate::core::identity::StableId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque token for an open engine transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionHandle(u64);

impl TransactionHandle {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Object handed to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineObject {
    Provider(ProviderSpec),
    Sublayer(SublayerSpec),
    Filter(FilterSpec),
}

impl EngineObject {
    pub const fn kind(&self) -> ObjectKind {
        match self {
            EngineObject::Provider(_) => ObjectKind::Provider,
            EngineObject::Sublayer(_) => ObjectKind::Sublayer,
            EngineObject::Filter(_) => ObjectKind::Filter,
        }
    }

    pub const fn id(&self) -> StableId {
        match self {
            EngineObject::Provider(p) => p.id,
            EngineObject::Sublayer(s) => s.id,
            EngineObject::Filter(f) => f.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            EngineObject::Provider(p) => &p.name,
            EngineObject::Sublayer(s) => &s.name,
            EngineObject::Filter(f) => &f.name,
        }
    }

    pub const fn as_filter(&self) -> Option<&FilterSpec> {
        match self {
            EngineObject::Filter(f) => Some(f),
            EngineObject::Provider(_) | EngineObject::Sublayer(_) => None,
        }
    }
}

/// Transactional filter engine
pub trait FilterEngine: Send {
    /// Opens a transaction. Only one may be open at a time.
    fn begin_transaction(&mut self) -> Result<TransactionHandle, EngineError>;

    /// Adds an object inside the open transaction
    fn add_object(&mut self, object: &EngineObject) -> Result<(), EngineError>;

    /// Deletes an object inside the open transaction.
    ///
    /// Returns [`EngineError::NotFound`] when the object does not exist;
    /// callers purging stale state treat that as success.
    fn delete_object(&mut self, kind: ObjectKind, id: StableId) -> Result<(), EngineError>;

    /// Makes every change of the transaction visible at once
    fn commit(&mut self, handle: TransactionHandle) -> Result<(), EngineError>;

    /// Discards every change of the transaction
    fn abort(&mut self, handle: TransactionHandle);

    /// Whether filters may carry [`Condition::Application`] conditions
    ///
    /// [`Condition::Application`]: crate::core::condition::Condition::Application
    fn supports_application_conditions(&self) -> bool {
        true
    }
}

impl<E: FilterEngine + ?Sized> FilterEngine for Box<E> {
    fn begin_transaction(&mut self) -> Result<TransactionHandle, EngineError> {
        (**self).begin_transaction()
    }

    fn add_object(&mut self, object: &EngineObject) -> Result<(), EngineError> {
        (**self).add_object(object)
    }

    fn delete_object(&mut self, kind: ObjectKind, id: StableId) -> Result<(), EngineError> {
        (**self).delete_object(kind, id)
    }

    fn commit(&mut self, handle: TransactionHandle) -> Result<(), EngineError> {
        (**self).commit(handle)
    }

    fn abort(&mut self, handle: TransactionHandle) {
        (**self).abort(handle);
    }

    fn supports_application_conditions(&self) -> bool {
        (**self).supports_application_conditions()
    }
}
