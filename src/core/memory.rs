//! In-process filter engine
//!
//! Models the transactional semantics the policy layer relies on: staged
//! changes are invisible until commit, abort discards them, and objects must
//! be created after the objects they reference. Used for dry runs
//! (`vpnfw render`) and throughout the test suite, where it can be told to
//! fail on a chosen add or on commit.

use crate::core::arbitration::{Traffic, Verdict, resolve};
use crate::core::engine::{EngineObject, FilterEngine, TransactionHandle};
use crate::core::error::EngineError;
use crate::core::filter::{FilterSpec, ObjectKind};
use crate::core::identity::StableId;
use std::collections::BTreeMap;
use tracing::{debug, trace};

type ObjectMap = BTreeMap<(ObjectKind, StableId), EngineObject>;

#[derive(Debug)]
struct OpenTransaction {
    handle: TransactionHandle,
    staged: ObjectMap,
    adds: usize,
}

#[derive(Debug, Default)]
pub struct MemoryEngine {
    committed: ObjectMap,
    open: Option<OpenTransaction>,
    next_handle: u64,
    fail_on_add: Option<usize>,
    fail_on_commit: bool,
    commits: usize,
    aborts: usize,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `n`th add (1-based) of every later transaction fail
    pub fn fail_on_add(&mut self, n: usize) {
        self.fail_on_add = Some(n);
    }

    pub fn fail_on_commit(&mut self, fail: bool) {
        self.fail_on_commit = fail;
    }

    pub fn clear_failures(&mut self) {
        self.fail_on_add = None;
        self.fail_on_commit = false;
    }

    pub const fn commits(&self) -> usize {
        self.commits
    }

    pub const fn aborts(&self) -> usize {
        self.aborts
    }

    pub const fn in_transaction(&self) -> bool {
        self.open.is_some()
    }

    /// Committed objects in (kind, id) order
    pub fn objects(&self) -> impl Iterator<Item = &EngineObject> {
        self.committed.values()
    }

    /// Committed filters in (kind, id) order
    pub fn filters(&self) -> impl Iterator<Item = &FilterSpec> {
        self.committed.values().filter_map(EngineObject::as_filter)
    }

    pub fn filter_count(&self) -> usize {
        self.filters().count()
    }

    pub fn contains(&self, kind: ObjectKind, id: StableId) -> bool {
        self.committed.contains_key(&(kind, id))
    }

    /// Arbitrates traffic against the committed filters
    pub fn evaluate(&self, traffic: &Traffic) -> Verdict {
        resolve(self.filters(), traffic)
    }

    fn open_mut(&mut self) -> Result<&mut OpenTransaction, EngineError> {
        self.open.as_mut().ok_or(EngineError::NoTransaction)
    }

    fn check_handle(&self, handle: TransactionHandle) -> Result<(), EngineError> {
        match &self.open {
            None => Err(EngineError::NoTransaction),
            Some(tx) if tx.handle != handle => Err(EngineError::UnknownTransaction(handle)),
            Some(_) => Ok(()),
        }
    }
}

/// The object `object` must be created after, if any
fn parent_of(object: &EngineObject) -> Option<(ObjectKind, StableId)> {
    match object {
        EngineObject::Provider(_) => None,
        EngineObject::Sublayer(s) => Some((ObjectKind::Provider, s.provider)),
        EngineObject::Filter(f) => Some((ObjectKind::Sublayer, f.sublayer.identity())),
    }
}

fn has_children(objects: &ObjectMap, kind: ObjectKind, id: StableId) -> bool {
    objects
        .values()
        .any(|o| parent_of(o) == Some((kind, id)))
}

impl FilterEngine for MemoryEngine {
    fn begin_transaction(&mut self) -> Result<TransactionHandle, EngineError> {
        if self.open.is_some() {
            return Err(EngineError::TransactionInProgress);
        }
        self.next_handle += 1;
        let handle = TransactionHandle::new(self.next_handle);
        self.open = Some(OpenTransaction {
            handle,
            staged: self.committed.clone(),
            adds: 0,
        });
        trace!("memory engine: begin {handle}");
        Ok(handle)
    }

    fn add_object(&mut self, object: &EngineObject) -> Result<(), EngineError> {
        let fail_on_add = self.fail_on_add;
        let tx = self.open_mut()?;
        tx.adds += 1;

        let key = (object.kind(), object.id());
        if fail_on_add == Some(tx.adds) {
            return Err(EngineError::Rejected {
                kind: key.0,
                id: key.1,
                reason: format!("injected failure on add #{}", tx.adds),
            });
        }
        if tx.staged.contains_key(&key) {
            return Err(EngineError::AlreadyExists {
                kind: key.0,
                id: key.1,
            });
        }
        if let Some((kind, id)) = parent_of(object)
            && !tx.staged.contains_key(&(kind, id))
        {
            return Err(EngineError::NotFound { kind, id });
        }

        trace!("memory engine: add {} {}", key.0, object.name());
        tx.staged.insert(key, object.clone());
        Ok(())
    }

    fn delete_object(&mut self, kind: ObjectKind, id: StableId) -> Result<(), EngineError> {
        let tx = self.open_mut()?;
        if !tx.staged.contains_key(&(kind, id)) {
            return Err(EngineError::NotFound { kind, id });
        }
        if has_children(&tx.staged, kind, id) {
            return Err(EngineError::Rejected {
                kind,
                id,
                reason: "object is still referenced".to_string(),
            });
        }
        tx.staged.remove(&(kind, id));
        Ok(())
    }

    fn commit(&mut self, handle: TransactionHandle) -> Result<(), EngineError> {
        self.check_handle(handle)?;
        if self.fail_on_commit {
            return Err(EngineError::Rejected {
                kind: ObjectKind::Provider,
                id: crate::core::filter::provider_identity(),
                reason: "injected commit failure".to_string(),
            });
        }
        if let Some(tx) = self.open.take() {
            self.committed = tx.staged;
        }
        self.commits += 1;
        debug!(
            "memory engine: committed {handle}, {} objects installed",
            self.committed.len()
        );
        Ok(())
    }

    fn abort(&mut self, handle: TransactionHandle) {
        if self.check_handle(handle).is_ok() {
            self.open = None;
            self.aborts += 1;
            debug!("memory engine: aborted {handle}");
        }
    }
}
