//! Transaction coordinator
//!
//! Replaces the installed policy in one engine transaction:
//!
//! 1. begin
//! 2. delete everything the current [`SessionLedger`] names, newest first
//!    (objects already gone are fine)
//! 3. add the provider, both sublayers, then every filter the rules emit
//! 4. commit and swap in the new ledger
//!
//! Any failure after step 1, including a failed commit, aborts the
//! transaction and leaves the previous ledger in place. The engine discards
//! the staged work, so traffic only ever sees the old policy or the new one.
//!
//! One transition runs at a time: the engine, the ledger and the sequence
//! counter live behind a single mutex.

use crate::core::condition::Condition;
use crate::core::engine::{EngineObject, FilterEngine, TransactionHandle};
use crate::core::error::{Error, Result};
use crate::core::filter::{FilterSpec, ObjectKind, ProviderSpec, Sublayer};
use crate::core::identity::{ObjectName, StableId};
use crate::core::ledger::SessionLedger;
use crate::core::rules::{FilterInstaller, Rule};
use parking_lot::Mutex;
use strum::IntoEnumIterator;
use tracing::{debug, error, info, warn};

struct State<E> {
    engine: E,
    ledger: SessionLedger,
    next_sequence: u64,
}

pub struct TransactionCoordinator<E: FilterEngine> {
    state: Mutex<State<E>>,
}

/// Forwards filters to the engine and records what was added
struct LedgerInstaller<'a, E: FilterEngine> {
    engine: &'a mut E,
    ledger: &'a mut SessionLedger,
    next_sequence: &'a mut u64,
}

impl<E: FilterEngine> LedgerInstaller<'_, E> {
    fn add(&mut self, object: &EngineObject) -> Result<()> {
        self.engine.add_object(object)?;
        *self.next_sequence += 1;
        self.ledger
            .record(object.kind(), object.id(), *self.next_sequence);
        debug!("Added {} '{}' ({})", object.kind(), object.name(), object.id());
        Ok(())
    }
}

impl<E: FilterEngine> FilterInstaller for LedgerInstaller<'_, E> {
    fn add_filter(&mut self, filter: &FilterSpec) -> Result<()> {
        if let Some(condition) = filter.family_mismatch() {
            return Err(Error::CatalogViolation(format!(
                "filter '{}' on layer {} carries condition '{condition}' of the other address family",
                filter.name, filter.layer
            )));
        }
        let port_condition = filter
            .conditions
            .iter()
            .any(|c| matches!(c, Condition::PortLocal(_) | Condition::PortRemote(_)));
        if filter.layer.is_icmp_error() && port_condition {
            return Err(Error::CatalogViolation(format!(
                "filter '{}' matches ports on ICMP layer {}",
                filter.name, filter.layer
            )));
        }
        self.add(&EngineObject::Filter(filter.clone()))
    }
}

fn delete_tolerant<E: FilterEngine>(engine: &mut E, kind: ObjectKind, id: StableId) -> Result<()> {
    match engine.delete_object(kind, id) {
        Ok(()) => Ok(()),
        Err(e) if e.is_not_found() => {
            debug!("{kind} {id} already gone, skipping");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

impl<E: FilterEngine> TransactionCoordinator<E> {
    pub fn new(engine: E) -> Self {
        Self {
            state: Mutex::new(State {
                engine,
                ledger: SessionLedger::new(),
                next_sequence: 0,
            }),
        }
    }

    /// Atomically replaces the installed policy with `rules`.
    ///
    /// An empty rule list removes everything, provider included.
    ///
    /// # Errors
    ///
    /// Any rule or engine failure. The previous policy stays installed.
    pub fn apply_policy(&self, rules: &[Rule]) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let names: Vec<&str> = rules.iter().map(Rule::name).collect();
        info!("Applying policy: {} rules {:?}", rules.len(), names);

        let handle = state.engine.begin_transaction()?;
        debug!("Began transaction {handle}");

        let staged = Self::stage(state, rules).and_then(|ledger| {
            state.engine.commit(handle)?;
            Ok(ledger)
        });

        match staged {
            Ok(ledger) => {
                info!(
                    "Committed transaction {handle}: {} objects installed ({} filters)",
                    ledger.len(),
                    ledger.count(ObjectKind::Filter)
                );
                state.ledger = ledger;
                Ok(())
            }
            Err(e) => {
                Self::abort(state, handle, &e);
                Err(e)
            }
        }
    }

    /// Removes every object this coordinator installed
    pub fn purge(&self) -> Result<()> {
        self.apply_policy(&[])
    }

    /// Deletes every identity in the object catalog, whether or not this
    /// process installed it.
    ///
    /// Clears objects left behind by a previous process that exited without
    /// shutting down.
    pub fn purge_known(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        info!("Purging all known vpnfw objects");
        let handle = state.engine.begin_transaction()?;

        let mut names: Vec<ObjectName> = ObjectName::iter().collect();
        // filters, then sublayers, then the provider
        names.sort_by_key(|name| std::cmp::Reverse(name.kind()));

        let result = names
            .into_iter()
            .try_for_each(|name| delete_tolerant(&mut state.engine, name.kind(), name.identity()))
            .and_then(|()| state.engine.commit(handle).map_err(Error::from));

        match result {
            Ok(()) => {
                state.ledger = SessionLedger::new();
                info!("Purged all known objects");
                Ok(())
            }
            Err(e) => {
                Self::abort(state, handle, &e);
                Err(e)
            }
        }
    }

    /// Snapshot of the installed objects
    pub fn ledger(&self) -> SessionLedger {
        self.state.lock().ledger.clone()
    }

    /// Runs `f` with the engine while holding the transition lock
    pub fn with_engine<R>(&self, f: impl FnOnce(&E) -> R) -> R {
        f(&self.state.lock().engine)
    }

    /// Mutable access for engine configuration (failure injection in tests)
    pub fn with_engine_mut<R>(&self, f: impl FnOnce(&mut E) -> R) -> R {
        f(&mut self.state.lock().engine)
    }

    pub fn into_engine(self) -> E {
        self.state.into_inner().engine
    }

    fn stage(state: &mut State<E>, rules: &[Rule]) -> Result<SessionLedger> {
        let previous = state.ledger.records().len();
        for record in state.ledger.records().iter().rev() {
            delete_tolerant(&mut state.engine, record.kind, record.id)?;
        }
        if previous > 0 {
            debug!("Purged {previous} objects from the previous policy");
        }

        let mut ledger = SessionLedger::new();
        if rules.is_empty() {
            return Ok(ledger);
        }

        let mut installer = LedgerInstaller {
            engine: &mut state.engine,
            ledger: &mut ledger,
            next_sequence: &mut state.next_sequence,
        };
        installer.add(&EngineObject::Provider(ProviderSpec::default()))?;
        for sublayer in Sublayer::iter() {
            installer.add(&EngineObject::Sublayer(sublayer.spec()))?;
        }
        for rule in rules {
            rule.apply(&mut installer).inspect_err(|e| {
                warn!("Rule {} failed: {e}", rule.name());
            })?;
        }
        Ok(ledger)
    }

    fn abort(state: &mut State<E>, handle: TransactionHandle, cause: &Error) {
        error!("Transition failed, aborting transaction {handle}: {cause}");
        state.engine.abort(handle);
    }
}

impl<E: FilterEngine> std::fmt::Debug for TransactionCoordinator<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TransactionCoordinator")
            .field("ledger", &state.ledger)
            .field("next_sequence", &state.next_sequence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::EngineError;
    use crate::core::memory::MemoryEngine;
    use crate::core::rules::{BlockAll, PermitLoopback, tunneldns};
    use crate::core::test_helpers::assert_ledger_matches_engine;

    fn coordinator() -> TransactionCoordinator<MemoryEngine> {
        TransactionCoordinator::new(MemoryEngine::new())
    }

    #[test]
    fn test_ledger_order_provider_sublayers_filters() {
        let coordinator = coordinator();
        coordinator.apply_policy(&[BlockAll.into()]).unwrap();

        let ledger = coordinator.ledger();
        let kinds: Vec<ObjectKind> = ledger.records().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ObjectKind::Provider,
                ObjectKind::Sublayer,
                ObjectKind::Sublayer,
                ObjectKind::Filter,
                ObjectKind::Filter,
                ObjectKind::Filter,
                ObjectKind::Filter,
            ]
        );
        let sequences: Vec<u64> = ledger.records().iter().map(|r| r.sequence).collect();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
        coordinator.with_engine(|engine| assert_ledger_matches_engine(&ledger, engine));
    }

    #[test]
    fn test_empty_rules_install_nothing() {
        let coordinator = coordinator();
        coordinator.apply_policy(&[BlockAll.into()]).unwrap();
        coordinator.apply_policy(&[]).unwrap();

        assert!(coordinator.ledger().is_empty());
        coordinator.with_engine(|engine| assert_eq!(engine.objects().count(), 0));
    }

    #[test]
    fn test_failed_rule_aborts_and_keeps_ledger() {
        let coordinator = coordinator();
        coordinator.apply_policy(&[BlockAll.into()]).unwrap();
        let before = coordinator.ledger();

        // provider + 2 sublayers + 4 BlockAll + 2nd loopback filter
        coordinator.with_engine_mut(|engine| engine.fail_on_add(9));
        let result = coordinator.apply_policy(&[BlockAll.into(), PermitLoopback.into()]);

        assert!(matches!(result, Err(Error::Engine(EngineError::Rejected { .. }))));
        assert_eq!(coordinator.ledger(), before);
        coordinator.with_engine(|engine| {
            assert!(!engine.in_transaction());
            assert_eq!(engine.aborts(), 1);
            assert_ledger_matches_engine(&before, engine);
        });
    }

    #[test]
    fn test_failed_commit_aborts() {
        let coordinator = coordinator();
        coordinator.with_engine_mut(|engine| engine.fail_on_commit(true));

        assert!(coordinator.apply_policy(&[BlockAll.into()]).is_err());
        assert!(coordinator.ledger().is_empty());
        coordinator.with_engine(|engine| {
            assert!(!engine.in_transaction());
            assert_eq!(engine.objects().count(), 0);
        });
    }

    #[test]
    fn test_sequence_not_rewound_after_abort() {
        let coordinator = coordinator();
        coordinator.with_engine_mut(|engine| engine.fail_on_add(3));
        assert!(coordinator.apply_policy(&[BlockAll.into()]).is_err());

        coordinator.with_engine_mut(MemoryEngine::clear_failures);
        coordinator.apply_policy(&[BlockAll.into()]).unwrap();
        // two objects recorded before the failing add
        assert_eq!(coordinator.ledger().records()[0].sequence, 3);
    }

    #[test]
    fn test_purge_known_clears_foreign_objects() {
        let first = coordinator();
        first
            .apply_policy(&[
                BlockAll.into(),
                tunneldns::BlockAll::new("wg0").unwrap().into(),
            ])
            .unwrap();

        // a fresh coordinator over the same engine has an empty ledger
        let second = TransactionCoordinator::new(first.into_engine());
        assert!(second.ledger().is_empty());
        second.purge_known().unwrap();
        second.with_engine(|engine| assert_eq!(engine.objects().count(), 0));
    }
}
