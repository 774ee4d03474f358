//! The locality-local part of the global address table.
//!
//! Each locality owns one [`AddressTable`]. It holds the bindings for every instance hosted on
//! the locality, forwarding records for ids minted here whose instance migrated elsewhere, and
//! a cache of where foreign ids were last seen.
//!
//! Resolution never needs a central authority: the home locality is embedded in every
//! [`GlobalId`], so a locality that doesn't host an id resolves it to the cached location or to
//! the id's home. Only the locality hosting an instance knows its [`LocalHandle`].
//!
//! All maps are sharded (`DashMap`), so lookups never block each other and writers only contend
//! when they touch the same shard.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::{mapref::entry::Entry, DashMap};
use tracing::trace;

use crate::{
    error::RuntimeError,
    id::{GlobalId, LocalHandle, LocalityId},
};

/// A binding held by the address table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Binding {
    /// The instance lives on this locality under the given handle.
    Hosted(LocalHandle),
    /// The instance was minted here but now lives on another locality.
    Forwarded(LocalityId),
}

/// The outcome of resolving an id on one locality.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// The instance is hosted here.
    Local(LocalHandle),
    /// The instance is, as far as this locality knows, hosted on another locality.
    Remote(LocalityId),
}

/// Maps global ids to their location, for one locality.
#[derive(Debug)]
pub struct AddressTable {
    here: LocalityId,
    next_sequence: AtomicU64,
    bindings: DashMap<GlobalId, Binding>,
    locations: DashMap<GlobalId, LocalityId>,
}

impl AddressTable {
    /// Creates an empty table for the locality `here`.
    pub fn new(here: LocalityId) -> Self {
        AddressTable {
            here,
            next_sequence: AtomicU64::new(0),
            bindings: DashMap::new(),
            locations: DashMap::new(),
        }
    }

    /// The locality owning this table.
    pub fn here(&self) -> LocalityId {
        self.here
    }

    /// Mints a fresh id bound to a locally hosted instance.
    ///
    /// The binding is committed before the id is returned, so the id resolves from the moment
    /// the caller can observe it.
    ///
    /// # Panics
    ///
    /// Panics if the minted id is already bound, which would mean the sequence counter was
    /// corrupted.
    pub fn register(&self, handle: LocalHandle) -> GlobalId {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let id = GlobalId::new(self.here, sequence);
        if self.bindings.insert(id, Binding::Hosted(handle)).is_some() {
            panic!("address table invariant violated: {id} was minted twice");
        }
        trace!(%id, %handle, "registered binding");
        id
    }

    /// Resolves an id without leaving this locality.
    ///
    /// Fails with [`RuntimeError::UnknownId`] if the id was minted here and has no binding,
    /// meaning it was never registered or has been retired. Foreign ids resolve to the last
    /// known location, falling back to their home locality.
    pub fn resolve(&self, id: GlobalId) -> Result<Resolution, RuntimeError> {
        if let Some(binding) = self.bindings.get(&id) {
            return match *binding {
                Binding::Hosted(handle) => Ok(Resolution::Local(handle)),
                Binding::Forwarded(locality) if locality == self.here => {
                    panic!("address table invariant violated: {id} forwards to its own host")
                }
                Binding::Forwarded(locality) => Ok(Resolution::Remote(locality)),
            };
        }

        if id.locality() == self.here {
            return Err(RuntimeError::UnknownId(id));
        }

        let locality = self
            .locations
            .get(&id)
            .map(|locality| *locality)
            .unwrap_or_else(|| id.locality());
        Ok(Resolution::Remote(locality))
    }

    /// Returns the handle of a locally hosted instance.
    pub fn lookup(&self, id: GlobalId) -> Option<LocalHandle> {
        match self.bindings.get(&id).as_deref() {
            Some(Binding::Hosted(handle)) => Some(*handle),
            _ => None,
        }
    }

    /// Removes the binding of a locally hosted instance, returning its handle.
    ///
    /// Retiring an id which isn't hosted here is a no-op.
    pub fn retire(&self, id: GlobalId) -> Option<LocalHandle> {
        self.locations.remove(&id);
        let (_, binding) = self
            .bindings
            .remove_if(&id, |_, binding| matches!(binding, Binding::Hosted(_)))?;
        trace!(%id, "retired binding");
        match binding {
            Binding::Hosted(handle) => Some(handle),
            Binding::Forwarded(_) => None,
        }
    }

    /// Removes the forwarding record of an id minted here.
    ///
    /// Called on the home locality once a migrated instance was retired by its host.
    pub fn release(&self, id: GlobalId) -> bool {
        let released = self
            .bindings
            .remove_if(&id, |_, binding| matches!(binding, Binding::Forwarded(_)))
            .is_some();
        if released {
            trace!(%id, "released forwarding record");
        }
        released
    }

    /// Rebinds a locally hosted instance to the locality `to` it is migrating to.
    ///
    /// The home locality keeps a forwarding record; any other host drops its binding and
    /// remembers the new location. Returns the handle of the instance which is no longer bound.
    ///
    /// # Panics
    ///
    /// Panics if `to` is this locality.
    pub fn rebind(&self, id: GlobalId, to: LocalityId) -> Result<LocalHandle, RuntimeError> {
        assert_ne!(to, self.here, "cannot rebind {id} to its current host");

        let handle = match self.bindings.entry(id) {
            Entry::Occupied(mut entry) => match *entry.get() {
                Binding::Hosted(handle) => {
                    if id.locality() == self.here {
                        entry.insert(Binding::Forwarded(to));
                    } else {
                        entry.remove();
                    }
                    handle
                }
                Binding::Forwarded(_) => return Err(RuntimeError::UnknownId(id)),
            },
            Entry::Vacant(_) => return Err(RuntimeError::UnknownId(id)),
        };

        if id.locality() != self.here {
            self.remember(id, to);
        }
        trace!(%id, %to, "rebound binding");
        Ok(handle)
    }

    /// Points the forwarding record of an id minted here at a new host.
    ///
    /// Ignored if the id has no binding here, so a retired id is never resurrected.
    pub fn forward(&self, id: GlobalId, to: LocalityId) -> bool {
        if to == self.here {
            return false;
        }
        match self.bindings.get_mut(&id) {
            Some(mut binding) => {
                *binding = Binding::Forwarded(to);
                trace!(%id, %to, "updated forwarding record");
                true
            }
            None => false,
        }
    }

    /// Hosts an instance that migrated here under its existing id.
    pub fn adopt(&self, id: GlobalId, handle: LocalHandle) {
        self.locations.remove(&id);
        self.bindings.insert(id, Binding::Hosted(handle));
        trace!(%id, %handle, "adopted binding");
    }

    /// Records where a foreign id was last seen.
    pub fn remember(&self, id: GlobalId, locality: LocalityId) {
        if id.locality() == self.here || locality == self.here {
            return;
        }
        if locality == id.locality() {
            self.locations.remove(&id);
        } else {
            self.locations.insert(id, locality);
        }
    }

    /// Forgets the cached location of a foreign id.
    pub fn forget(&self, id: GlobalId) {
        self.locations.remove(&id);
    }

    /// Number of instances hosted here.
    pub fn len(&self) -> usize {
        self.bindings
            .iter()
            .filter(|entry| matches!(entry.value(), Binding::Hosted(_)))
            .count()
    }

    /// Returns `true` if no instance is hosted here.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc, thread};

    use super::*;

    const L1: LocalityId = LocalityId::new(1);
    const L2: LocalityId = LocalityId::new(2);
    const L3: LocalityId = LocalityId::new(3);

    #[test]
    fn register_then_resolve() {
        let table = AddressTable::new(L1);
        let id = table.register(LocalHandle::new(10));

        assert_eq!(id.locality(), L1);
        assert_eq!(table.resolve(id), Ok(Resolution::Local(LocalHandle::new(10))));
        assert_eq!(table.lookup(id), Some(LocalHandle::new(10)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn unknown_local_ids_fail() {
        let table = AddressTable::new(L1);
        let id = GlobalId::new(L1, 99);
        assert_eq!(table.resolve(id), Err(RuntimeError::UnknownId(id)));
    }

    #[test]
    fn foreign_ids_resolve_to_their_home() {
        let table = AddressTable::new(L1);
        let id = GlobalId::new(L2, 0);
        assert_eq!(table.resolve(id), Ok(Resolution::Remote(L2)));

        table.remember(id, L3);
        assert_eq!(table.resolve(id), Ok(Resolution::Remote(L3)));

        table.forget(id);
        assert_eq!(table.resolve(id), Ok(Resolution::Remote(L2)));
    }

    #[test]
    fn retire_is_idempotent_and_never_resurrects() {
        let table = AddressTable::new(L1);
        let id = table.register(LocalHandle::new(1));

        assert_eq!(table.retire(id), Some(LocalHandle::new(1)));
        assert_eq!(table.retire(id), None);
        assert_eq!(table.resolve(id), Err(RuntimeError::UnknownId(id)));

        let next = table.register(LocalHandle::new(1));
        assert_ne!(next, id);
        assert_eq!(table.resolve(id), Err(RuntimeError::UnknownId(id)));
        assert!(!table.forward(id, L2));
    }

    #[test]
    fn home_keeps_forwarding_record_on_rebind() {
        let table = AddressTable::new(L1);
        let id = table.register(LocalHandle::new(4));

        assert_eq!(table.rebind(id, L2), Ok(LocalHandle::new(4)));
        assert_eq!(table.resolve(id), Ok(Resolution::Remote(L2)));
        assert_eq!(table.lookup(id), None);
        assert!(table.is_empty());

        assert!(table.forward(id, L3));
        assert_eq!(table.resolve(id), Ok(Resolution::Remote(L3)));

        // Retire only touches hosted instances.
        assert_eq!(table.retire(id), None);
        assert!(table.release(id));
        assert_eq!(table.resolve(id), Err(RuntimeError::UnknownId(id)));
    }

    #[test]
    fn adopted_instances_resolve_locally() {
        let home = AddressTable::new(L1);
        let host = AddressTable::new(L2);
        let id = home.register(LocalHandle::new(0));

        host.adopt(id, LocalHandle::new(7));
        home.rebind(id, L2).unwrap();
        assert_eq!(host.resolve(id), Ok(Resolution::Local(LocalHandle::new(7))));

        // Moving on from a host that isn't home drops the binding and caches the new location.
        assert_eq!(host.rebind(id, L3), Ok(LocalHandle::new(7)));
        assert_eq!(host.resolve(id), Ok(Resolution::Remote(L3)));
        assert_eq!(host.lookup(id), None);
    }

    #[test]
    fn migrating_back_home_replaces_forwarding_record() {
        let table = AddressTable::new(L1);
        let id = table.register(LocalHandle::new(0));
        table.rebind(id, L2).unwrap();

        table.adopt(id, LocalHandle::new(5));
        assert_eq!(table.resolve(id), Ok(Resolution::Local(LocalHandle::new(5))));
    }

    #[test]
    fn concurrent_registrations_mint_unique_ids() {
        let table = Arc::new(AddressTable::new(L1));
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let table = table.clone();
                thread::spawn(move || {
                    (0..500)
                        .map(|i| table.register(LocalHandle::new(worker * 1000 + i)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id));
                assert!(matches!(table.resolve(id), Ok(Resolution::Local(_))));
            }
        }
        assert_eq!(ids.len(), 4000);
        assert_eq!(table.len(), 4000);
    }
}
