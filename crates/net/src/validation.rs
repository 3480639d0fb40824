//! Ghost/missing reconciliation against an authoritative id list.

use crate::entity_replication::ReplicationStore;
use arena_core::{EntityId, EntityKey, EntityKind, SimTime};
use std::collections::BTreeSet;

/// What one validation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Local ids absent from the authoritative list, now removed.
    pub ghosts_removed: Vec<EntityId>,
    /// Authoritative ids absent locally, now placeholders.
    pub placeholders_added: Vec<EntityId>,
}

impl ValidationReport {
    /// Whether the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.ghosts_removed.is_empty() && self.placeholders_added.is_empty()
    }
}

/// Make `kind`'s namespace in `store` match `authoritative` exactly.
///
/// Running it twice with the same list changes nothing the second time.
pub fn reconcile_entity_list(
    store: &mut ReplicationStore,
    kind: EntityKind,
    authoritative: &BTreeSet<EntityId>,
    now: SimTime,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    for id in store.ids_of(kind) {
        if !authoritative.contains(&id) {
            store.remove(EntityKey { kind, id });
            report.ghosts_removed.push(id);
        }
    }

    for &id in authoritative {
        if store.insert_placeholder(EntityKey { kind, id }, now) {
            report.placeholders_added.push(id);
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_core::Vec2;

    fn store_with(ids: &[EntityId]) -> ReplicationStore {
        let mut store = ReplicationStore::new();
        for &id in ids {
            store.upsert(EntityKey::hostile(id), Vec2::ZERO, 10.0, SimTime::ZERO);
        }
        store
    }

    #[test]
    fn test_ghost_removed_and_missing_added() {
        let mut store = store_with(&[1, 2, 3]);
        let list: BTreeSet<_> = [1, 3, 4].into_iter().collect();

        let report = reconcile_entity_list(&mut store, EntityKind::Hostile, &list, SimTime::ZERO);

        assert_eq!(report.ghosts_removed, vec![2]);
        assert_eq!(report.placeholders_added, vec![4]);
        assert_eq!(store.ids_of(EntityKind::Hostile), vec![1, 3, 4]);
        assert!(store.get(EntityKey::hostile(4)).unwrap().placeholder);
    }

    #[test]
    fn test_second_pass_is_noop() {
        let mut store = store_with(&[1, 2, 3]);
        let list: BTreeSet<_> = [1, 3, 4].into_iter().collect();

        reconcile_entity_list(&mut store, EntityKind::Hostile, &list, SimTime::ZERO);
        let second = reconcile_entity_list(&mut store, EntityKind::Hostile, &list, SimTime::ZERO);

        assert!(second.is_noop());
        assert_eq!(store.ids_of(EntityKind::Hostile), vec![1, 3, 4]);
    }

    #[test]
    fn test_other_namespace_untouched() {
        let mut store = store_with(&[1]);
        store.upsert(EntityKey::player(1), Vec2::ZERO, 100.0, SimTime::ZERO);

        reconcile_entity_list(&mut store, EntityKind::Hostile, &BTreeSet::new(), SimTime::ZERO);

        assert!(store.contains(EntityKey::player(1)));
        assert!(store.ids_of(EntityKind::Hostile).is_empty());
    }
}
