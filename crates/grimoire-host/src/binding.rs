//! Keyed event-to-callback bindings
//!
//! A [`BindingStore`] owns the callback references registered for one key shape
//! (global, entry-scoped or guid-scoped). Callbacks are handed out as a snapshot so
//! that the callbacks being delivered can freely insert, remove or clear bindings
//! without disturbing the delivery in progress.

use std::collections::HashMap;

use grimoire_events::BindingKey;

/// Identifier returned by [`BindingStore::insert`], never reused within a store
pub type BindingId = u64;

#[derive(Debug)]
struct Binding<R> {
    id: BindingId,
    callback: R,
    /// Remaining deliveries, 0 means unlimited
    shots: u32,
}

#[derive(Debug)]
pub struct BindingStore<K, R> {
    bindings: HashMap<K, Vec<Binding<R>>>,
    id_lookup: HashMap<BindingId, K>,
    max_id: BindingId,
}

impl<K, R> BindingStore<K, R>
where
    K: BindingKey,
    R: Clone,
{
    pub fn new() -> Self {
        Self {
            bindings: HashMap::new(),
            id_lookup: HashMap::new(),
            max_id: 0,
        }
    }

    /// Bind `callback` to `key` for `shots` deliveries (0 = unlimited)
    pub fn insert(&mut self, key: K, callback: R, shots: u32) -> BindingId {
        self.max_id += 1;
        let id = self.max_id;

        self.bindings.entry(key.clone()).or_default().push(Binding {
            id,
            callback,
            shots,
        });
        self.id_lookup.insert(id, key);

        id
    }

    pub fn has_bindings_for(&self, key: &K) -> bool {
        self.bindings.contains_key(key)
    }

    /// Take a snapshot of every callback bound to `key`, in insertion order
    ///
    /// Shot counters are consumed by this call: bindings whose last shot was just
    /// handed out are removed before the snapshot is returned.
    pub fn push_refs_for(&mut self, key: &K) -> Vec<R> {
        let Some(list) = self.bindings.get_mut(key) else {
            return Vec::new();
        };

        let id_lookup = &mut self.id_lookup;
        let mut refs = Vec::with_capacity(list.len());

        list.retain_mut(|binding| {
            refs.push(binding.callback.clone());

            if binding.shots == 0 {
                return true;
            }

            binding.shots -= 1;
            if binding.shots == 0 {
                id_lookup.remove(&binding.id);
                false
            } else {
                true
            }
        });

        if list.is_empty() {
            self.bindings.remove(key);
        }

        refs
    }

    /// Remove one binding. Unknown or already removed ids are ignored.
    pub fn remove(&mut self, id: BindingId) -> bool {
        let Some(key) = self.id_lookup.remove(&id) else {
            return false;
        };

        if let Some(list) = self.bindings.get_mut(&key) {
            if let Some(pos) = list.iter().position(|b| b.id == id) {
                list.remove(pos);
            }
            if list.is_empty() {
                self.bindings.remove(&key);
            }
        }

        true
    }

    /// Drop every binding for `key`
    pub fn clear_key(&mut self, key: &K) {
        if let Some(list) = self.bindings.remove(key) {
            for binding in list {
                self.id_lookup.remove(&binding.id);
            }
        }
    }

    /// Drop every binding whose key matches `predicate`
    pub fn clear_where(&mut self, mut predicate: impl FnMut(&K) -> bool) {
        let keys: Vec<K> = self
            .bindings
            .keys()
            .filter(|k| predicate(k))
            .cloned()
            .collect();

        for key in keys {
            self.clear_key(&key);
        }
    }

    /// Drop every binding
    pub fn clear(&mut self) {
        self.bindings.clear();
        self.id_lookup.clear();
    }

    /// Total number of live bindings across all keys
    pub fn len(&self) -> usize {
        self.id_lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_lookup.is_empty()
    }
}

impl<K, R> Default for BindingStore<K, R>
where
    K: BindingKey,
    R: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grimoire_events::{BindingType, EntryKey, EventKey};

    type Store = BindingStore<EventKey, &'static str>;

    const X: EventKey = EventKey { event: "X" };
    const Y: EventKey = EventKey { event: "Y" };

    #[test]
    fn test_insert_and_clear_all() {
        let mut store = Store::new();
        store.insert(X, "cb", 0);
        assert!(store.has_bindings_for(&X));

        store.clear();
        assert!(!store.has_bindings_for(&X));
        assert!(store.is_empty());
    }

    #[test]
    fn test_unknown_key_has_no_bindings() {
        let mut store = Store::new();
        assert!(!store.has_bindings_for(&Y));
        assert!(store.push_refs_for(&Y).is_empty());
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut store = Store::new();
        let a = store.insert(X, "a", 0);
        store.remove(a);
        let b = store.insert(X, "b", 0);
        assert!(b > a);
    }

    #[test]
    fn test_shots_expire_after_delivery() {
        let mut store = Store::new();
        store.insert(X, "three", 3);

        for _ in 0..3 {
            assert_eq!(store.push_refs_for(&X), vec!["three"]);
        }

        assert!(!store.has_bindings_for(&X));
        assert!(store.push_refs_for(&X).is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_delivery_order_and_partial_expiry() {
        let mut store = Store::new();
        store.insert(X, "forever", 0);
        store.insert(X, "once", 1);
        store.insert(X, "twice", 2);

        assert_eq!(store.push_refs_for(&X), vec!["forever", "once", "twice"]);
        assert_eq!(store.push_refs_for(&X), vec!["forever", "twice"]);
        assert_eq!(store.push_refs_for(&X), vec!["forever"]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut store = Store::new();
        let id = store.insert(X, "cb", 0);

        assert!(store.remove(id));
        assert!(!store.remove(id));
        assert!(!store.remove(9999));
        assert!(!store.has_bindings_for(&X));
    }

    #[test]
    fn test_self_remove_during_delivery() {
        let mut store = Store::new();
        let first = store.insert(X, "first", 0);
        store.insert(X, "second", 0);

        let refs = store.push_refs_for(&X);
        // The first callback cancels itself while the snapshot is being delivered
        assert!(store.remove(first));
        assert_eq!(refs, vec!["first", "second"]);

        assert_eq!(store.push_refs_for(&X), vec!["second"]);
        assert!(!store.remove(first));
    }

    #[test]
    fn test_insert_during_delivery_waits_for_next_pass() {
        let mut store = Store::new();
        store.insert(X, "existing", 0);

        let refs = store.push_refs_for(&X);
        store.insert(X, "added", 0);
        assert_eq!(refs, vec!["existing"]);

        assert_eq!(store.push_refs_for(&X), vec!["existing", "added"]);
    }

    #[test]
    fn test_clear_key_purges_ids() {
        let mut store = Store::new();
        let a = store.insert(X, "a", 0);
        store.insert(Y, "b", 0);

        store.clear_key(&X);
        assert!(!store.has_bindings_for(&X));
        assert!(store.has_bindings_for(&Y));
        assert!(!store.remove(a));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_expired_binding_id_is_dead() {
        let mut store = Store::new();
        let id = store.insert(X, "once", 1);
        store.push_refs_for(&X);
        assert!(!store.remove(id));
    }

    #[test]
    fn test_clear_where_on_scoped_keys() {
        let mut store: BindingStore<EntryKey, u32> = BindingStore::new();
        let spawn = EntryKey::new("SPAWN", BindingType::Creature, 1);
        let died = EntryKey::new("DIED", BindingType::Creature, 1);
        let other = EntryKey::new("SPAWN", BindingType::Creature, 2);
        store.insert(spawn, 1, 0);
        store.insert(died, 2, 0);
        store.insert(other, 3, 0);

        store.clear_where(|k| k.entry == 1);
        assert!(!store.has_bindings_for(&spawn));
        assert!(!store.has_bindings_for(&died));
        assert!(store.has_bindings_for(&other));
    }
}
