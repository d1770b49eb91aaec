//! Slot map of named, shared entries.
//!
//! Entries live in stable slots and are indexed by key, so lookups and
//! removals never walk a list. Each entry also carries an ordering stamp:
//! `push_front` stamps below every existing entry and `push_back` above,
//! which reproduces list order for listing.

use std::sync::Arc;

use hashbrown::HashMap;

#[derive(Debug)]
struct Slot<T> {
    key: String,
    value: Arc<T>,
    order: i64,
}

/// Keyed slot map holding one strong reference per entry.
#[derive(Debug)]
pub(crate) struct Registry<T> {
    slots: Vec<Option<Slot<T>>>,
    free: Vec<usize>,
    index: HashMap<String, usize>,
    front: i64,
    back: i64,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            front: 0,
            back: 0,
        }
    }
}

impl<T> Registry<T> {
    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Insert ahead of every existing entry. The key must be unused.
    pub(crate) fn push_front(&mut self, key: String, value: Arc<T>) {
        self.front -= 1;
        let order = self.front;
        self.insert(key, value, order);
    }

    /// Insert after every existing entry. The key must be unused.
    pub(crate) fn push_back(&mut self, key: String, value: Arc<T>) {
        let order = self.back;
        self.back += 1;
        self.insert(key, value, order);
    }

    fn insert(&mut self, key: String, value: Arc<T>, order: i64) {
        debug_assert!(!self.index.contains_key(&key));
        let slot = Slot {
            key: key.clone(),
            value,
            order,
        };
        let at = match self.free.pop() {
            Some(at) => {
                self.slots[at] = Some(slot);
                at
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        self.index.insert(key, at);
    }

    pub(crate) fn get(&self, key: &str) -> Option<&Arc<T>> {
        let at = *self.index.get(key)?;
        self.slots.get(at)?.as_ref().map(|slot| &slot.value)
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<Arc<T>> {
        let at = self.index.remove(key)?;
        let slot = self.slots.get_mut(at)?.take()?;
        self.free.push(at);
        Some(slot.value)
    }

    /// Remove the entry under `key` only if it is `value` itself.
    pub(crate) fn remove_ptr(&mut self, key: &str, value: &Arc<T>) -> Option<Arc<T>> {
        if !Arc::ptr_eq(self.get(key)?, value) {
            return None;
        }
        self.remove(key)
    }

    pub(crate) fn keys_in_order(&self) -> Vec<String> {
        let mut live: Vec<&Slot<T>> = self.slots.iter().flatten().collect();
        live.sort_by_key(|slot| slot.order);
        live.into_iter().map(|slot| slot.key.clone()).collect()
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &Arc<T>> {
        self.slots.iter().flatten().map(|slot| &slot.value)
    }

    /// Unlink every entry, in listing order.
    pub(crate) fn drain(&mut self) -> Vec<Arc<T>> {
        let mut live: Vec<Slot<T>> = self.slots.drain(..).flatten().collect();
        live.sort_by_key(|slot| slot.order);
        self.free.clear();
        self.index.clear();
        live.into_iter().map(|slot| slot.value).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_front_and_back_ordering() {
        let mut registry = Registry::default();
        registry.push_back("b".to_string(), Arc::new(2));
        registry.push_front("a".to_string(), Arc::new(1));
        registry.push_back("c".to_string(), Arc::new(3));
        registry.push_front("z".to_string(), Arc::new(0));
        assert_eq!(registry.keys_in_order(), vec!["z", "a", "b", "c"]);
    }

    #[test]
    fn test_slot_reuse() {
        let mut registry = Registry::default();
        registry.push_back("a".to_string(), Arc::new(1));
        registry.push_back("b".to_string(), Arc::new(2));
        assert_eq!(*registry.remove("a").unwrap(), 1);
        registry.push_back("c".to_string(), Arc::new(3));
        assert_eq!(registry.slots.len(), 2);
        assert_eq!(registry.keys_in_order(), vec!["b", "c"]);
        assert!(registry.remove("a").is_none());
    }

    #[test]
    fn test_remove_ptr_checks_identity() {
        let mut registry = Registry::default();
        let entry = Arc::new(7);
        registry.push_back("a".to_string(), Arc::clone(&entry));
        assert!(registry.remove_ptr("a", &Arc::new(7)).is_none());
        assert!(registry.remove_ptr("a", &entry).is_some());
        assert_eq!(Arc::strong_count(&entry), 1);
    }

    #[test]
    fn test_drain() {
        let mut registry = Registry::default();
        registry.push_back("a".to_string(), Arc::new(1));
        registry.push_front("b".to_string(), Arc::new(2));
        let drained: Vec<i32> = registry.drain().into_iter().map(|v| *v).collect();
        assert_eq!(drained, vec![2, 1]);
        assert!(registry.is_empty());
        assert!(!registry.contains("a"));
    }
}
