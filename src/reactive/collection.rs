use crate::reactive::Subscription;
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::hash::Hash;
use std::rc::Rc;

/// A keyed reactive map.
///
/// `each` has the same current-then-future semantics as [`super::Signal::each`]:
/// the callback sees every present entry synchronously, then every future
/// insertion until the subscription is cancelled.
pub struct Collection<K, V> {
    inner: Rc<CollectionInner<K, V>>,
}

impl<K, V> Clone for Collection<K, V> {
    fn clone(&self) -> Self {
        Collection {
            inner: self.inner.clone(),
        }
    }
}

struct CollectionInner<K, V> {
    items: RefCell<IndexMap<K, V>>,
    subscribers: RefCell<Vec<SubEntry<K, V>>>,
    next_id: Cell<u64>,
}

struct SubEntry<K, V> {
    id: u64,
    on_insert: Rc<dyn Fn(&K, &V)>,
    on_remove: Option<Rc<dyn Fn(&K, &V)>>,
}

impl<K: Eq + Hash + Clone + 'static, V: Clone + 'static> Default for Collection<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone + 'static, V: Clone + 'static> Collection<K, V> {
    pub fn new() -> Self {
        Collection {
            inner: Rc::new(CollectionInner {
                items: RefCell::new(IndexMap::new()),
                subscribers: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
            }),
        }
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.items.borrow_mut().insert(key.clone(), value.clone());
        for sub in self.snapshot() {
            (sub.on_insert)(&key, &value);
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let removed = self.inner.items.borrow_mut().shift_remove(key);
        if let Some(value) = &removed {
            for sub in self.snapshot() {
                if let Some(on_remove) = &sub.on_remove {
                    on_remove(key, value);
                }
            }
        }
        removed
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.items.borrow().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    pub fn values(&self) -> Vec<V> {
        self.inner.items.borrow().values().cloned().collect()
    }

    /// Invoke `on_insert` for all current entries, then for every future one.
    pub fn each(
        &self,
        on_insert: impl Fn(&K, &V) + 'static,
        on_remove: Option<Rc<dyn Fn(&K, &V)>>,
    ) -> Subscription {
        let on_insert: Rc<dyn Fn(&K, &V)> = Rc::new(on_insert);
        let current: Vec<(K, V)> = self
            .inner
            .items
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (k, v) in &current {
            on_insert(k, v);
        }

        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner.subscribers.borrow_mut().push(SubEntry {
            id,
            on_insert,
            on_remove,
        });

        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.subscribers.borrow_mut().retain(|s| s.id != id);
            }
        })
    }

    fn snapshot(&self) -> Vec<SnapshotEntry<K, V>> {
        self.inner
            .subscribers
            .borrow()
            .iter()
            .map(|s| SnapshotEntry {
                on_insert: s.on_insert.clone(),
                on_remove: s.on_remove.clone(),
            })
            .collect()
    }
}

struct SnapshotEntry<K, V> {
    on_insert: Rc<dyn Fn(&K, &V)>,
    on_remove: Option<Rc<dyn Fn(&K, &V)>>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_each_sees_current_then_future() {
        let collection: Collection<String, i32> = Collection::new();
        collection.insert("a".into(), 1);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        let sub = collection.each(move |k: &String, v: &i32| s.borrow_mut().push((k.clone(), *v)), None);

        collection.insert("b".into(), 2);
        sub.cancel();
        collection.insert("c".into(), 3);

        assert_eq!(
            *seen.borrow(),
            vec![("a".to_string(), 1), ("b".to_string(), 2)]
        );
    }

    #[test]
    fn test_remove_notifies() {
        let collection: Collection<i32, i32> = Collection::new();
        collection.insert(1, 10);
        let removed = Rc::new(Cell::new(0));
        let r = removed.clone();
        let _sub = collection.each(
            |_, _| {},
            Some(Rc::new(move |k: &i32, _v: &i32| r.set(*k))),
        );
        collection.remove(&1);
        assert_eq!(removed.get(), 1);
        assert!(collection.is_empty());
    }
}
