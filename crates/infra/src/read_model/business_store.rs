use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use fieldstock_core::BusinessId;

/// Business-isolated key/value store for disposable read models.
///
/// Keys never leak across businesses: every call is scoped by `business_id`.
pub trait BusinessStore<K, V>: Send + Sync {
    fn get(&self, business_id: BusinessId, key: &K) -> Option<V>;
    fn upsert(&self, business_id: BusinessId, key: K, value: V);
    fn remove(&self, business_id: BusinessId, key: &K) -> Option<V>;
    fn list(&self, business_id: BusinessId) -> Vec<V>;
    /// Clear all read-model records for a business (rebuild support).
    fn clear_business(&self, business_id: BusinessId);
}

impl<K, V, S> BusinessStore<K, V> for Arc<S>
where
    S: BusinessStore<K, V> + ?Sized,
{
    fn get(&self, business_id: BusinessId, key: &K) -> Option<V> {
        (**self).get(business_id, key)
    }

    fn upsert(&self, business_id: BusinessId, key: K, value: V) {
        (**self).upsert(business_id, key, value)
    }

    fn remove(&self, business_id: BusinessId, key: &K) -> Option<V> {
        (**self).remove(business_id, key)
    }

    fn list(&self, business_id: BusinessId) -> Vec<V> {
        (**self).list(business_id)
    }

    fn clear_business(&self, business_id: BusinessId) {
        (**self).clear_business(business_id)
    }
}

/// In-memory business-isolated store for tests/dev.
#[derive(Debug)]
pub struct InMemoryBusinessStore<K, V> {
    inner: RwLock<HashMap<(BusinessId, K), V>>,
}

impl<K, V> InMemoryBusinessStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryBusinessStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> BusinessStore<K, V> for InMemoryBusinessStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, business_id: BusinessId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(business_id, key.clone())).cloned()
    }

    fn upsert(&self, business_id: BusinessId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((business_id, key), value);
        }
    }

    fn remove(&self, business_id: BusinessId, key: &K) -> Option<V> {
        let mut map = self.inner.write().ok()?;
        map.remove(&(business_id, key.clone()))
    }

    fn list(&self, business_id: BusinessId) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.iter()
            .filter_map(|((b, _k), v)| if *b == business_id { Some(v.clone()) } else { None })
            .collect()
    }

    fn clear_business(&self, business_id: BusinessId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(b, _k), _v| *b != business_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_are_invisible_to_other_businesses() {
        let store: InMemoryBusinessStore<&'static str, i64> = InMemoryBusinessStore::new();
        let (a, b) = (BusinessId::new(), BusinessId::new());
        store.upsert(a, "CAP-45", 3);

        assert_eq!(store.get(a, &"CAP-45"), Some(3));
        assert_eq!(store.get(b, &"CAP-45"), None);
        assert!(store.list(b).is_empty());

        store.clear_business(b);
        assert_eq!(store.list(a), vec![3]);
        assert_eq!(store.remove(a, &"CAP-45"), Some(3));
        assert!(store.list(a).is_empty());
    }
}
