//! Bounded in-process fallback tier
//!
//! A small least-recently-used byte store that absorbs cache traffic while
//! the durable tier is unreachable. Capacity-bounded so a long outage cannot
//! grow memory without limit.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub struct MemoryTier {
    capacity: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    entries: HashMap<String, Vec<u8>>,
    // Recency order, least-recent at the front
    order: VecDeque<String>,
}

impl MemoryTier {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    pub fn insert(&self, key: &str, value: Vec<u8>) {
        let mut inner = self.inner.lock().expect("memory tier poisoned");

        if inner.entries.insert(key.to_string(), value).is_some() {
            Self::bump(&mut inner, key);
        } else {
            inner.order.push_back(key.to_string());
        }

        while inner.entries.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().expect("memory tier poisoned");
        let value = inner.entries.get(key).cloned()?;
        Self::bump(&mut inner, key);
        Some(value)
    }

    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.lock().expect("memory tier poisoned");
        if inner.entries.remove(key).is_some() {
            inner.order.retain(|k| k != key);
        }
    }

    /// Remove every key starting with `prefix`, returning how many went
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.inner.lock().expect("memory tier poisoned");
        let doomed: Vec<String> = inner
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &doomed {
            inner.entries.remove(key);
        }
        inner.order.retain(|k| !k.starts_with(prefix));
        doomed.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("memory tier poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bump(inner: &mut Inner, key: &str) {
        inner.order.retain(|k| k != key);
        inner.order.push_back(key.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_roundtrip() {
        let tier = MemoryTier::new(4);
        tier.insert("a", vec![1, 2, 3]);
        assert_eq!(tier.get("a"), Some(vec![1, 2, 3]));
        assert_eq!(tier.get("b"), None);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let tier = MemoryTier::new(2);
        tier.insert("a", vec![1]);
        tier.insert("b", vec![2]);

        // Touch "a" so "b" is now least recent
        tier.get("a");
        tier.insert("c", vec![3]);

        assert_eq!(tier.len(), 2);
        assert!(tier.get("b").is_none());
        assert!(tier.get("a").is_some());
        assert!(tier.get("c").is_some());
    }

    #[test]
    fn test_reinsert_replaces_value() {
        let tier = MemoryTier::new(2);
        tier.insert("a", vec![1]);
        tier.insert("a", vec![9]);
        assert_eq!(tier.get("a"), Some(vec![9]));
        assert_eq!(tier.len(), 1);
    }

    #[test]
    fn test_remove_prefix() {
        let tier = MemoryTier::new(8);
        tier.insert("tx:mint1:wallet1:swap", vec![1]);
        tier.insert("tx:mint1:wallet2:swap", vec![2]);
        tier.insert("tx:mint2:wallet1:swap", vec![3]);

        let removed = tier.remove_prefix("tx:mint1:");
        assert_eq!(removed, 2);
        assert_eq!(tier.len(), 1);
        assert!(tier.get("tx:mint2:wallet1:swap").is_some());
    }
}
