//! Bounded, insertion-ordered LRU maps.
//!
//! Used for recently-posted reply targets and origin/peer id pairs
//! when the durable store is not worth a round-trip, and for
//! validated-sender-name memoization on the XP side.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::Hash;

/// Insertion-ordered map of configured capacity `N`. `get` bumps
/// recency; `add` inserts or updates and bumps recency, evicting the
/// least-recently-used entry on overflow.
#[derive(Debug)]
pub struct LruCache<K, V> {
    capacity: usize,
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Looks up `key`, bumping it to most-recently-used on a hit.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.map.contains_key(key) {
            self.touch(key);
            self.map.get(key)
        } else {
            tracing::debug!("cache miss");
            None
        }
    }

    /// Inserts or overwrites `key`, bumping recency and evicting the
    /// least-recently-used entry if capacity is now exceeded.
    pub fn add(&mut self, key: K, value: V) {
        if self.map.insert(key.clone(), value).is_some() {
            self.order.retain(|existing| existing != &key);
        }
        self.order.push_back(key);

        if self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.map.remove(&evicted);
            }
        }
    }

    fn touch(&mut self, key: &K) {
        if let Some(position) = self.order.iter().position(|existing| existing == key) {
            if let Some(found) = self.order.remove(position) {
                self.order.push_back(found);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// The pair of LRU caches the outbound handlers consult before a
/// durable lookup: recently posted reply bodies, and recently
/// forwarded origin/peer id pairs.
pub struct Cache {
    reply_map: LruCache<String, String>,
    message_ids: LruCache<String, String>,
}

impl Cache {
    pub fn new(capacity: usize) -> Self {
        Self {
            reply_map: LruCache::new(capacity),
            message_ids: LruCache::new(capacity),
        }
    }

    pub fn reply_map(&mut self) -> &mut LruCache<String, String> {
        &mut self.reply_map
    }

    pub fn message_ids(&mut self) -> &mut LruCache<String, String> {
        &mut self.message_ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_none_for_missing_key() {
        let mut cache: LruCache<String, String> = LruCache::new(2);
        assert_eq!(cache.get(&"missing".to_string()), None);
    }

    #[test]
    fn add_then_get_round_trips() {
        let mut cache = LruCache::new(2);
        cache.add("k".to_string(), "v".to_string());
        assert_eq!(cache.get(&"k".to_string()), Some(&"v".to_string()));
    }

    #[test]
    fn add_overwrites_existing_key() {
        let mut cache = LruCache::new(2);
        cache.add("k".to_string(), "v1".to_string());
        cache.add("k".to_string(), "v2".to_string());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"k".to_string()), Some(&"v2".to_string()));
    }

    #[test]
    fn overflow_evicts_least_recently_used() {
        let mut cache = LruCache::new(2);
        cache.add("a".to_string(), "1".to_string());
        cache.add("b".to_string(), "2".to_string());
        cache.add("c".to_string(), "3".to_string());

        assert_eq!(cache.get(&"a".to_string()), None);
        assert_eq!(cache.get(&"b".to_string()), Some(&"2".to_string()));
        assert_eq!(cache.get(&"c".to_string()), Some(&"3".to_string()));
    }

    #[test]
    fn get_bumps_recency_protecting_from_eviction() {
        let mut cache = LruCache::new(2);
        cache.add("a".to_string(), "1".to_string());
        cache.add("b".to_string(), "2".to_string());
        // touch "a" so "b" becomes the least-recently-used entry.
        cache.get(&"a".to_string());
        cache.add("c".to_string(), "3".to_string());

        assert_eq!(cache.get(&"b".to_string()), None);
        assert_eq!(cache.get(&"a".to_string()), Some(&"1".to_string()));
        assert_eq!(cache.get(&"c".to_string()), Some(&"3".to_string()));
    }

    #[test]
    fn capacity_zero_is_clamped_to_one() {
        let mut cache = LruCache::new(0);
        cache.add("a".to_string(), "1".to_string());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn cache_reply_map_and_message_ids_are_independent() {
        let mut cache = Cache::new(4);
        cache.reply_map().add("hi".to_string(), "42".to_string());
        assert_eq!(cache.message_ids().get(&"hi".to_string()), None);
        assert_eq!(
            cache.reply_map().get(&"hi".to_string()),
            Some(&"42".to_string())
        );
    }
}
