//! Keyed TTL cache for leaderboard payloads.
//!
//! Entries expire lazily: `get` drops an entry once its deadline has passed,
//! and scoped invalidation removes every key under a string prefix. There is
//! no size bound; the key space is one entry per (subject, test, page, limit)
//! actually requested.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

pub const LEADERBOARD_NAMESPACE: &str = "leaderboard:";

pub trait CacheStore<V>: Send + Sync {
    fn get(&self, key: &str) -> Option<V>;

    fn set(&self, key: &str, value: V, ttl: Duration);

    /// Removes every live key starting with `prefix`, or everything when
    /// `prefix` is `None` or empty. Returns how many live entries were removed.
    fn invalidate(&self, prefix: Option<&str>) -> usize;
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

pub struct MemoryCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
}

impl<V> Default for MemoryCache<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> MemoryCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until they are touched.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<V: Clone + Send + Sync> CacheStore<V> for MemoryCache<V> {
    fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        let mut entries = self.entries.write();
        // re-check: a writer may have refreshed the key between the two locks
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    fn set(&self, key: &str, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key.to_string(), entry);
    }

    fn invalidate(&self, prefix: Option<&str>) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let mut removed = 0;

        entries.retain(|key, entry| {
            let in_scope = match prefix {
                Some(prefix) if !prefix.is_empty() => key.starts_with(prefix),
                _ => true,
            };
            if in_scope && !entry.is_expired(now) {
                removed += 1;
            }
            !in_scope && !entry.is_expired(now)
        });

        removed
    }
}

/// Escapes the key separator so `("A:B", "C")` and `("A", "B:C")` never share a key.
fn key_segment(raw: &str) -> String {
    raw.replace('%', "%25").replace(':', "%3A")
}

pub fn leaderboard_key(subject: &str, test_name: &str, page: u32, limit: u32) -> String {
    format!("{}p{page}:l{limit}", leaderboard_scope(subject, test_name))
}

/// Prefix covering every cached page of one (subject, test) leaderboard.
pub fn leaderboard_scope(subject: &str, test_name: &str) -> String {
    format!(
        "{LEADERBOARD_NAMESPACE}{}:{}:",
        key_segment(subject),
        key_segment(test_name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_round_trip_until_ttl_elapses() {
        let cache = MemoryCache::<u32>::new();
        cache.set("k", 7u32, Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(7));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.get("k"), Some(7));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_do_not_count_toward_invalidation() {
        let cache = MemoryCache::<u32>::new();
        cache.set("leaderboard:Math:T1:p1:l50", 1u32, Duration::from_secs(5));
        cache.set("leaderboard:Math:T1:p2:l50", 2u32, Duration::from_secs(120));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.invalidate(Some("leaderboard:Math:T1:")), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn prefix_invalidation_leaves_other_scopes() {
        let cache = MemoryCache::<&str>::new();
        let ttl = Duration::from_secs(60);
        cache.set(&leaderboard_key("Math", "T1", 1, 50), "a", ttl);
        cache.set(&leaderboard_key("Math", "T1", 2, 50), "b", ttl);
        cache.set(&leaderboard_key("Math", "T10", 1, 50), "c", ttl);
        cache.set(&leaderboard_key("Physics", "T1", 1, 50), "d", ttl);

        assert_eq!(cache.invalidate(Some(&leaderboard_scope("Math", "T1"))), 2);
        assert_eq!(cache.get(&leaderboard_key("Math", "T1", 1, 50)), None);
        assert_eq!(cache.get(&leaderboard_key("Math", "T10", 1, 50)), Some("c"));
        assert_eq!(cache.get(&leaderboard_key("Physics", "T1", 1, 50)), Some("d"));
    }

    #[tokio::test]
    async fn separators_inside_names_do_not_collide() {
        assert_ne!(
            leaderboard_key("A:B", "C", 1, 50),
            leaderboard_key("A", "B:C", 1, 50)
        );
        assert_ne!(leaderboard_scope("A%3AB", "C"), leaderboard_scope("A:B", "C"));

        let cache = MemoryCache::<&str>::new();
        let ttl = Duration::from_secs(60);
        cache.set(&leaderboard_key("A:B", "C", 1, 50), "first", ttl);
        cache.set(&leaderboard_key("A", "B:C", 1, 50), "second", ttl);

        assert_eq!(cache.get(&leaderboard_key("A", "B:C", 1, 50)), Some("second"));
        assert_eq!(cache.invalidate(Some(&leaderboard_scope("A", "B"))), 0);
        assert_eq!(cache.invalidate(Some(&leaderboard_scope("A:B", "C"))), 1);
        assert_eq!(cache.get(&leaderboard_key("A", "B:C", 1, 50)), Some("second"));
    }

    #[tokio::test]
    async fn empty_prefix_clears_everything() {
        let cache = MemoryCache::<u8>::new();
        cache.set("leaderboard:a", 1u8, Duration::from_secs(60));
        cache.set("other", 2u8, Duration::from_secs(60));

        assert_eq!(cache.invalidate(Some("")), 2);
        cache.set("other", 2u8, Duration::from_secs(60));
        assert_eq!(cache.invalidate(None), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn namespace_invalidation_keeps_foreign_keys() {
        let cache = MemoryCache::<u8>::new();
        cache.set(&leaderboard_key("Math", "T1", 1, 50), 1u8, Duration::from_secs(60));
        cache.set("performance:S1", 2u8, Duration::from_secs(60));

        assert_eq!(cache.invalidate(Some(LEADERBOARD_NAMESPACE)), 1);
        assert_eq!(cache.get("performance:S1"), Some(2));
    }
}
