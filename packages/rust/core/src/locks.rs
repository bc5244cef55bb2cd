//! Sharded mutual exclusion keyed by request identifiers.
//!
//! Each identifier (email or phone) hashes to one of a fixed set of async
//! mutexes. A request locks the shards of every identifier it carries, in
//! ascending shard order, so two requests with overlapping identifiers are
//! serialized and can never deadlock on each other.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use contactlink_shared::IdentifyRequest;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// Fixed pool of identifier lock shards.
pub struct IdentifierLocks {
    shards: Vec<Arc<Mutex<()>>>,
}

/// Held shard locks for one request; released on drop.
pub struct IdentifierGuard {
    shards: Vec<usize>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl IdentifierGuard {
    /// Shard indices held, ascending.
    pub fn shards(&self) -> &[usize] {
        &self.shards
    }
}

impl IdentifierLocks {
    /// Create `shard_count` shards (at least one).
    pub fn new(shard_count: usize) -> Self {
        let shards = (0..shard_count.max(1))
            .map(|_| Arc::new(Mutex::new(())))
            .collect();
        Self { shards }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Normalized lock keys for the identifiers present in `request`.
    pub fn lock_keys(request: &IdentifyRequest) -> Vec<String> {
        let mut keys = Vec::with_capacity(2);
        if let Some(email) = &request.email {
            keys.push(format!("email:{}", email.trim().to_lowercase()));
        }
        if let Some(phone) = &request.phone_number {
            let digits: String = phone
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '+')
                .collect();
            let key = if digits.is_empty() {
                phone.trim().to_lowercase()
            } else {
                digits
            };
            keys.push(format!("phone:{key}"));
        }
        keys
    }

    /// Shard index for a single key.
    pub fn shard_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    /// Lock every shard touched by `request`'s identifiers.
    pub async fn acquire(&self, request: &IdentifyRequest) -> IdentifierGuard {
        let mut shards: Vec<usize> = Self::lock_keys(request)
            .iter()
            .map(|key| self.shard_for(key))
            .collect();
        shards.sort_unstable();
        shards.dedup();

        let mut guards = Vec::with_capacity(shards.len());
        for &idx in &shards {
            guards.push(self.shards[idx].clone().lock_owned().await);
        }
        trace!(?shards, "identifier locks acquired");

        IdentifierGuard {
            shards,
            _guards: guards,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request(email: Option<&str>, phone: Option<&str>) -> IdentifyRequest {
        IdentifyRequest::new(email.map(String::from), phone.map(String::from))
    }

    #[test]
    fn keys_are_normalized() {
        let keys = IdentifierLocks::lock_keys(&request(Some(" A@X.com"), Some("+1 (111) 22")));
        assert_eq!(keys, vec!["email:a@x.com", "phone:+111122"]);
        assert!(IdentifierLocks::lock_keys(&request(None, None)).is_empty());
    }

    #[test]
    fn shard_count_is_at_least_one() {
        let locks = IdentifierLocks::new(0);
        assert_eq!(locks.shard_count(), 1);
        assert_eq!(locks.shard_for("email:a@x.com"), 0);
    }

    #[tokio::test]
    async fn guard_shards_are_sorted_and_unique() {
        let locks = IdentifierLocks::new(1);
        let guard = locks.acquire(&request(Some("a@x.com"), Some("111"))).await;
        assert_eq!(guard.shards(), &[0]);
    }

    #[tokio::test]
    async fn shared_identifier_blocks_until_release() {
        let locks = Arc::new(IdentifierLocks::new(16));
        let guard = locks.acquire(&request(Some("a@x.com"), None)).await;

        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _g = locks.acquire(&request(Some("a@x.com"), Some("999"))).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .expect("contender acquires after release")
            .expect("task");
    }

    #[tokio::test]
    async fn disjoint_identifiers_do_not_block() {
        let locks = IdentifierLocks::new(1024);
        let a = request(Some("a@x.com"), None);
        let shard_a = locks.shard_for("email:a@x.com");
        let other = (0..100)
            .map(|i| format!("user{i}@x.com"))
            .find(|e| locks.shard_for(&format!("email:{e}")) != shard_a)
            .expect("some email lands on another shard");
        let b = request(Some(other.as_str()), None);

        let _guard = locks.acquire(&a).await;
        tokio::time::timeout(Duration::from_millis(200), locks.acquire(&b))
            .await
            .expect("disjoint request proceeds");
    }
}
