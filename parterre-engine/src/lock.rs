use std::sync::Arc;
use std::time::Duration;

use parterre_store::RedisClient;
use rand::Rng;
use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("timed out acquiring lock {key}")]
    Timeout { key: String },

    #[error(transparent)]
    Store(#[from] redis::RedisError),
}

#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Key expiration; callers must finish their critical section well
    /// inside this window.
    pub ttl_seconds: u64,
    /// Floor for the delay between contention retries.
    pub retry_delay: Duration,
    /// Total budget for one acquisition attempt.
    pub max_wait: Duration,
}

/// Proof of ownership for one held lock. Must be handed back to
/// [`LockManager::release`]; the token guards against deleting a lock that
/// expired and was re-acquired by someone else.
#[derive(Debug)]
pub struct LockGuard {
    key: String,
    token: String,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Guards for a multi-key acquisition, released in reverse order.
#[derive(Debug, Default)]
pub struct MultiLockGuard {
    guards: Vec<LockGuard>,
}

impl MultiLockGuard {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

/// Distributed mutual exclusion over string keys: SET-if-absent with TTL to
/// acquire, server-side compare-and-delete to release.
#[derive(Clone)]
pub struct LockManager {
    redis: Arc<RedisClient>,
    config: LockConfig,
}

impl LockManager {
    pub fn new(redis: Arc<RedisClient>, config: LockConfig) -> Self {
        Self { redis, config }
    }

    /// Acquire a single lock, retrying with jittered backoff until
    /// `max_wait` elapses.
    pub async fn acquire(&self, key: &str) -> Result<LockGuard, LockError> {
        let lock_key = format!("lock:{key}");
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + self.config.max_wait;

        loop {
            if self.redis.set_if_absent(&lock_key, &token, self.config.ttl_seconds).await? {
                return Ok(LockGuard { key: lock_key, token });
            }

            let delay = jittered(self.config.retry_delay);
            if Instant::now() + delay >= deadline {
                return Err(LockError::Timeout { key: lock_key });
            }
            tokio::time::sleep(delay).await;
        }
    }

    /// Release a held lock. Lost ownership (TTL lapsed, key re-acquired) is
    /// tolerated and logged.
    pub async fn release(&self, guard: LockGuard) {
        match self.redis.compare_and_delete(&guard.key, &guard.token).await {
            Ok(true) => {}
            Ok(false) => warn!(key = %guard.key, "released lock no longer owned"),
            Err(e) => warn!(key = %guard.key, error = %e, "failed to release lock"),
        }
    }

    /// Acquire every key, in lexicographic order so overlapping callers
    /// always contend on a common prefix and circular waits cannot form. On
    /// any failure the already-held locks are released in reverse order and
    /// the whole attempt fails.
    pub async fn acquire_all(&self, keys: &[String]) -> Result<MultiLockGuard, LockError> {
        let ordered = sorted_unique(keys);
        let mut held = MultiLockGuard::default();

        for key in &ordered {
            match self.acquire(key).await {
                Ok(guard) => held.guards.push(guard),
                Err(e) => {
                    self.release_all(held).await;
                    return Err(e);
                }
            }
        }
        Ok(held)
    }

    pub async fn release_all(&self, mut guard: MultiLockGuard) {
        while let Some(single) = guard.guards.pop() {
            self.release(single).await;
        }
    }
}

/// Lock keys for a set of seats.
pub fn seat_lock_keys(seat_ids: &[i64]) -> Vec<String> {
    seat_ids.iter().map(|id| format!("seat:{id}")).collect()
}

fn sorted_unique(keys: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> = keys.to_vec();
    ordered.sort();
    ordered.dedup();
    ordered
}

/// `base` plus up to 50% random jitter, so contending clients spread out.
fn jittered(base: Duration) -> Duration {
    let extra_ms = rand::thread_rng().gen_range(0..=base.as_millis().max(1) as u64 / 2);
    base + Duration::from_millis(extra_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_sorted_and_deduped() {
        let keys = vec![
            "seat:9".to_string(),
            "seat:10".to_string(),
            "seat:9".to_string(),
            "seat:2".to_string(),
        ];
        let ordered = sorted_unique(&keys);
        assert_eq!(ordered, vec!["seat:10", "seat:2", "seat:9"]);
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..50 {
            let d = jittered(base);
            assert!(d >= base);
            assert!(d <= base + Duration::from_millis(50));
        }
    }

    #[test]
    fn test_seat_lock_keys() {
        assert_eq!(seat_lock_keys(&[7, 3]), vec!["seat:7", "seat:3"]);
    }
}
