use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::bucket::BucketState;
use crate::bucket::BucketStore;
use crate::bucket::Transition;
use crate::bucket::TransitionArgs;
use crate::error::TransitionError;

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: BucketState,
    expires_at: f64,
}

/// An in-process [`BucketStore`].
///
/// Each transition runs while holding the map's lock for that key, which
/// gives the same per-key serialization a Redis script does. Idle expiry is
/// judged against the caller's clock, the way a store TTL would be.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: DashMap<String, Entry>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing (or regaining) the connection to the store.
    ///
    /// While offline every transition fails with [`TransitionError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    /// The persisted state for `key`, if present. Ignores expiry.
    pub fn bucket(&self, key: &str) -> Option<BucketState> {
        self.buckets.get(key).map(|entry| entry.state)
    }

    /// Drop every bucket idle past its TTL as of `now`.
    pub fn purge_expired(&self, now: f64) {
        self.buckets.retain(|_, entry| entry.expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn transition(
        &self,
        key: &str,
        args: &TransitionArgs,
    ) -> Result<Transition, TransitionError> {
        if self.is_offline() {
            return Err(TransitionError::Unavailable(
                "memory store is offline".to_string(),
            ));
        }

        let expires_at = args.now + args.idle_ttl.as_secs_f64();

        // The entry guard holds the shard lock until the state is written back.
        let mut entry = self.buckets.entry(key.to_string()).or_insert_with(|| Entry {
            state: BucketState::fresh(args),
            expires_at,
        });

        if entry.expires_at <= args.now {
            entry.state = BucketState::fresh(args);
        }

        let transition = entry.state.apply(args);
        entry.expires_at = expires_at;
        Ok(transition)
    }
}
