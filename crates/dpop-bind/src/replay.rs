//! Replay protection for DPoP proofs
//!
//! Every accepted proof's `jti` is recorded once and held until the proof's own
//! `exp`. A second presentation of the same `jti` before then is a replay.
//!
//! ```text
//!  record_until("a", exp) ─┐
//!                          ▼
//!      ┌─────────────── Mutex ───────────────┐
//!      │ HashMap<jti, expires_at>  O(1) hit  │
//!      │ VecDeque<(jti, expires_at)>  FIFO   │
//!      └─────────────────────────────────────┘
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};

use crate::{
    config::DpopConfig, Result, DEFAULT_REPLAY_CACHE_CAPACITY, MAX_CLOCK_SKEW_SECONDS,
    MAX_PROOF_LIFETIME_SECONDS,
};

/// Retention for identifiers recorded without a known expiry
const DEFAULT_RETENTION_SECONDS: i64 = MAX_PROOF_LIFETIME_SECONDS + MAX_CLOCK_SKEW_SECONDS;

/// Storage seam for seen proof identifiers
///
/// Implementations must make [`check_and_record`](ReplayCache::check_and_record)
/// atomic: when several callers race on one `jti`, exactly one sees `true`.
pub trait ReplayCache: Send + Sync + fmt::Debug {
    /// Record `jti` as seen at `now`, holding it at least until `expires_at`
    ///
    /// Both times are Unix seconds; `expires_at` is the proof's `exp`. Returns
    /// `false` if the identifier was already recorded.
    fn check_and_record(&self, jti: &str, expires_at: i64, now: i64) -> Result<bool>;

    /// Issue a fresh server nonce
    fn generate_nonce(&self) -> String {
        random_identifier()
    }
}

/// Bounded in-memory replay cache
///
/// Once `capacity` identifiers are held, the oldest is evicted to admit the
/// newest. Each entry lives until the `exp` of the proof that carried it; a
/// validator rejects any proof past its `exp` before consulting the cache, so
/// dropping the entry then cannot admit a replay whatever clock skew the
/// validator allows. Expired entries at the head of the queue are dropped lazily
/// on each insert; [`purge_expired`](Self::purge_expired) sweeps all of them.
#[derive(Debug)]
pub struct ReplayGuard {
    state: Mutex<ReplayState>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct ReplayState {
    seen: HashMap<String, i64>,
    order: VecDeque<(String, i64)>,
}

impl ReplayState {
    fn remove_oldest(&mut self) -> bool {
        match self.order.pop_front() {
            Some((jti, _)) => {
                self.seen.remove(&jti);
                true
            }
            None => false,
        }
    }

    fn purge_expired_head(&mut self, now: i64) {
        while matches!(self.order.front(), Some((_, expires_at)) if *expires_at < now) {
            self.remove_oldest();
        }
    }

    fn purge_expired(&mut self, now: i64) -> usize {
        let before = self.order.len();
        let seen = &mut self.seen;
        self.order.retain(|(jti, expires_at)| {
            let live = *expires_at >= now;
            if !live {
                seen.remove(jti);
            }
            live
        });
        before - self.order.len()
    }
}

impl ReplayGuard {
    /// Create a guard holding at most `capacity` identifiers (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(ReplayState {
                seen: HashMap::with_capacity(capacity.min(1024)),
                order: VecDeque::with_capacity(capacity.min(1024)),
            }),
            capacity,
        }
    }

    /// Create a guard sized from `config`
    pub fn from_config(config: &DpopConfig) -> Self {
        Self::new(config.replay_cache_capacity)
    }

    /// Atomically check and record `jti` at the current time
    ///
    /// The identifier is held for the proof lifetime plus the default clock skew.
    /// Returns `false` when it has already been seen, in which case the caller
    /// rejects the proof as a replay.
    pub fn record_if_new(&self, jti: &str) -> bool {
        self.record_if_new_at(jti, Utc::now().timestamp())
    }

    /// [`record_if_new`](Self::record_if_new) with an explicit clock
    pub fn record_if_new_at(&self, jti: &str, now: i64) -> bool {
        self.record_until_at(jti, now.saturating_add(DEFAULT_RETENTION_SECONDS), now)
    }

    /// Atomically check and record `jti`, holding it until `expires_at`
    pub fn record_until(&self, jti: &str, expires_at: i64) -> bool {
        self.record_until_at(jti, expires_at, Utc::now().timestamp())
    }

    /// [`record_until`](Self::record_until) with an explicit clock
    pub fn record_until_at(&self, jti: &str, expires_at: i64, now: i64) -> bool {
        let mut state = self.state.lock();
        state.purge_expired_head(now);

        if state.seen.contains_key(jti) {
            tracing::warn!(jti = %jti, "Replay of previously seen DPoP proof identifier");
            return false;
        }

        while state.order.len() >= self.capacity {
            if !state.remove_oldest() {
                break;
            }
            tracing::trace!(capacity = self.capacity, "Replay cache full, evicted oldest entry");
        }

        state.seen.insert(jti.to_string(), expires_at);
        state.order.push_back((jti.to_string(), expires_at));
        true
    }

    /// Whether `jti` is currently held
    pub fn contains(&self, jti: &str) -> bool {
        self.state.lock().seen.contains_key(jti)
    }

    /// Issue a 128-bit random nonce, base64url encoded
    pub fn generate_nonce(&self) -> String {
        random_identifier()
    }

    /// Drop every entry past its expiry; returns how many
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now().timestamp())
    }

    /// [`purge_expired`](Self::purge_expired) with an explicit clock
    pub fn purge_expired_at(&self, now: i64) -> usize {
        let purged = self.state.lock().purge_expired(now);
        if purged > 0 {
            tracing::debug!(purged, "Purged expired replay cache entries");
        }
        purged
    }

    /// Number of identifiers currently held
    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    /// Whether no identifiers are held
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of identifiers held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forget every recorded identifier
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.seen.clear();
        state.order.clear();
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_CACHE_CAPACITY)
    }
}

impl ReplayCache for ReplayGuard {
    fn check_and_record(&self, jti: &str, expires_at: i64, now: i64) -> Result<bool> {
        Ok(self.record_until_at(jti, expires_at, now))
    }

    fn generate_nonce(&self) -> String {
        ReplayGuard::generate_nonce(self)
    }
}

/// 128 bits from the OS RNG, base64url without padding (22 characters)
pub(crate) fn random_identifier() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
