//! Time-bounded upload locks keyed by content hash.
//!
//! A hash is *held* while its upload is being processed. When the guard is
//! dropped the lock is not removed right away: it stays in place until a grace
//! deadline passes, so a client retry arriving moments later is still treated
//! as in flight. Expired entries count as free and are purged by [`UploadLocks::sweep`].
//!
//! Time comes from a [`Clock`], which lets tests move time forward by hand.

use crate::content_hash::ContentHash;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default delay between finishing an upload and freeing its hash.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(500);

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset_ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.offset_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockState {
    Held,
    /// Released, but still locked until the deadline.
    Releasing(Instant),
}

impl LockState {
    fn is_active(&self, now: Instant) -> bool {
        match self {
            LockState::Held => true,
            LockState::Releasing(deadline) => now < *deadline,
        }
    }
}

/// Registry of content hashes currently being ingested.
pub struct UploadLocks {
    locks: DashMap<ContentHash, LockState>,
    grace: Duration,
    clock: Arc<dyn Clock>,
}

impl UploadLocks {
    #[cfg(test)]
    pub fn new(grace: Duration) -> Self {
        Self::with_clock(grace, Arc::new(SystemClock))
    }

    pub fn with_clock(grace: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            locks: DashMap::new(),
            grace,
            clock,
        }
    }

    /// Lock `hash` unless it is already locked.
    ///
    /// The check and the insert happen under the same shard lock, so two
    /// callers racing on one hash cannot both get a guard.
    pub fn try_acquire(self: &Arc<Self>, hash: &ContentHash) -> Option<LockGuard> {
        let now = self.clock.now();
        match self.locks.entry(hash.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_active(now) {
                    return None;
                }
                entry.insert(LockState::Held);
            }
            Entry::Vacant(entry) => {
                entry.insert(LockState::Held);
            }
        }

        Some(LockGuard {
            locks: Arc::clone(self),
            hash: hash.clone(),
        })
    }

    #[cfg(test)]
    pub fn is_locked(&self, hash: &ContentHash) -> bool {
        let now = self.clock.now();
        self.locks
            .get(hash)
            .map(|state| state.is_active(now))
            .unwrap_or(false)
    }

    /// Number of hashes that are currently locked.
    pub fn active_count(&self) -> usize {
        let now = self.clock.now();
        self.locks.iter().filter(|e| e.value().is_active(now)).count()
    }

    /// Drop entries whose grace deadline has passed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.locks.len();
        self.locks.retain(|_, state| state.is_active(now));
        before.saturating_sub(self.locks.len())
    }

    fn release(&self, hash: &ContentHash) {
        let deadline = self.clock.now() + self.grace;
        if let Some(mut state) = self.locks.get_mut(hash) {
            *state = LockState::Releasing(deadline);
        }
    }
}

/// Exclusive claim on a content hash. Dropping it starts the grace window.
#[must_use = "the hash is released as soon as the guard is dropped"]
pub struct LockGuard {
    locks: Arc<UploadLocks>,
    hash: ContentHash,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.locks.release(&self.hash);
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").field("hash", &self.hash).finish()
    }
}
