//! Per-user, per-cycle leases.
//!
//! A cycle runs only while it holds the lease for its `(user, kind)` pair.
//! The lease is released when the guard drops. A lease older than its TTL
//! counts as abandoned and may be taken over; the stale guard then no
//! longer releases anything.

use parking_lot::Mutex;
use relist_core::UserId;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// The two independently scheduled cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CycleKind {
    Discovery,
    Sync,
}

impl CycleKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Sync => "sync",
        }
    }
}

impl fmt::Display for CycleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct Held {
    token: u64,
    acquired_at: Instant,
}

type LeaseMap = HashMap<(UserId, CycleKind), Held>;

/// In-process lease table.
#[derive(Debug, Clone)]
pub struct LeaseRegistry {
    leases: Arc<Mutex<LeaseMap>>,
    next_token: Arc<AtomicU64>,
    ttl: Duration,
}

impl LeaseRegistry {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            leases: Arc::new(Mutex::new(HashMap::new())),
            next_token: Arc::new(AtomicU64::new(1)),
            ttl,
        }
    }

    /// Takes the lease, or returns `None` while another holder's lease is
    /// still within its TTL.
    #[must_use]
    pub fn try_acquire(&self, user_id: UserId, kind: CycleKind) -> Option<LeaseGuard> {
        let now = Instant::now();
        let mut leases = self.leases.lock();

        if let Some(held) = leases.get(&(user_id, kind)) {
            if now.duration_since(held.acquired_at) < self.ttl {
                return None;
            }
            tracing::warn!(user_id = %user_id, kind = %kind, "taking over expired lease");
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        leases.insert((user_id, kind), Held { token, acquired_at: now });

        Some(LeaseGuard {
            leases: Arc::clone(&self.leases),
            key: (user_id, kind),
            token,
        })
    }

    /// Returns true if a live lease exists for the pair.
    #[must_use]
    pub fn is_held(&self, user_id: UserId, kind: CycleKind) -> bool {
        self.leases
            .lock()
            .get(&(user_id, kind))
            .is_some_and(|held| held.acquired_at.elapsed() < self.ttl)
    }
}

/// Releases its lease on drop.
#[derive(Debug)]
pub struct LeaseGuard {
    leases: Arc<Mutex<LeaseMap>>,
    key: (UserId, CycleKind),
    token: u64,
}

impl LeaseGuard {
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.key.0
    }

    #[must_use]
    pub fn kind(&self) -> CycleKind {
        self.key.1
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let mut leases = self.leases.lock();
        if leases.get(&self.key).is_some_and(|held| held.token == self.token) {
            leases.remove(&self.key);
        }
    }
}
