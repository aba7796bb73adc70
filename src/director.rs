use std::time::Instant;

use ahash::HashMap;
use parking_lot::RwLock;

use codec::Address;

/// Soft cap on bytes buffered for a peer whose connection is still being
/// established. Submissions past the cap are dropped and reported through
/// the observer instead of growing without bound.
pub(crate) const PENDING_SOFT_CAP: usize = 1 << 20;

/// Snapshot of a live actor, as returned by `get_actor`.
#[derive(Debug, Clone, Copy)]
pub struct ActorInfo {
    /// The peer this actor talks to.
    pub peer: Address,
    /// When the actor joined the pool.
    pub since: Instant,
}

/// Actor registry shared between a director task and its handle.
///
/// The director task is the only writer. Handles read it for synchronous
/// `get_actor` lookups and for the server-side connected check, so neither
/// needs a round trip through the director's queue.
#[derive(Default)]
pub(crate) struct ActorTable {
    inner: RwLock<HashMap<Address, ActorInfo>>,
}

impl ActorTable {
    pub fn insert(&self, peer: Address) {
        self.inner.write().insert(
            peer,
            ActorInfo {
                peer,
                since: Instant::now(),
            },
        );
    }

    pub fn remove(&self, peer: &Address) {
        self.inner.write().remove(peer);
    }

    pub fn contains(&self, peer: &Address) -> bool {
        self.inner.read().contains_key(peer)
    }

    pub fn get(&self, peer: &Address) -> Option<ActorInfo> {
        self.inner.read().get(peer).copied()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

/// Sleep until `deadline`, or pend forever when there is none, so a
/// select branch can stay disarmed while no timer is scheduled.
pub(crate) async fn deadline_wait(deadline: Option<Instant>) -> Option<()> {
    match deadline {
        Some(at) => {
            tokio::time::sleep_until(at.into()).await;
            Some(())
        }
        None => None,
    }
}
