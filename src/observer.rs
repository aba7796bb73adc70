use codec::Address;

use crate::LinkError;

/// Receiver of actor lifecycle notifications.
///
/// Directors call these hooks synchronously with the transition that
/// produced them, on the director's own task, so an implementation sees
/// lifecycle events in the exact order they happened and must not block.
/// Every method defaults to doing nothing; an observer implements only the
/// events it cares about.
pub trait LinkObserver: Send + Sync {
    /// A new actor joined the director's pool.
    #[allow(unused_variables)]
    fn add_actor(&self, peer: &Address) {}

    /// An actor left the pool: closed, reaped idle, or failed.
    #[allow(unused_variables)]
    fn del_actor(&self, peer: &Address) {}

    /// An actor hit a per-peer error. Siblings are unaffected; whether the
    /// actor itself survives depends on the error kind.
    #[allow(unused_variables)]
    fn actor_error(&self, peer: &Address, error: &LinkError) {}
}

/// Observer that ignores every notification.
pub struct NullObserver;

impl LinkObserver for NullObserver {}
