use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::envelope::Envelope;

/// A pending call's rendezvous slot.
enum Slot {
    /// A caller is waiting; delivering a reply sends it here.
    Waiting(oneshot::Sender<Envelope>),
    /// The caller gave up (timeout or cancellation) before a reply arrived.
    /// Kept as a tombstone so a straggling reply is recognised and dropped
    /// silently instead of being reported as an unknown correlation id.
    Abandoned,
}

/// The in-memory map from correlation id to pending-call rendezvous.
///
/// All operations run under a single synchronous [`Mutex`]: every critical
/// section here is an O(1) hash-map operation with no `.await` inside it,
/// so a synchronous mutex is strictly correct and avoids the overhead (and
/// cancellation-safety pitfalls) of an async one. The registry never
/// performs I/O and never blocks on broker activity.
pub(crate) struct Registry {
    slots: Mutex<HashMap<u32, Slot>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Registers `id` as awaiting a reply on `tx`. Overwrites any existing
    /// entry for `id` (a collision after the allocator wraps), orphaning
    /// whatever waiter held it.
    pub(crate) fn add(&self, id: u32, tx: oneshot::Sender<Envelope>) {
        let mut slots = self.slots.lock().expect("registry mutex poisoned");
        slots.insert(id, Slot::Waiting(tx));
    }

    /// Atomically looks up and removes the entry for `id`.
    pub(crate) fn take(&self, id: u32) -> Option<TakeOutcome> {
        let mut slots = self.slots.lock().expect("registry mutex poisoned");
        match slots.remove(&id) {
            Some(Slot::Waiting(tx)) => Some(TakeOutcome::Waiting(tx)),
            Some(Slot::Abandoned) => Some(TakeOutcome::Abandoned),
            None => None,
        }
    }

    /// Marks `id` as abandoned if it is still present. No-op if `id` is
    /// unknown (already delivered, or never registered).
    pub(crate) fn abandon(&self, id: u32) {
        let mut slots = self.slots.lock().expect("registry mutex poisoned");
        if let Some(slot) = slots.get_mut(&id) {
            *slot = Slot::Abandoned;
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().expect("registry mutex poisoned").len()
    }
}

pub(crate) enum TakeOutcome {
    Waiting(oneshot::Sender<Envelope>),
    Abandoned,
}
