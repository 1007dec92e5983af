//! Listener registry with explicit, cancellable handles.
//!
//! Every `subscribe` hands back a [`Subscription`] paired with a receiver;
//! cancelling (or dropping) the handle detaches the listener, so pairing
//! each subscribe with an unsubscribe is enforced by ownership rather than
//! by caller discipline.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use shared::domain::RoomId;
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Slot<T> {
    room: Option<RoomId>,
    sender: mpsc::UnboundedSender<T>,
}

type Slots<T> = Mutex<HashMap<u64, Slot<T>>>;

/// One category of events (messages, history, typing, ...), fanned out to
/// any number of listeners, each optionally filtered to a single room.
pub(crate) struct Topic<T> {
    slots: Arc<Slots<T>>,
    next_id: AtomicU64,
}

impl<T: Clone + Send + 'static> Topic<T> {
    pub(crate) fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a listener. `room: None` receives every event on the topic.
    pub(crate) fn subscribe(
        &self,
        room: Option<RoomId>,
    ) -> (Subscription, mpsc::UnboundedReceiver<T>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        lock(&self.slots).insert(id, Slot { room, sender });

        let slots = Arc::downgrade(&self.slots);
        let detach = Box::new(move |id: u64| {
            if let Some(slots) = slots.upgrade() {
                lock(&slots).remove(&id);
            }
        });
        (Subscription { id, detach }, receiver)
    }

    /// Deliver to listeners whose filter matches `room`; listeners whose
    /// receiver has gone away are pruned in passing.
    pub(crate) fn publish(&self, room: Option<&RoomId>, event: T) {
        lock(&self.slots).retain(|_, slot| {
            let matches = match (&slot.room, room) {
                (Some(filter), Some(room)) => filter == room,
                (Some(_), None) => false,
                (None, _) => true,
            };
            if !matches {
                return true;
            }
            slot.sender.send(event.clone()).is_ok()
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        lock(&self.slots).len()
    }
}

/// Handle to an active listener registration.
///
/// Dropping the handle detaches the listener; [`Subscription::cancel`] says
/// so explicitly at the call site. Nothing is delivered after detach, even
/// if the server keeps pushing events for the room.
pub struct Subscription {
    id: u64,
    detach: Box<dyn Fn(u64) + Send + Sync>,
}

impl Subscription {
    /// Detach the listener now.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        (self.detach)(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
