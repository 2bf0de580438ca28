//! Change notifications.
//!
//! Every shared structure (ledger, subject hierarchy, record types,
//! connection registry, application) keeps a [`Listeners`] list. A listener
//! owns the receiving end of a bounded channel; slow listeners whose buffer
//! fills up are dropped rather than blocking the thread doing the mutation.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::warn;

/// Default max buffered events per listener.
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Unique identifier for a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Receiving side of a listener.
#[derive(Debug)]
pub struct EventHandle<E> {
    pub id: ListenerId,
    pub receiver: Receiver<E>,
}

impl<E> EventHandle<E> {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<E, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<E, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<E, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered.
    pub fn drain(&self) -> Vec<E> {
        self.receiver.try_iter().collect()
    }
}

/// A list of event listeners.
pub struct Listeners<E> {
    senders: RwLock<HashMap<ListenerId, Sender<E>>>,
    next_id: AtomicU64,
    buffer_size: usize,
}

impl<E: Clone> Listeners<E> {
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Register a new listener.
    pub fn subscribe(&self) -> EventHandle<E> {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.buffer_size);
        self.senders.write().insert(id, sender);
        EventHandle { id, receiver }
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.senders.write().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.senders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.read().is_empty()
    }

    /// Send an event to every listener. Drops listeners that fail to receive.
    pub fn broadcast(&self, event: E) {
        let mut to_remove = Vec::new();

        {
            let senders = self.senders.read();
            for (id, sender) in senders.iter() {
                match sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(listener = id.0, "dropping listener with full event buffer");
                        to_remove.push(*id);
                    }
                    Err(TrySendError::Disconnected(_)) => to_remove.push(*id),
                }
            }
        }

        if !to_remove.is_empty() {
            let mut senders = self.senders.write();
            for id in to_remove {
                senders.remove(&id);
            }
        }
    }
}

impl<E: Clone> Default for Listeners<E> {
    fn default() -> Self {
        Self::new()
    }
}
