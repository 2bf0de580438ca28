//! A single bus connection and its lifecycle.

use super::transport::{ErrorCallback, MessageCallback, SubscriptionId, Transport, TransportFactory};
use super::{ConnectionDescriptor, ConnectionEvent, ConnectionKey, State};
use crate::error::{LedgerError, Result};
use crate::events::Listeners;
use crate::marshal::{Marshaller, Message};
use crate::subjects;
use crate::types::{Record, SequenceGenerator};
use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Where transport threads post the records they build.
///
/// Records are constructed on the delivering thread and handed off through
/// the channel without blocking; filing them into the ledger happens on
/// whichever thread drains the receiver. A full bounded queue drops the
/// record.
#[derive(Clone)]
pub struct Inbound {
    pub sequence: Arc<SequenceGenerator>,
    pub marshaller: Arc<dyn Marshaller>,
    pub sender: Sender<Arc<Record>>,
}

impl Inbound {
    fn deliver(&self, message: Message, connection: &Arc<RvConnection>) {
        match Record::new(&self.sequence, &*self.marshaller, message, Some(connection)) {
            Ok(record) => match self.sender.try_send(Arc::new(record)) {
                Ok(()) => {}
                Err(TrySendError::Full(record)) => {
                    warn!(connection = %connection.key, sequence = %record.sequence(), "inbound queue full, message dropped");
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!(connection = %connection.key, "inbound queue closed, message dropped");
                }
            },
            Err(e) => error!(connection = %connection.key, error = %e, "failed to wrap message"),
        }
    }
}

/// What a connection gets from the registry it belongs to.
#[derive(Clone)]
pub(crate) struct Attachment {
    pub transports: Arc<dyn TransportFactory>,
    pub inbound: Inbound,
    pub events: Arc<Listeners<ConnectionEvent>>,
}

struct Inner {
    description: String,
    subjects: BTreeSet<String>,
    attachment: Option<Attachment>,
    transport: Option<Box<dyn Transport>>,
    listeners: HashMap<String, SubscriptionId>,
}

/// One connection to the bus.
pub struct RvConnection {
    key: ConnectionKey,
    state: AtomicU8,
    inner: Mutex<Inner>,
}

impl RvConnection {
    pub fn new(key: ConnectionKey, description: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            key,
            state: AtomicU8::new(State::Stopped as u8),
            inner: Mutex::new(Inner {
                description: description.into(),
                subjects: BTreeSet::new(),
                attachment: None,
                transport: None,
                listeners: HashMap::new(),
            }),
        })
    }

    /// Build an unregistered connection from its persistent form.
    pub fn from_descriptor(descriptor: &ConnectionDescriptor) -> Result<Arc<Self>> {
        let connection = Self::new(descriptor.key.clone(), descriptor.description.clone());
        for subject in &descriptor.subjects {
            connection.add_subject(subject)?;
        }
        Ok(connection)
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn description(&self) -> String {
        self.inner.lock().description.clone()
    }

    pub fn set_description(&self, description: impl Into<String>) {
        self.inner.lock().description = description.into();
    }

    /// Subscribed subjects, sorted.
    pub fn subjects(&self) -> Vec<String> {
        self.inner.lock().subjects.iter().cloned().collect()
    }

    pub fn is_registered(&self) -> bool {
        self.inner.lock().attachment.is_some()
    }

    pub fn descriptor(&self) -> ConnectionDescriptor {
        let inner = self.inner.lock();
        ConnectionDescriptor {
            key: self.key.clone(),
            description: inner.description.clone(),
            subjects: inner.subjects.iter().cloned().collect(),
        }
    }

    pub(crate) fn attach(&self, attachment: Attachment) -> bool {
        let mut inner = self.inner.lock();
        if inner.attachment.is_some() {
            return false;
        }
        inner.attachment = Some(attachment);
        true
    }

    pub(crate) fn detach(&self) {
        self.inner.lock().attachment = None;
    }

    fn set_state(&self, state: State, attachment: Option<&Attachment>) {
        self.state.store(state as u8, Ordering::SeqCst);
        info!(connection = %self.key, %state, "connection state changed");
        if let Some(attachment) = attachment {
            attachment.events.broadcast(ConnectionEvent::StateChanged {
                key: self.key.clone(),
                state,
            });
        }
    }

    fn report_error(key: &ConnectionKey, attachment: &Attachment, message: String) {
        error!(connection = %key, error = %message, "transport error");
        attachment.events.broadcast(ConnectionEvent::TransportError {
            key: key.clone(),
            message,
        });
    }

    // --- Lifecycle ---

    /// Start (or resume) delivering messages.
    ///
    /// Fails if the connection is not registered or already started. A
    /// transport that cannot be created is logged and reported as a
    /// [`ConnectionEvent::TransportError`]; the connection stays stopped.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut inner = self.inner.lock();
        let attachment = inner.attachment.clone().ok_or_else(|| {
            LedgerError::IllegalState(format!("connection {} is not registered", self.key))
        })?;

        match self.state() {
            State::Started => Err(LedgerError::IllegalState(format!(
                "connection {} is already started",
                self.key
            ))),
            State::Paused => {
                self.set_state(State::Started, Some(&attachment));
                Ok(())
            }
            State::Stopped => {
                let on_error = self.error_callback(&attachment);
                let mut transport = match attachment.transports.create(&self.key, on_error) {
                    Ok(transport) => transport,
                    Err(e) => {
                        Self::report_error(&self.key, &attachment, e.to_string());
                        return Ok(());
                    }
                };

                self.set_state(State::Started, Some(&attachment));

                let mut listeners = HashMap::new();
                for subject in &inner.subjects {
                    if let Some(id) = self.listen(transport.as_mut(), subject, &attachment) {
                        listeners.insert(subject.clone(), id);
                    }
                }
                inner.listeners = listeners;
                inner.transport = Some(transport);
                Ok(())
            }
        }
    }

    /// Stop handing messages on without tearing down subscriptions.
    ///
    /// Messages that arrive while paused are discarded.
    pub fn pause(&self) -> Result<()> {
        let inner = self.inner.lock();
        if self.state() != State::Started {
            return Err(LedgerError::IllegalState(format!(
                "connection {} is {}, not started",
                self.key,
                self.state()
            )));
        }
        self.set_state(State::Paused, inner.attachment.as_ref());
        Ok(())
    }

    /// Destroy every subscription and the transport. No-op when stopped.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if self.state() == State::Stopped {
            return;
        }

        if let Some(mut transport) = inner.transport.take() {
            for (_, id) in inner.listeners.drain() {
                transport.unsubscribe(id);
            }
            transport.destroy();
        }
        inner.listeners.clear();

        self.set_state(State::Stopped, inner.attachment.as_ref());
    }

    // --- Subjects ---

    /// Subscribe to `subject` (wildcards allowed).
    ///
    /// Returns false if already subscribed. While stopped, the listener is
    /// only created on the next start.
    pub fn add_subject(self: &Arc<Self>, subject: &str) -> Result<bool> {
        subjects::validate(subject, true)?;

        let mut inner = self.inner.lock();
        if !inner.subjects.insert(subject.to_string()) {
            return Ok(false);
        }

        if self.state() != State::Stopped {
            let attachment = inner.attachment.clone();
            let inner = &mut *inner;
            if let (Some(transport), Some(attachment)) = (inner.transport.as_mut(), attachment) {
                if let Some(id) = self.listen(transport.as_mut(), subject, &attachment) {
                    inner.listeners.insert(subject.to_string(), id);
                }
            }
        }
        Ok(true)
    }

    pub fn remove_subject(&self, subject: &str) -> bool {
        let mut inner = self.inner.lock();
        if !inner.subjects.remove(subject) {
            return false;
        }

        let inner = &mut *inner;
        if let Some(id) = inner.listeners.remove(subject) {
            if let Some(transport) = inner.transport.as_mut() {
                transport.unsubscribe(id);
            }
        }
        true
    }

    /// Send a message on this connection's transport.
    pub fn publish(&self, message: &Message) -> Result<()> {
        let inner = self.inner.lock();
        match inner.transport.as_ref() {
            Some(transport) => transport.publish(message),
            None => Err(LedgerError::IllegalState(format!(
                "connection {} is stopped",
                self.key
            ))),
        }
    }

    fn listen(
        self: &Arc<Self>,
        transport: &mut dyn Transport,
        subject: &str,
        attachment: &Attachment,
    ) -> Option<SubscriptionId> {
        match transport.subscribe(subject, self.message_callback(&attachment.inbound)) {
            Ok(id) => {
                debug!(connection = %self.key, subject, "listening");
                Some(id)
            }
            Err(e) => {
                Self::report_error(
                    &self.key,
                    attachment,
                    format!("cannot subscribe to {}: {}", subject, e),
                );
                None
            }
        }
    }

    fn message_callback(self: &Arc<Self>, inbound: &Inbound) -> MessageCallback {
        let connection: Weak<RvConnection> = Arc::downgrade(self);
        let inbound = inbound.clone();
        Arc::new(move |message| {
            let Some(connection) = connection.upgrade() else {
                return;
            };
            if connection.state() != State::Started {
                return;
            }
            inbound.deliver(message, &connection);
        })
    }

    fn error_callback(&self, attachment: &Attachment) -> ErrorCallback {
        let key = self.key.clone();
        let attachment = attachment.clone();
        Arc::new(move |message| Self::report_error(&key, &attachment, message))
    }
}

impl PartialEq for RvConnection {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for RvConnection {}

impl std::fmt::Debug for RvConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RvConnection")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}
