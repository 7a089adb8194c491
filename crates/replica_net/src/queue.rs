//! Queues between the simulation thread and I/O tasks.
//!
//! The simulation never blocks on the network. Outgoing messages for a
//! session go through a single-producer/single-consumer queue ([`spsc`]):
//! the simulation thread is the only producer and the session's I/O task the
//! only consumer. Incoming traffic from every I/O task funnels into one
//! [`Inbound`] queue that the simulation drains at the start of a tick.

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::NetError;
use crate::messages::{ClientMessage, ServerMessage, SessionId};

/// Producing half of an SPSC queue. Deliberately not `Clone`.
#[derive(Debug)]
pub struct Producer<T> {
    tx: UnboundedSender<T>,
}

/// Consuming half of an SPSC queue.
#[derive(Debug)]
pub struct Consumer<T> {
    rx: UnboundedReceiver<T>,
}

/// Create a single-producer/single-consumer queue.
#[must_use]
pub fn spsc<T>() -> (Producer<T>, Consumer<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Producer { tx }, Consumer { rx })
}

impl<T> Producer<T> {
    /// Enqueue a value without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Closed`] if the consumer has been dropped.
    pub fn push(&self, value: T) -> Result<(), NetError> {
        self.tx.send(value).map_err(|_| NetError::Closed)
    }

    /// Returns `true` if the consumer has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> Consumer<T> {
    /// Wait for the next value. Returns `None` once the producer is gone
    /// and the queue is empty.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take every value currently queued without waiting.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(value) = self.rx.try_recv() {
            out.push(value);
        }
        out
    }
}

/// What happened on a session, as seen by the I/O layer.
#[derive(Debug)]
pub enum InboundKind {
    /// A new session connected. Carries the producing half of its outbox;
    /// the I/O task keeps the consumer.
    Connected(Producer<ServerMessage>),
    /// The session sent a message.
    Message(ClientMessage),
    /// The session went away.
    Disconnected,
}

/// One item of inbound traffic.
#[derive(Debug)]
pub struct Inbound {
    /// The session it concerns.
    pub session: SessionId,
    /// What happened.
    pub kind: InboundKind,
}

/// Cloneable producer for the shared inbound queue.
pub type InboundSender = UnboundedSender<Inbound>;

/// Consumer side of the inbound queue, owned by the simulation.
#[derive(Debug)]
pub struct InboundReceiver {
    rx: UnboundedReceiver<Inbound>,
}

/// Create the inbound queue.
#[must_use]
pub fn inbound() -> (InboundSender, InboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, InboundReceiver { rx })
}

impl InboundReceiver {
    /// Take everything queued so far without waiting.
    pub fn drain(&mut self) -> Vec<Inbound> {
        let mut out = Vec::new();
        while let Ok(item) = self.rx.try_recv() {
            out.push(item);
        }
        out
    }
}
