//! NATS I/O bridge.
//!
//! Runs on tokio and never touches the world. Client traffic arrives on
//! `<prefix>.session.*.in`; the first message from an unknown session opens
//! it, which hands a fresh outbox to the simulation through the inbound
//! queue. Each open session gets one task that forwards its outbox to
//! `<prefix>.session.<id>.out`. A session that stays silent for longer
//! than the idle timeout is closed as if it had disconnected.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::StreamExt;
use replica_net::subjects::parse_session_in;
use replica_net::{
    ClientMessage, Consumer, Inbound, InboundKind, InboundSender, NatsConnection, NetError, ServerMessage, SessionId,
    decode, spsc,
};
use tracing::{debug, info, warn};

/// Bookkeeping for one open session.
#[derive(Debug, Clone, Copy)]
struct SessionEntry {
    /// Generation of the outbox task serving the session.
    generation: u64,
    last_seen: Instant,
}

/// Open sessions, shared with the outbox tasks.
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    entries: Arc<DashMap<SessionId, SessionEntry>>,
}

impl SessionTable {
    /// Number of open sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Record traffic from `session`. Returns `false` if it is not open.
    pub fn touch(&self, session: SessionId, now: Instant) -> bool {
        match self.entries.get_mut(&session) {
            Some(mut entry) => {
                entry.last_seen = now;
                true
            }
            None => false,
        }
    }

    fn open(&self, session: SessionId, generation: u64, now: Instant) {
        self.entries.insert(
            session,
            SessionEntry {
                generation,
                last_seen: now,
            },
        );
    }

    fn close(&self, session: SessionId) {
        self.entries.remove(&session);
    }

    /// Remove the entry only if it still belongs to `generation`.
    fn close_generation(&self, session: SessionId, generation: u64) {
        self.entries.remove_if(&session, |_, entry| entry.generation == generation);
    }

    /// Remove every session silent for at least `timeout` and return them.
    pub fn take_idle(&self, now: Instant, timeout: Duration) -> Vec<SessionId> {
        let idle: Vec<SessionId> = self
            .entries
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.last_seen) >= timeout)
            .map(|entry| *entry.key())
            .collect();
        for session in &idle {
            self.entries
                .remove_if(session, |_, entry| now.saturating_duration_since(entry.last_seen) >= timeout);
        }
        idle
    }
}

/// Close idle sessions and tell the simulation. Returns how many closed,
/// or `None` once the simulation has stopped.
pub fn reap_idle(sessions: &SessionTable, inbound: &InboundSender, now: Instant, timeout: Duration) -> Option<usize> {
    let idle = sessions.take_idle(now, timeout);
    for &session in &idle {
        info!(%session, timeout_secs = timeout.as_secs(), "session timed out");
        let gone = Inbound {
            session,
            kind: InboundKind::Disconnected,
        };
        if inbound.send(gone).is_err() {
            return None;
        }
    }
    Some(idle.len())
}

/// Moves messages between NATS and the simulation queues.
#[derive(Debug)]
pub struct Bridge {
    conn: NatsConnection,
    inbound: InboundSender,
    sessions: SessionTable,
    generation: AtomicU64,
    idle_timeout: Option<Duration>,
}

impl Bridge {
    /// Create a bridge feeding `inbound`. `idle_timeout` of `None` keeps
    /// silent sessions open forever.
    #[must_use]
    pub fn new(conn: NatsConnection, inbound: InboundSender, idle_timeout: Option<Duration>) -> Self {
        Self {
            conn,
            inbound,
            sessions: SessionTable::default(),
            generation: AtomicU64::new(0),
            idle_timeout,
        }
    }

    /// Number of sessions with a live outbox task.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Forward client traffic until the subscription ends.
    ///
    /// # Errors
    ///
    /// [`NetError::Subscribe`] if the wildcard subscription fails.
    pub async fn run(&self) -> Result<(), NetError> {
        let mut sub = self.conn.subscribe_sessions().await?;
        info!(prefix = self.conn.prefix(), "bridge listening for sessions");

        let sweep_every = self
            .idle_timeout
            .map_or(Duration::from_secs(3600), |timeout| (timeout / 4).max(Duration::from_millis(100)));
        let mut sweep = tokio::time::interval(sweep_every);

        loop {
            tokio::select! {
                next = sub.next() => {
                    let Some(msg) = next else {
                        break;
                    };
                    if !self.receive(msg.subject.as_str(), &msg.payload) {
                        info!("simulation gone, bridge stopping");
                        break;
                    }
                }
                _ = sweep.tick() => {
                    let Some(timeout) = self.idle_timeout else {
                        continue;
                    };
                    if reap_idle(&self.sessions, &self.inbound, Instant::now(), timeout).is_none() {
                        info!("simulation gone, bridge stopping");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Decode and route one raw message. Returns `false` once the
    /// simulation has stopped.
    fn receive(&self, subject: &str, payload: &[u8]) -> bool {
        let session = match parse_session_in(self.conn.prefix(), subject) {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "ignoring message on foreign subject");
                return true;
            }
        };
        let message: ClientMessage = match decode(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(%session, error = %err, "undecodable client message dropped");
                return true;
            }
        };
        self.route(session, message)
    }

    /// Push one client message into the inbound queue, opening the session
    /// first if needed.
    fn route(&self, session: SessionId, message: ClientMessage) -> bool {
        let leaving = matches!(message, ClientMessage::Disconnect);
        if !self.sessions.touch(session, Instant::now()) {
            if leaving {
                debug!(%session, "disconnect from unknown session ignored");
                return true;
            }
            if !self.open(session) {
                return false;
            }
        }
        let delivered = self
            .inbound
            .send(Inbound {
                session,
                kind: InboundKind::Message(message),
            })
            .is_ok();
        if leaving {
            self.sessions.close(session);
        }
        delivered
    }

    fn open(&self, session: SessionId) -> bool {
        let (outbox, consumer) = spsc();
        let connected = Inbound {
            session,
            kind: InboundKind::Connected(outbox),
        };
        if self.inbound.send(connected).is_err() {
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        self.sessions.open(session, generation, Instant::now());
        tokio::spawn(forward_outbox(
            self.conn.clone(),
            session,
            generation,
            consumer,
            self.sessions.clone(),
        ));
        debug!(%session, generation, "session opened");
        true
    }
}

/// Publish everything the simulation queues for one session. Ends when the
/// simulation drops the session's producer.
async fn forward_outbox(
    conn: NatsConnection,
    session: SessionId,
    generation: u64,
    mut outbox: Consumer<ServerMessage>,
    sessions: SessionTable,
) {
    while let Some(message) = outbox.recv().await {
        if let Err(err) = conn.publish_to_session(session, &message).await {
            warn!(%session, error = %err, "publish failed");
        }
    }
    // A reconnect may already have replaced this entry.
    sessions.close_generation(session, generation);
    debug!(%session, generation, "outbox closed");
}

#[cfg(test)]
mod tests {
    use replica_net::inbound;

    use super::*;

    #[test]
    fn test_touch_keeps_session_alive() {
        let table = SessionTable::default();
        let start = Instant::now();
        let session = SessionId::new_v4();
        table.open(session, 0, start);
        assert!(table.touch(session, start + Duration::from_secs(20)));
        assert!(!table.touch(SessionId::new_v4(), start));

        let idle = table.take_idle(start + Duration::from_secs(40), Duration::from_secs(30));
        assert!(idle.is_empty());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_silent_session_is_reaped_and_reported() {
        let table = SessionTable::default();
        let (tx, mut rx) = inbound();
        let start = Instant::now();
        let quiet = SessionId::new_v4();
        let chatty = SessionId::new_v4();
        table.open(quiet, 0, start);
        table.open(chatty, 1, start);
        table.touch(chatty, start + Duration::from_secs(25));

        let now = start + Duration::from_secs(31);
        assert_eq!(reap_idle(&table, &tx, now, Duration::from_secs(30)), Some(1));
        assert_eq!(table.len(), 1);
        assert!(!table.touch(quiet, now));

        let reported = rx.drain();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].session, quiet);
        assert!(matches!(reported[0].kind, InboundKind::Disconnected));
    }

    #[test]
    fn test_reap_stops_when_simulation_is_gone() {
        let table = SessionTable::default();
        let (tx, rx) = inbound();
        drop(rx);
        let start = Instant::now();
        table.open(SessionId::new_v4(), 0, start);
        assert_eq!(reap_idle(&table, &tx, start + Duration::from_secs(5), Duration::from_secs(1)), None);
    }

    #[test]
    fn test_stale_outbox_does_not_close_reopened_session() {
        let table = SessionTable::default();
        let session = SessionId::new_v4();
        let now = Instant::now();
        table.open(session, 0, now);
        table.open(session, 1, now);
        table.close_generation(session, 0);
        assert_eq!(table.len(), 1);
        table.close_generation(session, 1);
        assert_eq!(table.len(), 0);
    }
}
