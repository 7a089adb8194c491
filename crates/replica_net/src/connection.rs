//! NATS connection for the session bridge.
//!
//! Wraps an `async-nats` client together with the subject prefix, so callers
//! deal in session ids and messages rather than subject strings. Only the
//! I/O tasks touch this type; the simulation thread talks to them through
//! [`queue`](crate::queue).

use async_nats::Subscriber;
use tracing::{debug, info};

use crate::codec::encode;
use crate::error::NetError;
use crate::messages::{ServerMessage, SessionId};
use crate::subjects::{all_sessions_in, session_out};

/// Default NATS server URL.
pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

/// A NATS client bound to one subject prefix.
#[derive(Debug, Clone)]
pub struct NatsConnection {
    client: async_nats::Client,
    prefix: String,
}

impl NatsConnection {
    /// Connect to `url`, using `prefix` for every subject.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Connect`] if the connection cannot be established.
    pub async fn connect(url: &str, prefix: impl Into<String>) -> Result<Self, NetError> {
        let prefix = prefix.into();
        info!(url, %prefix, "connecting to NATS");
        let client = async_nats::connect(url).await?;
        info!("NATS connection established");
        Ok(Self { client, prefix })
    }

    /// The subject prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Subscribe to the inbound subjects of every session.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Subscribe`] if the subscription fails.
    pub async fn subscribe_sessions(&self) -> Result<Subscriber, NetError> {
        let subject = all_sessions_in(&self.prefix);
        debug!(%subject, "subscribing to session traffic");
        Ok(self.client.subscribe(subject).await?)
    }

    /// Encode `message` and publish it on the session's outbound subject.
    ///
    /// # Errors
    ///
    /// Returns [`NetError`] if encoding or publishing fails.
    pub async fn publish_to_session(&self, session: SessionId, message: &ServerMessage) -> Result<(), NetError> {
        let payload = encode(message)?;
        self.client
            .publish(session_out(&self.prefix, session), payload.into())
            .await?;
        Ok(())
    }
}
