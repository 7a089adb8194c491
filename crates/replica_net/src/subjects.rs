//! NATS subject hierarchy.
//!
//! Every subject lives under a configurable prefix (default `replica`) so
//! several servers can share one NATS cluster:
//!
//! ```text
//! <prefix>.session.<session-id>.in    client → server
//! <prefix>.session.<session-id>.out   server → client
//! ```

use crate::error::NetError;
use crate::messages::SessionId;

/// Default root prefix for all subjects.
pub const DEFAULT_PREFIX: &str = "replica";

/// Build the subject a client publishes to.
///
/// `<prefix>.session.<id>.in`
#[must_use]
pub fn session_in(prefix: &str, session: SessionId) -> String {
    format!("{prefix}.session.{session}.in")
}

/// Build the subject the server publishes a session's traffic to.
///
/// `<prefix>.session.<id>.out`
#[must_use]
pub fn session_out(prefix: &str, session: SessionId) -> String {
    format!("{prefix}.session.{session}.out")
}

/// Wildcard matching every client → server subject.
///
/// `<prefix>.session.*.in`
#[must_use]
pub fn all_sessions_in(prefix: &str) -> String {
    format!("{prefix}.session.*.in")
}

/// Extract the session id from a `<prefix>.session.<id>.in` subject.
///
/// # Errors
///
/// Returns [`NetError::BadSubject`] if the subject does not follow the
/// layout or the id is not a UUID.
pub fn parse_session_in(prefix: &str, subject: &str) -> Result<SessionId, NetError> {
    let bad = || NetError::BadSubject(subject.to_string());
    let rest = subject
        .strip_prefix(prefix)
        .and_then(|s| s.strip_prefix(".session."))
        .and_then(|s| s.strip_suffix(".in"))
        .ok_or_else(bad)?;
    rest.parse().map_err(|_| bad())
}
