//! Recipient filters for networked events.
//!
//! A filter describes *who* should receive a message; resolving it into a
//! concrete session list needs the server's session table and entity
//! positions and happens in the runtime when the tick is flushed.

use replica_component::Entity;

use crate::messages::SessionId;

/// The set of sessions a networked event is addressed to.
#[derive(Debug, Clone, PartialEq)]
pub enum RecipientFilter {
    /// Every connected session.
    All,
    /// Every connected session except one (typically the originator).
    AllExcept(SessionId),
    /// Exactly one session.
    Single(SessionId),
    /// An explicit list of sessions.
    Sessions(Vec<SessionId>),
    /// Sessions whose attached entity is within `range` of `origin`.
    InRange {
        /// Entity the range is measured from.
        origin: Entity,
        /// Inclusive radius in world units.
        range: f32,
    },
}

impl RecipientFilter {
    /// Returns `true` if `session` passes the non-spatial part of the filter.
    ///
    /// `InRange` always passes here; the runtime narrows it by position.
    #[must_use]
    pub fn admits(&self, session: SessionId) -> bool {
        match self {
            Self::All | Self::InRange { .. } => true,
            Self::AllExcept(excluded) => *excluded != session,
            Self::Single(only) => *only == session,
            Self::Sessions(list) => list.contains(&session),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits() {
        let a = SessionId::new_v4();
        let b = SessionId::new_v4();

        assert!(RecipientFilter::All.admits(a));
        assert!(!RecipientFilter::AllExcept(a).admits(a));
        assert!(RecipientFilter::AllExcept(a).admits(b));
        assert!(RecipientFilter::Single(b).admits(b));
        assert!(!RecipientFilter::Single(b).admits(a));
        assert!(RecipientFilter::Sessions(vec![a]).admits(a));
        assert!(!RecipientFilter::Sessions(vec![a]).admits(b));
    }
}
