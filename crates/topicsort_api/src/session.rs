//! Bearer-token resolution and the session-invalidation channel.
//!
//! # Responsibility
//! - Resolve an `Authorization` header to the owning user.
//! - Publish [`SessionEvent::Invalidated`] to every subscriber when a request
//!   fails authorization.
//!
//! # Invariants
//! - Tokens are never logged.
//! - Publishing never blocks and never fails; dropped subscribers are pruned.

use log::warn;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use topicsort_core::OwnerId;

const BEARER_PREFIX: &str = "Bearer ";

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationReason {
    MissingToken,
    MalformedHeader,
    UnknownToken,
}

impl Display for InvalidationReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let value = match self {
            Self::MissingToken => "missing_token",
            Self::MalformedHeader => "malformed_header",
            Self::UnknownToken => "unknown_token",
        };
        write!(f, "{value}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The caller's session is no longer valid and should be cleared.
    Invalidated { reason: InvalidationReason },
}

/// Maps bearer tokens to owners.
pub trait TokenVerifier: Send + Sync {
    fn owner_for_token(&self, token: &str) -> Option<OwnerId>;
}

/// Fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: BTreeMap<String, OwnerId>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, owner_id: OwnerId) -> Self {
        self.tokens.insert(token.into(), owner_id);
        self
    }
}

impl TokenVerifier for StaticTokens {
    fn owner_for_token(&self, token: &str) -> Option<OwnerId> {
        self.tokens.get(token).copied()
    }
}

/// Resolves the `Authorization` header value to an owner.
///
/// # Errors
/// Returns the invalidation reason when the header is absent, is not a
/// bearer credential, or names an unknown token.
pub fn authorize(
    verifier: &dyn TokenVerifier,
    authorization: Option<&str>,
) -> Result<OwnerId, InvalidationReason> {
    let header = authorization.ok_or(InvalidationReason::MissingToken)?;
    let token = header
        .strip_prefix(BEARER_PREFIX)
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(InvalidationReason::MalformedHeader)?;
    verifier
        .owner_for_token(token)
        .ok_or(InvalidationReason::UnknownToken)
}

/// Fan-out channel for session events.
///
/// Whichever component owns session state subscribes once and drains its
/// receiver; the API publishes on every authorization failure.
#[derive(Debug, Default)]
pub struct SessionEvents {
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
}

impl SessionEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        let (sender, receiver) = mpsc::channel();
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(sender),
            Err(poisoned) => poisoned.into_inner().push(sender),
        }
        receiver
    }

    /// Sends `event` to every live subscriber and returns how many got it.
    pub fn publish(&self, event: SessionEvent) -> usize {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|sender| sender.send(event.clone()).is_ok());
        let delivered = subscribers.len();

        let SessionEvent::Invalidated { reason } = &event;
        warn!(
            "event=session_invalidated module=api status=published reason={} subscribers={}",
            reason, delivered
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::{authorize, InvalidationReason, SessionEvent, SessionEvents, StaticTokens};

    #[test]
    fn authorize_accepts_known_bearer_token() {
        let tokens = StaticTokens::new().with_token("abc", 7);
        assert_eq!(authorize(&tokens, Some("Bearer abc")), Ok(7));
    }

    #[test]
    fn authorize_reports_each_failure_kind() {
        let tokens = StaticTokens::new().with_token("abc", 7);
        assert_eq!(
            authorize(&tokens, None),
            Err(InvalidationReason::MissingToken)
        );
        assert_eq!(
            authorize(&tokens, Some("Basic abc")),
            Err(InvalidationReason::MalformedHeader)
        );
        assert_eq!(
            authorize(&tokens, Some("Bearer   ")),
            Err(InvalidationReason::MalformedHeader)
        );
        assert_eq!(
            authorize(&tokens, Some("Bearer nope")),
            Err(InvalidationReason::UnknownToken)
        );
    }

    #[test]
    fn publish_skips_dropped_subscribers() {
        let events = SessionEvents::new();
        let kept = events.subscribe();
        drop(events.subscribe());

        let event = SessionEvent::Invalidated {
            reason: InvalidationReason::UnknownToken,
        };
        assert_eq!(events.publish(event.clone()), 1);
        assert_eq!(kept.try_recv().unwrap(), event);
    }
}
