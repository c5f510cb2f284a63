//! Explicit authentication state machine
//!
//! ```text
//! Unauthenticated --login/register--> Authenticated
//! Authenticated   --401-------------> Refreshing
//! Refreshing      --refresh ok------> Authenticated
//! Refreshing      --refresh failed--> Expired
//! Expired         --acknowledge-----> Unauthenticated
//! any             --logout----------> Unauthenticated
//! ```

use crate::types::Credentials;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Session state as seen by the client
#[derive(Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated(Credentials),
    /// A refresh is in flight. Requests keep sending the stale access token meanwhile.
    Refreshing {
        stale_access_token: String,
        refresh_token: String,
    },
    /// Refresh failed and tokens were dropped; the user must log in again.
    Expired,
}

impl AuthState {
    pub fn name(&self) -> &'static str {
        match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::Authenticated(_) => "authenticated",
            AuthState::Refreshing { .. } => "refreshing",
            AuthState::Expired => "expired",
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        match self {
            AuthState::Authenticated(creds) => Some(&creds.access_token),
            AuthState::Refreshing {
                stale_access_token, ..
            } => Some(stale_access_token),
            AuthState::Unauthenticated | AuthState::Expired => None,
        }
    }
}

impl fmt::Debug for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of asking the session to enter `Refreshing`
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RefreshStart {
    /// Send this refresh token to the server.
    Begin(String),
    /// The session held an access token but no refresh token. It is now `Expired`.
    Revoked,
    /// No credentials in memory. Nothing changed.
    NoSession,
}

/// In-memory session, shared by every request of one client
pub(crate) struct Session {
    state: RwLock<AuthState>,
    /// Bumped by every login, logout and expiry.
    generation: AtomicU64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(AuthState::Unauthenticated),
            generation: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub fn state(&self) -> AuthState {
        self.state.read().clone()
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.read().access_token().map(str::to_string)
    }

    /// Login / register: any state becomes `Authenticated`. Returns the new generation.
    pub fn install(&self, credentials: Credentials) -> u64 {
        let mut state = self.state.write();
        *state = AuthState::Authenticated(credentials);
        self.bump();
        self.generation()
    }

    /// Adopt persisted credentials, but only if no login, logout or expiry
    /// happened since `seen_generation` was read.
    pub fn restore(&self, credentials: Credentials, seen_generation: u64) -> bool {
        let mut state = self.state.write();
        if *state == AuthState::Unauthenticated && self.generation() == seen_generation {
            *state = AuthState::Authenticated(credentials);
            true
        } else {
            false
        }
    }

    /// True when the token a request was sent with is no longer the current one.
    pub fn token_replaced(&self, sent_with: Option<&str>) -> bool {
        match (self.state.read().access_token(), sent_with) {
            (Some(current), Some(sent)) => current != sent,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn begin_refresh(&self) -> RefreshStart {
        let mut state = self.state.write();
        let (next, outcome) = match &*state {
            AuthState::Authenticated(Credentials {
                access_token,
                refresh_token: Some(refresh_token),
            }) => (
                Some(AuthState::Refreshing {
                    stale_access_token: access_token.clone(),
                    refresh_token: refresh_token.clone(),
                }),
                RefreshStart::Begin(refresh_token.clone()),
            ),
            AuthState::Refreshing { refresh_token, .. } => {
                (None, RefreshStart::Begin(refresh_token.clone()))
            }
            AuthState::Authenticated(Credentials {
                refresh_token: None,
                ..
            }) => (Some(AuthState::Expired), RefreshStart::Revoked),
            AuthState::Unauthenticated | AuthState::Expired => (None, RefreshStart::NoSession),
        };
        if let Some(next) = next {
            if next == AuthState::Expired {
                self.bump();
            }
            *state = next;
        }
        outcome
    }

    /// `Refreshing -> Authenticated`. Returns the generation the new token
    /// belongs to, or `None` if the session moved on (e.g. logout) while the
    /// refresh was in flight.
    pub fn finish_refresh(&self, access_token: String) -> Option<u64> {
        let mut state = self.state.write();
        let refresh_token = match &*state {
            AuthState::Refreshing { refresh_token, .. } => refresh_token.clone(),
            _ => return None,
        };
        *state = AuthState::Authenticated(Credentials {
            access_token,
            refresh_token: Some(refresh_token),
        });
        Some(self.generation())
    }

    /// Drop credentials after an unrecoverable auth failure. Returns the new
    /// generation, or `None` when there was no session to expire.
    pub fn expire(&self) -> Option<u64> {
        let mut state = self.state.write();
        if *state == AuthState::Unauthenticated {
            return None;
        }
        *state = AuthState::Expired;
        self.bump();
        Some(self.generation())
    }

    pub fn acknowledge_expired(&self) -> bool {
        let mut state = self.state.write();
        if *state == AuthState::Expired {
            *state = AuthState::Unauthenticated;
            self.bump();
            true
        } else {
            false
        }
    }

    pub fn logout(&self) -> u64 {
        let mut state = self.state.write();
        *state = AuthState::Unauthenticated;
        self.bump();
        self.generation()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logged_in() -> Session {
        let session = Session::new();
        session.install(Credentials::new("A1", "R1"));
        session
    }

    #[test]
    fn starts_unauthenticated_without_token() {
        let session = Session::new();
        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert_eq!(session.access_token(), None);
    }

    #[test]
    fn refresh_cycle() {
        let session = logged_in();

        assert_eq!(session.begin_refresh(), RefreshStart::Begin("R1".into()));
        assert_eq!(session.state().name(), "refreshing");
        assert_eq!(session.access_token().as_deref(), Some("A1"));

        let generation = session.generation();
        assert_eq!(session.finish_refresh("A2".into()), Some(generation));
        assert_eq!(session.state(), AuthState::Authenticated(Credentials::new("A2", "R1")));
    }

    #[test]
    fn failed_refresh_expires_then_acknowledge_resets() {
        let session = logged_in();
        session.begin_refresh();
        assert!(session.expire().is_some());
        assert_eq!(session.state(), AuthState::Expired);
        assert_eq!(session.access_token(), None);

        assert!(session.acknowledge_expired());
        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert!(!session.acknowledge_expired());
        assert_eq!(session.expire(), None);
    }

    #[test]
    fn refresh_without_refresh_token_is_impossible() {
        let session = Session::new();
        let seen = session.generation();
        assert_eq!(session.begin_refresh(), RefreshStart::NoSession);
        assert_eq!(session.state(), AuthState::Unauthenticated);
        assert_eq!(session.generation(), seen);

        session.install(Credentials {
            access_token: "A1".into(),
            refresh_token: None,
        });
        let seen = session.generation();
        assert_eq!(session.begin_refresh(), RefreshStart::Revoked);
        assert_eq!(session.state(), AuthState::Expired);
        assert_ne!(session.generation(), seen);

        assert_eq!(session.begin_refresh(), RefreshStart::NoSession);
    }

    #[test]
    fn logout_during_refresh_is_not_undone() {
        let session = logged_in();
        session.begin_refresh();
        session.logout();
        assert_eq!(session.finish_refresh("A2".into()), None);
        assert_eq!(session.state(), AuthState::Unauthenticated);
    }

    #[test]
    fn restore_does_not_clobber_a_fresh_login() {
        let session = logged_in();
        assert!(!session.restore(Credentials::new("OLD", "OLDR"), session.generation()));
        assert_eq!(session.access_token().as_deref(), Some("A1"));

        let session = Session::new();
        assert!(session.restore(Credentials::new("OLD", "OLDR"), session.generation()));
        assert_eq!(session.access_token().as_deref(), Some("OLD"));
    }

    #[test]
    fn restore_loses_to_a_logout_that_happened_while_loading() {
        let session = Session::new();
        let seen = session.generation();
        session.logout();
        assert!(!session.restore(Credentials::new("OLD", "OLDR"), seen));
        assert_eq!(session.state(), AuthState::Unauthenticated);
    }

    #[test]
    fn detects_replaced_tokens() {
        let session = logged_in();
        assert!(!session.token_replaced(Some("A1")));
        assert!(session.token_replaced(Some("A0")));
        assert!(session.token_replaced(None));

        session.logout();
        assert!(!session.token_replaced(Some("A1")));
    }

    #[test]
    fn debug_output_never_contains_tokens() {
        let session = logged_in();
        session.begin_refresh();
        let printed = format!("{:?}", session.state());
        assert_eq!(printed, "refreshing");
    }
}
