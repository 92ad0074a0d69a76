//! Observable session state and auth events.

use crate::role::Portal;
use crate::user::CurrentUser;

/// Where the session stands.
///
/// Starts as `Unknown` until `initialize` has checked storage, then is
/// always one of the two terminal variants.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Stored credentials have not been checked yet.
    #[default]
    Unknown,
    /// Signed in as this user.
    Authenticated(CurrentUser),
    /// No usable credential.
    Unauthenticated,
}

impl SessionState {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }

    /// Returns the signed-in user, if any.
    #[must_use]
    pub fn user(&self) -> Option<&CurrentUser> {
        match self {
            Self::Authenticated(user) => Some(user),
            Self::Unknown | Self::Unauthenticated => None,
        }
    }

    /// Returns true once `initialize` has settled the state.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Notifications for UI layers that need to react to auth changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// The access token was silently replaced.
    TokenRefreshed,
    /// The session ended because the refresh token was rejected.
    /// The UI should send the user to `login_route`.
    SessionExpired {
        portal: Portal,
        login_route: &'static str,
    },
}

impl AuthEvent {
    #[must_use]
    pub fn session_expired(portal: Portal) -> Self {
        Self::SessionExpired {
            portal,
            login_route: portal.login_route(),
        }
    }
}
