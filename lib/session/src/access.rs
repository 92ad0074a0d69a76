//! Route-level authorization decisions.
//!
//! Every screen asks the same question: given the session, may the user
//! see this area, and if not, where should they go? `authorize` answers
//! it from the typed role so no screen compares role strings itself.

use crate::role::{Portal, Role};
use crate::state::SessionState;

/// A group of screens with the same access rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Area {
    /// Home page and published standards.
    Public,
    /// The signed-in user's own profile.
    Profile,
    /// Protocol lists, forms and search.
    Protocols,
    /// School administrator review dashboard.
    AdminDashboard,
    /// User, institution and lab management.
    DeveloperPortal,
}

impl Area {
    /// Portal whose login screen guards this area.
    #[must_use]
    pub fn portal(&self) -> Portal {
        match self {
            Self::DeveloperPortal => Portal::Developer,
            Self::Public | Self::Profile | Self::Protocols | Self::AdminDashboard => {
                Portal::Research
            }
        }
    }
}

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Session state is still being restored; show a loading view.
    Wait,
    /// Not signed in (or signed in to the wrong portal).
    RedirectToLogin(&'static str),
    /// Signed in but not permitted here.
    RedirectHome,
}

/// Decides whether the current session may enter `area`.
#[must_use]
pub fn authorize(state: &SessionState, area: Area) -> Decision {
    if area == Area::Public {
        return Decision::Allow;
    }

    let user = match state {
        SessionState::Unknown => return Decision::Wait,
        SessionState::Unauthenticated => {
            return Decision::RedirectToLogin(area.portal().login_route());
        }
        SessionState::Authenticated(user) => user,
    };

    match area {
        Area::Public | Area::Profile | Area::Protocols => Decision::Allow,
        Area::AdminDashboard => {
            if user.role() == Role::SchoolAdmin || user.is_staff() {
                Decision::Allow
            } else {
                Decision::RedirectHome
            }
        }
        Area::DeveloperPortal => {
            if user.portal() == Portal::Developer {
                Decision::Allow
            } else {
                Decision::RedirectToLogin(Portal::Developer.login_route())
            }
        }
    }
}
