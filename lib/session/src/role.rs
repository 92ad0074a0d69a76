//! Account roles and the portals they sign in through.
//!
//! The backend tags every account with a user type. Researchers and
//! school administrators share the research portal; developers manage
//! users, institutions and labs from a separate developer portal with its
//! own token endpoint and login route.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Account role as reported by the backend's `user_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Creates and submits protocols.
    Researcher,
    /// Reviews and approves protocols for a school.
    SchoolAdmin,
    /// Manages users, institutions and labs.
    Developer,
}

impl Role {
    /// Returns the portal this role signs in through.
    #[must_use]
    pub fn portal(&self) -> Portal {
        match self {
            Self::Researcher | Self::SchoolAdmin => Portal::Research,
            Self::Developer => Portal::Developer,
        }
    }

    /// Returns the wire name of the role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Researcher => "researcher",
            Self::SchoolAdmin => "school_admin",
            Self::Developer => "developer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role-scoped application view.
///
/// Older backend payloads put the raw user type in the `portal` field, so
/// `researcher` and `school_admin` are accepted as the research portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Portal {
    /// Researcher and school admin views.
    #[serde(rename = "research", alias = "researcher", alias = "school_admin")]
    Research,
    /// Developer administration views.
    #[serde(rename = "developer")]
    Developer,
}

impl Portal {
    /// Route the UI sends the user to when this portal needs a login.
    #[must_use]
    pub fn login_route(&self) -> &'static str {
        match self {
            Self::Research => "/login",
            Self::Developer => "/developer/login",
        }
    }

    /// Value persisted under the `portal_type` key, if any.
    ///
    /// Only the developer portal is persisted; absence means research.
    #[must_use]
    pub fn persisted_marker(&self) -> Option<&'static str> {
        match self {
            Self::Research => None,
            Self::Developer => Some("developer"),
        }
    }

    /// Reads the persisted `portal_type` marker back.
    #[must_use]
    pub fn from_marker(marker: Option<&str>) -> Option<Self> {
        match marker {
            Some("developer") => Some(Self::Developer),
            Some("research" | "researcher" | "school_admin") => Some(Self::Research),
            _ => None,
        }
    }
}

impl fmt::Display for Portal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Research => f.write_str("research"),
            Self::Developer => f.write_str("developer"),
        }
    }
}
