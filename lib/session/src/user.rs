//! The signed-in user as reported by the backend.
//!
//! A `CurrentUser` is only ever built from a server response (the profile
//! endpoint, or the user object the developer token endpoint returns).
//! Token contents are never trusted for identity or role.

use rava_core::{InstitutionId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::role::{Portal, Role};

/// Profile payload as returned by `/users/me/` and `/token/developer/`.
///
/// Only the fields the session needs are modeled; unknown fields are
/// ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfilePayload {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_type: Option<Role>,
    #[serde(default)]
    pub portal: Option<Portal>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub institution: Option<InstitutionId>,
    #[serde(default)]
    pub is_superuser: bool,
    #[serde(default)]
    pub is_staff: bool,
}

/// The authenticated user, cached for the lifetime of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    id: UserId,
    username: String,
    email: Option<String>,
    role: Role,
    portal: Portal,
    name: Option<String>,
    institution: Option<InstitutionId>,
    is_superuser: bool,
    is_staff: bool,
}

impl CurrentUser {
    /// Creates a user with only the required fields.
    #[must_use]
    pub fn new(id: UserId, username: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            username: username.into(),
            email: None,
            role,
            portal: role.portal(),
            name: None,
            institution: None,
            is_superuser: false,
            is_staff: false,
        }
    }

    /// Sets the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Marks the user as staff.
    #[must_use]
    pub fn with_staff(mut self, is_staff: bool) -> Self {
        self.is_staff = is_staff;
        self
    }

    /// Overrides the portal affinity.
    #[must_use]
    pub fn with_portal(mut self, portal: Portal) -> Self {
        self.portal = portal;
        self
    }

    /// Parses a raw profile body.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResponse` if the body is not a profile, or if the
    /// account has no role the client understands.
    pub fn from_profile_json(body: serde_json::Value) -> Result<Self, SessionError> {
        let payload: ProfilePayload =
            serde_json::from_value(body).map_err(|e| SessionError::InvalidResponse {
                details: format!("profile: {e}"),
            })?;
        Self::try_from(payload)
    }

    #[must_use]
    pub fn id(&self) -> UserId {
        self.id
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the email address, if the account has one.
    #[must_use]
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Returns the portal this user belongs to.
    #[must_use]
    pub fn portal(&self) -> Portal {
        self.portal
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn institution(&self) -> Option<InstitutionId> {
        self.institution
    }

    #[must_use]
    pub fn is_superuser(&self) -> bool {
        self.is_superuser
    }

    #[must_use]
    pub fn is_staff(&self) -> bool {
        self.is_staff
    }
}

impl TryFrom<ProfilePayload> for CurrentUser {
    type Error = SessionError;

    fn try_from(payload: ProfilePayload) -> Result<Self, Self::Error> {
        // Superusers created without a type act as developers.
        let role = match (payload.user_type, payload.is_superuser) {
            (Some(role), _) => role,
            (None, true) => Role::Developer,
            (None, false) => {
                return Err(SessionError::InvalidResponse {
                    details: format!("user '{}' has no user_type", payload.username),
                });
            }
        };

        Ok(Self {
            id: payload.id,
            username: payload.username,
            email: payload.email.filter(|e| !e.is_empty()),
            role,
            portal: payload.portal.unwrap_or_else(|| role.portal()),
            name: payload.name.filter(|n| !n.is_empty()),
            institution: payload.institution,
            is_superuser: payload.is_superuser,
            is_staff: payload.is_staff,
        })
    }
}
