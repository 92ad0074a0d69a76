//! The access/refresh token pair and the token endpoint response shapes.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use std::fmt;

use crate::error::SessionError;

/// Bearer token pair issued by the backend.
///
/// Tokens are opaque to the client apart from the `exp` claim, which is
/// read only to avoid sending a token we already know is dead.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_token: String,
    refresh_token: String,
}

impl Credential {
    #[must_use]
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    #[must_use]
    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// Value for the `Authorization` header.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Expiry of the access token, when it is a JWT carrying `exp`.
    #[must_use]
    pub fn access_expires_at(&self) -> Option<DateTime<Utc>> {
        jwt_expiry(&self.access_token)
    }

    /// Returns true if the access token is known to be expired at `now`.
    ///
    /// Tokens whose expiry cannot be read are assumed live; the backend
    /// will answer unauthorized if they are not.
    #[must_use]
    pub fn is_access_expired(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        self.access_expires_at()
            .is_some_and(|expires| expires <= now + leeway)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    #[derive(Deserialize)]
    struct Claims {
        exp: Option<i64>,
    }

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    Utc.timestamp_opt(claims.exp?, 0).single()
}

#[derive(Debug, Deserialize)]
struct TokenFields {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

/// Token endpoints answer either flat (`{access, refresh}`) or nested
/// under `tokens` with the user object alongside.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenBody {
    Nested {
        tokens: TokenFields,
        #[serde(default)]
        user: Option<serde_json::Value>,
    },
    Flat(TokenFields),
}

impl TokenBody {
    fn parse(body: serde_json::Value, endpoint: &str) -> Result<Self, SessionError> {
        serde_json::from_value(body).map_err(|e| SessionError::InvalidResponse {
            details: format!("{endpoint}: {e}"),
        })
    }

    fn into_parts(self) -> (TokenFields, Option<serde_json::Value>) {
        match self {
            Self::Nested { tokens, user } => (tokens, user),
            Self::Flat(tokens) => (tokens, None),
        }
    }
}

/// Result of a successful token issuance.
#[derive(Debug, Clone)]
pub struct LoginGrant {
    pub credential: Credential,
    /// User object embedded in the response, if the endpoint sent one.
    pub user: Option<serde_json::Value>,
}

impl LoginGrant {
    /// Parses a token-issuance response.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResponse` if the body lacks an access or refresh token.
    pub fn from_json(body: serde_json::Value) -> Result<Self, SessionError> {
        let (tokens, user) = TokenBody::parse(body, "token issuance")?.into_parts();
        let refresh = tokens.refresh.ok_or_else(|| SessionError::InvalidResponse {
            details: "token issuance: missing refresh token".to_string(),
        })?;
        Ok(Self {
            credential: Credential::new(tokens.access, refresh),
            user,
        })
    }
}

/// Applies a refresh response to the credential it was issued for.
///
/// The refresh token is kept unless the backend rotated it.
///
/// # Errors
///
/// Returns `InvalidResponse` if the body carries no access token.
pub fn apply_refresh(
    previous: &Credential,
    body: serde_json::Value,
) -> Result<Credential, SessionError> {
    let (tokens, _) = TokenBody::parse(body, "token refresh")?.into_parts();
    Ok(Credential::new(
        tokens.access,
        tokens
            .refresh
            .unwrap_or_else(|| previous.refresh_token.clone()),
    ))
}

#[cfg(test)]
pub(crate) fn jwt_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp},"user_id":1}}"#));
    format!("{header}.{claims}.signature")
}
