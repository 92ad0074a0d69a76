//! Error types for the session crate.
//!
//! Errors are designed for layered context using rootcause:
//! - `SessionError`: failures surfaced to callers of the session manager
//! - `TransportError`: failures moving a request to the backend and back
//! - `StoreError`: failures reading or writing the persisted credential

use std::fmt;

/// Errors from session operations.
///
/// `Clone` so a single refresh outcome can be handed to every caller
/// waiting on the same in-flight refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The backend could not be reached, or the exchange broke mid-flight.
    NetworkFailure { details: String },
    /// The backend rejected the username/password pair.
    InvalidCredentials,
    /// The account exists but may not use the requested portal.
    Forbidden { detail: String },
    /// Too many login attempts.
    RateLimited,
    /// The refresh token was rejected; the session is over.
    TokenExpiredUnrecoverable,
    /// Any other backend failure.
    Unknown { status: u16, detail: String },
    /// An authenticated call was attempted without a session.
    NotAuthenticated,
    /// The request was still unauthorized after a successful refresh.
    RequestUnauthorized { path: String },
    /// The credential store failed.
    Storage { details: String },
    /// The backend answered with a body we could not interpret.
    InvalidResponse { details: String },
}

impl SessionError {
    /// Maps a non-success status from a token-issuance endpoint.
    #[must_use]
    pub fn from_login_status(status: u16, detail: Option<String>) -> Self {
        match status {
            401 => Self::InvalidCredentials,
            403 => Self::Forbidden {
                detail: detail.unwrap_or_else(|| "access denied".to_string()),
            },
            429 => Self::RateLimited,
            _ => Self::Unknown {
                status,
                detail: detail.unwrap_or_default(),
            },
        }
    }

    /// Returns true if the caller may simply try again.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NetworkFailure { .. } | Self::Unknown { .. })
    }

    /// Short message suitable for showing next to a login form.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "Invalid username or password",
            Self::Forbidden { .. } => "Access denied. Please use the appropriate login portal.",
            Self::RateLimited => "Too many login attempts. Please try again later.",
            Self::TokenExpiredUnrecoverable | Self::RequestUnauthorized { .. } => {
                "Your session has expired. Please log in again."
            }
            Self::NotAuthenticated => "Please log in to continue.",
            Self::NetworkFailure { .. }
            | Self::Unknown { .. }
            | Self::Storage { .. }
            | Self::InvalidResponse { .. } => "Failed to login. Please try again.",
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetworkFailure { details } => write!(f, "network failure: {details}"),
            Self::InvalidCredentials => write!(f, "invalid username or password"),
            Self::Forbidden { detail } => write!(f, "forbidden: {detail}"),
            Self::RateLimited => write!(f, "rate limited by backend"),
            Self::TokenExpiredUnrecoverable => {
                write!(f, "refresh token rejected; session expired")
            }
            Self::Unknown { status, detail } => {
                write!(f, "unexpected backend response ({status}): {detail}")
            }
            Self::NotAuthenticated => write!(f, "not authenticated"),
            Self::RequestUnauthorized { path } => {
                write!(f, "request to '{path}' still unauthorized after refresh")
            }
            Self::Storage { details } => write!(f, "credential storage error: {details}"),
            Self::InvalidResponse { details } => {
                write!(f, "invalid backend response: {details}")
            }
        }
    }
}

impl std::error::Error for SessionError {}

/// Errors from moving a request to the backend and back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be built (bad URL, bad header value).
    InvalidRequest { details: String },
    /// The connection failed or was reset.
    ConnectionFailed { details: String },
    /// No response within the configured timeout.
    Timeout { path: String },
    /// The response body was not valid JSON.
    InvalidBody { details: String },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest { details } => write!(f, "invalid request: {details}"),
            Self::ConnectionFailed { details } => write!(f, "connection failed: {details}"),
            Self::Timeout { path } => write!(f, "request to '{path}' timed out"),
            Self::InvalidBody { details } => write!(f, "invalid response body: {details}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<&TransportError> for SessionError {
    fn from(err: &TransportError) -> Self {
        match err {
            TransportError::InvalidBody { details } => Self::InvalidResponse {
                details: details.clone(),
            },
            other => Self::NetworkFailure {
                details: other.to_string(),
            },
        }
    }
}

/// Errors from the persisted credential store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    Io { path: String, details: String },
    /// The stored data could not be decoded.
    Corrupt { details: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, details } => write!(f, "credential file '{path}': {details}"),
            Self::Corrupt { details } => write!(f, "stored credential is corrupt: {details}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<&StoreError> for SessionError {
    fn from(err: &StoreError) -> Self {
        Self::Storage {
            details: err.to_string(),
        }
    }
}
