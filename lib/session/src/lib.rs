//! Authentication session management for the RAVA Protocol client.
//!
//! This crate provides:
//! - Login through the research or developer portal (`SessionManager::login`)
//! - Credential persistence across restarts (`CredentialStore`, `FileStore`)
//! - Authenticated requests with transparent token refresh
//!   (`SessionManager::send`, `SessionManager::handle_unauthorized`)
//! - Typed roles and route-level access decisions (`Role`, `authorize`)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use rava_session::{
//!     ApiRequest, FileStore, LoginCredentials, Portal, SessionConfig, SessionError,
//!     SessionManager,
//! };
//! use rootcause::Report;
//!
//! # async fn run() -> Result<(), Report<SessionError>> {
//! let config = SessionConfig::new("https://rava.example.edu/api");
//! let store = Arc::new(FileStore::new("/tmp/rava/session.json"));
//! let session = SessionManager::connect(config, store)
//!     .map_err(|e| SessionError::from(e.current_context()))?;
//!
//! if !session.initialize().await.is_authenticated() {
//!     session
//!         .login(Portal::Research, &LoginCredentials::new("alice", "secret"))
//!         .await?;
//! }
//!
//! let protocols = session.send(ApiRequest::get("/protocols/")).await?;
//! println!("{}", protocols.body);
//! # Ok(())
//! # }
//! ```

pub mod access;
pub mod config;
pub mod credential;
pub mod error;
pub mod manager;
pub mod role;
pub mod state;
pub mod storage;
pub mod transport;
pub mod user;

#[cfg(test)]
mod testing;

// Re-export main types at crate root
pub use access::{Area, Decision, authorize};
pub use config::SessionConfig;
pub use credential::{Credential, LoginGrant};
pub use error::{SessionError, StoreError, TransportError};
pub use manager::{LoginCredentials, SessionManager};
pub use role::{Portal, Role};
pub use state::{AuthEvent, SessionState};
pub use storage::{CredentialStore, FileStore, MemoryStore, StoredSession};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};
pub use user::CurrentUser;
