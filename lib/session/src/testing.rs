//! Scripted in-memory backend for session tests.

use async_trait::async_trait;
use rootcause::Report;
use serde_json::{Value, json};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{StoreError, TransportError};
use crate::storage::{CredentialStore, MemoryStore, StoredSession};
use crate::transport::{ApiRequest, ApiResponse, Method, Transport};

pub(crate) const USERNAME: &str = "alice";
pub(crate) const PASSWORD: &str = "correct horse";

/// How the refresh endpoint misbehaves, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RefreshFault {
    None,
    /// The refresh call never reaches the backend.
    Unreachable,
    /// The backend answers 200 with a body that carries no token.
    Garbled,
}

struct Tokens {
    access: String,
    refresh: String,
    issued: usize,
}

/// Behaves like the RAVA token endpoints for a single account.
pub(crate) struct FakeBackend {
    tokens: Mutex<Tokens>,
    user_type: &'static str,
    latency: Duration,
    login_status: Mutex<Option<u16>>,
    network_down: AtomicBool,
    refresh_fault: Mutex<RefreshFault>,
    refresh_calls: AtomicUsize,
    profile_calls: AtomicUsize,
    requests: Mutex<Vec<ApiRequest>>,
}

impl FakeBackend {
    pub(crate) fn new(user_type: &'static str) -> Self {
        Self {
            tokens: Mutex::new(Tokens {
                access: "access-0".to_string(),
                refresh: "refresh-0".to_string(),
                issued: 0,
            }),
            user_type,
            latency: Duration::from_millis(5),
            login_status: Mutex::new(None),
            network_down: AtomicBool::new(false),
            refresh_fault: Mutex::new(RefreshFault::None),
            refresh_calls: AtomicUsize::new(0),
            profile_calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn researcher() -> Self {
        Self::new("researcher")
    }

    pub(crate) fn developer() -> Self {
        Self::new("developer")
    }

    /// Makes token issuance answer with `status` regardless of input.
    pub(crate) fn fail_logins_with(&self, status: u16) {
        *self.login_status.lock().expect("lock") = Some(status);
    }

    pub(crate) fn set_network_down(&self, down: bool) {
        self.network_down.store(down, Ordering::SeqCst);
    }

    pub(crate) fn set_refresh_fault(&self, fault: RefreshFault) {
        *self.refresh_fault.lock().expect("lock") = fault;
    }

    /// Server-side expiry: the current access token stops working.
    pub(crate) fn expire_access(&self) {
        self.tokens.lock().expect("lock").access = "revoked".to_string();
    }

    /// Server-side revocation: the refresh token stops working too.
    pub(crate) fn revoke_refresh(&self) {
        let mut tokens = self.tokens.lock().expect("lock");
        tokens.access = "revoked".to_string();
        tokens.refresh = "revoked".to_string();
    }

    /// Sets which tokens the backend currently accepts.
    pub(crate) fn accept_tokens(&self, access: &str, refresh: &str) {
        let mut tokens = self.tokens.lock().expect("lock");
        tokens.access = access.to_string();
        tokens.refresh = refresh.to_string();
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests
            .lock()
            .expect("lock")
            .iter()
            .filter(|r| r.path() == path)
            .cloned()
            .collect()
    }

    fn profile(&self) -> Value {
        json!({
            "id": 7,
            "username": USERNAME,
            "email": "alice@example.edu",
            "user_type": self.user_type,
            "is_superuser": false,
            "is_staff": false,
        })
    }

    fn issue(&self) -> (String, String) {
        let mut tokens = self.tokens.lock().expect("lock");
        tokens.issued += 1;
        tokens.access = format!("access-{}", tokens.issued);
        (tokens.access.clone(), tokens.refresh.clone())
    }

    fn authorized(&self, request: &ApiRequest) -> bool {
        let tokens = self.tokens.lock().expect("lock");
        request.authorization() == Some(format!("Bearer {}", tokens.access).as_str())
    }

    fn login(&self, request: &ApiRequest, developer: bool) -> ApiResponse {
        if let Some(status) = *self.login_status.lock().expect("lock") {
            return ApiResponse::new(status, json!({"detail": "scripted failure"}));
        }

        let body = request.body().cloned().unwrap_or(Value::Null);
        if body["username"] != USERNAME || body["password"] != PASSWORD {
            return ApiResponse::new(
                401,
                json!({"detail": "No active account found with the given credentials"}),
            );
        }
        if developer != (self.user_type == "developer") {
            return ApiResponse::new(
                403,
                json!({"detail": "Invalid user type. Please use the appropriate login portal."}),
            );
        }

        let (access, refresh) = self.issue();
        if developer {
            let mut user = self.profile();
            user["portal"] = json!("developer");
            ApiResponse::new(
                200,
                json!({"tokens": {"access": access, "refresh": refresh}, "user": user}),
            )
        } else {
            ApiResponse::new(200, json!({"access": access, "refresh": refresh}))
        }
    }

    fn refresh(&self, request: &ApiRequest) -> Result<ApiResponse, Report<TransportError>> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        match *self.refresh_fault.lock().expect("lock") {
            RefreshFault::None => {}
            RefreshFault::Unreachable => {
                return Err(TransportError::ConnectionFailed {
                    details: "connection reset by peer".to_string(),
                }
                .into());
            }
            RefreshFault::Garbled => {
                return Ok(ApiResponse::new(200, json!({"status": "ok"})));
            }
        }

        let presented = request
            .body()
            .and_then(|b| b["refresh"].as_str())
            .unwrap_or_default()
            .to_string();
        let valid = self.tokens.lock().expect("lock").refresh.clone();
        if presented != valid || valid == "revoked" {
            return Ok(ApiResponse::new(
                401,
                json!({"detail": "Token is invalid or expired", "code": "token_not_valid"}),
            ));
        }
        let (access, _) = self.issue();
        Ok(ApiResponse::new(200, json!({"tokens": {"access": access}})))
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, Report<TransportError>> {
        self.requests.lock().expect("lock").push(request.clone());
        tokio::time::sleep(self.latency).await;

        if self.network_down.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed {
                details: "connection refused".to_string(),
            }
            .into());
        }

        let response = match (request.method(), request.path()) {
            (Method::Post, "/token/") => self.login(request, false),
            (Method::Post, "/token/developer/") => self.login(request, true),
            (Method::Post, "/token/refresh/") => self.refresh(request)?,
            (Method::Get, "/users/me/") => {
                self.profile_calls.fetch_add(1, Ordering::SeqCst);
                if self.authorized(request) {
                    ApiResponse::new(200, self.profile())
                } else {
                    ApiResponse::new(401, json!({"detail": "Given token not valid"}))
                }
            }
            (_, "/always-unauthorized/") => ApiResponse::new(401, Value::Null),
            (_, _) if self.authorized(request) => ApiResponse::new(200, json!([])),
            _ => ApiResponse::new(401, json!({"detail": "Given token not valid"})),
        };
        Ok(response)
    }
}

/// `MemoryStore` whose next save can be held back, to widen races
/// between a refresh persisting its token and a concurrent login.
#[derive(Debug, Default)]
pub(crate) struct SlowStore {
    inner: MemoryStore,
    next_save_delay: Mutex<Option<Duration>>,
}

impl SlowStore {
    pub(crate) fn delay_next_save(&self, delay: Duration) {
        *self.next_save_delay.lock().expect("lock") = Some(delay);
    }

    pub(crate) fn snapshot(&self) -> Option<StoredSession> {
        self.inner.snapshot()
    }
}

#[async_trait]
impl CredentialStore for SlowStore {
    async fn load(&self) -> rava_core::Result<Option<StoredSession>, StoreError> {
        self.inner.load().await
    }

    async fn save(&self, session: &StoredSession) -> rava_core::Result<(), StoreError> {
        let delay = self.next_save_delay.lock().expect("lock").take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.save(session).await
    }

    async fn clear(&self) -> rava_core::Result<(), StoreError> {
        self.inner.clear().await
    }
}
