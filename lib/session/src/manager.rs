//! The session manager: sign-in, sign-out and authenticated requests.
//!
//! A `SessionManager` owns the credential. Everything else reads derived
//! state (`state()`, `current_user()`) or subscribes to changes; nothing
//! outside this module touches the tokens.
//!
//! # Refresh
//!
//! When a call comes back unauthorized the access token is refreshed and
//! the call is re-issued once. Concurrent callers that hit an unauthorized
//! response while a refresh is running await that same refresh instead of
//! starting their own, so the backend sees one refresh per expiry.
//!
//! Any refresh failure ends the session: the manager signs out and sends
//! one `AuthEvent::SessionExpired`.
//!
//! Every login, logout and forced expiry bumps a session epoch. A refresh
//! that completes under an older epoch is discarded, so signing out while
//! a refresh is in flight cannot bring the session back. Writes to the
//! credential store are serialized and re-check the epoch, so a late
//! refresh never overwrites or erases a newer login's credential.

use chrono::Utc;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use rootcause::Report;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, broadcast, watch};
use tracing::{debug, info, instrument, warn};

use crate::config::SessionConfig;
use crate::credential::{Credential, LoginGrant, apply_refresh};
use crate::error::{SessionError, StoreError, TransportError};
use crate::role::Portal;
use crate::state::{AuthEvent, SessionState};
use crate::storage::{CredentialStore, StoredSession};
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Transport};
use crate::user::CurrentUser;

const EVENT_CAPACITY: usize = 16;

type RefreshOutcome = Result<Credential, SessionError>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

/// Username and password submitted to a token endpoint.
#[derive(Clone, Serialize)]
pub struct LoginCredentials {
    username: String,
    password: String,
}

impl LoginCredentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

struct InFlightRefresh {
    epoch: u64,
    future: SharedRefresh,
}

struct Inner {
    credential: Option<Credential>,
    /// Last known portal affinity; survives logout so expiry can pick
    /// the right login route.
    portal: Portal,
    epoch: u64,
    refresh: Option<InFlightRefresh>,
}

/// Owns the authentication state for one client.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    /// Held across every store write together with the epoch it belongs to.
    store_writes: AsyncMutex<()>,
    config: SessionConfig,
    inner: Mutex<Inner>,
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<AuthEvent>,
}

impl SessionManager {
    /// Creates a manager in the `Unknown` state. Call [`initialize`](Self::initialize)
    /// before making requests.
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        config: SessionConfig,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Unknown);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            transport,
            store,
            store_writes: AsyncMutex::new(()),
            config,
            inner: Mutex::new(Inner {
                credential: None,
                portal: Portal::Research,
                epoch: 0,
                refresh: None,
            }),
            state,
            events,
        }
    }

    /// Creates a manager that talks HTTP to `config.base_url()`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn connect(
        config: SessionConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, Report<TransportError>> {
        let transport = HttpTransport::new(config.base_url(), config.timeout())?;
        Ok(Self::new(Arc::new(transport), store, config))
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn current_user(&self) -> Option<CurrentUser> {
        self.state.borrow().user().cloned()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    /// Last known portal affinity.
    #[must_use]
    pub fn portal(&self) -> Portal {
        self.lock().portal
    }

    /// Receives every state transition.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Receives token refresh and forced-expiry notifications.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    /// Restores the session from storage.
    ///
    /// Always settles on `Authenticated` or `Unauthenticated`; any failure
    /// clears the stored credential.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> SessionState {
        let stored = match self.store.load().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "could not read stored credential");
                None
            }
        };

        let Some(stored) = stored else {
            self.end_session().await;
            return self.state();
        };

        let epoch = {
            let mut inner = self.lock();
            inner.credential = Some(stored.credential());
            inner.portal = stored.portal().unwrap_or(Portal::Research);
            inner.refresh = None;
            inner.epoch += 1;
            inner.epoch
        };

        match self.fetch_profile().await {
            Ok(user) => {
                // Skipped if a login or logout superseded this restore.
                if self.lock().epoch == epoch {
                    info!(user = %user.username(), portal = %user.portal(), "restored session");
                    self.state.send_replace(SessionState::Authenticated(user));
                }
            }
            Err(e) => {
                warn!(error = %e, "stored credential rejected; signing out");
                if self.lock().epoch == epoch {
                    self.end_session().await;
                }
            }
        }

        self.state()
    }

    /// Signs in through `portal`'s token endpoint.
    ///
    /// On failure the session is left exactly as it was.
    ///
    /// # Errors
    ///
    /// `InvalidCredentials`, `Forbidden`, `RateLimited` for rejected logins;
    /// `NetworkFailure` or `Unknown` for failures worth retrying.
    #[instrument(skip(self, credentials), fields(username = %credentials.username()))]
    pub async fn login(
        &self,
        portal: Portal,
        credentials: &LoginCredentials,
    ) -> Result<CurrentUser, Report<SessionError>> {
        let request = ApiRequest::post(self.config.token_path(portal), json!(credentials));
        let response = self.execute(&request).await?;
        if !response.is_success() {
            let err = SessionError::from_login_status(response.status, response.detail());
            info!(status = response.status, error = %err, "login rejected");
            return Err(err.into());
        }

        let grant = LoginGrant::from_json(response.body)?;
        let user = match grant.user {
            Some(body) => CurrentUser::from_profile_json(body)?,
            None => self.profile_for(&grant.credential).await?,
        };

        {
            // The epoch moves while the write lock is held, so a refresh
            // waiting to persist sees it and backs off.
            let _writes = self.store_writes.lock().await;
            self.store
                .save(&StoredSession::new(&grant.credential, portal))
                .await
                .map_err(store_failure)?;

            let mut inner = self.lock();
            inner.credential = Some(grant.credential);
            inner.portal = portal;
            inner.refresh = None;
            inner.epoch += 1;
        }
        self.state
            .send_replace(SessionState::Authenticated(user.clone()));

        info!(role = %user.role(), %portal, "signed in");
        Ok(user)
    }

    /// Signs out. Safe to call at any time, any number of times.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if self.end_session().await {
            info!("signed out");
        }
    }

    /// Sets the bearer header from the current credential, or removes it
    /// when there is none.
    pub fn attach_to_request(&self, request: &mut ApiRequest) {
        match &self.lock().credential {
            Some(credential) => request.set_authorization(credential.bearer()),
            None => request.clear_authorization(),
        }
    }

    /// Sends an authenticated request.
    ///
    /// Refreshes first if the access token is already known to be expired,
    /// and routes an unauthorized answer through
    /// [`handle_unauthorized`](Self::handle_unauthorized). Any other status
    /// is returned to the caller as-is.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without a session, `NetworkFailure` if the backend
    /// is unreachable, and the refresh errors described on
    /// `handle_unauthorized`.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, Report<SessionError>> {
        self.ensure_fresh().await?;
        self.attach_to_request(&mut request);
        if request.authorization().is_none() {
            return Err(SessionError::NotAuthenticated.into());
        }

        let response = self.execute(&request).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }
        self.handle_unauthorized(request).await
    }

    /// Recovers a request that came back unauthorized.
    ///
    /// Refreshes the access token (joining a refresh already in flight) and
    /// re-issues the request exactly once. If the credential was already
    /// replaced since the request was sent, the request is simply re-sent
    /// with the new token.
    ///
    /// # Errors
    ///
    /// If the refresh fails the session has been ended and
    /// `AuthEvent::SessionExpired` sent; the error says why:
    /// `TokenExpiredUnrecoverable` if the refresh token was rejected,
    /// `NetworkFailure` or `InvalidResponse` if the refresh call itself
    /// broke. `RequestUnauthorized` if the retry is unauthorized as well.
    pub async fn handle_unauthorized(
        &self,
        mut failed: ApiRequest,
    ) -> Result<ApiResponse, Report<SessionError>> {
        let current = self.lock().credential.as_ref().map(Credential::bearer);
        let bearer = match current {
            None => return Err(SessionError::NotAuthenticated.into()),
            Some(current) if failed.authorization() != Some(current.as_str()) => current,
            Some(_) => self.refresh().await?.bearer(),
        };

        failed.set_authorization(bearer);
        let response = self.execute(&failed).await?;
        if response.is_unauthorized() {
            warn!(path = %failed.path(), "still unauthorized after refresh");
            return Err(SessionError::RequestUnauthorized {
                path: failed.path().to_string(),
            }
            .into());
        }
        Ok(response)
    }

    async fn ensure_fresh(&self) -> Result<(), Report<SessionError>> {
        let expired = match &self.lock().credential {
            None => return Err(SessionError::NotAuthenticated.into()),
            Some(credential) => credential.is_access_expired(Utc::now(), self.config.expiry_leeway()),
        };
        if expired {
            debug!("access token expired locally; refreshing before send");
            self.refresh().await?;
        }
        Ok(())
    }

    /// Obtains a new access token, sharing one backend call between all
    /// concurrent callers of the same session epoch.
    async fn refresh(&self) -> Result<Credential, Report<SessionError>> {
        let (epoch, future) = {
            let mut inner = self.lock();
            let epoch = inner.epoch;
            let joinable = inner
                .refresh
                .as_ref()
                .filter(|in_flight| in_flight.epoch == epoch)
                .map(|in_flight| in_flight.future.clone());
            if let Some(future) = joinable {
                debug!("joining in-flight refresh");
                (epoch, future)
            } else {
                let Some(credential) = inner.credential.clone() else {
                    return Err(SessionError::NotAuthenticated.into());
                };
                debug!("starting token refresh");
                let future = refresh_credential(
                    Arc::clone(&self.transport),
                    self.config.refresh_path().to_string(),
                    credential,
                )
                .boxed()
                .shared();
                inner.refresh = Some(InFlightRefresh {
                    epoch,
                    future: future.clone(),
                });
                (epoch, future)
            }
        };

        let outcome = future.clone().await;

        // The first caller to get here after completion applies the result.
        let (current, applies, portal) = {
            let mut inner = self.lock();
            let current = inner.epoch == epoch;
            let applies = current
                && inner
                    .refresh
                    .as_ref()
                    .is_some_and(|in_flight| in_flight.future.ptr_eq(&future));
            if applies {
                inner.refresh = None;
                if let Ok(credential) = &outcome {
                    inner.credential = Some(credential.clone());
                }
            }
            (current, applies, inner.portal)
        };

        match outcome {
            Ok(_) if !current => {
                debug!("discarding refresh result from an ended session");
                Err(SessionError::NotAuthenticated.into())
            }
            Ok(credential) => {
                if applies {
                    self.persist_refreshed(&credential, portal, epoch).await;
                    let _ = self.events.send(AuthEvent::TokenRefreshed);
                    debug!("access token refreshed");
                }
                Ok(credential)
            }
            Err(err) => {
                if applies {
                    self.expire_session(&err).await;
                }
                Err(err.into())
            }
        }
    }

    async fn persist_refreshed(&self, credential: &Credential, portal: Portal, epoch: u64) {
        let _writes = self.store_writes.lock().await;
        if self.lock().epoch != epoch {
            debug!("session changed before refreshed credential was stored; skipping");
            return;
        }
        if let Err(e) = self
            .store
            .save(&StoredSession::new(credential, portal))
            .await
        {
            warn!(error = %e, "could not persist refreshed credential");
        }
    }

    /// Ends the session after a failed refresh.
    async fn expire_session(&self, cause: &SessionError) {
        let portal = self.lock().portal;
        let was_authenticated = self.end_session().await;
        warn!(%portal, error = %cause, "token refresh failed; session ended");
        if was_authenticated {
            let _ = self.events.send(AuthEvent::session_expired(portal));
        }
    }

    /// Drops the credential everywhere. Returns whether a user was signed in.
    async fn end_session(&self) -> bool {
        {
            let mut inner = self.lock();
            inner.credential = None;
            inner.refresh = None;
            inner.epoch += 1;
        }
        // Waits out any save that passed its epoch check before the bump.
        let _writes = self.store_writes.lock().await;
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "could not clear stored credential");
        }
        self.state
            .send_replace(SessionState::Unauthenticated)
            .is_authenticated()
    }

    async fn fetch_profile(&self) -> Result<CurrentUser, Report<SessionError>> {
        let response = self
            .send(ApiRequest::get(self.config.profile_path()))
            .await?;
        profile_from_response(response)
    }

    /// Profile lookup with a credential that is not yet the session's.
    async fn profile_for(&self, credential: &Credential) -> Result<CurrentUser, Report<SessionError>> {
        let mut request = ApiRequest::get(self.config.profile_path());
        request.set_authorization(credential.bearer());
        let response = self.execute(&request).await?;
        profile_from_response(response)
    }

    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, Report<SessionError>> {
        self.transport
            .execute(request)
            .await
            .map_err(transport_failure)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("base_url", &self.config.base_url())
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

/// The refresh call itself. Runs without the manager so it can be shared.
async fn refresh_credential(
    transport: Arc<dyn Transport>,
    path: String,
    credential: Credential,
) -> RefreshOutcome {
    let request = ApiRequest::post(path, json!({ "refresh": credential.refresh_token() }));
    let response = transport
        .execute(&request)
        .await
        .map_err(|e| SessionError::from(e.current_context()))?;

    if !response.is_success() {
        debug!(status = response.status, "refresh rejected");
        return Err(SessionError::TokenExpiredUnrecoverable);
    }
    apply_refresh(&credential, response.body)
}

fn profile_from_response(response: ApiResponse) -> Result<CurrentUser, Report<SessionError>> {
    if !response.is_success() {
        return Err(SessionError::Unknown {
            status: response.status,
            detail: response.detail().unwrap_or_default(),
        }
        .into());
    }
    Ok(CurrentUser::from_profile_json(response.body)?)
}

fn transport_failure(report: Report<TransportError>) -> Report<SessionError> {
    SessionError::from(report.current_context()).into()
}

fn store_failure(report: Report<StoreError>) -> Report<SessionError> {
    SessionError::from(report.current_context()).into()
}
