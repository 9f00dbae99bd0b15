//! Authenticated API client with coordinated token refresh and request replay

use crate::config::ClientConfig;
use crate::dispatcher::{ensure_success, Dispatcher};
use crate::error::{ClientError, Result};
use crate::refresh::{RefreshCoordinator, RefreshFailure, RefreshTicket};
use crate::session::{SessionState, SessionStore};
use crate::storage::Storage;
use crate::token_store::TokenStore;
use crate::transport::{ApiRequest, RawResponse, ReqwestTransport, Transport};
use crate::types::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Sends the user back to the login entry point
///
/// The UI layer implements this; the client calls it once per terminal
/// authentication failure.
pub trait Navigator: Send + Sync + 'static {
    fn redirect_to_login(&self, login_path: &str, reason: &LogoutReason);
}

/// Navigator for headless use: logs the redirect and does nothing else
pub struct TracingNavigator;

impl Navigator for TracingNavigator {
    fn redirect_to_login(&self, login_path: &str, reason: &LogoutReason) {
        warn!(login_path = %login_path, reason = ?reason, "Redirecting to login");
    }
}

/// REST client for the CRM backend
///
/// Every call carries the stored access token. A 401 triggers at most one
/// refresh no matter how many calls hit it concurrently; each blocked call is
/// replayed once with the new token, or rejected if the refresh fails.
pub struct ApiClient<T: Transport = ReqwestTransport> {
    config: ClientConfig,
    dispatcher: Dispatcher<T>,
    storage: Arc<dyn Storage>,
    token_store: TokenStore,
    session: SessionStore,
    coordinator: RefreshCoordinator,
    navigator: Arc<dyn Navigator>,
}

impl ApiClient<ReqwestTransport> {
    /// Create a client that talks to `config.base_url` over reqwest.
    pub fn new(config: ClientConfig, storage: Arc<dyn Storage>) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(config, transport, storage))
    }
}

impl<T: Transport> ApiClient<T> {
    pub fn with_transport(config: ClientConfig, transport: T, storage: Arc<dyn Storage>) -> Self {
        let token_store = TokenStore::new(Arc::clone(&storage));
        let session = SessionStore::load(Arc::clone(&storage));

        // A snapshot that claims a session without credentials to back it is dropped.
        if session.is_authenticated() && token_store.tokens().is_none() {
            debug!("Persisted session has no tokens, clearing it");
            if let Err(e) = session.clear() {
                warn!(error = %e, "Failed to clear stale session");
            }
        }

        Self {
            dispatcher: Dispatcher::new(transport, config.clone()),
            config,
            storage,
            token_store,
            session,
            coordinator: RefreshCoordinator::new(),
            navigator: Arc::new(TracingNavigator),
        }
    }

    pub fn with_navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.token_store
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn transport(&self) -> &T {
        self.dispatcher.transport()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    pub fn current_user(&self) -> Option<UserInfo> {
        self.session.user()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.snapshot()
    }

    pub fn update_user(&self, user: UserInfo) -> Result<()> {
        self.session.set_user(user)
    }

    /// Exchange credentials for a token pair and start the session.
    pub async fn login(&self, credentials: &LoginRequest) -> Result<UserInfo> {
        let request = ApiRequest::post(LOGIN_PATH).json(credentials)?;
        let response = self.dispatcher.dispatch(&request, None).await?;
        let response = ensure_success(response, LOGIN_PATH)?;

        let tokens = parse_token_response(&response)?;
        let user = tokens
            .user
            .clone()
            .ok_or_else(|| ClientError::InvalidResponse("Login response has no user".to_string()))?;

        self.token_store.store(&tokens.token_pair())?;
        self.session.login(user.clone())?;

        info!(user_id = %user.id, "Logged in");
        Ok(user)
    }

    /// Tell the backend, then drop local credentials whatever it answered.
    pub async fn logout(&self) {
        if let Some(token) = self.token_store.access_token() {
            let request = ApiRequest::post(LOGOUT_PATH);
            let result = self
                .dispatcher
                .dispatch(&request, Some(&token))
                .await
                .and_then(|response| ensure_success(response, LOGOUT_PATH));

            if let Err(e) = result {
                warn!(error = %e, "Logout request failed, clearing local session anyway");
            }
        }

        self.end_session(LogoutReason::UserInitiated);
        info!("Logged out");
    }

    /// Obtain a fresh access token, joining a refresh already in flight.
    ///
    /// Failure is terminal: tokens and session are cleared and the navigator
    /// is sent to the login page before the error returns.
    pub async fn refresh_session(&self) -> Result<String> {
        let guard = match self.coordinator.enqueue() {
            RefreshTicket::Wait(rx) => {
                return match rx.await {
                    Ok(Ok(token)) => Ok(token),
                    Ok(Err(RefreshFailure::Rejected(reason))) => {
                        Err(ClientError::SessionExpired(reason))
                    }
                    Ok(Err(RefreshFailure::Interrupted)) | Err(_) => {
                        Err(ClientError::RefreshInterrupted)
                    }
                };
            }
            RefreshTicket::Lead(guard) => guard,
        };

        let outcome = match self.token_store.refresh_token() {
            Some(refresh_token) => self
                .perform_refresh(refresh_token)
                .await
                .map_err(|e| LogoutReason::RefreshFailed(e.to_string())),
            None => Err(LogoutReason::MissingRefreshToken),
        };

        match outcome {
            Ok(access_token) => {
                let resumed = guard.succeed(&access_token);
                info!(resumed = %resumed, "Access token refreshed successfully");
                Ok(access_token)
            }
            Err(reason) => {
                let message = match &reason {
                    LogoutReason::RefreshFailed(e) => format!("Token refresh failed: {e}"),
                    _ => "No refresh token available".to_string(),
                };
                warn!(reason = ?reason, "Token refresh failed, ending session");

                self.end_session(reason);
                guard.fail(message.clone());
                Err(ClientError::SessionExpired(message))
            }
        }
    }

    /// Call `/auth/refresh` directly; a 401 here is final, never refreshed again.
    async fn perform_refresh(&self, refresh_token: String) -> Result<String> {
        let request = ApiRequest::post(REFRESH_PATH).json(&RefreshRequest { refresh_token })?;
        let response = self.dispatcher.dispatch(&request, None).await?;
        let response = ensure_success(response, REFRESH_PATH)?;

        let tokens = parse_token_response(&response)?;
        self.token_store.store(&tokens.token_pair())?;
        if let Some(user) = tokens.user {
            self.session.set_user(user)?;
        }

        Ok(tokens.access_token)
    }

    /// Send a request through the refresh-and-replay protocol and return the raw response.
    pub async fn execute(&self, request: ApiRequest) -> Result<RawResponse> {
        let sent_token = self.token_store.access_token();
        let response = self
            .dispatcher
            .dispatch(&request, sent_token.as_deref())
            .await?;

        if !response.is_unauthorized() || request.retried {
            return ensure_success(response, &request.path);
        }

        // The 401 may answer a token that a refresh has since replaced or a
        // terminal failure has since cleared.
        let access_token = match (self.token_store.access_token(), sent_token) {
            (Some(current), Some(sent)) if current != sent => {
                debug!(path = %request.path, "Token already refreshed, replaying");
                current
            }
            (None, Some(_)) => {
                debug!(path = %request.path, "Session already ended, not refreshing");
                return Err(ClientError::SessionExpired(
                    "Session ended before the request completed".to_string(),
                ));
            }
            _ => {
                debug!(path = %request.path, "Unauthorized, refreshing before replay");
                self.refresh_session().await?
            }
        };

        let mut replay = request;
        replay.retried = true;
        let response = self.dispatcher.dispatch(&replay, Some(&access_token)).await?;
        ensure_success(response, &replay.path)
    }

    /// Send a request and deserialize its JSON body.
    pub async fn request<R: DeserializeOwned>(&self, request: ApiRequest) -> Result<R> {
        let response = self.execute(request).await?;
        let body = if response.body.trim().is_empty() {
            "null"
        } else {
            response.body.as_str()
        };
        Ok(serde_json::from_str(body)?)
    }

    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        self.request(ApiRequest::get(path)).await
    }

    pub async fn post<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.request(ApiRequest::post(path).json(body)?).await
    }

    pub async fn put<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.request(ApiRequest::put(path).json(body)?).await
    }

    pub async fn patch<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.request(ApiRequest::patch(path).json(body)?).await
    }

    pub async fn delete<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        self.request(ApiRequest::delete(path)).await
    }

    /// Another handle removed the access token: drop local state and redirect.
    pub fn handle_external_logout(&self) {
        info!("Access token removed elsewhere, ending local session");
        self.end_session(LogoutReason::ExternalLogout);
    }

    fn end_session(&self, reason: LogoutReason) {
        if let Err(e) = self.token_store.clear() {
            warn!(error = %e, "Failed to clear tokens");
        }
        if let Err(e) = self.session.clear() {
            warn!(error = %e, "Failed to clear session");
        }
        self.navigator.redirect_to_login(&self.config.login_path, &reason);
    }
}

fn parse_token_response(response: &RawResponse) -> Result<TokenResponse> {
    let envelope: ApiResponse<TokenResponse> = serde_json::from_str(&response.body)?;
    envelope
        .into_data()
        .ok_or_else(|| ClientError::InvalidResponse("Response has no token data".to_string()))
}
