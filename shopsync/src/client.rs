use crate::error::{ApiError, Result};
use crate::navigator::{LogNavigator, Navigator, DEFAULT_LOGIN_PATH};
use crate::session::{Session, SessionStore, TokenStorage, User};
use crate::transport::{ApiRequest, ApiResponse, HttpMethod, HttpTransport, Transport};
use log::{debug, info, warn};
use reqwest::header;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Backend used when nothing else is configured.
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Body of `POST /auth/login` and `POST /auth/register` responses.
#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(rename = "accessToken", alias = "token")]
    access_token: String,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<User>,
}

/// Body of `POST /auth/refresh` responses. Only the access token is required.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(rename = "token", alias = "accessToken")]
    access_token: String,
    #[serde(rename = "refreshToken", default)]
    refresh_token: Option<String>,
    #[serde(default)]
    user: Option<User>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Authenticated client for the backend.
///
/// Every call goes through [`ApiClient::send`], which attaches the current access token and, on a
/// 401, refreshes the token once and replays the request once. When that is not possible the
/// session is cleared and the navigator is told to go back to the login page.
///
/// Concurrent 401s each run their own refresh; the last one to finish decides the stored token.
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    session: Arc<SessionStore>,
    navigator: Arc<dyn Navigator>,
    login_path: String,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<SessionStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        ApiClient {
            transport,
            session,
            navigator,
            login_path: DEFAULT_LOGIN_PATH.to_string(),
        }
    }

    /// Client talking HTTP to `base_url`, persisting tokens in `storage`, and only logging when
    /// the session ends.
    pub fn http(base_url: &str, storage: Arc<dyn TokenStorage>) -> Result<Self> {
        Ok(ApiClient::new(
            Arc::new(HttpTransport::new(base_url)?),
            Arc::new(SessionStore::new(storage)),
            Arc::new(LogNavigator),
        ))
    }

    pub fn with_login_path(mut self, login_path: &str) -> Self {
        self.login_path = login_path.to_string();
        self
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Sends `request` with the current credentials, recovering once from an expired token.
    ///
    /// Any response that is not a recoverable 401 (including the response to the replayed
    /// request, whatever its status) is returned as-is; use [`ApiResponse::error_for_status`] to
    /// turn error statuses into [`ApiError::Backend`].
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        match self.session.access_token() {
            Some(token) => request.set_bearer(&token)?,
            None => {
                request.headers.remove(header::AUTHORIZATION);
            }
        };
        debug!(
            "{} {} authenticated={}",
            request.method,
            request.path,
            request.bearer().is_some()
        );
        let res = self.transport.dispatch(&request).await?;
        if !res.is_unauthorized() || !request.recover || request.retried {
            return Ok(res);
        }

        request.retried = true;
        let current = match self.session.snapshot() {
            Some(s) if s.refresh_token.is_some() => s,
            _ => {
                debug!("401 on {} and no refresh token available", request.path);
                return Err(self.end_session(ApiError::Unauthenticated));
            }
        };
        let token = match self.refresh_session(&current).await {
            Ok(token) => token,
            Err(e) => {
                warn!("token refresh failed: {e}");
                return Err(self.end_session(ApiError::SessionExpired));
            }
        };
        request.set_bearer(&token)?;
        debug!("replaying {} {} with refreshed token", request.method, request.path);
        self.transport.dispatch(&request).await
    }

    /// `POST /auth/refresh`, straight to the transport: a failing refresh must not itself
    /// trigger recovery.
    async fn request_refresh(&self, refresh_token: &str) -> Result<RefreshResponse> {
        let req = ApiRequest::post("/auth/refresh", json!({ "refreshToken": refresh_token }));
        let res = self.transport.dispatch(&req).await?.error_for_status()?;
        let refreshed: RefreshResponse = res.json()?;
        if refreshed.access_token.is_empty() {
            return Err(ApiError::Backend {
                status: res.status,
                message: "refresh response did not contain a token".to_string(),
                body: None,
            });
        }
        Ok(refreshed)
    }

    /// Exchanges the refresh token of `current` for a new access token and stores the result.
    async fn refresh_session(&self, current: &Session) -> Result<String> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or(ApiError::Unauthenticated)?;
        let refreshed = self.request_refresh(refresh_token).await?;
        let token = refreshed.access_token.clone();
        self.session.set_session(Session {
            access_token: refreshed.access_token,
            refresh_token: refreshed
                .refresh_token
                .or_else(|| current.refresh_token.clone()),
            user: refreshed.user.unwrap_or_else(|| current.user.clone()),
        });
        info!("access token refreshed for user {}", current.user.id);
        Ok(token)
    }

    /// Refreshes the access token now, without waiting for a 401.
    ///
    /// Fails with [`ApiError::Unauthenticated`] if there is no refresh token, and with
    /// [`ApiError::SessionExpired`] if the backend refuses it; both end the session.
    pub async fn refresh(&self) -> Result<()> {
        let current = match self.session.snapshot() {
            Some(s) if s.refresh_token.is_some() => s,
            _ => return Err(self.end_session(ApiError::Unauthenticated)),
        };
        match self.refresh_session(&current).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("token refresh failed: {e}");
                Err(self.end_session(ApiError::SessionExpired))
            }
        }
    }

    fn end_session(&self, err: ApiError) -> ApiError {
        warn!("ending session: {err}");
        self.session.clear();
        self.navigator.redirect_to_login(&self.login_path);
        err
    }

    /// `GET /auth/me` with an explicit token, bypassing the session and recovery.
    async fn fetch_identity(&self, token: &str) -> Result<User> {
        let mut req = ApiRequest::get("/auth/me");
        req.set_bearer(token)?;
        let res = self.transport.dispatch(&req).await?.error_for_status()?;
        res.json()
    }

    async fn establish_session(&self, auth: AuthResponse) -> Result<User> {
        let user = match auth.user {
            Some(user) => user,
            None => self.fetch_identity(&auth.access_token).await?,
        };
        self.session.set_session(Session {
            access_token: auth.access_token,
            refresh_token: auth.refresh_token,
            user: user.clone(),
        });
        info!("logged in as {}", user.display_name());
        Ok(user)
    }

    /// Logs in with email and password, replacing any current session.
    ///
    /// Bad credentials come back as [`ApiError::Backend`] (usually status 401) and leave the
    /// current session untouched.
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let req = ApiRequest::post(
            "/auth/login",
            json!({
                "email": email,
                "password": password,
            }),
        )
        .without_recovery();
        let res = self.send(req).await?.error_for_status()?;
        self.establish_session(res.json()?).await
    }

    /// Creates an account and logs straight into it.
    pub async fn register(&self, account: &RegisterRequest) -> Result<User> {
        let req = ApiRequest::post("/auth/register", serde_json::to_value(account)?)
            .without_recovery();
        let res = self.send(req).await?.error_for_status()?;
        self.establish_session(res.json()?).await
    }

    /// The user behind the current token, according to the backend.
    pub async fn me(&self) -> Result<User> {
        self.get_json("/auth/me").await
    }

    pub fn logout(&self) {
        self.session.clear();
        info!("logged out");
    }

    /// Picks up a session persisted by an earlier run.
    ///
    /// The persisted token only becomes the current session once `GET /auth/me` accepts it. If it
    /// is rejected with a 401 and a refresh token was persisted too, that is exchanged once and
    /// the new token checked again. Any other failure clears the persisted tokens. Returns whether
    /// a session is now active. Never errors: no token is the normal anonymous state.
    pub async fn restore(&self) -> bool {
        let (token, refresh_token) = match self.session.persisted_tokens() {
            Some(tokens) => tokens,
            None => {
                debug!("no persisted session");
                return false;
            }
        };
        match self.verify_persisted(token, refresh_token).await {
            Ok(session) => {
                info!("restored session for {}", session.user.display_name());
                self.session.set_session(session);
                true
            }
            Err(e) => {
                warn!("persisted session could not be verified, discarding it: {e}");
                self.session.clear();
                false
            }
        }
    }

    async fn verify_persisted(
        &self,
        token: String,
        refresh_token: Option<String>,
    ) -> Result<Session> {
        let err = match self.fetch_identity(&token).await {
            Ok(user) => {
                return Ok(Session {
                    access_token: token,
                    refresh_token,
                    user,
                });
            }
            Err(e) => e,
        };
        let refresh_token = match refresh_token {
            Some(rt) if err.status() == Some(401) => rt,
            _ => return Err(err),
        };
        debug!("persisted access token rejected, trying the refresh token");
        let refreshed = self.request_refresh(&refresh_token).await?;
        let user = self.fetch_identity(&refreshed.access_token).await?;
        Ok(Session {
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token.or(Some(refresh_token)),
            user,
        })
    }

    /// Sends `request` and parses a JSON body, mapping error statuses to [`ApiError::Backend`].
    ///
    /// An empty body yields `None`.
    pub async fn request_json(&self, request: ApiRequest) -> Result<Option<Value>> {
        self.send(request).await?.error_for_status()?.json_opt()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send(ApiRequest::get(path))
            .await?
            .error_for_status()?
            .json()
    }

    pub async fn post_json(&self, path: &str, body: Value) -> Result<Option<Value>> {
        self.request_json(ApiRequest::post(path, body)).await
    }

    pub async fn put_json(&self, path: &str, body: Value) -> Result<Option<Value>> {
        self.request_json(ApiRequest::new(HttpMethod::Put, path).json(body))
            .await
    }

    pub async fn patch_json(&self, path: &str, body: Value) -> Result<Option<Value>> {
        self.request_json(ApiRequest::new(HttpMethod::Patch, path).json(body))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.send(ApiRequest::new(HttpMethod::Delete, path))
            .await?
            .error_for_status()?;
        Ok(())
    }
}
