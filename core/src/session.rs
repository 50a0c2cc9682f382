//! Authenticated HTTP access to the dashboard API.
//!
//! [`SessionClient`] attaches the current bearer token to every call and, when
//! the server answers 401, performs at most one refresh-and-retry for that
//! call. Concurrent 401s share a single refresh.

use crate::config::ClientSettings;
use crate::credentials::{CredentialBundle, CredentialStore, UserProfile};
use crate::error::ClientError;
use parking_lot::RwLock;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

const LOGIN_PATH: &str = "auth/login";
const REGISTER_PATH: &str = "auth/register";
const REFRESH_PATH: &str = "auth/refresh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
}

/// Session transitions observed by the rest of the application.
/// `Expired` means the user has to go back to the login entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn,
    Refreshed,
    LoggedOut,
    Expired,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

pub struct SessionClient {
    http: reqwest::Client,
    base_url: String,
    credentials: CredentialStore,
    refresh_gate: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
    last_error: RwLock<Option<String>>,
}

impl SessionClient {
    pub fn new(
        base_url: &Url,
        credentials: CredentialStore,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Network)?;
        let (events, _) = broadcast::channel(16);
        Ok(Self {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            credentials,
            refresh_gate: Mutex::new(()),
            events,
            last_error: RwLock::new(None),
        })
    }

    /// Builds a client whose credentials persist under the configured state dir.
    pub fn from_settings(settings: &ClientSettings) -> anyhow::Result<Self> {
        let credentials = CredentialStore::open(&settings.state_dir)?;
        Ok(Self::new(
            &settings.api_base_url,
            credentials,
            settings.request_timeout,
        )?)
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn state(&self) -> SessionState {
        if self.credentials.is_authenticated() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.credentials.access_token()
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.credentials.user()
    }

    /// Message from the most recent failed login or registration.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ClientError> {
        self.authenticate(LOGIN_PATH, json!({ "email": email, "password": password }))
            .await
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, ClientError> {
        self.authenticate(
            REGISTER_PATH,
            json!({ "name": name, "email": email, "password": password }),
        )
        .await
    }

    pub fn logout(&self) {
        self.credentials.clear();
        info!("logged out");
        self.events.send(SessionEvent::LoggedOut).ok();
    }

    /// Issues an authenticated request and returns the decoded JSON body.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let sent_token = self.credentials.access_token();
        let original = match self.send(&method, path, body, sent_token.as_deref()).await {
            Err(err) if err.is_unauthorized() => err,
            other => return other,
        };
        let token = self.recover(sent_token.as_deref(), original).await?;
        debug!(%method, path, "retrying request with refreshed credentials");
        self.send(&method, path, body, Some(&token)).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.call_as(Method::GET, path, None).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        self.call_as(Method::POST, path, Some(&body)).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        self.call_as(Method::PUT, path, Some(&body)).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        self.call_as(Method::PATCH, path, Some(&body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<Value, ClientError> {
        self.call(Method::DELETE, path, None).await
    }

    async fn call_as<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ClientError> {
        let value = self.call(method, path, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Obtains a usable access token after `original` came back 401.
    ///
    /// Holding `refresh_gate` keeps refreshes single-flight: a caller that
    /// finds the token already replaced since it sent its request reuses it.
    async fn recover(
        &self,
        sent_token: Option<&str>,
        original: ClientError,
    ) -> Result<String, ClientError> {
        let _gate = self.refresh_gate.lock().await;

        match self.credentials.access_token() {
            Some(current) if Some(current.as_str()) != sent_token => {
                debug!("credentials were refreshed concurrently, reusing them");
                return Ok(current);
            }
            None if sent_token.is_some() => {
                debug!("session already ended while waiting for the refresh gate");
                return Err(original);
            }
            _ => {}
        }

        let Some(refresh_token) = self.credentials.refresh_token() else {
            self.expire("no refresh token held");
            return Err(original);
        };

        match self.refresh(&refresh_token).await {
            Ok(response) => {
                self.credentials
                    .replace_access_token(response.access_token.clone(), response.refresh_token);
                info!("access token refreshed");
                self.events.send(SessionEvent::Refreshed).ok();
                Ok(response.access_token)
            }
            Err(err) => {
                warn!(%err, "token refresh failed");
                self.expire("refresh rejected");
                Err(ClientError::SessionExpired {
                    source: Box::new(err),
                })
            }
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ClientError> {
        let body = json!({ "refreshToken": refresh_token });
        let value = self
            .send(&Method::POST, REFRESH_PATH, Some(&body), None)
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    fn expire(&self, reason: &str) {
        let had_credentials = self.credentials.clear();
        warn!(reason, had_credentials, "session expired, credentials cleared");
        self.events.send(SessionEvent::Expired).ok();
    }

    async fn authenticate(&self, path: &str, body: Value) -> Result<AuthResponse, ClientError> {
        let result = match self.send(&Method::POST, path, Some(&body), None).await {
            Ok(value) => serde_json::from_value::<AuthResponse>(value).map_err(ClientError::from),
            Err(err) => Err(err),
        };
        match result {
            Ok(response) => {
                self.credentials.establish(
                    CredentialBundle {
                        access_token: Some(response.access_token.clone()),
                        refresh_token: Some(response.refresh_token.clone()),
                    },
                    response.user.clone(),
                );
                *self.last_error.write() = None;
                info!(
                    user = response.user.as_ref().map(|u| u.email.as_str()),
                    "session established"
                );
                self.events.send(SessionEvent::LoggedIn).ok();
                Ok(response)
            }
            Err(err) => {
                warn!(%err, path, "authentication failed");
                *self.last_error.write() = Some(err.user_message());
                Err(err)
            }
        }
    }

    async fn send(
        &self,
        method: &Method,
        path: &str,
        body: Option<&Value>,
        token: Option<&str>,
    ) -> Result<Value, ClientError> {
        let url = self.endpoint(path);
        let request_id = Uuid::new_v4();
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("x-request-id", request_id.to_string());
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        debug!(%method, %url, %request_id, authenticated = token.is_some(), "sending API request");

        let response = request.send().await.map_err(ClientError::Network)?;
        let status = response.status();
        let text = response.text().await.map_err(ClientError::Network)?;
        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&text)?);
        }
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Err(ClientError::Http {
            status: status.as_u16(),
            body,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}
