//! Session and Credential Management
//!
//! A [`Client`] owns one set of [`Credentials`] and the session token issued
//! by `idoit.login`. All state is per instance; two clients in one process
//! never observe each other's credentials.
//!
//! # Authentication
//! Every request carries exactly one of:
//! - `X-RPC-Auth-Session` when a session token is cached, or
//! - `X-RPC-Auth-Username` + `X-RPC-Auth-Password` otherwise.
//!
//! A request with neither fails locally with `Authentication`.
//! The `apikey` parameter is injected into every call.

use std::sync::{Mutex, PoisonError};

use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{CmdbError, Result};
use crate::transport::{
    BatchCall, BatchItem, HttpTransport, Params, TransportOptions, HEADER_PASSWORD,
    HEADER_SESSION, HEADER_USERNAME,
};

/// Connection credentials for one CMDB instance
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    /// URL of the JSON-RPC endpoint (e.g. `https://cmdb.example.de/src/jsonrpc.php`)
    pub url: String,

    /// API key injected as the `apikey` parameter
    pub api_key: String,

    /// Username for basic authentication and login
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password for basic authentication and login
    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    /// Create credentials with URL and API key only
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { url: url.into(), api_key: api_key.into(), username: None, password: None }
    }

    /// Add username and password
    #[must_use]
    pub fn with_login(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

/// Authenticated JSON-RPC client for one CMDB instance
#[derive(Debug)]
pub struct Client {
    credentials: Credentials,
    transport: HttpTransport,
    login: Mutex<Option<BasicAuth>>,
    session_id: Mutex<Option<String>>,
}

/// Username and password used for basic authentication
#[derive(Clone)]
struct BasicAuth {
    username: String,
    password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Client {
    /// Create a client with default transport options
    pub fn new(credentials: Credentials) -> Result<Self> {
        Self::with_options(credentials, TransportOptions::default())
    }

    /// Create a client with explicit transport options
    pub fn with_options(credentials: Credentials, options: TransportOptions) -> Result<Self> {
        let transport = HttpTransport::new(&credentials.url, options)?;
        let login = match (&credentials.username, &credentials.password) {
            (Some(username), Some(password)) => {
                Some(BasicAuth { username: username.clone(), password: password.clone() })
            }
            _ => None,
        };
        Ok(Self { credentials, transport, login: Mutex::new(login), session_id: Mutex::new(None) })
    }

    /// Endpoint URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.credentials.url
    }

    /// API key injected into every call
    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.credentials.api_key
    }

    /// Username used for basic authentication, if any
    ///
    /// Reflects the credentials of the last successful [`Client::login`].
    #[must_use]
    pub fn username(&self) -> Option<String> {
        self.basic_auth()
            .map(|auth| auth.username)
            .or_else(|| self.credentials.username.clone())
    }

    /// Cached session token, if logged in
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the cached session token (e.g. to restore a persisted session)
    pub fn set_session_id(&self, session_id: Option<String>) {
        *self.session_id.lock().unwrap_or_else(PoisonError::into_inner) = session_id;
    }

    /// Whether a session token is cached
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.session_id().is_some()
    }

    /// Call a remote method with the client's authentication
    ///
    /// An `Authentication` error from the server clears the cached session.
    pub async fn request(&self, method: &str, params: Params) -> Result<Value> {
        let headers = self.auth_headers()?;
        let result = self.transport.send(method, self.with_api_key(params), headers).await;
        self.invalidate_on_auth_error(result)
    }

    /// Send several calls as one batch
    ///
    /// Every call gets the API key; each item carries its own outcome.
    pub async fn batch(&self, calls: Vec<BatchCall>) -> Result<Vec<BatchItem>> {
        let headers = self.auth_headers()?;
        let calls = calls
            .into_iter()
            .map(|call| BatchCall::new(call.method, self.with_api_key(call.params)))
            .collect();

        let items = self.invalidate_on_auth_error(self.transport.send_batch(calls, headers).await)?;
        if items.iter().any(|item| matches!(&item.outcome, Err(e) if e.is_authentication())) {
            self.clear_session("batch call rejected credentials");
        }
        Ok(items)
    }

    /// Log in and cache the session token
    ///
    /// Succeeds immediately if a session is already cached. `username` and
    /// `password` override the configured credentials; after a successful
    /// login they replace the client's basic credentials, so an invalidated
    /// session falls back to them.
    pub async fn login(&self, username: Option<&str>, password: Option<&str>) -> Result<()> {
        if self.is_logged_in() {
            debug!("session already established, skipping login");
            return Ok(());
        }

        let current = self.basic_auth();
        let username = username
            .map(str::to_string)
            .or_else(|| current.as_ref().map(|auth| auth.username.clone()))
            .or_else(|| self.credentials.username.clone())
            .ok_or_else(|| CmdbError::authentication("username is required to log in"))?;
        let password = password
            .map(str::to_string)
            .or_else(|| current.map(|auth| auth.password))
            .or_else(|| self.credentials.password.clone())
            .ok_or_else(|| CmdbError::authentication("password is required to log in"))?;

        let headers = basic_auth_headers(&username, &password)?;
        let result = self
            .transport
            .send("idoit.login", self.with_api_key(Params::new()), headers)
            .await?;

        let session_id = result
            .get("session-id")
            .and_then(Value::as_str)
            .ok_or_else(|| CmdbError::authentication("login response did not contain a session id"))?;

        self.set_session_id(Some(session_id.to_string()));
        info!(username = %username, "logged in");
        *self.login.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(BasicAuth { username, password });
        Ok(())
    }

    /// Invalidate the remote session and forget the local token
    ///
    /// The local token is cleared even when the remote call fails.
    pub async fn logout(&self) -> Result<()> {
        let result = self.request("idoit.logout", Params::new()).await;
        self.set_session_id(None);
        result.map(|_| ())
    }

    fn with_api_key(&self, mut params: Params) -> Params {
        params.insert("apikey".to_string(), Value::String(self.credentials.api_key.clone()));
        params
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        if let Some(session_id) = self.session_id() {
            let mut headers = HeaderMap::new();
            let value = HeaderValue::from_str(&session_id).map_err(|_| {
                CmdbError::authentication("session id contains characters not allowed in headers")
            })?;
            headers.insert(HEADER_SESSION, value);
            return Ok(headers);
        }

        match self.basic_auth() {
            Some(auth) => basic_auth_headers(&auth.username, &auth.password),
            None => Err(CmdbError::authentication(
                "no session token and no username/password available; log in first",
            )),
        }
    }

    fn basic_auth(&self) -> Option<BasicAuth> {
        self.login.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn invalidate_on_auth_error<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_authentication() {
                self.clear_session("server rejected credentials");
            }
        }
        result
    }

    fn clear_session(&self, reason: &str) {
        if self.session_id.lock().unwrap_or_else(PoisonError::into_inner).take().is_some() {
            warn!(reason, "cached session invalidated");
        }
    }
}

fn basic_auth_headers(username: &str, password: &str) -> Result<HeaderMap> {
    let invalid =
        || CmdbError::authentication("credentials contain characters not allowed in headers");

    let mut headers = HeaderMap::new();
    headers.insert(HEADER_USERNAME, HeaderValue::from_str(username).map_err(|_| invalid())?);
    let mut password = HeaderValue::from_str(password).map_err(|_| invalid())?;
    password.set_sensitive(true);
    headers.insert(HEADER_PASSWORD, password);
    Ok(headers)
}
