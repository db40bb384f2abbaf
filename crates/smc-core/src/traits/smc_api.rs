// # SMC API Trait
//
// Defines the interface for an authenticated session against the SMC REST API.
//
// ## Implementations
//
// - reqwest + cookie jar: `smc-session` crate
// - Scripted doubles: `tests/common` in this crate
//
// ## Usage
//
// ```rust,ignore
// use smc_core::traits::{ApiRequest, SmcApi};
//
// async fn fetch(api: &dyn SmcApi) -> smc_core::Result<()> {
//     let response = api
//         .execute(ApiRequest::get("elements/ip_list/42/ip_address_list").accept_json())
//         .await?;
//
//     if response.status == 401 {
//         api.login().await?;
//     }
//     Ok(())
// }
// ```

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;

/// HTTP verbs used by the SMC contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
}

impl HttpMethod {
    /// Upper-case verb as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request against the versioned API root
///
/// `path` is relative to `{host}:{port}/{version}/`, e.g. `elements/ip_list`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// Create a request with no headers and no body
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Patch, path)
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach a JSON body and the matching `Content-Type`
    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self.header("Content-Type", "application/json")
    }

    /// Ask for a JSON response
    pub fn accept_json(self) -> Self {
        self.header("Accept", "application/json")
    }

    /// Look up a header value by case-insensitive name
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw response from the SMC API
///
/// Header names are stored lower-cased.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    /// Create a response with the given status and an empty body
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: String::new(),
        }
    }

    /// Add a header (name is lower-cased)
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Set a JSON body
    pub fn with_json(mut self, body: &serde_json::Value) -> Self {
        self.body = body.to_string();
        self
    }

    /// Look up a header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, crate::Error> {
        serde_json::from_str(&self.body).map_err(|e| {
            crate::Error::protocol(format!("Failed to decode response body: {}", e))
        })
    }
}

/// Trait for SMC session implementations
///
/// A session owns the transport, the discovered API version, the credential
/// and the authentication state.
///
/// # Retry Ownership
///
/// `execute` is the only network primitive and must NOT interpret status
/// codes or retry. Callers own the single re-login-and-replay on `401` so
/// they can resume their own multi-step protocol from the failing step.
///
/// # Thread Safety
///
/// Sessions are shared as `Arc<dyn SmcApi>`; `login` mutates the
/// authentication state through interior mutability.
#[async_trait]
pub trait SmcApi: Send + Sync {
    /// Execute a request against the versioned API root
    ///
    /// # Returns
    ///
    /// - `Ok(ApiResponse)`: Any HTTP status, uninterpreted
    /// - `Err(Error::Transport)`: The request never produced a response
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, crate::Error>;

    /// Submit the credential to the login endpoint
    ///
    /// Marks the session authenticated on HTTP 200 and unauthenticated on
    /// any other status. Safe to call repeatedly.
    ///
    /// # Returns
    ///
    /// The HTTP status of the login attempt
    async fn login(&self) -> Result<u16, crate::Error>;

    /// Best-effort session termination. Failures are logged, never returned.
    async fn logout(&self);

    /// Whether the last login succeeded
    fn is_authenticated(&self) -> bool;

    /// The API version embedded in every request path (e.g. "7.1")
    fn api_version(&self) -> &str;
}

/// Re-login attempts allowed per protocol step
pub const MAX_REAUTH_ATTEMPTS: usize = 1;

/// Execute `request`, re-authenticating once if the appliance answers `401`
///
/// The identical request is replayed after the re-login. A second `401`
/// becomes [`crate::Error::Remote`] with status 401; any other status is
/// returned to the caller for interpretation.
///
/// # Parameters
///
/// - `api`: Session to execute against
/// - `request`: Request to send (cloned per attempt)
/// - `step`: Name of the protocol step, for logs and errors
pub async fn execute_with_reauth(
    api: &dyn SmcApi,
    request: &ApiRequest,
    step: &str,
) -> Result<ApiResponse, crate::Error> {
    for attempt in 0..=MAX_REAUTH_ATTEMPTS {
        let response = api.execute(request.clone()).await?;
        if response.status != 401 {
            return Ok(response);
        }

        if attempt < MAX_REAUTH_ATTEMPTS {
            tracing::warn!(
                "{} {} rejected with 401 during {}, logging in again",
                request.method,
                request.path,
                step
            );
            let status = api.login().await?;
            tracing::debug!("Re-login returned HTTP {}", status);
        }
    }

    Err(crate::Error::remote(
        401,
        format!("{} still unauthorized after re-login", step),
    ))
}
