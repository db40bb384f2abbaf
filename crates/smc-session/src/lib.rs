// # SMC Session
//
// This crate provides the reqwest-based implementation of `SmcApi`.
//
// ## Lifecycle
//
// 1. `SmcSession::open` checks that endpoint, port and key are present
// 2. `GET {endpoint}:{port}/api` lists the supported API versions; the
//    highest one is embedded in every later request path
// 3. `POST /{version}/login` with the authentication key; the appliance
//    answers with a session cookie kept in the client's cookie jar
// 4. `execute` sends list requests relative to `/{version}/`
// 5. `PUT /{version}/logout` on shutdown
//
// ## Responsibilities
//
// The session is a raw transport. It does not retry and does not interpret
// list-operation status codes; the registry and reconciler own the single
// re-login-and-replay on 401.
//
// ## Security Requirements
//
// - The authentication key NEVER appears in logs or Debug output
// - The key is held as a `SecretString` and only exposed to build the login body

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use smc_core::config::SmcConfig;
use smc_core::traits::{ApiRequest, ApiResponse, HttpMethod, SmcApi};
use smc_core::{Error, Result};

/// Version listing returned by `GET /api`
#[derive(Debug, Clone, Deserialize)]
struct VersionListing {
    #[serde(default)]
    version: Vec<VersionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct VersionEntry {
    #[serde(default)]
    #[allow(dead_code)]
    href: String,
    rel: String,
}

/// Authenticated session against one SMC appliance
///
/// # Thread Safety
///
/// The authentication flag and last login status are atomics, so a shared
/// `Arc<SmcSession>` can re-login from any task.
pub struct SmcSession {
    /// `{endpoint}:{port}`
    base_address: String,

    /// API version embedded in request paths
    version: String,

    /// Authentication key
    /// ⚠️ NEVER log this value
    api_key: SecretString,

    /// Administrative domain sent at login
    login_domain: String,

    /// HTTP client with cookie store
    client: reqwest::Client,

    authenticated: AtomicBool,

    last_login_status: AtomicU16,
}

// Custom Debug implementation that hides the API key
impl std::fmt::Debug for SmcSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmcSession")
            .field("base_address", &self.base_address)
            .field("version", &self.version)
            .field("api_key", &"<REDACTED>")
            .field("login_domain", &self.login_domain)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

impl SmcSession {
    /// Open a session: discover the API version, then log in
    ///
    /// # Returns
    ///
    /// - `Ok(SmcSession)`: Version discovered and login attempted; check
    ///   [`SmcApi::is_authenticated`] and [`SmcSession::last_login_status`]
    /// - `Err(Error::Config)`: Endpoint, port or key is empty (no request sent)
    /// - `Err(Error::Protocol)`: Version listing missing, empty or unreadable
    /// - `Err(Error::Transport)`: The appliance could not be reached
    pub async fn open(config: &SmcConfig) -> Result<Self> {
        if config.endpoint.is_empty()
            || config.port.is_empty()
            || config.api_key.expose_secret().is_empty()
        {
            return Err(Error::config(
                "SMC endpoint, port and API key are required to open a session",
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .build()
            .map_err(|e| Error::transport(format!("Failed to build HTTP client: {}", e)))?;

        let base_address = config.base_address();
        let version = discover_version(&client, &base_address).await?;
        info!("Using SMC API version {} at {}", version, base_address);

        let session = Self {
            base_address,
            version,
            api_key: config.api_key.clone(),
            login_domain: config.login_domain.clone(),
            client,
            authenticated: AtomicBool::new(false),
            last_login_status: AtomicU16::new(0),
        };

        let status = session.login().await?;
        if status == 200 {
            info!("Logged in to SMC");
        } else {
            warn!("SMC login rejected with HTTP {}", status);
        }

        Ok(session)
    }

    /// HTTP status of the most recent login attempt (0 before the first)
    pub fn last_login_status(&self) -> u16 {
        self.last_login_status.load(Ordering::SeqCst)
    }

    /// `{endpoint}:{port}/{version}`
    pub fn versioned_root(&self) -> String {
        format!("{}/{}", self.base_address, self.version)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.versioned_root(), path.trim_start_matches('/'))
    }
}

#[async_trait]
impl SmcApi for SmcSession {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = self.url(&request.path);
        debug!("{} {}", request.method, url);

        let mut builder = self.client.request(to_reqwest_method(request.method), &url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.to_string());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::transport(format!("{} {} failed: {}", request.method, url, e)))?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(format!("Failed to read response body: {}", e)))?;

        debug!("{} {} -> HTTP {}", request.method, url, status);
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    async fn login(&self) -> Result<u16> {
        let body = serde_json::json!({
            "domain": self.login_domain,
            "authentication_key": self.api_key.expose_secret(),
        });

        let result = self
            .client
            .post(self.url("login"))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                self.last_login_status.store(status, Ordering::SeqCst);
                self.authenticated.store(status == 200, Ordering::SeqCst);
                Ok(status)
            }
            Err(e) => {
                self.authenticated.store(false, Ordering::SeqCst);
                Err(Error::transport(format!("SMC login request failed: {}", e)))
            }
        }
    }

    async fn logout(&self) {
        let result = self.client.put(self.url("logout")).send().await;
        self.authenticated.store(false, Ordering::SeqCst);

        match result {
            Ok(response) if response.status().as_u16() == 204 => {
                info!("Logged out of SMC");
            }
            Ok(response) => {
                error!("SMC logout was unsuccessful. Status: {}", response.status());
            }
            Err(e) => {
                error!("SMC logout request failed: {}", e);
            }
        }
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn api_version(&self) -> &str {
        &self.version
    }
}

/// Fetch `{base}/api` and pick the highest version
async fn discover_version(client: &reqwest::Client, base_address: &str) -> Result<String> {
    let url = format!("{}/api", base_address);
    let response = client
        .get(&url)
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| Error::transport(format!("GET {} failed: {}", url, e)))?;

    let status = response.status().as_u16();
    if status != 200 {
        return Err(Error::protocol(format!(
            "API version listing returned HTTP {}",
            status
        )));
    }

    let listing: VersionListing = response
        .json()
        .await
        .map_err(|e| Error::protocol(format!("Failed to decode API version listing: {}", e)))?;

    select_version(&listing.version)
        .ok_or_else(|| Error::protocol("API version listing is empty"))
}

/// The highest `rel` by numeric components
///
/// Ties let the later entry win, so a listing in ascending order yields its
/// last entry. Unparseable entries are only chosen when nothing parses.
fn select_version(entries: &[VersionEntry]) -> Option<String> {
    let mut best: Option<(Vec<u64>, &str)> = None;

    for entry in entries {
        let Some(candidate) = parse_version(&entry.rel) else {
            continue;
        };
        if best.as_ref().is_none_or(|(current, _)| candidate >= *current) {
            best = Some((candidate, entry.rel.as_str()));
        }
    }

    best.map(|(_, rel)| rel.to_string())
        .or_else(|| entries.last().map(|entry| entry.rel.clone()))
}

fn parse_version(rel: &str) -> Option<Vec<u64>> {
    rel.split('.').map(|part| part.parse::<u64>().ok()).collect()
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
    }
}
