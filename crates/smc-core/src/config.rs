//! Configuration types for the SMC exporter
//!
//! This module defines all configuration structures used throughout the workspace.
//! Configuration is built once by the daemon and injected into constructors;
//! nothing reads process-wide state after startup.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::traits::KeyValueStore;

/// Store key holding the appliance endpoint
pub const SMC_ENDPOINT_KEY: &str = "smc_endpoint";
/// Store key holding the appliance port
pub const SMC_PORT_KEY: &str = "smc_port";
/// Store key holding the API authentication key
pub const SMC_API_KEY_KEY: &str = "smc_api_key";

/// Lowest port accepted for the appliance API
pub const MIN_PORT: u16 = 1024;

/// Appliance connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SmcConfig {
    /// Base URL including scheme, without a trailing `/`
    pub endpoint: String,

    /// API port, kept as text the way it is stored
    pub port: String,

    /// Authentication key sent at login
    pub api_key: SecretString,

    /// Administrative domain to log in to
    #[serde(default = "default_login_domain")]
    pub login_domain: String,

    /// Transport timeout for every request (in seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl SmcConfig {
    /// Create a configuration with default login domain and timeout
    pub fn new(
        endpoint: impl Into<String>,
        port: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            port: port.into(),
            api_key: SecretString::from(api_key.into()),
            login_domain: default_login_domain(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Override the login domain
    pub fn with_login_domain(mut self, domain: impl Into<String>) -> Self {
        self.login_domain = domain.into();
        self
    }

    /// Read the connection settings from the persisted store
    ///
    /// Missing keys read as empty strings so that the session reports them
    /// as a configuration error rather than a lookup failure.
    pub async fn from_store(store: &dyn KeyValueStore) -> Result<Self, crate::Error> {
        let endpoint = store.get(SMC_ENDPOINT_KEY).await?.unwrap_or_default();
        let port = store.get(SMC_PORT_KEY).await?.unwrap_or_default();
        let api_key = store.get(SMC_API_KEY_KEY).await?.unwrap_or_default();
        Ok(Self::new(endpoint, port, api_key))
    }

    /// Whether endpoint, port and key are all present
    pub fn is_complete(&self) -> bool {
        !self.endpoint.is_empty() && !self.port.is_empty() && !self.api_key.expose_secret().is_empty()
    }

    /// Parsed port number
    pub fn port_number(&self) -> Result<u16, crate::Error> {
        self.port
            .trim()
            .parse::<u16>()
            .map_err(|_| crate::Error::config(format!("SMC port is not a number: {:?}", self.port)))
    }

    /// `{endpoint}:{port}`
    pub fn base_address(&self) -> String {
        format!("{}:{}", self.endpoint, self.port)
    }

    /// Validate the appliance configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.endpoint.is_empty() {
            return Err(crate::Error::config("SMC endpoint cannot be empty"));
        }
        if !self.endpoint.starts_with("http://") && !self.endpoint.starts_with("https://") {
            return Err(crate::Error::config(
                "SMC endpoint must start with http:// or https://",
            ));
        }
        if self.endpoint.ends_with('/') {
            return Err(crate::Error::config("SMC endpoint must not end with /"));
        }

        let port = self.port_number()?;
        if port < MIN_PORT {
            return Err(crate::Error::config(format!(
                "SMC port must be between {} and 65535, got {}",
                MIN_PORT, port
            )));
        }

        if self.api_key.expose_secret().is_empty() {
            return Err(crate::Error::config("SMC API key cannot be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("SMC timeout must be > 0"));
        }

        Ok(())
    }
}

fn default_login_domain() -> String {
    "Shared Domain".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

/// Orchestrator status endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    /// Host name of the orchestrator service
    pub service_name: String,

    /// Port of the orchestrator service
    pub port: u16,

    /// This module's service name, sent with every status update
    pub module_service_name: String,

    /// Shared secret sent in the `x-internal-token` header
    pub internal_token: SecretString,
}

impl ControllerConfig {
    /// Status update URL
    pub fn update_url(&self) -> String {
        format!("http://{}:{}/internal/update", self.service_name, self.port)
    }

    /// Validate the controller configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.service_name.is_empty() {
            return Err(crate::Error::config("Controller service name cannot be empty"));
        }
        if self.port == 0 {
            return Err(crate::Error::config("Controller port must be > 0"));
        }
        if self.module_service_name.is_empty() {
            return Err(crate::Error::config("Module service name cannot be empty"));
        }
        Ok(())
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Capacity of the inbound batch queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Capacity of the observability event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Interval between login attempts while the published session is
    /// unauthenticated (in seconds)
    #[serde(default = "default_reauth_interval_secs")]
    pub reauth_interval_secs: u64,
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.queue_capacity == 0 {
            return Err(crate::Error::config("Batch queue capacity must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        if self.reauth_interval_secs == 0 {
            return Err(crate::Error::config("Re-authentication interval must be > 0"));
        }
        Ok(())
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
            reauth_interval_secs: default_reauth_interval_secs(),
        }
    }
}

fn default_queue_capacity() -> usize {
    64
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_reauth_interval_secs() -> u64 {
    30
}
