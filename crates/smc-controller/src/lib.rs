// # Controller Status Reporter
//
// Implements `StatusReporter` against the intelligence-manager controller.
//
// ## Wire Format
//
// ```text
// POST http://{service_name}:{port}/internal/update
// x-internal-token: <token>
// Content-Type: application/json
//
// {"service_name": "<module>", "status": "success", "update_batch_id": 7}
// ```
//
// The controller answers `202 Accepted`. Anything else is returned as
// `Error::Remote` without logging here; the dispatcher's report worker logs
// each failed report once and moves on.
//
// ## Security Requirements
//
// - The internal token NEVER appears in logs or Debug output

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use smc_core::config::ControllerConfig;
use smc_core::model::BatchStatus;
use smc_core::traits::StatusReporter;
use smc_core::{Error, Result};

/// Timeout for a single status update
pub const REPORT_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the shared secret
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-token";

/// Body of a status update
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate<'a> {
    pub service_name: &'a str,
    pub status: BatchStatus,
    pub update_batch_id: i64,
}

/// Reports batch outcomes to the controller over HTTP
pub struct ControllerReporter {
    update_url: String,
    module_service_name: String,

    /// Shared secret
    /// ⚠️ NEVER log this value
    internal_token: SecretString,

    client: reqwest::Client,
}

impl std::fmt::Debug for ControllerReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerReporter")
            .field("update_url", &self.update_url)
            .field("module_service_name", &self.module_service_name)
            .field("internal_token", &"<REDACTED>")
            .finish()
    }
}

impl ControllerReporter {
    /// Create a reporter for the configured controller
    pub fn new(config: &ControllerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REPORT_TIMEOUT)
            .build()
            .map_err(|e| Error::transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            update_url: config.update_url(),
            module_service_name: config.module_service_name.clone(),
            internal_token: config.internal_token.clone(),
            client,
        })
    }

    pub fn update_url(&self) -> &str {
        &self.update_url
    }
}

#[async_trait]
impl StatusReporter for ControllerReporter {
    async fn report(&self, batch_id: i64, status: BatchStatus) -> Result<()> {
        let update = StatusUpdate {
            service_name: &self.module_service_name,
            status,
            update_batch_id: batch_id,
        };
        let body = serde_json::to_string(&update)?;

        debug!("Reporting batch {} as {} to {}", batch_id, status, self.update_url);

        let response = self
            .client
            .post(&self.update_url)
            .header(INTERNAL_TOKEN_HEADER, self.internal_token.expose_secret())
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::transport(format!("Status update failed: {}", e)))?;

        let code = response.status().as_u16();
        if code != 202 {
            return Err(Error::remote(
                code,
                format!("controller rejected the status update for batch {}", batch_id),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_update_wire_format() {
        let update = StatusUpdate {
            service_name: "smc-exporter",
            status: BatchStatus::Success,
            update_batch_id: 7,
        };

        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({
                "service_name": "smc-exporter",
                "status": "success",
                "update_batch_id": 7
            })
        );
    }

    #[test]
    fn test_debug_hides_token() {
        let config = ControllerConfig {
            service_name: "controller".to_string(),
            port: 8080,
            module_service_name: "smc".to_string(),
            internal_token: SecretString::from("super-secret".to_string()),
        };
        let reporter = ControllerReporter::new(&config).unwrap();

        let debug = format!("{:?}", reporter);
        assert!(!debug.contains("super-secret"));
        assert_eq!(reporter.update_url(), "http://controller:8080/internal/update");
    }
}
