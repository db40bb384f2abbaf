//! Contract Test: Controller Status Reporter
//!
//! Constraints verified:
//! - One POST per report carrying the token header and the JSON body
//! - HTTP 202 is success; anything else surfaces the status
//! - Failures are returned, not logged; the caller logs them once

use secrecy::SecretString;
use serde_json::json;
use smc_controller::ControllerReporter;
use smc_core::config::ControllerConfig;
use smc_core::model::BatchStatus;
use smc_core::traits::StatusReporter;
use smc_core::Error;
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Collects formatted log lines from the current thread
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn config_for(server: &MockServer) -> ControllerConfig {
    ControllerConfig {
        service_name: server.address().ip().to_string(),
        port: server.address().port(),
        module_service_name: "smc-exporter".to_string(),
        internal_token: SecretString::from("token-123".to_string()),
    }
}

#[tokio::test]
async fn report_posts_status_with_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/internal/update"))
        .and(header("x-internal-token", "token-123"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "service_name": "smc-exporter",
            "status": "failed",
            "update_batch_id": 42
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let reporter = ControllerReporter::new(&config_for(&server)).unwrap();

    reporter.report(42, BatchStatus::Failed).await.unwrap();
}

#[tokio::test]
async fn non_accepted_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/internal/update"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let reporter = ControllerReporter::new(&config_for(&server)).unwrap();
    let result = reporter.report(7, BatchStatus::Success).await;

    assert!(matches!(result, Err(Error::Remote { status: 200, .. })));
}

#[tokio::test]
async fn unreachable_controller_is_a_transport_error() {
    let server = MockServer::start().await;
    let config = config_for(&server);
    drop(server);

    let reporter = ControllerReporter::new(&config).unwrap();
    let result = reporter.report(7, BatchStatus::Success).await;

    assert!(matches!(result, Err(Error::Transport(_))));
}

#[tokio::test]
async fn failed_reports_are_left_to_the_caller_to_log() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/internal/update"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let config = config_for(&server);
    let rejecting = ControllerReporter::new(&config).unwrap();

    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let rejected = rejecting.report(9, BatchStatus::Failed).await;
    drop(server);
    let unreachable = ControllerReporter::new(&config)
        .unwrap()
        .report(9, BatchStatus::Failed)
        .await;

    assert!(matches!(rejected, Err(Error::Remote { status: 500, .. })));
    assert!(matches!(unreachable, Err(Error::Transport(_))));
    assert_eq!(logs.contents(), "");
}
