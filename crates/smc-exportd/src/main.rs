// # smc-exportd - SMC Intelligence Export Daemon
//
// This daemon is a THIN integration layer. List, session and reporting logic
// live in `smc-core`, `smc-session` and `smc-controller`.
//
// The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Seeding the persisted store and opening the first SMC session
// 3. Feeding newline-delimited JSON batches from stdin to the dispatcher
// 4. Reloading the store and re-opening the session on SIGHUP
// 5. Shutting down on SIGINT/SIGTERM (logout, persist)
//
// ## Configuration
//
// ### SMC connection (seeded into the store when set)
// - `SMC_ENDPOINT`: Base URL, e.g. `https://smc.example.net`
// - `SMC_PORT`: API port (1024-65535)
// - `SMC_API_KEY`: Authentication key
// - `SMC_LOGIN_DOMAIN`: Administrative domain to log in to (default `Shared Domain`)
//
// ### Controller
// - `CONTROLLER_SVC_NAME`: Controller host name
// - `CONTROLLER_PORT`: Controller port
// - `MODULE_SVC_NAME`: This module's service name
// - `INTERNAL_TOKEN`: Shared secret for status updates
//
// ### Daemon
// - `DIM_STATE_PATH`: Store file (default `/var/lib/dim/smc-exporter.json`)
// - `DIM_RULES_DIR`: Staging directory for IDS rule files (optional)
// - `DIM_QUEUE_CAPACITY`: Inbound batch queue capacity
// - `DIM_REAUTH_INTERVAL_SECS`: Login retry interval while unauthenticated
// - `DIM_LOG_LEVEL`: trace, debug, info, warn, error
//
// ## Example
//
// ```bash
// export SMC_ENDPOINT=https://smc.example.net
// export SMC_PORT=8082
// export SMC_API_KEY=...
// export CONTROLLER_SVC_NAME=dim-controller
// export CONTROLLER_PORT=8080
// export MODULE_SVC_NAME=dim-smc
// export INTERNAL_TOKEN=...
//
// intel-feed | smc-exportd
// ```

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

use smc_controller::ControllerReporter;
use smc_core::config::{SMC_API_KEY_KEY, SMC_ENDPOINT_KEY, SMC_PORT_KEY};
use smc_core::traits::{KeyValueStore, SmcApi};
use smc_core::{
    Batch, BatchDispatcher, ControllerConfig, DispatcherConfig, DispatcherEvent,
    FileKeyValueStore, ListReconciler, ListRegistry, SessionSlot, SmcConfig,
    StagingRuleWorkflow, retire_session,
};
use smc_session::SmcSession;

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

const DEFAULT_STATE_PATH: &str = "/var/lib/dim/smc-exporter.json";

/// Time allowed for the dispatcher to drain reports after a shutdown signal
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// How often a replaced session is checked for release before logout
const RETIRE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum ExportExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<ExportExitCode> for ExitCode {
    fn from(code: ExportExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Application configuration
struct Config {
    smc_endpoint: Option<String>,
    smc_port: Option<String>,
    smc_api_key: Option<SecretString>,
    smc_login_domain: Option<String>,
    controller: ControllerConfig,
    dispatcher: DispatcherConfig,
    state_path: PathBuf,
    rules_dir: Option<PathBuf>,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .with_context(|| format!("{} is required", key))
        };

        let controller_port = required("CONTROLLER_PORT")?;
        let controller = ControllerConfig {
            service_name: required("CONTROLLER_SVC_NAME")?,
            port: controller_port
                .parse()
                .with_context(|| format!("CONTROLLER_PORT is not a port: {}", controller_port))?,
            module_service_name: required("MODULE_SVC_NAME")?,
            internal_token: SecretString::from(lookup("INTERNAL_TOKEN").unwrap_or_default()),
        };

        let mut dispatcher = DispatcherConfig::default();
        if let Some(capacity) = lookup("DIM_QUEUE_CAPACITY") {
            dispatcher.queue_capacity = capacity
                .parse()
                .with_context(|| format!("DIM_QUEUE_CAPACITY is not a number: {}", capacity))?;
        }
        if let Some(interval) = lookup("DIM_REAUTH_INTERVAL_SECS") {
            dispatcher.reauth_interval_secs = interval.parse().with_context(|| {
                format!("DIM_REAUTH_INTERVAL_SECS is not a number: {}", interval)
            })?;
        }

        Ok(Self {
            smc_endpoint: lookup("SMC_ENDPOINT"),
            smc_port: lookup("SMC_PORT"),
            smc_api_key: lookup("SMC_API_KEY").map(SecretString::from),
            smc_login_domain: lookup("SMC_LOGIN_DOMAIN").filter(|d| !d.is_empty()),
            controller,
            dispatcher,
            state_path: lookup("DIM_STATE_PATH")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH)),
            rules_dir: lookup("DIM_RULES_DIR")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            log_level: lookup("DIM_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        self.controller.validate()?;
        self.dispatcher.validate()?;

        if parse_level(&self.log_level).is_none() {
            anyhow::bail!(
                "DIM_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            );
        }

        Ok(())
    }

    /// Write the SMC settings given in the environment into the store
    async fn seed_store(&self, store: &dyn KeyValueStore) -> Result<()> {
        use secrecy::ExposeSecret;

        if let Some(endpoint) = &self.smc_endpoint {
            store.set(SMC_ENDPOINT_KEY, endpoint).await?;
        }
        if let Some(port) = &self.smc_port {
            store.set(SMC_PORT_KEY, port).await?;
        }
        if let Some(key) = &self.smc_api_key {
            store.set(SMC_API_KEY_KEY, key.expose_secret()).await?;
        }
        Ok(())
    }
}

fn parse_level(level: &str) -> Option<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return ExportExitCode::ConfigError.into();
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return ExportExitCode::ConfigError.into();
    }

    let log_level = parse_level(&config.log_level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ExportExitCode::ConfigError.into();
    }

    info!("Starting smc-exportd");

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return ExportExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        let daemon = match prepare(config).await {
            Ok(daemon) => daemon,
            Err(e) => {
                error!("Startup error: {:#}", e);
                return ExportExitCode::ConfigError;
            }
        };

        match run_daemon(daemon).await {
            Ok(()) => ExportExitCode::CleanShutdown,
            Err(e) => {
                error!("Daemon error: {:#}", e);
                ExportExitCode::RuntimeError
            }
        }
    });

    // The stdin reader may still be parked in a blocking read
    rt.shutdown_timeout(Duration::from_secs(1));

    code.into()
}

/// Wired components, ready to run
struct Daemon {
    store: Arc<FileKeyValueStore>,
    slot: SessionSlot,
    dispatcher: BatchDispatcher,
    events: mpsc::Receiver<DispatcherEvent>,
    batch_tx: mpsc::Sender<Batch>,
    login_domain: Option<String>,
}

/// Open the store and build the dispatcher
///
/// Every failure here is a configuration or startup error.
async fn prepare(config: Config) -> Result<Daemon> {
    let store = Arc::new(
        FileKeyValueStore::new(&config.state_path)
            .await
            .with_context(|| format!("Failed to open store {}", config.state_path.display()))?,
    );
    config.seed_store(store.as_ref()).await?;
    store.persist().await?;

    let smc = smc_settings(store.as_ref(), config.smc_login_domain.as_deref()).await?;
    if smc.is_complete() {
        smc.validate()?;
    } else {
        warn!("SMC connection settings are incomplete, waiting for SIGHUP after they are stored");
    }

    let reporter = ControllerReporter::new(&config.controller)?;
    info!("Reporting batch outcomes to {}", reporter.update_url());

    let slot = SessionSlot::new();
    let (batch_tx, batch_rx) = mpsc::channel(config.dispatcher.queue_capacity);
    let reconciler = ListReconciler::new(ListRegistry::new(store.clone()));

    let (mut dispatcher, events) = BatchDispatcher::new(
        reconciler,
        Arc::new(reporter),
        slot.subscribe(),
        batch_rx,
        &config.dispatcher,
    )?;

    if let Some(dir) = &config.rules_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create rules directory {}", dir.display()))?;
        info!("Staging IDS rule files in {}", dir.display());
        dispatcher = dispatcher.with_rule_workflow(Arc::new(StagingRuleWorkflow::new(dir.clone())));
    }

    Ok(Daemon {
        store,
        slot,
        dispatcher,
        events,
        batch_tx,
        login_domain: config.smc_login_domain,
    })
}

/// Run until a shutdown signal or the end of input
async fn run_daemon(daemon: Daemon) -> Result<()> {
    let Daemon {
        store,
        slot,
        dispatcher,
        events,
        batch_tx,
        login_domain,
    } = daemon;
    let login_domain = login_domain.as_deref();

    let mut signals = ShutdownSignals::new()?;

    open_session(store.as_ref(), &slot, login_domain).await;

    let event_logger = tokio::spawn(log_events(events));
    let reader = tokio::spawn(read_batches(tokio::io::stdin(), batch_tx));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let mut dispatcher_task = tokio::spawn(dispatcher.run_with_shutdown(Some(shutdown_rx)));
    let mut shutdown_tx = Some(shutdown_tx);

    let joined = loop {
        tokio::select! {
            joined = &mut dispatcher_task => break joined,
            signal = signals.recv() => match signal {
                DaemonSignal::Reload => {
                    info!("Received SIGHUP, reloading store");
                    match reload_store(store.as_ref()).await {
                        Ok(()) => {
                            open_session(store.as_ref(), &slot, login_domain).await;
                        }
                        Err(e) => error!("Store not reloaded: {}", e),
                    }
                }
                DaemonSignal::Shutdown(name) => {
                    info!("Received shutdown signal: {}", name);
                    if let Some(tx) = shutdown_tx.take() {
                        let _ = tx.send(());
                    }
                    match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut dispatcher_task).await {
                        Ok(joined) => break joined,
                        Err(_) => {
                            dispatcher_task.abort();
                            anyhow::bail!("Shutdown timeout after {:?}", SHUTDOWN_TIMEOUT);
                        }
                    }
                }
            }
        }
    };

    reader.abort();

    if let Some(session) = slot.clear() {
        session.logout().await;
    }
    if let Err(e) = store.persist().await {
        error!("Failed to persist store: {}", e);
    }
    if let Err(e) = event_logger.await {
        debug!("Event logger ended abnormally: {}", e);
    }

    joined
        .context("Dispatcher task panicked")?
        .context("Dispatcher failed")?;

    info!("Shutdown complete");
    Ok(())
}

/// Write pending entries, then replace the store's view with the file
///
/// Entries whose earlier persist failed (a newly registered list id) would
/// be lost by the reload, so the reload is skipped while they cannot be
/// written.
async fn reload_store(store: &FileKeyValueStore) -> smc_core::Result<()> {
    store.persist().await?;
    store.reload().await
}

/// SMC settings from the store with the login domain override applied
async fn smc_settings(
    store: &dyn KeyValueStore,
    login_domain: Option<&str>,
) -> smc_core::Result<SmcConfig> {
    let config = SmcConfig::from_store(store).await?;
    Ok(match login_domain {
        Some(domain) => config.with_login_domain(domain),
        None => config,
    })
}

/// Open a session from the stored settings and publish it
///
/// A failure leaves the previous session (if any) in the slot. A replaced
/// session is logged out only after the batch using it releases it.
async fn open_session(
    store: &dyn KeyValueStore,
    slot: &SessionSlot,
    login_domain: Option<&str>,
) -> bool {
    let config = match smc_settings(store, login_domain).await {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to read SMC settings: {}", e);
            return false;
        }
    };
    if !config.is_complete() {
        warn!("SMC settings incomplete, no session opened");
        return false;
    }

    match SmcSession::open(&config).await {
        Ok(session) => {
            if !session.is_authenticated() {
                warn!(
                    "SMC login failed with HTTP {}, the dispatcher will retry",
                    session.last_login_status()
                );
            }
            if let Some(previous) = slot.publish(Arc::new(session)) {
                tokio::spawn(retire_session(previous, RETIRE_POLL_INTERVAL));
            }
            true
        }
        Err(e) => {
            error!("Failed to open SMC session: {}", e);
            false
        }
    }
}

/// Read newline-delimited JSON batches and enqueue them
///
/// Malformed lines are skipped. Returns the number of batches enqueued when
/// the input ends or the queue closes.
async fn read_batches<R>(input: R, batches: mpsc::Sender<Batch>) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let mut enqueued = 0;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("End of batch input");
                break;
            }
            Err(e) => {
                error!("Failed to read batch input: {}", e);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Batch>(line) {
            Ok(batch) => {
                debug!("Enqueueing batch {}", batch.batch_id);
                if batches.send(batch).await.is_err() {
                    warn!("Batch queue closed, stopping input");
                    break;
                }
                enqueued += 1;
            }
            Err(e) => warn!("Discarding malformed batch: {}", e),
        }
    }

    enqueued
}

async fn log_events(mut events: mpsc::Receiver<DispatcherEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(json) => debug!("dispatcher event: {}", json),
            Err(e) => debug!("dispatcher event (unencodable: {}): {:?}", e, event),
        }
    }
}

enum DaemonSignal {
    Reload,
    Shutdown(&'static str),
}

#[cfg(unix)]
struct ShutdownSignals {
    sighup: Signal,
    sigterm: Signal,
    sigint: Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    fn new() -> Result<Self> {
        Ok(Self {
            sighup: signal(SignalKind::hangup()).context("Failed to setup SIGHUP handler")?,
            sigterm: signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?,
            sigint: signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?,
        })
    }

    async fn recv(&mut self) -> DaemonSignal {
        tokio::select! {
            _ = self.sighup.recv() => DaemonSignal::Reload,
            _ = self.sigterm.recv() => DaemonSignal::Shutdown("SIGTERM"),
            _ = self.sigint.recv() => DaemonSignal::Shutdown("SIGINT"),
        }
    }
}

/// Fallback for non-Unix platforms: Ctrl-C only, no reload
#[cfg(not(unix))]
struct ShutdownSignals;

#[cfg(not(unix))]
impl ShutdownSignals {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> DaemonSignal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to wait for CTRL-C: {}", e);
            std::future::pending::<()>().await;
        }
        DaemonSignal::Shutdown("SIGINT")
    }
}
