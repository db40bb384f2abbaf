//! Batch dispatcher
//!
//! The BatchDispatcher is responsible for:
//! - Consuming batches from the inbound queue, one at a time, in order
//! - Classifying each batch's elements by target
//! - Reconciling every group independently against the latest session
//! - Reporting exactly one outcome per batch
//!
//! ## Architecture
//!
//! ```text
//!  mpsc<Batch> ──────┐        ┌──────────────┐
//!                    ├──────▶ │ Dispatcher   │ ── DispatcherEvent ──▶ (observers)
//!  SessionSlot ──────┘        └──────────────┘
//!                                    │
//!            ┌───────────────────────┼───────────────────────┐
//!            ▼                       ▼                       ▼
//!   ┌────────────────┐      ┌────────────────┐      ┌────────────────┐
//!   │ ListReconciler │      │ RuleWorkflow   │      │ report worker  │
//!   │ (IP / URL)     │      │ (IDS rules)    │      │ (StatusReporter)│
//!   └────────────────┘      └────────────────┘      └────────────────┘
//! ```
//!
//! ## Batch Flow
//!
//! 1. Wait until the slot holds an authenticated session
//! 2. Receive the next batch and take the latest session
//! 3. Reconcile the IP, URL and rule groups; a failure never skips a sibling
//! 4. Enqueue `success` or `failed` for the report worker

pub mod slot;

pub use slot::{SessionReceiver, SessionSlot, SharedSession, retire_session};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::error::{Error, Result};
use crate::model::{Batch, BatchStatus, ListKind, ListParams, UpdateKind};
use crate::reconciler::{ListReconciler, ReconcileOutcome};
use crate::rules::apply_rules;
use crate::traits::{RuleWorkflow, SmcApi, StatusReporter};

/// Target group of a batch's elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchGroup {
    IpList,
    UrlList,
    Rules,
}

impl BatchGroup {
    fn for_kind(kind: ListKind) -> Self {
        match kind {
            ListKind::Ip => BatchGroup::IpList,
            ListKind::Url => BatchGroup::UrlList,
        }
    }
}

/// Events emitted by the BatchDispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatcherEvent {
    /// Dispatcher started
    Started,

    /// Batch taken off the queue
    BatchReceived { batch_id: i64, items: usize },

    /// IP-like values dropped by address validation
    ItemsRejected { batch_id: i64, values: Vec<String> },

    /// A group was applied
    GroupSucceeded {
        batch_id: i64,
        group: BatchGroup,
        outcome: ReconcileOutcome,
    },

    /// A group failed; sibling groups still run
    GroupFailed {
        batch_id: i64,
        group: BatchGroup,
        error: String,
    },

    /// Outcome enqueued for reporting
    BatchCompleted { batch_id: i64, status: BatchStatus },

    /// Dispatcher stopped
    Stopped { reason: String },
}

/// Single-consumer batch dispatcher
///
/// ## Lifecycle
///
/// 1. Create with [`BatchDispatcher::new()`]
/// 2. Start with [`BatchDispatcher::run()`]
/// 3. Runs until Ctrl-C, or until the batch queue closes
///
/// ## Load Resistance
///
/// - **Sequential batches**: one batch runs to completion before the next
/// - **Bounded event channel**: events are dropped (logged) when full
/// - **Unbounded report queue**: a slow orchestrator never stalls ingestion
pub struct BatchDispatcher {
    reconciler: ListReconciler,
    reporter: Arc<dyn StatusReporter>,
    rule_workflow: Option<Arc<dyn RuleWorkflow>>,
    sessions: SessionReceiver,
    batches: mpsc::Receiver<Batch>,
    reauth_interval: Duration,
    event_tx: mpsc::Sender<DispatcherEvent>,
}

impl BatchDispatcher {
    /// Create a new dispatcher
    ///
    /// # Parameters
    ///
    /// - `reconciler`: List reconciler (owns the registry)
    /// - `reporter`: Outcome reporter, driven by a separate worker task
    /// - `sessions`: Receiving side of the session slot
    /// - `batches`: Inbound batch queue
    /// - `config`: Dispatcher settings
    ///
    /// # Returns
    ///
    /// A tuple of (dispatcher, event_receiver)
    pub fn new(
        reconciler: ListReconciler,
        reporter: Arc<dyn StatusReporter>,
        sessions: SessionReceiver,
        batches: mpsc::Receiver<Batch>,
        config: &DispatcherConfig,
    ) -> Result<(Self, mpsc::Receiver<DispatcherEvent>)> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);

        let dispatcher = Self {
            reconciler,
            reporter,
            rule_workflow: None,
            sessions,
            batches,
            reauth_interval: Duration::from_secs(config.reauth_interval_secs),
            event_tx,
        };

        Ok((dispatcher, event_rx))
    }

    /// Attach the IDS rule workflow
    ///
    /// Without one, rule groups fail.
    pub fn with_rule_workflow(mut self, workflow: Arc<dyn RuleWorkflow>) -> Self {
        self.rule_workflow = Some(workflow);
        self
    }

    /// Run until Ctrl-C or until the batch queue closes
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(None).await
    }

    /// Run with an explicit shutdown signal
    ///
    /// With `None`, Ctrl-C stops the dispatcher. A dropped sender counts as
    /// a shutdown signal.
    pub async fn run_with_shutdown(
        mut self,
        shutdown_rx: Option<oneshot::Receiver<()>>,
    ) -> Result<()> {
        let shutdown = async move {
            match shutdown_rx {
                Some(rx) => {
                    let _ = rx.await;
                }
                None => {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for Ctrl-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
        };
        tokio::pin!(shutdown);

        let (report_tx, report_worker) = spawn_report_worker(self.reporter.clone());

        self.emit_event(DispatcherEvent::Started);
        info!("Batch dispatcher started");

        let reason = loop {
            let ready = tokio::select! {
                ready = self.wait_for_session() => ready,
                _ = &mut shutdown => break "Shutdown signal".to_string(),
            };
            if !ready {
                break "Session slot closed".to_string();
            }

            let batch = tokio::select! {
                batch = self.batches.recv() => batch,
                _ = &mut shutdown => break "Shutdown signal".to_string(),
            };
            let Some(batch) = batch else {
                break "Batch queue closed".to_string();
            };

            self.emit_event(DispatcherEvent::BatchReceived {
                batch_id: batch.batch_id,
                items: batch.items.len(),
            });

            let status = match self.sessions.latest() {
                Some(session) => self.process_batch(session.as_ref(), &batch).await,
                None => {
                    error!("Batch {}: session slot emptied before processing", batch.batch_id);
                    BatchStatus::Failed
                }
            };

            if report_tx.send((batch.batch_id, status)).is_err() {
                error!("Report worker stopped, dropping status for batch {}", batch.batch_id);
            }
            self.emit_event(DispatcherEvent::BatchCompleted {
                batch_id: batch.batch_id,
                status,
            });
        };

        info!("Batch dispatcher stopping: {}", reason);
        self.emit_event(DispatcherEvent::Stopped { reason });

        // Let the worker drain every report already enqueued
        drop(report_tx);
        if let Err(e) = report_worker.await {
            error!("Report worker panicked: {}", e);
        }

        if let Err(e) = self.reconciler.registry().store().persist().await {
            error!("Failed to persist store on shutdown: {}", e);
        }

        Ok(())
    }

    /// Block until the slot holds an authenticated session
    ///
    /// An unauthenticated session is given a fresh login every
    /// `reauth_interval`. Returns `false` when the slot is closed.
    async fn wait_for_session(&mut self) -> bool {
        let mut warned = false;
        loop {
            if self.sessions.authenticated().is_some() {
                return true;
            }
            if !warned {
                warn!("No authenticated SMC session, waiting before taking batches");
                warned = true;
            }

            tokio::select! {
                changed = self.sessions.changed() => {
                    if !changed {
                        return false;
                    }
                }
                _ = tokio::time::sleep(self.reauth_interval) => {
                    if let Some(session) = self.sessions.latest() {
                        match session.login().await {
                            Ok(status) => debug!("Background login returned HTTP {}", status),
                            Err(e) => warn!("Background login failed: {}", e),
                        }
                    }
                }
            }
        }
    }

    /// Apply every group of `batch` and fold the results into one status
    async fn process_batch(&self, session: &dyn SmcApi, batch: &Batch) -> BatchStatus {
        let classified = batch.classify();
        debug!(
            "Batch {}: {} IP, {} URL, {} rule value(s)",
            batch.batch_id,
            classified.ip.len(),
            classified.url.len(),
            classified.rules.len()
        );

        if !classified.rejected.is_empty() {
            warn!(
                "Batch {}: dropping {} invalid IP value(s): {:?}",
                batch.batch_id,
                classified.rejected.len(),
                classified.rejected
            );
            self.emit_event(DispatcherEvent::ItemsRejected {
                batch_id: batch.batch_id,
                values: classified.rejected.clone(),
            });
        }

        let mut all_succeeded = true;

        match batch.update {
            UpdateKind::Add => {
                for kind in [ListKind::Ip, ListKind::Url] {
                    let items = classified.for_kind(kind);
                    if items.is_empty() {
                        continue;
                    }
                    let params = ListParams::new(
                        UpdateKind::Add,
                        kind,
                        batch.safelist,
                        batch.batch_id,
                        items.to_vec(),
                    );
                    all_succeeded &= self.reconcile_group(session, &params).await;
                }

                if !classified.rules.is_empty() {
                    all_succeeded &= self.apply_rule_group(batch.batch_id, &classified.rules).await;
                }
            }
            UpdateKind::Delete => {
                if !classified.ip.is_empty() {
                    let params = ListParams::new(
                        UpdateKind::Delete,
                        ListKind::Ip,
                        batch.safelist,
                        batch.batch_id,
                        classified.ip.clone(),
                    );
                    all_succeeded &= self.reconcile_group(session, &params).await;
                }

                for value in &classified.url {
                    let params = ListParams::new(
                        UpdateKind::Delete,
                        ListKind::Url,
                        batch.safelist,
                        batch.batch_id,
                        vec![value.clone()],
                    );
                    all_succeeded &= self.reconcile_group(session, &params).await;
                }

                if !classified.rules.is_empty() {
                    let error = Error::not_supported("removing IDS rules");
                    all_succeeded &= self.record_group(batch.batch_id, BatchGroup::Rules, Err(error));
                }
            }
        }

        if all_succeeded {
            BatchStatus::Success
        } else {
            BatchStatus::Failed
        }
    }

    async fn reconcile_group(&self, session: &dyn SmcApi, params: &ListParams) -> bool {
        let result = self.reconciler.reconcile(session, params).await;
        self.record_group(params.batch_id, BatchGroup::for_kind(params.kind), result)
    }

    async fn apply_rule_group(&self, batch_id: i64, rules: &[String]) -> bool {
        let result = match &self.rule_workflow {
            Some(workflow) => apply_rules(workflow.as_ref(), batch_id, rules)
                .await
                .map(|_| ReconcileOutcome::Updated),
            None => Err(Error::rule_workflow("no rule workflow configured")),
        };
        self.record_group(batch_id, BatchGroup::Rules, result)
    }

    /// Log and emit a group result, returning whether it succeeded
    fn record_group(
        &self,
        batch_id: i64,
        group: BatchGroup,
        result: Result<ReconcileOutcome>,
    ) -> bool {
        match result {
            Ok(outcome) => {
                debug!("Batch {}: {:?} group {:?}", batch_id, group, outcome);
                self.emit_event(DispatcherEvent::GroupSucceeded {
                    batch_id,
                    group,
                    outcome,
                });
                true
            }
            Err(e) => {
                error!("Batch {}: {:?} group failed: {}", batch_id, group, e);
                self.emit_event(DispatcherEvent::GroupFailed {
                    batch_id,
                    group,
                    error: e.to_string(),
                });
                false
            }
        }
    }

    fn emit_event(&self, event: DispatcherEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Spawn the task that forwards outcomes to `reporter`
fn spawn_report_worker(
    reporter: Arc<dyn StatusReporter>,
) -> (mpsc::UnboundedSender<(i64, BatchStatus)>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<(i64, BatchStatus)>();

    let handle = tokio::spawn(async move {
        while let Some((batch_id, status)) = rx.recv().await {
            match reporter.report(batch_id, status).await {
                Ok(()) => debug!("Reported batch {} as {}", batch_id, status),
                Err(e) => error!("Failed to report batch {} as {}: {}", batch_id, status, e),
            }
        }
    });

    (tx, handle)
}
