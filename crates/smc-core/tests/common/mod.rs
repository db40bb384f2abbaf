//! Test doubles and common utilities for contract tests
//!
//! `FakeSmc` is an in-memory appliance speaking the list contract, so tests
//! can assert both the requests sent and the resulting list contents.

#![allow(dead_code)]

use async_trait::async_trait;
use smc_core::config::DispatcherConfig;
use smc_core::error::{Error, Result};
use smc_core::model::BatchStatus;
use smc_core::traits::{ApiRequest, ApiResponse, HttpMethod, KeyValueStore, SmcApi, StatusReporter};
use smc_core::{DispatcherEvent, MemoryKeyValueStore};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, OwnedRwLockWriteGuard, RwLock, mpsc};

pub const API_VERSION: &str = "7.1";

const IP_LIST_PREFIX: &str = "elements/ip_list";
const URL_LIST_PREFIX: &str = "elements/url_list_application";

#[derive(Debug, Clone)]
struct FakeList {
    name: String,
    entries: Vec<String>,
    revision: u64,
}

#[derive(Debug, Default)]
struct FakeState {
    requests: Vec<ApiRequest>,
    next_id: u64,
    ip_lists: HashMap<String, FakeList>,
    url_lists: HashMap<String, FakeList>,
    unauthorized_remaining: usize,
    forced: VecDeque<(HttpMethod, u16)>,
    omit_location: bool,
    omit_etag: bool,
}

/// In-memory appliance implementing `SmcApi`
///
/// Clones share state, so a test can keep a handle after moving one into
/// the dispatcher.
#[derive(Clone)]
pub struct FakeSmc {
    state: Arc<Mutex<FakeState>>,
    authenticated: Arc<AtomicBool>,
    login_count: Arc<AtomicUsize>,
    logout_count: Arc<AtomicUsize>,
    login_status: Arc<Mutex<u16>>,
    gate: Arc<RwLock<()>>,
    entered: Arc<Notify>,
}

impl FakeSmc {
    /// A logged-in session
    pub fn new() -> Self {
        let fake = Self::unauthenticated();
        fake.authenticated.store(true, Ordering::SeqCst);
        fake
    }

    /// A session whose last login did not succeed
    pub fn unauthenticated() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                next_id: 40,
                ..FakeState::default()
            })),
            authenticated: Arc::new(AtomicBool::new(false)),
            login_count: Arc::new(AtomicUsize::new(0)),
            logout_count: Arc::new(AtomicUsize::new(0)),
            login_status: Arc::new(Mutex::new(200)),
            gate: Arc::new(RwLock::new(())),
            entered: Arc::new(Notify::new()),
        }
    }

    /// Answer the next `count` requests with 401
    pub fn reject_next(&self, count: usize) {
        self.state.lock().unwrap().unauthorized_remaining = count;
    }

    /// Answer the next request using `method` with `status`
    pub fn force_status(&self, method: HttpMethod, status: u16) {
        self.state.lock().unwrap().forced.push_back((method, status));
    }

    /// Status returned by `login`
    pub fn set_login_status(&self, status: u16) {
        *self.login_status.lock().unwrap() = status;
    }

    /// Create responses carry no `Location`
    pub fn omit_location(&self) {
        self.state.lock().unwrap().omit_location = true;
    }

    /// IP list retrieves carry no `ETag`
    pub fn omit_etag(&self) {
        self.state.lock().unwrap().omit_etag = true;
    }

    /// Seed an IP list with a known id
    pub fn seed_ip_list(&self, id: &str, name: &str, entries: &[&str]) {
        self.state.lock().unwrap().ip_lists.insert(
            id.to_string(),
            FakeList {
                name: name.to_string(),
                entries: entries.iter().map(|s| s.to_string()).collect(),
                revision: 1,
            },
        );
    }

    /// Seed a URL list with a known id
    pub fn seed_url_list(&self, id: &str, name: &str, entries: &[&str]) {
        self.state.lock().unwrap().url_lists.insert(
            id.to_string(),
            FakeList {
                name: name.to_string(),
                entries: entries.iter().map(|s| s.to_string()).collect(),
                revision: 1,
            },
        );
    }

    /// Park every request until the returned guard is dropped
    pub async fn hold_requests(&self) -> OwnedRwLockWriteGuard<()> {
        self.gate.clone().write_owned().await
    }

    /// Wait until a request has reached the appliance
    pub async fn request_arrived(&self) {
        self.entered.notified().await;
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// `(method, path)` of every request, in order
    pub fn request_lines(&self) -> Vec<(HttpMethod, String)> {
        self.requests()
            .into_iter()
            .map(|r| (r.method, r.path))
            .collect()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    pub fn login_count(&self) -> usize {
        self.login_count.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.logout_count.load(Ordering::SeqCst)
    }

    /// Entries of the IP list named `name`
    pub fn ip_entries(&self, name: &str) -> Option<Vec<String>> {
        let state = self.state.lock().unwrap();
        state
            .ip_lists
            .values()
            .find(|l| l.name == name)
            .map(|l| l.entries.clone())
    }

    /// Entries of the URL list named `name`
    pub fn url_entries(&self, name: &str) -> Option<Vec<String>> {
        let state = self.state.lock().unwrap();
        state
            .url_lists
            .values()
            .find(|l| l.name == name)
            .map(|l| l.entries.clone())
    }

    pub fn list_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.ip_lists.len() + state.url_lists.len()
    }

    fn handle(state: &mut FakeState, request: &ApiRequest) -> ApiResponse {
        let body = request.body.clone().unwrap_or(serde_json::Value::Null);

        match (request.method, request.path.as_str()) {
            (HttpMethod::Post, IP_LIST_PREFIX) | (HttpMethod::Post, URL_LIST_PREFIX) => {
                state.next_id += 1;
                let id = state.next_id.to_string();
                let name = body["name"].as_str().unwrap_or_default().to_string();
                let entries = body["url_entry"]
                    .as_array()
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                let list = FakeList {
                    name,
                    entries,
                    revision: 1,
                };
                if request.path == IP_LIST_PREFIX {
                    state.ip_lists.insert(id.clone(), list);
                } else {
                    state.url_lists.insert(id.clone(), list);
                }

                let response = ApiResponse::new(201);
                if state.omit_location {
                    response
                } else {
                    response.with_header(
                        "Location",
                        format!("https://smc.test:8082/{}/{}/{}", API_VERSION, request.path, id),
                    )
                }
            }
            (method, path) if path.starts_with(IP_LIST_PREFIX) && path.ends_with("/ip_address_list") => {
                let id = path
                    .trim_start_matches("elements/ip_list/")
                    .trim_end_matches("/ip_address_list")
                    .to_string();
                let omit_etag = state.omit_etag;
                let Some(list) = state.ip_lists.get_mut(&id) else {
                    return ApiResponse::new(404);
                };
                let etag = format!("\"{}-{}\"", id, list.revision);

                match method {
                    HttpMethod::Get => {
                        let response = ApiResponse::new(200)
                            .with_json(&serde_json::json!({ "ip": list.entries }));
                        if omit_etag {
                            response
                        } else {
                            response.with_header("ETag", etag)
                        }
                    }
                    HttpMethod::Post => {
                        if request.header_value("If-Match") != Some(etag.as_str()) {
                            return ApiResponse::new(412);
                        }
                        list.entries = body["ip"]
                            .as_array()
                            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
                            .unwrap_or_default();
                        list.revision += 1;
                        ApiResponse::new(202)
                    }
                    _ => ApiResponse::new(405),
                }
            }
            (method, path) if path.starts_with(URL_LIST_PREFIX) => {
                let id = path.trim_start_matches("elements/url_list_application/").to_string();
                let Some(list) = state.url_lists.get_mut(&id) else {
                    return ApiResponse::new(404);
                };

                match method {
                    HttpMethod::Get => ApiResponse::new(200)
                        .with_header("ETag", format!("\"{}-{}\"", id, list.revision))
                        .with_json(&serde_json::json!({
                            "name": list.name,
                            "url_entry": list.entries,
                        })),
                    HttpMethod::Patch => {
                        let Some(operations) = body.as_array() else {
                            return ApiResponse::new(400);
                        };
                        for operation in operations {
                            let position: usize = operation["path"]
                                .as_str()
                                .and_then(|p| p.strip_prefix("/url_entry/"))
                                .and_then(|n| n.parse().ok())
                                .unwrap_or(0);
                            if position == 0 {
                                return ApiResponse::new(400);
                            }
                            match operation["op"].as_str() {
                                Some("add") => {
                                    let value = operation["value"].as_str().unwrap_or_default();
                                    let index = (position - 1).min(list.entries.len());
                                    list.entries.insert(index, value.to_string());
                                }
                                Some("remove") if position <= list.entries.len() => {
                                    list.entries.remove(position - 1);
                                }
                                _ => return ApiResponse::new(422),
                            }
                        }
                        list.revision += 1;
                        ApiResponse::new(200)
                    }
                    _ => ApiResponse::new(405),
                }
            }
            _ => ApiResponse::new(404),
        }
    }
}

#[async_trait]
impl SmcApi for FakeSmc {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.entered.notify_one();
        let _open = self.gate.read().await;

        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        if state.unauthorized_remaining > 0 {
            state.unauthorized_remaining -= 1;
            return Ok(ApiResponse::new(401));
        }

        if let Some(index) = state.forced.iter().position(|(m, _)| *m == request.method) {
            if let Some((_, status)) = state.forced.remove(index) {
                return Ok(ApiResponse::new(status));
            }
        }

        Ok(Self::handle(&mut state, &request))
    }

    async fn login(&self) -> Result<u16> {
        self.login_count.fetch_add(1, Ordering::SeqCst);
        let status = *self.login_status.lock().unwrap();
        self.authenticated.store(status == 200, Ordering::SeqCst);
        Ok(status)
    }

    async fn logout(&self) {
        self.logout_count.fetch_add(1, Ordering::SeqCst);
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn api_version(&self) -> &str {
        API_VERSION
    }
}

/// A StatusReporter that records every report
#[derive(Clone, Default)]
pub struct RecordingReporter {
    reports: Arc<Mutex<Vec<(i64, BatchStatus)>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every report return an error (after recording it)
    pub fn failing() -> Self {
        let reporter = Self::default();
        reporter.fail.store(true, Ordering::SeqCst);
        reporter
    }

    pub fn reports(&self) -> Vec<(i64, BatchStatus)> {
        self.reports.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusReporter for RecordingReporter {
    async fn report(&self, batch_id: i64, status: BatchStatus) -> Result<()> {
        self.reports.lock().unwrap().push((batch_id, status));
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::transport("controller unreachable"));
        }
        Ok(())
    }
}

/// A store whose `persist` always fails
#[derive(Clone, Default)]
pub struct UnpersistableStore {
    inner: MemoryKeyValueStore,
    persist_attempts: Arc<AtomicUsize>,
}

impl UnpersistableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persist_attempts(&self) -> usize {
        self.persist_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyValueStore for UnpersistableStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.inner.remove(key).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.inner.keys().await
    }

    async fn persist(&self) -> Result<()> {
        self.persist_attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::kv_store("disk full"))
    }
}

/// Dispatcher settings for tests
pub fn test_dispatcher_config() -> DispatcherConfig {
    DispatcherConfig {
        queue_capacity: 16,
        event_channel_capacity: 256,
        reauth_interval_secs: 3600,
    }
}

/// Receive events until `predicate` matches, failing after two seconds
pub async fn wait_for_event<F>(
    events: &mut mpsc::Receiver<DispatcherEvent>,
    mut predicate: F,
) -> DispatcherEvent
where
    F: FnMut(&DispatcherEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Some(event) if predicate(&event) => return event,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for dispatcher event")
}

/// Wait for the completion event of `batch_id`
pub async fn wait_for_completion(
    events: &mut mpsc::Receiver<DispatcherEvent>,
    batch_id: i64,
) -> BatchStatus {
    match wait_for_event(events, |e| {
        matches!(e, DispatcherEvent::BatchCompleted { batch_id: id, .. } if *id == batch_id)
    })
    .await
    {
        DispatcherEvent::BatchCompleted { status, .. } => status,
        other => panic!("unexpected event {:?}", other),
    }
}
