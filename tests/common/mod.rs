//! Shared test doubles for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use db_router::db::{
    Connection, ConnectionProvider, KeyPicker, MissingHandler, Registration, Registry,
    RegistrySnapshot,
};
use db_router::error::{DbError, DbResult};
use db_router::models::DatabaseType;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Everything the connections of one provider were asked to do.
#[derive(Debug, Default)]
pub struct CallLog {
    executes: AtomicUsize,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    closes: AtomicUsize,
    auto_commit_changes: Mutex<Vec<bool>>,
    fail_auto_commit_writes: AtomicBool,
    fail_auto_commit_reads: AtomicBool,
}

impl CallLog {
    pub fn executes(&self) -> usize {
        self.executes.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Every `set_auto_commit` value that reached a real connection, in order.
    pub fn auto_commit_changes(&self) -> Vec<bool> {
        self.auto_commit_changes.lock().unwrap().clone()
    }

    /// Make every later `set_auto_commit` fail.
    pub fn fail_auto_commit_writes(&self) {
        self.fail_auto_commit_writes.store(true, Ordering::SeqCst);
    }

    /// Make every later `auto_commit` read fail.
    pub fn fail_auto_commit_reads(&self) {
        self.fail_auto_commit_reads.store(true, Ordering::SeqCst);
    }
}

/// Connection that records every call into its provider's [`CallLog`].
#[derive(Debug)]
pub struct RecordingConnection {
    log: Arc<CallLog>,
    auto_commit: bool,
    closed: bool,
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn execute(&mut self, _sql: &str) -> DbResult<u64> {
        if self.closed {
            return Err(DbError::connection("connection closed", "acquire a new one"));
        }
        self.log.executes.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.log.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.log.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        if !self.closed {
            self.closed = true;
            self.log.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> DbResult<()> {
        if self.log.fail_auto_commit_writes.load(Ordering::SeqCst) {
            return Err(DbError::connection("autocommit change rejected", "retry later"));
        }
        self.auto_commit = auto_commit;
        self.log.auto_commit_changes.lock().unwrap().push(auto_commit);
        Ok(())
    }

    async fn auto_commit(&self) -> DbResult<bool> {
        if self.log.fail_auto_commit_reads.load(Ordering::SeqCst) {
            return Err(DbError::connection("autocommit state unavailable", "retry later"));
        }
        Ok(self.auto_commit)
    }

    async fn is_closed(&self) -> bool {
        self.closed
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Other
    }
}

/// Provider handing out [`RecordingConnection`]s.
#[derive(Debug)]
pub struct RecordingProvider {
    name: String,
    url: Option<String>,
    log: Arc<CallLog>,
    acquired: AtomicUsize,
    users: Mutex<Vec<String>>,
}

impl RecordingProvider {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            url: None,
            log: Arc::new(CallLog::default()),
            acquired: AtomicUsize::new(0),
            users: Mutex::new(Vec::new()),
        })
    }

    pub fn with_url(name: &str, url: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            url: Some(url.to_string()),
            log: Arc::new(CallLog::default()),
            acquired: AtomicUsize::new(0),
            users: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    /// Users passed to `acquire_with`, in order.
    pub fn users(&self) -> Vec<String> {
        self.users.lock().unwrap().clone()
    }

    fn connection(&self) -> Box<dyn Connection> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Box::new(RecordingConnection {
            log: Arc::clone(&self.log),
            auto_commit: true,
            closed: false,
        })
    }
}

#[async_trait]
impl ConnectionProvider for RecordingProvider {
    async fn acquire(&self) -> DbResult<Box<dyn Connection>> {
        Ok(self.connection())
    }

    async fn acquire_with(&self, user: &str, _password: &str) -> DbResult<Box<dyn Connection>> {
        self.users.lock().unwrap().push(user.to_string());
        Ok(self.connection())
    }

    fn url(&self) -> Option<String> {
        self.url.clone()
    }
}

/// Registry with one recording provider per key; the first key is the default.
pub fn registry_of(keys: &[&str]) -> (Arc<Registry>, HashMap<String, Arc<RecordingProvider>>) {
    let providers: HashMap<_, _> = keys
        .iter()
        .map(|key| (key.to_string(), RecordingProvider::new(key)))
        .collect();

    let registry = Registry::new(keys[0], providers[keys[0]].clone()).unwrap();
    for key in &keys[1..] {
        registry
            .add(*key, providers[*key].clone(), Registration::default())
            .unwrap();
    }
    (Arc::new(registry), providers)
}

/// Name of the recording provider behind `provider`.
pub fn name_of(provider: Arc<dyn ConnectionProvider>) -> String {
    provider
        .into_any()
        .downcast::<RecordingProvider>()
        .expect("not a RecordingProvider")
        .name
        .clone()
}

/// Picker cycling through 0, 1, 2, ...
#[derive(Debug, Default)]
pub struct CyclePicker {
    next: AtomicUsize,
}

impl KeyPicker for CyclePicker {
    fn pick(&self, candidates: usize) -> usize {
        self.next.fetch_add(1, Ordering::SeqCst) % candidates
    }
}

/// Missing handler answering with a fixed supplement.
#[derive(Debug, Default)]
pub struct SupplementHandler {
    supplement: HashMap<String, Arc<RecordingProvider>>,
    calls: Mutex<Vec<String>>,
}

impl SupplementHandler {
    pub fn new(keys: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            supplement: keys
                .iter()
                .map(|key| (key.to_string(), RecordingProvider::new(key)))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Keys the handler was consulted for, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl MissingHandler for SupplementHandler {
    fn handle(
        &self,
        key: &str,
        _snapshot: &RegistrySnapshot,
    ) -> Option<HashMap<String, Arc<dyn ConnectionProvider>>> {
        self.calls.lock().unwrap().push(key.to_string());
        Some(
            self.supplement
                .iter()
                .map(|(key, provider)| {
                    let provider: Arc<dyn ConnectionProvider> = provider.clone();
                    (key.clone(), provider)
                })
                .collect(),
        )
    }
}
