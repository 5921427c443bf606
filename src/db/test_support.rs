//! Test doubles shared by the unit tests of the `db` module.

use crate::context::ContextSource;
use crate::db::connection::{Connection, ConnectionProvider};
use crate::db::decrypt::CredentialDecryptor;
use crate::db::registry::RegistrySnapshot;
use crate::db::router::{KeyPicker, MissingHandler};
use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Provider that hands out [`StubConnection`]s and counts acquisitions.
#[derive(Debug)]
pub struct StubProvider {
    name: String,
    url: Option<String>,
    password: Mutex<String>,
    acquired: AtomicUsize,
}

impl StubProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            url: None,
            password: Mutex::new(String::new()),
            acquired: AtomicUsize::new(0),
        }
    }

    pub fn with_url(name: &str, url: &str) -> Self {
        Self {
            url: Some(url.to_string()),
            ..Self::new(name)
        }
    }

    pub fn with_password(name: &str, password: &str) -> Self {
        Self {
            password: Mutex::new(password.to_string()),
            ..Self::new(name)
        }
    }

    pub fn arc(name: &str) -> Arc<dyn ConnectionProvider> {
        Arc::new(Self::new(name))
    }

    pub fn arc_with_url(name: &str, url: &str) -> Arc<dyn ConnectionProvider> {
        Arc::new(Self::with_url(name, url))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn password(&self) -> String {
        self.password.lock().unwrap().clone()
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionProvider for StubProvider {
    async fn acquire(&self) -> DbResult<Box<dyn Connection>> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubConnection::new(&self.name)))
    }

    async fn acquire_with(&self, user: &str, _password: &str) -> DbResult<Box<dyn Connection>> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubConnection::new(&format!("{}:{}", self.name, user))))
    }

    fn url(&self) -> Option<String> {
        self.url.clone()
    }

    fn decrypt_credentials(&self, decryptor: &dyn CredentialDecryptor) -> DbResult<()> {
        let mut password = self.password.lock().unwrap();
        if let Some(plain) = decryptor
            .decrypt(&password)
            .map_err(|e| DbError::decrypt(self.name.as_str(), e))?
        {
            *password = plain;
        }
        Ok(())
    }
}

/// Name of a provider built by [`StubProvider`].
pub fn provider_name(provider: &Arc<dyn ConnectionProvider>) -> String {
    Arc::clone(provider)
        .into_any()
        .downcast::<StubProvider>()
        .expect("not a StubProvider")
        .name
        .clone()
}

/// In-memory connection that only tracks its lifecycle flags.
#[derive(Debug)]
pub struct StubConnection {
    pub name: String,
    pub auto_commit: bool,
    pub closed: bool,
}

impl StubConnection {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            auto_commit: true,
            closed: false,
        }
    }
}

#[async_trait]
impl Connection for StubConnection {
    async fn execute(&mut self, _sql: &str) -> DbResult<u64> {
        if self.closed {
            return Err(DbError::connection("connection closed", "reacquire"));
        }
        Ok(1)
    }

    async fn commit(&mut self) -> DbResult<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        self.closed = true;
        Ok(())
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> DbResult<()> {
        self.auto_commit = auto_commit;
        Ok(())
    }

    async fn auto_commit(&self) -> DbResult<bool> {
        Ok(self.auto_commit)
    }

    async fn is_closed(&self) -> bool {
        self.closed
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Other
    }
}

/// Context with fixed values that counts how often the routing key is read.
#[derive(Debug)]
pub struct CountingContext {
    key: Option<String>,
    xid: Option<String>,
    key_reads: AtomicUsize,
}

impl CountingContext {
    pub fn new(key: Option<&str>, xid: Option<&str>) -> Self {
        Self {
            key: key.map(String::from),
            xid: xid.map(String::from),
            key_reads: AtomicUsize::new(0),
        }
    }

    pub fn key_reads(&self) -> usize {
        self.key_reads.load(Ordering::SeqCst)
    }
}

impl ContextSource for CountingContext {
    fn routing_key(&self) -> Option<String> {
        self.key_reads.fetch_add(1, Ordering::SeqCst);
        self.key.clone()
    }

    fn transaction_id(&self) -> Option<String> {
        self.xid.clone()
    }
}

/// Picker replaying a fixed sequence of indexes, then always 0.
#[derive(Debug)]
pub struct SequencePicker {
    draws: Mutex<VecDeque<usize>>,
}

impl SequencePicker {
    pub fn new(draws: &[usize]) -> Self {
        Self {
            draws: Mutex::new(draws.iter().copied().collect()),
        }
    }
}

impl KeyPicker for SequencePicker {
    fn pick(&self, _candidates: usize) -> usize {
        self.draws.lock().unwrap().pop_front().unwrap_or(0)
    }
}

/// Missing handler answering with one stub provider per configured key.
#[derive(Debug)]
pub struct StaticHandler {
    keys: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl StaticHandler {
    pub fn new(keys: &[&str]) -> Self {
        Self {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl MissingHandler for StaticHandler {
    fn handle(
        &self,
        key: &str,
        _snapshot: &RegistrySnapshot,
    ) -> Option<HashMap<String, Arc<dyn ConnectionProvider>>> {
        self.calls.lock().unwrap().push(key.to_string());
        Some(
            self.keys
                .iter()
                .map(|k| (k.clone(), StubProvider::arc(k)))
                .collect(),
        )
    }
}
