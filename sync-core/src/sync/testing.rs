use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{AccountApi, AccountSession, SyncBridge};
use crate::config::{IngestConfig, SyncConfig};
use crate::encryption::AccountEncryption;
use crate::error::{Result, SyncError};
use crate::ingest::IngestionPipeline;
use crate::store::EncryptedStore;
use crate::types::Resource;

#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Add { resource: Resource, account_id: String, device_id: String, records: Vec<Value> },
    Update { resource: Resource, id: i64, record: Value },
    Remove { resource: Resource, id: i64 },
    RemoveDraftsFor { conversation_id: i64 },
}

/// Records every call; fails them all while `offline` is set, or once the
/// budget set by `fail_after` is spent
#[derive(Default)]
pub struct RecordingApi {
    pub calls: Mutex<Vec<ApiCall>>,
    pub offline: AtomicBool,
    budget: Mutex<Option<usize>>,
}

impl RecordingApi {
    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
        if !offline {
            *self.budget.lock().unwrap() = None;
        }
    }

    /// Let `calls` more calls through, then fail the rest
    pub fn fail_after(&self, calls: usize) {
        *self.budget.lock().unwrap() = Some(calls);
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::TransportFailure("connection refused".into()));
        }
        let mut budget = self.budget.lock().unwrap();
        match budget.as_mut() {
            Some(0) => Err(SyncError::TransportFailure("connection reset".into())),
            Some(left) => {
                *left -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AccountApi for RecordingApi {
    async fn add(&self, resource: Resource, account_id: &str, device_id: &str, records: Vec<Value>) -> Result<()> {
        self.check()?;
        self.calls.lock().unwrap().push(ApiCall::Add {
            resource,
            account_id: account_id.to_string(),
            device_id: device_id.to_string(),
            records,
        });
        Ok(())
    }

    async fn update(&self, resource: Resource, _account_id: &str, _device_id: &str, id: i64, record: Value) -> Result<()> {
        self.check()?;
        self.calls.lock().unwrap().push(ApiCall::Update { resource, id, record });
        Ok(())
    }

    async fn remove(&self, resource: Resource, _account_id: &str, _device_id: &str, id: i64) -> Result<()> {
        self.check()?;
        self.calls.lock().unwrap().push(ApiCall::Remove { resource, id });
        Ok(())
    }

    async fn remove_drafts_for(&self, _account_id: &str, _device_id: &str, conversation_id: i64) -> Result<()> {
        self.check()?;
        self.calls.lock().unwrap().push(ApiCall::RemoveDraftsFor { conversation_id });
        Ok(())
    }

    async fn list(&self, _resource: Resource, _account_id: &str, _limit: usize, _offset: usize) -> Result<Vec<Value>> {
        self.check()?;
        Ok(Vec::new())
    }
}

pub fn session() -> AccountSession {
    AccountSession::new("acct-1", "device-1", AccountEncryption::from_key([9u8; 32]))
}

/// In-memory store and a recording backend, nobody signed in
pub fn bridge() -> (SyncBridge, Arc<RecordingApi>) {
    let store = Arc::new(EncryptedStore::open_in_memory().unwrap());
    let api = Arc::new(RecordingApi::default());
    let pipeline = Arc::new(IngestionPipeline::new(store.clone(), &IngestConfig::default()));
    let config = SyncConfig {
        batch_size: 2,
        max_retries: 3,
        ..SyncConfig::default()
    };
    let sync = SyncBridge::new(store, api.clone(), pipeline, config);
    (sync, api)
}

pub fn signed_in_bridge() -> (SyncBridge, Arc<RecordingApi>) {
    let (sync, api) = bridge();
    sync.sign_in(session()).unwrap();
    (sync, api)
}
