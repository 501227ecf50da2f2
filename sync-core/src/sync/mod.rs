//! Multi-device synchronisation
//!
//! [`SyncBridge`] mirrors local mutations to the account backend and applies
//! push-delivered operations from other devices. Outbound records are
//! encrypted with the account key at the boundary; inbound payloads are
//! decrypted before they touch the store, and are applied under
//! [`SyncSuppression`](crate::store::SyncSuppression) so they are never
//! echoed back.

pub mod api;
mod inbound;
mod outbound;
mod reconcile;
#[cfg(test)]
pub(crate) mod testing;

use flume::Receiver;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::info;

use crate::config::SyncConfig;
use crate::encryption::AccountEncryption;
use crate::error::{Result, SyncError};
use crate::events::OutboundChange;
use crate::ingest::IngestionPipeline;
use crate::store::{EncryptedStore, Encryptable};
use crate::types::Record;

pub use api::{AccountApi, HttpAccountApi};
pub use inbound::{PushOperation, PushOutcome};
pub use outbound::FlushReport;

/// The signed-in account on this device
#[derive(Clone)]
pub struct AccountSession {
    pub account_id: String,
    pub device_id: String,
    encryption: Arc<AccountEncryption>,
}

impl AccountSession {
    pub fn new(account_id: &str, device_id: &str, encryption: AccountEncryption) -> Self {
        Self {
            account_id: account_id.to_string(),
            device_id: device_id.to_string(),
            encryption: Arc::new(encryption),
        }
    }

    pub fn encryption(&self) -> &AccountEncryption {
        &self.encryption
    }
}

impl std::fmt::Debug for AccountSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountSession")
            .field("account_id", &self.account_id)
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

pub struct SyncBridge {
    store: Arc<EncryptedStore>,
    api: Arc<dyn AccountApi>,
    pipeline: Arc<IngestionPipeline>,
    /// Subscribed to the store's outbound queue only while signed in
    changes: Mutex<Option<Receiver<OutboundChange>>>,
    session: RwLock<Option<AccountSession>>,
    config: SyncConfig,
}

impl SyncBridge {
    pub fn new(
        store: Arc<EncryptedStore>,
        api: Arc<dyn AccountApi>,
        pipeline: Arc<IngestionPipeline>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            api,
            pipeline,
            changes: Mutex::new(None),
            session: RwLock::new(None),
            config,
        }
    }

    /// Attach an account and persist its identity
    pub fn sign_in(&self, session: AccountSession) -> Result<()> {
        self.store.set_account(&session.account_id, &session.device_id)?;
        info!(account_id = %session.account_id, device_id = %session.device_id, "Signed in");
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(|| self.store.outbound_changes());
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session);
        Ok(())
    }

    /// Forget the account. Changes made while signed out are not queued.
    pub fn sign_out(&self) {
        self.changes.lock().unwrap_or_else(PoisonError::into_inner).take();
        if self.session.write().unwrap_or_else(PoisonError::into_inner).take().is_some() {
            info!("Signed out");
        }
    }

    fn outbound_receiver(&self) -> Option<Receiver<OutboundChange>> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn session(&self) -> Option<AccountSession> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn store(&self) -> &Arc<EncryptedStore> {
        &self.store
    }
}

/// Wire form of a record: the bare entity object with its sensitive
/// fields encrypted
pub(crate) fn seal_record(record: &Record, encryption: &AccountEncryption) -> Result<Value> {
    let mut record = record.clone();
    record.encrypt(encryption)?;
    let value = match record {
        Record::Conversation(r) => serde_json::to_value(r),
        Record::Message(r) => serde_json::to_value(r),
        Record::Draft(r) => serde_json::to_value(r),
        Record::ScheduledMessage(r) => serde_json::to_value(r),
        Record::Blacklist(r) => serde_json::to_value(r),
        Record::Contact(r) => serde_json::to_value(r),
    };
    Ok(value?)
}

/// Decode an entity received from another device and decrypt it.
/// Fields that fail to decrypt keep their received value.
pub(crate) fn open_record<T>(payload: &Value, encryption: &AccountEncryption) -> Result<T>
where
    T: DeserializeOwned + Encryptable,
{
    let mut record: T = serde_json::from_value(payload.clone())
        .map_err(|e| SyncError::MalformedPushPayload(e.to_string()))?;
    record.decrypt(encryption);
    Ok(record)
}
