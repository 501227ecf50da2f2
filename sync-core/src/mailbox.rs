//! Wiring for one device's mailbox
//!
//! Builds the store, the ingestion pipeline and the sync bridge from a
//! [`CoreConfig`] and shares them with the host. The ranking worker is
//! handed out once, to the thread that owns the conversation list.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::encryption::AccountEncryption;
use crate::error::{Result, SyncError};
use crate::ingest::IngestionPipeline;
use crate::ranking::RankingWorker;
use crate::store::EncryptedStore;
use crate::sync::{AccountApi, AccountSession, HttpAccountApi, SyncBridge};

pub struct Mailbox {
    config: CoreConfig,
    store: Arc<EncryptedStore>,
    pipeline: Arc<IngestionPipeline>,
    sync: SyncBridge,
    ranking_taken: AtomicBool,
}

impl Mailbox {
    /// Open the configured database and talk to the configured backend
    pub fn open(config: CoreConfig) -> Result<Self> {
        config.validate()?;
        let store = EncryptedStore::open(&config.store.db_path, config.store.pool_size)?;
        let api = HttpAccountApi::new(&config.sync)?;
        Ok(Self::assemble(config, store, Arc::new(api)))
    }

    /// An ephemeral mailbox over any backend
    pub fn in_memory(config: CoreConfig, api: Arc<dyn AccountApi>) -> Result<Self> {
        config.validate()?;
        let store = EncryptedStore::open_in_memory()?;
        Ok(Self::assemble(config, store, api))
    }

    fn assemble(config: CoreConfig, store: EncryptedStore, api: Arc<dyn AccountApi>) -> Self {
        let store = Arc::new(store);
        let pipeline = Arc::new(IngestionPipeline::new(store.clone(), &config.ingest));
        let sync = SyncBridge::new(store.clone(), api, pipeline.clone(), config.sync.clone());
        Self {
            config,
            store,
            pipeline,
            sync,
            ranking_taken: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<EncryptedStore> {
        &self.store
    }

    pub fn pipeline(&self) -> &Arc<IngestionPipeline> {
        &self.pipeline
    }

    pub fn sync(&self) -> &SyncBridge {
        &self.sync
    }

    /// The ranking worker. Ranking events have a single consumer, so this
    /// succeeds once per mailbox.
    pub fn take_ranking_worker(&self) -> Result<RankingWorker> {
        if self.ranking_taken.swap(true, Ordering::SeqCst) {
            return Err(SyncError::InvalidInput("ranking worker already taken".into()));
        }
        Ok(RankingWorker::new(self.store.clone(), &self.config.ranking))
    }

    /// Sign this device into an account. The device keeps the id it was
    /// given the first time it signed in.
    pub fn sign_in(&self, account_id: &str, passphrase: &str) -> Result<AccountSession> {
        let encryption = AccountEncryption::derive(account_id, passphrase)?;
        let device_id = match self.store.device_id()? {
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };
        let session = AccountSession::new(account_id, &device_id, encryption);
        self.sync.sign_in(session.clone())?;
        Ok(session)
    }

    /// Resume the persisted account after a restart. Returns false when no
    /// account was signed in.
    pub fn restore_session(&self, passphrase: &str) -> Result<bool> {
        let (Some(account_id), Some(device_id)) = (self.store.account_id()?, self.store.device_id()?) else {
            return Ok(false);
        };
        let encryption = AccountEncryption::derive(&account_id, passphrase)?;
        self.sync
            .sign_in(AccountSession::new(&account_id, &device_id, encryption))?;
        info!(account_id = %account_id, "Restored account session");
        Ok(true)
    }

    /// Stop accepting work and release the database
    pub fn close(&self) -> Result<()> {
        self.sync.sign_out();
        if let Err(e) = self.store.close() {
            warn!("Could not close store: {}", e);
            return Err(e);
        }
        Ok(())
    }
}
