//! Local persistence for the mailbox
//!
//! [`EncryptedStore`] owns an r2d2 pool of SQLite connections and a single
//! writer lock. Every mutation runs inside a [`StoreTransaction`]; change
//! notifications collected by the transaction are published only once it
//! commits. Records are kept in plaintext at rest; the [`Encryptable`]
//! transforms are applied by the sync bridge at the network boundary.

pub mod blacklists;
pub mod contacts;
pub mod conversations;
pub mod crypt;
pub mod drafts;
pub mod messages;
pub mod outbound_queue;
pub mod pool;
pub mod scheduled;
pub mod schema;
pub mod seq;
pub mod settings;
mod transaction;

use rusqlite::types::Value;
use rusqlite::Connection;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::thread::{self, ThreadId};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::events::{ChangeBus, OutboundChange, RankingEvent};
use crate::types::{
    BlacklistEntry, Contact, Conversation, Draft, Message, MessageType, ScheduledMessage,
};

pub use crypt::Encryptable;
pub use pool::{DbConnection, DbPool};
pub use seq::{RecordIter, RecordSeq};
pub use transaction::StoreTransaction;

/// Attach the entity name and row id to constraint failures raised by SQLite
pub(crate) fn map_constraint(entity: &'static str, id: i64) -> impl Fn(rusqlite::Error) -> SyncError {
    move |err| match SyncError::from(err) {
        SyncError::ConstraintViolation { detail, .. } => {
            SyncError::constraint(entity, detail).with_entity_id(id)
        }
        other => other,
    }
}

/// A fresh row id.
///
/// Ids are shared with every device of the account, so they are drawn from
/// a v4 uuid instead of a per-database counter.
pub fn new_record_id() -> i64 {
    let bits = Uuid::new_v4().as_u128();
    let folded = (bits as u64) ^ ((bits >> 64) as u64);
    ((folded >> 1) as i64).max(1)
}

/// `id` when it is set and unused in `table`, otherwise a fresh one
pub(crate) fn available_id(conn: &Connection, table: &str, id: i64) -> Result<i64> {
    if id <= 0 {
        return Ok(new_record_id());
    }
    let taken: bool = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {} WHERE id = ?1)", table),
        [id],
        |row| row.get(0),
    )?;
    Ok(if taken { new_record_id() } else { id })
}

/// Proof that the caller is applying remote-origin changes.
///
/// The token only exists inside [`SyncSuppression::scope`]. Writes made with
/// [`Upload::Suppressed`] are not turned into outbound uploads, so applying
/// a push does not echo it back to the backend. Suppression ends with the
/// scope however it is left, and it never affects other callers.
#[derive(Debug)]
pub struct SyncSuppression {
    _scope: (),
}

impl SyncSuppression {
    pub fn scope<R>(f: impl FnOnce(&SyncSuppression) -> R) -> R {
        let token = SyncSuppression { _scope: () };
        f(&token)
    }
}

/// Whether a write should be mirrored to the account backend
#[derive(Debug, Clone, Copy)]
pub enum Upload<'a> {
    Enabled,
    Suppressed(&'a SyncSuppression),
}

impl Upload<'_> {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Upload::Enabled)
    }
}

pub struct EncryptedStore {
    pool: RwLock<Option<DbPool>>,
    writer: Mutex<()>,
    writer_thread: Mutex<Option<ThreadId>>,
    bus: ChangeBus,
    suppressed: AtomicUsize,
}

impl EncryptedStore {
    /// Open (creating if needed) a database file
    pub fn open(path: &Path, pool_size: u32) -> Result<Self> {
        let pool = pool::create_pool(path, pool_size)?;
        schema::initialize_schema(&*pool.get()?)?;
        info!("Opened mailbox store at {:?}", path);
        Ok(Self::with_pool(pool))
    }

    /// A private in-memory database, used by tests and ephemeral sessions
    pub fn open_in_memory() -> Result<Self> {
        let pool = pool::create_memory_pool()?;
        schema::initialize_schema(&*pool.get()?)?;
        Ok(Self::with_pool(pool))
    }

    fn with_pool(pool: DbPool) -> Self {
        Self {
            pool: RwLock::new(Some(pool)),
            writer: Mutex::new(()),
            writer_thread: Mutex::new(None),
            bus: ChangeBus::new(),
            suppressed: AtomicUsize::new(0),
        }
    }

    /// Release the database. Fails while a transaction is still running.
    pub fn close(&self) -> Result<()> {
        if self.active_writer().is_some() {
            return Err(SyncError::TransactionMisuse(
                "cannot close the store while a transaction is active".into(),
            ));
        }
        let mut pool = self.pool.write().unwrap_or_else(PoisonError::into_inner);
        if pool.take().is_some() {
            info!("Closed mailbox store");
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn pool(&self) -> Result<DbPool> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SyncError::StoreClosed)
    }

    fn active_writer(&self) -> Option<ThreadId> {
        *self.writer_thread.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_active_writer(&self, owner: Option<ThreadId>) {
        *self.writer_thread.lock().unwrap_or_else(PoisonError::into_inner) = owner;
    }

    /// Start the single write transaction. Blocks while another thread
    /// holds it; starting a second one on the same thread is an error.
    pub fn begin_transaction(&self, upload: Upload<'_>) -> Result<StoreTransaction<'_>> {
        let pool = self.pool()?;
        let me = thread::current().id();
        if self.active_writer() == Some(me) {
            return Err(SyncError::TransactionMisuse(
                "nested transactions are not supported".into(),
            ));
        }

        let guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_open() {
            return Err(SyncError::StoreClosed);
        }

        let conn = pool.get()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        self.set_active_writer(Some(me));

        Ok(StoreTransaction::new(self, conn, guard, upload.is_enabled()))
    }

    /// Run `f` in its own transaction, committing when it returns `Ok` and
    /// rolling back otherwise
    pub fn write<T>(
        &self,
        upload: Upload<'_>,
        f: impl FnOnce(&mut StoreTransaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut tx = self.begin_transaction(upload)?;
        match f(&mut tx) {
            Ok(value) => {
                tx.set_successful();
                tx.end()?;
                Ok(value)
            }
            Err(e) => {
                tx.end()?;
                Err(e)
            }
        }
    }

    /// Run a read outside any transaction. Reads see only committed data.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let pool = self.pool()?;
        if self.active_writer() == Some(thread::current().id()) {
            return Err(SyncError::TransactionMisuse(
                "read through the open transaction instead of the store".into(),
            ));
        }
        let conn = pool.get()?;
        f(&conn)
    }

    pub(crate) fn publish(&self, ranking: Vec<RankingEvent>, outbound: Vec<OutboundChange>, upload: bool) {
        self.bus.publish_ranking(ranking);
        if upload {
            self.bus.publish_outbound(outbound);
        } else if !outbound.is_empty() {
            debug!(count = outbound.len(), "Upload suppressed for remote-origin changes");
            self.suppressed.fetch_add(outbound.len(), Ordering::Relaxed);
        }
    }

    pub(crate) fn release_writer(&self) {
        self.set_active_writer(None);
    }

    /// Ranking touches published by committed transactions
    pub fn ranking_events(&self) -> flume::Receiver<RankingEvent> {
        self.bus.ranking_events()
    }

    /// Local mutations waiting to be uploaded
    pub fn outbound_changes(&self) -> flume::Receiver<OutboundChange> {
        self.bus.outbound_changes()
    }

    /// How many outbound changes were dropped because their write was suppressed
    pub fn outbound_suppressed_count(&self) -> usize {
        self.suppressed.load(Ordering::Relaxed)
    }

    // ========== Conversations ==========

    pub fn insert_conversation(&self, conv: &Conversation, upload: Upload<'_>) -> Result<Conversation> {
        self.write(upload, |tx| tx.insert_conversation(conv))
    }

    pub fn update_conversation(&self, conv: &Conversation, upload: Upload<'_>) -> Result<bool> {
        self.write(upload, |tx| tx.update_conversation(conv))
    }

    pub fn delete_conversation(&self, id: i64, upload: Upload<'_>) -> Result<bool> {
        self.write(upload, |tx| tx.delete_conversation(id))
    }

    pub fn set_conversation_archived(&self, id: i64, archive: bool, upload: Upload<'_>) -> Result<bool> {
        self.write(upload, |tx| tx.set_conversation_archived(id, archive))
    }

    pub fn get_conversation(&self, id: i64) -> Result<Option<Conversation>> {
        self.read(|conn| conversations::get(conn, id))
    }

    pub fn find_conversation(&self, id_matcher: &str) -> Result<Option<Conversation>> {
        self.read(|conn| conversations::find_by_matcher(conn, id_matcher))
    }

    /// Non-archived conversations, pinned first then most recent first
    pub fn conversations(&self) -> RecordSeq<'_, Conversation> {
        RecordSeq::new(self, conversations::SELECT_ACTIVE.to_string(), Vec::new(), conversations::from_row)
    }

    pub fn archived_conversations(&self) -> RecordSeq<'_, Conversation> {
        RecordSeq::new(self, conversations::SELECT_ARCHIVED.to_string(), Vec::new(), conversations::from_row)
    }

    pub fn conversation_count(&self) -> Result<usize> {
        self.read(conversations::count)
    }

    // ========== Messages ==========

    pub fn get_message(&self, id: i64) -> Result<Option<Message>> {
        self.read(|conn| messages::get(conn, id))
    }

    /// Messages of one conversation, oldest first
    pub fn messages_for(&self, conversation_id: i64) -> RecordSeq<'_, Message> {
        RecordSeq::new(
            self,
            messages::select_for_conversation(),
            vec![Value::Integer(conversation_id)],
            messages::from_row,
        )
    }

    /// Messages with exactly this body, newest first
    pub fn messages_matching(&self, data: &str) -> RecordSeq<'_, Message> {
        RecordSeq::new(
            self,
            messages::select_matching_data(),
            vec![Value::Text(data.to_string())],
            messages::from_row,
        )
    }

    /// Apply a delivery status report. Stale, repeated and unknown-id
    /// reports are accepted and ignored (`false`).
    pub fn update_message_type(&self, id: i64, next: MessageType, upload: Upload<'_>) -> Result<bool> {
        self.write(upload, |tx| tx.update_message_type(id, next))
    }

    pub fn delete_message(&self, id: i64, upload: Upload<'_>) -> Result<bool> {
        self.write(upload, |tx| tx.delete_message(id))
    }

    pub fn message_count(&self) -> Result<usize> {
        self.read(messages::count)
    }

    /// Drop messages older than `cutoff` (epoch ms), refresh the affected
    /// conversations and delete the ones left empty. Local housekeeping,
    /// never uploaded. Returns the number of messages removed.
    pub fn cleanup_older_than(&self, cutoff: i64) -> Result<usize> {
        SyncSuppression::scope(|s| self.write(Upload::Suppressed(s), |tx| tx.cleanup_older_than(cutoff)))
    }

    // ========== Drafts ==========

    pub fn insert_draft(&self, draft: &Draft, upload: Upload<'_>) -> Result<Draft> {
        self.write(upload, |tx| tx.insert_draft(draft))
    }

    pub fn delete_draft(&self, id: i64, upload: Upload<'_>) -> Result<bool> {
        self.write(upload, |tx| tx.delete_draft(id))
    }

    pub fn delete_drafts_for(&self, conversation_id: i64, upload: Upload<'_>) -> Result<usize> {
        self.write(upload, |tx| tx.delete_drafts_for(conversation_id))
    }

    pub fn drafts_for(&self, conversation_id: i64) -> Result<Vec<Draft>> {
        self.read(|conn| drafts::for_conversation(conn, conversation_id))
    }

    // ========== Scheduled messages ==========

    pub fn insert_scheduled(&self, msg: &ScheduledMessage, upload: Upload<'_>) -> Result<ScheduledMessage> {
        self.write(upload, |tx| tx.insert_scheduled(msg))
    }

    pub fn update_scheduled(&self, msg: &ScheduledMessage, upload: Upload<'_>) -> Result<bool> {
        self.write(upload, |tx| tx.update_scheduled(msg))
    }

    pub fn delete_scheduled(&self, id: i64, upload: Upload<'_>) -> Result<bool> {
        self.write(upload, |tx| tx.delete_scheduled(id))
    }

    /// Scheduled messages by send time
    pub fn scheduled_messages(&self) -> RecordSeq<'_, ScheduledMessage> {
        RecordSeq::new(self, scheduled::SELECT_ALL.to_string(), Vec::new(), scheduled::from_row)
    }

    // ========== Blacklist ==========

    pub fn insert_blacklist(&self, entry: &BlacklistEntry, upload: Upload<'_>) -> Result<BlacklistEntry> {
        self.write(upload, |tx| tx.insert_blacklist(entry))
    }

    pub fn delete_blacklist(&self, id: i64, upload: Upload<'_>) -> Result<bool> {
        self.write(upload, |tx| tx.delete_blacklist(id))
    }

    pub fn blacklist(&self) -> Result<Vec<BlacklistEntry>> {
        self.read(blacklists::list)
    }

    // ========== Contacts ==========

    /// Store a local contact change. Contacts are uploaded by the periodic
    /// reconciliation, keyed off `updated_at`, rather than per write.
    pub fn upsert_contact(&self, contact: &Contact) -> Result<Contact> {
        self.write(Upload::Enabled, |tx| tx.upsert_contact(contact))
    }

    pub fn delete_contact(&self, id: i64, upload: Upload<'_>) -> Result<bool> {
        self.write(upload, |tx| tx.delete_contact(id))
    }

    pub fn find_contact(&self, id_matcher: &str) -> Result<Option<Contact>> {
        self.read(|conn| contacts::find_by_matcher(conn, id_matcher))
    }

    /// Contacts changed after `watermark`, oldest change first
    pub fn contacts_changed_since(&self, watermark: i64) -> RecordSeq<'_, Contact> {
        RecordSeq::new(
            self,
            contacts::select_changed_since(),
            vec![Value::Integer(watermark)],
            contacts::from_row,
        )
    }

    // ========== Account ==========

    pub fn account_id(&self) -> Result<Option<String>> {
        self.read(|conn| settings::get_setting(conn, settings::ACCOUNT_ID))
    }

    pub fn device_id(&self) -> Result<Option<String>> {
        self.read(|conn| settings::get_setting(conn, settings::DEVICE_ID))
    }

    pub fn set_account(&self, account_id: &str, device_id: &str) -> Result<()> {
        self.write(Upload::Enabled, |tx| {
            settings::set_setting(tx.conn(), settings::ACCOUNT_ID, account_id)?;
            settings::set_setting(tx.conn(), settings::DEVICE_ID, device_id)
        })
    }

    pub fn contact_watermark(&self) -> Result<i64> {
        self.read(settings::contact_watermark)
    }

    /// Move the contact reconciliation watermark forward, never back
    pub fn advance_contact_watermark(&self, watermark: i64) -> Result<i64> {
        self.write(Upload::Enabled, |tx| settings::advance_contact_watermark(tx.conn(), watermark))
    }

    /// Delete every record and forget the account. Nothing is uploaded.
    pub fn clear_all(&self) -> Result<()> {
        SyncSuppression::scope(|s| self.write(Upload::Suppressed(s), |tx| tx.clear_all()))
    }
}
