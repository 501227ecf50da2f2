use rusqlite::Connection;
use std::sync::MutexGuard;
use tracing::{debug, warn};

use super::{
    blacklists, contacts, conversations, drafts, messages, scheduled, DbConnection, EncryptedStore,
};
use crate::error::{Result, SyncError};
use crate::events::{OutboundChange, RankingEvent};
use crate::types::{
    BlacklistEntry, Contact, Conversation, Draft, MessageType, Record, Resource, ScheduledMessage,
};

/// The store's single write transaction.
///
/// Holds one pooled connection and the writer lock for its whole life.
/// Call [`set_successful`] and then [`end`] to commit; ending without
/// `set_successful`, or dropping the guard, rolls everything back. Events
/// recorded through the transaction are published only after the commit.
///
/// [`set_successful`]: StoreTransaction::set_successful
/// [`end`]: StoreTransaction::end
pub struct StoreTransaction<'s> {
    store: &'s EncryptedStore,
    conn: DbConnection,
    upload: bool,
    successful: bool,
    finished: bool,
    ranking: Vec<RankingEvent>,
    outbound: Vec<OutboundChange>,
    _writer: MutexGuard<'s, ()>,
}

impl<'s> StoreTransaction<'s> {
    pub(super) fn new(
        store: &'s EncryptedStore,
        conn: DbConnection,
        writer: MutexGuard<'s, ()>,
        upload: bool,
    ) -> Self {
        Self {
            store,
            conn,
            upload,
            successful: false,
            finished: false,
            ranking: Vec::new(),
            outbound: Vec::new(),
            _writer: writer,
        }
    }

    /// The connection every statement of this transaction must use
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn set_successful(&mut self) {
        self.successful = true;
    }

    /// Commit (when marked successful) or roll back, then publish events
    /// of a committed transaction.
    pub fn end(mut self) -> Result<()> {
        self.finished = true;
        let outcome = if self.successful {
            match self.conn.execute_batch("COMMIT") {
                Ok(()) => Ok(true),
                Err(e) => {
                    let _ = self.conn.execute_batch("ROLLBACK");
                    Err(SyncError::from(e))
                }
            }
        } else {
            self.conn.execute_batch("ROLLBACK").map(|_| false).map_err(SyncError::from)
        };
        self.store.release_writer();

        if outcome? {
            let ranking = std::mem::take(&mut self.ranking);
            let outbound = std::mem::take(&mut self.outbound);
            self.store.publish(ranking, outbound, self.upload);
        } else {
            debug!("Transaction rolled back");
        }
        Ok(())
    }

    /// Queue a ranking update for a conversation. Archived conversations
    /// leave the ranked list.
    pub fn touch(&mut self, conv: &Conversation) {
        if conv.archive {
            self.ranking.push(RankingEvent::Removed(conv.id));
        } else {
            self.ranking.push(RankingEvent::Touched(conv.clone()));
        }
    }

    pub fn forget(&mut self, conversation_id: i64) {
        self.ranking.push(RankingEvent::Removed(conversation_id));
    }

    /// Queue an upload of a change, dropped at commit when suppressed
    pub fn upload(&mut self, change: OutboundChange) {
        self.outbound.push(change);
    }

    // ========== Conversations ==========

    /// Insert a conversation, its matcher derived from its participants
    pub fn insert_conversation(&mut self, conv: &Conversation) -> Result<Conversation> {
        let mut stored = conversations::normalized(conv)?;
        stored.id = conversations::insert(&self.conn, &stored)?;
        self.touch(&stored);
        self.upload(OutboundChange::Add(Record::Conversation(stored.clone())));
        Ok(stored)
    }

    pub fn update_conversation(&mut self, conv: &Conversation) -> Result<bool> {
        let stored = conversations::normalized(conv)?;
        if !conversations::update(&self.conn, &stored)? {
            return Ok(false);
        }
        self.touch(&stored);
        self.upload(OutboundChange::Update(Record::Conversation(stored)));
        Ok(true)
    }

    pub fn delete_conversation(&mut self, id: i64) -> Result<bool> {
        if !conversations::delete(&self.conn, id)? {
            return Ok(false);
        }
        self.forget(id);
        self.upload(OutboundChange::Remove { resource: Resource::Conversations, id });
        Ok(true)
    }

    pub fn set_conversation_archived(&mut self, id: i64, archive: bool) -> Result<bool> {
        if !conversations::set_archive(&self.conn, id, archive)? {
            return Ok(false);
        }
        self.touch_and_upload(id)?;
        Ok(true)
    }

    pub fn mark_conversation_read(&mut self, id: i64) -> Result<bool> {
        if !conversations::mark_read(&self.conn, id)? {
            return Ok(false);
        }
        self.touch_and_upload(id)?;
        Ok(true)
    }

    fn touch_and_upload(&mut self, id: i64) -> Result<()> {
        let conv = conversations::get(&self.conn, id)?
            .ok_or_else(|| SyncError::not_found("conversation", id))?;
        self.touch(&conv);
        self.upload(OutboundChange::Update(Record::Conversation(conv)));
        Ok(())
    }

    // ========== Messages ==========

    pub fn update_message_type(&mut self, id: i64, next: MessageType) -> Result<bool> {
        match messages::update_type(&self.conn, id, next)? {
            Some(msg) => {
                self.upload(OutboundChange::Update(Record::Message(msg)));
                Ok(true)
            }
            None => {
                debug!(message_id = id, ?next, "Ignoring stale status update");
                Ok(false)
            }
        }
    }

    /// Delete one message and refresh its conversation's summary
    pub fn delete_message(&mut self, id: i64) -> Result<bool> {
        let Some(removed) = messages::delete(&self.conn, id)? else {
            return Ok(false);
        };
        conversations::refresh_summary(&self.conn, removed.conversation_id)?;
        if let Some(conv) = conversations::get(&self.conn, removed.conversation_id)? {
            self.touch(&conv);
        }
        self.upload(OutboundChange::Remove { resource: Resource::Messages, id });
        Ok(true)
    }

    pub fn cleanup_older_than(&mut self, cutoff: i64) -> Result<usize> {
        let (removed, affected) = messages::delete_older_than(&self.conn, cutoff)?;
        for conversation_id in affected {
            if conversations::refresh_summary(&self.conn, conversation_id)? {
                if let Some(conv) = conversations::get(&self.conn, conversation_id)? {
                    self.touch(&conv);
                }
            } else {
                conversations::delete(&self.conn, conversation_id)?;
                self.forget(conversation_id);
            }
        }
        Ok(removed)
    }

    // ========== Drafts ==========

    pub fn insert_draft(&mut self, draft: &Draft) -> Result<Draft> {
        let mut stored = draft.clone();
        stored.id = drafts::insert(&self.conn, draft)?;
        self.upload(OutboundChange::Add(Record::Draft(stored.clone())));
        Ok(stored)
    }

    pub fn delete_draft(&mut self, id: i64) -> Result<bool> {
        if !drafts::delete(&self.conn, id)? {
            return Ok(false);
        }
        self.upload(OutboundChange::Remove { resource: Resource::Drafts, id });
        Ok(true)
    }

    pub fn delete_drafts_for(&mut self, conversation_id: i64) -> Result<usize> {
        let removed = drafts::delete_for_conversation(&self.conn, conversation_id)?;
        if removed > 0 {
            self.upload(OutboundChange::RemoveDraftsFor { conversation_id });
        }
        Ok(removed)
    }

    // ========== Scheduled messages ==========

    pub fn insert_scheduled(&mut self, msg: &ScheduledMessage) -> Result<ScheduledMessage> {
        let mut stored = msg.clone();
        stored.id = scheduled::insert(&self.conn, msg)?;
        self.upload(OutboundChange::Add(Record::ScheduledMessage(stored.clone())));
        Ok(stored)
    }

    pub fn update_scheduled(&mut self, msg: &ScheduledMessage) -> Result<bool> {
        if !scheduled::update(&self.conn, msg)? {
            return Ok(false);
        }
        self.upload(OutboundChange::Update(Record::ScheduledMessage(msg.clone())));
        Ok(true)
    }

    pub fn delete_scheduled(&mut self, id: i64) -> Result<bool> {
        if !scheduled::delete(&self.conn, id)? {
            return Ok(false);
        }
        self.upload(OutboundChange::Remove { resource: Resource::ScheduledMessages, id });
        Ok(true)
    }

    // ========== Blacklist ==========

    pub fn insert_blacklist(&mut self, entry: &BlacklistEntry) -> Result<BlacklistEntry> {
        let mut stored = entry.clone();
        stored.id = blacklists::insert(&self.conn, entry)?;
        self.upload(OutboundChange::Add(Record::Blacklist(stored.clone())));
        Ok(stored)
    }

    pub fn delete_blacklist(&mut self, id: i64) -> Result<bool> {
        if !blacklists::delete(&self.conn, id)? {
            return Ok(false);
        }
        self.upload(OutboundChange::Remove { resource: Resource::Blacklists, id });
        Ok(true)
    }

    // ========== Contacts ==========

    pub fn upsert_contact(&mut self, contact: &Contact) -> Result<Contact> {
        let mut stored = contact.clone();
        stored.id = contacts::upsert(&self.conn, contact)?;
        Ok(stored)
    }

    pub fn delete_contact(&mut self, id: i64) -> Result<bool> {
        if !contacts::delete(&self.conn, id)? {
            return Ok(false);
        }
        self.upload(OutboundChange::Remove { resource: Resource::Contacts, id });
        Ok(true)
    }

    /// Empty every table, account identity included
    pub fn clear_all(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "DELETE FROM messages;
             DELETE FROM drafts;
             DELETE FROM conversations;
             DELETE FROM scheduled_messages;
             DELETE FROM blacklists;
             DELETE FROM contacts;
             DELETE FROM settings;
             DELETE FROM outbound_queue;",
        )?;
        self.ranking.push(RankingEvent::Reload);
        Ok(())
    }
}

impl Drop for StoreTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Transaction dropped without end(), rolling back");
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("Rollback failed: {}", e);
            }
            self.store.release_writer();
        }
    }
}
