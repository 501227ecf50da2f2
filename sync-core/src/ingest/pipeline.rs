use rusqlite::Connection;
use std::sync::Arc;
use tracing::{debug, info};

use super::id_matcher::{id_matcher, normalize_participant, split_participants};
use crate::config::IngestConfig;
use crate::error::{Result, SyncError};
use crate::events::OutboundChange;
use crate::store::{
    available_id, blacklists, contacts, conversations, messages, EncryptedStore, StoreTransaction,
    Upload,
};
use crate::types::{ColorSet, Conversation, Message, MessageType, Record};

/// A message observed by the platform, not yet admitted
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    /// Sender, or comma-separated recipients for outgoing messages
    pub participants: String,
    pub data: String,
    pub mime_type: String,
    pub timestamp: i64,
    pub message_type: MessageType,
    pub read: bool,
    pub seen: bool,
    /// Sender label inside a group conversation
    pub from: Option<String>,
    pub sim_slot: Option<i32>,
    pub sim_phone_number: Option<String>,
}

impl IncomingMessage {
    pub fn received(sender: &str, data: &str, mime_type: &str, timestamp: i64) -> Self {
        Self {
            participants: sender.to_string(),
            data: data.to_string(),
            mime_type: mime_type.to_string(),
            timestamp,
            message_type: MessageType::Received,
            read: false,
            seen: false,
            from: None,
            sim_slot: None,
            sim_phone_number: None,
        }
    }

    /// A message composed on this device, still being sent
    pub fn outgoing(recipients: &str, data: &str, mime_type: &str, timestamp: i64) -> Self {
        Self {
            participants: recipients.to_string(),
            data: data.to_string(),
            mime_type: mime_type.to_string(),
            timestamp,
            message_type: MessageType::Sending,
            read: true,
            seen: true,
            from: None,
            sim_slot: None,
            sim_phone_number: None,
        }
    }

    pub fn is_inbound(&self) -> bool {
        self.message_type.is_inbound()
    }
}

/// Outcome of one admission
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Inserted {
        message: Message,
        conversation: Conversation,
        created_conversation: bool,
    },
    /// Same body already received moments ago
    Duplicate { existing_id: i64 },
    /// Sender or content is on the blacklist
    Blocked { blacklist_id: i64 },
}

/// Display identity for a new conversation
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationIdentity {
    pub title: String,
    pub colors: ColorSet,
}

/// Resolves titles and colours for participants. Called inside the
/// admission transaction, so it receives that transaction's connection.
pub trait ContactsLookup: Send + Sync {
    fn resolve(&self, conn: &Connection, participants: &[String], id_matcher: &str) -> Result<ConversationIdentity>;
}

/// Looks participants up in the local contacts table
#[derive(Debug, Default, Clone, Copy)]
pub struct StoreContactsLookup;

impl ContactsLookup for StoreContactsLookup {
    fn resolve(&self, conn: &Connection, participants: &[String], id_matcher: &str) -> Result<ConversationIdentity> {
        let mut names = Vec::with_capacity(participants.len());
        let mut single_contact_colors = None;

        for participant in participants {
            let contact = match normalize_participant(participant) {
                Some(print) => contacts::find_by_matcher(conn, &print)?,
                None => None,
            };
            match contact {
                Some(contact) => {
                    names.push(contact.name);
                    single_contact_colors = Some(contact.colors);
                }
                None => names.push(participant.clone()),
            }
        }

        let colors = match (participants.len(), single_contact_colors) {
            (1, Some(colors)) => colors,
            _ => ColorSet::for_key(id_matcher),
        };

        Ok(ConversationIdentity {
            title: names.join(", "),
            colors,
        })
    }
}

/// Admits observed messages exactly once and keeps their conversations'
/// summaries consistent. Each admission is one store transaction.
pub struct IngestionPipeline {
    store: Arc<EncryptedStore>,
    contacts: Box<dyn ContactsLookup>,
    dedup_window_ms: i64,
}

impl IngestionPipeline {
    pub fn new(store: Arc<EncryptedStore>, config: &IngestConfig) -> Self {
        Self {
            store,
            contacts: Box::new(StoreContactsLookup),
            dedup_window_ms: config.dedup_window_ms(),
        }
    }

    pub fn with_contacts_lookup(mut self, lookup: impl ContactsLookup + 'static) -> Self {
        self.contacts = Box::new(lookup);
        self
    }

    pub fn store(&self) -> &Arc<EncryptedStore> {
        &self.store
    }

    /// Admit one message in its own transaction
    pub fn admit(&self, incoming: &IncomingMessage, upload: Upload<'_>) -> Result<Admission> {
        self.store.write(upload, |tx| self.admit_in(tx, incoming))
    }

    /// Admit one message as part of a caller's transaction
    pub fn admit_in(&self, tx: &mut StoreTransaction<'_>, incoming: &IncomingMessage) -> Result<Admission> {
        let participants = split_participants(&incoming.participants);
        let matcher = id_matcher(&participants)?;
        let existing = conversations::find_by_matcher(tx.conn(), &matcher)?;

        if incoming.is_inbound() {
            if let Some(conversation) = &existing {
                if let Some(existing_id) = self.find_duplicate(tx.conn(), conversation.id, incoming)? {
                    debug!(existing_id, "Dropping duplicate received message");
                    return Ok(Admission::Duplicate { existing_id });
                }
            }
            if let Some(blacklist_id) = find_block(tx.conn(), &participants, &incoming.data)? {
                info!(blacklist_id, "Dropping blacklisted message");
                return Ok(Admission::Blocked { blacklist_id });
            }
        }

        let (conversation_id, created) = match existing {
            Some(existing) => (existing.id, false),
            None => {
                let identity = self.contacts.resolve(tx.conn(), &participants, &matcher)?;
                let mut conv = Conversation::new(
                    matcher.clone(),
                    identity.title,
                    participants.join(", "),
                    incoming.timestamp,
                );
                conv.colors = identity.colors;
                conv.sim_subscription_id = incoming.sim_slot;
                (conversations::insert(tx.conn(), &conv)?, true)
            }
        };

        let mut message = Message {
            id: 0,
            conversation_id,
            message_type: incoming.message_type,
            data: incoming.data.clone(),
            mime_type: incoming.mime_type.clone(),
            timestamp: incoming.timestamp,
            read: incoming.read,
            seen: incoming.seen,
            from: incoming.from.clone(),
            color: None,
            sim_phone_number: incoming.sim_phone_number.clone(),
        };
        message.id = messages::insert(tx.conn(), &message)?;

        let conversation = self.fold_into_conversation(tx, &message, created)?;
        debug!(
            message_id = message.id,
            conversation_id,
            created_conversation = created,
            "Admitted message"
        );

        Ok(Admission::Inserted {
            message,
            conversation,
            created_conversation: created,
        })
    }

    /// Admit a message that already exists on another device and arrives
    /// with its own id and conversation id.
    ///
    /// A message with the same conversation, timestamp and body is the same
    /// message. Its id is kept unless a different local message holds it.
    pub fn admit_remote(&self, tx: &mut StoreTransaction<'_>, message: &Message) -> Result<Admission> {
        if conversations::get(tx.conn(), message.conversation_id)?.is_none() {
            return Err(SyncError::not_found("conversation", message.conversation_id));
        }
        if let Some(existing) = messages::find_same(tx.conn(), message)? {
            return Ok(Admission::Duplicate { existing_id: existing.id });
        }

        let mut stored = message.clone();
        stored.id = available_id(tx.conn(), "messages", message.id)?;
        if stored.id != message.id {
            debug!(remote_id = message.id, local_id = stored.id, "Remote message id already used locally");
        }
        messages::insert(tx.conn(), &stored)?;
        let conversation = self.fold_into_conversation(tx, &stored, false)?;

        Ok(Admission::Inserted {
            message: stored,
            conversation,
            created_conversation: false,
        })
    }

    fn fold_into_conversation(
        &self,
        tx: &mut StoreTransaction<'_>,
        message: &Message,
        created: bool,
    ) -> Result<Conversation> {
        conversations::record_message(
            tx.conn(),
            message.conversation_id,
            &message.snippet(),
            message.timestamp,
            message.message_type.is_inbound(),
            !message.read,
        )?;
        let conversation = conversations::get(tx.conn(), message.conversation_id)?
            .ok_or_else(|| SyncError::not_found("conversation", message.conversation_id))?;

        tx.touch(&conversation);
        let conversation_record = Record::Conversation(conversation.clone());
        tx.upload(if created {
            OutboundChange::Add(conversation_record)
        } else {
            OutboundChange::Update(conversation_record)
        });
        tx.upload(OutboundChange::Add(Record::Message(message.clone())));

        Ok(conversation)
    }

    fn find_duplicate(&self, conn: &Connection, conversation_id: i64, incoming: &IncomingMessage) -> Result<Option<i64>> {
        let Some(latest) = messages::latest_with_data(conn, conversation_id, &incoming.data)? else {
            return Ok(None);
        };
        let within_window = (latest.timestamp - incoming.timestamp).abs() <= self.dedup_window_ms;
        if latest.message_type == MessageType::Received && within_window {
            Ok(Some(latest.id))
        } else {
            Ok(None)
        }
    }

    /// Clear a conversation's unread state
    pub fn mark_conversation_read(&self, conversation_id: i64, upload: Upload<'_>) -> Result<bool> {
        self.store.write(upload, |tx| tx.mark_conversation_read(conversation_id))
    }
}

fn find_block(conn: &Connection, participants: &[String], body: &str) -> Result<Option<i64>> {
    let entries = blacklists::list(conn)?;
    if entries.is_empty() {
        return Ok(None);
    }

    let senders: Vec<String> = participants
        .iter()
        .filter_map(|p| normalize_participant(p))
        .collect();
    let body = body.to_lowercase();

    for entry in entries {
        let number_blocked = entry
            .phone_number
            .as_deref()
            .and_then(normalize_participant)
            .map_or(false, |blocked| senders.contains(&blocked));
        let phrase_blocked = entry
            .phrase
            .as_deref()
            .map(|p| p.trim().to_lowercase())
            .map_or(false, |p| !p.is_empty() && body.contains(&p));

        if number_blocked || phrase_blocked {
            return Ok(Some(entry.id));
        }
    }
    Ok(None)
}
