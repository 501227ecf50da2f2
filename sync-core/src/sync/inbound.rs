//! Push-delivered operations from other devices
//!
//! Every operation is applied in one transaction with uploads suppressed,
//! so nothing received here is echoed back to the backend. Removes are
//! idempotent and adds fall back to updating the existing row.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{open_record, AccountSession, SyncBridge};
use crate::error::{ErrorKind, Result, SyncError};
use crate::ingest::Admission;
use crate::store::{
    blacklists, contacts, conversations, drafts, scheduled, settings, StoreTransaction,
    SyncSuppression, Upload,
};
use crate::types::{BlacklistEntry, Contact, Conversation, Draft, Message, MessageType, ScheduledMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOperation {
    AddedBlacklist,
    RemovedBlacklist,
    AddedConversation,
    RemovedConversation,
    ReadConversation,
    ArchiveConversation,
    UnarchiveConversation,
    AddedMessage,
    UpdatedMessage,
    RemovedMessage,
    AddedDraft,
    RemovedDrafts,
    AddedScheduledMessage,
    RemovedScheduledMessage,
    AddedContact,
    RemovedContact,
    RemovedAccount,
}

impl PushOperation {
    /// Accepts `removed_message` as well as `remove-message`
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase().replace('-', "_");
        let name = if let Some(rest) = name.strip_prefix("add_") {
            format!("added_{}", rest)
        } else if let Some(rest) = name.strip_prefix("remove_") {
            format!("removed_{}", rest)
        } else if let Some(rest) = name.strip_prefix("update_") {
            format!("updated_{}", rest)
        } else {
            name
        };

        Some(match name.as_str() {
            "added_blacklist" => Self::AddedBlacklist,
            "removed_blacklist" => Self::RemovedBlacklist,
            "added_conversation" => Self::AddedConversation,
            "removed_conversation" => Self::RemovedConversation,
            "read_conversation" => Self::ReadConversation,
            "archive_conversation" => Self::ArchiveConversation,
            "unarchive_conversation" => Self::UnarchiveConversation,
            "added_message" => Self::AddedMessage,
            "updated_message" => Self::UpdatedMessage,
            "removed_message" => Self::RemovedMessage,
            "added_draft" => Self::AddedDraft,
            "removed_drafts" => Self::RemovedDrafts,
            "added_scheduled_message" => Self::AddedScheduledMessage,
            "removed_scheduled_message" => Self::RemovedScheduledMessage,
            "added_contact" => Self::AddedContact,
            "removed_contact" => Self::RemovedContact,
            "removed_account" => Self::RemovedAccount,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AddedBlacklist => "added_blacklist",
            Self::RemovedBlacklist => "removed_blacklist",
            Self::AddedConversation => "added_conversation",
            Self::RemovedConversation => "removed_conversation",
            Self::ReadConversation => "read_conversation",
            Self::ArchiveConversation => "archive_conversation",
            Self::UnarchiveConversation => "unarchive_conversation",
            Self::AddedMessage => "added_message",
            Self::UpdatedMessage => "updated_message",
            Self::RemovedMessage => "removed_message",
            Self::AddedDraft => "added_draft",
            Self::RemovedDrafts => "removed_drafts",
            Self::AddedScheduledMessage => "added_scheduled_message",
            Self::RemovedScheduledMessage => "removed_scheduled_message",
            Self::AddedContact => "added_contact",
            Self::RemovedContact => "removed_contact",
            Self::RemovedAccount => "removed_account",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Applied,
    /// Nothing changed; the reason is logged
    Ignored(String),
}

#[derive(Deserialize)]
struct IdPayload {
    #[serde(alias = "device_id")]
    id: i64,
}

#[derive(Deserialize)]
struct DraftsPayload {
    #[serde(alias = "conversation_id", alias = "device_conversation_id")]
    id: i64,
}

#[derive(Deserialize)]
struct AccountPayload {
    #[serde(alias = "account_id")]
    id: String,
}

#[derive(Deserialize)]
struct MessageStatusPayload {
    #[serde(alias = "device_id")]
    id: i64,
    #[serde(rename = "type", alias = "message_type")]
    message_type: MessageType,
}

fn parse<'de, T: Deserialize<'de>>(payload: &'de Value) -> Result<T> {
    T::deserialize(payload).map_err(|e| SyncError::MalformedPushPayload(e.to_string()))
}

impl SyncBridge {
    /// Apply one push from the backend.
    ///
    /// Unknown operations, malformed payloads and rows that violate a local
    /// constraint are logged and reported as [`PushOutcome::Ignored`]. Only
    /// store failures (closed store, I/O) are returned as errors.
    pub fn apply_push(&self, operation: &str, payload: &str) -> Result<PushOutcome> {
        let Some(op) = PushOperation::parse(operation) else {
            warn!(operation, "Ignoring unknown push operation");
            return Ok(PushOutcome::Ignored(format!("unknown operation {}", operation)));
        };
        let Some(session) = self.session() else {
            debug!(operation = op.as_str(), "Ignoring push while signed out");
            return Ok(PushOutcome::Ignored("no account signed in".into()));
        };

        let result = serde_json::from_str::<Value>(payload)
            .map_err(|e| SyncError::MalformedPushPayload(e.to_string()))
            .and_then(|value| {
                SyncSuppression::scope(|s| {
                    self.store.write(Upload::Suppressed(s), |tx| {
                        self.apply_in(tx, op, &value, &session)
                    })
                })
            });

        match result {
            Ok(PushOutcome::Applied) => {
                debug!(operation = op.as_str(), "Applied push");
                if op == PushOperation::RemovedAccount {
                    self.sign_out();
                    info!("Account removed remotely, local data cleared");
                }
                Ok(PushOutcome::Applied)
            }
            Ok(ignored) => Ok(ignored),
            Err(e) => match e.kind() {
                ErrorKind::MalformedPushPayload
                | ErrorKind::ConstraintViolation
                | ErrorKind::NotFound
                | ErrorKind::InvalidInput
                | ErrorKind::Parse => {
                    warn!(operation = op.as_str(), "Ignoring push: {}", e);
                    Ok(PushOutcome::Ignored(e.to_string()))
                }
                _ => Err(e),
            },
        }
    }

    fn apply_in(
        &self,
        tx: &mut StoreTransaction<'_>,
        op: PushOperation,
        payload: &Value,
        session: &AccountSession,
    ) -> Result<PushOutcome> {
        let encryption = session.encryption();

        match op {
            PushOperation::AddedBlacklist => {
                let entry: BlacklistEntry = open_record(payload, encryption)?;
                blacklists::upsert(tx.conn(), &entry)?;
            }
            PushOperation::RemovedBlacklist => {
                let IdPayload { id } = parse(payload)?;
                tx.delete_blacklist(id)?;
            }
            PushOperation::AddedConversation => {
                let conv: Conversation = open_record(payload, encryption)?;
                self.upsert_remote_conversation(tx, conv)?;
            }
            PushOperation::RemovedConversation => {
                let IdPayload { id } = parse(payload)?;
                tx.delete_conversation(id)?;
            }
            PushOperation::ReadConversation => {
                let IdPayload { id } = parse(payload)?;
                tx.mark_conversation_read(id)?;
            }
            PushOperation::ArchiveConversation | PushOperation::UnarchiveConversation => {
                let IdPayload { id } = parse(payload)?;
                tx.set_conversation_archived(id, op == PushOperation::ArchiveConversation)?;
            }
            PushOperation::AddedMessage => {
                let message: Message = open_record(payload, encryption)?;
                if let Admission::Duplicate { existing_id } = self.pipeline.admit_remote(tx, &message)? {
                    debug!(message_id = existing_id, "Message already present");
                }
            }
            PushOperation::UpdatedMessage => {
                let status: MessageStatusPayload = parse(payload)?;
                tx.update_message_type(status.id, status.message_type)?;
            }
            PushOperation::RemovedMessage => {
                let IdPayload { id } = parse(payload)?;
                tx.delete_message(id)?;
            }
            PushOperation::AddedDraft => {
                let draft: Draft = open_record(payload, encryption)?;
                drafts::upsert(tx.conn(), &draft)?;
            }
            PushOperation::RemovedDrafts => {
                let DraftsPayload { id } = parse(payload)?;
                tx.delete_drafts_for(id)?;
            }
            PushOperation::AddedScheduledMessage => {
                let msg: ScheduledMessage = open_record(payload, encryption)?;
                scheduled::upsert(tx.conn(), &msg)?;
            }
            PushOperation::RemovedScheduledMessage => {
                let IdPayload { id } = parse(payload)?;
                tx.delete_scheduled(id)?;
            }
            PushOperation::AddedContact => {
                let mut contact: Contact = open_record(payload, encryption)?;
                // At or below the watermark, so reconciliation does not send it back
                contact.updated_at = contact.updated_at.min(settings::contact_watermark(tx.conn())?);
                contacts::upsert(tx.conn(), &contact)?;
            }
            PushOperation::RemovedContact => {
                let IdPayload { id } = parse(payload)?;
                tx.delete_contact(id)?;
            }
            PushOperation::RemovedAccount => {
                let AccountPayload { id } = parse(payload)?;
                let local = settings::get_setting(tx.conn(), settings::ACCOUNT_ID)?;
                if local.as_deref() != Some(id.as_str()) {
                    info!(account_id = %id, "Ignoring removal of another account");
                    return Ok(PushOutcome::Ignored("removal for a different account".into()));
                }
                tx.clear_all()?;
            }
        }

        Ok(PushOutcome::Applied)
    }

    /// Match by participant set, else insert with the sender's id.
    ///
    /// A matched conversation keeps its local id. An id already held by a
    /// conversation with other participants is a constraint violation.
    fn upsert_remote_conversation(&self, tx: &mut StoreTransaction<'_>, mut conv: Conversation) -> Result<()> {
        let matcher = conversations::derived_matcher(&conv)?;
        if let Some(existing) = conversations::find_by_matcher(tx.conn(), &matcher)? {
            conv.id = existing.id;
            tx.update_conversation(&conv)?;
            return Ok(());
        }
        if conv.id > 0 && conversations::get(tx.conn(), conv.id)?.is_some() {
            return Err(SyncError::constraint("conversation", "id already used by another conversation")
                .with_entity_id(conv.id));
        }
        tx.insert_conversation(&conv)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Encryptable;
    use crate::sync::testing::{bridge, signed_in_bridge};
    use crate::types::{ColorSet, ContactType};
    use serde_json::json;

    fn sealed<T: Encryptable + serde::Serialize>(mut record: T, sync: &SyncBridge) -> String {
        record.encrypt(sync.session().unwrap().encryption()).unwrap();
        serde_json::to_string(&record).unwrap()
    }

    fn conversation(sync: &SyncBridge, matcher: &str) -> Conversation {
        sync.store()
            .insert_conversation(
                &Conversation::new(matcher.into(), matcher.into(), matcher.into(), 1_000),
                Upload::Enabled,
            )
            .unwrap()
    }

    #[test]
    fn test_operation_names_and_aliases() {
        assert_eq!(PushOperation::parse("removed_message"), Some(PushOperation::RemovedMessage));
        assert_eq!(PushOperation::parse("remove-message"), Some(PushOperation::RemovedMessage));
        assert_eq!(PushOperation::parse("add-blacklist"), Some(PushOperation::AddedBlacklist));
        assert_eq!(PushOperation::parse("remove-account"), Some(PushOperation::RemovedAccount));
        assert_eq!(PushOperation::parse("remove-drafts"), Some(PushOperation::RemovedDrafts));
        assert_eq!(PushOperation::parse("update-message"), Some(PushOperation::UpdatedMessage));
        assert_eq!(PushOperation::parse("added_folder"), None);

        for op in [PushOperation::AddedScheduledMessage, PushOperation::UnarchiveConversation] {
            assert_eq!(PushOperation::parse(op.as_str()), Some(op));
        }
    }

    #[test]
    fn test_unknown_and_malformed_pushes_are_ignored() {
        let (sync, _api) = signed_in_bridge();
        assert!(matches!(
            sync.apply_push("added_folder", "{}").unwrap(),
            PushOutcome::Ignored(_)
        ));
        assert!(matches!(
            sync.apply_push("removed_message", "not json").unwrap(),
            PushOutcome::Ignored(_)
        ));
        assert!(matches!(
            sync.apply_push("removed_message", r#"{"name": 1}"#).unwrap(),
            PushOutcome::Ignored(_)
        ));
    }

    #[test]
    fn test_pushes_ignored_while_signed_out() {
        let (sync, _api) = bridge();
        assert!(matches!(
            sync.apply_push("removed_conversation", r#"{"id": 1}"#).unwrap(),
            PushOutcome::Ignored(_)
        ));
    }

    #[test]
    fn test_removes_are_idempotent() {
        let (sync, _api) = signed_in_bridge();
        let conv = conversation(&sync, "5551234567");
        let payload = json!({ "id": conv.id }).to_string();

        assert_eq!(sync.apply_push("removed_conversation", &payload).unwrap(), PushOutcome::Applied);
        assert_eq!(sync.apply_push("removed_conversation", &payload).unwrap(), PushOutcome::Applied);
        assert_eq!(sync.store().conversation_count().unwrap(), 0);

        for op in ["removed_message", "removed_blacklist", "removed_scheduled_message", "removed_contact", "removed_drafts"] {
            assert_eq!(sync.apply_push(op, r#"{"id": 999}"#).unwrap(), PushOutcome::Applied, "{}", op);
        }
    }

    #[test]
    fn test_added_blacklist_updates_existing_entry() {
        let (sync, _api) = signed_in_bridge();
        let local = sync
            .store()
            .insert_blacklist(
                &BlacklistEntry { id: 0, phone_number: Some("5551234567".into()), phrase: None },
                Upload::Enabled,
            )
            .unwrap();

        // Same entity arriving from the device that created it
        let remote = BlacklistEntry { id: 77, phone_number: Some("5551234567".into()), phrase: None };
        assert_eq!(sync.apply_push("added_blacklist", &sealed(remote.clone(), &sync)).unwrap(), PushOutcome::Applied);
        assert_eq!(sync.apply_push("added_blacklist", &sealed(remote, &sync)).unwrap(), PushOutcome::Applied);

        let entries = sync.store().blacklist().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, local.id);
        assert_eq!(entries[0].phone_number.as_deref(), Some("5551234567"));
    }

    #[test]
    fn test_invalid_blacklist_is_ignored() {
        let (sync, _api) = signed_in_bridge();
        let empty = json!({ "id": 3, "phone_number": null, "phrase": null }).to_string();
        assert!(matches!(sync.apply_push("added_blacklist", &empty).unwrap(), PushOutcome::Ignored(_)));
        assert!(sync.store().blacklist().unwrap().is_empty());
    }

    #[test]
    fn test_applied_pushes_are_not_uploaded() {
        let (sync, _api) = signed_in_bridge();
        let conv = conversation(&sync, "5551234567");
        sync.pump_outbound().unwrap();
        let before = sync.store().outbound_suppressed_count();

        let payload = json!({ "id": conv.id }).to_string();
        sync.apply_push("archive_conversation", &payload).unwrap();
        assert!(sync.store().get_conversation(conv.id).unwrap().unwrap().archive);
        sync.apply_push("removed_conversation", &payload).unwrap();

        assert_eq!(sync.pump_outbound().unwrap(), 0);
        assert_eq!(sync.store().outbound_suppressed_count(), before + 2);
    }

    #[test]
    fn test_added_message_goes_through_admission() {
        let (sync, _api) = signed_in_bridge();
        let conv = conversation(&sync, "5551234567");
        let message = Message {
            id: 41,
            conversation_id: conv.id,
            message_type: MessageType::Received,
            data: "from the tablet".into(),
            mime_type: "text/plain".into(),
            timestamp: 5_000,
            read: false,
            seen: false,
            from: None,
            color: None,
            sim_phone_number: None,
        };
        let payload = sealed(message.clone(), &sync);

        assert_eq!(sync.apply_push("added_message", &payload).unwrap(), PushOutcome::Applied);
        assert_eq!(sync.apply_push("added_message", &payload).unwrap(), PushOutcome::Applied);
        assert_eq!(sync.store().message_count().unwrap(), 1);
        assert_eq!(sync.store().get_message(41).unwrap().unwrap().data, "from the tablet");

        let stored = sync.store().get_conversation(conv.id).unwrap().unwrap();
        assert_eq!(stored.snippet.as_deref(), Some("from the tablet"));
        assert_eq!(stored.timestamp, 5_000);
        assert_eq!(stored.unread_count, 1);

        let status = json!({ "id": 41, "type": "delivered" }).to_string();
        // Received messages never take outbound statuses; the update is dropped
        assert_eq!(sync.apply_push("updated_message", &status).unwrap(), PushOutcome::Applied);
        assert_eq!(sync.store().get_message(41).unwrap().unwrap().message_type, MessageType::Received);

        // Unknown conversation
        let mut orphan = message;
        orphan.id = 42;
        orphan.conversation_id = 999;
        assert!(matches!(
            sync.apply_push("added_message", &sealed(orphan, &sync)).unwrap(),
            PushOutcome::Ignored(_)
        ));
    }

    #[test]
    fn test_added_conversation_matches_participants() {
        let (sync, _api) = signed_in_bridge();
        let local = conversation(&sync, "5551234567");

        let mut remote = Conversation::new("5551234567".into(), "Ada Lovelace".into(), "5551234567".into(), 2_000);
        remote.id = 500;
        assert_eq!(sync.apply_push("added_conversation", &sealed(remote, &sync)).unwrap(), PushOutcome::Applied);

        assert_eq!(sync.store().conversation_count().unwrap(), 1);
        let stored = sync.store().get_conversation(local.id).unwrap().unwrap();
        assert_eq!(stored.title, "Ada Lovelace");

        let mut other = Conversation::new("5559876543".into(), "Grace".into(), "5559876543".into(), 3_000);
        other.id = 501;
        sync.apply_push("added_conversation", &sealed(other, &sync)).unwrap();
        assert_eq!(sync.store().get_conversation(501).unwrap().unwrap().title, "Grace");
    }

    #[test]
    fn test_added_conversation_with_used_id_leaves_local_alone() {
        let (sync, _api) = signed_in_bridge();
        let mut mine = Conversation::new("5551111111".into(), "Ada".into(), "5551111111".into(), 1_000);
        mine.id = 1;
        sync.store().insert_conversation(&mine, Upload::Enabled).unwrap();

        let mut remote = Conversation::new("5552222222".into(), "Grace".into(), "5552222222".into(), 2_000);
        remote.id = 1;
        assert!(matches!(
            sync.apply_push("added_conversation", &sealed(remote, &sync)).unwrap(),
            PushOutcome::Ignored(_)
        ));

        let stored = sync.store().get_conversation(1).unwrap().unwrap();
        assert_eq!(stored.title, "Ada");
        assert_eq!(stored.id_matcher, "5551111111");
        assert_eq!(sync.store().conversation_count().unwrap(), 1);
    }

    #[test]
    fn test_added_message_with_used_id_is_stored_separately() {
        let (sync, _api) = signed_in_bridge();
        let conv = conversation(&sync, "5551234567");
        let local = Message {
            id: 7,
            conversation_id: conv.id,
            message_type: MessageType::Received,
            data: "local hello".into(),
            mime_type: "text/plain".into(),
            timestamp: 1_000,
            read: false,
            seen: false,
            from: None,
            color: None,
            sim_phone_number: None,
        };
        sync.apply_push("added_message", &sealed(local.clone(), &sync)).unwrap();

        let remote = Message { data: "remote hello".into(), timestamp: 2_000, ..local };
        assert_eq!(sync.apply_push("added_message", &sealed(remote, &sync)).unwrap(), PushOutcome::Applied);

        assert_eq!(sync.store().message_count().unwrap(), 2);
        assert_eq!(sync.store().get_message(7).unwrap().unwrap().data, "local hello");
        let bodies: Vec<String> = sync
            .store()
            .messages_for(conv.id)
            .to_vec()
            .unwrap()
            .into_iter()
            .map(|m| m.data)
            .collect();
        assert_eq!(bodies, vec!["local hello", "remote hello"]);
    }

    #[test]
    fn test_drafts_and_scheduled_round_trip() {
        let (sync, _api) = signed_in_bridge();
        let conv = conversation(&sync, "5551234567");

        let draft = Draft { id: 9, conversation_id: conv.id, data: "half written".into(), mime_type: "text/plain".into() };
        sync.apply_push("added_draft", &sealed(draft.clone(), &sync)).unwrap();
        sync.apply_push("added_draft", &sealed(draft, &sync)).unwrap();
        assert_eq!(sync.store().drafts_for(conv.id).unwrap().len(), 1);

        let drafts = json!({ "conversation_id": conv.id }).to_string();
        sync.apply_push("remove-drafts", &drafts).unwrap();
        assert!(sync.store().drafts_for(conv.id).unwrap().is_empty());

        let msg = ScheduledMessage {
            id: 4,
            to: "5551234567".into(),
            data: "happy birthday".into(),
            mime_type: "text/plain".into(),
            timestamp: 9_000,
            title: "Ada".into(),
            repeat: crate::types::Repeat::Yearly,
        };
        sync.apply_push("added_scheduled_message", &sealed(msg.clone(), &sync)).unwrap();
        let stored = sync.store().scheduled_messages().to_vec().unwrap();
        assert_eq!(stored, vec![msg]);
    }

    #[test]
    fn test_remote_contact_is_not_reuploaded() {
        let (sync, _api) = signed_in_bridge();
        sync.store().advance_contact_watermark(1_000).unwrap();

        let contact = Contact {
            id: 3,
            phone_number: "5551234567".into(),
            id_matcher: "5551234567".into(),
            name: "Ada".into(),
            colors: ColorSet::default(),
            contact_type: ContactType::Default,
            updated_at: 50_000,
        };
        sync.apply_push("added_contact", &sealed(contact, &sync)).unwrap();

        let stored = sync.store().find_contact("5551234567").unwrap().unwrap();
        assert_eq!(stored.name, "Ada");
        assert!(sync.store().contacts_changed_since(1_000).to_vec().unwrap().is_empty());
    }

    #[test]
    fn test_removed_account_only_for_local_account() {
        let (sync, _api) = signed_in_bridge();
        conversation(&sync, "5551234567");

        let other = json!({ "id": "acct-2" }).to_string();
        assert!(matches!(sync.apply_push("removed_account", &other).unwrap(), PushOutcome::Ignored(_)));
        assert_eq!(sync.store().conversation_count().unwrap(), 1);
        assert!(sync.session().is_some());

        let mine = json!({ "account_id": "acct-1" }).to_string();
        assert_eq!(sync.apply_push("removed_account", &mine).unwrap(), PushOutcome::Applied);
        assert_eq!(sync.store().conversation_count().unwrap(), 0);
        assert_eq!(sync.store().account_id().unwrap(), None);
        assert_eq!(sync.store().device_id().unwrap(), None);
        assert!(sync.session().is_none());
    }
}
