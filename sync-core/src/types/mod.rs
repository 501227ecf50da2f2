pub mod conversation;
pub mod message;
pub mod records;

use serde::{Deserialize, Serialize};

pub use conversation::{ColorSet, Conversation};
pub use message::{Message, MessageType};
pub use records::{BlacklistEntry, Contact, ContactType, Draft, Repeat, ScheduledMessage};

/// Backend resource collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Accounts,
    Conversations,
    Messages,
    Drafts,
    ScheduledMessages,
    Blacklists,
    Contacts,
    Devices,
    Templates,
    AutoReplies,
}

impl Resource {
    /// Path segment under `/api/v1/`
    pub fn path(self) -> &'static str {
        match self {
            Self::Accounts => "accounts",
            Self::Conversations => "conversations",
            Self::Messages => "messages",
            Self::Drafts => "drafts",
            Self::ScheduledMessages => "scheduled_messages",
            Self::Blacklists => "blacklists",
            Self::Contacts => "contacts",
            Self::Devices => "devices",
            Self::Templates => "templates",
            Self::AutoReplies => "auto_replies",
        }
    }

    pub fn from_path(path: &str) -> Option<Self> {
        Some(match path {
            "accounts" => Self::Accounts,
            "conversations" => Self::Conversations,
            "messages" => Self::Messages,
            "drafts" => Self::Drafts,
            "scheduled_messages" => Self::ScheduledMessages,
            "blacklists" => Self::Blacklists,
            "contacts" => Self::Contacts,
            "devices" => Self::Devices,
            "templates" => Self::Templates,
            "auto_replies" => Self::AutoReplies,
            _ => return None,
        })
    }
}

/// Any record that is mirrored to the account backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Record {
    Conversation(Conversation),
    Message(Message),
    Draft(Draft),
    ScheduledMessage(ScheduledMessage),
    Blacklist(BlacklistEntry),
    Contact(Contact),
}

impl Record {
    pub fn resource(&self) -> Resource {
        match self {
            Self::Conversation(_) => Resource::Conversations,
            Self::Message(_) => Resource::Messages,
            Self::Draft(_) => Resource::Drafts,
            Self::ScheduledMessage(_) => Resource::ScheduledMessages,
            Self::Blacklist(_) => Resource::Blacklists,
            Self::Contact(_) => Resource::Contacts,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Self::Conversation(r) => r.id,
            Self::Message(r) => r.id,
            Self::Draft(r) => r.id,
            Self::ScheduledMessage(r) => r.id,
            Self::Blacklist(r) => r.id,
            Self::Contact(r) => r.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_paths_round_trip() {
        for r in [
            Resource::Accounts,
            Resource::Conversations,
            Resource::Messages,
            Resource::Drafts,
            Resource::ScheduledMessages,
            Resource::Blacklists,
            Resource::Contacts,
            Resource::Devices,
            Resource::Templates,
            Resource::AutoReplies,
        ] {
            assert_eq!(Resource::from_path(r.path()), Some(r));
        }
        assert_eq!(Resource::from_path("folders"), None);
    }

    #[test]
    fn test_record_identity() {
        let record = Record::Blacklist(BlacklistEntry {
            id: 12,
            phone_number: Some("5551234567".into()),
            phrase: None,
        });
        assert_eq!(record.resource(), Resource::Blacklists);
        assert_eq!(record.id(), 12);

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"kind\":\"blacklist\""));
    }
}
