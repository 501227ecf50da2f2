use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Message kind. Outgoing messages move along
/// `Sending -> Sent -> Error -> Delivered`; `Received` stands alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Received,
    Sent,
    Sending,
    Error,
    Delivered,
}

impl MessageType {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Received => 0,
            Self::Sent => 1,
            Self::Sending => 2,
            Self::Error => 3,
            Self::Delivered => 4,
        }
    }

    pub fn from_i32(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::Received),
            1 => Ok(Self::Sent),
            2 => Ok(Self::Sending),
            3 => Ok(Self::Error),
            4 => Ok(Self::Delivered),
            other => Err(SyncError::InvalidInput(format!("Unknown message type {}", other))),
        }
    }

    pub fn is_inbound(self) -> bool {
        self == Self::Received
    }

    fn lifecycle_rank(self) -> Option<u8> {
        match self {
            Self::Received => None,
            Self::Sending => Some(0),
            Self::Sent => Some(1),
            Self::Error => Some(2),
            Self::Delivered => Some(3),
        }
    }

    /// Whether a status update from `self` to `next` moves the lifecycle
    /// forward. Stale, repeated and cross-direction updates are rejected so
    /// they can be dropped without error. `Error -> Sending` is a resend.
    pub fn can_transition_to(self, next: MessageType) -> bool {
        if self == Self::Error && next == Self::Sending {
            return true;
        }
        match (self.lifecycle_rank(), next.lifecycle_rank()) {
            (Some(current), Some(next)) => next > current,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Body text or content URI
    pub data: String,
    pub mime_type: String,
    pub timestamp: i64,
    pub read: bool,
    pub seen: bool,
    /// Sender label in group conversations
    pub from: Option<String>,
    pub color: Option<i32>,
    pub sim_phone_number: Option<String>,
}

impl Message {
    pub fn is_text(&self) -> bool {
        self.mime_type == "text/plain"
    }

    /// Text shown as the conversation snippet
    pub fn snippet(&self) -> String {
        if self.is_text() {
            self.data.clone()
        } else if self.mime_type.starts_with("image/") {
            "Picture".to_string()
        } else if self.mime_type.starts_with("video/") {
            "Video".to_string()
        } else if self.mime_type.starts_with("audio/") {
            "Audio".to_string()
        } else {
            "Attachment".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_round_trips_through_i32() {
        for t in [
            MessageType::Received,
            MessageType::Sent,
            MessageType::Sending,
            MessageType::Error,
            MessageType::Delivered,
        ] {
            assert_eq!(MessageType::from_i32(t.as_i32()).unwrap(), t);
        }
        assert!(MessageType::from_i32(9).is_err());
    }

    #[test]
    fn test_lifecycle_only_moves_forward() {
        use MessageType::*;

        assert!(Sending.can_transition_to(Sent));
        assert!(Sending.can_transition_to(Delivered));
        assert!(Sent.can_transition_to(Delivered));
        assert!(Sent.can_transition_to(Error));
        assert!(Error.can_transition_to(Delivered));
        assert!(Error.can_transition_to(Sending));

        // Out-of-order or repeated reports
        assert!(!Delivered.can_transition_to(Sent));
        assert!(!Delivered.can_transition_to(Delivered));
        assert!(!Sent.can_transition_to(Sending));

        // Received never takes outbound statuses
        assert!(!Received.can_transition_to(Sent));
        assert!(!Sending.can_transition_to(Received));
    }

    #[test]
    fn test_snippet_for_media() {
        let mut msg = Message {
            id: 1,
            conversation_id: 1,
            message_type: MessageType::Received,
            data: "content://mms/part/1".into(),
            mime_type: "image/jpeg".into(),
            timestamp: 0,
            read: false,
            seen: false,
            from: None,
            color: None,
            sim_phone_number: None,
        };
        assert_eq!(msg.snippet(), "Picture");
        msg.mime_type = "text/plain".into();
        msg.data = "hi".into();
        assert_eq!(msg.snippet(), "hi");
    }
}
