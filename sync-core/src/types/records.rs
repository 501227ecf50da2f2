use serde::{Deserialize, Serialize};

use super::ColorSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: i64,
    pub conversation_id: i64,
    pub data: String,
    pub mime_type: String,
}

/// How often a scheduled message repeats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Repeat {
    #[default]
    Never,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Repeat {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Never => 0,
            Self::Daily => 1,
            Self::Weekly => 2,
            Self::Monthly => 3,
            Self::Yearly => 4,
        }
    }

    /// Unknown values fall back to `Never`
    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => Self::Daily,
            2 => Self::Weekly,
            3 => Self::Monthly,
            4 => Self::Yearly,
            _ => Self::Never,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledMessage {
    pub id: i64,
    /// Recipients, joined with ", "
    pub to: String,
    pub data: String,
    pub mime_type: String,
    /// When to send (epoch ms)
    pub timestamp: i64,
    pub title: String,
    #[serde(default)]
    pub repeat: Repeat,
}

/// A blocked sender number or a blocked phrase. At least one is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub id: i64,
    pub phone_number: Option<String>,
    pub phrase: Option<String>,
}

impl BlacklistEntry {
    pub fn is_valid(&self) -> bool {
        let has = |v: &Option<String>| v.as_deref().map_or(false, |s| !s.trim().is_empty());
        has(&self.phone_number) || has(&self.phrase)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactType {
    #[default]
    Default,
    Group,
    Business,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    pub phone_number: String,
    pub id_matcher: String,
    pub name: String,
    pub colors: ColorSet,
    #[serde(default)]
    pub contact_type: ContactType,
    /// Last local change (epoch ms), compared against the reconciliation watermark
    #[serde(default)]
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blacklist_needs_number_or_phrase() {
        let mut entry = BlacklistEntry { id: 1, phone_number: None, phrase: None };
        assert!(!entry.is_valid());
        entry.phrase = Some("   ".into());
        assert!(!entry.is_valid());
        entry.phrase = Some("win a prize".into());
        assert!(entry.is_valid());
    }

    #[test]
    fn test_repeat_codes() {
        assert_eq!(Repeat::from_i32(Repeat::Weekly.as_i32()), Repeat::Weekly);
        assert_eq!(Repeat::from_i32(42), Repeat::Never);
    }
}
