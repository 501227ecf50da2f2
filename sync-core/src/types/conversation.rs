use serde::{Deserialize, Serialize};

/// The four related colours a conversation is themed with (ARGB)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorSet {
    pub color: i32,
    pub color_dark: i32,
    pub color_light: i32,
    pub color_accent: i32,
}

impl ColorSet {
    pub const fn new(color: u32, color_dark: u32, color_light: u32, color_accent: u32) -> Self {
        Self {
            color: color as i32,
            color_dark: color_dark as i32,
            color_light: color_light as i32,
            color_accent: color_accent as i32,
        }
    }

    /// Fixed palette used when no contact supplies colours
    pub const PALETTE: [ColorSet; 8] = [
        ColorSet::new(0xFF2196F3, 0xFF1565C0, 0xFF64B5F6, 0xFFFF6E40),
        ColorSet::new(0xFFF44336, 0xFFC62828, 0xFFE57373, 0xFF448AFF),
        ColorSet::new(0xFF4CAF50, 0xFF2E7D32, 0xFF81C784, 0xFFFF4081),
        ColorSet::new(0xFF9C27B0, 0xFF6A1B9A, 0xFFBA68C8, 0xFF69F0AE),
        ColorSet::new(0xFFFF9800, 0xFFEF6C00, 0xFFFFB74D, 0xFF536DFE),
        ColorSet::new(0xFF009688, 0xFF00695C, 0xFF4DB6AC, 0xFFFF5252),
        ColorSet::new(0xFF3F51B5, 0xFF283593, 0xFF7986CB, 0xFFFFD740),
        ColorSet::new(0xFF795548, 0xFF4E342E, 0xFFA1887F, 0xFF40C4FF),
    ];

    /// Pick a stable palette entry for a key
    pub fn for_key(key: &str) -> ColorSet {
        let hash = key
            .bytes()
            .fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        Self::PALETTE[(hash as usize) % Self::PALETTE.len()]
    }
}

impl Default for ColorSet {
    fn default() -> Self {
        Self::PALETTE[0]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    /// Normalized fingerprint of the participant set; unique across conversations
    pub id_matcher: String,
    pub title: String,
    /// Participants, joined with ", "
    pub phone_numbers: String,
    pub snippet: Option<String>,
    /// Last activity (epoch ms), drives ranking
    pub timestamp: i64,
    pub read: bool,
    pub pinned: bool,
    pub mute: bool,
    pub archive: bool,
    pub private_notifications: bool,
    pub colors: ColorSet,
    pub ringtone_uri: Option<String>,
    pub image_uri: Option<String>,
    pub sim_subscription_id: Option<i32>,
    #[serde(default)]
    pub message_count: u32,
    #[serde(default)]
    pub unread_count: u32,
}

impl Conversation {
    /// A fresh, not yet persisted conversation (id 0 lets the store assign one)
    pub fn new(id_matcher: String, title: String, phone_numbers: String, timestamp: i64) -> Self {
        Self {
            id: 0,
            colors: ColorSet::for_key(&id_matcher),
            id_matcher,
            title,
            phone_numbers,
            snippet: None,
            timestamp,
            read: true,
            pinned: false,
            mute: false,
            archive: false,
            private_notifications: false,
            ringtone_uri: None,
            image_uri: None,
            sim_subscription_id: None,
            message_count: 0,
            unread_count: 0,
        }
    }

    pub fn participants(&self) -> Vec<&str> {
        self.phone_numbers
            .split(',')
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect()
    }

    pub fn is_group(&self) -> bool {
        self.participants().len() > 1
    }
}
