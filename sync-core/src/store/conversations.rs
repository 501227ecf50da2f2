use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{map_constraint, new_record_id};
use crate::error::SyncError;
use crate::ingest::id_matcher::{id_matcher, split_participants};
use crate::types::{ColorSet, Conversation};

pub(crate) const COLUMNS: &str = "id, id_matcher, title, phone_numbers, snippet, timestamp,
    read, pinned, mute, archive, private_notifications,
    color, color_dark, color_light, color_accent,
    ringtone_uri, image_uri, sim_subscription_id, message_count, unread_count";

/// Non-archived conversations in display order
pub(crate) const SELECT_ACTIVE: &str = "SELECT id, id_matcher, title, phone_numbers, snippet, timestamp,
    read, pinned, mute, archive, private_notifications,
    color, color_dark, color_light, color_accent,
    ringtone_uri, image_uri, sim_subscription_id, message_count, unread_count
    FROM conversations WHERE archive = 0
    ORDER BY pinned DESC, timestamp DESC, id DESC";

pub(crate) const SELECT_ARCHIVED: &str = "SELECT id, id_matcher, title, phone_numbers, snippet, timestamp,
    read, pinned, mute, archive, private_notifications,
    color, color_dark, color_light, color_accent,
    ringtone_uri, image_uri, sim_subscription_id, message_count, unread_count
    FROM conversations WHERE archive = 1
    ORDER BY timestamp DESC, id DESC";

pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        id_matcher: row.get(1)?,
        title: row.get(2)?,
        phone_numbers: row.get(3)?,
        snippet: row.get(4)?,
        timestamp: row.get(5)?,
        read: row.get(6)?,
        pinned: row.get(7)?,
        mute: row.get(8)?,
        archive: row.get(9)?,
        private_notifications: row.get(10)?,
        colors: ColorSet {
            color: row.get(11)?,
            color_dark: row.get(12)?,
            color_light: row.get(13)?,
            color_accent: row.get(14)?,
        },
        ringtone_uri: row.get(15)?,
        image_uri: row.get(16)?,
        sim_subscription_id: row.get(17)?,
        message_count: row.get(18)?,
        unread_count: row.get(19)?,
    })
}

/// The matcher for a conversation's participants.
///
/// Derived from `phone_numbers`, so two spellings of the same people always
/// share one matcher. A conversation without usable numbers keeps its
/// matcher, normalised the same way.
pub fn derived_matcher(conv: &Conversation) -> Result<String, SyncError> {
    id_matcher(&split_participants(&conv.phone_numbers))
        .or_else(|_| id_matcher(&split_participants(&conv.id_matcher)))
}

/// `conv` with its matcher recomputed from its participants
pub fn normalized(conv: &Conversation) -> Result<Conversation, SyncError> {
    let mut conv = conv.clone();
    conv.id_matcher = derived_matcher(&conv)?;
    Ok(conv)
}

/// Insert a conversation. An id of 0 gets a fresh random id; any other id
/// is kept (rows created on another device).
pub fn insert(conn: &Connection, conv: &Conversation) -> Result<i64, SyncError> {
    let id = if conv.id > 0 { conv.id } else { new_record_id() };
    let matcher = derived_matcher(conv)?;
    conn.execute(
        &format!("INSERT INTO conversations ({}) VALUES
            (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)", COLUMNS),
        params![
            id,
            matcher,
            conv.title,
            conv.phone_numbers,
            conv.snippet,
            conv.timestamp,
            conv.read,
            conv.pinned,
            conv.mute,
            conv.archive,
            conv.private_notifications,
            conv.colors.color,
            conv.colors.color_dark,
            conv.colors.color_light,
            conv.colors.color_accent,
            conv.ringtone_uri,
            conv.image_uri,
            conv.sim_subscription_id,
            conv.message_count,
            conv.unread_count,
        ],
    )
    .map_err(map_constraint("conversation", id))?;

    Ok(id)
}

/// Overwrite every field of an existing conversation. Returns false when
/// the id does not exist.
pub fn update(conn: &Connection, conv: &Conversation) -> Result<bool, SyncError> {
    let matcher = derived_matcher(conv)?;
    let changed = conn
        .execute(
            "UPDATE conversations SET
                id_matcher = ?2, title = ?3, phone_numbers = ?4, snippet = ?5, timestamp = ?6,
                read = ?7, pinned = ?8, mute = ?9, archive = ?10, private_notifications = ?11,
                color = ?12, color_dark = ?13, color_light = ?14, color_accent = ?15,
                ringtone_uri = ?16, image_uri = ?17, sim_subscription_id = ?18,
                message_count = ?19, unread_count = ?20
            WHERE id = ?1",
            params![
                conv.id,
                matcher,
                conv.title,
                conv.phone_numbers,
                conv.snippet,
                conv.timestamp,
                conv.read,
                conv.pinned,
                conv.mute,
                conv.archive,
                conv.private_notifications,
                conv.colors.color,
                conv.colors.color_dark,
                conv.colors.color_light,
                conv.colors.color_accent,
                conv.ringtone_uri,
                conv.image_uri,
                conv.sim_subscription_id,
                conv.message_count,
                conv.unread_count,
            ],
        )
        .map_err(map_constraint("conversation", conv.id))?;

    Ok(changed > 0)
}

/// Delete a conversation with its messages and drafts
pub fn delete(conn: &Connection, id: i64) -> Result<bool, SyncError> {
    let changed = conn.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Conversation>, SyncError> {
    let conv = conn
        .query_row(
            &format!("SELECT {} FROM conversations WHERE id = ?1", COLUMNS),
            params![id],
            from_row,
        )
        .optional()?;
    Ok(conv)
}

pub fn find_by_matcher(conn: &Connection, id_matcher: &str) -> Result<Option<Conversation>, SyncError> {
    let conv = conn
        .query_row(
            &format!("SELECT {} FROM conversations WHERE id_matcher = ?1", COLUMNS),
            params![id_matcher],
            from_row,
        )
        .optional()?;
    Ok(conv)
}

/// Fold a newly stored message into the conversation summary.
///
/// The snippet only follows the message when it is at least as new as the
/// current last activity, so late-arriving history does not overwrite it.
/// Inbound messages mark the conversation unread and unarchive it.
pub fn record_message(
    conn: &Connection,
    id: i64,
    snippet: &str,
    timestamp: i64,
    inbound: bool,
    unread: bool,
) -> Result<(), SyncError> {
    conn.execute(
        "UPDATE conversations SET
            snippet = CASE WHEN ?3 >= timestamp THEN ?2 ELSE snippet END,
            timestamp = MAX(timestamp, ?3),
            message_count = message_count + 1,
            read = CASE WHEN ?5 THEN 0 ELSE read END,
            unread_count = unread_count + ?5,
            archive = CASE WHEN ?4 THEN 0 ELSE archive END
        WHERE id = ?1",
        params![id, snippet, timestamp, inbound, inbound && unread],
    )?;
    Ok(())
}

/// Mark the conversation and all of its messages read
pub fn mark_read(conn: &Connection, id: i64) -> Result<bool, SyncError> {
    let changed = conn.execute(
        "UPDATE conversations SET read = 1, unread_count = 0 WHERE id = ?1",
        params![id],
    )?;
    if changed > 0 {
        conn.execute(
            "UPDATE messages SET read = 1, seen = 1 WHERE conversation_id = ?1 AND (read = 0 OR seen = 0)",
            params![id],
        )?;
    }
    Ok(changed > 0)
}

pub fn set_archive(conn: &Connection, id: i64, archive: bool) -> Result<bool, SyncError> {
    let changed = conn.execute(
        "UPDATE conversations SET archive = ?2 WHERE id = ?1 AND archive != ?2",
        params![id, archive],
    )?;
    Ok(changed > 0)
}

/// Recompute snippet, last activity and counters from the remaining messages.
/// Returns false when the conversation has no messages left.
pub fn refresh_summary(conn: &Connection, id: i64) -> Result<bool, SyncError> {
    let latest = super::messages::latest_for_conversation(conn, id)?;
    let Some(latest) = latest else {
        conn.execute(
            "UPDATE conversations SET message_count = 0, unread_count = 0 WHERE id = ?1",
            params![id],
        )?;
        return Ok(false);
    };

    conn.execute(
        "UPDATE conversations SET
            snippet = ?2,
            timestamp = ?3,
            message_count = (SELECT COUNT(*) FROM messages WHERE conversation_id = ?1),
            unread_count = (SELECT COUNT(*) FROM messages WHERE conversation_id = ?1 AND read = 0 AND type = 0)
        WHERE id = ?1",
        params![id, latest.snippet(), latest.timestamp],
    )?;
    Ok(true)
}

pub fn count(conn: &Connection) -> Result<usize, SyncError> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
    Ok(n as usize)
}
