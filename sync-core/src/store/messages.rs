use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{map_constraint, new_record_id};
use crate::error::SyncError;
use crate::types::{Message, MessageType};

pub(crate) const COLUMNS: &str = "id, conversation_id, type, data, mime_type, timestamp,
    read, seen, message_from, color, sim_phone_number";

pub(crate) fn select_for_conversation() -> String {
    format!(
        "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY timestamp ASC, id ASC",
        COLUMNS
    )
}

pub(crate) fn select_matching_data() -> String {
    format!(
        "SELECT {} FROM messages WHERE data = ?1 ORDER BY timestamp DESC, id DESC",
        COLUMNS
    )
}

pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Message> {
    let raw_type: i32 = row.get(2)?;
    let message_type = MessageType::from_i32(raw_type).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Integer, Box::new(e))
    })?;

    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        message_type,
        data: row.get(3)?,
        mime_type: row.get(4)?,
        timestamp: row.get(5)?,
        read: row.get(6)?,
        seen: row.get(7)?,
        from: row.get(8)?,
        color: row.get(9)?,
        sim_phone_number: row.get(10)?,
    })
}

/// Insert a message. The owning conversation must exist. An id of 0 gets
/// a fresh random id.
pub fn insert(conn: &Connection, msg: &Message) -> Result<i64, SyncError> {
    let id = if msg.id > 0 { msg.id } else { new_record_id() };
    conn.execute(
        &format!(
            "INSERT INTO messages ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            COLUMNS
        ),
        params![
            id,
            msg.conversation_id,
            msg.message_type.as_i32(),
            msg.data,
            msg.mime_type,
            msg.timestamp,
            msg.read,
            msg.seen,
            msg.from,
            msg.color,
            msg.sim_phone_number,
        ],
    )
    .map_err(map_constraint("message", id))?;

    Ok(id)
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Message>, SyncError> {
    let msg = conn
        .query_row(
            &format!("SELECT {} FROM messages WHERE id = ?1", COLUMNS),
            params![id],
            from_row,
        )
        .optional()?;
    Ok(msg)
}

/// The most recent message of a conversation whose body is exactly `data`
pub fn latest_with_data(conn: &Connection, conversation_id: i64, data: &str) -> Result<Option<Message>, SyncError> {
    let msg = conn
        .query_row(
            &format!(
                "SELECT {} FROM messages WHERE conversation_id = ?1 AND data = ?2
                ORDER BY timestamp DESC, id DESC LIMIT 1",
                COLUMNS
            ),
            params![conversation_id, data],
            from_row,
        )
        .optional()?;
    Ok(msg)
}

/// A stored message with the same conversation, timestamp and body as `msg`
pub fn find_same(conn: &Connection, msg: &Message) -> Result<Option<Message>, SyncError> {
    let found = conn
        .query_row(
            &format!(
                "SELECT {} FROM messages
                WHERE conversation_id = ?1 AND timestamp = ?2 AND data = ?3
                ORDER BY id LIMIT 1",
                COLUMNS
            ),
            params![msg.conversation_id, msg.timestamp, msg.data],
            from_row,
        )
        .optional()?;
    Ok(found)
}

pub fn latest_for_conversation(conn: &Connection, conversation_id: i64) -> Result<Option<Message>, SyncError> {
    let msg = conn
        .query_row(
            &format!(
                "SELECT {} FROM messages WHERE conversation_id = ?1
                ORDER BY timestamp DESC, id DESC LIMIT 1",
                COLUMNS
            ),
            params![conversation_id],
            from_row,
        )
        .optional()?;
    Ok(msg)
}

/// Apply a delivery status update.
///
/// Returns the updated message, or `None` when the id is unknown or the
/// update would move the lifecycle backwards (stale or repeated report).
pub fn update_type(
    conn: &Connection,
    id: i64,
    next: MessageType,
) -> Result<Option<Message>, SyncError> {
    let Some(mut msg) = get(conn, id)? else {
        return Ok(None);
    };
    if !msg.message_type.can_transition_to(next) {
        return Ok(None);
    }

    conn.execute(
        "UPDATE messages SET type = ?2 WHERE id = ?1",
        params![id, next.as_i32()],
    )?;
    msg.message_type = next;
    Ok(Some(msg))
}

/// Delete a message, returning the removed row
pub fn delete(conn: &Connection, id: i64) -> Result<Option<Message>, SyncError> {
    let existing = get(conn, id)?;
    if existing.is_some() {
        conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
    }
    Ok(existing)
}

/// Delete every message older than `cutoff`. Returns the number removed and
/// the conversations that lost messages.
pub fn delete_older_than(conn: &Connection, cutoff: i64) -> Result<(usize, Vec<i64>), SyncError> {
    let affected: Vec<i64> = {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT conversation_id FROM messages WHERE timestamp < ?1",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| row.get(0))?;
        rows.collect::<Result<_, _>>()?
    };

    let removed = conn.execute("DELETE FROM messages WHERE timestamp < ?1", params![cutoff])?;
    Ok((removed, affected))
}

pub fn count_for_conversation(conn: &Connection, conversation_id: i64) -> Result<usize, SyncError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
        params![conversation_id],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

pub fn count(conn: &Connection) -> Result<usize, SyncError> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
    Ok(n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::{conversations, schema::initialize_schema};
    use crate::types::Conversation;

    fn setup() -> (Connection, i64) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        initialize_schema(&conn).unwrap();
        let conv = Conversation::new("5551234567".into(), "Ada".into(), "5551234567".into(), 0);
        let id = conversations::insert(&conn, &conv).unwrap();
        (conn, id)
    }

    fn message(conversation_id: i64, message_type: MessageType, data: &str, ts: i64) -> Message {
        Message {
            id: 0,
            conversation_id,
            message_type,
            data: data.into(),
            mime_type: "text/plain".into(),
            timestamp: ts,
            read: false,
            seen: false,
            from: None,
            color: None,
            sim_phone_number: None,
        }
    }

    #[test]
    fn test_message_requires_conversation() {
        let (conn, _) = setup();
        let err = insert(&conn, &message(999, MessageType::Received, "hi", 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    }

    #[test]
    fn test_latest_with_data() {
        let (conn, cid) = setup();
        insert(&conn, &message(cid, MessageType::Received, "hi", 10)).unwrap();
        let newer = insert(&conn, &message(cid, MessageType::Sent, "hi", 20)).unwrap();
        insert(&conn, &message(cid, MessageType::Received, "other", 30)).unwrap();

        let found = latest_with_data(&conn, cid, "hi").unwrap().unwrap();
        assert_eq!(found.id, newer);
        assert!(latest_with_data(&conn, cid, "missing").unwrap().is_none());

        let other = Conversation::new("5559876543".into(), "Bob".into(), "5559876543".into(), 0);
        let other_id = conversations::insert(&conn, &other).unwrap();
        assert!(latest_with_data(&conn, other_id, "hi").unwrap().is_none());
    }

    #[test]
    fn test_find_same_ignores_ids() {
        let (conn, cid) = setup();
        let local = message(cid, MessageType::Received, "hello", 10);
        let local_id = insert(&conn, &local).unwrap();

        let mut copy = local.clone();
        copy.id = local_id + 1;
        assert_eq!(find_same(&conn, &copy).unwrap().unwrap().id, local_id);

        copy.timestamp = 11;
        assert!(find_same(&conn, &copy).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_id_reports_the_row() {
        let (conn, cid) = setup();
        let mut msg = message(cid, MessageType::Received, "hi", 1);
        msg.id = 40;
        insert(&conn, &msg).unwrap();
        let err = insert(&conn, &msg).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
        assert_eq!(err.entity_id(), Some(40));
    }

    #[test]
    fn test_out_of_order_status_updates() {
        let (conn, cid) = setup();
        let id = insert(&conn, &message(cid, MessageType::Sending, "hi", 10)).unwrap();

        assert!(update_type(&conn, id, MessageType::Delivered).unwrap().is_some());
        // A late "sent" report must not regress the row
        assert!(update_type(&conn, id, MessageType::Sent).unwrap().is_none());
        assert!(update_type(&conn, id, MessageType::Delivered).unwrap().is_none());
        assert_eq!(get(&conn, id).unwrap().unwrap().message_type, MessageType::Delivered);

        assert!(update_type(&conn, 12345, MessageType::Sent).unwrap().is_none());
    }

    #[test]
    fn test_delete_older_than_reports_conversations() {
        let (conn, cid) = setup();
        insert(&conn, &message(cid, MessageType::Received, "old", 10)).unwrap();
        insert(&conn, &message(cid, MessageType::Received, "new", 1_000)).unwrap();

        let (removed, affected) = delete_older_than(&conn, 500).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(affected, vec![cid]);
        assert_eq!(count_for_conversation(&conn, cid).unwrap(), 1);
    }

    #[test]
    fn test_deleting_conversation_cascades() {
        let (conn, cid) = setup();
        insert(&conn, &message(cid, MessageType::Received, "hi", 10)).unwrap();
        conversations::delete(&conn, cid).unwrap();
        assert_eq!(count(&conn).unwrap(), 0);
    }
}
