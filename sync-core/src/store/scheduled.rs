use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{map_constraint, new_record_id};
use crate::error::SyncError;
use crate::types::{Repeat, ScheduledMessage};

pub(crate) const SELECT_ALL: &str = "SELECT id, to_numbers, data, mime_type, timestamp, title, repeat
    FROM scheduled_messages ORDER BY timestamp ASC, id ASC";

pub(crate) fn from_row(row: &Row) -> rusqlite::Result<ScheduledMessage> {
    Ok(ScheduledMessage {
        id: row.get(0)?,
        to: row.get(1)?,
        data: row.get(2)?,
        mime_type: row.get(3)?,
        timestamp: row.get(4)?,
        title: row.get(5)?,
        repeat: Repeat::from_i32(row.get(6)?),
    })
}

pub fn insert(conn: &Connection, msg: &ScheduledMessage) -> Result<i64, SyncError> {
    let id = if msg.id > 0 { msg.id } else { new_record_id() };
    conn.execute(
        "INSERT INTO scheduled_messages (id, to_numbers, data, mime_type, timestamp, title, repeat)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![id, msg.to, msg.data, msg.mime_type, msg.timestamp, msg.title, msg.repeat.as_i32()],
    )
    .map_err(map_constraint("scheduled_message", id))?;
    Ok(id)
}

pub fn update(conn: &Connection, msg: &ScheduledMessage) -> Result<bool, SyncError> {
    let changed = conn
        .execute(
            "UPDATE scheduled_messages SET
                to_numbers = ?2, data = ?3, mime_type = ?4, timestamp = ?5, title = ?6, repeat = ?7
            WHERE id = ?1",
            params![msg.id, msg.to, msg.data, msg.mime_type, msg.timestamp, msg.title, msg.repeat.as_i32()],
        )
        .map_err(map_constraint("scheduled_message", msg.id))?;
    Ok(changed > 0)
}

/// Insert, or overwrite the row with the same id
pub fn upsert(conn: &Connection, msg: &ScheduledMessage) -> Result<i64, SyncError> {
    if msg.id > 0 && update(conn, msg)? {
        return Ok(msg.id);
    }
    insert(conn, msg)
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<ScheduledMessage>, SyncError> {
    let msg = conn
        .query_row(
            "SELECT id, to_numbers, data, mime_type, timestamp, title, repeat
            FROM scheduled_messages WHERE id = ?1",
            params![id],
            from_row,
        )
        .optional()?;
    Ok(msg)
}

pub fn delete(conn: &Connection, id: i64) -> Result<bool, SyncError> {
    let changed = conn.execute("DELETE FROM scheduled_messages WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}
