use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{available_id, map_constraint, new_record_id};
use crate::error::SyncError;
use crate::types::BlacklistEntry;

fn from_row(row: &Row) -> rusqlite::Result<BlacklistEntry> {
    Ok(BlacklistEntry {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        phrase: row.get(2)?,
    })
}

pub fn insert(conn: &Connection, entry: &BlacklistEntry) -> Result<i64, SyncError> {
    if !entry.is_valid() {
        let err = SyncError::constraint("blacklist", "either phone_number or phrase is required");
        return Err(if entry.id > 0 { err.with_entity_id(entry.id) } else { err });
    }
    let id = if entry.id > 0 { entry.id } else { new_record_id() };
    conn.execute(
        "INSERT INTO blacklists (id, phone_number, phrase) VALUES (?1, ?2, ?3)",
        params![id, entry.phone_number, entry.phrase],
    )
    .map_err(map_constraint("blacklist", id))?;
    Ok(id)
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<BlacklistEntry>, SyncError> {
    let entry = conn
        .query_row(
            "SELECT id, phone_number, phrase FROM blacklists WHERE id = ?1",
            params![id],
            from_row,
        )
        .optional()?;
    Ok(entry)
}

/// An entry blocking the same number or phrase, whatever its id
pub fn find_equivalent(conn: &Connection, entry: &BlacklistEntry) -> Result<Option<BlacklistEntry>, SyncError> {
    let found = conn
        .query_row(
            "SELECT id, phone_number, phrase FROM blacklists
            WHERE phone_number IS ?1 AND phrase IS ?2
            ORDER BY id LIMIT 1",
            params![entry.phone_number, entry.phrase],
            from_row,
        )
        .optional()?;
    Ok(found)
}

/// Add an entry that may already exist locally.
///
/// Entries match on the number/phrase they block, never on id alone. A new
/// entry keeps its id unless a different row already holds it. Returns the
/// id of the stored row and whether it was newly created.
pub fn upsert(conn: &Connection, entry: &BlacklistEntry) -> Result<(i64, bool), SyncError> {
    if let Some(found) = find_equivalent(conn, entry)? {
        return Ok((found.id, false));
    }

    let id = available_id(conn, "blacklists", entry.id)?;
    let stored = BlacklistEntry { id, ..entry.clone() };
    Ok((insert(conn, &stored)?, true))
}

pub fn list(conn: &Connection) -> Result<Vec<BlacklistEntry>, SyncError> {
    let mut stmt = conn.prepare("SELECT id, phone_number, phrase FROM blacklists ORDER BY id")?;
    let rows = stmt.query_map([], from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub fn delete(conn: &Connection, id: i64) -> Result<bool, SyncError> {
    let changed = conn.execute("DELETE FROM blacklists WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}
