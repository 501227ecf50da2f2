use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{available_id, map_constraint, new_record_id};
use crate::error::SyncError;
use crate::types::Draft;

fn from_row(row: &Row) -> rusqlite::Result<Draft> {
    Ok(Draft {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        data: row.get(2)?,
        mime_type: row.get(3)?,
    })
}

pub fn insert(conn: &Connection, draft: &Draft) -> Result<i64, SyncError> {
    let id = if draft.id > 0 { draft.id } else { new_record_id() };
    conn.execute(
        "INSERT INTO drafts (id, conversation_id, data, mime_type) VALUES (?1, ?2, ?3, ?4)",
        params![id, draft.conversation_id, draft.data, draft.mime_type],
    )
    .map_err(map_constraint("draft", id))?;
    Ok(id)
}

/// Insert, or overwrite the row with the same id when it belongs to the
/// same conversation. A draft of another conversation holding the id is
/// left alone and the new draft gets a fresh id.
pub fn upsert(conn: &Connection, draft: &Draft) -> Result<i64, SyncError> {
    if draft.id > 0 {
        if let Some(existing) = get(conn, draft.id)? {
            if existing.conversation_id == draft.conversation_id {
                conn.execute(
                    "UPDATE drafts SET data = ?2, mime_type = ?3 WHERE id = ?1",
                    params![draft.id, draft.data, draft.mime_type],
                )
                .map_err(map_constraint("draft", draft.id))?;
                return Ok(draft.id);
            }
        }
    }

    let id = available_id(conn, "drafts", draft.id)?;
    insert(conn, &Draft { id, ..draft.clone() })
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Draft>, SyncError> {
    let draft = conn
        .query_row(
            "SELECT id, conversation_id, data, mime_type FROM drafts WHERE id = ?1",
            params![id],
            from_row,
        )
        .optional()?;
    Ok(draft)
}

pub fn for_conversation(conn: &Connection, conversation_id: i64) -> Result<Vec<Draft>, SyncError> {
    let mut stmt = conn.prepare(
        "SELECT id, conversation_id, data, mime_type FROM drafts
        WHERE conversation_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![conversation_id], from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub fn delete(conn: &Connection, id: i64) -> Result<bool, SyncError> {
    let changed = conn.execute("DELETE FROM drafts WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

/// Remove every draft of a conversation, returning how many went
pub fn delete_for_conversation(conn: &Connection, conversation_id: i64) -> Result<usize, SyncError> {
    let changed = conn.execute(
        "DELETE FROM drafts WHERE conversation_id = ?1",
        params![conversation_id],
    )?;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{conversations, schema::initialize_schema};
    use crate::types::Conversation;

    fn setup() -> (Connection, i64, i64) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        initialize_schema(&conn).unwrap();
        let ada = Conversation::new("5551234567".into(), "Ada".into(), "5551234567".into(), 0);
        let bob = Conversation::new("5559876543".into(), "Bob".into(), "5559876543".into(), 0);
        let a = conversations::insert(&conn, &ada).unwrap();
        let b = conversations::insert(&conn, &bob).unwrap();
        (conn, a, b)
    }

    fn draft(id: i64, conversation_id: i64, data: &str) -> Draft {
        Draft { id, conversation_id, data: data.into(), mime_type: "text/plain".into() }
    }

    #[test]
    fn test_upsert_same_conversation_overwrites() {
        let (conn, a, _) = setup();
        assert_eq!(upsert(&conn, &draft(8, a, "hel")).unwrap(), 8);
        assert_eq!(upsert(&conn, &draft(8, a, "hello")).unwrap(), 8);
        assert_eq!(for_conversation(&conn, a).unwrap().len(), 1);
        assert_eq!(get(&conn, 8).unwrap().unwrap().data, "hello");
    }

    #[test]
    fn test_upsert_colliding_id_keeps_both() {
        let (conn, a, b) = setup();
        upsert(&conn, &draft(8, a, "for ada")).unwrap();

        let other = upsert(&conn, &draft(8, b, "for bob")).unwrap();
        assert_ne!(other, 8);
        assert_eq!(get(&conn, 8).unwrap().unwrap().data, "for ada");
        assert_eq!(for_conversation(&conn, b).unwrap()[0].data, "for bob");
    }

    #[test]
    fn test_delete_for_conversation() {
        let (conn, a, b) = setup();
        insert(&conn, &draft(0, a, "one")).unwrap();
        insert(&conn, &draft(0, a, "two")).unwrap();
        insert(&conn, &draft(0, b, "three")).unwrap();

        assert_eq!(delete_for_conversation(&conn, a).unwrap(), 2);
        assert!(for_conversation(&conn, a).unwrap().is_empty());
        assert_eq!(for_conversation(&conn, b).unwrap().len(), 1);
    }
}
