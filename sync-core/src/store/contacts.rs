use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{map_constraint, new_record_id};
use crate::error::SyncError;
use crate::types::{ColorSet, Contact, ContactType};

const COLUMNS: &str = "id, phone_number, id_matcher, name,
    color, color_dark, color_light, color_accent, contact_type, updated_at";

pub(crate) fn select_changed_since() -> String {
    format!(
        "SELECT {} FROM contacts WHERE updated_at > ?1 ORDER BY updated_at ASC, id ASC",
        COLUMNS
    )
}

fn contact_type_code(t: ContactType) -> i32 {
    match t {
        ContactType::Default => 0,
        ContactType::Group => 1,
        ContactType::Business => 2,
    }
}

fn contact_type_from_code(code: i32) -> ContactType {
    match code {
        1 => ContactType::Group,
        2 => ContactType::Business,
        _ => ContactType::Default,
    }
}

pub(crate) fn from_row(row: &Row) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: row.get(0)?,
        phone_number: row.get(1)?,
        id_matcher: row.get(2)?,
        name: row.get(3)?,
        colors: ColorSet {
            color: row.get(4)?,
            color_dark: row.get(5)?,
            color_light: row.get(6)?,
            color_accent: row.get(7)?,
        },
        contact_type: contact_type_from_code(row.get(8)?),
        updated_at: row.get(9)?,
    })
}

pub fn insert(conn: &Connection, contact: &Contact) -> Result<i64, SyncError> {
    let id = if contact.id > 0 { contact.id } else { new_record_id() };
    conn.execute(
        &format!("INSERT INTO contacts ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)", COLUMNS),
        params![
            id,
            contact.phone_number,
            contact.id_matcher,
            contact.name,
            contact.colors.color,
            contact.colors.color_dark,
            contact.colors.color_light,
            contact.colors.color_accent,
            contact_type_code(contact.contact_type),
            contact.updated_at,
        ],
    )
    .map_err(map_constraint("contact", id))?;
    Ok(id)
}

/// Insert or update keyed by `id_matcher`. Returns the stored id.
pub fn upsert(conn: &Connection, contact: &Contact) -> Result<i64, SyncError> {
    let Some(existing) = find_by_matcher(conn, &contact.id_matcher)? else {
        return insert(conn, contact);
    };

    conn.execute(
        "UPDATE contacts SET
            phone_number = ?2, name = ?3,
            color = ?4, color_dark = ?5, color_light = ?6, color_accent = ?7,
            contact_type = ?8, updated_at = ?9
        WHERE id = ?1",
        params![
            existing.id,
            contact.phone_number,
            contact.name,
            contact.colors.color,
            contact.colors.color_dark,
            contact.colors.color_light,
            contact.colors.color_accent,
            contact_type_code(contact.contact_type),
            contact.updated_at,
        ],
    )
    .map_err(map_constraint("contact", existing.id))?;
    Ok(existing.id)
}

pub fn get(conn: &Connection, id: i64) -> Result<Option<Contact>, SyncError> {
    let contact = conn
        .query_row(
            &format!("SELECT {} FROM contacts WHERE id = ?1", COLUMNS),
            params![id],
            from_row,
        )
        .optional()?;
    Ok(contact)
}

pub fn find_by_matcher(conn: &Connection, id_matcher: &str) -> Result<Option<Contact>, SyncError> {
    let contact = conn
        .query_row(
            &format!("SELECT {} FROM contacts WHERE id_matcher = ?1", COLUMNS),
            params![id_matcher],
            from_row,
        )
        .optional()?;
    Ok(contact)
}

pub fn delete(conn: &Connection, id: i64) -> Result<bool, SyncError> {
    let changed = conn.execute("DELETE FROM contacts WHERE id = ?1", params![id])?;
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::initialize_schema;

    fn contact(matcher: &str, name: &str, updated_at: i64) -> Contact {
        Contact {
            id: 0,
            phone_number: matcher.into(),
            id_matcher: matcher.into(),
            name: name.into(),
            colors: ColorSet::default(),
            contact_type: ContactType::Business,
            updated_at,
        }
    }

    #[test]
    fn test_upsert_by_matcher() {
        let conn = Connection::open_in_memory().unwrap();
        initialize_schema(&conn).unwrap();

        let id = upsert(&conn, &contact("5551234567", "Ada", 1)).unwrap();
        let again = upsert(&conn, &contact("5551234567", "Ada Lovelace", 2)).unwrap();
        assert_eq!(id, again);

        let stored = get(&conn, id).unwrap().unwrap();
        assert_eq!(stored.name, "Ada Lovelace");
        assert_eq!(stored.contact_type, ContactType::Business);
        assert_eq!(stored.updated_at, 2);
    }
}
