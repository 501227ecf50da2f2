use rusqlite::{params, Connection, OptionalExtension};

use crate::error::SyncError;

pub const ACCOUNT_ID: &str = "account_id";
pub const DEVICE_ID: &str = "device_id";
pub const CONTACT_WATERMARK: &str = "contact_watermark";

pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>, SyncError> {
    let value = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<(), SyncError> {
    conn.execute(
        "INSERT INTO settings (key, value, updated_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
        params![key, value, chrono::Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

pub fn delete_setting(conn: &Connection, key: &str) -> Result<bool, SyncError> {
    let changed = conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
    Ok(changed > 0)
}

/// Contact reconciliation watermark, 0 when never reconciled
pub fn contact_watermark(conn: &Connection) -> Result<i64, SyncError> {
    Ok(get_setting(conn, CONTACT_WATERMARK)?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0))
}

/// Move the watermark forward. An older value is ignored so the
/// checkpoint never goes backwards. Returns the stored watermark.
pub fn advance_contact_watermark(conn: &Connection, watermark: i64) -> Result<i64, SyncError> {
    let current = contact_watermark(conn)?;
    if watermark <= current {
        return Ok(current);
    }
    set_setting(conn, CONTACT_WATERMARK, &watermark.to_string())?;
    Ok(watermark)
}
