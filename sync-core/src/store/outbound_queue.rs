//! Persistent queue of uploads waiting for the account backend
//!
//! Changes drained from the store's outbound channel land here first, so a
//! crash or an unreachable backend never loses a local mutation. Rows move
//! `pending -> completed` on success; transport failures bump the retry
//! count and leave the row pending until `max_retries`, after which it is
//! parked as `failed` for inspection.

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::events::OutboundChange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    Pending,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuedUpload {
    pub id: i64,
    pub change: OutboundChange,
    pub status: UploadStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: i64,
}

fn from_row(row: &Row) -> rusqlite::Result<QueuedUpload> {
    let payload: String = row.get(1)?;
    let change = serde_json::from_str(&payload).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    let status: String = row.get(2)?;

    Ok(QueuedUpload {
        id: row.get(0)?,
        change,
        status: UploadStatus::from_str(&status),
        retry_count: row.get(3)?,
        last_error: row.get(4)?,
        created_at: row.get(5)?,
    })
}

pub fn enqueue(conn: &Connection, change: &OutboundChange) -> Result<i64, SyncError> {
    let payload = serde_json::to_string(change)?;
    conn.execute(
        "INSERT INTO outbound_queue (resource, operation, entity_id, payload, status, created_at)
        VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
        params![
            change.resource().path(),
            change.operation(),
            change.entity_id(),
            payload,
            Utc::now().timestamp_millis(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Oldest pending uploads first
pub fn pending(conn: &Connection, limit: usize) -> Result<Vec<QueuedUpload>, SyncError> {
    let mut stmt = conn.prepare(
        "SELECT id, payload, status, retry_count, last_error, created_at
        FROM outbound_queue WHERE status = 'pending'
        ORDER BY id ASC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit as i64], from_row)?;
    Ok(rows.collect::<Result<_, _>>()?)
}

pub fn mark_completed(conn: &Connection, ids: &[i64]) -> Result<(), SyncError> {
    let mut stmt = conn.prepare("UPDATE outbound_queue SET status = 'completed', last_error = NULL WHERE id = ?1")?;
    for id in ids {
        stmt.execute(params![id])?;
    }
    Ok(())
}

/// Record a failed attempt. The row stays pending until it has failed
/// `max_retries` times. Returns the resulting status.
pub fn record_failure(
    conn: &Connection,
    id: i64,
    error: &str,
    max_retries: u32,
) -> Result<UploadStatus, SyncError> {
    conn.execute(
        "UPDATE outbound_queue SET
            retry_count = retry_count + 1,
            last_error = ?2,
            status = CASE WHEN retry_count + 1 >= ?3 THEN 'failed' ELSE 'pending' END
        WHERE id = ?1",
        params![id, error, max_retries],
    )?;

    let status: String = conn.query_row(
        "SELECT status FROM outbound_queue WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    Ok(UploadStatus::from_str(&status))
}

/// Give parked uploads another round of attempts
pub fn retry_failed(conn: &Connection) -> Result<usize, SyncError> {
    let changed = conn.execute(
        "UPDATE outbound_queue SET status = 'pending', retry_count = 0 WHERE status = 'failed'",
        [],
    )?;
    Ok(changed)
}

pub fn delete_completed(conn: &Connection) -> Result<usize, SyncError> {
    let changed = conn.execute("DELETE FROM outbound_queue WHERE status = 'completed'", [])?;
    Ok(changed)
}

pub fn count_with_status(conn: &Connection, status: UploadStatus) -> Result<usize, SyncError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM outbound_queue WHERE status = ?1",
        params![status.as_str()],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}
