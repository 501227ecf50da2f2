//! Local mutations to the account backend
//!
//! `pump_outbound` moves committed changes from the store's channel into the
//! persistent upload queue; `flush` drains that queue against the
//! [`AccountApi`](super::AccountApi). Runs of adds for the same resource go
//! out in one bulk call.

use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::{seal_record, AccountSession, SyncBridge};
use crate::error::Result;
use crate::events::OutboundChange;
use crate::logging::fmt_ms;
use crate::store::outbound_queue::{self, QueuedUpload, UploadStatus};
use crate::store::Upload;
use crate::types::Resource;

/// How many queued uploads one flush looks at
const FLUSH_WINDOW: usize = 500;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Uploads the backend accepted
    pub sent: usize,
    /// Uploads that failed and stay pending
    pub retrying: usize,
    /// Uploads that ran out of retries
    pub parked: usize,
}

/// Length of the batch starting at `queued[0]`: consecutive adds of one
/// resource, capped at `max`. Anything else goes out alone.
fn batch_len(queued: &[QueuedUpload], max: usize) -> usize {
    let Some(OutboundChange::Add(first)) = queued.first().map(|u| &u.change) else {
        return 1;
    };
    let resource = first.resource();
    queued
        .iter()
        .take(max.max(1))
        .take_while(|u| matches!(&u.change, OutboundChange::Add(r) if r.resource() == resource))
        .count()
}

impl SyncBridge {
    /// Persist every change published since the last pump. Without a
    /// signed-in account there is nothing to mirror to and the changes are
    /// dropped.
    pub fn pump_outbound(&self) -> Result<usize> {
        let Some(receiver) = self.outbound_receiver() else {
            return Ok(0);
        };
        let changes: Vec<OutboundChange> = receiver.try_iter().collect();
        if changes.is_empty() {
            return Ok(0);
        }
        if self.session().is_none() {
            debug!(count = changes.len(), "No account signed in, dropping outbound changes");
            return Ok(0);
        }

        self.store.write(Upload::Enabled, |tx| {
            for change in &changes {
                outbound_queue::enqueue(tx.conn(), change)?;
            }
            Ok(changes.len())
        })
    }

    /// Upload pending changes, oldest first. The first transport failure
    /// ends the flush; everything after it stays queued for the next one.
    pub async fn flush(&self) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        let Some(session) = self.session() else {
            return Ok(report);
        };

        let queued = self
            .store
            .read(|conn| outbound_queue::pending(conn, FLUSH_WINDOW))?;
        if queued.is_empty() {
            return Ok(report);
        }
        debug!(pending = queued.len(), "Flushing outbound queue");
        let started = Instant::now();

        let mut start = 0;
        while start < queued.len() {
            let batch = &queued[start..start + batch_len(&queued[start..], self.config.batch_size)];
            start += batch.len();
            let ids: Vec<i64> = batch.iter().map(|u| u.id).collect();

            match self.send(&session, batch).await {
                Ok(()) => {
                    self.store
                        .write(Upload::Enabled, |tx| outbound_queue::mark_completed(tx.conn(), &ids))?;
                    report.sent += ids.len();
                }
                Err(e) => {
                    warn!(count = ids.len(), "Upload failed: {}", e);
                    let message = e.to_string();
                    let max_retries = self.config.max_retries;
                    let statuses = self.store.write(Upload::Enabled, |tx| {
                        ids.iter()
                            .map(|id| outbound_queue::record_failure(tx.conn(), *id, &message, max_retries))
                            .collect::<Result<Vec<_>>>()
                    })?;
                    for status in statuses {
                        match status {
                            UploadStatus::Failed => report.parked += 1,
                            _ => report.retrying += 1,
                        }
                    }
                    if e.is_retryable() {
                        break;
                    }
                }
            }
        }

        self.store
            .write(Upload::Enabled, |tx| outbound_queue::delete_completed(tx.conn()))?;
        if report.sent > 0 {
            info!(
                sent = report.sent,
                retrying = report.retrying,
                parked = report.parked,
                "Flushed outbound queue in {}",
                fmt_ms(started.elapsed())
            );
        }
        Ok(report)
    }

    async fn send(&self, session: &AccountSession, batch: &[QueuedUpload]) -> Result<()> {
        let account = session.account_id.as_str();
        let device = session.device_id.as_str();

        match &batch[0].change {
            OutboundChange::Add(first) => {
                let records = batch
                    .iter()
                    .filter_map(|u| match &u.change {
                        OutboundChange::Add(record) => Some(seal_record(record, session.encryption())),
                        _ => None,
                    })
                    .collect::<Result<Vec<Value>>>()?;
                self.api.add(first.resource(), account, device, records).await
            }
            OutboundChange::Update(record) => {
                let payload = seal_record(record, session.encryption())?;
                self.api
                    .update(record.resource(), account, device, record.id(), payload)
                    .await
            }
            OutboundChange::Remove { resource, id } => {
                self.api.remove(*resource, account, device, *id).await
            }
            OutboundChange::RemoveDraftsFor { conversation_id } => {
                self.api.remove_drafts_for(account, device, *conversation_id).await
            }
        }
    }
}
