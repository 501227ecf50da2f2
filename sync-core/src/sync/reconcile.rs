//! Jobs run by the host's scheduler: contact reconciliation and the
//! retention sweep.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::{seal_record, SyncBridge};
use crate::config::RetentionConfig;
use crate::error::Result;
use crate::types::{Record, Resource};

impl SyncBridge {
    /// Upload contacts changed after `since_watermark`, in batches, oldest
    /// change first. The stored watermark advances after each accepted
    /// batch, so a transport failure part way through resumes from the
    /// last batch that made it. When the next batch starts with the same
    /// `updated_at` the watermark stops one below it, so contacts sharing a
    /// timestamp across a batch boundary are sent again rather than lost.
    /// Returns how many contacts were uploaded.
    pub async fn run_contact_reconciliation(&self, since_watermark: i64) -> Result<usize> {
        let Some(session) = self.session() else {
            debug!("No account signed in, skipping contact reconciliation");
            return Ok(0);
        };

        let changed = self.store.contacts_changed_since(since_watermark).to_vec()?;
        if changed.is_empty() {
            return Ok(0);
        }

        let batch_size = self.config.batch_size.max(1);
        let mut uploaded = 0;
        for (n, batch) in changed.chunks(batch_size).enumerate() {
            let records = batch
                .iter()
                .map(|c| seal_record(&Record::Contact(c.clone()), session.encryption()))
                .collect::<Result<Vec<_>>>()?;
            self.api
                .add(Resource::Contacts, &session.account_id, &session.device_id, records)
                .await?;

            let newest = batch.iter().map(|c| c.updated_at).max().unwrap_or(since_watermark);
            let next = changed.get((n + 1) * batch_size);
            let safe = match next {
                Some(c) if c.updated_at == newest => newest - 1,
                _ => newest,
            };
            self.store.advance_contact_watermark(safe)?;
            uploaded += batch.len();
        }

        info!(uploaded, "Reconciled contacts");
        Ok(uploaded)
    }

    /// Drop messages older than `cutoff` (epoch ms). See
    /// [`EncryptedStore::cleanup_older_than`](crate::store::EncryptedStore::cleanup_older_than).
    pub fn cleanup_older_than(&self, cutoff: i64) -> Result<usize> {
        self.store.cleanup_older_than(cutoff)
    }

    /// Apply the configured retention window. A window of zero days keeps
    /// everything.
    pub fn run_retention_sweep(&self, retention: &RetentionConfig, now: DateTime<Utc>) -> Result<usize> {
        if retention.days == 0 {
            return Ok(0);
        }
        let cutoff = now - Duration::days(i64::from(retention.days));
        let removed = self.cleanup_older_than(cutoff.timestamp_millis())?;
        if removed > 0 {
            info!(removed, days = retention.days, "Retention sweep removed old messages");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ingest::IncomingMessage;
    use crate::store::Upload;
    use crate::sync::testing::{signed_in_bridge, ApiCall};
    use crate::types::{ColorSet, Contact, ContactType};

    fn contact(matcher: &str, updated_at: i64) -> Contact {
        Contact {
            id: 0,
            phone_number: matcher.into(),
            id_matcher: matcher.into(),
            name: format!("Contact {}", matcher),
            colors: ColorSet::default(),
            contact_type: ContactType::Default,
            updated_at,
        }
    }

    #[tokio::test]
    async fn test_reconciliation_advances_watermark() {
        let (sync, api) = signed_in_bridge();
        let store = sync.store().clone();
        store.upsert_contact(&contact("5550000001", 100)).unwrap();
        store.upsert_contact(&contact("5550000002", 300)).unwrap();
        store.upsert_contact(&contact("5550000003", 200)).unwrap();

        assert_eq!(sync.run_contact_reconciliation(0).await.unwrap(), 3);
        assert_eq!(store.contact_watermark().unwrap(), 300);

        // batch_size is 2: oldest two first, then the newest
        let sizes: Vec<usize> = api
            .calls()
            .iter()
            .map(|c| match c {
                ApiCall::Add { resource: Resource::Contacts, records, .. } => records.len(),
                other => panic!("unexpected call {:?}", other),
            })
            .collect();
        assert_eq!(sizes, vec![2, 1]);

        let watermark = store.contact_watermark().unwrap();
        assert_eq!(sync.run_contact_reconciliation(watermark).await.unwrap(), 0);

        store.upsert_contact(&contact("5550000002", 400)).unwrap();
        assert_eq!(sync.run_contact_reconciliation(watermark).await.unwrap(), 1);
        assert_eq!(store.contact_watermark().unwrap(), 400);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_watermark() {
        let (sync, api) = signed_in_bridge();
        sync.store().upsert_contact(&contact("5550000001", 100)).unwrap();
        api.set_offline(true);

        let err = sync.run_contact_reconciliation(0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(sync.store().contact_watermark().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tie_across_batches_survives_failure() {
        let (sync, api) = signed_in_bridge();
        let store = sync.store().clone();
        store.upsert_contact(&contact("5550000001", 100)).unwrap();
        store.upsert_contact(&contact("5550000002", 200)).unwrap();
        store.upsert_contact(&contact("5550000003", 200)).unwrap();

        // First batch goes through, the second fails
        api.fail_after(1);
        let err = sync.run_contact_reconciliation(0).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportFailure);
        assert_eq!(store.contact_watermark().unwrap(), 199);

        api.set_offline(false);
        let watermark = store.contact_watermark().unwrap();
        assert_eq!(sync.run_contact_reconciliation(watermark).await.unwrap(), 2);
        assert_eq!(store.contact_watermark().unwrap(), 200);

        // The contact at 200 sent with the first batch goes out again with its twin
        let batches: Vec<Vec<i64>> = api
            .calls()
            .into_iter()
            .map(|c| match c {
                ApiCall::Add { records, .. } => records.iter().map(|r| r["updated_at"].as_i64().unwrap()).collect(),
                other => panic!("unexpected call {:?}", other),
            })
            .collect();
        assert_eq!(batches, vec![vec![100, 200], vec![200, 200]]);
    }

    #[test]
    fn test_retention_sweep() {
        let (sync, _api) = signed_in_bridge();
        let now = Utc::now();
        let old = (now - Duration::days(40)).timestamp_millis();
        let recent = (now - Duration::days(2)).timestamp_millis();

        let pipeline = crate::ingest::IngestionPipeline::new(sync.store().clone(), &Default::default());
        pipeline.admit(&IncomingMessage::received("5551234567", "ancient", "text/plain", old), Upload::Enabled).unwrap();
        pipeline.admit(&IncomingMessage::received("5551234567", "fresh", "text/plain", recent), Upload::Enabled).unwrap();
        pipeline.admit(&IncomingMessage::received("5559876543", "only old", "text/plain", old), Upload::Enabled).unwrap();

        assert_eq!(sync.run_retention_sweep(&RetentionConfig { days: 0 }, now).unwrap(), 0);
        assert_eq!(sync.run_retention_sweep(&RetentionConfig { days: 30 }, now).unwrap(), 2);

        assert_eq!(sync.store().message_count().unwrap(), 1);
        assert_eq!(sync.store().conversation_count().unwrap(), 1);
        let remaining = sync.store().find_conversation("5551234567").unwrap().unwrap();
        assert_eq!(remaining.snippet.as_deref(), Some("fresh"));
    }
}
