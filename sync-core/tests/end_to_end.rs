//! Whole-mailbox scenarios: ingest, ranking, upload and push handling
//! working against one store.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use sync_core::encryption::AccountEncryption;
use sync_core::ranking::DisplayRow;
use sync_core::store::Encryptable;
use sync_core::types::{BlacklistEntry, Resource};
use sync_core::{
    AccountApi, AccountSession, Admission, CoreConfig, IncomingMessage, Mailbox, PushOutcome,
    Result, SectionType, SyncSuppression, Upload,
};

#[derive(Default)]
struct FakeBackend {
    uploads: Mutex<Vec<(String, Resource, usize)>>,
}

impl FakeBackend {
    fn uploads(&self) -> Vec<(String, Resource, usize)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountApi for FakeBackend {
    async fn add(&self, resource: Resource, _account_id: &str, _device_id: &str, records: Vec<Value>) -> Result<()> {
        self.uploads.lock().unwrap().push(("add".into(), resource, records.len()));
        Ok(())
    }

    async fn update(&self, resource: Resource, _account_id: &str, _device_id: &str, _id: i64, _record: Value) -> Result<()> {
        self.uploads.lock().unwrap().push(("update".into(), resource, 1));
        Ok(())
    }

    async fn remove(&self, resource: Resource, _account_id: &str, _device_id: &str, _id: i64) -> Result<()> {
        self.uploads.lock().unwrap().push(("remove".into(), resource, 1));
        Ok(())
    }

    async fn remove_drafts_for(&self, _account_id: &str, _device_id: &str, _conversation_id: i64) -> Result<()> {
        self.uploads.lock().unwrap().push(("remove_for_conversation".into(), Resource::Drafts, 1));
        Ok(())
    }

    async fn list(&self, _resource: Resource, _account_id: &str, _limit: usize, _offset: usize) -> Result<Vec<Value>> {
        Ok(Vec::new())
    }
}

fn key() -> AccountEncryption {
    AccountEncryption::from_key([42u8; 32])
}

fn mailbox() -> (Mailbox, Arc<FakeBackend>) {
    let backend = Arc::new(FakeBackend::default());
    let mut config = CoreConfig::default();
    config.ranking.utc_offset_minutes = Some(0);
    let mailbox = Mailbox::in_memory(config, backend.clone()).unwrap();
    mailbox
        .sync()
        .sign_in(AccountSession::new("acct-main", "phone", key()))
        .unwrap();
    (mailbox, backend)
}

#[tokio::test]
async fn ingest_rank_and_upload() {
    let (mailbox, backend) = mailbox();
    let mut ranking = mailbox.take_ranking_worker().unwrap();
    ranking.rebuild().unwrap();

    let now = Utc::now().timestamp_millis();
    let pipeline = mailbox.pipeline();
    let first = pipeline
        .admit(&IncomingMessage::received("+1 (555) 123-4567", "hello", "text/plain", now - 1_000), Upload::Enabled)
        .unwrap();
    let Admission::Inserted { conversation, created_conversation, .. } = first else {
        panic!("expected an insert, got {:?}", first);
    };
    assert!(created_conversation);
    pipeline
        .admit(&IncomingMessage::outgoing("5559876543", "on my way", "text/plain", now), Upload::Enabled)
        .unwrap();

    // Same body again inside the dedup window
    let again = pipeline
        .admit(&IncomingMessage::received("5551234567", "hello", "text/plain", now + 60_000), Upload::Enabled)
        .unwrap();
    assert!(matches!(again, Admission::Duplicate { .. }));

    assert_eq!(ranking.drain().unwrap(), 2);
    let index = ranking.index();
    assert_eq!(index.sections(), &[(SectionType::Today, 2)]);
    assert_eq!(index.display_rows()[0], DisplayRow::Header(SectionType::Today));
    assert_eq!(index.position_of(conversation.id), Some(2));

    assert_eq!(mailbox.sync().pump_outbound().unwrap(), 4);
    let report = mailbox.sync().flush().await.unwrap();
    assert_eq!(report.sent, 4);
    assert!(backend.uploads().iter().all(|(op, _, _)| op == "add"));
}

#[tokio::test]
async fn push_application_is_never_echoed() {
    let (mailbox, backend) = mailbox();
    let store = mailbox.store();

    let mut entry = BlacklistEntry { id: 12, phone_number: Some("5550001111".into()), phrase: None };
    entry.encrypt(&key()).unwrap();
    let outcome = mailbox
        .sync()
        .apply_push("add-blacklist", &serde_json::to_string(&entry).unwrap())
        .unwrap();
    assert_eq!(outcome, PushOutcome::Applied);
    assert_eq!(store.blacklist().unwrap()[0].phone_number.as_deref(), Some("5550001111"));

    // Suppression is scoped: the write after the block uploads again
    SyncSuppression::scope(|s| {
        store.delete_blacklist(12, Upload::Suppressed(s)).unwrap();
    });
    store
        .insert_blacklist(&BlacklistEntry { id: 0, phone_number: None, phrase: Some("prize".into()) }, Upload::Enabled)
        .unwrap();

    assert_eq!(mailbox.sync().pump_outbound().unwrap(), 1);
    mailbox.sync().flush().await.unwrap();
    assert_eq!(backend.uploads(), vec![("add".to_string(), Resource::Blacklists, 1)]);
    assert_eq!(store.outbound_suppressed_count(), 1);
}

#[tokio::test]
async fn blocked_sender_is_not_admitted() {
    let (mailbox, _backend) = mailbox();
    mailbox
        .store()
        .insert_blacklist(&BlacklistEntry { id: 0, phone_number: Some("555-000-1111".into()), phrase: None }, Upload::Enabled)
        .unwrap();

    let outcome = mailbox
        .pipeline()
        .admit(&IncomingMessage::received("+1 555 000 1111", "buy now", "text/plain", 1), Upload::Enabled)
        .unwrap();
    assert!(matches!(outcome, Admission::Blocked { .. }));
    assert_eq!(mailbox.store().message_count().unwrap(), 0);
}

#[tokio::test]
async fn removed_account_wipes_only_matching_account() {
    let (mailbox, _backend) = mailbox();
    let mut ranking = mailbox.take_ranking_worker().unwrap();
    mailbox
        .pipeline()
        .admit(&IncomingMessage::received("5551234567", "hi", "text/plain", 1_000), Upload::Enabled)
        .unwrap();
    ranking.drain().unwrap();
    assert_eq!(ranking.index().len(), 1);

    let stale = json!({ "account_id": "acct-old" }).to_string();
    assert!(matches!(
        mailbox.sync().apply_push("removed_account", &stale).unwrap(),
        PushOutcome::Ignored(_)
    ));
    assert_eq!(mailbox.store().conversation_count().unwrap(), 1);

    let current = json!({ "account_id": "acct-main" }).to_string();
    assert_eq!(
        mailbox.sync().apply_push("removed_account", &current).unwrap(),
        PushOutcome::Applied
    );
    assert_eq!(mailbox.store().conversation_count().unwrap(), 0);
    assert_eq!(mailbox.store().message_count().unwrap(), 0);
    assert_eq!(mailbox.store().account_id().unwrap(), None);
    assert!(mailbox.sync().session().is_none());

    // The wipe reloads the ranking from the now empty store
    ranking.drain().unwrap();
    assert!(ranking.index().is_empty());
}

#[tokio::test]
async fn retention_sweep_through_the_mailbox() {
    let (mailbox, _backend) = mailbox();
    let now = Utc::now();
    let old = (now - Duration::days(90)).timestamp_millis();
    mailbox
        .pipeline()
        .admit(&IncomingMessage::received("5551234567", "old news", "text/plain", old), Upload::Enabled)
        .unwrap();

    let mut retention = mailbox.config().retention.clone();
    retention.days = 30;
    assert_eq!(mailbox.sync().run_retention_sweep(&retention, now).unwrap(), 1);
    assert_eq!(mailbox.store().conversation_count().unwrap(), 0);
}
