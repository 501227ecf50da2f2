//! Account backend interface
//!
//! Every resource collection supports the same four calls under
//! `{base}/api/v1/{resource}`:
//! - `POST .../add` with a batch of records
//! - `POST .../update/{id}?account_id=` with one record
//! - `POST .../remove/{id}?account_id=`
//! - `GET  ...?account_id=&limit=&offset=`
//!
//! Drafts also take `POST drafts/remove_for_conversation/{id}?account_id=`,
//! which drops every draft of one conversation.
//!
//! Sensitive record fields are already ciphertext when they reach this
//! layer.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::types::Resource;

#[async_trait]
pub trait AccountApi: Send + Sync {
    /// Add one or more records. A single record is a batch of one.
    async fn add(&self, resource: Resource, account_id: &str, device_id: &str, records: Vec<Value>) -> Result<()>;

    async fn update(&self, resource: Resource, account_id: &str, device_id: &str, id: i64, record: Value) -> Result<()>;

    async fn remove(&self, resource: Resource, account_id: &str, device_id: &str, id: i64) -> Result<()>;

    /// Remove every draft of a conversation
    async fn remove_drafts_for(&self, account_id: &str, device_id: &str, conversation_id: i64) -> Result<()>;

    async fn list(&self, resource: Resource, account_id: &str, limit: usize, offset: usize) -> Result<Vec<Value>>;
}

#[derive(Serialize)]
struct AddRequest<'a> {
    account_id: &'a str,
    device_id: &'a str,
    records: Vec<Value>,
}

#[derive(Serialize)]
struct UpdateRequest<'a> {
    account_id: &'a str,
    device_id: &'a str,
    record: Value,
}

#[derive(Serialize)]
struct RemoveRequest<'a> {
    account_id: &'a str,
    device_id: &'a str,
}

/// [`AccountApi`] over HTTPS/JSON
pub struct HttpAccountApi {
    client: Client,
    base: Url,
}

impl HttpAccountApi {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let mut base = Url::parse(config.api_url.trim())?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, base })
    }

    fn endpoint(&self, resource: Resource, action: Option<&str>, id: Option<i64>) -> Result<Url> {
        let mut path = format!("api/v1/{}", resource.path());
        if let Some(action) = action {
            path.push('/');
            path.push_str(action);
        }
        if let Some(id) = id {
            path.push_str(&format!("/{}", id));
        }
        Ok(self.base.join(&path)?)
    }

    async fn post(&self, url: Url, body: &impl Serialize) -> Result<()> {
        debug!("POST {}", url);
        self.client
            .post(url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl AccountApi for HttpAccountApi {
    async fn add(&self, resource: Resource, account_id: &str, device_id: &str, records: Vec<Value>) -> Result<()> {
        let url = self.endpoint(resource, Some("add"), None)?;
        self.post(url, &AddRequest { account_id, device_id, records }).await
    }

    async fn update(&self, resource: Resource, account_id: &str, device_id: &str, id: i64, record: Value) -> Result<()> {
        let mut url = self.endpoint(resource, Some("update"), Some(id))?;
        url.query_pairs_mut().append_pair("account_id", account_id);
        self.post(url, &UpdateRequest { account_id, device_id, record }).await
    }

    async fn remove(&self, resource: Resource, account_id: &str, device_id: &str, id: i64) -> Result<()> {
        let mut url = self.endpoint(resource, Some("remove"), Some(id))?;
        url.query_pairs_mut().append_pair("account_id", account_id);
        self.post(url, &RemoveRequest { account_id, device_id }).await
    }

    async fn remove_drafts_for(&self, account_id: &str, device_id: &str, conversation_id: i64) -> Result<()> {
        let mut url = self.endpoint(Resource::Drafts, Some("remove_for_conversation"), Some(conversation_id))?;
        url.query_pairs_mut().append_pair("account_id", account_id);
        self.post(url, &RemoveRequest { account_id, device_id }).await
    }

    async fn list(&self, resource: Resource, account_id: &str, limit: usize, offset: usize) -> Result<Vec<Value>> {
        let mut url = self.endpoint(resource, None, None)?;
        url.query_pairs_mut()
            .append_pair("account_id", account_id)
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());

        debug!("GET {}", url);
        let records = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Value>>()
            .await?;
        Ok(records)
    }
}
