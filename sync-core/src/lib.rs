//! Local-first SMS/MMS mailbox core
//!
//! Stores conversations and messages on the device, admits incoming
//! messages exactly once, keeps a sectioned ranking of conversations for
//! display, and mirrors changes to the other devices on the account.
//!
//! ## Module Organization
//!
//! - `store/`: SQLite persistence, transactions, change notifications
//! - `ingest/`: message admission and participant fingerprints
//! - `ranking/`: sectioned conversation list and its owner thread
//! - `sync/`: account backend client, push handling, reconciliation
//! - `config/`: TOML configuration
//! - `encryption`: account key derivation and field encryption

pub mod config;
pub mod encryption;
pub mod error;
pub mod events;
pub mod ingest;
pub mod logging;
pub mod mailbox;
pub mod ranking;
pub mod store;
pub mod sync;
pub mod types;

pub use config::CoreConfig;
pub use error::{ErrorKind, Result, SyncError};
pub use events::{OutboundChange, RankingEvent};
pub use ingest::{Admission, IncomingMessage, IngestionPipeline};
pub use mailbox::Mailbox;
pub use ranking::{RankingIndex, RankingWorker, SectionType};
pub use store::{EncryptedStore, StoreTransaction, SyncSuppression, Upload};
pub use sync::{AccountApi, AccountSession, HttpAccountApi, PushOutcome, SyncBridge};
