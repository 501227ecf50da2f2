//! Change notifications emitted by committed store transactions
//!
//! Two `flume` queues fan out from the store: one carries ranking touches to
//! the single ranking owner, the other carries local mutations to the sync
//! bridge. Both are fed only after a transaction commits. The bus holds a
//! receiver of each queue so consumers can subscribe late, but events
//! published while no consumer is subscribed are discarded, so a queue only
//! grows while someone is attached to drain it.

use flume::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::types::{Conversation, Record, Resource};

/// A local mutation that should be mirrored to the account backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "change", rename_all = "snake_case")]
pub enum OutboundChange {
    Add(Record),
    Update(Record),
    Remove { resource: Resource, id: i64 },
    /// Drop every draft of a conversation
    RemoveDraftsFor { conversation_id: i64 },
}

impl OutboundChange {
    pub fn resource(&self) -> Resource {
        match self {
            Self::Add(record) | Self::Update(record) => record.resource(),
            Self::Remove { resource, .. } => *resource,
            Self::RemoveDraftsFor { .. } => Resource::Drafts,
        }
    }

    /// Name stored with queued uploads
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Add(_) => "add",
            Self::Update(_) => "update",
            Self::Remove { .. } => "remove",
            Self::RemoveDraftsFor { .. } => "remove_drafts",
        }
    }

    /// Id of the affected row (the conversation for draft removal)
    pub fn entity_id(&self) -> i64 {
        match self {
            Self::Add(record) | Self::Update(record) => record.id(),
            Self::Remove { id, .. } => *id,
            Self::RemoveDraftsFor { conversation_id } => *conversation_id,
        }
    }
}

/// Input for the ranking owner
#[derive(Debug, Clone, PartialEq)]
pub enum RankingEvent {
    /// A conversation's summary changed (new message, pin, archive, read)
    Touched(Conversation),
    Removed(i64),
    /// The store was wiped or bulk-loaded; rebuild from scratch
    Reload,
}

pub(crate) struct ChangeBus {
    ranking_tx: Sender<RankingEvent>,
    ranking_rx: Receiver<RankingEvent>,
    outbound_tx: Sender<OutboundChange>,
    outbound_rx: Receiver<OutboundChange>,
}

impl ChangeBus {
    pub(crate) fn new() -> Self {
        let (ranking_tx, ranking_rx) = flume::unbounded();
        let (outbound_tx, outbound_rx) = flume::unbounded();
        Self {
            ranking_tx,
            ranking_rx,
            outbound_tx,
            outbound_rx,
        }
    }

    pub(crate) fn ranking_events(&self) -> Receiver<RankingEvent> {
        self.ranking_rx.clone()
    }

    pub(crate) fn outbound_changes(&self) -> Receiver<OutboundChange> {
        self.outbound_rx.clone()
    }

    pub(crate) fn publish_ranking(&self, events: Vec<RankingEvent>) {
        publish(&self.ranking_tx, &self.ranking_rx, events);
    }

    pub(crate) fn publish_outbound(&self, changes: Vec<OutboundChange>) {
        publish(&self.outbound_tx, &self.outbound_rx, changes);
    }
}

/// Send to subscribers, or drop everything when only the bus is listening
fn publish<T>(tx: &Sender<T>, own_rx: &Receiver<T>, items: Vec<T>) {
    if tx.receiver_count() <= 1 {
        let stale = own_rx.drain().count();
        if stale > 0 || !items.is_empty() {
            trace!(dropped = stale + items.len(), "No subscriber, discarding events");
        }
        return;
    }
    for item in items {
        // The bus keeps a receiver alive, so send only fails on teardown
        let _ = tx.send(item);
    }
}
