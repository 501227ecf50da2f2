use chrono::Utc;
use flume::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{RankingChange, RankingIndex};
use crate::config::RankingConfig;
use crate::error::Result;
use crate::events::RankingEvent;
use crate::store::EncryptedStore;

const IDLE_POLL: Duration = Duration::from_millis(250);

/// Single owner of a [`RankingIndex`], fed by the store's ranking queue.
///
/// Events arrive in commit order, so applying them one at a time keeps the
/// index consistent without any locking inside it.
pub struct RankingWorker {
    store: Arc<EncryptedStore>,
    events: Receiver<RankingEvent>,
    index: RankingIndex,
}

impl RankingWorker {
    pub fn new(store: Arc<EncryptedStore>, config: &RankingConfig) -> Self {
        let events = store.ranking_events();
        Self {
            store,
            events,
            index: RankingIndex::new(config.offset()),
        }
    }

    pub fn index(&self) -> &RankingIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut RankingIndex {
        &mut self.index
    }

    /// Load the full list from the store, discarding queued touches that
    /// the fresh read already reflects.
    pub fn rebuild(&mut self) -> Result<Vec<RankingChange>> {
        let stale = self.events.drain().count();
        let seq = self.store.conversations();
        let changes = self.index.rebuild(&seq, Utc::now())?;
        info!(
            conversations = self.index.len(),
            skipped_events = stale,
            "Ranking rebuilt from store"
        );
        Ok(changes)
    }

    pub fn apply(&mut self, event: RankingEvent) -> Result<Vec<RankingChange>> {
        match event {
            RankingEvent::Touched(conv) => Ok(self.index.on_conversation_touched(&conv, Utc::now())),
            RankingEvent::Removed(id) => Ok(self.index.on_conversation_removed(id)),
            RankingEvent::Reload => self.rebuild(),
        }
    }

    /// Apply one queued event. Returns false when the queue was empty.
    pub fn tick(&mut self) -> Result<bool> {
        match self.events.try_recv() {
            Ok(event) => {
                self.apply(event)?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Apply everything queued so far, returning how many events ran
    pub fn drain(&mut self) -> Result<usize> {
        let mut applied = 0;
        while self.tick()? {
            applied += 1;
        }
        if applied > 0 {
            debug!(applied, "Drained ranking events");
        }
        Ok(applied)
    }

    /// Block on the queue until `stop` is raised
    pub fn run(&mut self, stop: &AtomicBool) -> Result<()> {
        while !stop.load(Ordering::Relaxed) {
            match self.events.recv_timeout(IDLE_POLL) {
                Ok(event) => {
                    self.apply(event)?;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Ok(())
    }
}
