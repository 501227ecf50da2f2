//! Section-bucketed conversation ordering
//!
//! The display list is a run of sections (`Pinned`, `Today`, ... `Older`),
//! each shown as a header row followed by its conversations, most recent
//! first. [`RankingIndex`] keeps that list current one touch at a time and
//! reports minimal row diffs; [`RankingWorker`] feeds it from the store's
//! ranking queue on a single owner thread.

mod index;
mod worker;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Conversation;

pub use index::RankingIndex;
pub use worker::RankingWorker;

/// Display sections, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SectionType {
    Pinned,
    Today,
    Yesterday,
    LastWeek,
    LastMonth,
    Older,
}

impl SectionType {
    pub const ALL: [SectionType; 6] = [
        SectionType::Pinned,
        SectionType::Today,
        SectionType::Yesterday,
        SectionType::LastWeek,
        SectionType::LastMonth,
        SectionType::Older,
    ];

    pub fn title(self) -> &'static str {
        match self {
            Self::Pinned => "Pinned",
            Self::Today => "Today",
            Self::Yesterday => "Yesterday",
            Self::LastWeek => "Last week",
            Self::LastMonth => "Last month",
            Self::Older => "Older",
        }
    }

    /// Bucket for a conversation: pinned wins, otherwise the calendar-day
    /// distance between its last activity and `now` in `offset`.
    pub fn classify(conv: &Conversation, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        if conv.pinned {
            Self::Pinned
        } else {
            Self::for_timestamp(conv.timestamp, now, offset)
        }
    }

    pub fn for_timestamp(timestamp_ms: i64, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let Some(then) = Utc.timestamp_millis_opt(timestamp_ms).single() else {
            return Self::Older;
        };
        let today = now.with_timezone(&offset).date_naive();
        let day = then.with_timezone(&offset).date_naive();

        match (today - day).num_days() {
            d if d <= 0 => Self::Today,
            1 => Self::Yesterday,
            2..=7 => Self::LastWeek,
            8..=30 => Self::LastMonth,
            _ => Self::Older,
        }
    }
}

/// One row of the rendered list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayRow {
    Header(SectionType),
    /// A conversation, by id
    Item(i64),
}

/// A row-level change to the display list, positions in display rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankingChange {
    Inserted { start: usize, count: usize },
    Removed { start: usize, count: usize },
    /// Summary fields of the row changed, no reordering
    Changed { position: usize },
    /// The whole list was rebuilt
    Reset,
}

/// Receives every change the index applies, in order
pub trait RankingObserver: Send {
    fn on_change(&mut self, change: &RankingChange);
}

impl<F> RankingObserver for F
where
    F: FnMut(&RankingChange) + Send,
{
    fn on_change(&mut self, change: &RankingChange) {
        self(change)
    }
}
