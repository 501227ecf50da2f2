use chrono::{DateTime, FixedOffset, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use super::{DisplayRow, RankingChange, RankingObserver, SectionType};
use crate::error::Result;
use crate::store::RecordSeq;
use crate::types::Conversation;

/// Ordered, section-bucketed view of the non-archived conversations.
///
/// `conversations` is the concatenation of every section's run and
/// `sections` holds each run's type and length, in display order, so the
/// display row of anything can be computed from at most six section counts.
/// `placement` remembers which section holds each id, which bounds the
/// search for a conversation to that one run.
///
/// Moving a conversation costs O(n) in the worst case: the deque shifts
/// whichever side of the slot is shorter. Touches land at the head of the
/// pinned or today section, near the front, so the common move shifts only
/// the few entries ahead of it.
///
/// Not synchronised; owned by a single thread.
pub struct RankingIndex {
    conversations: VecDeque<Conversation>,
    sections: Vec<(SectionType, usize)>,
    placement: HashMap<i64, SectionType>,
    offset: FixedOffset,
    observers: Vec<Box<dyn RankingObserver>>,
}

impl RankingIndex {
    pub fn new(offset: FixedOffset) -> Self {
        Self {
            conversations: VecDeque::new(),
            sections: Vec::new(),
            placement: HashMap::new(),
            offset,
            observers: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: impl RankingObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Number of ranked conversations
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn sections(&self) -> &[(SectionType, usize)] {
        &self.sections
    }

    /// Ranked conversations in display order, headers left out
    pub fn conversations(&self) -> impl Iterator<Item = &Conversation> + '_ {
        self.conversations.iter()
    }

    /// Display row count, headers included
    pub fn row_count(&self) -> usize {
        self.conversations.len() + self.sections.len()
    }

    pub fn display_rows(&self) -> Vec<DisplayRow> {
        let mut rows = Vec::with_capacity(self.row_count());
        let mut next = 0;
        for &(section, count) in &self.sections {
            rows.push(DisplayRow::Header(section));
            rows.extend(
                self.conversations
                    .range(next..next + count)
                    .map(|c| DisplayRow::Item(c.id)),
            );
            next += count;
        }
        rows
    }

    pub fn section_of(&self, id: i64) -> Option<SectionType> {
        self.placement.get(&id).copied()
    }

    /// Display row of a conversation
    pub fn position_of(&self, id: i64) -> Option<usize> {
        let section = self.section_of(id)?;
        let k = self.section_index(section)?;
        let offset = self.locate_in_section(k, id)?;
        Some(self.display_start(k) + 1 + offset)
    }

    /// The conversation shown at a display row, `None` for headers
    pub fn conversation_at(&self, row: usize) -> Option<&Conversation> {
        let mut header = 0;
        let mut first_item = 0;
        for &(_, count) in &self.sections {
            if row == header {
                return None;
            }
            if row <= header + count {
                return self.conversations.get(first_item + row - header - 1);
            }
            header += count + 1;
            first_item += count;
        }
        None
    }

    /// Re-rank one conversation after its summary changed.
    ///
    /// Its target section is re-evaluated from `pinned` and `timestamp`.
    /// Returns the applied changes, which are also sent to observers.
    pub fn on_conversation_touched(&mut self, conv: &Conversation, now: DateTime<Utc>) -> Vec<RankingChange> {
        if conv.archive {
            return self.on_conversation_removed(conv.id);
        }

        let target = SectionType::classify(conv, now, self.offset);
        let mut changes = Vec::with_capacity(2);

        if let Some(current) = self.section_of(conv.id) {
            if let Some(k) = self.section_index(current) {
                if let Some(offset) = self.locate_in_section(k, conv.id) {
                    let start = self.conversation_start(k);
                    if current == target && self.insertion_offset(k, conv, Some(offset)) == offset {
                        self.conversations[start + offset] = conv.clone();
                        changes.push(RankingChange::Changed {
                            position: self.display_start(k) + 1 + offset,
                        });
                        self.notify(&changes);
                        return changes;
                    }
                    changes.push(self.remove_at(k, offset));
                }
            }
        }

        changes.push(self.insert(target, conv));
        self.notify(&changes);
        changes
    }

    /// Drop a conversation (deleted or archived). Unknown ids are ignored.
    pub fn on_conversation_removed(&mut self, id: i64) -> Vec<RankingChange> {
        let removed = self
            .section_of(id)
            .and_then(|section| self.section_index(section))
            .and_then(|k| self.locate_in_section(k, id).map(|offset| (k, offset)));

        let changes = match removed {
            Some((k, offset)) => vec![self.remove_at(k, offset)],
            None => Vec::new(),
        };
        self.notify(&changes);
        changes
    }

    /// Replace the whole list from a store sequence
    pub fn rebuild(&mut self, seq: &RecordSeq<'_, Conversation>, now: DateTime<Utc>) -> Result<Vec<RankingChange>> {
        let conversations = seq.iter().collect::<Result<Vec<_>>>()?;
        Ok(self.rebuild_from(conversations, now))
    }

    pub fn rebuild_from(
        &mut self,
        conversations: impl IntoIterator<Item = Conversation>,
        now: DateTime<Utc>,
    ) -> Vec<RankingChange> {
        let mut buckets: Vec<Vec<Conversation>> = vec![Vec::new(); SectionType::ALL.len()];
        for conv in conversations.into_iter().filter(|c| !c.archive) {
            let section = SectionType::classify(&conv, now, self.offset);
            buckets[section as usize].push(conv);
        }

        self.conversations.clear();
        self.sections.clear();
        self.placement.clear();

        for (section, mut bucket) in SectionType::ALL.into_iter().zip(buckets) {
            if bucket.is_empty() {
                continue;
            }
            bucket.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            for conv in &bucket {
                self.placement.insert(conv.id, section);
            }
            self.sections.push((section, bucket.len()));
            self.conversations.extend(bucket);
        }

        debug!(
            conversations = self.conversations.len(),
            sections = self.sections.len(),
            "Rebuilt ranking"
        );
        let changes = vec![RankingChange::Reset];
        self.notify(&changes);
        changes
    }

    /// Forget everything and tell observers to reload
    pub fn reset(&mut self) -> Vec<RankingChange> {
        self.conversations.clear();
        self.sections.clear();
        self.placement.clear();
        let changes = vec![RankingChange::Reset];
        self.notify(&changes);
        changes
    }

    fn notify(&mut self, changes: &[RankingChange]) {
        for change in changes {
            for observer in &mut self.observers {
                observer.on_change(change);
            }
        }
    }

    fn section_index(&self, section: SectionType) -> Option<usize> {
        self.sections.iter().position(|&(s, _)| s == section)
    }

    /// Index into `conversations` of section `k`'s first item
    fn conversation_start(&self, k: usize) -> usize {
        self.sections[..k].iter().map(|&(_, count)| count).sum()
    }

    /// Display row of section `k`'s header
    fn display_start(&self, k: usize) -> usize {
        self.conversation_start(k) + k
    }

    fn locate_in_section(&self, k: usize, id: i64) -> Option<usize> {
        let start = self.conversation_start(k);
        let count = self.sections[k].1;
        self.conversations
            .range(start..start + count)
            .position(|c| c.id == id)
    }

    /// Where `conv` belongs inside section `k`: before the first entry that
    /// is not newer. `skip` is the conversation's own offset when it is
    /// already in the section. Touches normally carry the newest timestamp,
    /// so this stops at the head.
    fn insertion_offset(&self, k: usize, conv: &Conversation, skip: Option<usize>) -> usize {
        let start = self.conversation_start(k);
        let count = self.sections[k].1;
        let mut slot = 0;
        for (i, other) in self.conversations.range(start..start + count).enumerate() {
            if Some(i) == skip {
                continue;
            }
            if other.timestamp <= conv.timestamp {
                break;
            }
            slot += 1;
        }
        slot
    }

    fn remove_at(&mut self, k: usize, offset: usize) -> RankingChange {
        let start = self.conversation_start(k);
        let header = self.display_start(k);
        if let Some(removed) = self.conversations.remove(start + offset) {
            self.placement.remove(&removed.id);
        }

        self.sections[k].1 -= 1;
        if self.sections[k].1 == 0 {
            self.sections.remove(k);
            RankingChange::Removed { start: header, count: 2 }
        } else {
            RankingChange::Removed { start: header + 1 + offset, count: 1 }
        }
    }

    fn insert(&mut self, section: SectionType, conv: &Conversation) -> RankingChange {
        self.placement.insert(conv.id, section);

        if let Some(k) = self.section_index(section) {
            let offset = self.insertion_offset(k, conv, None);
            let start = self.conversation_start(k);
            self.conversations.insert(start + offset, conv.clone());
            self.sections[k].1 += 1;
            return RankingChange::Inserted {
                start: self.display_start(k) + 1 + offset,
                count: 1,
            };
        }

        // New section goes before the first section that ranks after it
        let k = self
            .sections
            .iter()
            .position(|&(s, _)| s > section)
            .unwrap_or(self.sections.len());
        let start = self.conversation_start(k);
        self.conversations.insert(start, conv.clone());
        self.sections.insert(k, (section, 1));
        RankingChange::Inserted {
            start: self.display_start(k),
            count: 2,
        }
    }
}
