use rusqlite::types::Value;
use rusqlite::Row;
use std::collections::VecDeque;

use super::EncryptedStore;
use crate::error::Result;

const DEFAULT_PAGE_SIZE: usize = 256;

/// A lazy, finite, restartable sequence of decoded records.
///
/// Nothing is read until the sequence is iterated. Each call to [`iter`]
/// re-runs the query from the start and pulls rows a page at a time, so a
/// long mailbox never has to be materialised at once.
///
/// [`iter`]: RecordSeq::iter
pub struct RecordSeq<'s, T> {
    store: &'s EncryptedStore,
    sql: String,
    params: Vec<Value>,
    map: fn(&Row) -> rusqlite::Result<T>,
    page_size: usize,
}

impl<'s, T> RecordSeq<'s, T> {
    /// `sql` must be ordered and must not carry its own LIMIT/OFFSET.
    pub(crate) fn new(
        store: &'s EncryptedStore,
        sql: String,
        params: Vec<Value>,
        map: fn(&Row) -> rusqlite::Result<T>,
    ) -> Self {
        Self {
            store,
            sql,
            params,
            map,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn iter(&self) -> RecordIter<'_, 's, T> {
        RecordIter {
            seq: self,
            offset: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Drain the whole sequence, stopping at the first error
    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.iter().collect()
    }

    fn fetch_page(&self, offset: usize) -> Result<Vec<T>> {
        self.store.read(|conn| {
            let sql = format!("{} LIMIT ? OFFSET ?", self.sql);
            let mut values = self.params.clone();
            values.push(Value::Integer(self.page_size as i64));
            values.push(Value::Integer(offset as i64));

            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(values.iter()), self.map)?;
            Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
        })
    }
}

pub struct RecordIter<'a, 's, T> {
    seq: &'a RecordSeq<'s, T>,
    offset: usize,
    buffer: VecDeque<T>,
    exhausted: bool,
}

impl<T> Iterator for RecordIter<'_, '_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.seq.fetch_page(self.offset) {
                Ok(page) => {
                    self.exhausted = page.len() < self.seq.page_size;
                    self.offset += page.len();
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl<'a, 's, T> IntoIterator for &'a RecordSeq<'s, T> {
    type Item = Result<T>;
    type IntoIter = RecordIter<'a, 's, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
