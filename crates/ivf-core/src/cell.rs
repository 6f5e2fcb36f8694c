//! Partition store (component C): a UUID-keyed bucket of records with a
//! representative used as its centroid proxy during cell-ranking.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::Result;
use crate::metric::MetricRegistry;
use crate::record::{Record, ScoredRecord};
use crate::topk::TopK;

struct CellState {
    refs: HashMap<String, Record>,
    /// UUID of the record standing in as this cell's centroid proxy.
    /// `None` iff `refs` is empty. Non-owning: always resolved through `refs`.
    representative: Option<String>,
}

/// A single IVF partition. Safe for concurrent readers and writers: `fetch`
/// and `local_query` take the read lock, `insert` and `delete` take the
/// write lock.
pub struct Cell {
    id: String,
    state: RwLock<CellState>,
}

impl Cell {
    /// A fresh, empty cell identified by `id`.
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: RwLock::new(CellState {
                refs: HashMap::new(),
                representative: None,
            }),
        }
    }

    /// A cell seeded with a single record that becomes both its sole member
    /// and its representative, as produced by reindex's centroid selection.
    pub fn seeded(id: impl Into<String>, seed: Record) -> Self {
        let uuid = seed.uuid.clone();
        let mut refs = HashMap::with_capacity(1);
        refs.insert(uuid.clone(), seed);
        Self {
            id: id.into(),
            state: RwLock::new(CellState {
                refs,
                representative: Some(uuid),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.state.read().refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or, if the UUID already exists in this cell, overwrite in place.
    /// Returns `true` if this was a new record.
    pub fn insert(&self, record: Record) -> bool {
        let mut state = self.state.write();
        if let Some(existing) = state.refs.get_mut(&record.uuid) {
            existing.data = record.data;
            existing.meta = record.meta;
            return false;
        }
        let is_first = state.refs.is_empty();
        let uuid = record.uuid.clone();
        state.refs.insert(uuid.clone(), record);
        if is_first {
            state.representative = Some(uuid);
        }
        true
    }

    pub fn fetch(&self, uuid: &str) -> Option<Record> {
        self.state.read().refs.get(uuid).cloned()
    }

    /// Remove `uuid`. If it was the representative, promote any remaining
    /// member; if none remain the cell becomes representative-less.
    pub fn delete(&self, uuid: &str) -> bool {
        let mut state = self.state.write();
        if state.refs.remove(uuid).is_none() {
            return false;
        }
        if state.representative.as_deref() == Some(uuid) {
            state.representative = state.refs.keys().next().cloned();
        }
        true
    }

    /// The representative's UUID and vector, for cell-ranking. `None` for an
    /// empty cell, which callers must skip during ranking.
    pub fn representative(&self) -> Option<(String, Vec<f64>)> {
        let state = self.state.read();
        let uuid = state.representative.as_ref()?;
        state.refs.get(uuid).map(|r| (uuid.clone(), r.data.clone()))
    }

    /// Scan every member under `metric`, returning the `limit` closest to
    /// `probe` in ascending score order (capped at this cell's size).
    pub fn local_query(
        &self,
        registry: &MetricRegistry,
        metric: &str,
        probe: &[f64],
        limit: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let kernel = registry.resolve(metric)?;
        let state = self.state.read();
        let capacity = limit.min(state.refs.len());
        let mut topk = TopK::new(capacity);
        for record in state.refs.values() {
            let score = kernel(&record.data, probe);
            topk.offer(score, record.clone());
        }
        Ok(topk
            .drain_present()
            .into_iter()
            .map(|(score, record)| ScoredRecord { record, score })
            .collect())
    }

    /// All members, for use by reindex when rebuilding the partitioning.
    pub fn snapshot(&self) -> Vec<Record> {
        self.state.read().refs.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn rec(uuid: &str, data: Vec<f64>) -> Record {
        Record::new(uuid, data, Map::new())
    }

    #[test]
    fn first_insert_becomes_representative() {
        let cell = Cell::empty("c1");
        cell.insert(rec("a", vec![1.0, 2.0]));
        assert_eq!(cell.representative().unwrap().0, "a");
        cell.insert(rec("b", vec![3.0, 4.0]));
        assert_eq!(cell.representative().unwrap().0, "a");
    }

    #[test]
    fn insert_existing_uuid_updates_in_place() {
        let cell = Cell::empty("c1");
        cell.insert(rec("a", vec![1.0, 2.0]));
        let is_new = cell.insert(rec("a", vec![9.0, 9.0]));
        assert!(!is_new);
        assert_eq!(cell.len(), 1);
        assert_eq!(cell.fetch("a").unwrap().data, vec![9.0, 9.0]);
    }

    #[test]
    fn deleting_representative_promotes_survivor() {
        let cell = Cell::empty("c1");
        cell.insert(rec("a", vec![0.0]));
        cell.insert(rec("b", vec![1.0]));
        assert_eq!(cell.representative().unwrap().0, "a");
        cell.delete("a");
        assert_eq!(cell.representative().unwrap().0, "b");
    }

    #[test]
    fn deleting_last_member_clears_representative() {
        let cell = Cell::empty("c1");
        cell.insert(rec("a", vec![0.0]));
        cell.delete("a");
        assert!(cell.representative().is_none());
        assert!(cell.is_empty());
    }

    #[test]
    fn local_query_caps_at_cell_size() {
        let cell = Cell::empty("c1");
        cell.insert(rec("a", vec![0.0]));
        cell.insert(rec("b", vec![1.0]));
        let registry = MetricRegistry::with_defaults();
        let hits = cell.local_query(&registry, "l2", &[0.0], 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].record.uuid, "a");
        assert_eq!(hits[1].record.uuid, "b");
    }

    #[test]
    fn local_query_rejects_unknown_metric() {
        let cell = Cell::empty("c1");
        cell.insert(rec("a", vec![0.0]));
        let registry = MetricRegistry::with_defaults();
        assert!(cell.local_query(&registry, "cosine", &[0.0], 1).is_err());
    }
}
