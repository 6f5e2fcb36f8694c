//! The partitioned index (component D): owns the cell set, routes inserts,
//! fans out queries across cells in parallel, and rebuilds the partitioning
//! on reindex via k-means++ seeding.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use metrics::{counter, gauge, histogram};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cell::Cell;
use crate::error::{Error, Result};
use crate::metric::{l2, MetricRegistry};
use crate::record::{Record, ScoredRecord};
use crate::topk::TopK;

/// Bounded retries for a single k-means++ weighted draw landing on a record
/// already chosen as a centroid.
const REINDEX_MAX_RETRIES: usize = 64;

/// Owns `N` cells and the routing/reindex logic over them. Cheap to share:
/// clone the handle, not the index — callers hold an `Arc<Index>`.
pub struct Index {
    dim: usize,
    num_cells: usize,
    registry: MetricRegistry,
    cells: RwLock<Arc<Vec<Arc<Cell>>>>,
    /// Set after the first successful reindex; gates random vs.
    /// nearest-representative insert routing.
    reindexed: AtomicBool,
}

impl Index {
    pub fn new(dim: usize, num_cells: usize, registry: MetricRegistry) -> Result<Self> {
        if dim == 0 {
            return Err(Error::invalid_argument("dimension must be >= 1"));
        }
        if num_cells == 0 {
            return Err(Error::invalid_argument("cell count must be >= 1"));
        }
        let cells = (0..num_cells)
            .map(|_| Arc::new(Cell::empty(Uuid::new_v4().to_string())))
            .collect();
        gauge!("ivf_cell_count", num_cells as f64);
        gauge!("ivf_record_count", 0.0);
        Ok(Self {
            dim,
            num_cells,
            registry,
            cells: RwLock::new(Arc::new(cells)),
            reindexed: AtomicBool::new(false),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    pub fn record_count(&self) -> usize {
        self.snapshot().iter().map(|cell| cell.len()).sum()
    }

    fn snapshot(&self) -> Arc<Vec<Arc<Cell>>> {
        self.cells.read().clone()
    }

    fn check_cancelled(cancel: Option<&CancellationToken>) -> Result<()> {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Insert or update a record. Before the first reindex there are no
    /// meaningful centroids, so routing is uniformly random; afterward,
    /// records route to the cell whose representative is nearest under L2.
    pub fn insert(&self, record: Record) -> Result<bool> {
        if record.data.len() != self.dim {
            return Err(Error::invalid_argument(format!(
                "record has dimension {}, index expects {}",
                record.data.len(),
                self.dim
            )));
        }
        let cells = self.snapshot();
        let target = if self.reindexed.load(Ordering::Acquire) {
            nearest_cell(&cells, &record.data).unwrap_or(0)
        } else {
            rand::thread_rng().gen_range(0..cells.len())
        };
        tracing::debug!(cell = %cells[target].id(), uuid = %record.uuid, "insert routed to cell");
        let is_new = cells[target].insert(record);
        counter!("ivf_insert_total", 1);
        gauge!("ivf_record_count", cells.iter().map(|c| c.len()).sum::<usize>() as f64);
        Ok(is_new)
    }

    pub fn fetch(&self, uuid: &str) -> Result<Record> {
        let cells = self.snapshot();
        cells
            .iter()
            .find_map(|cell| cell.fetch(uuid))
            .ok_or_else(|| Error::not_found(uuid.to_string()))
    }

    /// Returns whether a record was actually removed; an unknown UUID is not
    /// an error.
    pub fn delete(&self, uuid: &str) -> bool {
        let cells = self.snapshot();
        let removed = cells.iter().any(|cell| cell.delete(uuid));
        if removed {
            counter!("ivf_delete_total", 1);
            gauge!("ivf_record_count", cells.iter().map(|c| c.len()).sum::<usize>() as f64);
        }
        removed
    }

    /// Rank cells nearest-first by representative distance under L2
    /// (independent of `metric`, which only governs the per-cell scan),
    /// scan the closest `probes` in parallel, and merge into one ascending
    /// top-K of length `limit`.
    pub fn query(
        &self,
        probe: &[f64],
        limit: usize,
        probes: usize,
        metric: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Option<ScoredRecord>>> {
        if probe.len() != self.dim {
            return Err(Error::invalid_argument(format!(
                "probe has dimension {}, index expects {}",
                probe.len(),
                self.dim
            )));
        }
        if limit == 0 {
            return Err(Error::invalid_argument("limit must be >= 1"));
        }
        // Fail fast on an unknown metric tag rather than let every cell scan
        // fail silently behind it.
        self.registry.resolve(metric)?;

        let cells = self.snapshot();
        let probes = match probes {
            0 => 1,
            p if p > cells.len() => cells.len(),
            p => p,
        };

        Self::check_cancelled(cancel)?;

        let mut ranking = TopK::new(probes);
        for (idx, cell) in cells.iter().enumerate() {
            if let Some((_, repr_vec)) = cell.representative() {
                ranking.offer(l2(&repr_vec, probe), idx);
            }
        }
        let probed: Vec<usize> = ranking
            .drain_present()
            .into_iter()
            .map(|(_, idx)| idx)
            .collect();

        Self::check_cancelled(cancel)?;

        let merged = Mutex::new(TopK::<ScoredRecord>::new(limit));
        let outcomes: Vec<Result<()>> = probed
            .par_iter()
            .map(|&idx| {
                Self::check_cancelled(cancel)?;
                let hits = cells[idx].local_query(&self.registry, metric, probe, limit)?;
                let mut merged = merged.lock();
                for hit in hits {
                    merged.offer(hit.score, hit);
                }
                Ok(())
            })
            .collect();

        if outcomes.iter().any(|r| matches!(r, Err(Error::Cancelled))) {
            return Err(Error::Cancelled);
        }
        let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
        for outcome in outcomes.iter().filter(|r| r.is_err()) {
            if let Err(err) = outcome {
                tracing::warn!(error = %err, "cell scan failed during query fan-out");
            }
        }
        if succeeded == 0 && !probed.is_empty() {
            return Err(Error::internal("all probed cells failed"));
        }

        let results = merged
            .into_inner()
            .drain()
            .into_iter()
            .map(|(_, payload)| payload)
            .collect();
        histogram!("ivf_query_probed_cells", probed.len() as f64);
        counter!("ivf_query_total", 1);
        Ok(results)
    }

    /// Re-seed centroids via k-means++ (one pass, no Lloyd iterations) and
    /// reassign every live record to its nearest new representative,
    /// publishing the rebuilt cell set atomically.
    pub fn reindex(&self, metric: &str, cancel: Option<&CancellationToken>) -> Result<()> {
        // Cell-ranking and reassignment always use L2 regardless of the
        // caller's metric tag; we still validate it so an unknown tag is
        // reported as InvalidArgument rather than accepted silently.
        self.registry.resolve(metric)?;

        let old_cells = self.snapshot();
        let records: Vec<Record> = old_cells.iter().flat_map(|cell| cell.snapshot()).collect();
        if records.is_empty() {
            return Err(Error::internal("cannot reindex an empty index"));
        }
        tracing::info!(records = records.len(), cells = self.num_cells, "reindex started");

        Self::check_cancelled(cancel)?;

        let mut rng = rand::thread_rng();
        let mut chosen: Vec<usize> = vec![rng.gen_range(0..records.len())];

        while chosen.len() < self.num_cells && chosen.len() < records.len() {
            Self::check_cancelled(cancel)?;
            let weights: Vec<f64> = records
                .iter()
                .map(|r| {
                    let d = chosen
                        .iter()
                        .map(|&c| l2(&r.data, &records[c].data))
                        .fold(f64::INFINITY, f64::min);
                    d * d
                })
                .collect();
            let total: f64 = weights.iter().sum();
            if total <= 0.0 {
                break;
            }
            let mut picked = None;
            for _ in 0..REINDEX_MAX_RETRIES {
                let u = rng.gen_range(0.0..total);
                let mut acc = 0.0;
                let mut candidate = weights.len() - 1;
                for (i, w) in weights.iter().enumerate() {
                    acc += w;
                    if acc > u {
                        candidate = i;
                        break;
                    }
                }
                if !chosen.contains(&candidate) {
                    picked = Some(candidate);
                    break;
                }
            }
            match picked {
                Some(idx) => chosen.push(idx),
                None => return Err(Error::internal("k-means++ seeding exhausted retries")),
            }
        }

        Self::check_cancelled(cancel)?;

        let mut new_cells: Vec<Arc<Cell>> = chosen
            .iter()
            .map(|&idx| {
                let seed = records[idx].clone();
                Arc::new(Cell::seeded(seed.uuid.clone(), seed))
            })
            .collect();
        // M < N is permitted: pad with empty cells so N stays fixed.
        while new_cells.len() < self.num_cells {
            new_cells.push(Arc::new(Cell::empty(Uuid::new_v4().to_string())));
        }

        for record in &records {
            Self::check_cancelled(cancel)?;
            if let Some(target) = nearest_cell(&new_cells, &record.data) {
                new_cells[target].insert(record.clone());
            }
        }

        let cell_sizes: Vec<usize> = new_cells.iter().map(|cell| cell.len()).collect();
        *self.cells.write() = Arc::new(new_cells);
        self.reindexed.store(true, Ordering::Release);
        counter!("ivf_reindex_total", 1);
        gauge!("ivf_cell_count", self.num_cells as f64);
        gauge!("ivf_record_count", cell_sizes.iter().sum::<usize>() as f64);
        tracing::info!(cell_sizes = ?cell_sizes, "reindex finished");
        Ok(())
    }
}

/// Nearest cell to `probe` by representative L2 distance, skipping empty
/// cells. Ties keep the first-encountered cell (stable traversal order).
fn nearest_cell(cells: &[Arc<Cell>], probe: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, cell) in cells.iter().enumerate() {
        if let Some((_, repr_vec)) = cell.representative() {
            let d = l2(&repr_vec, probe);
            let is_better = match best {
                Some((_, best_d)) => d < best_d,
                None => true,
            };
            if is_better {
                best = Some((idx, d));
            }
        }
    }
    best.map(|(idx, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn rec(uuid: &str, data: Vec<f64>) -> Record {
        Record::new(uuid, data, HashMap::new())
    }

    fn index(num_cells: usize, dim: usize) -> Index {
        Index::new(dim, num_cells, MetricRegistry::with_defaults()).unwrap()
    }

    #[test]
    fn rejects_dimension_mismatch() {
        let idx = index(1, 2);
        let err = idx.insert(rec("a", vec![1.0])).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn insert_then_fetch_round_trips() {
        let idx = index(4, 2);
        idx.insert(rec("a", vec![1.0, 2.0])).unwrap();
        let fetched = idx.fetch("a").unwrap();
        assert_eq!(fetched.data, vec![1.0, 2.0]);
        assert!(idx.fetch("missing").is_err());
    }

    #[test]
    fn upsert_does_not_duplicate() {
        let idx = index(4, 1);
        idx.insert(rec("u", vec![1.0])).unwrap();
        idx.insert(rec("u", vec![9.0])).unwrap();
        assert_eq!(idx.record_count(), 1);
        assert_eq!(idx.fetch("u").unwrap().data, vec![9.0]);
    }

    #[test]
    fn delete_then_fetch_not_found() {
        let idx = index(2, 1);
        idx.insert(rec("u", vec![1.0])).unwrap();
        assert!(idx.delete("u"));
        assert!(!idx.delete("u"));
        assert!(idx.fetch("u").is_err());
    }

    #[test]
    fn query_single_partition_orders_by_distance() {
        let idx = index(1, 2);
        idx.insert(rec("u1", vec![0.0, 0.0])).unwrap();
        idx.insert(rec("u2", vec![1.0, 0.0])).unwrap();
        idx.insert(rec("u3", vec![10.0, 10.0])).unwrap();
        let hits = idx.query(&[0.1, 0.0], 2, 1, "l2", None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].as_ref().unwrap().record.uuid, "u1");
        assert_eq!(hits[1].as_ref().unwrap().record.uuid, "u2");
    }

    #[test]
    fn query_pads_with_null_placeholders() {
        let idx = index(1, 1);
        idx.insert(rec("u1", vec![0.0])).unwrap();
        let hits = idx.query(&[0.0], 5, 1, "l2", None).unwrap();
        assert_eq!(hits.len(), 5);
        assert!(hits[0].is_some());
        assert!(hits[1..].iter().all(Option::is_none));
    }

    #[test]
    fn query_rejects_zero_limit() {
        let idx = index(1, 1);
        idx.insert(rec("u1", vec![0.0])).unwrap();
        assert!(idx.query(&[0.0], 0, 1, "l2", None).is_err());
    }

    #[test]
    fn reindex_on_empty_index_is_internal_error() {
        let idx = index(2, 2);
        let err = idx.reindex("l2", None).unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
    }

    #[test]
    fn reindex_partitions_two_clusters() {
        let idx = index(2, 2);
        for i in 0..10 {
            idx.insert(rec(&format!("u{i}"), vec![0.0 + i as f64 * 0.01, 0.0]))
                .unwrap();
            idx.insert(rec(&format!("v{i}"), vec![10.0 + i as f64 * 0.01, 10.0]))
                .unwrap();
        }
        idx.reindex("l2", None).unwrap();
        assert_eq!(idx.record_count(), 20);

        let hits = idx.query(&[0.0, 0.0], 3, 1, "l2", None).unwrap();
        for hit in &hits {
            let uuid = &hit.as_ref().unwrap().record.uuid;
            assert!(uuid.starts_with('u'));
        }
    }

    #[test]
    fn insert_routes_to_nearest_after_reindex() {
        let idx = index(2, 2);
        for i in 0..6 {
            idx.insert(rec(&format!("u{i}"), vec![0.0, 0.0])).unwrap();
            idx.insert(rec(&format!("v{i}"), vec![50.0, 50.0])).unwrap();
        }
        idx.reindex("l2", None).unwrap();
        idx.insert(rec("new-near-u", vec![0.1, 0.1])).unwrap();
        let hits = idx.query(&[0.0, 0.0], 1, 1, "l2", None).unwrap();
        assert_eq!(hits[0].as_ref().unwrap().record.uuid, "new-near-u");
    }

    #[test]
    fn query_cancelled_before_dispatch_returns_cancelled() {
        let idx = index(2, 1);
        idx.insert(rec("u1", vec![0.0])).unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let err = idx.query(&[0.0], 1, 1, "l2", Some(&token)).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
