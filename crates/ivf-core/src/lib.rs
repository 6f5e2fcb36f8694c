//! In-memory, partitioned approximate-nearest-neighbor index.
//!
//! This crate is the core described by components A through E: a distance
//! kernel registry, a bounded top-K collection, per-partition cells, and the
//! [`Index`] that routes inserts, fans queries out across cells in
//! parallel, and rebuilds the partitioning on reindex via k-means++
//! seeding. Everything outside this crate — the HTTP surface, CLI, config,
//! and demo data generation — is an external collaborator.

mod cell;
mod error;
mod index;
mod metric;
mod record;
mod topk;

pub use cell::Cell;
pub use error::{Error, Result};
pub use index::Index;
pub use metric::{l2, Kernel, MetricRegistry};
pub use record::{Record, ScoredRecord};
pub use topk::TopK;
