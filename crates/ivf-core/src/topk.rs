//! Bounded top-K collection (component B).
//!
//! A fixed-capacity, ascending-score container. Initialized with `capacity`
//! sentinel slots of score `+inf`; `offer` only ever replaces the current
//! worst (last) slot and re-sorts. Chosen over a heap because K is small in
//! practice (K <= the caller's requested limit) and because draining in
//! ascending order falls out for free.

use std::cmp::Ordering;

struct Entry<T> {
    score: f64,
    payload: Option<T>,
}

pub struct TopK<T> {
    entries: Vec<Entry<T>>,
}

impl<T> TopK<T> {
    pub fn new(capacity: usize) -> Self {
        let entries = (0..capacity)
            .map(|_| Entry {
                score: f64::INFINITY,
                payload: None,
            })
            .collect();
        Self { entries }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    fn worst_score(&self) -> f64 {
        self.entries.last().map(|e| e.score).unwrap_or(f64::NEG_INFINITY)
    }

    /// Offer a candidate. Replaces the current worst slot iff `score` strictly
    /// improves on it; ties do not evict (stable against re-offering the same
    /// quality of candidate).
    pub fn offer(&mut self, score: f64, payload: T) {
        if self.entries.is_empty() || score >= self.worst_score() {
            return;
        }
        let last = self.entries.last_mut().expect("checked non-empty above");
        last.score = score;
        last.payload = Some(payload);
        self.entries
            .sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(Ordering::Equal));
    }

    /// Drain all slots in ascending score order, including unfilled sentinels
    /// (`+inf` score, `None` payload).
    pub fn drain(self) -> Vec<(f64, Option<T>)> {
        self.entries.into_iter().map(|e| (e.score, e.payload)).collect()
    }

    /// Drain, discarding sentinel slots that were never filled.
    pub fn drain_present(self) -> Vec<(f64, T)> {
        self.drain()
            .into_iter()
            .filter_map(|(score, payload)| payload.map(|p| (score, p)))
            .collect()
    }
}
