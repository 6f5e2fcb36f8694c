use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A stored vector with identity and opaque metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub uuid: String,
    pub data: Vec<f64>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl Record {
    pub fn new(uuid: impl Into<String>, data: Vec<f64>, meta: HashMap<String, String>) -> Self {
        Self {
            uuid: uuid.into(),
            data,
            meta,
        }
    }
}

/// A record paired with its distance score from a query or ranking pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    pub record: Record,
    pub score: f64,
}
