//! Weight store: the leaf values a generated evaluator's `init` loads at runtime.
//!
//! The on-disk form is a JSON object mapping each leaf uid to its flattened
//! values, written with fixed 9-decimal precision.

use std::collections::BTreeMap;
use std::io::{Read, Write};

use thiserror::Error;

use crate::ir::Graph;

#[derive(Debug, Error)]
pub enum WeightError {
    #[error("leaf '{uid}': expected {expected} values, found {found}")]
    LengthMismatch {
        uid: String,
        expected: usize,
        found: usize,
    },

    #[error("leaf '{uid}': value at index {index} is not finite")]
    NonFinite { uid: String, index: usize },

    #[error("leaf '{uid}': no values in weight store")]
    Missing { uid: String },

    #[error("weight store I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("weight store JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightStore {
    entries: BTreeMap<String, Vec<f64>>,
}

impl WeightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the values carried by Parameter and Constant nodes.
    ///
    /// Leaves without a value are skipped with a warning; a value whose length
    /// disagrees with the node's shape is an error.
    pub fn from_graph(graph: &Graph) -> Result<Self, WeightError> {
        let mut store = Self::new();
        for node in graph.nodes.iter().filter(|n| n.kind.is_leaf_value()) {
            let Some(values) = &node.value else {
                log::warn!("leaf {} carries no value, skipping", node.uid);
                continue;
            };
            let expected = node.element_count();
            if values.len() != expected {
                return Err(WeightError::LengthMismatch {
                    uid: node.uid.clone(),
                    expected,
                    found: values.len(),
                });
            }
            store.insert(&node.uid, values.clone());
        }
        log::info!("extracted {} leaf values", store.len());
        Ok(store)
    }

    pub fn insert(&mut self, uid: &str, values: Vec<f64>) {
        self.entries.insert(uid.to_string(), values);
    }

    pub fn get(&self, uid: &str) -> Option<&[f64]> {
        self.entries.get(uid).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check that every leaf of `graph` has an entry of the right length.
    pub fn validate(&self, graph: &Graph) -> Result<(), WeightError> {
        for node in graph.nodes.iter().filter(|n| n.kind.is_leaf_value()) {
            let values = self.get(&node.uid).ok_or_else(|| WeightError::Missing {
                uid: node.uid.clone(),
            })?;
            let expected = node.element_count();
            if values.len() != expected {
                return Err(WeightError::LengthMismatch {
                    uid: node.uid.clone(),
                    expected,
                    found: values.len(),
                });
            }
        }
        Ok(())
    }

    pub fn write_json<W: Write>(&self, mut writer: W) -> Result<(), WeightError> {
        writer.write_all(b"{\n")?;
        let last = self.entries.len().saturating_sub(1);
        for (i, (uid, values)) in self.entries.iter().enumerate() {
            let mut numbers = Vec::with_capacity(values.len());
            for (index, v) in values.iter().enumerate() {
                if !v.is_finite() {
                    return Err(WeightError::NonFinite {
                        uid: uid.clone(),
                        index,
                    });
                }
                numbers.push(format!("{v:.9}"));
            }
            let separator = if i == last { "" } else { "," };
            writeln!(
                writer,
                "    {}: [{}]{separator}",
                serde_json::to_string(uid)?,
                numbers.join(", ")
            )?;
        }
        writer.write_all(b"}\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_json<R: Read>(reader: R) -> Result<Self, WeightError> {
        let entries: BTreeMap<String, Vec<f64>> = serde_json::from_reader(reader)?;
        Ok(Self { entries })
    }
}
