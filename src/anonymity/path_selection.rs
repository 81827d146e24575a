use std::collections::HashSet;

use rand::rngs::OsRng;
use rand::seq::SliceRandom;

use crate::error::{OnionError, Result};
use crate::relay_protocol::{NodeId, NodeRecord};

/// Chooses the relays of a circuit, entry first.
pub trait PathSelector: Send + Sync {
    fn select(&self, nodes: &[NodeRecord], length: usize) -> Result<Vec<NodeRecord>>;
}

/// Uniform sample without replacement, skipping excluded node ids.
#[derive(Debug, Clone, Default)]
pub struct RandomPathSelector {
    excluded: HashSet<NodeId>,
}

impl RandomPathSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn excluding(ids: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            excluded: ids.into_iter().collect(),
        }
    }
}

impl PathSelector for RandomPathSelector {
    fn select(&self, nodes: &[NodeRecord], length: usize) -> Result<Vec<NodeRecord>> {
        let mut seen = HashSet::new();
        let mut candidates: Vec<NodeRecord> = nodes
            .iter()
            .filter(|n| !self.excluded.contains(&n.node_id) && seen.insert(n.node_id))
            .cloned()
            .collect();

        if candidates.len() < length {
            return Err(OnionError::InsufficientNodes {
                required: length,
                available: candidates.len(),
            });
        }

        candidates.shuffle(&mut OsRng);
        candidates.truncate(length);
        Ok(candidates)
    }
}

/// Always returns the same relays in the given order.
#[derive(Debug, Clone)]
pub struct FixedPathSelector {
    path: Vec<NodeId>,
}

impl FixedPathSelector {
    pub fn new(path: Vec<NodeId>) -> Self {
        Self { path }
    }
}

impl PathSelector for FixedPathSelector {
    fn select(&self, nodes: &[NodeRecord], length: usize) -> Result<Vec<NodeRecord>> {
        if self.path.len() != length {
            return Err(OnionError::InvalidConfig(format!(
                "fixed path has {} hops, circuit needs {}",
                self.path.len(),
                length
            )));
        }
        self.path
            .iter()
            .map(|id| {
                nodes
                    .iter()
                    .find(|n| n.node_id == *id)
                    .cloned()
                    .ok_or(OnionError::UnknownNode(*id))
            })
            .collect()
    }
}
