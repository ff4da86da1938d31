//! External node inventory feed.

use async_trait::async_trait;
use neuronetes_types::{NodeFact, Result};
use parking_lot::RwLock;

/// Source of node facts, implemented by the external inventory.
#[async_trait]
pub trait NodeSource: Send + Sync {
    /// Current facts for every schedulable host.
    async fn fetch(&self) -> Result<Vec<NodeFact>>;
}

/// Fixed node set, fed by tests and the dry-run daemon.
#[derive(Default)]
pub struct StaticNodeSource {
    nodes: RwLock<Vec<NodeFact>>,
}

impl StaticNodeSource {
    /// Create a source serving `nodes`.
    pub fn new(nodes: Vec<NodeFact>) -> Self {
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Replace the node set.
    pub fn set(&self, nodes: Vec<NodeFact>) {
        *self.nodes.write() = nodes;
    }

    /// Update one node in place, inserting it if absent.
    pub fn upsert(&self, fact: NodeFact) {
        let mut nodes = self.nodes.write();
        match nodes.iter_mut().find(|n| n.id == fact.id) {
            Some(existing) => *existing = fact,
            None => nodes.push(fact),
        }
    }
}

#[async_trait]
impl NodeSource for StaticNodeSource {
    async fn fetch(&self) -> Result<Vec<NodeFact>> {
        Ok(self.nodes.read().clone())
    }
}
