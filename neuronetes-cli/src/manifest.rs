//! YAML manifest parsing.

use neuronetes_types::{
    AgentClassSpec, ControlError, ModelSpec, PoolSpec, Result, ToolBindingSpec,
};
use serde::Deserialize;

/// One kind-tagged record in a manifest.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    /// A model record.
    Model {
        /// The spec body.
        spec: ModelSpec,
    },
    /// An agent class record.
    AgentClass {
        /// The spec body.
        spec: AgentClassSpec,
    },
    /// A pool record.
    Pool {
        /// The spec body.
        spec: PoolSpec,
    },
    /// A tool binding record.
    ToolBinding {
        /// The spec body.
        spec: ToolBindingSpec,
    },
}

/// Parse every document in a multi-document YAML manifest.
pub fn parse_all(content: &str) -> Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let manifest = Manifest::deserialize(document)
            .map_err(|e| ControlError::Validation(format!("invalid manifest: {e}")))?;
        manifests.push(manifest);
    }
    Ok(manifests)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multi_document_manifests() {
        let content = r#"
kind: Model
spec:
  id: llama
  uri: s3://weights/llama
  size_bytes: 1073741824
  shard_count: 1
  shard_strategy: tensor
  topology_class: any
  cache_priority: high
---
kind: Pool
spec:
  id: chat-pool
  agent_class_ref: chat
  min_replicas: 1
  max_replicas: 4
  gpu:
    count: 1
    memory_bytes: 1073741824
    topology_class: any
"#;
        let manifests = parse_all(content).unwrap();
        assert_eq!(manifests.len(), 2);
        assert!(matches!(manifests[0], Manifest::Model { .. }));
        assert!(matches!(manifests[1], Manifest::Pool { .. }));
    }

    #[test]
    fn unknown_kind_is_a_validation_error() {
        let err = parse_all("kind: Gadget\nspec: {}\n").unwrap_err();
        assert!(matches!(err, ControlError::Validation(_)));
    }
}
