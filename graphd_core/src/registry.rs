//! Process-wide map from graph id to its built execution graph
//!
//! Graphs are built and evaluated outside the lock. The write lock is only
//! taken to check for an id and insert, swap or remove its entry, so
//! operations on different ids never wait on each other's work.

use crate::error::{GraphError, GraphResult};
use crate::graph::{ExecutionGraph, GraphDefinition};
use crate::ops::OpRegistry;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Client-chosen graph identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphId(String);

impl GraphId {
    pub fn new(id: impl Into<String>) -> Self {
        GraphId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GraphId {
    fn from(id: &str) -> Self {
        GraphId(id.to_string())
    }
}

impl From<String> for GraphId {
    fn from(id: String) -> Self {
        GraphId(id)
    }
}

impl From<i64> for GraphId {
    fn from(id: i64) -> Self {
        GraphId(id.to_string())
    }
}

/// A graph as stored in the registry
#[derive(Debug)]
pub struct RegisteredGraph {
    pub id: GraphId,
    pub graph: ExecutionGraph,
    /// 1 on register, incremented by every replace
    pub version: u64,
    pub registered_at: DateTime<Utc>,
    pub replaced_at: Option<DateTime<Utc>>,
}

/// Summary row returned by [`GraphRegistry::list`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphInfo {
    pub id: GraphId,
    pub version: u64,
    pub node_count: usize,
    pub placeholders: Vec<String>,
    pub outputs: Vec<String>,
    pub registered_at: DateTime<Utc>,
}

impl From<&RegisteredGraph> for GraphInfo {
    fn from(entry: &RegisteredGraph) -> Self {
        Self {
            id: entry.id.clone(),
            version: entry.version,
            node_count: entry.graph.node_count(),
            placeholders: entry.graph.placeholders().to_vec(),
            outputs: entry.graph.output_names(),
            registered_at: entry.registered_at,
        }
    }
}

pub struct GraphRegistry {
    ops: Arc<OpRegistry>,
    graphs: RwLock<HashMap<GraphId, Arc<RegisteredGraph>>>,
}

impl Default for GraphRegistry {
    fn default() -> Self {
        Self::new(OpRegistry::shared_builtin())
    }
}

impl GraphRegistry {
    pub fn new(ops: Arc<OpRegistry>) -> Self {
        Self {
            ops,
            graphs: RwLock::new(HashMap::new()),
        }
    }

    pub fn ops(&self) -> &OpRegistry {
        &self.ops
    }

    fn build(&self, id: &GraphId, definition: &GraphDefinition) -> GraphResult<ExecutionGraph> {
        ExecutionGraph::build_from(definition, &self.ops).map_err(|e| {
            log::warn!("Rejected definition for graph '{}': {}", id, e);
            e
        })
    }

    /// Build and store a graph under a fresh id
    pub fn register(&self, id: GraphId, definition: &GraphDefinition) -> GraphResult<u64> {
        if self.contains(&id) {
            return Err(GraphError::AlreadyExists(id.to_string()));
        }

        let graph = self.build(&id, definition)?;
        let node_count = graph.node_count();

        let mut graphs = self.graphs.write();
        if graphs.contains_key(&id) {
            return Err(GraphError::AlreadyExists(id.to_string()));
        }
        graphs.insert(
            id.clone(),
            Arc::new(RegisteredGraph {
                id: id.clone(),
                graph,
                version: 1,
                registered_at: Utc::now(),
                replaced_at: None,
            }),
        );
        drop(graphs);

        log::info!("Registered graph '{}' (version 1, {} nodes)", id, node_count);
        Ok(1)
    }

    /// Swap in a new graph for an existing id.
    ///
    /// Holders of the previous `Arc` keep evaluating the old graph.
    pub fn replace(&self, id: GraphId, definition: &GraphDefinition) -> GraphResult<u64> {
        if !self.contains(&id) {
            return Err(GraphError::NotFound(id.to_string()));
        }

        let graph = self.build(&id, definition)?;
        let node_count = graph.node_count();

        let mut graphs = self.graphs.write();
        let previous = graphs
            .get(&id)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(id.to_string()))?;
        let version = previous.version + 1;
        graphs.insert(
            id.clone(),
            Arc::new(RegisteredGraph {
                id: id.clone(),
                graph,
                version,
                registered_at: previous.registered_at,
                replaced_at: Some(Utc::now()),
            }),
        );
        drop(graphs);

        log::info!(
            "Replaced graph '{}' (version {}, {} nodes)",
            id,
            version,
            node_count
        );
        Ok(version)
    }

    pub fn forget(&self, id: &GraphId) -> GraphResult<()> {
        let removed = self.graphs.write().remove(id);
        match removed {
            Some(entry) => {
                log::info!("Forgot graph '{}' (version {})", id, entry.version);
                Ok(())
            }
            None => Err(GraphError::NotFound(id.to_string())),
        }
    }

    pub fn lookup(&self, id: &GraphId) -> GraphResult<Arc<RegisteredGraph>> {
        self.graphs
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &GraphId) -> bool {
        self.graphs.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.graphs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.read().is_empty()
    }

    /// Every registered graph, sorted by id
    pub fn list(&self) -> Vec<GraphInfo> {
        let mut infos: Vec<GraphInfo> = self
            .graphs
            .read()
            .values()
            .map(|entry| GraphInfo::from(entry.as_ref()))
            .collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{InputRef, NodeDef};

    fn relu_graph() -> GraphDefinition {
        GraphDefinition::new()
            .placeholder("x")
            .node(NodeDef::new(1, "relu").input(InputRef::placeholder("x")))
            .output(InputRef::node(1))
    }

    #[test]
    fn test_register_lookup_forget() {
        let registry = GraphRegistry::default();
        let id = GraphId::from("g");
        assert_eq!(registry.register(id.clone(), &relu_graph()).unwrap(), 1);
        assert_eq!(registry.lookup(&id).unwrap().version, 1);
        assert_eq!(registry.len(), 1);

        registry.forget(&id).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(registry.lookup(&id), Err(GraphError::NotFound(_))));
        assert!(matches!(registry.forget(&id), Err(GraphError::NotFound(_))));
    }

    #[test]
    fn test_old_handle_survives_replace() {
        let registry = GraphRegistry::default();
        let id = GraphId::from(7i64);
        registry.register(id.clone(), &relu_graph()).unwrap();
        let old = registry.lookup(&id).unwrap();

        let sigmoid = GraphDefinition::new()
            .placeholder("x")
            .node(NodeDef::new(1, "sigmoid").input(InputRef::placeholder("x")))
            .output(InputRef::node(1));
        assert_eq!(registry.replace(id.clone(), &sigmoid).unwrap(), 2);

        assert_eq!(old.graph.nodes()[0].op().name(), "relu");
        let new = registry.lookup(&id).unwrap();
        assert_eq!(new.graph.nodes()[0].op().name(), "sigmoid");
        assert!(new.replaced_at.is_some());
        assert_eq!(new.registered_at, old.registered_at);
    }

    #[test]
    fn test_list_is_sorted() {
        let registry = GraphRegistry::default();
        registry.register("b".into(), &relu_graph()).unwrap();
        registry.register("a".into(), &relu_graph()).unwrap();
        let ids: Vec<String> = registry.list().iter().map(|i| i.id.to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(registry.list()[0].outputs, vec!["1:0"]);
    }
}
