//! Validated, immutable execution graphs
//!
//! Nodes live in an arena ordered so that every producer precedes its
//! consumers. Inputs are arena indices, so a built graph cannot express a
//! cycle.

pub mod builder;
pub mod definition;
pub mod executor;
pub mod gradient;

pub use definition::{GraphDefinition, InputRef, NodeDef, OutputDef};
pub use executor::{AbortSignal, Binding, NamedTensor};

use crate::ops::{OpArgs, OpDef};
use std::sync::Arc;

/// Where a node reads one of its inputs from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    /// Index into the graph's placeholder list
    Placeholder(usize),
    /// Output `slot` of the node at arena position `index`
    Node { index: usize, slot: usize },
}

/// One operator invocation inside a built graph
#[derive(Debug, Clone)]
pub struct Node {
    id: i32,
    name: Option<String>,
    op: Arc<OpDef>,
    backward: Option<Arc<OpDef>>,
    inputs: Vec<Value>,
    args: OpArgs,
}

impl Node {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn op(&self) -> &OpDef {
        &self.op
    }

    pub fn backward(&self) -> Option<&OpDef> {
        self.backward.as_deref()
    }

    pub fn inputs(&self) -> &[Value] {
        &self.inputs
    }

    pub fn args(&self) -> &OpArgs {
        &self.args
    }

    pub fn num_outputs(&self) -> usize {
        self.op.descriptor().num_outputs()
    }
}

#[derive(Debug, Clone)]
pub struct GraphOutput {
    name: String,
    value: Value,
}

impl GraphOutput {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> Value {
        self.value
    }
}

/// A frozen graph ready for evaluation.
///
/// There is no API to mutate a built graph; callers share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    placeholders: Vec<String>,
    nodes: Vec<Node>,
    outputs: Vec<GraphOutput>,
}

impl ExecutionGraph {
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Nodes in evaluation order
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn outputs(&self) -> &[GraphOutput] {
        &self.outputs
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.name.clone()).collect()
    }

    pub fn node_by_id(&self, id: i32) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}
