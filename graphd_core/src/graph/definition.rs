//! Serialized graph definitions as sent by clients
//!
//! A definition is plain data. Nothing here is validated; see
//! [`ExecutionGraph::build_from`](crate::graph::ExecutionGraph::build_from).

use crate::error::GraphResult;
use crate::ops::OpArgs;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a node input (or a graph output) comes from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputRef {
    /// External input bound at inference time
    Placeholder(String),
    /// Output `slot` of the node with id `id`
    Node {
        id: i32,
        #[serde(default)]
        slot: usize,
    },
}

impl InputRef {
    pub fn placeholder(name: &str) -> Self {
        InputRef::Placeholder(name.to_string())
    }

    /// First output of node `id`
    pub fn node(id: i32) -> Self {
        InputRef::Node { id, slot: 0 }
    }

    pub fn slot(id: i32, slot: usize) -> Self {
        InputRef::Node { id, slot }
    }
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputRef::Placeholder(name) => write!(f, "placeholder '{}'", name),
            InputRef::Node { id, slot } => write!(f, "node [{}] output {}", id, slot),
        }
    }
}

/// One operator invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: i32,
    #[serde(default)]
    pub name: Option<String>,
    pub op: String,
    #[serde(default)]
    pub inputs: Vec<InputRef>,
    #[serde(default)]
    pub args: OpArgs,
}

impl NodeDef {
    pub fn new(id: i32, op: &str) -> Self {
        Self {
            id,
            name: None,
            op: op.to_string(),
            inputs: Vec::new(),
            args: OpArgs::default(),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn input(mut self, input: InputRef) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn t_arg(mut self, value: f64) -> Self {
        self.args.t_args.push(value);
        self
    }

    pub fn i_arg(mut self, value: i64) -> Self {
        self.args.i_args.push(value);
        self
    }

    pub fn b_arg(mut self, value: bool) -> Self {
        self.args.b_args.push(value);
        self
    }
}

/// A value the graph returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDef {
    pub source: InputRef,
    #[serde(default)]
    pub name: Option<String>,
}

/// Complete graph as submitted to RegisterGraph / ReplaceGraph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    #[serde(default)]
    pub placeholders: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub outputs: Vec<OutputDef>,
}

impl GraphDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn placeholder(mut self, name: &str) -> Self {
        self.placeholders.push(name.to_string());
        self
    }

    pub fn node(mut self, node: NodeDef) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn output(mut self, source: InputRef) -> Self {
        self.outputs.push(OutputDef { source, name: None });
        self
    }

    pub fn named_output(mut self, source: InputRef, name: &str) -> Self {
        self.outputs.push(OutputDef {
            source,
            name: Some(name.to_string()),
        });
        self
    }

    pub fn from_json(text: &str) -> GraphResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_yaml(text: &str) -> GraphResult<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_toml(text: &str) -> GraphResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn to_json(&self) -> GraphResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
