//! Turns a [`GraphDefinition`] into an [`ExecutionGraph`]

use super::{ExecutionGraph, GraphDefinition, GraphOutput, InputRef, Node, Value};
use crate::error::{GraphError, GraphResult};
use crate::ops::{OpDef, OpRegistry};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Producer reference inside the definition, before arena placement
#[derive(Debug, Clone, Copy)]
enum Source {
    Placeholder(usize),
    Node { def_index: usize, slot: usize },
}

impl ExecutionGraph {
    /// Validate `definition` against `ops` and freeze it.
    ///
    /// Nodes may appear in any order; they are placed so that producers come
    /// first, keeping definition order among independent nodes.
    pub fn build_from(definition: &GraphDefinition, ops: &OpRegistry) -> GraphResult<Self> {
        let placeholder_index = index_placeholders(&definition.placeholders)?;

        let mut id_index = HashMap::with_capacity(definition.nodes.len());
        for (i, node) in definition.nodes.iter().enumerate() {
            if id_index.insert(node.id, i).is_some() {
                return Err(GraphError::InvalidDefinition(format!(
                    "node id [{}] is defined more than once",
                    node.id
                )));
            }
        }

        let mut resolved_ops: Vec<(Arc<OpDef>, Option<Arc<OpDef>>)> = Vec::new();
        let mut sources: Vec<Vec<Source>> = Vec::with_capacity(definition.nodes.len());

        for node in &definition.nodes {
            let op = ops.resolve(&node.op)?;
            let desc = op.descriptor();
            desc.check_arity(node.inputs.len())
                .and_then(|()| desc.check_args(&node.args))
                .map_err(|e| GraphError::InvalidDefinition(format!("node [{}]: {}", node.id, e)))?;
            let backward = desc.backward().map(|name| ops.resolve(name)).transpose()?;

            let mut node_sources = Vec::with_capacity(node.inputs.len());
            for input in &node.inputs {
                let source = match input {
                    InputRef::Placeholder(name) => {
                        let index = placeholder_index.get(name.as_str()).ok_or_else(|| {
                            GraphError::UnresolvedReference {
                                node: Some(node.id),
                                reference: input.to_string(),
                            }
                        })?;
                        Source::Placeholder(*index)
                    }
                    InputRef::Node { id, slot } => {
                        if *id == node.id {
                            return Err(GraphError::Cycle { node: node.id });
                        }
                        let def_index = *id_index.get(id).ok_or_else(|| {
                            GraphError::UnresolvedReference {
                                node: Some(node.id),
                                reference: input.to_string(),
                            }
                        })?;
                        let producer = ops.resolve(&definition.nodes[def_index].op)?;
                        if *slot >= producer.descriptor().num_outputs() {
                            return Err(GraphError::UnresolvedReference {
                                node: Some(node.id),
                                reference: input.to_string(),
                            });
                        }
                        Source::Node {
                            def_index,
                            slot: *slot,
                        }
                    }
                };
                node_sources.push(source);
            }

            resolved_ops.push((op, backward));
            sources.push(node_sources);
        }

        let order = topological_order(definition, &sources)?;
        let mut position = vec![0usize; order.len()];
        for (arena_index, &def_index) in order.iter().enumerate() {
            position[def_index] = arena_index;
        }

        let to_value = |source: Source| match source {
            Source::Placeholder(index) => Value::Placeholder(index),
            Source::Node { def_index, slot } => Value::Node {
                index: position[def_index],
                slot,
            },
        };

        let nodes = order
            .iter()
            .map(|&def_index| {
                let def = &definition.nodes[def_index];
                let (op, backward) = resolved_ops[def_index].clone();
                Node {
                    id: def.id,
                    name: def.name.clone(),
                    op,
                    backward,
                    inputs: sources[def_index].iter().copied().map(to_value).collect(),
                    args: def.args.clone(),
                }
            })
            .collect::<Vec<_>>();

        if definition.outputs.is_empty() {
            return Err(GraphError::InvalidDefinition(
                "graph declares no outputs".to_string(),
            ));
        }

        let mut outputs = Vec::with_capacity(definition.outputs.len());
        for output in &definition.outputs {
            let (value, default_name) = match &output.source {
                InputRef::Placeholder(name) => {
                    let index = placeholder_index.get(name.as_str()).ok_or_else(|| {
                        dangling_output(&output.source)
                    })?;
                    (Value::Placeholder(*index), name.clone())
                }
                InputRef::Node { id, slot } => {
                    let def_index = id_index.get(id).copied().filter(|&d| {
                        *slot < resolved_ops[d].0.descriptor().num_outputs()
                    });
                    let def_index = def_index.ok_or_else(|| dangling_output(&output.source))?;
                    let name = match (&definition.nodes[def_index].name, slot) {
                        (Some(name), 0) => name.clone(),
                        _ => format!("{}:{}", id, slot),
                    };
                    (
                        Value::Node {
                            index: position[def_index],
                            slot: *slot,
                        },
                        name,
                    )
                }
            };
            outputs.push(GraphOutput {
                name: output.name.clone().unwrap_or(default_name),
                value,
            });
        }

        Ok(ExecutionGraph {
            placeholders: definition.placeholders.clone(),
            nodes,
            outputs,
        })
    }
}

fn dangling_output(source: &InputRef) -> GraphError {
    GraphError::UnresolvedReference {
        node: None,
        reference: source.to_string(),
    }
}

fn index_placeholders(names: &[String]) -> GraphResult<HashMap<&str, usize>> {
    let mut index = HashMap::with_capacity(names.len());
    for (i, name) in names.iter().enumerate() {
        if name.is_empty() {
            return Err(GraphError::InvalidDefinition(
                "placeholder names must not be empty".to_string(),
            ));
        }
        if index.insert(name.as_str(), i).is_some() {
            return Err(GraphError::InvalidDefinition(format!(
                "placeholder '{}' is declared more than once",
                name
            )));
        }
    }
    Ok(index)
}

/// Kahn's algorithm, always releasing the lowest definition index first
fn topological_order(definition: &GraphDefinition, sources: &[Vec<Source>]) -> GraphResult<Vec<usize>> {
    let n = sources.len();
    let mut pending = vec![0usize; n];
    let mut consumers: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (consumer, node_sources) in sources.iter().enumerate() {
        for source in node_sources {
            if let Source::Node { def_index, .. } = source {
                pending[consumer] += 1;
                consumers[*def_index].push(consumer);
            }
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &consumer in &consumers[next] {
            pending[consumer] -= 1;
            if pending[consumer] == 0 {
                ready.insert(consumer);
            }
        }
    }

    if order.len() < n {
        let on_cycle = find_cycle_member(&pending, sources);
        return Err(GraphError::Cycle {
            node: definition.nodes[on_cycle].id,
        });
    }

    Ok(order)
}

/// Walk producers among the unplaced nodes until one repeats
fn find_cycle_member(pending: &[usize], sources: &[Vec<Source>]) -> usize {
    let mut current = pending.iter().position(|&p| p > 0).unwrap_or(0);
    let mut seen = vec![false; pending.len()];
    while !seen[current] {
        seen[current] = true;
        let producer = sources[current].iter().find_map(|source| match source {
            Source::Node { def_index, .. } if pending[*def_index] > 0 => Some(*def_index),
            _ => None,
        });
        match producer {
            Some(p) => current = p,
            None => break,
        }
    }
    current
}
