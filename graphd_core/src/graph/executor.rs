//! Forward evaluation of a built graph

use super::{ExecutionGraph, Value};
use crate::error::{GraphError, GraphResult};
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A placeholder value supplied by the caller.
///
/// Named bindings match a placeholder by name; unnamed ones fill the
/// remaining placeholders in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    #[serde(default)]
    pub name: Option<String>,
    pub tensor: Tensor,
}

impl Binding {
    pub fn named(name: &str, tensor: Tensor) -> Self {
        Self {
            name: Some(name.to_string()),
            tensor,
        }
    }

    pub fn positional(tensor: Tensor) -> Self {
        Self { name: None, tensor }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedTensor {
    pub name: String,
    pub tensor: Tensor,
}

/// Cooperative cancellation checked between node evaluations.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that also fires once `timeout` has elapsed
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.deadline.map_or(false, |d| Instant::now() >= d)
    }
}

impl ExecutionGraph {
    /// Order `bindings` to match the placeholder list
    pub fn bind(&self, bindings: Vec<Binding>) -> GraphResult<Vec<Tensor>> {
        let mut slots: Vec<Option<Tensor>> = vec![None; self.placeholders.len()];
        let mut positional = Vec::new();

        for binding in bindings {
            binding.tensor.validate()?;
            match binding.name {
                Some(name) => {
                    let index = self
                        .placeholders
                        .iter()
                        .position(|p| *p == name)
                        .ok_or_else(|| {
                            GraphError::invalid_argument(format!("unknown placeholder '{}'", name))
                        })?;
                    if slots[index].is_some() {
                        return Err(GraphError::invalid_argument(format!(
                            "placeholder '{}' is bound more than once",
                            name
                        )));
                    }
                    slots[index] = Some(binding.tensor);
                }
                None => positional.push(binding.tensor),
            }
        }

        let mut positional = positional.into_iter();
        for slot in slots.iter_mut().filter(|s| s.is_none()) {
            match positional.next() {
                Some(tensor) => *slot = Some(tensor),
                None => break,
            }
        }
        let surplus = positional.count();
        if surplus > 0 {
            return Err(GraphError::invalid_argument(format!(
                "{} positional binding(s) left over for {} placeholders",
                surplus,
                self.placeholders.len()
            )));
        }

        slots
            .into_iter()
            .zip(&self.placeholders)
            .map(|(slot, name)| slot.ok_or_else(|| GraphError::MissingPlaceholder(name.clone())))
            .collect()
    }

    /// Evaluate every node and return the declared outputs in order
    pub fn evaluate(
        &self,
        bindings: Vec<Binding>,
        abort: &AbortSignal,
    ) -> GraphResult<Vec<NamedTensor>> {
        let inputs = self.bind(bindings)?;
        let activations = self.forward(&inputs, abort)?;
        Ok(self
            .outputs
            .iter()
            .map(|output| NamedTensor {
                name: output.name.clone(),
                tensor: read(&inputs, &activations, output.value).clone(),
            })
            .collect())
    }

    /// Run all nodes, keeping every node's outputs
    pub(crate) fn forward(
        &self,
        inputs: &[Tensor],
        abort: &AbortSignal,
    ) -> GraphResult<Vec<Vec<Tensor>>> {
        let mut activations: Vec<Vec<Tensor>> = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if abort.is_aborted() {
                log::debug!("evaluation cancelled before node [{}]", node.id);
                return Err(GraphError::Cancelled { node: node.id });
            }
            let args: Vec<&Tensor> = node
                .inputs
                .iter()
                .map(|&value| read(inputs, &activations, value))
                .collect();
            let outputs = node.op.dispatch(&args, &node.args, Some(node.id))?;
            log::trace!("node [{}] {} done", node.id, node.op.name());
            activations.push(outputs);
        }
        Ok(activations)
    }
}

/// Builder guarantees every value points at a bound placeholder or an earlier node
pub(crate) fn read<'a>(inputs: &'a [Tensor], activations: &'a [Vec<Tensor>], value: Value) -> &'a Tensor {
    match value {
        Value::Placeholder(index) => &inputs[index],
        Value::Node { index, slot } => &activations[index][slot],
    }
}
