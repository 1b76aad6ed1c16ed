//! Reverse-mode gradients through a built graph
//!
//! A backward operator receives the forward inputs followed by the upstream
//! gradient of each forward output, and yields one gradient per forward input.

use super::executor::read;
use super::{AbortSignal, Binding, ExecutionGraph, NamedTensor, Value};
use crate::error::{GraphError, GraphResult};
use crate::tensor::Tensor;

/// Add `grad` into `slot`, keeping the dtype of the first contribution
fn accumulate(slot: &mut Option<Tensor>, grad: Tensor) -> GraphResult<()> {
    match slot {
        None => *slot = Some(grad),
        Some(existing) => {
            if existing.shape() != grad.shape() {
                return Err(GraphError::shape(
                    "gradient",
                    format!(
                        "cannot accumulate {:?} into {:?}",
                        grad.shape(),
                        existing.shape()
                    ),
                ));
            }
            let sum: Vec<f64> = existing
                .to_f64_vec()
                .into_iter()
                .zip(grad.to_f64_vec())
                .map(|(a, b)| a + b)
                .collect();
            existing.fill_from_f64(&sum)?;
        }
    }
    Ok(())
}

impl ExecutionGraph {
    /// Gradient of the outputs with respect to every placeholder.
    ///
    /// `output_grads` holds one upstream gradient per declared output, shaped
    /// like that output. Placeholders the outputs do not depend on get zeros.
    pub fn gradients(
        &self,
        bindings: Vec<Binding>,
        output_grads: Vec<Tensor>,
        abort: &AbortSignal,
    ) -> GraphResult<Vec<NamedTensor>> {
        if output_grads.len() != self.outputs.len() {
            return Err(GraphError::invalid_argument(format!(
                "expected {} output gradients, got {}",
                self.outputs.len(),
                output_grads.len()
            )));
        }

        let inputs = self.bind(bindings)?;
        let activations = self.forward(&inputs, abort)?;

        let mut placeholder_grads: Vec<Option<Tensor>> = vec![None; inputs.len()];
        let mut node_grads: Vec<Vec<Option<Tensor>>> = self
            .nodes
            .iter()
            .map(|n| vec![None; n.num_outputs()])
            .collect();

        for (output, grad) in self.outputs.iter().zip(output_grads) {
            grad.validate()?;
            let value = read(&inputs, &activations, output.value);
            if value.shape() != grad.shape() {
                return Err(GraphError::invalid_argument(format!(
                    "gradient for output '{}' has shape {:?}, output has {:?}",
                    output.name,
                    grad.shape(),
                    value.shape()
                )));
            }
            match output.value {
                Value::Placeholder(index) => accumulate(&mut placeholder_grads[index], grad)?,
                Value::Node { index, slot } => accumulate(&mut node_grads[index][slot], grad)?,
            }
        }

        for (index, node) in self.nodes.iter().enumerate().rev() {
            if node_grads[index].iter().all(Option::is_none) {
                continue;
            }
            if abort.is_aborted() {
                return Err(GraphError::Cancelled { node: node.id });
            }
            let backward = node.backward().ok_or_else(|| GraphError::NotDifferentiable {
                op: node.op.name().to_string(),
                node: node.id,
            })?;

            let upstream: Vec<Tensor> = std::mem::take(&mut node_grads[index])
                .into_iter()
                .zip(&activations[index])
                .map(|(grad, out)| {
                    grad.unwrap_or_else(|| Tensor::zeros(out.dtype(), out.shape().to_vec()))
                })
                .collect();

            let mut args: Vec<&Tensor> = node
                .inputs
                .iter()
                .map(|&value| read(&inputs, &activations, value))
                .collect();
            args.extend(upstream.iter());

            let grads = backward.dispatch(&args, &node.args, Some(node.id))?;
            if grads.len() != node.inputs.len() {
                return Err(GraphError::ShapeMismatch {
                    op: backward.name().to_string(),
                    node: Some(node.id),
                    message: format!(
                        "produced {} gradients for {} inputs",
                        grads.len(),
                        node.inputs.len()
                    ),
                });
            }

            for (&value, grad) in node.inputs.iter().zip(grads) {
                match value {
                    Value::Placeholder(p) => accumulate(&mut placeholder_grads[p], grad)?,
                    Value::Node { index, slot } => accumulate(&mut node_grads[index][slot], grad)?,
                }
            }
        }

        Ok(self
            .placeholders
            .iter()
            .zip(placeholder_grads)
            .zip(&inputs)
            .map(|((name, grad), input)| NamedTensor {
                name: name.clone(),
                tensor: grad
                    .unwrap_or_else(|| Tensor::zeros(input.dtype(), input.shape().to_vec())),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphDefinition, InputRef, NodeDef};
    use crate::ops::OpRegistry;
    use approx::assert_relative_eq;

    fn build(def: GraphDefinition) -> ExecutionGraph {
        ExecutionGraph::build_from(&def, &OpRegistry::shared_builtin()).unwrap()
    }

    #[test]
    fn test_shared_input_accumulates() {
        // y = x * x, dy/dx = 2x
        let graph = build(
            GraphDefinition::new()
                .placeholder("x")
                .node(
                    NodeDef::new(1, "multiply")
                        .input(InputRef::placeholder("x"))
                        .input(InputRef::placeholder("x")),
                )
                .output(InputRef::node(1)),
        );
        let grads = graph
            .gradients(
                vec![Binding::positional(Tensor::vector(vec![3.0f64, -1.5]))],
                vec![Tensor::vector(vec![1.0f64, 1.0])],
                &AbortSignal::new(),
            )
            .unwrap();
        assert_eq!(grads[0].name, "x");
        let dx = grads[0].tensor.as_f64().unwrap();
        assert_relative_eq!(dx[0], 6.0);
        assert_relative_eq!(dx[1], -3.0);
    }

    #[test]
    fn test_unused_placeholder_gets_zeros() {
        let graph = build(
            GraphDefinition::new()
                .placeholder("x")
                .placeholder("unused")
                .node(NodeDef::new(1, "relu").input(InputRef::placeholder("x")))
                .output(InputRef::node(1)),
        );
        let grads = graph
            .gradients(
                vec![
                    Binding::positional(Tensor::vector(vec![-1.0f32, 2.0])),
                    Binding::positional(Tensor::vector(vec![9.0f32])),
                ],
                vec![Tensor::vector(vec![1.0f32, 1.0])],
                &AbortSignal::new(),
            )
            .unwrap();
        assert_eq!(grads[0].tensor.as_f32(), Some(&[0.0f32, 1.0][..]));
        assert_eq!(grads[1].tensor.as_f32(), Some(&[0.0f32][..]));
    }

    #[test]
    fn test_assert_on_gradient_path_is_not_differentiable() {
        let graph = build(
            GraphDefinition::new()
                .placeholder("x")
                .node(NodeDef::new(4, "Assert").input(InputRef::placeholder("x")))
                .output(InputRef::node(4)),
        );
        let err = graph
            .gradients(
                vec![Binding::positional(Tensor::scalar(1.0f64))],
                vec![Tensor::scalar(1.0f64)],
                &AbortSignal::new(),
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::NotDifferentiable { node: 4, .. }));
    }

    #[test]
    fn test_output_gradient_count_must_match() {
        let graph = build(
            GraphDefinition::new()
                .placeholder("x")
                .output(InputRef::placeholder("x")),
        );
        let err = graph
            .gradients(
                vec![Binding::positional(Tensor::scalar(1.0f64))],
                vec![],
                &AbortSignal::new(),
            )
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidArgument(_)));
    }
}
