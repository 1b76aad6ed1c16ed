//! Validate-then-invoke step shared by every operator

use crate::error::{GraphError, GraphResult};
use crate::ops::descriptor::OpDescriptor;
use crate::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Scalar arguments attached to a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpArgs {
    #[serde(default)]
    pub t_args: Vec<f64>,
    #[serde(default)]
    pub i_args: Vec<i64>,
    #[serde(default)]
    pub b_args: Vec<bool>,
}

impl OpArgs {
    pub fn with_t(mut self, value: f64) -> Self {
        self.t_args.push(value);
        self
    }

    pub fn with_i(mut self, value: i64) -> Self {
        self.i_args.push(value);
        self
    }

    pub fn with_b(mut self, value: bool) -> Self {
        self.b_args.push(value);
        self
    }

    pub fn t_arg(&self, index: usize, default: f64) -> f64 {
        self.t_args.get(index).copied().unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.t_args.is_empty() && self.i_args.is_empty() && self.b_args.is_empty()
    }
}

/// What a compute body sees: validated inputs, arguments and the calling node
pub struct OpContext<'a> {
    pub descriptor: &'a OpDescriptor,
    pub inputs: &'a [&'a Tensor],
    pub args: &'a OpArgs,
    pub node_id: Option<i32>,
}

impl<'a> OpContext<'a> {
    /// Input `slot`; arity was checked before the body runs
    pub fn input(&self, slot: usize) -> &'a Tensor {
        self.inputs[slot]
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }
}

/// Output shapes for the given inputs
pub type ShapeFn = fn(&OpContext<'_>) -> GraphResult<Vec<Vec<usize>>>;

/// Writes results into pre-allocated output tensors
pub type ComputeFn = fn(&OpContext<'_>, &mut [Tensor]) -> GraphResult<()>;

/// A registered operator: its descriptor plus shape and compute bodies
pub struct OpDef {
    descriptor: OpDescriptor,
    shape_fn: ShapeFn,
    compute_fn: ComputeFn,
}

impl std::fmt::Debug for OpDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpDef")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl OpDef {
    pub fn new(descriptor: OpDescriptor, shape_fn: ShapeFn, compute_fn: ComputeFn) -> Self {
        Self {
            descriptor,
            shape_fn,
            compute_fn,
        }
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn descriptor(&self) -> &OpDescriptor {
        &self.descriptor
    }

    /// Validate `inputs` and `args` then run the operator.
    ///
    /// Errors raised by validation or by the body are tagged with `node_id`.
    /// Nothing is returned unless every check and the body succeed.
    pub fn dispatch(
        &self,
        inputs: &[&Tensor],
        args: &OpArgs,
        node_id: Option<i32>,
    ) -> GraphResult<Vec<Tensor>> {
        let result = self.dispatch_inner(inputs, args, node_id);
        match node_id {
            Some(id) => result.map_err(|e| e.at_node(id)),
            None => result,
        }
    }

    fn dispatch_inner(
        &self,
        inputs: &[&Tensor],
        args: &OpArgs,
        node_id: Option<i32>,
    ) -> GraphResult<Vec<Tensor>> {
        let desc = &self.descriptor;
        desc.check_arity(inputs.len())?;
        desc.check_args(args)?;
        desc.check_input_types(inputs)?;
        let dtypes = desc.resolve_output_types(inputs)?;

        let ctx = OpContext {
            descriptor: desc,
            inputs,
            args,
            node_id,
        };

        let shapes = (self.shape_fn)(&ctx)?;
        if shapes.len() != dtypes.len() {
            return Err(GraphError::shape(
                desc.name(),
                format!(
                    "shape function produced {} shapes for {} outputs",
                    shapes.len(),
                    dtypes.len()
                ),
            ));
        }

        let mut outputs: Vec<Tensor> = dtypes
            .into_iter()
            .zip(shapes)
            .map(|(dtype, shape)| Tensor::zeros(dtype, shape))
            .collect();

        (self.compute_fn)(&ctx, &mut outputs)?;
        Ok(outputs)
    }
}
