//! Operator descriptors, dispatch and the builtin operator catalogue
//!
//! Every node in an execution graph is bound to an [`OpDef`]: an immutable
//! [`OpDescriptor`] describing arity and element types, plus a shape function
//! and a compute body. [`OpDef::dispatch`] validates concrete tensors against
//! the descriptor before the body runs.

pub mod activation;
pub mod assert;
pub mod descriptor;
pub mod dispatch;
pub mod pairwise;
pub mod registry;
pub mod shape;

pub use descriptor::{OpDescriptor, TypeSet};
pub use dispatch::{ComputeFn, OpArgs, OpContext, OpDef, ShapeFn};
pub use registry::OpRegistry;

use crate::error::GraphResult;
use crate::tensor::Tensor;

/// Output 0 takes the shape of input 0
pub(crate) fn shape_of_input0(ctx: &OpContext<'_>) -> GraphResult<Vec<Vec<usize>>> {
    Ok(vec![ctx.input(0).shape().to_vec()])
}

/// Apply `f` to every element of input 0 into output 0
pub(crate) fn map_unary<F>(ctx: &OpContext<'_>, outputs: &mut [Tensor], f: F) -> GraphResult<()>
where
    F: Fn(f64) -> f64,
{
    let values: Vec<f64> = ctx.input(0).to_f64_vec().into_iter().map(f).collect();
    outputs[0].fill_from_f64(&values)
}

/// Apply `f(x, eps)` over inputs 0 and 1 into output 0
pub(crate) fn map_with_gradient<F>(
    ctx: &OpContext<'_>,
    outputs: &mut [Tensor],
    f: F,
) -> GraphResult<()>
where
    F: Fn(f64, f64) -> f64,
{
    let x = ctx.input(0).to_f64_vec();
    let eps = ctx.input(1).to_f64_vec();
    let values: Vec<f64> = x.into_iter().zip(eps).map(|(x, e)| f(x, e)).collect();
    outputs[0].fill_from_f64(&values)
}

/// Gradient ops need the upstream gradient shaped like the forward input
pub(crate) fn gradient_shape(ctx: &OpContext<'_>) -> GraphResult<Vec<Vec<usize>>> {
    let x = ctx.input(0);
    let eps = ctx.input(1);
    if x.shape() != eps.shape() {
        return Err(crate::error::GraphError::shape(
            ctx.name(),
            format!(
                "gradient shape {:?} does not match input shape {:?}",
                eps.shape(),
                x.shape()
            ),
        ));
    }
    Ok(vec![x.shape().to_vec()])
}
