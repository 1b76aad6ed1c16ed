//! Precondition operator that aborts evaluation when its input is falsy

use crate::error::{GraphError, GraphResult};
use crate::ops::{OpContext, OpDef, OpDescriptor, OpRegistry, TypeSet};
use crate::tensor::Tensor;

pub fn register(registry: &mut OpRegistry) -> GraphResult<()> {
    registry.register(OpDef::new(
        OpDescriptor::fixed("Assert", 1, 1)
            .with_input_types(TypeSet::any())
            .with_same_type(0)
            .build()?,
        super::shape_of_input0,
        check,
    ))
}

/// Passes the input through unchanged when every element is truthy
fn check(ctx: &OpContext<'_>, outputs: &mut [Tensor]) -> GraphResult<()> {
    let x = ctx.input(0);
    if !x.all_truthy() {
        return Err(GraphError::Assertion {
            node: ctx.node_id.unwrap_or(-1),
        });
    }
    outputs[0].copy_elements_from(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::OpArgs;

    #[test]
    fn test_false_scalar_fails_with_node_id() {
        let registry = OpRegistry::builtin().unwrap();
        let op = registry.resolve("Assert").unwrap();
        let flag = Tensor::scalar(false);
        let err = op.dispatch(&[&flag], &OpArgs::default(), Some(5)).unwrap_err();
        assert!(matches!(err, GraphError::Assertion { node: 5 }));
    }

    #[test]
    fn test_truthy_input_passes_through() {
        let registry = OpRegistry::builtin().unwrap();
        let op = registry.resolve("Assert").unwrap();
        let x = Tensor::vector(vec![1i64, 2, 3]);
        let out = op.dispatch(&[&x], &OpArgs::default(), Some(1)).unwrap();
        assert_eq!(out[0], x);
    }
}
