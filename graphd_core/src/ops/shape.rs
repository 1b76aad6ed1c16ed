//! Shape-only operators: the data is copied, never recomputed

use crate::error::{GraphError, GraphResult};
use crate::ops::{OpContext, OpDef, OpDescriptor, OpRegistry, TypeSet};
use crate::tensor::{element_count, Tensor};

pub fn register(registry: &mut OpRegistry) -> GraphResult<()> {
    registry.register(OpDef::new(
        OpDescriptor::fixed("squeeze", 1, 1)
            .with_input_types(TypeSet::any())
            .with_same_type(0)
            .with_i_args()
            .with_backward("squeeze_bp")
            .build()?,
        squeeze_shape,
        copy_elements,
    ))?;
    registry.register(OpDef::new(
        OpDescriptor::fixed("squeeze_bp", 2, 1)
            .with_input_slot(0, TypeSet::any())
            .with_input_slot(1, TypeSet::floats())
            .with_same_type(1)
            .build()?,
        unsqueeze_gradient_shape,
        copy_gradient,
    ))?;

    registry.register(OpDef::new(
        OpDescriptor::fixed("identity", 1, 1)
            .with_same_type(0)
            .with_backward("identity_bp")
            .build()?,
        super::shape_of_input0,
        copy_elements,
    ))?;
    registry.register(OpDef::new(
        OpDescriptor::fixed("identity_bp", 2, 1)
            .with_input_slot(1, TypeSet::floats())
            .with_same_type(1)
            .build()?,
        super::gradient_shape,
        copy_gradient,
    ))?;

    Ok(())
}

/// Shape left after dropping `axes` (every size-1 axis when empty).
///
/// Negative axes count from the end.
pub fn squeezed(shape: &[usize], axes: &[i64]) -> Result<Vec<usize>, String> {
    if axes.is_empty() {
        return Ok(shape.iter().copied().filter(|&d| d != 1).collect());
    }

    let rank = shape.len() as i64;
    let mut drop = vec![false; shape.len()];
    for &axis in axes {
        let resolved = if axis < 0 { axis + rank } else { axis };
        if resolved < 0 || resolved >= rank {
            return Err(format!("axis {} is out of range for rank {}", axis, rank));
        }
        let resolved = resolved as usize;
        if shape[resolved] != 1 {
            return Err(format!(
                "cannot squeeze axis {} of size {}",
                axis, shape[resolved]
            ));
        }
        drop[resolved] = true;
    }

    Ok(shape
        .iter()
        .zip(drop)
        .filter(|(_, dropped)| !dropped)
        .map(|(&d, _)| d)
        .collect())
}

fn squeeze_shape(ctx: &OpContext<'_>) -> GraphResult<Vec<Vec<usize>>> {
    squeezed(ctx.input(0).shape(), &ctx.args.i_args)
        .map(|shape| vec![shape])
        .map_err(|msg| GraphError::shape(ctx.name(), msg))
}

fn unsqueeze_gradient_shape(ctx: &OpContext<'_>) -> GraphResult<Vec<Vec<usize>>> {
    let x = ctx.input(0);
    let eps = ctx.input(1);
    if element_count(x.shape()) != eps.len() {
        return Err(GraphError::shape(
            ctx.name(),
            format!(
                "gradient {:?} cannot be reshaped to {:?}",
                eps.shape(),
                x.shape()
            ),
        ));
    }
    Ok(vec![x.shape().to_vec()])
}

fn copy_elements(ctx: &OpContext<'_>, outputs: &mut [Tensor]) -> GraphResult<()> {
    outputs[0].copy_elements_from(ctx.input(0))
}

fn copy_gradient(ctx: &OpContext<'_>, outputs: &mut [Tensor]) -> GraphResult<()> {
    outputs[0].copy_elements_from(ctx.input(1))
}
