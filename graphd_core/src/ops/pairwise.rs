//! Pairwise arithmetic with scalar broadcasting
//!
//! Operands must share an element type. Shapes must match unless one side
//! holds a single element, which is broadcast over the other.

use crate::error::{Direction, GraphError, GraphResult};
use crate::ops::{ComputeFn, OpContext, OpDef, OpDescriptor, OpRegistry, TypeSet};
use crate::tensor::{element_count, DataType, Tensor};

pub fn register(registry: &mut OpRegistry) -> GraphResult<()> {
    let kinds: [(&str, &str, ComputeFn, ComputeFn); 3] = [
        ("add", "add_bp", add, add_bp),
        ("subtract", "subtract_bp", subtract, subtract_bp),
        ("multiply", "multiply_bp", multiply, multiply_bp),
    ];
    for (name, backward, forward, gradient) in kinds {
        registry.register(OpDef::new(
            OpDescriptor::fixed(name, 2, 1)
                .with_input_types(TypeSet::numeric())
                .with_same_type(0)
                .with_backward(backward)
                .build()?,
            broadcast_shape,
            forward,
        ))?;
        registry.register(OpDef::new(
            OpDescriptor::fixed(backward, 3, 2)
                .with_input_types(TypeSet::floats())
                .with_same_type(0)
                .build()?,
            operand_shapes,
            gradient,
        ))?;
    }
    Ok(())
}

fn check_same_dtype(ctx: &OpContext<'_>) -> GraphResult<()> {
    let lhs = ctx.input(0).dtype();
    let rhs = ctx.input(1).dtype();
    if lhs != rhs {
        return Err(GraphError::TypeMismatch {
            op: ctx.name().to_string(),
            node: None,
            direction: Direction::Input,
            slot: 1,
            dtype: rhs,
        });
    }
    Ok(())
}

/// Shape of `a op b`, or `None` when the operands cannot be combined
pub fn broadcast(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    if a == b {
        Some(a.to_vec())
    } else if element_count(a) == 1 {
        Some(b.to_vec())
    } else if element_count(b) == 1 {
        Some(a.to_vec())
    } else {
        None
    }
}

fn broadcast_shape(ctx: &OpContext<'_>) -> GraphResult<Vec<Vec<usize>>> {
    check_same_dtype(ctx)?;
    let (a, b) = (ctx.input(0).shape(), ctx.input(1).shape());
    broadcast(a, b)
        .map(|shape| vec![shape])
        .ok_or_else(|| {
            GraphError::shape(ctx.name(), format!("cannot broadcast {:?} with {:?}", a, b))
        })
}

fn operand_shapes(ctx: &OpContext<'_>) -> GraphResult<Vec<Vec<usize>>> {
    check_same_dtype(ctx)?;
    let (x, y, eps) = (ctx.input(0), ctx.input(1), ctx.input(2));
    match broadcast(x.shape(), y.shape()) {
        Some(shape) if shape == eps.shape() => Ok(vec![x.shape().to_vec(), y.shape().to_vec()]),
        _ => Err(GraphError::shape(
            ctx.name(),
            format!(
                "gradient {:?} does not match operands {:?} and {:?}",
                eps.shape(),
                x.shape(),
                y.shape()
            ),
        )),
    }
}

fn at<T: Copy>(values: &[T], i: usize) -> T {
    if values.len() == 1 {
        values[0]
    } else {
        values[i]
    }
}

/// Integer operands are combined exactly with `checked`; floats go through `f`
fn zip_broadcast<F, C>(
    ctx: &OpContext<'_>,
    outputs: &mut [Tensor],
    f: F,
    checked: C,
) -> GraphResult<()>
where
    F: Fn(f64, f64) -> f64,
    C: Fn(i64, i64) -> Option<i64>,
{
    if let (Some(a), Some(b)) = (ctx.input(0).to_i64_vec(), ctx.input(1).to_i64_vec()) {
        let narrow = outputs[0].dtype() == DataType::Int32;
        let overflow = || GraphError::ArithmeticOverflow {
            op: ctx.name().to_string(),
            node: None,
        };
        let values = (0..outputs[0].len())
            .map(|i| {
                checked(at(&a, i), at(&b, i))
                    .filter(|&v| !narrow || i32::try_from(v).is_ok())
                    .ok_or_else(overflow)
            })
            .collect::<GraphResult<Vec<i64>>>()?;
        return outputs[0].fill_from_i64(&values);
    }

    let a = ctx.input(0).to_f64_vec();
    let b = ctx.input(1).to_f64_vec();
    let values: Vec<f64> = (0..outputs[0].len()).map(|i| f(at(&a, i), at(&b, i))).collect();
    outputs[0].fill_from_f64(&values)
}

/// Sum a full-size gradient down to an operand that was broadcast
fn reduce_to(grad: Vec<f64>, target: &Tensor) -> Vec<f64> {
    if target.len() == grad.len() {
        grad
    } else {
        vec![grad.iter().sum()]
    }
}

fn write_operand_grads(
    outputs: &mut [Tensor],
    gx: Vec<f64>,
    gy: Vec<f64>,
    x: &Tensor,
    y: &Tensor,
) -> GraphResult<()> {
    outputs[0].fill_from_f64(&reduce_to(gx, x))?;
    outputs[1].fill_from_f64(&reduce_to(gy, y))
}

fn add(ctx: &OpContext<'_>, outputs: &mut [Tensor]) -> GraphResult<()> {
    zip_broadcast(ctx, outputs, |a, b| a + b, i64::checked_add)
}

fn subtract(ctx: &OpContext<'_>, outputs: &mut [Tensor]) -> GraphResult<()> {
    zip_broadcast(ctx, outputs, |a, b| a - b, i64::checked_sub)
}

fn multiply(ctx: &OpContext<'_>, outputs: &mut [Tensor]) -> GraphResult<()> {
    zip_broadcast(ctx, outputs, |a, b| a * b, i64::checked_mul)
}

fn add_bp(ctx: &OpContext<'_>, outputs: &mut [Tensor]) -> GraphResult<()> {
    let eps = ctx.input(2).to_f64_vec();
    write_operand_grads(outputs, eps.clone(), eps, ctx.input(0), ctx.input(1))
}

fn subtract_bp(ctx: &OpContext<'_>, outputs: &mut [Tensor]) -> GraphResult<()> {
    let eps = ctx.input(2).to_f64_vec();
    let negated = eps.iter().map(|e| -e).collect();
    write_operand_grads(outputs, eps, negated, ctx.input(0), ctx.input(1))
}

fn multiply_bp(ctx: &OpContext<'_>, outputs: &mut [Tensor]) -> GraphResult<()> {
    let x = ctx.input(0).to_f64_vec();
    let y = ctx.input(1).to_f64_vec();
    let eps = ctx.input(2).to_f64_vec();
    let gx = eps.iter().enumerate().map(|(i, e)| e * at(&y, i)).collect();
    let gy = eps.iter().enumerate().map(|(i, e)| e * at(&x, i)).collect();
    write_operand_grads(outputs, gx, gy, ctx.input(0), ctx.input(1))
}
