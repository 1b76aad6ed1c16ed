//! Elementwise activations and their gradient kinds

use super::{gradient_shape, map_unary, map_with_gradient, shape_of_input0};
use crate::error::GraphResult;
use crate::ops::{OpContext, OpDef, OpDescriptor, OpRegistry, TypeSet};
use crate::tensor::Tensor;

/// Default `alpha` for ELU when the node carries no t-arg
pub const DEFAULT_ELU_ALPHA: f64 = 1.0;

/// Default `relu` cutoff
pub const DEFAULT_RELU_CUTOFF: f64 = 0.0;

pub fn register(registry: &mut OpRegistry) -> GraphResult<()> {
    registry.register(OpDef::new(
        OpDescriptor::fixed("elu", 1, 1)
            .with_input_slot(0, TypeSet::any())
            .with_output_slot(0, TypeSet::floats())
            .with_t_args()
            .with_backward("elu_bp")
            .build()?,
        shape_of_input0,
        elu,
    ))?;
    registry.register(OpDef::new(
        OpDescriptor::fixed("elu_bp", 2, 1)
            .with_input_slot(0, TypeSet::any())
            .with_input_slot(1, TypeSet::floats())
            .with_output_slot(0, TypeSet::floats())
            .with_t_args()
            .build()?,
        gradient_shape,
        elu_bp,
    ))?;

    registry.register(OpDef::new(
        OpDescriptor::fixed("relu", 1, 1)
            .with_input_types(TypeSet::floats())
            .with_same_type(0)
            .with_t_args()
            .with_backward("relu_bp")
            .build()?,
        shape_of_input0,
        relu,
    ))?;
    registry.register(OpDef::new(
        OpDescriptor::fixed("relu_bp", 2, 1)
            .with_input_types(TypeSet::floats())
            .with_same_type(0)
            .with_t_args()
            .build()?,
        gradient_shape,
        relu_bp,
    ))?;

    registry.register(OpDef::new(
        OpDescriptor::fixed("sigmoid", 1, 1)
            .with_input_types(TypeSet::floats())
            .with_same_type(0)
            .with_backward("sigmoid_bp")
            .build()?,
        shape_of_input0,
        sigmoid,
    ))?;
    registry.register(OpDef::new(
        OpDescriptor::fixed("sigmoid_bp", 2, 1)
            .with_input_types(TypeSet::floats())
            .with_same_type(0)
            .build()?,
        gradient_shape,
        sigmoid_bp,
    ))?;

    Ok(())
}

fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn elu(ctx: &OpContext<'_>, outputs: &mut [Tensor]) -> GraphResult<()> {
    let alpha = ctx.args.t_arg(0, DEFAULT_ELU_ALPHA);
    map_unary(ctx, outputs, |x| if x < 0.0 { alpha * (x.exp() - 1.0) } else { x })
}

fn elu_bp(ctx: &OpContext<'_>, outputs: &mut [Tensor]) -> GraphResult<()> {
    let alpha = ctx.args.t_arg(0, DEFAULT_ELU_ALPHA);
    map_with_gradient(ctx, outputs, |x, eps| {
        if x < 0.0 {
            eps * alpha * x.exp()
        } else {
            eps
        }
    })
}

fn relu(ctx: &OpContext<'_>, outputs: &mut [Tensor]) -> GraphResult<()> {
    let cutoff = ctx.args.t_arg(0, DEFAULT_RELU_CUTOFF);
    map_unary(ctx, outputs, |x| if x > cutoff { x } else { 0.0 })
}

fn relu_bp(ctx: &OpContext<'_>, outputs: &mut [Tensor]) -> GraphResult<()> {
    let cutoff = ctx.args.t_arg(0, DEFAULT_RELU_CUTOFF);
    map_with_gradient(ctx, outputs, |x, eps| if x > cutoff { eps } else { 0.0 })
}

fn sigmoid(ctx: &OpContext<'_>, outputs: &mut [Tensor]) -> GraphResult<()> {
    map_unary(ctx, outputs, logistic)
}

fn sigmoid_bp(ctx: &OpContext<'_>, outputs: &mut [Tensor]) -> GraphResult<()> {
    map_with_gradient(ctx, outputs, |x, eps| {
        let s = logistic(x);
        eps * s * (1.0 - s)
    })
}

#[cfg(test)]
mod tests {
    use crate::ops::{OpArgs, OpRegistry};
    use crate::tensor::{DataType, Tensor};
    use approx::assert_relative_eq;

    fn run(op: &str, inputs: &[&Tensor], args: OpArgs) -> Vec<f64> {
        let registry = OpRegistry::builtin().unwrap();
        let out = registry.resolve(op).unwrap().dispatch(inputs, &args, None).unwrap();
        out[0].to_f64_vec()
    }

    #[test]
    fn test_elu_default_alpha() {
        let x = Tensor::vector(vec![-2.0f32, 0.0, 3.0]);
        let y = run("elu", &[&x], OpArgs::default());
        assert_relative_eq!(y[0], -0.864_664_7, epsilon = 1e-5);
        assert_eq!(y[1], 0.0);
        assert_eq!(y[2], 3.0);
    }

    #[test]
    fn test_elu_alpha_argument() {
        let x = Tensor::vector(vec![-1.0f64]);
        let y = run("elu", &[&x], OpArgs::default().with_t(0.5));
        assert_relative_eq!(y[0], 0.5 * ((-1.0f64).exp() - 1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_elu_integer_input_produces_float_output() {
        let registry = OpRegistry::builtin().unwrap();
        let x = Tensor::vector(vec![-1i32, 2]);
        let out = registry
            .resolve("elu")
            .unwrap()
            .dispatch(&[&x], &OpArgs::default(), None)
            .unwrap();
        assert_eq!(out[0].dtype(), DataType::Float32);
        assert_eq!(out[0].to_f64_vec()[1], 2.0);
    }

    #[test]
    fn test_elu_bp() {
        let x = Tensor::vector(vec![-1.0f64, 2.0]);
        let eps = Tensor::vector(vec![2.0f64, 3.0]);
        let g = run("elu_bp", &[&x, &eps], OpArgs::default());
        assert_relative_eq!(g[0], 2.0 * (-1.0f64).exp(), epsilon = 1e-12);
        assert_eq!(g[1], 3.0);
    }

    #[test]
    fn test_relu_and_gradient() {
        let x = Tensor::vector(vec![-1.0f32, 0.5, 2.0]);
        assert_eq!(run("relu", &[&x], OpArgs::default()), vec![0.0, 0.5, 2.0]);
        assert_eq!(run("relu", &[&x], OpArgs::default().with_t(1.0)), vec![0.0, 0.0, 2.0]);

        let eps = Tensor::vector(vec![1.0f32, 1.0, 1.0]);
        assert_eq!(run("relu_bp", &[&x, &eps], OpArgs::default()), vec![0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_sigmoid_gradient_at_zero() {
        let x = Tensor::vector(vec![0.0f64]);
        let eps = Tensor::vector(vec![1.0f64]);
        assert_relative_eq!(run("sigmoid", &[&x], OpArgs::default())[0], 0.5);
        assert_relative_eq!(run("sigmoid_bp", &[&x, &eps], OpArgs::default())[0], 0.25);
    }

    #[test]
    fn test_gradient_shape_mismatch() {
        let registry = OpRegistry::builtin().unwrap();
        let x = Tensor::vector(vec![0.0f64, 1.0]);
        let eps = Tensor::vector(vec![1.0f64]);
        assert!(registry
            .resolve("sigmoid_bp")
            .unwrap()
            .dispatch(&[&x, &eps], &OpArgs::default(), Some(3))
            .is_err());
    }
}
