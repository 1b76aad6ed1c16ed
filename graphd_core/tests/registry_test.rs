// Registry and service behaviour under the four graph verbs
use graphd_core::error::Direction;
use graphd_core::{
    Binding, DataType, GraphDefinition, GraphError, GraphId, GraphRegistry, InferenceService,
    InputRef, NodeDef, OpArgs, OpDef, OpDescriptor, OpRegistry, Status, Tensor, TypeSet,
};
use graphd_core::TensorData;
use serde::Serialize;
use std::sync::{Arc, Barrier};

fn elu_graph() -> GraphDefinition {
    GraphDefinition::new()
        .placeholder("x")
        .node(NodeDef::new(1, "elu").input(InputRef::placeholder("x")))
        .output(InputRef::node(1))
}

/// Outputs (x, 2x)
fn doubling_graph() -> GraphDefinition {
    GraphDefinition::new()
        .placeholder("x")
        .node(NodeDef::new(1, "identity").input(InputRef::placeholder("x")))
        .node(
            NodeDef::new(2, "add")
                .input(InputRef::node(1))
                .input(InputRef::node(1)),
        )
        .output(InputRef::node(1))
        .output(InputRef::node(2))
}

/// Outputs (x*x, x*x - x)
fn squaring_graph() -> GraphDefinition {
    GraphDefinition::new()
        .placeholder("x")
        .node(
            NodeDef::new(1, "multiply")
                .input(InputRef::placeholder("x"))
                .input(InputRef::placeholder("x")),
        )
        .node(
            NodeDef::new(2, "subtract")
                .input(InputRef::node(1))
                .input(InputRef::placeholder("x")),
        )
        .output(InputRef::node(1))
        .output(InputRef::node(2))
}

fn values(result: &graphd_core::FlatResult) -> Vec<f64> {
    result
        .outputs
        .iter()
        .flat_map(|o| o.tensor.to_f64_vec())
        .collect()
}

#[test]
fn test_second_register_fails_and_keeps_original() {
    let registry = GraphRegistry::default();
    let id = GraphId::from("g");
    registry.register(id.clone(), &elu_graph()).unwrap();

    let err = registry.register(id.clone(), &squaring_graph()).unwrap_err();
    assert!(matches!(err, GraphError::AlreadyExists(_)));

    let entry = registry.lookup(&id).unwrap();
    assert_eq!(entry.version, 1);
    assert_eq!(entry.graph.nodes()[0].op().name(), "elu");
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_replace_then_infer_sees_new_graph() {
    let service = InferenceService::default();
    service.register_graph("g".into(), &doubling_graph());
    assert!(service.replace_graph("g".into(), &squaring_graph()).status.is_ok());

    let result = service.infer(&"g".into(), vec![Binding::positional(Tensor::scalar(3.0f64))]);
    assert_eq!(result.status, Status::Ok);
    assert_eq!(result.graph_version, 2);
    assert_eq!(values(&result), vec![9.0, 6.0]);
}

#[test]
fn test_invalid_replace_leaves_old_graph() {
    let registry = GraphRegistry::default();
    let id = GraphId::from("g");
    registry.register(id.clone(), &doubling_graph()).unwrap();

    let broken = GraphDefinition::new()
        .placeholder("x")
        .node(NodeDef::new(1, "relu").input(InputRef::node(2)))
        .output(InputRef::node(1));
    assert!(matches!(
        registry.replace(id.clone(), &broken),
        Err(GraphError::UnresolvedReference { node: Some(1), .. })
    ));
    assert_eq!(registry.lookup(&id).unwrap().version, 1);
}

#[test]
fn test_forget_semantics() {
    let registry = GraphRegistry::default();
    let id = GraphId::from(12i64);

    assert!(matches!(registry.forget(&id), Err(GraphError::NotFound(_))));
    assert!(registry.is_empty());

    registry.register(id.clone(), &elu_graph()).unwrap();
    let held = registry.lookup(&id).unwrap();
    registry.forget(&id).unwrap();

    assert!(matches!(registry.lookup(&id), Err(GraphError::NotFound(_))));
    // A handle taken before the forget still evaluates
    let out = held
        .graph
        .evaluate(
            vec![Binding::positional(Tensor::scalar(1.0f32))],
            &graphd_core::AbortSignal::new(),
        )
        .unwrap();
    assert_eq!(out[0].tensor.to_f64_vec(), vec![1.0]);
}

#[test]
fn test_back_reference_cycle_is_never_inserted() {
    let registry = GraphRegistry::default();
    let cyclic = GraphDefinition::new()
        .placeholder("x")
        .node(
            NodeDef::new(1, "add")
                .input(InputRef::placeholder("x"))
                .input(InputRef::node(2)),
        )
        .node(NodeDef::new(2, "relu").input(InputRef::node(1)))
        .output(InputRef::node(2));

    let err = registry.register("loop".into(), &cyclic).unwrap_err();
    assert!(matches!(err, GraphError::Cycle { .. }));
    assert_eq!(registry.len(), 0);
}

#[test]
fn test_float_slot_rejects_integer_tensor() {
    fn passthrough_shape(
        ctx: &graphd_core::ops::OpContext<'_>,
    ) -> graphd_core::GraphResult<Vec<Vec<usize>>> {
        Ok(vec![ctx.input(0).shape().to_vec()])
    }
    fn passthrough(
        ctx: &graphd_core::ops::OpContext<'_>,
        outputs: &mut [Tensor],
    ) -> graphd_core::GraphResult<()> {
        outputs[0].copy_elements_from(ctx.input(0))
    }

    let mut ops = OpRegistry::new();
    ops.register(OpDef::new(
        OpDescriptor::fixed("float_only", 1, 1)
            .with_input_slot(0, TypeSet::floats())
            .with_same_type(0)
            .build()
            .unwrap(),
        passthrough_shape,
        passthrough,
    ))
    .unwrap();

    let op = ops.resolve("float_only").unwrap();
    let ints = Tensor::vector(vec![1i32, 2]);
    match op.dispatch(&[&ints], &OpArgs::default(), None) {
        Err(GraphError::TypeMismatch {
            slot: 0,
            direction: Direction::Input,
            dtype: DataType::Int32,
            ..
        }) => {}
        other => panic!("expected type mismatch on slot 0, got {:?}", other),
    }
}

#[test]
fn test_assertion_failure_keeps_graph_registered() {
    let service = InferenceService::default();
    let definition = GraphDefinition::new()
        .placeholder("flag")
        .node(NodeDef::new(5, "Assert").input(InputRef::placeholder("flag")))
        .output(InputRef::node(5));
    service.register_graph("g2".into(), &definition);

    let result = service.infer(&"g2".into(), vec![Binding::named("flag", Tensor::scalar(false))]);
    assert_eq!(result.status, Status::AssertionFailed);
    assert!(result.message.unwrap().contains("[5]"));
    assert!(result.outputs.is_empty());
    assert!(service.registry().contains(&"g2".into()));

    let ok = service.infer(&"g2".into(), vec![Binding::named("flag", Tensor::scalar(true))]);
    assert_eq!(ok.status, Status::Ok);
}

#[test]
fn test_dispatch_error_reported_with_status() {
    let service = InferenceService::default();
    let definition = GraphDefinition::new()
        .placeholder("x")
        .node(NodeDef::new(3, "sigmoid").input(InputRef::placeholder("x")))
        .output(InputRef::node(3));
    service.register_graph("s".into(), &definition);

    let result = service.infer(&"s".into(), vec![Binding::positional(Tensor::vector(vec![1i64]))]);
    assert_eq!(result.status, Status::DispatchFailed);
    assert!(result.message.unwrap().contains("node [3]"));
}

#[test]
fn test_replace_races_inference() {
    let service = Arc::new(InferenceService::default());
    service.register_graph("g1".into(), &doubling_graph());

    let barrier = Arc::new(Barrier::new(101));
    let mut handles = Vec::new();

    for _ in 0..100 {
        let service = service.clone();
        let barrier = barrier.clone();
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            service.infer(&"g1".into(), vec![Binding::positional(Tensor::scalar(3.0f64))])
        }));
    }

    {
        let service = service.clone();
        let barrier = barrier.clone();
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            let response = service.replace_graph("g1".into(), &squaring_graph());
            assert!(response.status.is_ok());
            graphd_core::FlatResult::ok(0, Vec::new())
        }));
    }

    for handle in handles {
        let result = handle.join().unwrap();
        assert_eq!(result.status, Status::Ok);
        match result.graph_version {
            0 => {}
            1 => assert_eq!(values(&result), vec![3.0, 6.0]),
            2 => assert_eq!(values(&result), vec![9.0, 6.0]),
            other => panic!("unexpected version {}", other),
        }
    }

    assert_eq!(service.registry().lookup(&"g1".into()).unwrap().version, 2);
}

#[test]
fn test_gradient_through_registered_graph() {
    let registry = GraphRegistry::default();
    registry.register("grad".into(), &elu_graph()).unwrap();
    let entry = registry.lookup(&"grad".into()).unwrap();

    let grads = entry
        .graph
        .gradients(
            vec![Binding::positional(Tensor::vector(vec![-1.0f64, 2.0]))],
            vec![Tensor::vector(vec![1.0f64, 1.0])],
            &graphd_core::AbortSignal::new(),
        )
        .unwrap();
    let dx = grads[0].tensor.to_f64_vec();
    approx::assert_relative_eq!(dx[0], (-1.0f64).exp(), epsilon = 1e-12);
    approx::assert_relative_eq!(dx[1], 1.0);
}

#[test]
fn test_integer_overflow_reported_with_node() {
    let service = InferenceService::default();
    service.register_graph("sq".into(), &squaring_graph());

    let result = service.infer(&"sq".into(), vec![Binding::positional(Tensor::vector(vec![65_536i32]))]);
    assert_eq!(result.status, Status::DispatchFailed);
    assert!(result.message.unwrap().contains("node [1]"));

    let wide = service.infer(&"sq".into(), vec![Binding::positional(Tensor::vector(vec![65_536i64]))]);
    assert_eq!(wide.status, Status::Ok);
    assert_eq!(wide.outputs[0].tensor.as_i64(), Some(&[4_294_967_296i64][..]));
}

#[test]
fn test_decoded_tensor_with_overflowing_shape_is_bad_request() {
    // Same field layout as Tensor, without its constructor checks
    #[derive(Serialize)]
    struct UncheckedTensor {
        shape: Vec<usize>,
        data: TensorData,
    }

    let bytes = bincode::serialize(&UncheckedTensor {
        shape: vec![1 << 63, 2],
        data: TensorData::Float32(Vec::new()),
    })
    .unwrap();
    let tensor: Tensor = bincode::deserialize(&bytes).unwrap();

    let service = InferenceService::default();
    service.register_graph("g".into(), &elu_graph());
    let result = service.infer(&"g".into(), vec![Binding::positional(tensor)]);
    assert_eq!(result.status, Status::BadRequest);
}
