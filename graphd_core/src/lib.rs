//! # graphd core
//!
//! Serving layer for precompiled numeric computation graphs.
//!
//! - **Tensors**: small dense host tensors with an element type and shape
//! - **Operators**: static descriptors plus a validate-then-invoke dispatch step
//! - **Graphs**: validated, immutable DAGs of operator nodes
//! - **Registry**: the keyed store of live graphs, safe under concurrent access
//! - **Service**: the register / replace / forget / infer verbs and their wire form
//!
//! ## Quick Start
//!
//! ```rust
//! use graphd_core::{Binding, GraphDefinition, InferenceService, InputRef, NodeDef, Tensor};
//!
//! let service = InferenceService::default();
//! let definition = GraphDefinition::new()
//!     .placeholder("x")
//!     .node(NodeDef::new(1, "elu").input(InputRef::placeholder("x")))
//!     .output(InputRef::node(1));
//! service.register_graph("g1".into(), &definition);
//!
//! let result = service.infer(
//!     &"g1".into(),
//!     vec![Binding::named("x", Tensor::vector(vec![-2.0f32, 0.0, 3.0]))],
//! );
//! assert!(result.status.is_ok());
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod ops;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod tensor;

// Re-export commonly used types for easy access
pub use config::ServerConfig;
pub use error::{GraphError, GraphResult};
pub use graph::{AbortSignal, Binding, ExecutionGraph, GraphDefinition, InputRef, NamedTensor, NodeDef};
pub use ops::{OpArgs, OpDef, OpDescriptor, OpRegistry, TypeSet};
pub use protocol::{Envelope, FlatResponse, FlatResult, Reply, Request, Response, Status};
pub use registry::{GraphId, GraphInfo, GraphRegistry, RegisteredGraph};
pub use service::InferenceService;
pub use tensor::{DataType, Tensor, TensorData};
