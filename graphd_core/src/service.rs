//! Transport-independent handling of the four graph verbs
//!
//! [`InferenceService`] holds no per-connection state: the graph id carried
//! by each request is the only link between calls. Every failure becomes a
//! status on the response, never a panic or a dropped connection.

use crate::error::GraphError;
use crate::graph::{AbortSignal, Binding, GraphDefinition};
use crate::protocol::{FlatResponse, FlatResult, Request, Response};
use crate::registry::{GraphId, GraphRegistry};
use std::sync::Arc;
use std::time::Duration;

pub struct InferenceService {
    registry: Arc<GraphRegistry>,
    inference_timeout: Option<Duration>,
}

impl Default for InferenceService {
    fn default() -> Self {
        Self::new(Arc::new(GraphRegistry::default()))
    }
}

impl InferenceService {
    pub fn new(registry: Arc<GraphRegistry>) -> Self {
        Self {
            registry,
            inference_timeout: None,
        }
    }

    /// Abort every inference that runs longer than `timeout`
    pub fn with_inference_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inference_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<GraphRegistry> {
        &self.registry
    }

    pub fn register_graph(&self, graph_id: GraphId, definition: &GraphDefinition) -> FlatResponse {
        let result = self.registry.register(graph_id.clone(), definition);
        outcome("RegisterGraph", &graph_id, result.map(|_| ()))
    }

    pub fn forget_graph(&self, graph_id: &GraphId) -> FlatResponse {
        outcome("ForgetGraph", graph_id, self.registry.forget(graph_id))
    }

    pub fn replace_graph(&self, graph_id: GraphId, definition: &GraphDefinition) -> FlatResponse {
        let result = self.registry.replace(graph_id.clone(), definition);
        outcome("ReplaceGraph", &graph_id, result.map(|_| ()))
    }

    /// Evaluate the graph currently registered under `graph_id`
    pub fn infer(&self, graph_id: &GraphId, bindings: Vec<Binding>) -> FlatResult {
        let abort = match self.inference_timeout {
            Some(timeout) => AbortSignal::with_timeout(timeout),
            None => AbortSignal::new(),
        };
        self.infer_with(graph_id, bindings, &abort)
    }

    /// Like [`infer`](Self::infer) with a caller-owned abort signal
    pub fn infer_with(
        &self,
        graph_id: &GraphId,
        bindings: Vec<Binding>,
        abort: &AbortSignal,
    ) -> FlatResult {
        let entry = match self.registry.lookup(graph_id) {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("InferenceRequest for '{}': {}", graph_id, e);
                return FlatResult::from(&e);
            }
        };

        // The Arc keeps this version alive even if it is replaced or forgotten meanwhile
        match entry.graph.evaluate(bindings, abort) {
            Ok(outputs) => {
                log::debug!(
                    "InferenceRequest for '{}' served by version {}",
                    graph_id,
                    entry.version
                );
                FlatResult::ok(entry.version, outputs)
            }
            Err(e) => {
                log_failure("InferenceRequest", graph_id, &e);
                FlatResult::from(&e)
            }
        }
    }

    pub fn handle(&self, request: Request) -> Response {
        match request {
            Request::RegisterGraph {
                graph_id,
                definition,
            } => Response::Outcome(self.register_graph(graph_id, &definition)),
            Request::ForgetGraph { graph_id } => Response::Outcome(self.forget_graph(&graph_id)),
            Request::ReplaceGraph {
                graph_id,
                definition,
            } => Response::Outcome(self.replace_graph(graph_id, &definition)),
            Request::Inference { graph_id, bindings } => {
                Response::Result(self.infer(&graph_id, bindings))
            }
        }
    }
}

fn outcome(verb: &str, graph_id: &GraphId, result: Result<(), GraphError>) -> FlatResponse {
    match result {
        Ok(()) => FlatResponse::ok(),
        Err(e) => {
            log_failure(verb, graph_id, &e);
            FlatResponse::from(&e)
        }
    }
}

fn log_failure(verb: &str, graph_id: &GraphId, err: &GraphError) {
    match err {
        GraphError::NotFound(_) | GraphError::AlreadyExists(_) => {
            log::debug!("{} for '{}': {}", verb, graph_id, err)
        }
        _ => log::warn!("{} for '{}' failed: {}", verb, graph_id, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{InputRef, NodeDef};
    use crate::protocol::Status;
    use crate::tensor::Tensor;
    use approx::assert_relative_eq;

    fn elu_graph() -> GraphDefinition {
        GraphDefinition::new()
            .placeholder("x")
            .node(NodeDef::new(1, "elu").input(InputRef::placeholder("x")))
            .output(InputRef::node(1))
    }

    #[test]
    fn test_elu_inference() {
        let service = InferenceService::default();
        assert!(service.register_graph("g1".into(), &elu_graph()).status.is_ok());

        let result = service.infer(
            &"g1".into(),
            vec![Binding::named("x", Tensor::vector(vec![-2.0f32, 0.0, 3.0]))],
        );
        assert_eq!(result.status, Status::Ok);
        assert_eq!(result.graph_version, 1);

        let y = result.outputs[0].tensor.to_f64_vec();
        assert_relative_eq!(y[0], -0.8647, epsilon = 1e-4);
        assert_relative_eq!(y[1], 0.0);
        assert_relative_eq!(y[2], 3.0);
    }

    #[test]
    fn test_unknown_graph_is_not_found() {
        let service = InferenceService::default();
        let result = service.infer(&"missing".into(), vec![]);
        assert_eq!(result.status, Status::NotFound);
        assert!(result.outputs.is_empty());

        assert_eq!(service.forget_graph(&"missing".into()).status, Status::NotFound);
        assert_eq!(
            service.replace_graph("missing".into(), &elu_graph()).status,
            Status::NotFound
        );
    }

    #[test]
    fn test_invalid_graph_status() {
        let service = InferenceService::default();
        let cyclic = GraphDefinition::new()
            .node(NodeDef::new(1, "identity").input(InputRef::node(1)))
            .output(InputRef::node(1));
        let response = service.register_graph("c".into(), &cyclic);
        assert_eq!(response.status, Status::InvalidGraph);
        assert!(response.message.is_some());
        assert!(service.registry().is_empty());
    }

    #[test]
    fn test_wrong_input_count_is_invalid_graph() {
        let service = InferenceService::default();
        let short_add = GraphDefinition::new()
            .placeholder("x")
            .node(NodeDef::new(1, "add").input(InputRef::placeholder("x")))
            .output(InputRef::node(1));
        let response = service.register_graph("short".into(), &short_add);
        assert_eq!(response.status, Status::InvalidGraph);
        assert!(response.message.unwrap().contains("node [1]"));
        assert!(service.registry().is_empty());
    }

    #[test]
    fn test_handle_dispatches_verbs() {
        let service = InferenceService::default();
        let register = service.handle(Request::RegisterGraph {
            graph_id: "g".into(),
            definition: elu_graph(),
        });
        assert_eq!(register.status(), Status::Ok);

        let duplicate = service.handle(Request::RegisterGraph {
            graph_id: "g".into(),
            definition: elu_graph(),
        });
        assert_eq!(duplicate.status(), Status::AlreadyExists);

        let forget = service.handle(Request::ForgetGraph {
            graph_id: "g".into(),
        });
        assert_eq!(forget.status(), Status::Ok);

        let infer = service.handle(Request::Inference {
            graph_id: "g".into(),
            bindings: vec![],
        });
        assert_eq!(infer.status(), Status::NotFound);
    }

    #[test]
    fn test_zero_timeout_cancels() {
        let service = InferenceService::default().with_inference_timeout(Some(Duration::ZERO));
        service.register_graph("g".into(), &elu_graph());
        let result = service.infer(&"g".into(), vec![Binding::positional(Tensor::scalar(1.0f32))]);
        assert_eq!(result.status, Status::Cancelled);
    }

    #[test]
    fn test_missing_binding_is_bad_request() {
        let service = InferenceService::default();
        service.register_graph("g".into(), &elu_graph());
        let result = service.infer(&"g".into(), vec![]);
        assert_eq!(result.status, Status::BadRequest);
    }
}
