/// Async client for a graphd server
///
/// One request is in flight at a time per client; replies are matched by
/// request id and anything else on the wire is skipped.
use anyhow::{bail, Context};
use graphd_core::protocol::{self, Envelope, FlatResponse, FlatResult, Reply, Request, Response};
use graphd_core::{Binding, GraphDefinition, GraphId};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::debug;

pub struct GraphClient {
    stream: TcpStream,
    next_request_id: u64,
    max_frame_bytes: usize,
}

impl GraphClient {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .context("Failed to connect to graphd")?;
        stream.set_nodelay(true)?;
        Ok(Self {
            stream,
            next_request_id: 1,
            max_frame_bytes: protocol::DEFAULT_MAX_FRAME_BYTES,
        })
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub async fn register_graph(
        &mut self,
        graph_id: impl Into<GraphId>,
        definition: GraphDefinition,
    ) -> anyhow::Result<FlatResponse> {
        let request = Request::RegisterGraph {
            graph_id: graph_id.into(),
            definition,
        };
        outcome(self.call(request).await?)
    }

    pub async fn forget_graph(&mut self, graph_id: impl Into<GraphId>) -> anyhow::Result<FlatResponse> {
        let request = Request::ForgetGraph {
            graph_id: graph_id.into(),
        };
        outcome(self.call(request).await?)
    }

    pub async fn replace_graph(
        &mut self,
        graph_id: impl Into<GraphId>,
        definition: GraphDefinition,
    ) -> anyhow::Result<FlatResponse> {
        let request = Request::ReplaceGraph {
            graph_id: graph_id.into(),
            definition,
        };
        outcome(self.call(request).await?)
    }

    pub async fn infer(
        &mut self,
        graph_id: impl Into<GraphId>,
        bindings: Vec<Binding>,
    ) -> anyhow::Result<FlatResult> {
        let request = Request::Inference {
            graph_id: graph_id.into(),
            bindings,
        };
        match self.call(request).await? {
            Response::Result(result) => Ok(result),
            // Server-side failures before evaluation come back as a bare outcome
            Response::Outcome(outcome) => Ok(FlatResult {
                status: outcome.status,
                message: outcome.message,
                graph_version: 0,
                outputs: Vec::new(),
            }),
        }
    }

    /// Send one request and wait for the reply carrying its id
    pub async fn call(&mut self, request: Request) -> anyhow::Result<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let envelope = Envelope {
            request_id,
            request,
        };
        let frame = protocol::frame(&protocol::encode(&envelope)?, self.max_frame_bytes)?;
        self.stream.write_all(&frame).await?;

        loop {
            let reply = self.read_reply().await?;
            if reply.request_id == request_id {
                return Ok(reply.response);
            }
            debug!(
                "Skipping reply {} while waiting for {}",
                reply.request_id, request_id
            );
        }
    }

    /// Write raw bytes as one frame, bypassing request encoding
    pub async fn send_raw_frame(&mut self, payload: &[u8]) -> anyhow::Result<Reply> {
        let frame = protocol::frame(payload, self.max_frame_bytes)?;
        self.stream.write_all(&frame).await?;
        self.read_reply().await
    }

    async fn read_reply(&mut self) -> anyhow::Result<Reply> {
        let mut len_buffer = [0u8; protocol::FRAME_HEADER_BYTES];
        self.stream
            .read_exact(&mut len_buffer)
            .await
            .context("Connection closed by graphd")?;
        let frame_len = u32::from_le_bytes(len_buffer) as usize;
        protocol::check_frame_len(frame_len, self.max_frame_bytes)?;

        let mut payload = vec![0u8; frame_len];
        self.stream.read_exact(&mut payload).await?;
        Ok(protocol::decode(&payload)?)
    }
}

fn outcome(response: Response) -> anyhow::Result<FlatResponse> {
    match response {
        Response::Outcome(outcome) => Ok(outcome),
        Response::Result(result) => bail!(
            "Unexpected inference result ({:?}) for a registry request",
            result.status
        ),
    }
}
