/// TCP front end for the inference service
///
/// Clients send length-prefixed bincode envelopes. Each connection gets a
/// reader loop and a writer task; every decoded request is evaluated on the
/// blocking pool under a shared concurrency limit, so replies may come back
/// out of order and carry the id of the request they answer. A connection
/// stops reading once it has `max_concurrent_requests` requests in flight.
use graphd_core::protocol::{self, Envelope, Reply, Response, Status};
use graphd_core::{InferenceService, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

/// Shared state of a running server
pub struct GraphServer {
    config: ServerConfig,
    service: Arc<InferenceService>,
    permits: Arc<Semaphore>,
}

impl GraphServer {
    pub fn new(config: ServerConfig, service: Arc<InferenceService>) -> Arc<Self> {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));
        Arc::new(Self {
            config,
            service,
            permits,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<InferenceService> {
        &self.service
    }

    /// Bind to the configured address and serve forever
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let address = self.config.address();
        let listener = TcpListener::bind(&address).await?;
        info!("graphd listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                    }
                    let server = self.clone();
                    tokio::spawn(async move {
                        handle_tcp_client(stream, addr, server).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    /// Run one request on the blocking pool; a panicking handler becomes `Internal`
    async fn dispatch(self: Arc<Self>, envelope: Envelope) -> Reply {
        let request_id = envelope.request_id;
        let verb = envelope.request.verb();

        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return Reply {
                    request_id,
                    response: Response::failure(Status::Internal, "server is shutting down"),
                }
            }
        };

        let service = self.service.clone();
        let response =
            match tokio::task::spawn_blocking(move || service.handle(envelope.request)).await {
                Ok(response) => response,
                Err(e) => {
                    error!("{} handler for request {} failed: {}", verb, request_id, e);
                    Response::failure(Status::Internal, format!("{} handler failed", verb))
                }
            };

        Reply {
            request_id,
            response,
        }
    }
}

/// Encode and frame a reply for the writer task
fn encode_reply(reply: &Reply, max_frame_bytes: usize) -> Option<Vec<u8>> {
    let framed = protocol::encode(reply).and_then(|bytes| protocol::frame(&bytes, max_frame_bytes));
    match framed {
        Ok(frame) => Some(frame),
        Err(e) => {
            error!("Failed to encode reply {}: {}", reply.request_id, e);
            let fallback = Reply {
                request_id: reply.request_id,
                response: Response::failure(Status::Internal, e.to_string()),
            };
            protocol::encode(&fallback)
                .and_then(|bytes| protocol::frame(&bytes, max_frame_bytes))
                .ok()
        }
    }
}

/// Handle a single client connection (generic over stream type)
async fn handle_client_inner<S>(stream: S, addr: SocketAddr, server: Arc<GraphServer>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    info!("Client connected: {}", addr);
    let max_frame_bytes = server.config.max_frame_bytes;
    let max_in_flight = server.config.max_concurrent_requests.max(1);
    let in_flight = Arc::new(Semaphore::new(max_in_flight));

    let (mut read_half, mut write_half) = tokio::io::split(stream);
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(max_in_flight);

    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let mut len_buffer = [0u8; protocol::FRAME_HEADER_BYTES];
    loop {
        if let Err(e) = read_half.read_exact(&mut len_buffer).await {
            debug!("Client {} disconnected: {}", addr, e);
            break;
        }

        let frame_len = u32::from_le_bytes(len_buffer) as usize;
        if let Err(e) = protocol::check_frame_len(frame_len, max_frame_bytes) {
            error!("Closing connection to {}: {}", addr, e);
            break;
        }

        let mut payload = vec![0u8; frame_len];
        if let Err(e) = read_half.read_exact(&mut payload).await {
            warn!("Failed to read frame from {}: {}", addr, e);
            break;
        }

        match protocol::decode::<Envelope>(&payload) {
            Ok(envelope) => {
                debug!(
                    "{} #{} for '{}' from {}",
                    envelope.request.verb(),
                    envelope.request_id,
                    envelope.request.graph_id(),
                    addr
                );
                // Held until the reply is queued for the writer
                let permit: OwnedSemaphorePermit = match in_flight.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let server = server.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let reply = server.clone().dispatch(envelope).await;
                    if let Some(frame) = encode_reply(&reply, server.config.max_frame_bytes) {
                        let _ = tx.send(frame).await;
                    }
                    drop(permit);
                });
            }
            Err(e) => {
                warn!("Failed to decode request from {}: {}", addr, e);
                let reply = Reply {
                    request_id: 0,
                    response: Response::failure(Status::BadRequest, e.to_string()),
                };
                if let Some(frame) = encode_reply(&reply, max_frame_bytes) {
                    if tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // Let in-flight replies drain before the writer stops
    drop(tx);
    if let Err(e) = write_task.await {
        debug!("Writer for {} ended abnormally: {}", addr, e);
    }
    info!("Client disconnected: {}", addr);
}

async fn handle_tcp_client(stream: TcpStream, addr: SocketAddr, server: Arc<GraphServer>) {
    handle_client_inner(stream, addr, server).await;
}
