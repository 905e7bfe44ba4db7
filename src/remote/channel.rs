use std::sync::Arc;

use async_channel::{unbounded, Receiver, Sender};
use async_trait::async_trait;

use crate::error::{unavailable, DocstoreError, DocstoreResult};
use serde_json::Value as JsonValue;

/// Opens bidirectional listen streams against the backend. Each stream is
/// independent; the watcher reopens a fresh one after any failure.
#[async_trait]
pub trait StreamingDatastore: Send + Sync + 'static {
    async fn open_listen_stream(&self) -> DocstoreResult<Arc<dyn ListenStream>>;
}

impl std::fmt::Debug for dyn StreamingDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StreamingDatastore")
    }
}

/// One open listen stream. Messages are JSON-proto frames: the client sends
/// target additions and removals, the server streams change events.
#[async_trait]
pub trait ListenStream: Send + Sync + 'static {
    async fn send(&self, message: JsonValue) -> DocstoreResult<()>;

    /// The next server frame. `None` means the server half-closed cleanly;
    /// an error carries the stream's terminal status.
    async fn next(&self) -> Option<DocstoreResult<JsonValue>>;

    async fn close(&self);
}

struct InMemoryListenStream {
    requests: Sender<JsonValue>,
    responses: Receiver<DocstoreResult<JsonValue>>,
}

#[async_trait]
impl ListenStream for InMemoryListenStream {
    async fn send(&self, message: JsonValue) -> DocstoreResult<()> {
        self.requests
            .send(message)
            .await
            .map_err(|_| unavailable("Listen stream closed"))
    }

    async fn next(&self) -> Option<DocstoreResult<JsonValue>> {
        self.responses.recv().await.ok()
    }

    async fn close(&self) {
        self.requests.close();
        self.responses.close();
    }
}

/// The server half of an in-memory listen stream, handed out by
/// [`InMemoryListenService::accept`]. Tests drive the watcher by replying
/// to the requests they observe here.
pub struct ServerStream {
    requests: Receiver<JsonValue>,
    responses: Sender<DocstoreResult<JsonValue>>,
}

impl ServerStream {
    /// The next client frame, or `None` once the client closed the stream.
    pub async fn next_request(&self) -> Option<JsonValue> {
        self.requests.recv().await.ok()
    }

    pub async fn send(&self, message: JsonValue) {
        let _ = self.responses.send(Ok(message)).await;
    }

    /// Terminates the stream with `error` on the client side.
    pub async fn fail(&self, error: DocstoreError) {
        let _ = self.responses.send(Err(error)).await;
        self.responses.close();
    }

    /// Half-closes the stream cleanly.
    pub fn end(&self) {
        self.responses.close();
    }
}

/// In-memory [`StreamingDatastore`]: every stream the client opens shows up
/// on the accept queue as a [`ServerStream`].
pub struct InMemoryListenService {
    accepts: Sender<ServerStream>,
    pending: Receiver<ServerStream>,
}

impl Default for InMemoryListenService {
    fn default() -> Self {
        let (accepts, pending) = unbounded();
        Self { accepts, pending }
    }
}

impl InMemoryListenService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Waits for the client to open its next listen stream.
    pub async fn accept(&self) -> Option<ServerStream> {
        self.pending.recv().await.ok()
    }
}

#[async_trait]
impl StreamingDatastore for InMemoryListenService {
    async fn open_listen_stream(&self) -> DocstoreResult<Arc<dyn ListenStream>> {
        let (requests_tx, requests_rx) = unbounded();
        let (responses_tx, responses_rx) = unbounded();
        let server = ServerStream {
            requests: requests_rx,
            responses: responses_tx,
        };
        self.accepts
            .send(server)
            .await
            .map_err(|_| unavailable("Listen service shut down"))?;
        Ok(Arc::new(InMemoryListenStream {
            requests: requests_tx,
            responses: responses_rx,
        }))
    }
}
