//! Shared transport with request queueing
//!
//! A connection handle must never be touched from two threads at once. In a
//! multi-threaded host, [`SharedTransport::spawn`] moves the [`Transport`] onto
//! a dedicated blocking worker and hands out cloneable handles. Every request
//! travels through one FIFO queue and is answered on a oneshot channel, so
//! calls from any number of tasks are executed strictly one at a time.
//!
//! # Example
//!
//! ```no_run
//! use rust_siggen::transport::{SharedTransport, SimulatedDriver, TransportSession};
//!
//! # async fn demo() -> Result<(), rust_siggen::error::TransportError> {
//! let shared = SharedTransport::spawn(TransportSession::new(SimulatedDriver::new()));
//! shared.connect("USB0::0x1AB1::0x0642::SIM0001::INSTR").await?;
//! let idn = shared.query("*IDN?").await?;
//! println!("Instrument ID: {}", idn);
//! # Ok(())
//! # }
//! ```

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use super::{Connection, Transport};
use crate::error::TransportError;

type Reply<T> = oneshot::Sender<Result<T, TransportError>>;

/// Request executed by the worker.
#[derive(Debug)]
enum TransportRequest {
    Connect { resource: String, reply: Reply<Connection> },
    Disconnect { reply: Reply<()> },
    Send { command: String, reply: Reply<()> },
    Query { command: String, reply: Reply<String> },
    ListResources { reply: oneshot::Sender<Vec<String>> },
    IsConnected { reply: oneshot::Sender<bool> },
}

/// Cloneable handle to a transport owned by a worker thread.
#[derive(Debug, Clone)]
pub struct SharedTransport {
    requests: mpsc::Sender<TransportRequest>,
}

impl SharedTransport {
    /// Queue depth before callers wait for the worker.
    pub const QUEUE_DEPTH: usize = 100;

    /// Move `transport` onto a blocking worker and return a handle to it.
    ///
    /// Must be called from within a Tokio runtime. The worker stops when the
    /// last handle is dropped.
    pub fn spawn<T>(transport: T) -> Self
    where
        T: Transport + Send + 'static,
    {
        let (requests, request_rx) = mpsc::channel(Self::QUEUE_DEPTH);
        tokio::task::spawn_blocking(move || Self::run_queue(transport, request_rx));
        Self { requests }
    }

    fn run_queue<T: Transport>(mut transport: T, mut requests: mpsc::Receiver<TransportRequest>) {
        debug!("shared transport worker started");
        while let Some(request) = requests.blocking_recv() {
            trace!(?request, "processing transport request");
            // A dropped reply receiver only means the caller stopped waiting.
            match request {
                TransportRequest::Connect { resource, reply } => {
                    let _ = reply.send(transport.connect(&resource));
                }
                TransportRequest::Disconnect { reply } => {
                    let _ = reply.send(transport.disconnect());
                }
                TransportRequest::Send { command, reply } => {
                    let _ = reply.send(transport.send(&command));
                }
                TransportRequest::Query { command, reply } => {
                    let _ = reply.send(transport.query(&command));
                }
                TransportRequest::ListResources { reply } => {
                    let _ = reply.send(transport.list_resources().collect());
                }
                TransportRequest::IsConnected { reply } => {
                    let _ = reply.send(transport.is_connected());
                }
            }
        }
        debug!("shared transport worker ended");
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> TransportRequest,
    ) -> Result<T, TransportError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(build(reply))
            .await
            .map_err(|_| TransportError::ActorUnavailable)?;
        response.await.map_err(|_| TransportError::ActorUnavailable)
    }

    /// Open the instrument identified by `resource`.
    pub async fn connect(&self, resource: &str) -> Result<Connection, TransportError> {
        let resource = resource.to_string();
        self.request(|reply| TransportRequest::Connect { resource, reply })
            .await?
    }

    /// Close the instrument.
    pub async fn disconnect(&self) -> Result<(), TransportError> {
        self.request(|reply| TransportRequest::Disconnect { reply })
            .await?
    }

    /// Send a command.
    pub async fn send(&self, command: &str) -> Result<(), TransportError> {
        let command = command.to_string();
        self.request(|reply| TransportRequest::Send { command, reply })
            .await?
    }

    /// Send a query and wait for its response.
    pub async fn query(&self, command: &str) -> Result<String, TransportError> {
        let command = command.to_string();
        self.request(|reply| TransportRequest::Query { command, reply })
            .await?
    }

    /// Discover resources. Empty when the worker is gone.
    pub async fn list_resources(&self) -> Vec<String> {
        self.request(|reply| TransportRequest::ListResources { reply })
            .await
            .unwrap_or_default()
    }

    /// True while the worker's transport holds an open instrument.
    pub async fn is_connected(&self) -> bool {
        self.request(|reply| TransportRequest::IsConnected { reply })
            .await
            .unwrap_or(false)
    }
}
