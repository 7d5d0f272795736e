//! Asynchronous request/response channel between the engine and its host.
//!
//! Outbound calls never block: [`SessionBridge::send`] queues an
//! [`Envelope`] and returns its [`RequestId`] immediately. The host
//! acknowledges every envelope through a oneshot channel; results that
//! carry data (a dictionary lookup, say) come back later as separate
//! [`InboundCommand`]s tagged with the originating request id.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::protocol::{Ack, HostOperation, InboundCommand, OutboundRequest, RequestId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("host transport is unavailable")]
    TransportUnavailable,
    #[error("host does not expose required operation `{0}`")]
    MissingCapability(HostOperation),
    #[error("host channel closed")]
    Closed,
}

impl BridgeError {
    /// Terminal errors leave the viewer without a host.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BridgeError::MissingCapability(op) if !HostOperation::REQUIRED.contains(op))
    }
}

#[derive(Debug)]
pub struct Envelope {
    pub id: RequestId,
    pub request: OutboundRequest,
    pub ack: oneshot::Sender<Ack>,
}

/// The host's side of a connection, as handed to [`SessionBridge::connect`].
#[derive(Debug, Clone)]
pub struct HostEndpoint {
    capabilities: BTreeSet<HostOperation>,
    requests: mpsc::UnboundedSender<Envelope>,
}

impl HostEndpoint {
    pub fn new(
        capabilities: impl IntoIterator<Item = HostOperation>,
        requests: mpsc::UnboundedSender<Envelope>,
    ) -> Self {
        Self {
            capabilities: capabilities.into_iter().collect(),
            requests,
        }
    }

    /// Endpoint plus the receiving end a custom transport reads from.
    pub fn channel(
        capabilities: impl IntoIterator<Item = HostOperation>,
    ) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(capabilities, tx), rx)
    }

    pub fn capabilities(&self) -> &BTreeSet<HostOperation> {
        &self.capabilities
    }
}

/// Sender the host uses to push commands back into the engine.
#[derive(Debug, Clone)]
pub struct HostReplies {
    inbound: mpsc::UnboundedSender<InboundCommand>,
}

impl HostReplies {
    pub fn new(inbound: mpsc::UnboundedSender<InboundCommand>) -> Self {
        Self { inbound }
    }

    pub fn send(&self, command: InboundCommand) -> Result<(), BridgeError> {
        self.inbound.send(command).map_err(|_| BridgeError::Closed)
    }
}

#[async_trait]
pub trait Host: Send + Sync + 'static {
    fn capabilities(&self) -> Vec<HostOperation>;

    async fn handle(
        &self,
        id: RequestId,
        request: OutboundRequest,
        replies: &HostReplies,
    ) -> anyhow::Result<()>;
}

/// Runs `host` on the current runtime, answering envelopes in arrival order.
pub fn serve_host<H: Host>(
    host: Arc<H>,
    inbound: mpsc::UnboundedSender<InboundCommand>,
) -> (HostEndpoint, JoinHandle<()>) {
    let (endpoint, mut requests) = HostEndpoint::channel(host.capabilities());
    let replies = HostReplies::new(inbound);
    let task = tokio::spawn(async move {
        while let Some(envelope) = requests.recv().await {
            let Envelope { id, request, ack } = envelope;
            let operation = request.operation();
            let reply = match host.handle(id, request, &replies).await {
                Ok(()) => Ack::ok(id),
                Err(err) => {
                    warn!(%id, %operation, ?err, "host operation failed");
                    Ack::failed(id, err.to_string())
                }
            };
            // The engine may have stopped waiting; nothing to do then.
            let _ = ack.send(reply);
        }
        debug!("host request channel closed");
    });
    (endpoint, task)
}

struct Pending {
    id: RequestId,
    operation: HostOperation,
    ack: oneshot::Receiver<Ack>,
}

pub struct SessionBridge {
    capabilities: BTreeSet<HostOperation>,
    requests: mpsc::UnboundedSender<Envelope>,
    pending: Vec<Pending>,
}

impl SessionBridge {
    /// Fails fast when there is no transport or when any operation in
    /// [`HostOperation::REQUIRED`] is missing.
    #[instrument(skip(endpoint))]
    pub fn connect(endpoint: Option<HostEndpoint>) -> Result<Self, BridgeError> {
        let endpoint = endpoint.ok_or(BridgeError::TransportUnavailable)?;
        if endpoint.requests.is_closed() {
            return Err(BridgeError::TransportUnavailable);
        }
        if let Some(missing) = HostOperation::REQUIRED
            .iter()
            .find(|op| !endpoint.capabilities.contains(*op))
        {
            return Err(BridgeError::MissingCapability(*missing));
        }

        info!(capabilities = endpoint.capabilities.len(), "connected to host");
        Ok(Self {
            capabilities: endpoint.capabilities,
            requests: endpoint.requests,
            pending: Vec::new(),
        })
    }

    pub fn supports(&self, operation: HostOperation) -> bool {
        self.capabilities.contains(&operation)
    }

    /// Queues `request` for the host and returns its correlation id.
    pub fn send(&mut self, request: OutboundRequest) -> Result<RequestId, BridgeError> {
        let operation = request.operation();
        if !self.supports(operation) {
            return Err(BridgeError::MissingCapability(operation));
        }

        let id = RequestId::new();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.requests
            .send(Envelope {
                id,
                request,
                ack: ack_tx,
            })
            .map_err(|_| BridgeError::Closed)?;
        debug!(%id, %operation, "request sent to host");
        self.pending.push(Pending {
            id,
            operation,
            ack: ack_rx,
        });
        Ok(id)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drains acknowledgments that have arrived since the last call.
    pub fn poll_acks(&mut self) -> Vec<Ack> {
        let mut done = Vec::new();
        self.pending.retain_mut(|pending| match pending.ack.try_recv() {
            Ok(ack) => {
                if ack.ok {
                    debug!(id = %pending.id, operation = %pending.operation, "host acknowledged");
                } else {
                    warn!(
                        id = %pending.id,
                        operation = %pending.operation,
                        message = ack.message.as_deref().unwrap_or(""),
                        "host rejected request"
                    );
                }
                done.push(ack);
                false
            }
            Err(oneshot::error::TryRecvError::Empty) => true,
            Err(oneshot::error::TryRecvError::Closed) => {
                warn!(id = %pending.id, operation = %pending.operation, "request dropped without acknowledgment");
                false
            }
        });
        done
    }
}
