//! Abstract bidirectional signaling channel
//!
//! The session only needs an order-preserving, message-oriented channel in each
//! direction. Wire framing (gRPC streams, WebSocket JSON-RPC, ...) lives in the
//! embedding application behind [`SignalTransport`].

use crate::protocol::{SignalReply, SignalRequest};
use crate::{Error, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Why the inbound half of a transport stopped delivering messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportClosed {
    /// Clean end-of-stream from the remote side
    EndOfStream,
    /// The stream was cancelled (local or remote)
    Cancelled,
    /// The stream broke with an error
    Failed(String),
}

impl std::fmt::Display for TransportClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportClosed::EndOfStream => write!(f, "end of stream"),
            TransportClosed::Cancelled => write!(f, "cancelled"),
            TransportClosed::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Bidirectional signaling transport
///
/// `recv` must be cancel-safe: the session polls it inside `tokio::select!`.
#[async_trait]
pub trait SignalTransport: Send {
    /// Send a request to the remote side
    async fn send(&mut self, request: SignalRequest) -> Result<()>;

    /// Receive the next message, or the reason the stream ended
    async fn recv(&mut self) -> std::result::Result<SignalReply, TransportClosed>;

    /// Close the sending half, flushing anything already queued
    async fn close_send(&mut self) -> Result<()>;
}

type InboundItem = std::result::Result<SignalReply, TransportClosed>;

/// In-memory transport backed by tokio channels
pub struct MemoryTransport {
    outbound: Option<mpsc::UnboundedSender<SignalRequest>>,
    inbound: mpsc::UnboundedReceiver<InboundItem>,
}

/// Remote end of a [`MemoryTransport`], standing in for the SFU
pub struct SfuEndpoint {
    requests: mpsc::UnboundedReceiver<SignalRequest>,
    replies: mpsc::UnboundedSender<InboundItem>,
}

impl MemoryTransport {
    /// Create a connected transport / endpoint pair
    pub fn pair() -> (MemoryTransport, SfuEndpoint) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        (
            MemoryTransport {
                outbound: Some(request_tx),
                inbound: reply_rx,
            },
            SfuEndpoint {
                requests: request_rx,
                replies: reply_tx,
            },
        )
    }
}

#[async_trait]
impl SignalTransport for MemoryTransport {
    async fn send(&mut self, request: SignalRequest) -> Result<()> {
        let tx = self
            .outbound
            .as_ref()
            .ok_or_else(|| Error::Transport("Send half already closed".to_string()))?;

        debug!("Sending signal request: {}", request.method_name());

        tx.send(request)
            .map_err(|e| Error::Transport(format!("Remote endpoint gone: {}", e)))
    }

    async fn recv(&mut self) -> std::result::Result<SignalReply, TransportClosed> {
        match self.inbound.recv().await {
            Some(item) => item,
            None => Err(TransportClosed::EndOfStream),
        }
    }

    async fn close_send(&mut self) -> Result<()> {
        if self.outbound.take().is_some() {
            debug!("Closed send half of memory transport");
        }
        Ok(())
    }
}

impl SfuEndpoint {
    /// Next request sent by the session; `None` once the send half is closed
    pub async fn next_request(&mut self) -> Option<SignalRequest> {
        self.requests.recv().await
    }

    /// Next request if one is already queued
    pub fn try_next_request(&mut self) -> Option<SignalRequest> {
        self.requests.try_recv().ok()
    }

    /// Deliver a message to the session
    pub fn reply(&self, reply: SignalReply) -> Result<()> {
        self.replies
            .send(Ok(reply))
            .map_err(|_| Error::Transport("Session side dropped".to_string()))
    }

    /// Deliver a clean end-of-stream
    pub fn end_stream(&self) -> Result<()> {
        self.close_with(TransportClosed::EndOfStream)
    }

    /// Deliver a cancellation
    pub fn cancel(&self) -> Result<()> {
        self.close_with(TransportClosed::Cancelled)
    }

    /// Deliver an arbitrary close reason
    pub fn close_with(&self, reason: TransportClosed) -> Result<()> {
        self.replies
            .send(Err(reason))
            .map_err(|_| Error::Transport("Session side dropped".to_string()))
    }
}
