//! Peer-connection controller seam
//!
//! The core never touches a WebRTC stack directly. It drives an implementation
//! of [`PeerController`] and consumes the [`PeerEvent`] stream that
//! implementation produces in place of callback registration.

use crate::protocol::{IceCandidate, SessionDescription};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Connectivity state observed from the underlying peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityState {
    /// Nothing has happened yet
    New,
    /// Connectivity checks in progress
    Checking,
    /// A working candidate pair was found
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity checks failed
    Failed,
    /// Peer connection closed
    Closed,
}

impl ConnectivityState {
    /// Whether media may flow in this state
    pub fn is_connected(self) -> bool {
        self == ConnectivityState::Connected
    }
}

/// Events emitted by a peer connection
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// A local candidate was gathered; `None` marks end of gathering
    LocalCandidate(Option<IceCandidate>),

    /// The connectivity state changed
    ConnectivityChanged(ConnectivityState),

    /// Local media changed and a new offer is needed
    NegotiationNeeded,
}

/// Receiving half of a peer's event stream
pub type PeerEvents = mpsc::UnboundedReceiver<PeerEvent>;

/// Sending half of a peer's event stream, held by controller implementations
pub type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;

/// Operations the core needs from a peer connection
#[async_trait]
pub trait PeerController: Send + Sync {
    /// Create an SDP offer (does not set it)
    async fn create_offer(&self) -> Result<SessionDescription>;

    /// Create an SDP answer to the current remote offer (does not set it)
    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply a local description
    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// Apply a remote description
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// Discard a pending local offer and return to the stable state
    async fn rollback_local_offer(&self) -> Result<()>;

    /// Apply a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Current local description, including gathered candidates
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Resolve once local ICE gathering has completed
    async fn wait_gathering_complete(&self);

    /// Close the peer connection
    async fn close(&self) -> Result<()>;
}
