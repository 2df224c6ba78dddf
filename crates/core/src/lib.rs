//! Signaling, SDP negotiation and real-time media pacing for SFU publishers
//!
//! This crate holds the protocol and timing logic of a client that publishes
//! pre-recorded or captured media into a selective forwarding unit. Capture,
//! container demuxing, wire framing and the WebRTC stack itself stay outside;
//! they plug in through the [`SignalTransport`], [`PeerController`],
//! [`MediaSource`] and [`MediaSink`] traits.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Publisher                                             │
//! │  ├─ SignalingSession (one receive-loop task)           │
//! │  │   ├─ NegotiationCoordinator (offer/answer, glare)   │
//! │  │   │   └─ CandidateBuffer (remote ICE candidates)    │
//! │  │   └─ ConnectivityGate (fires once on Connected)     │
//! │  └─ Pacer per track (one task each, waits on the gate) │
//! │     ↓                                                  │
//! │  SignalTransport / PeerController / MediaSink          │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use sfu_publish_core::{JoinMode, PublisherConfig};
//!
//! let config = PublisherConfig {
//!     room_id: "lobby".to_string(),
//!     join_mode: JoinMode::JoinThenPublish,
//!     ..Default::default()
//! };
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.effective_display_name(), "lobby");
//! ```

#![warn(clippy::all)]

pub mod candidates;
pub mod channel;
pub mod config;
pub mod error;
pub mod gate;
pub mod negotiation;
pub mod pacer;
pub mod peer;
pub mod protocol;
pub mod publisher;
pub mod session;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use candidates::{CandidateBuffer, CandidateDisposition};
pub use channel::{MemoryTransport, SfuEndpoint, SignalTransport, TransportClosed};
pub use config::{JoinMode, PublisherConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use gate::{ConnectivityGate, GateSignal, GateWaiter};
pub use negotiation::{NegotiationCoordinator, NegotiationRound, NegotiationState, Role, RoundStatus};
pub use pacer::{
    MediaSink, MediaSource, MediaUnit, PaceOutcome, PaceReport, Pacer, PacingClock,
    PacingPolicy, Timebase,
};
pub use peer::{ConnectivityState, PeerController, PeerEvent, PeerEventSender, PeerEvents};
pub use protocol::{IceCandidate, PublishOptions, SdpKind, SessionDescription, SignalReply, SignalRequest};
pub use publisher::{PublishReport, Publisher, Track, TrackReport};
pub use session::{SessionContext, SessionHandle, SessionReport, SessionState, SignalingSession};
