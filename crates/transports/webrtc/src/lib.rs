//! webrtc-rs backend for SFU publishing
//!
//! Provides [`WebRtcPeer`], a [`PeerController`](sfu_publish_core::PeerController)
//! over a webrtc-rs peer connection, and [`SampleTrackSink`], a
//! [`MediaSink`](sfu_publish_core::MediaSink) that writes paced units onto a
//! local VP8 or Opus track.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  sfu-publish-core                            │
//! │  SignalingSession ── PeerController ──┐      │
//! │  Pacer ───────────── MediaSink ───┐   │      │
//! └───────────────────────────────────│───│──────┘
//!                                     ↓   ↓
//! ┌──────────────────────────────────────────────┐
//! │  sfu-publish-webrtc                          │
//! │  SampleTrackSink        WebRtcPeer           │
//! │  (TrackLocalStatic-     (RTCPeerConnection,  │
//! │   Sample + RTCP loop)    callbacks → events) │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use sfu_publish_core::{Pacer, PublisherConfig};
//! use sfu_publish_webrtc::{TrackKind, WebRtcPeer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PublisherConfig::default();
//! let (peer, events) = WebRtcPeer::new(&config).await?;
//!
//! // Tracks go on before the session creates its offer
//! let video = peer.add_sample_track(TrackKind::Video).await?;
//! let pacer = Pacer::new(TrackKind::Video.label()).with_deadline(config.deadline());
//! # let _ = (events, video, pacer);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod peer;
pub mod track;

pub use error::{Error, Result};
pub use peer::{connectivity_from, ice_servers, WebRtcPeer};
pub use track::{SampleTrackSink, TrackKind};
