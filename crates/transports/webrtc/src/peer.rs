//! [`PeerController`] backed by a webrtc-rs `RTCPeerConnection`

use crate::track::{SampleTrackSink, TrackKind};
use crate::{Error, Result};
use async_trait::async_trait;
use sfu_publish_core::{
    ConnectivityState, IceCandidate, PeerController, PeerEvent, PeerEventSender, PeerEvents,
    PublisherConfig, SdpKind, SessionDescription,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Build the ICE server list from the publisher configuration
pub fn ice_servers(config: &PublisherConfig) -> Vec<RTCIceServer> {
    config
        .stun_servers
        .iter()
        .map(|url| RTCIceServer {
            urls: vec![url.clone()],
            ..Default::default()
        })
        .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
            urls: vec![turn.url.clone()],
            username: turn.username.clone(),
            credential: turn.credential.clone(),
            ..Default::default()
        }))
        .collect()
}

/// Map an ICE connection state to the connectivity the session tracks
///
/// `Completed` counts as connected; `Unspecified` carries no information.
pub fn connectivity_from(state: RTCIceConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCIceConnectionState::New => Some(ConnectivityState::New),
        RTCIceConnectionState::Checking => Some(ConnectivityState::Checking),
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            Some(ConnectivityState::Connected)
        }
        RTCIceConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCIceConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCIceConnectionState::Closed => Some(ConnectivityState::Closed),
        RTCIceConnectionState::Unspecified => None,
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    }
    .map_err(|e| Error::SdpError(format!("Failed to parse SDP: {}", e)))
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(Error::SdpError(format!(
            "Unsupported description type: {}",
            other
        ))),
    }
}

fn candidate_from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

/// Publishing peer connection
///
/// Callbacks registered on the connection are turned into [`PeerEvent`]s on
/// the channel returned by [`WebRtcPeer::new`].
pub struct WebRtcPeer {
    connection: Arc<RTCPeerConnection>,
    connection_id: String,
    stream_id: String,
}

impl WebRtcPeer {
    /// Create a peer connection using the configured STUN/TURN servers
    pub async fn new(config: &PublisherConfig) -> Result<(Self, PeerEvents)> {
        Self::with_ice_servers(ice_servers(config)).await
    }

    /// Create a peer connection with an explicit ICE server list
    #[instrument(skip(ice_servers), fields(servers = ice_servers.len()))]
    pub async fn with_ice_servers(ice_servers: Vec<RTCIceServer>) -> Result<(Self, PeerEvents)> {
        let connection_id = uuid::Uuid::new_v4().to_string();

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::PeerConnectionError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::PeerConnectionError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let connection = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
        })?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self::register_callbacks(&connection, &connection_id, events_tx);

        info!("Created peer connection {}", connection_id);

        let peer = Self {
            connection,
            stream_id: format!("stream-{}", connection_id),
            connection_id,
        };

        Ok((peer, events_rx))
    }

    fn register_callbacks(
        connection: &Arc<RTCPeerConnection>,
        connection_id: &str,
        events: PeerEventSender,
    ) {
        let tx = events.clone();
        connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = tx.clone();
            Box::pin(async move {
                let event = match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => PeerEvent::LocalCandidate(Some(candidate_from_init(init))),
                        Err(e) => {
                            warn!("Failed to serialize local candidate: {}", e);
                            return;
                        }
                    },
                    None => PeerEvent::LocalCandidate(None),
                };
                let _ = tx.send(event);
            })
        }));

        let tx = events.clone();
        let id = connection_id.to_string();
        connection.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
            debug!("ICE connection state for {}: {}", id, state);
            if let Some(connectivity) = connectivity_from(state) {
                let _ = tx.send(PeerEvent::ConnectivityChanged(connectivity));
            }
            Box::pin(async {})
        }));

        let tx = events;
        connection.on_negotiation_needed(Box::new(move || {
            let _ = tx.send(PeerEvent::NegotiationNeeded);
            Box::pin(async {})
        }));
    }

    /// Add a sample track of the given kind and return the sink feeding it
    ///
    /// Add tracks before the first offer is created so the offer carries them;
    /// tracks added later trigger renegotiation.
    pub async fn add_sample_track(&self, kind: TrackKind) -> Result<SampleTrackSink> {
        let track = Arc::new(TrackLocalStaticSample::new(
            kind.codec_capability(),
            format!("{}-{}", kind.label(), self.connection_id),
            self.stream_id.clone(),
        ));

        let sender = self
            .connection
            .add_track(track.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| {
                Error::MediaTrackError(format!("Failed to add {} track: {}", kind.label(), e))
            })?;

        debug!("Added {} track to {}", kind.label(), self.connection_id);

        Ok(SampleTrackSink::new(track, kind, sender))
    }

    /// Unique id of this connection
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Underlying webrtc-rs peer connection
    pub fn connection(&self) -> &Arc<RTCPeerConnection> {
        &self.connection
    }
}

#[async_trait]
impl PeerController for WebRtcPeer {
    async fn create_offer(&self) -> sfu_publish_core::Result<SessionDescription> {
        let offer = self
            .connection
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        Ok(from_rtc(offer)?)
    }

    async fn create_answer(&self) -> sfu_publish_core::Result<SessionDescription> {
        let answer = self
            .connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
        Ok(from_rtc(answer)?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> sfu_publish_core::Result<()> {
        self.connection
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> sfu_publish_core::Result<()> {
        self.connection
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))?;
        Ok(())
    }

    async fn rollback_local_offer(&self) -> sfu_publish_core::Result<()> {
        let mut rollback = RTCSessionDescription::default();
        rollback.sdp_type = RTCSdpType::Rollback;

        self.connection
            .set_local_description(rollback)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to roll back local offer: {}", e)))?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> sfu_publish_core::Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))?;
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.connection.local_description().await?;
        match from_rtc(desc) {
            Ok(desc) => Some(desc),
            Err(e) => {
                warn!("Ignoring local description: {}", e);
                None
            }
        }
    }

    async fn wait_gathering_complete(&self) {
        let mut done = self.connection.gathering_complete_promise().await;
        let _ = done.recv().await;
    }

    async fn close(&self) -> sfu_publish_core::Result<()> {
        info!("Closing peer connection {}", self.connection_id);
        self.connection.close().await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to close connection: {}", e))
        })?;
        Ok(())
    }
}
