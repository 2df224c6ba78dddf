//! Signaling message types, independent of wire encoding
//!
//! Outbound requests carry typed descriptions and candidates. Inbound replies
//! carry their description/candidate payloads as raw JSON so that decoding
//! happens in the session, where a malformed payload costs only that message.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Kind of a session description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    /// SDP offer
    Offer,
    /// SDP answer
    Answer,
}

/// Session description exchanged during negotiation
///
/// Serializes the same way browsers and pion do: `{"type": "offer", "sdp": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: SdpKind,

    /// SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Create an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }

    /// Whether this is an offer
    pub fn is_offer(&self) -> bool {
        self.kind == SdpKind::Offer
    }

    /// Decode a description from its JSON form
    pub fn from_json(json: &str) -> Result<Self> {
        let desc: Self = serde_json::from_str(json)
            .map_err(|e| Error::Decode(format!("Invalid session description: {}", e)))?;

        if desc.sdp.trim().is_empty() {
            return Err(Error::Decode("Session description has an empty SDP body".to_string()));
        }

        Ok(desc)
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::Serialization(format!("Failed to serialize session description: {}", e))
        })
    }
}

/// ICE candidate, serialized as `RTCIceCandidateInit`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate attribute line
    pub candidate: String,

    /// Media stream identification tag
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,

    /// Index of the media description this candidate belongs to
    #[serde(rename = "sdpMLineIndex", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,

    /// ICE username fragment
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Create a candidate without mid/line-index metadata
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    /// Attach mid and m-line index metadata
    pub fn with_mid(mut self, sdp_mid: impl Into<String>, sdp_mline_index: u16) -> Self {
        self.sdp_mid = Some(sdp_mid.into());
        self.sdp_mline_index = Some(sdp_mline_index);
        self
    }

    /// Decode a candidate from its JSON form
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Decode(format!("Invalid ICE candidate: {}", e)))
    }
}

/// Options sent along with a publish request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    /// Preferred video codec name
    pub codec: String,

    /// Bandwidth hint in kbps
    pub bandwidth_kbps: u32,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            codec: "VP8".to_string(),
            bandwidth_kbps: 1024,
        }
    }
}

/// Requests sent from this side to the SFU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum SignalRequest {
    /// Join a room, optionally carrying the initial offer
    Join {
        /// Room / session identifier
        room_id: String,
        /// Display name of this participant
        display_name: String,
        /// Initial offer (join-with-offer flow)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<SessionDescription>,
    },

    /// Publish local media with an offer (join-then-publish flow)
    Publish {
        /// Local offer
        description: SessionDescription,
        /// Codec/bandwidth options
        options: PublishOptions,
    },

    /// Renegotiation offer or answer
    Description {
        /// Local description
        description: SessionDescription,
    },

    /// Trickled local candidate
    Trickle {
        /// Local candidate
        candidate: IceCandidate,
    },

    /// Local ICE gathering finished
    TrickleComplete,
}

impl SignalRequest {
    /// Get the method name
    pub fn method_name(&self) -> &'static str {
        match self {
            SignalRequest::Join { .. } => "join",
            SignalRequest::Publish { .. } => "publish",
            SignalRequest::Description { .. } => "description",
            SignalRequest::Trickle { .. } => "trickle",
            SignalRequest::TrickleComplete => "trickle_complete",
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::Serialization(format!("Failed to serialize signal request: {}", e))
        })
    }
}

/// Messages received from the SFU
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum SignalReply {
    /// Join accepted; carries the answer in the join-with-offer flow
    Join {
        /// Raw JSON session description
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },

    /// Publish accepted with the remote answer
    Publish {
        /// Raw JSON session description
        description: String,
    },

    /// Renegotiation offer or answer (disambiguated by its `type`)
    Description {
        /// Raw JSON session description
        payload: String,
    },

    /// Remote candidate
    Trickle {
        /// Raw JSON `RTCIceCandidateInit`
        payload: String,
    },

    /// The remote side rejected the last request
    Error {
        /// Error code
        code: i32,
        /// Human-readable reason
        message: String,
    },
}

impl SignalReply {
    /// Get the method name
    pub fn method_name(&self) -> &'static str {
        match self {
            SignalReply::Join { .. } => "join",
            SignalReply::Publish { .. } => "publish",
            SignalReply::Description { .. } => "description",
            SignalReply::Trickle { .. } => "trickle",
            SignalReply::Error { .. } => "error",
        }
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Decode(format!("Failed to deserialize signal reply: {}", e)))
    }

    /// Wrap a description as an inbound renegotiation message
    pub fn description(desc: &SessionDescription) -> Result<Self> {
        Ok(SignalReply::Description {
            payload: desc.to_json()?,
        })
    }

    /// Wrap a candidate as an inbound trickle message
    pub fn trickle(candidate: &IceCandidate) -> Result<Self> {
        let payload = serde_json::to_string(candidate).map_err(|e| {
            Error::Serialization(format!("Failed to serialize ICE candidate: {}", e))
        })?;
        Ok(SignalReply::Trickle { payload })
    }
}
