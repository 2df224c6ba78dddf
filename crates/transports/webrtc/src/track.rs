//! Sample-based local tracks fed by a pacer

use crate::{Error, Result};
use async_trait::async_trait;
use sfu_publish_core::{MediaSink, MediaUnit};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Media kind of a published track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// VP8 video at the standard 90kHz clock
    Video,
    /// Stereo Opus at 48kHz
    Audio,
}

impl TrackKind {
    /// Codec capability advertised for this kind
    pub fn codec_capability(self) -> RTCRtpCodecCapability {
        match self {
            TrackKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            TrackKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48000,
                channels: 2,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
        }
    }

    /// Track id prefix and pacer label
    pub fn label(self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
        }
    }

    /// Resolve a codec name such as `"vp8"` or `"opus"`
    pub fn from_codec_name(codec: &str) -> Result<Self> {
        match codec.to_ascii_lowercase().as_str() {
            "vp8" => Ok(TrackKind::Video),
            "opus" => Ok(TrackKind::Audio),
            other => Err(Error::InvalidConfig(format!(
                "Unsupported codec '{}' (expected vp8 or opus)",
                other
            ))),
        }
    }
}

/// [`MediaSink`] writing units as samples onto a local track
///
/// Owns the RTCP read loop of the track's sender; dropping the sink stops it.
pub struct SampleTrackSink {
    track: Arc<TrackLocalStaticSample>,
    kind: TrackKind,
    rtcp_task: JoinHandle<()>,
}

impl SampleTrackSink {
    pub(crate) fn new(
        track: Arc<TrackLocalStaticSample>,
        kind: TrackKind,
        sender: Arc<RTCRtpSender>,
    ) -> Self {
        let track_id = track.id().to_string();

        // Interceptors only run while RTCP is being read
        let rtcp_task = tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
            debug!("RTCP reader for track {} finished", track_id);
        });

        Self {
            track,
            kind,
            rtcp_task,
        }
    }

    /// Media kind of this track
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Underlying webrtc-rs track
    pub fn track(&self) -> &Arc<TrackLocalStaticSample> {
        &self.track
    }
}

#[async_trait]
impl MediaSink for SampleTrackSink {
    async fn write(&mut self, unit: &MediaUnit) -> sfu_publish_core::Result<()> {
        let sample = Sample {
            data: unit.payload.clone(),
            duration: unit.duration,
            ..Default::default()
        };

        self.track.write_sample(&sample).await.map_err(|e| {
            Error::MediaTrackError(format!(
                "Failed to write {} sample: {}",
                self.kind.label(),
                e
            ))
        })?;

        trace!(
            "Wrote {} sample: {} bytes, {:?}",
            self.kind.label(),
            unit.payload.len(),
            unit.duration
        );

        Ok(())
    }
}

impl Drop for SampleTrackSink {
    fn drop(&mut self) {
        self.rtcp_task.abort();
    }
}
