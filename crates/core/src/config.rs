//! Publisher configuration

use crate::pacer::PacingPolicy;
use crate::protocol::PublishOptions;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the initial offer reaches the SFU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JoinMode {
    /// The offer rides on `join`; the answer comes back in the join reply
    #[default]
    JoinWithOffer,
    /// Plain `join`, then `publish` with the offer; the answer comes back in the publish reply
    JoinThenPublish,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Configuration for one publishing session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Room / session id sent with `join` (default: "test")
    pub room_id: String,

    /// Display name sent with `join`; falls back to the room id
    pub display_name: Option<String>,

    /// Initial offer flow (default: JoinWithOffer)
    pub join_mode: JoinMode,

    /// Trickle local candidates (default: true)
    ///
    /// When disabled the offer is sent only after ICE gathering completed.
    pub trickle: bool,

    /// Send an explicit gathering-complete marker (default: false)
    pub signal_end_of_candidates: bool,

    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations
    pub turn_servers: Vec<TurnServerConfig>,

    /// Options sent with `publish`
    pub publish: PublishOptions,

    /// Pacing deadline in seconds; 0 disables it
    pub duration_secs: u64,

    /// Rewind sources at end of input (default: false)
    pub loop_media: bool,

    /// Handshake timeout in milliseconds (default: none)
    pub join_timeout_ms: Option<u64>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            room_id: "test".to_string(),
            display_name: None,
            join_mode: JoinMode::JoinWithOffer,
            trickle: true,
            signal_end_of_candidates: false,
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            publish: PublishOptions::default(),
            duration_secs: 0,
            loop_media: false,
            join_timeout_ms: None,
        }
    }
}

impl PublisherConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `room_id` is empty
    /// - no STUN and no TURN server is configured
    /// - an ICE server URL has an unknown scheme
    /// - `publish.codec` is empty
    /// - `join_timeout_ms` is zero
    pub fn validate(&self) -> Result<()> {
        if self.room_id.trim().is_empty() {
            return Err(Error::InvalidConfig("room_id must not be empty".to_string()));
        }

        if self.stun_servers.is_empty() && self.turn_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN or TURN server is required".to_string(),
            ));
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server URL must start with stun:, got {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server URL must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }

        if self.publish.codec.trim().is_empty() {
            return Err(Error::InvalidConfig("publish codec must not be empty".to_string()));
        }

        if self.join_timeout_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "join_timeout_ms must be greater than zero when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from `SFU_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// Unparsable values keep their default. The result is validated.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(room) = lookup("SFU_ROOM") {
            config.room_id = room;
        }
        if let Some(name) = lookup("SFU_DISPLAY_NAME") {
            config.display_name = Some(name);
        }
        if let Some(mode) = lookup("SFU_JOIN_MODE") {
            match mode.trim().to_ascii_lowercase().as_str() {
                "join_with_offer" | "join" => config.join_mode = JoinMode::JoinWithOffer,
                "join_then_publish" | "publish" => config.join_mode = JoinMode::JoinThenPublish,
                _ => {}
            }
        }
        if let Some(trickle) = lookup("SFU_TRICKLE").and_then(|v| v.parse().ok()) {
            config.trickle = trickle;
        }
        if let Some(servers) = lookup("SFU_STUN_SERVERS") {
            config.stun_servers = servers
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(secs) = lookup("SFU_DURATION_SECS").and_then(|v| v.parse().ok()) {
            config.duration_secs = secs;
        }
        if let Some(looping) = lookup("SFU_LOOP_MEDIA").and_then(|v| v.parse().ok()) {
            config.loop_media = looping;
        }
        if let Some(ms) = lookup("SFU_JOIN_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.join_timeout_ms = Some(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Name sent with `join`
    pub fn effective_display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.room_id)
    }

    /// Pacing deadline, if any
    pub fn deadline(&self) -> Option<Duration> {
        (self.duration_secs > 0).then(|| Duration::from_secs(self.duration_secs))
    }

    /// Pacing policy
    pub fn pacing_policy(&self) -> PacingPolicy {
        if self.loop_media {
            PacingPolicy::LoopForever
        } else {
            PacingPolicy::Finite
        }
    }

    /// Handshake timeout, if any
    pub fn join_timeout(&self) -> Option<Duration> {
        self.join_timeout_ms.map(Duration::from_millis)
    }
}
