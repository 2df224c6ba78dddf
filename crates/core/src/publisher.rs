//! Top-level composition of a signaling session and its paced tracks

use crate::channel::SignalTransport;
use crate::config::PublisherConfig;
use crate::pacer::{MediaSink, MediaSource, PaceReport, Pacer};
use crate::peer::{PeerController, PeerEvents};
use crate::session::{SessionHandle, SessionReport, SignalingSession};
use crate::{Error, Result};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

/// One media track: where units come from, where they go and how they are paced
pub struct Track {
    /// Unit source
    pub source: Box<dyn MediaSource>,
    /// Unit sink
    pub sink: Box<dyn MediaSink>,
    /// Pacing settings
    pub pacer: Pacer,
}

impl Track {
    /// Create a track
    pub fn new<S, K>(pacer: Pacer, source: S, sink: K) -> Self
    where
        S: MediaSource + 'static,
        K: MediaSink + 'static,
    {
        Self {
            source: Box::new(source),
            sink: Box::new(sink),
            pacer,
        }
    }

    /// Create a track paced per the configured policy and deadline
    pub fn from_config<S, K>(label: impl Into<String>, config: &PublisherConfig, source: S, sink: K) -> Self
    where
        S: MediaSource + 'static,
        K: MediaSink + 'static,
    {
        let pacer = Pacer::new(label)
            .with_policy(config.pacing_policy())
            .with_deadline(config.deadline());
        Self::new(pacer, source, sink)
    }
}

/// Outcome of one track
#[derive(Debug)]
pub struct TrackReport {
    /// Track label
    pub label: String,
    /// Pace report, or the error that ended the pacer
    pub outcome: Result<PaceReport>,
}

/// Outcome of a whole publishing run
#[derive(Debug)]
pub struct PublishReport {
    /// Session summary
    pub session: SessionReport,
    /// Per-track outcomes, in the order tracks were added
    pub tracks: Vec<TrackReport>,
}

impl PublishReport {
    /// Whether every pacer finished without error
    pub fn all_tracks_ok(&self) -> bool {
        self.tracks.iter().all(|t| t.outcome.is_ok())
    }
}

/// Publishes a set of tracks into one signaling session
pub struct Publisher<T: SignalTransport + 'static> {
    session: SignalingSession<T>,
    tracks: Vec<Track>,
}

impl<T: SignalTransport + 'static> Publisher<T> {
    /// Create a publisher without tracks
    pub fn new(
        config: PublisherConfig,
        transport: T,
        peer: Arc<dyn PeerController>,
        events: PeerEvents,
    ) -> Self {
        Self {
            session: SignalingSession::new(config, transport, peer, events),
            tracks: Vec::new(),
        }
    }

    /// Add a track
    pub fn add_track(&mut self, track: Track) -> &mut Self {
        self.tracks.push(track);
        self
    }

    /// Handle for closing the session early
    pub fn session_handle(&self) -> SessionHandle {
        self.session.handle()
    }

    /// Run until every track finished and the session closed
    ///
    /// Pacer errors are recorded in their [`TrackReport`]. Session-fatal
    /// errors are returned.
    pub async fn run(self) -> Result<PublishReport> {
        let Publisher { session, tracks } = self;
        let handle = session.handle();
        let has_tracks = !tracks.is_empty();

        info!(
            session_id = %session.context().session_id,
            tracks = tracks.len(),
            "Starting publisher"
        );

        let pacers: Vec<_> = tracks
            .into_iter()
            .map(|track| {
                let label = track.pacer.label().to_string();
                let task = track
                    .pacer
                    .spawn(track.source, session.gate_waiter(), track.sink);
                (label, task)
            })
            .collect();

        let session_task = tokio::spawn(session.run());

        let (labels, tasks): (Vec<_>, Vec<_>) = pacers.into_iter().unzip();
        let results = join_all(tasks).await;

        let track_reports: Vec<TrackReport> = labels
            .into_iter()
            .zip(results)
            .map(|(label, joined)| {
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(e) => Err(Error::Internal(format!("Pacer task panicked: {}", e))),
                };
                if let Err(e) = &outcome {
                    warn!(track = %label, "Track ended with error: {}", e);
                }
                TrackReport { label, outcome }
            })
            .collect();

        if has_tracks {
            info!("All tracks finished, closing session");
            handle.close();
        }

        let session_report = session_task
            .await
            .map_err(|e| Error::Internal(format!("Session task panicked: {}", e)))??;

        Ok(PublishReport {
            session: session_report,
            tracks: track_reports,
        })
    }
}
