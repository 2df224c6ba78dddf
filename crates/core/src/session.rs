//! Signaling session state machine
//!
//! The session owns the receive loop: inbound replies, peer events and close
//! requests are all handled on one task, in arrival order. It drives the
//! [`NegotiationCoordinator`] and fires the connectivity gate the pacers wait
//! on.

use crate::candidates::LocalCandidate;
use crate::channel::{SignalTransport, TransportClosed};
use crate::config::{JoinMode, PublisherConfig};
use crate::gate::{ConnectivityGate, GateWaiter};
use crate::negotiation::{NegotiationCoordinator, NegotiationState, OfferOutcome, Role};
use crate::peer::{ConnectivityState, PeerController, PeerEvent, PeerEvents};
use crate::protocol::{IceCandidate, SessionDescription, SignalReply, SignalRequest};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Created, nothing sent yet
    Connecting,
    /// Join sent, waiting for the reply
    Joining,
    /// Join accepted, waiting for connectivity
    Negotiating,
    /// Connectivity established, media flowing
    Connected,
    /// Shutting down
    Closing,
    /// Shut down cleanly
    Closed,
    /// Shut down after a fatal error
    Failed,
}

impl SessionState {
    /// Whether the session has ended
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

/// Identity of one session, passed explicitly instead of living in globals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Local session identifier (log correlation)
    pub session_id: Uuid,
    /// Room joined
    pub room_id: String,
    /// Name announced in `join`
    pub display_name: String,
}

impl SessionContext {
    /// Create a context with a fresh session id
    pub fn new(room_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            room_id: room_id.into(),
            display_name: display_name.into(),
        }
    }

    /// Create a context from configuration
    pub fn from_config(config: &PublisherConfig) -> Self {
        Self::new(config.room_id.clone(), config.effective_display_name())
    }
}

/// Summary of a finished session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    /// Local session identifier
    pub session_id: Uuid,
    /// State the session ended in
    pub final_state: SessionState,
    /// Offer/answer rounds applied
    pub rounds_applied: usize,
    /// Inbound messages dropped as undecodable
    pub dropped_messages: u64,
    /// Remote candidates applied
    pub candidates_applied: usize,
    /// Whether connectivity was ever established
    pub connected: bool,
}

/// Requests a running session to close
#[derive(Debug, Clone)]
pub struct SessionHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl SessionHandle {
    /// Ask the session to close; repeated calls are harmless
    pub fn close(&self) {
        let _ = self.shutdown_tx.try_send(());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingReply {
    Join,
    Publish,
}

impl PendingReply {
    fn method_name(self) -> &'static str {
        match self {
            PendingReply::Join => "join",
            PendingReply::Publish => "publish",
        }
    }
}

/// Signaling session over a [`SignalTransport`]
pub struct SignalingSession<T: SignalTransport> {
    context: SessionContext,
    config: PublisherConfig,
    transport: T,
    coordinator: NegotiationCoordinator,
    events: PeerEvents,
    peer_events_open: bool,
    gate: ConnectivityGate,
    state: SessionState,
    connectivity: ConnectivityState,
    awaiting: Option<PendingReply>,
    connected: bool,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
    dropped_messages: u64,
}

impl<T: SignalTransport> SignalingSession<T> {
    /// Create a session; nothing is sent until [`run`](Self::run)
    pub fn new(
        config: PublisherConfig,
        transport: T,
        peer: Arc<dyn PeerController>,
        events: PeerEvents,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Self {
            context: SessionContext::from_config(&config),
            config,
            transport,
            coordinator: NegotiationCoordinator::new(peer, Role::Offerer),
            events,
            peer_events_open: true,
            gate: ConnectivityGate::new(),
            state: SessionState::Connecting,
            connectivity: ConnectivityState::New,
            awaiting: None,
            connected: false,
            shutdown_tx,
            shutdown_rx,
            dropped_messages: 0,
        }
    }

    /// Session identity
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Waiter released when connectivity is first established
    ///
    /// Take waiters before calling [`run`](Self::run), which consumes the session.
    pub fn gate_waiter(&self) -> GateWaiter {
        self.gate.subscribe()
    }

    /// Handle for closing the session from another task
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Run until the transport closes, a close is requested or a fatal error occurs
    pub async fn run(mut self) -> Result<SessionReport> {
        info!(
            session_id = %self.context.session_id,
            room = %self.context.room_id,
            join_mode = ?self.config.join_mode,
            "Starting signaling session"
        );

        let outcome = self.drive().await;

        self.transition(SessionState::Closing);
        if let Err(e) = self.transport.close_send().await {
            warn!(session_id = %self.context.session_id, "Failed to close signaling stream: {}", e);
        }
        if let Err(e) = self.coordinator.close().await {
            warn!(session_id = %self.context.session_id, "Failed to close peer connection: {}", e);
        }
        self.gate.shutdown();

        match outcome {
            Ok(()) => {
                self.transition(SessionState::Closed);
                info!(session_id = %self.context.session_id, "Signaling session closed");
                Ok(self.report())
            }
            Err(e) => {
                self.transition(SessionState::Failed);
                error!(session_id = %self.context.session_id, "Signaling session failed: {}", e);
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> Result<()> {
        self.transition(SessionState::Joining);
        self.send_join().await?;

        let join_deadline = self.config.join_timeout().map(|t| Instant::now() + t);

        loop {
            let timer = join_deadline.filter(|_| self.coordinator.rounds_applied() == 0);
            let handshake_timer = async move {
                match timer {
                    Some(deadline) => sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            // Peer events queued before a reply are handled first, so a
            // negotiation-needed raised by tracks added before `run` is seen
            // while the initial offer is still pending.
            tokio::select! {
                biased;
                _ = self.shutdown_rx.recv() => {
                    info!(session_id = %self.context.session_id, "Session close requested");
                    return Ok(());
                }
                event = self.events.recv(), if self.peer_events_open => match event {
                    Some(event) => self.handle_peer_event(event).await?,
                    None => {
                        debug!(session_id = %self.context.session_id, "Peer event stream ended");
                        self.peer_events_open = false;
                    }
                },
                reply = self.transport.recv() => match reply {
                    Ok(reply) => self.handle_reply(reply).await?,
                    Err(reason) => return self.on_transport_closed(reason),
                },
                _ = handshake_timer => {
                    return Err(Error::OperationTimeout(format!(
                        "No answer to {} within {:?}",
                        self.awaiting.map_or("offer", PendingReply::method_name),
                        self.config.join_timeout().unwrap_or_default()
                    )));
                }
            }

            if self.coordinator.take_deferred_renegotiation() {
                debug!(session_id = %self.context.session_id, "Issuing deferred renegotiation");
                self.renegotiate().await?;
            }
        }
    }

    async fn send_join(&mut self) -> Result<()> {
        let description = match self.config.join_mode {
            JoinMode::JoinWithOffer => Some(self.coordinator.start(!self.config.trickle).await?),
            JoinMode::JoinThenPublish => None,
        };

        self.send(SignalRequest::Join {
            room_id: self.context.room_id.clone(),
            display_name: self.context.display_name.clone(),
            description,
        })
        .await?;
        self.awaiting = Some(PendingReply::Join);

        Ok(())
    }

    async fn handle_reply(&mut self, reply: SignalReply) -> Result<()> {
        debug!(session_id = %self.context.session_id, method = reply.method_name(), "Received signal reply");

        match reply {
            SignalReply::Join { description } => self.on_join_reply(description).await,
            SignalReply::Publish { description } => self.on_publish_reply(description).await,
            SignalReply::Description { payload } => match SessionDescription::from_json(&payload) {
                Ok(desc) => self.apply_remote_description(desc).await,
                Err(e) => {
                    self.drop_message("description", &e);
                    Ok(())
                }
            },
            SignalReply::Trickle { payload } => match IceCandidate::from_json(&payload) {
                Ok(candidate) => self.coordinator.handle_candidate(candidate).await,
                Err(e) => {
                    self.drop_message("trickle", &e);
                    Ok(())
                }
            },
            SignalReply::Error { code, message } => self.on_error_reply(code, message),
        }
    }

    async fn on_join_reply(&mut self, description: Option<String>) -> Result<()> {
        if self.awaiting != Some(PendingReply::Join) {
            warn!(session_id = %self.context.session_id, "Ignoring unexpected join reply");
            return Ok(());
        }

        match self.config.join_mode {
            JoinMode::JoinWithOffer => {
                let Some(json) = description else {
                    self.drop_message("join", &Error::Decode("Join reply carries no answer".to_string()));
                    return Ok(());
                };
                let desc = match SessionDescription::from_json(&json) {
                    Ok(desc) => desc,
                    Err(e) => {
                        self.drop_message("join", &e);
                        return Ok(());
                    }
                };

                info!(session_id = %self.context.session_id, "Join accepted");
                self.awaiting = None;
                self.enter_negotiating();
                self.apply_remote_description(desc).await
            }
            JoinMode::JoinThenPublish => {
                if description.is_some() {
                    debug!(session_id = %self.context.session_id, "Ignoring description on join reply");
                }

                info!(session_id = %self.context.session_id, "Join accepted, publishing");
                self.enter_negotiating();

                let offer = self.coordinator.start(!self.config.trickle).await?;
                self.send(SignalRequest::Publish {
                    description: offer,
                    options: self.config.publish.clone(),
                })
                .await?;
                self.awaiting = Some(PendingReply::Publish);

                Ok(())
            }
        }
    }

    async fn on_publish_reply(&mut self, description: String) -> Result<()> {
        if self.awaiting != Some(PendingReply::Publish) {
            warn!(session_id = %self.context.session_id, "Ignoring unexpected publish reply");
            return Ok(());
        }

        match SessionDescription::from_json(&description) {
            Ok(desc) => {
                info!(session_id = %self.context.session_id, "Publish accepted");
                self.awaiting = None;
                self.apply_remote_description(desc).await
            }
            Err(e) => {
                self.drop_message("publish", &e);
                Ok(())
            }
        }
    }

    fn on_error_reply(&mut self, code: i32, message: String) -> Result<()> {
        match self.awaiting {
            Some(pending) => {
                error!(
                    session_id = %self.context.session_id,
                    code,
                    "{} rejected: {}",
                    pending.method_name(),
                    message
                );
                Err(Error::Signaling { code, message })
            }
            None => {
                warn!(session_id = %self.context.session_id, code, "Remote error: {}", message);
                Ok(())
            }
        }
    }

    async fn apply_remote_description(&mut self, desc: SessionDescription) -> Result<()> {
        if !desc.is_offer() {
            self.coordinator.handle_answer(desc).await?;
            return Ok(());
        }

        match self.coordinator.handle_offer(desc).await? {
            OfferOutcome::Answered(answer) => {
                self.send(SignalRequest::Description { description: answer }).await
            }
            OfferOutcome::Retransmit(offer) => {
                self.send(SignalRequest::Description { description: offer }).await
            }
            OfferOutcome::Ignored => Ok(()),
        }
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) -> Result<()> {
        match event {
            PeerEvent::LocalCandidate(candidate) => match LocalCandidate::from(candidate) {
                LocalCandidate::Candidate(candidate) => {
                    if self.config.trickle {
                        self.send(SignalRequest::Trickle { candidate }).await?;
                    }
                }
                LocalCandidate::EndOfGathering => {
                    debug!(session_id = %self.context.session_id, "Local ICE gathering complete");
                    if self.config.trickle && self.config.signal_end_of_candidates {
                        self.send(SignalRequest::TrickleComplete).await?;
                    }
                }
            },
            PeerEvent::ConnectivityChanged(state) => self.on_connectivity(state),
            PeerEvent::NegotiationNeeded => self.renegotiate().await?,
        }

        Ok(())
    }

    fn on_connectivity(&mut self, state: ConnectivityState) {
        debug!(
            session_id = %self.context.session_id,
            from = ?self.connectivity,
            to = ?state,
            "Connectivity changed"
        );
        self.connectivity = state;

        match state {
            ConnectivityState::Connected => {
                if self.gate.fire() {
                    info!(session_id = %self.context.session_id, "Connectivity established");
                    self.connected = true;
                    if matches!(self.state, SessionState::Joining | SessionState::Negotiating) {
                        self.transition(SessionState::Connected);
                    }
                }
            }
            ConnectivityState::Disconnected | ConnectivityState::Failed => {
                warn!(session_id = %self.context.session_id, ?state, "Connectivity degraded");
            }
            _ => {}
        }
    }

    async fn renegotiate(&mut self) -> Result<()> {
        if let Some(offer) = self.coordinator.renegotiate().await? {
            self.send(SignalRequest::Description { description: offer }).await?;
        }
        Ok(())
    }

    fn on_transport_closed(&mut self, reason: TransportClosed) -> Result<()> {
        if self.coordinator.state() != NegotiationState::Stable {
            return Err(Error::UnexpectedClose(format!(
                "Signaling stream {} while negotiation state was {:?}",
                reason,
                self.coordinator.state()
            )));
        }

        info!(session_id = %self.context.session_id, %reason, "Signaling stream ended");
        Ok(())
    }

    async fn send(&mut self, request: SignalRequest) -> Result<()> {
        self.transport.send(request).await
    }

    fn drop_message(&mut self, method: &str, err: &Error) {
        self.dropped_messages += 1;
        warn!(
            session_id = %self.context.session_id,
            method,
            dropped = self.dropped_messages,
            "Dropping malformed message: {}",
            err
        );
    }

    fn enter_negotiating(&mut self) {
        if self.state == SessionState::Joining {
            self.transition(SessionState::Negotiating);
        }
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(session_id = %self.context.session_id, from = ?self.state, to = ?next, "Session state changed");
            self.state = next;
        }
    }

    fn report(&self) -> SessionReport {
        SessionReport {
            session_id: self.context.session_id,
            final_state: self.state,
            rounds_applied: self.coordinator.rounds_applied(),
            dropped_messages: self.dropped_messages,
            candidates_applied: self.coordinator.candidates_applied(),
            connected: self.connected,
        }
    }
}
