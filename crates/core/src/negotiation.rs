//! Offer/answer lifecycle for a single peer connection
//!
//! The coordinator is driven from the session's receive loop, one message at
//! a time, so it never needs internal locking. It never waits for replies:
//! every operation returns what (if anything) must be sent and the next
//! inbound message continues the exchange.

use crate::candidates::{CandidateBuffer, CandidateDisposition};
use crate::peer::PeerController;
use crate::protocol::{IceCandidate, SessionDescription};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which side of the glare tie-break this coordinator is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// The side that sent the first offer; wins glare
    Offerer,
    /// The side that answered the first offer; yields in glare
    Answerer,
}

/// Negotiation state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationState {
    /// No offer has been created yet
    NoOffer,
    /// Initial local offer sent, waiting for the answer
    LocalOfferSent,
    /// Local and remote descriptions agree
    Stable,
    /// Local renegotiation offer sent, waiting for the answer
    RenegotiationInFlight,
    /// Closed by the session
    Closed,
    /// A description or candidate could not be applied
    Failed,
}

impl NegotiationState {
    /// Whether a local offer is awaiting its answer
    pub fn has_pending_offer(self) -> bool {
        matches!(
            self,
            NegotiationState::LocalOfferSent | NegotiationState::RenegotiationInFlight
        )
    }

    /// Whether no further negotiation can happen
    pub fn is_terminal(self) -> bool {
        matches!(self, NegotiationState::Closed | NegotiationState::Failed)
    }
}

/// Lifecycle of one offer/answer exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    /// Offer out, answer not yet applied
    Pending,
    /// Both descriptions applied
    Applied,
    /// Abandoned in favour of the remote side's offer
    Superseded,
}

/// One offer/answer exchange
///
/// `role` says who made the offer: for `Offerer` rounds `offer` is local and
/// `answer` remote, for `Answerer` rounds the other way round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationRound {
    /// The offer of this round
    pub offer: Option<SessionDescription>,
    /// The answer of this round, once known
    pub answer: Option<SessionDescription>,
    /// Which side offered
    pub role: Role,
    /// Round status
    pub status: RoundStatus,
}

impl NegotiationRound {
    fn local_offer(offer: SessionDescription) -> Self {
        Self {
            offer: Some(offer),
            answer: None,
            role: Role::Offerer,
            status: RoundStatus::Pending,
        }
    }
}

/// Result of handling a remote answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// The answer was applied and the connection is stable
    Applied,
    /// The answer duplicated the current remote description
    Ignored,
}

/// Result of handling a remote offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Send this answer back
    Answered(SessionDescription),
    /// Glare won: ignore the incoming offer and send ours again
    Retransmit(SessionDescription),
    /// The offer duplicated the current remote description
    Ignored,
}

/// Drives the offer/answer exchange over a [`PeerController`]
pub struct NegotiationCoordinator {
    peer: Arc<dyn PeerController>,
    role: Role,
    state: NegotiationState,
    candidates: CandidateBuffer,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    pending: Option<NegotiationRound>,
    history: Vec<NegotiationRound>,
    candidates_applied: usize,
    deferred_renegotiation: bool,
}

impl NegotiationCoordinator {
    /// Create a coordinator in `NoOffer`
    pub fn new(peer: Arc<dyn PeerController>, role: Role) -> Self {
        Self {
            peer,
            role,
            state: NegotiationState::NoOffer,
            candidates: CandidateBuffer::new(),
            local_description: None,
            remote_description: None,
            pending: None,
            history: Vec::new(),
            candidates_applied: 0,
            deferred_renegotiation: false,
        }
    }

    /// Create and apply the initial local offer
    ///
    /// With `wait_for_gathering` the returned offer is the local description
    /// after ICE gathering finished, so it carries every candidate.
    pub async fn start(&mut self, wait_for_gathering: bool) -> Result<SessionDescription> {
        if self.state != NegotiationState::NoOffer {
            return Err(Error::Internal(format!(
                "Initial offer requested in state {:?}",
                self.state
            )));
        }

        let mut offer = self.create_and_apply_offer().await?;

        if wait_for_gathering {
            debug!("Waiting for ICE gathering before sending offer");
            self.peer.wait_gathering_complete().await;
            if let Some(gathered) = self.peer.local_description().await {
                offer = gathered;
            }
        }

        self.local_description = Some(offer.clone());
        self.pending = Some(NegotiationRound::local_offer(offer.clone()));
        self.transition(NegotiationState::LocalOfferSent);

        Ok(offer)
    }

    /// Apply a remote answer to our pending offer
    ///
    /// An answer equal to the current remote description is a replay of an
    /// earlier round and is ignored in every state.
    pub async fn handle_answer(&mut self, answer: SessionDescription) -> Result<AnswerOutcome> {
        if !self.state.is_terminal() && self.is_current_remote(&answer) {
            warn!(state = ?self.state, "Ignoring duplicate remote answer");
            return Ok(AnswerOutcome::Ignored);
        }

        match self.state {
            NegotiationState::LocalOfferSent | NegotiationState::RenegotiationInFlight => {}
            state => {
                return Err(self.fail_with(Error::Negotiation(format!(
                    "Remote answer received in state {:?}",
                    state
                ))));
            }
        }

        self.apply_remote(answer.clone(), "answer").await?;
        self.flush_candidates().await?;

        if let Some(mut round) = self.pending.take() {
            round.answer = Some(answer);
            round.status = RoundStatus::Applied;
            self.history.push(round);
        }

        self.transition(NegotiationState::Stable);
        info!(rounds = self.rounds_applied(), "Remote answer applied");

        Ok(AnswerOutcome::Applied)
    }

    /// Handle a remote offer, resolving glare by role
    ///
    /// An offer equal to the current remote description was already answered
    /// and is ignored before any glare handling.
    pub async fn handle_offer(&mut self, offer: SessionDescription) -> Result<OfferOutcome> {
        if !self.state.is_terminal() && self.is_current_remote(&offer) {
            warn!(state = ?self.state, "Ignoring duplicate remote offer");
            return Ok(OfferOutcome::Ignored);
        }

        match self.state {
            NegotiationState::Closed | NegotiationState::Failed => {
                Err(Error::Negotiation(format!(
                    "Remote offer received in state {:?}",
                    self.state
                )))
            }
            NegotiationState::NoOffer => match self.role {
                Role::Offerer => Err(self.fail_with(Error::Negotiation(
                    "Remote offer received before the local offer".to_string(),
                ))),
                Role::Answerer => self.answer_offer(offer).await,
            },
            NegotiationState::Stable => self.answer_offer(offer).await,
            NegotiationState::LocalOfferSent | NegotiationState::RenegotiationInFlight => {
                match self.role {
                    Role::Offerer => {
                        let ours = self.pending.as_ref().and_then(|r| r.offer.clone());
                        match ours {
                            Some(ours) => {
                                info!("Offer collision, keeping local offer");
                                Ok(OfferOutcome::Retransmit(ours))
                            }
                            None => Err(self.fail_with(Error::Internal(
                                "Pending state without a pending offer".to_string(),
                            ))),
                        }
                    }
                    Role::Answerer => {
                        info!("Offer collision, rolling back local offer");
                        if let Err(e) = self.peer.rollback_local_offer().await {
                            return Err(self.fail_with(Error::PeerConnection(format!(
                                "Rollback failed: {}",
                                e
                            ))));
                        }

                        if let Some(mut round) = self.pending.take() {
                            round.status = RoundStatus::Superseded;
                            self.history.push(round);
                        }
                        self.deferred_renegotiation = true;

                        self.answer_offer(offer).await
                    }
                }
            }
        }
    }

    /// Start a local renegotiation
    ///
    /// Returns the offer to send, or `None` when the request was coalesced
    /// into an exchange already in progress. Requests made before the initial
    /// exchange completed are dropped; the initial offer already carries the
    /// local media.
    pub async fn renegotiate(&mut self) -> Result<Option<SessionDescription>> {
        match self.state {
            NegotiationState::Stable => {}
            NegotiationState::RenegotiationInFlight => {
                debug!("Renegotiation requested while in flight, deferring");
                self.deferred_renegotiation = true;
                return Ok(None);
            }
            state => {
                debug!(?state, "Renegotiation request dropped");
                return Ok(None);
            }
        }

        let offer = self.create_and_apply_offer().await?;
        self.local_description = Some(offer.clone());
        self.pending = Some(NegotiationRound::local_offer(offer.clone()));
        self.transition(NegotiationState::RenegotiationInFlight);

        Ok(Some(offer))
    }

    /// Apply or buffer a remote candidate
    pub async fn handle_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if self.state.is_terminal() {
            debug!(state = ?self.state, "Dropping remote candidate");
            return Ok(());
        }

        match self.candidates.offer(candidate) {
            CandidateDisposition::ApplyNow(candidate) => self.apply_candidate(candidate).await,
            CandidateDisposition::Buffered { depth } => {
                debug!(depth, "Buffered remote candidate");
                Ok(())
            }
        }
    }

    /// Consume a renegotiation deferred by coalescing or glare, once stable
    pub fn take_deferred_renegotiation(&mut self) -> bool {
        if self.deferred_renegotiation && self.state == NegotiationState::Stable {
            self.deferred_renegotiation = false;
            true
        } else {
            false
        }
    }

    /// Close the peer connection
    pub async fn close(&mut self) -> Result<()> {
        if self.state == NegotiationState::Closed {
            return Ok(());
        }

        if self.state != NegotiationState::Failed {
            self.transition(NegotiationState::Closed);
        }

        self.peer
            .close()
            .await
            .map_err(|e| Error::PeerConnection(format!("Close failed: {}", e)))
    }

    /// Mark the negotiation failed
    pub fn fail(&mut self) {
        if self.state != NegotiationState::Failed {
            self.transition(NegotiationState::Failed);
        }
    }

    /// Current state
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Glare role
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current local description
    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    /// Current remote description
    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    /// The round awaiting its answer, if any
    pub fn pending_round(&self) -> Option<&NegotiationRound> {
        self.pending.as_ref()
    }

    /// Completed and superseded rounds, oldest first
    pub fn rounds(&self) -> &[NegotiationRound] {
        &self.history
    }

    /// Number of rounds that reached `Applied`
    pub fn rounds_applied(&self) -> usize {
        self.history
            .iter()
            .filter(|r| r.status == RoundStatus::Applied)
            .count()
    }

    /// Remote candidates handed to the peer connection so far
    pub fn candidates_applied(&self) -> usize {
        self.candidates_applied
    }

    /// Remote candidates still waiting for the remote description
    pub fn buffered_candidates(&self) -> usize {
        self.candidates.len()
    }

    fn is_current_remote(&self, desc: &SessionDescription) -> bool {
        self.remote_description.as_ref() == Some(desc)
    }

    async fn create_and_apply_offer(&mut self) -> Result<SessionDescription> {
        let offer = match self.peer.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                return Err(self.fail_with(Error::PeerConnection(format!(
                    "Failed to create offer: {}",
                    e
                ))))
            }
        };

        if let Err(e) = self.peer.set_local_description(offer.clone()).await {
            return Err(self.fail_with(Error::PeerConnection(format!(
                "Failed to set local offer: {}",
                e
            ))));
        }

        Ok(offer)
    }

    async fn answer_offer(&mut self, offer: SessionDescription) -> Result<OfferOutcome> {
        self.apply_remote(offer.clone(), "offer").await?;
        self.flush_candidates().await?;

        let answer = match self.peer.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                return Err(self.fail_with(Error::PeerConnection(format!(
                    "Failed to create answer: {}",
                    e
                ))))
            }
        };

        if let Err(e) = self.peer.set_local_description(answer.clone()).await {
            return Err(self.fail_with(Error::PeerConnection(format!(
                "Failed to set local answer: {}",
                e
            ))));
        }

        self.local_description = Some(answer.clone());
        self.history.push(NegotiationRound {
            offer: Some(offer),
            answer: Some(answer.clone()),
            role: Role::Answerer,
            status: RoundStatus::Applied,
        });
        self.transition(NegotiationState::Stable);
        info!(rounds = self.rounds_applied(), "Remote offer answered");

        Ok(OfferOutcome::Answered(answer))
    }

    async fn apply_remote(&mut self, desc: SessionDescription, what: &str) -> Result<()> {
        if let Err(e) = self.peer.set_remote_description(desc.clone()).await {
            return Err(self.fail_with(Error::Negotiation(format!(
                "Failed to apply remote {}: {}",
                what, e
            ))));
        }

        self.remote_description = Some(desc);
        Ok(())
    }

    async fn flush_candidates(&mut self) -> Result<()> {
        let flushed = self.candidates.on_remote_description_set();
        if !flushed.is_empty() {
            debug!(count = flushed.len(), "Flushing buffered remote candidates");
        }

        for candidate in flushed {
            self.apply_candidate(candidate).await?;
        }

        Ok(())
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) -> Result<()> {
        if let Err(e) = self.peer.add_ice_candidate(candidate).await {
            return Err(self.fail_with(Error::Negotiation(format!(
                "Failed to apply remote candidate: {}",
                e
            ))));
        }

        self.candidates_applied += 1;
        Ok(())
    }

    fn fail_with(&mut self, err: Error) -> Error {
        self.fail();
        err
    }

    fn transition(&mut self, next: NegotiationState) {
        debug!(from = ?self.state, to = ?next, "Negotiation state changed");
        self.state = next;
    }
}
