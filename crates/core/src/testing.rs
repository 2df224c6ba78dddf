//! In-memory fakes for the external collaborators
//!
//! Enabled for this crate's own tests and, through the `testing` feature, for
//! downstream crates that want to drive a session without a real WebRTC stack.

use crate::pacer::{MediaSink, MediaSource, MediaUnit};
use crate::peer::{ConnectivityState, PeerController, PeerEvent, PeerEventSender, PeerEvents};
use crate::protocol::{IceCandidate, SdpKind, SessionDescription};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A call recorded by [`MockPeer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    CreateOffer,
    CreateAnswer,
    SetLocal(SessionDescription),
    SetRemote(SessionDescription),
    Rollback,
    AddCandidate(IceCandidate),
    WaitGathering,
    Close,
}

#[derive(Debug, Default)]
struct MockPeerState {
    calls: Vec<PeerCall>,
    offers: u32,
    answers: u32,
    local: Option<SessionDescription>,
    stable_local: Option<SessionDescription>,
    gathered: bool,
    fail_create_offer: bool,
    fail_set_remote: bool,
    fail_add_candidate: bool,
}

/// Scriptable [`PeerController`] that records every call
pub struct MockPeer {
    label: String,
    state: Mutex<MockPeerState>,
    events: PeerEventSender,
}

impl MockPeer {
    /// Create a mock and the event stream it feeds
    ///
    /// Generated SDP bodies embed `label`, so two mocks never produce equal
    /// descriptions.
    pub fn new(label: impl Into<String>) -> (Self, PeerEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                label: label.into(),
                state: Mutex::new(MockPeerState::default()),
                events,
            },
            rx,
        )
    }

    /// Every call so far, in order
    pub fn calls(&self) -> Vec<PeerCall> {
        self.state.lock().calls.clone()
    }

    /// Remote candidates applied so far, in order
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PeerCall::AddCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    /// Make `create_offer` fail
    pub fn fail_create_offer(&self, fail: bool) {
        self.state.lock().fail_create_offer = fail;
    }

    /// Make `set_remote_description` fail
    pub fn fail_set_remote(&self, fail: bool) {
        self.state.lock().fail_set_remote = fail;
    }

    /// Make `add_ice_candidate` fail
    pub fn fail_add_candidate(&self, fail: bool) {
        self.state.lock().fail_add_candidate = fail;
    }

    /// Emit an arbitrary event; `false` once the stream is dropped
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// Emit a connectivity change
    pub fn set_connectivity(&self, state: ConnectivityState) -> bool {
        self.emit(PeerEvent::ConnectivityChanged(state))
    }

    /// Emit local candidates followed by the end-of-gathering marker
    pub fn gather(&self, candidates: &[&str]) {
        for candidate in candidates {
            self.emit(PeerEvent::LocalCandidate(Some(IceCandidate::new(*candidate))));
        }
        self.emit(PeerEvent::LocalCandidate(None));
    }

    fn record(&self, call: PeerCall) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl PeerController for MockPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        state.calls.push(PeerCall::CreateOffer);
        if state.fail_create_offer {
            return Err(Error::PeerConnection("scripted offer failure".to_string()));
        }
        state.offers += 1;
        Ok(SessionDescription::offer(format!(
            "v=0 {} offer {}",
            self.label, state.offers
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let mut state = self.state.lock();
        state.calls.push(PeerCall::CreateAnswer);
        state.answers += 1;
        Ok(SessionDescription::answer(format!(
            "v=0 {} answer {}",
            self.label, state.answers
        )))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(PeerCall::SetLocal(desc.clone()));
        if desc.kind == SdpKind::Answer {
            state.stable_local = Some(desc.clone());
        }
        state.local = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(PeerCall::SetRemote(desc.clone()));
        if state.fail_set_remote {
            return Err(Error::PeerConnection("scripted remote description failure".to_string()));
        }
        if desc.kind == SdpKind::Answer {
            state.stable_local = state.local.clone();
        }
        Ok(())
    }

    async fn rollback_local_offer(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(PeerCall::Rollback);
        state.local = state.stable_local.clone();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(PeerCall::AddCandidate(candidate));
        if state.fail_add_candidate {
            return Err(Error::PeerConnection("scripted candidate failure".to_string()));
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let state = self.state.lock();
        state.local.clone().map(|mut desc| {
            if state.gathered {
                desc.sdp.push_str("\r\na=end-of-candidates");
            }
            desc
        })
    }

    async fn wait_gathering_complete(&self) {
        let mut state = self.state.lock();
        state.calls.push(PeerCall::WaitGathering);
        state.gathered = true;
    }

    async fn close(&self) -> Result<()> {
        self.record(PeerCall::Close);
        Ok(())
    }
}

/// [`MediaSource`] over a fixed list of units
#[derive(Debug, Clone)]
pub struct VecSource {
    units: Vec<MediaUnit>,
    position: usize,
    resets: usize,
    fail_at: Option<usize>,
    stall_at: Option<usize>,
}

impl VecSource {
    /// Source yielding `units` once
    pub fn new(units: Vec<MediaUnit>) -> Self {
        Self {
            units,
            position: 0,
            resets: 0,
            fail_at: None,
            stall_at: None,
        }
    }

    /// `count` units of `duration` each, payload set to the unit index
    pub fn uniform(count: usize, duration: Duration) -> Self {
        Self::new(
            (0..count)
                .map(|i| MediaUnit::new(vec![i as u8], duration))
                .collect(),
        )
    }

    /// Fail with a source error instead of yielding unit `index`
    pub fn failing_at(mut self, index: usize) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Never resolve the read of unit `index`, like a capture device gone quiet
    pub fn stalling_at(mut self, index: usize) -> Self {
        self.stall_at = Some(index);
        self
    }

    /// Number of rewinds
    pub fn resets(&self) -> usize {
        self.resets
    }
}

#[async_trait]
impl MediaSource for VecSource {
    async fn next_unit(&mut self) -> Result<Option<MediaUnit>> {
        if self.stall_at == Some(self.position) {
            std::future::pending::<()>().await;
        }

        if self.fail_at == Some(self.position) {
            return Err(Error::MediaSource(format!(
                "scripted read failure at unit {}",
                self.position
            )));
        }

        let unit = self.units.get(self.position).cloned();
        if unit.is_some() {
            self.position += 1;
        }
        Ok(unit)
    }

    async fn reset(&mut self) -> Result<()> {
        self.position = 0;
        self.resets += 1;
        Ok(())
    }
}

/// A unit written to a [`RecordingSink`] and when
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    /// Time of the write
    pub at: Instant,
    /// The unit
    pub unit: MediaUnit,
}

/// [`MediaSink`] that records writes; clones share the same record
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    writes: Arc<Mutex<Vec<RecordedWrite>>>,
    fail_after: Option<usize>,
    stall_after: Option<usize>,
}

impl RecordingSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write after the first `count`
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Never complete any write after the first `count`
    pub fn stalling_after(mut self, count: usize) -> Self {
        self.stall_after = Some(count);
        self
    }

    /// Writes so far
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().clone()
    }

    /// Number of writes so far
    pub fn len(&self) -> usize {
        self.writes.lock().len()
    }

    /// Whether nothing was written
    pub fn is_empty(&self) -> bool {
        self.writes.lock().is_empty()
    }
}

#[async_trait]
impl MediaSink for RecordingSink {
    async fn write(&mut self, unit: &MediaUnit) -> Result<()> {
        if self.stall_after.is_some_and(|limit| self.len() >= limit) {
            std::future::pending::<()>().await;
        }

        let mut writes = self.writes.lock();
        if self.fail_after.is_some_and(|limit| writes.len() >= limit) {
            return Err(Error::MediaSink("scripted write failure".to_string()));
        }

        writes.push(RecordedWrite {
            at: Instant::now(),
            unit: unit.clone(),
        });
        Ok(())
    }
}
