//! Remote ICE candidate buffering
//!
//! Remote candidates may arrive before the remote description is set (they
//! race the answer on the signaling channel). Those are held here in arrival
//! order and handed back once the description lands. After the first flush
//! the buffer is bypassed for the rest of the session.

use crate::protocol::IceCandidate;
use std::collections::VecDeque;

/// What to do with a candidate offered to the buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateDisposition {
    /// The remote description is known; apply the candidate now
    ApplyNow(IceCandidate),
    /// The candidate was queued
    Buffered {
        /// Queue depth after insertion
        depth: usize,
    },
}

/// FIFO buffer of remote candidates awaiting the remote description
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidate>,
    flushed: bool,
}

impl CandidateBuffer {
    /// Create an empty, unflushed buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate, buffering it only while the remote description is unset
    pub fn offer(&mut self, candidate: IceCandidate) -> CandidateDisposition {
        if self.flushed {
            return CandidateDisposition::ApplyNow(candidate);
        }

        self.pending.push_back(candidate);
        CandidateDisposition::Buffered {
            depth: self.pending.len(),
        }
    }

    /// Drain every buffered candidate in arrival order
    ///
    /// Marks the buffer flushed; later offers go straight to `ApplyNow`.
    pub fn on_remote_description_set(&mut self) -> Vec<IceCandidate> {
        self.flushed = true;
        self.pending.drain(..).collect()
    }

    /// Number of buffered candidates
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Whether the remote description has been set at least once
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }
}

/// Classification of a locally gathered candidate event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCandidate {
    /// A candidate to forward to the remote side
    Candidate(IceCandidate),
    /// Gathering finished
    EndOfGathering,
}

impl From<Option<IceCandidate>> for LocalCandidate {
    fn from(candidate: Option<IceCandidate>) -> Self {
        match candidate {
            Some(c) if !c.candidate.is_empty() => LocalCandidate::Candidate(c),
            _ => LocalCandidate::EndOfGathering,
        }
    }
}
