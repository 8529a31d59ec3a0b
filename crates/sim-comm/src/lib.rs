//! Transport-agnostic message-passing abstraction.
//!
//! One trait describing the contract ([`Comm`]), one production
//! implementation ([`ChannelComm`]) that models each rank as an OS thread
//! talking over bounded `crossbeam-channel` endpoints rather than real OS
//! processes under an MPI launcher. The trait boundary is where a
//! process-per-rank, real-MPI-backed implementation would slot in later.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Capacity of each rank's inbound channel.
pub const CHANNEL_CAP: usize = 8192;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    MigrationCount,
    MigrationPayload,
    GhostCount,
    GhostPayload,
    SnapshotCount,
    SnapshotPayload,
    Broadcast,
    Gather,
    BootstrapCount,
    BootstrapPayload,
}

#[derive(Debug, thiserror::Error)]
pub enum CommError {
    #[error("rank {0} is out of range for a communicator of size {1}")]
    InvalidRank(usize, usize),
    #[error("send to rank {to} failed: peer inbox is closed")]
    SendFailed { to: usize },
    #[error("recv timed out waiting for tag {0:?}")]
    Timeout(Tag),
    #[error("recv failed: all peer senders are gone")]
    Disconnected,
    #[error("gather_to_root called with a communicator larger than supported")]
    GatherOverflow,
}

pub trait Comm: Send + Sync {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn send(&self, to: usize, tag: Tag, payload: &[u8]) -> Result<(), CommError>;
    fn try_recv(&self, tag: Tag) -> Result<Option<(usize, Vec<u8>)>, CommError>;
    fn recv(&self, tag: Tag) -> Result<(usize, Vec<u8>), CommError>;
    fn broadcast_from_root(&self, payload: &mut Vec<u8>) -> Result<(), CommError>;
    fn gather_to_root(&self, payload: &[u8]) -> Result<Option<Vec<Vec<u8>>>, CommError>;
    fn barrier(&self) -> Result<(), CommError>;
}

struct Envelope {
    from: usize,
    tag: Tag,
    payload: Vec<u8>,
}

/// Messages not yet matched by a `recv`/`try_recv` call for their tag sit
/// here, keyed by tag, in arrival order.
type PendingByTag = Mutex<HashMap<Tag, VecDeque<(usize, Vec<u8>)>>>;

/// Full-mesh-equivalent communicator backed by one bounded inbound channel
/// per rank; every rank holds a sender clone for each peer's channel.
pub struct ChannelComm {
    rank: usize,
    size: usize,
    inbox: Receiver<Envelope>,
    outboxes: Vec<Sender<Envelope>>,
    pending: PendingByTag,
    barrier: Arc<Barrier>,
}

impl ChannelComm {
    /// Builds `size` communicators wired into a full mesh, one per rank.
    /// The returned vector's index `i` is rank `i`'s handle.
    pub fn mesh(size: usize) -> Vec<ChannelComm> {
        assert!(size > 0, "communicator size must be positive");

        let mut senders = Vec::with_capacity(size);
        let mut receivers = Vec::with_capacity(size);
        for _ in 0..size {
            let (tx, rx) = crossbeam_channel::bounded(CHANNEL_CAP);
            senders.push(tx);
            receivers.push(rx);
        }

        let barrier = Arc::new(Barrier::new(size));

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ChannelComm {
                rank,
                size,
                inbox,
                outboxes: senders.clone(),
                pending: Mutex::new(HashMap::new()),
                barrier: Arc::clone(&barrier),
            })
            .collect()
    }

    fn check_rank(&self, to: usize) -> Result<(), CommError> {
        if to >= self.size {
            Err(CommError::InvalidRank(to, self.size))
        } else {
            Ok(())
        }
    }

    /// Drains everything currently queued in the inbox into `pending`,
    /// bucketed by tag, without blocking.
    fn drain_nonblocking(&self) {
        let mut pending = self.pending.lock().unwrap();
        loop {
            match self.inbox.try_recv() {
                Ok(envelope) => pending
                    .entry(envelope.tag)
                    .or_default()
                    .push_back((envelope.from, envelope.payload)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => break,
            }
        }
    }
}

impl Comm for ChannelComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send(&self, to: usize, tag: Tag, payload: &[u8]) -> Result<(), CommError> {
        self.check_rank(to)?;
        self.outboxes[to]
            .send(Envelope {
                from: self.rank,
                tag,
                payload: payload.to_vec(),
            })
            .map_err(|_| CommError::SendFailed { to })
    }

    fn try_recv(&self, tag: Tag) -> Result<Option<(usize, Vec<u8>)>, CommError> {
        self.drain_nonblocking();
        let mut pending = self.pending.lock().unwrap();
        Ok(pending.get_mut(&tag).and_then(VecDeque::pop_front))
    }

    fn recv(&self, tag: Tag) -> Result<(usize, Vec<u8>), CommError> {
        loop {
            if let Some(hit) = {
                let mut pending = self.pending.lock().unwrap();
                pending.get_mut(&tag).and_then(VecDeque::pop_front)
            } {
                return Ok(hit);
            }

            match self.inbox.recv_timeout(Duration::from_millis(50)) {
                Ok(envelope) if envelope.tag == tag => return Ok((envelope.from, envelope.payload)),
                Ok(envelope) => {
                    self.pending
                        .lock()
                        .unwrap()
                        .entry(envelope.tag)
                        .or_default()
                        .push_back((envelope.from, envelope.payload));
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(CommError::Disconnected),
            }
        }
    }

    fn broadcast_from_root(&self, payload: &mut Vec<u8>) -> Result<(), CommError> {
        if self.rank == 0 {
            for to in 1..self.size {
                self.send(to, Tag::Broadcast, payload)?;
            }
            Ok(())
        } else {
            let (_, bytes) = self.recv(Tag::Broadcast)?;
            *payload = bytes;
            Ok(())
        }
    }

    fn gather_to_root(&self, payload: &[u8]) -> Result<Option<Vec<Vec<u8>>>, CommError> {
        if self.rank == 0 {
            let mut collected = vec![Vec::new(); self.size];
            collected[0] = payload.to_vec();
            for _ in 1..self.size {
                let (from, bytes) = self.recv(Tag::Gather)?;
                if from >= self.size {
                    return Err(CommError::GatherOverflow);
                }
                collected[from] = bytes;
            }
            Ok(Some(collected))
        } else {
            self.send(0, Tag::Gather, payload)?;
            Ok(None)
        }
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.barrier.wait();
        Ok(())
    }
}
