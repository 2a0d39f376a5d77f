//! In-process world: one thread per rank, messages over `std::sync::mpsc`.
//!
//! Workers share nothing but their channel endpoints, and every message
//! travels as encoded bytes, exactly as it would between processes. Each rank owns a single
//! inbox; messages that arrive before they are asked for are parked in a
//! per-rank pending queue so receives can match on `(source, tag)` in any
//! order, with FIFO order preserved per sender and tag.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt::Display;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, OnceLock};
use std::thread;

use thiserror::Error;

use crate::backend::{CommError, Communicator, Payload, Tag};

enum Body {
    Data(Payload),
    Abort { origin: usize, reason: String },
}

struct Envelope {
    from: usize,
    tag: Tag,
    body: Body,
}

impl Envelope {
    fn matches(&self, from: usize, tag: Tag) -> bool {
        match self.body {
            Body::Abort { .. } => true,
            Body::Data(_) => self.from == from && self.tag == tag,
        }
    }

    fn open(self) -> Result<Payload, CommError> {
        match self.body {
            Body::Data(payload) => Ok(payload),
            Body::Abort { origin, reason } => Err(CommError::Aborted { origin, reason }),
        }
    }
}

/// Cloneable handle that can tear the job down from any thread.
#[derive(Clone)]
pub struct AbortHandle {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    origin: Arc<OnceLock<(usize, String)>>,
}

impl AbortHandle {
    /// Abort the job on behalf of this rank. Only the first abort in a job is
    /// delivered; later calls return the original cause.
    pub fn trigger(&self, reason: &str) -> CommError {
        if self.origin.set((self.rank, reason.to_string())).is_ok() {
            log::error!("[rank {}] aborting job: {}", self.rank, reason);
            for (dest, peer) in self.peers.iter().enumerate() {
                if dest == self.rank {
                    continue;
                }
                // A peer that already exited has nothing left to wake up.
                let _ = peer.send(Envelope {
                    from: self.rank,
                    tag: Tag::Data,
                    body: Body::Abort {
                        origin: self.rank,
                        reason: reason.to_string(),
                    },
                });
            }
        }
        self.aborted().unwrap_or(CommError::Aborted {
            origin: self.rank,
            reason: reason.to_string(),
        })
    }

    fn aborted(&self) -> Option<CommError> {
        self.origin.get().map(|(origin, reason)| CommError::Aborted {
            origin: *origin,
            reason: reason.clone(),
        })
    }
}

/// Worker context for the channel world: rank, world size and endpoints.
pub struct ChannelComm {
    handle: AbortHandle,
    inbox: Receiver<Envelope>,
    pending: RefCell<VecDeque<Envelope>>,
}

impl ChannelComm {
    /// Handle used to abort the job from outside the worker's own code path.
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.clone()
    }

    fn check_rank(&self, rank: usize) -> Result<(), CommError> {
        if rank < self.size() {
            Ok(())
        } else {
            Err(CommError::InvalidRank {
                rank,
                size: self.size(),
            })
        }
    }
}

impl Communicator for ChannelComm {
    fn rank(&self) -> usize {
        self.handle.rank
    }

    fn size(&self) -> usize {
        self.handle.peers.len()
    }

    fn send_bytes(&self, dest: usize, tag: Tag, payload: Payload) -> Result<(), CommError> {
        self.check_rank(dest)?;
        if let Some(err) = self.handle.aborted() {
            return Err(err);
        }
        self.handle.peers[dest]
            .send(Envelope {
                from: self.rank(),
                tag,
                body: Body::Data(payload),
            })
            .map_err(|_| CommError::Disconnected { peer: dest })
    }

    fn recv_bytes(&self, from: usize, tag: Tag) -> Result<Payload, CommError> {
        self.check_rank(from)?;

        {
            let mut pending = self.pending.borrow_mut();
            if let Some(pos) = pending.iter().position(|e| e.matches(from, tag)) {
                if let Some(envelope) = pending.remove(pos) {
                    return envelope.open();
                }
            }
        }

        if let Some(err) = self.handle.aborted() {
            return Err(err);
        }

        loop {
            let envelope = self
                .inbox
                .recv()
                .map_err(|_| CommError::Disconnected { peer: from })?;
            if envelope.matches(from, tag) {
                return envelope.open();
            }
            self.pending.borrow_mut().push_back(envelope);
        }
    }

    fn abort(&self, reason: &str) -> CommError {
        self.handle.trigger(reason)
    }
}

/// Failure of a multi-worker job.
#[derive(Debug, Error)]
pub enum JobError<E> {
    #[error("worker {rank} failed: {error}")]
    Worker { rank: usize, error: E },

    #[error("worker {rank} panicked")]
    Panicked { rank: usize },

    #[error("failed to spawn worker {rank}: {error}")]
    Spawn { rank: usize, error: std::io::Error },

    #[error(transparent)]
    Comm(#[from] CommError),
}

impl<E> JobError<E> {
    /// Rank of the worker the failure is attributed to, if any.
    pub fn rank(&self) -> Option<usize> {
        match self {
            JobError::Worker { rank, .. }
            | JobError::Panicked { rank }
            | JobError::Spawn { rank, .. } => Some(*rank),
            JobError::Comm(_) => None,
        }
    }

    /// The originating worker's own error, if the failure was a returned error.
    pub fn worker_error(&self) -> Option<&E> {
        match self {
            JobError::Worker { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Fires an abort if the worker leaves its job without finishing cleanly,
/// including by panicking.
struct AbortGuard {
    handle: AbortHandle,
    armed: bool,
}

impl AbortGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if self.armed {
            self.handle.trigger("worker exited abnormally");
        }
    }
}

/// A fixed set of workers connected all-to-all.
#[derive(Debug, Clone, Copy)]
pub struct World {
    size: usize,
}

impl World {
    /// Create a world of `size` workers.
    pub fn new(size: usize) -> Result<Self, CommError> {
        if size == 0 {
            return Err(CommError::EmptyWorld);
        }
        Ok(Self { size })
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Build one connected endpoint per rank without spawning anything.
    pub fn endpoints(&self) -> Vec<ChannelComm> {
        let (senders, inboxes): (Vec<_>, Vec<_>) = (0..self.size).map(|_| channel()).unzip();
        let origin = Arc::new(OnceLock::new());
        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ChannelComm {
                handle: AbortHandle {
                    rank,
                    peers: senders.clone(),
                    origin: Arc::clone(&origin),
                },
                inbox,
                pending: RefCell::new(VecDeque::new()),
            })
            .collect()
    }

    /// Run `job` once per rank, each on its own thread, and wait for all of
    /// them.
    ///
    /// Results come back in rank order. If any worker returns an error or
    /// panics, every other worker blocked in a receive is woken with
    /// [`CommError::Aborted`] and the job fails with the originating
    /// worker's error.
    pub fn run<R, E, F>(&self, job: F) -> Result<Vec<R>, JobError<E>>
    where
        R: Send,
        E: Send + Display,
        F: Fn(ChannelComm) -> Result<R, E> + Sync,
    {
        let comms = self.endpoints();
        let abort = comms[0].abort_handle();
        let job = &job;

        let outcomes: Vec<Result<R, JobError<E>>> = thread::scope(|scope| {
            let mut handles = Vec::with_capacity(self.size);
            for comm in comms {
                let rank = comm.rank();
                let spawned = thread::Builder::new()
                    .name(format!("rank-{}", rank))
                    .spawn_scoped(scope, move || {
                        let mut guard = AbortGuard {
                            handle: comm.abort_handle(),
                            armed: true,
                        };
                        let result = job(comm);
                        if let Err(e) = &result {
                            guard.handle.trigger(&e.to_string());
                        }
                        guard.disarm();
                        result
                    });
                match spawned {
                    Ok(handle) => handles.push((rank, Ok(handle))),
                    Err(error) => {
                        abort.trigger("failed to spawn worker");
                        handles.push((rank, Err(error)));
                    }
                }
            }

            handles
                .into_iter()
                .map(|(rank, handle)| match handle {
                    Ok(handle) => match handle.join() {
                        Ok(Ok(value)) => Ok(value),
                        Ok(Err(error)) => Err(JobError::Worker { rank, error }),
                        Err(_) => Err(JobError::Panicked { rank }),
                    },
                    Err(error) => Err(JobError::Spawn { rank, error }),
                })
                .collect()
        });

        let origin = abort.origin.get().map(|(rank, _)| *rank);
        let mut values = Vec::with_capacity(self.size);
        let mut failure = None;
        for (rank, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(value) => values.push(value),
                // Report the worker that started the abort, not its victims.
                Err(err) if failure.is_none() || Some(rank) == origin => failure = Some(err),
                Err(_) => {}
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(values),
        }
    }
}
