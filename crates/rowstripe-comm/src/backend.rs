//! Communicator trait, message encoding and message tags.
//!
//! The [`Communicator`] trait abstracts over how cooperating workers exchange
//! messages so that the partitioning and exchange code in `rowstripe-core`
//! stays transport-agnostic. Every core routine receives its communicator
//! explicitly: rank, world size and the channel handle travel together in one
//! value rather than living in process-global state.
//!
//! Messages cross the transport as bytes. Typed values are encoded with
//! `bincode` on send and decoded on receive, so a backend only has to move
//! opaque buffers between address spaces.

use std::any::type_name;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// An encoded message body.
pub type Payload = Vec<u8>;

/// Anything that can travel between workers.
pub trait Message: Serialize + DeserializeOwned + Send + 'static {}

impl<T: Serialize + DeserializeOwned + Send + 'static> Message for T {}

/// Errors originating from message passing.
#[derive(Debug, Error)]
pub enum CommError {
    #[error("A world must contain at least one worker")]
    EmptyWorld,

    #[error("Rank {rank} is outside a world of {size} workers")]
    InvalidRank { rank: usize, size: usize },

    #[error("Job aborted by worker {origin}: {reason}")]
    Aborted { origin: usize, reason: String },

    #[error("Worker {peer} disconnected")]
    Disconnected { peer: usize },

    #[error("Cannot encode a {type_name} message: {reason}")]
    Encode {
        type_name: &'static str,
        reason: String,
    },

    #[error("Message from worker {from} on {tag:?} is not a valid {expected}: {reason}")]
    Decode {
        from: usize,
        tag: Tag,
        expected: &'static str,
        reason: String,
    },

    #[error("Transport initialisation failed: {0}")]
    Init(String),
}

/// Logical channel a message travels on.
///
/// Receives match on `(source, tag)`, so two protocols running back to back
/// between the same pair of workers cannot consume each other's messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Bulk data: row blocks, ghost rows, rotating blocks.
    Data,
    /// Collector request from the root to one worker.
    Prompt,
    /// Collector reply carrying a worker's block.
    Response,
    Broadcast,
    Reduce,
    Barrier,
}

impl Tag {
    /// Numeric tag for transports that match on integers.
    pub fn code(self) -> i32 {
        match self {
            Tag::Data => 1,
            Tag::Prompt => 2,
            Tag::Response => 3,
            Tag::Broadcast => 4,
            Tag::Reduce => 5,
            Tag::Barrier => 6,
        }
    }
}

/// Encode a value for the wire.
pub fn encode<T: Message>(value: &T) -> Result<Payload, CommError> {
    bincode::serialize(value).map_err(|e| CommError::Encode {
        type_name: type_name::<T>(),
        reason: e.to_string(),
    })
}

/// Decode a value received from `from` on `tag`.
pub fn decode<T: Message>(from: usize, tag: Tag, bytes: &[u8]) -> Result<T, CommError> {
    bincode::deserialize(bytes).map_err(|e| CommError::Decode {
        from,
        tag,
        expected: type_name::<T>(),
        reason: e.to_string(),
    })
}

/// Point-to-point messaging between the workers of one job.
///
/// Implementations provide the byte-level primitives; typed helpers are
/// layered on top. Collective operations live in
/// [`crate::collective::Collectives`].
pub trait Communicator {
    /// This worker's rank in `[0, size)`.
    fn rank(&self) -> usize;

    /// Number of workers in the job.
    fn size(&self) -> usize;

    /// Deliver an encoded message to `dest`.
    ///
    /// May block until the receiver posts a matching receive, as a standard
    /// mode MPI send does; protocols must order their sends accordingly.
    fn send_bytes(&self, dest: usize, tag: Tag, payload: Payload) -> Result<(), CommError>;

    /// Block until a message from `from` on `tag` arrives.
    ///
    /// Returns [`CommError::Aborted`] if any worker aborted the job while
    /// this one was waiting.
    fn recv_bytes(&self, from: usize, tag: Tag) -> Result<Payload, CommError>;

    /// Tear down the whole job. Every peer blocked in a receive is released.
    /// Backends that can return hand back the error for the caller to
    /// propagate; process backends terminate every worker instead.
    fn abort(&self, reason: &str) -> CommError;

    /// Whether this worker is rank 0, which by convention reports results.
    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    /// Send a typed value.
    fn send<T: Message>(&self, dest: usize, tag: Tag, value: T) -> Result<(), CommError>
    where
        Self: Sized,
    {
        self.send_bytes(dest, tag, encode(&value)?)
    }

    /// Receive a typed value.
    fn recv<T: Message>(&self, from: usize, tag: Tag) -> Result<T, CommError>
    where
        Self: Sized,
    {
        decode(from, tag, &self.recv_bytes(from, tag)?)
    }

    /// Send `value` to `dest` and receive a value of the same type from
    /// `from` without either side waiting on the other's send. Backends with
    /// blocking sends override this with a non-blocking send plus wait, so a
    /// ring of workers all calling it at once cannot deadlock.
    fn send_recv<T: Message>(&self, value: T, dest: usize, from: usize, tag: Tag) -> Result<T, CommError>
    where
        Self: Sized,
    {
        self.send(dest, tag, value)?;
        self.recv(from, tag)
    }
}
