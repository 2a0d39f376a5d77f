//! Multi-process transport over MPI.
//!
//! Requires the `distributed` feature flag and an MPI installation. Launch
//! one process per rank with `mpirun -n <P>`; every process runs the same job
//! on the [`MpiComm`] handed out by its [`MpiWorld`].
//!
//! Payloads travel as `u8` buffers tagged with [`Tag::code`]. MPI never lets
//! two messages with the same source and tag overtake each other, which is
//! the matching rule the in-process world implements. A standard-mode send
//! may block until the receiver posts its receive, so
//! [`MpiComm::send_recv`] posts its send non-blocking and waits for it only
//! after the receive completes.

use std::fmt::Display;

use mpi::environment::Universe;
use mpi::point_to_point::{Destination, Source};
use mpi::request;
use mpi::topology::{Communicator as _, SimpleCommunicator};

use crate::backend::{decode, encode, CommError, Communicator, Message, Payload, Tag};

/// Exit code every process reports when the job is torn down.
const ABORT_CODE: i32 = 1;

/// This process's membership in an MPI job.
///
/// MPI is finalised when the world is dropped.
pub struct MpiWorld {
    universe: Universe,
}

impl MpiWorld {
    /// Initialise MPI. Fails if this process already did so.
    pub fn init() -> Result<Self, CommError> {
        mpi::initialize()
            .map(|universe| Self { universe })
            .ok_or_else(|| CommError::Init("MPI is already initialised in this process".into()))
    }

    /// Communicator spanning every process of the job.
    pub fn comm(&self) -> MpiComm {
        MpiComm {
            world: self.universe.world(),
        }
    }

    /// Run `job` as this process's rank and return its value.
    ///
    /// If the job fails on this rank, every process of the job is killed
    /// through `MPI_Abort`, so peers blocked in a receive do not hang.
    pub fn run<R, E, F>(&self, job: F) -> R
    where
        E: Display,
        F: FnOnce(&MpiComm) -> Result<R, E>,
    {
        let comm = self.comm();
        match job(&comm) {
            Ok(value) => value,
            Err(err) => comm.terminate(&err.to_string()),
        }
    }
}

/// One rank's handle on an MPI job.
pub struct MpiComm {
    world: SimpleCommunicator,
}

impl MpiComm {
    fn peer(&self, rank: usize) -> Result<i32, CommError> {
        let size = self.size();
        if rank >= size {
            return Err(CommError::InvalidRank { rank, size });
        }
        i32::try_from(rank).map_err(|_| CommError::InvalidRank { rank, size })
    }

    /// Report `reason` on this rank and kill every process of the job.
    pub fn terminate(&self, reason: &str) -> ! {
        log::error!("[rank {}] aborting job: {}", self.rank(), reason);
        eprintln!("Error: {}", reason);
        self.world.abort(ABORT_CODE)
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn send_bytes(&self, dest: usize, tag: Tag, payload: Payload) -> Result<(), CommError> {
        let dest = self.peer(dest)?;
        self.world
            .process_at_rank(dest)
            .send_with_tag(&payload[..], tag.code());
        Ok(())
    }

    fn recv_bytes(&self, from: usize, tag: Tag) -> Result<Payload, CommError> {
        let source = self.peer(from)?;
        let (payload, _status) = self
            .world
            .process_at_rank(source)
            .receive_vec_with_tag::<u8>(tag.code());
        Ok(payload)
    }

    fn abort(&self, reason: &str) -> CommError {
        self.terminate(reason)
    }

    fn send_recv<T: Message>(&self, value: T, dest: usize, from: usize, tag: Tag) -> Result<T, CommError>
    where
        Self: Sized,
    {
        let payload = encode(&value)?;
        let (dest_rank, source) = (self.peer(dest)?, self.peer(from)?);
        let bytes = request::scope(|scope| {
            let pending = self
                .world
                .process_at_rank(dest_rank)
                .immediate_send_with_tag(scope, &payload[..], tag.code());
            let (bytes, _status) = self
                .world
                .process_at_rank(source)
                .receive_vec_with_tag::<u8>(tag.code());
            pending.wait();
            bytes
        });
        decode(from, tag, &bytes)
    }
}
