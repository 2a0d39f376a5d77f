//! # rowstripe Core
//!
//! Partition a large regular domain across P workers that share no memory,
//! compute each share locally, and combine or exchange boundary data by
//! explicit message passing.
//!
//! ## Architecture
//!
//! Every routine takes its worker context explicitly as a
//! [`Communicator`](rowstripe_comm::Communicator). The same code therefore
//! runs under any transport: tests use the in-process
//! [`World`](rowstripe_comm::World), and the CLI can also run each rank as
//! a separate MPI process. Anything a routine sends must be a
//! [`Message`](rowstripe_comm::Message).
//!
//! ## Modules
//!
//! - [`partition`]: Block partitioner shared by every striped domain.
//! - [`sieve`]: Distributed Sieve of Eratosthenes over `[2, N]`.
//! - [`matrix`]: Row-striped matrices: loader, halo exchange, blocked and
//!   systolic multiply.
//! - [`life`]: Game of Life stencil on a ghost-framed grid.
//! - [`collect`]: Rank-ordered output of striped results.

pub mod collect;
pub mod life;
pub mod matrix;
pub mod partition;
pub mod sieve;

pub use partition::{Block, Partition};
