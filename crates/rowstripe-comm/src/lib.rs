//! # rowstripe Comm
//!
//! Message-passing layer for the rowstripe workspace. This crate provides a
//! [`Communicator`](backend::Communicator) trait that isolates the
//! partitioning and exchange code from the transport connecting workers.
//!
//! ## Available transports
//!
//! | Transport | Type | Feature flag | Status |
//! |-----------|------|-------------|--------|
//! | In-process threads (mpsc) | [`ChannelComm`] via [`World`] | always | Implemented |
//! | One process per rank (MPI) | `MpiComm` via `MpiWorld` | `distributed` | Implemented |
//!
//! Workers never share memory: all data moves through `send`/`recv` and the
//! collectives in [`collective`], encoded to bytes on the way out. A failing
//! or panicking worker aborts the whole job rather than leaving peers blocked
//! on an unanswered receive.

pub mod backend;
pub mod channel;
pub mod collective;

#[cfg(feature = "distributed")]
pub mod distributed;

pub use backend::{decode, encode, CommError, Communicator, Message, Payload, Tag};
pub use channel::{AbortHandle, ChannelComm, JobError, World};
pub use collective::Collectives;

#[cfg(feature = "distributed")]
pub use distributed::{MpiComm, MpiWorld};
