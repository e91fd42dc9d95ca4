//! Message passing between mesh partitions.
//!
//! [`communicator`] defines the point-to-point façade and its backends,
//! [`wire`] the Pod records that travel over it and [`exchange`] the collectives
//! (sparse all-to-all, all-gather, error agreement) the rest of the crate uses.

pub mod communicator;
pub mod exchange;
pub mod wire;

#[cfg(feature = "mpi-support")]
pub use communicator::MpiComm;
pub use communicator::{CommTag, Communicator, NoComm, RayonComm, Wait};
pub use exchange::{all_gather, all_to_all_v, collective_check};
