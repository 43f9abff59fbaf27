//! A fixed-size group of cooperating sampling processes.
//!
//! Every process of the group owns a [`ProcessGroup`] handle and an immutable
//! [`WorkerContext`]. Rank 0 acts as the root of a star topology, every collective
//! is implemented as a gather to the root followed by a scatter from it.

mod connect;
mod context;
pub mod device;
mod env;
mod error;
mod group;

pub use connect::connect;
pub use context::{WorkerContext, derive_seed};
pub use env::LaunchEnv;
pub use error::{GroupErr, Result};
pub use group::{MemoryGroup, ProcessGroup};

/// The rank that hosts the rendezvous and relays every collective.
pub const ROOT: usize = 0;
