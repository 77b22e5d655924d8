//! Collective communication between the processes of a training job.
//!
//! Every operation here is a blocking collective: no member returns from it before every
//! other member has reached the matching call, and a member that does not show up within
//! the group's timeout fails the operation for everyone.

mod collective;
mod local;
mod rendezvous;
mod star;

pub use collective::{LocalProcessGroup, ProcessGroup};
pub use local::{LocalGroup, local};
pub use rendezvous::{NetGroup, accept_members, join, rendezvous};
pub use star::{Peer, StarGroup};
