use std::{io, time::Duration};

use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

use super::{Peer, StarGroup};

const PIPE_CAPACITY: usize = 64 * 1024;

/// A group member whose connections are in-memory pipes.
pub type LocalGroup = StarGroup<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// Builds every member of a group living inside a single process.
///
/// # Arguments
/// * `world_size` - The amount of members.
/// * `timeout` - The maximum time a single collective may take.
///
/// # Returns
/// The members ordered by rank, or an `InvalidInput` error if `world_size` is zero.
pub fn local(world_size: usize, timeout: Duration) -> io::Result<Vec<LocalGroup>> {
    if world_size == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "a group needs at least one member",
        ));
    }

    let mut root_peers = Vec::with_capacity(world_size - 1);
    let mut leaves = Vec::with_capacity(world_size - 1);

    for rank in 1..world_size {
        let (root_end, leaf_end) = tokio::io::duplex(PIPE_CAPACITY);

        let (rx, tx) = tokio::io::split(root_end);
        let (rx, tx) = crate::channel(rx, tx);
        root_peers.push(Peer::new(rank, rx, tx));

        let (rx, tx) = tokio::io::split(leaf_end);
        let (rx, tx) = crate::channel(rx, tx);
        let root = Peer::new(0, rx, tx);
        leaves.push(StarGroup::leaf(rank, world_size, root, timeout)?);
    }

    let mut members = Vec::with_capacity(world_size);
    members.push(StarGroup::root(root_peers, timeout)?);
    members.extend(leaves);
    Ok(members)
}
