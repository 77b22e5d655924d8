use std::{io, net::SocketAddr, time::Duration};

use log::{debug, info, warn};
use tokio::net::{
    TcpListener, TcpStream,
    tcp::{OwnedReadHalf, OwnedWriteHalf},
};

use super::{Peer, StarGroup};
use crate::{
    msg::{Command, Msg},
    specs::group::JoinSpec,
};

const CONNECT_RETRY: Duration = Duration::from_millis(200);

/// A group member whose connections are TCP streams.
pub type NetGroup = StarGroup<OwnedReadHalf, OwnedWriteHalf>;

/// Forms the process group at the fixed rendezvous address.
///
/// Rank 0 listens on `addr` and waits for every other rank, the rest connect to it.
///
/// # Arguments
/// * `addr` - The rendezvous address, identical on every process.
/// * `rank` - This process' rank.
/// * `world_size` - The amount of processes in the job.
/// * `deadline` - The maximum time the whole rendezvous may take.
/// * `timeout` - The maximum time a single collective may take afterwards.
///
/// # Returns
/// This process' membership, or an io error if the group could not be formed in time.
pub async fn rendezvous(
    addr: SocketAddr,
    rank: usize,
    world_size: usize,
    deadline: Duration,
    timeout: Duration,
) -> io::Result<NetGroup> {
    if rank >= world_size {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("rank {rank} is out of range for a group of {world_size}"),
        ));
    }

    let op = async {
        if rank == 0 {
            let listener = TcpListener::bind(addr).await?;
            info!(world_size = world_size; "waiting for the group at {addr}");
            accept_members(listener, world_size, timeout).await
        } else {
            join(addr, rank, world_size, timeout).await
        }
    };

    tokio::time::timeout(deadline, op).await.map_err(|_| {
        io::Error::new(
            io::ErrorKind::TimedOut,
            format!("rendezvous at {addr} did not complete within {deadline:?}"),
        )
    })?
}

/// Accepts every non-root member on `listener` and welcomes them once all have joined.
///
/// # Arguments
/// * `listener` - The rendezvous listener.
/// * `world_size` - The amount of processes in the job.
/// * `timeout` - The maximum time a single collective may take afterwards.
///
/// # Returns
/// The root membership, or an io error if a member is inconsistent with the group.
pub async fn accept_members(
    listener: TcpListener,
    world_size: usize,
    timeout: Duration,
) -> io::Result<NetGroup> {
    let mut slots: Vec<Option<Peer<_, _>>> = (1..world_size).map(|_| None).collect();

    while slots.iter().any(Option::is_none) {
        let (stream, addr) = listener.accept().await?;
        let (rx, tx) = stream.into_split();
        let (mut rx, mut tx) = crate::channel(rx, tx);

        let spec = match rx.recv().await? {
            Msg::Control(Command::Join(spec)) => spec,
            msg => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("expected a join request from {addr}, got {}", msg.kind()),
                ));
            }
        };

        let JoinSpec { rank, world_size: their_world } = spec;
        let problem = if their_world != world_size {
            Some(format!(
                "rank {rank} believes the world size is {their_world}, the root has {world_size}"
            ))
        } else if rank == 0 || rank >= world_size {
            Some(format!("rank {rank} is out of range for a group of {world_size}"))
        } else if slots[rank - 1].is_some() {
            Some(format!("rank {rank} joined twice"))
        } else {
            None
        };

        if let Some(problem) = problem {
            if let Err(e) = tx.send(&Msg::Err(problem.as_str().into())).await {
                warn!("failed to notify {addr} of the rejection: {e}");
            }

            return Err(io::Error::new(io::ErrorKind::InvalidData, problem));
        }

        debug!(rank = rank; "member joined from {addr}");
        slots[rank - 1] = Some(Peer::new(rank, rx, tx));
    }

    let peers: Vec<_> = slots.into_iter().flatten().collect();
    let mut group = StarGroup::root(peers, timeout)?;
    group.welcome().await?;

    info!(world_size = world_size; "group formed");
    Ok(group)
}

/// Joins the group whose root listens at `addr`, retrying the connection until the caller's
/// deadline runs out.
///
/// # Arguments
/// * `addr` - The rendezvous address.
/// * `rank` - This process' rank, in `1..world_size`.
/// * `world_size` - The amount of processes in the job.
/// * `timeout` - The maximum time a single collective may take afterwards.
///
/// # Returns
/// The leaf membership, or an io error if the root rejected this process.
pub async fn join(
    addr: SocketAddr,
    rank: usize,
    world_size: usize,
    timeout: Duration,
) -> io::Result<NetGroup> {
    let stream = loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => break stream,
            Err(e) => {
                debug!(rank = rank; "root not reachable yet at {addr}: {e}");
                tokio::time::sleep(CONNECT_RETRY).await;
            }
        }
    };

    let (rx, tx) = stream.into_split();
    let (rx, mut tx) = crate::channel(rx, tx);

    let spec = JoinSpec { rank, world_size };
    tx.send(&Msg::Control(Command::Join(spec))).await?;

    let root = Peer::new(0, rx, tx);
    let mut group = StarGroup::leaf(rank, world_size, root, timeout)?;
    group.await_welcome().await?;

    info!(rank = rank, world_size = world_size; "joined the group");
    Ok(group)
}
