use std::{io, time::Duration};

use futures::future::{join_all, try_join_all};
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use super::ProcessGroup;
use crate::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};

/// A connection to another member of the group.
pub struct Peer<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rank: usize,
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
    scratch: Vec<f32>,
}

impl<R, W> Peer<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a new `Peer`.
    ///
    /// # Arguments
    /// * `rank` - The rank of the process at the other end of the channel.
    /// * `rx` - Receiving end of the channel.
    /// * `tx` - Sending end of the channel.
    pub fn new(rank: usize, rx: OnoReceiver<R>, tx: OnoSender<W>) -> Self {
        Self {
            rank,
            rx,
            tx,
            scratch: Vec::new(),
        }
    }

    /// Returns the rank of the process at the other end.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Receives a buffer of exactly `len` numbers of the expected payload kind into `scratch`.
    async fn recv_numbers(&mut self, gradient: bool, len: usize) -> io::Result<()> {
        let Self {
            rank, rx, scratch, ..
        } = self;

        let nums = match rx.recv().await? {
            Msg::Data(Payload::Gradient(nums)) if gradient => nums,
            Msg::Data(Payload::Params(nums)) if !gradient => nums,
            msg => return Err(reject(*rank, &msg)),
        };

        if nums.len() != len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "rank {rank} sent {} values, expected {len}; members disagree on the buffer size",
                    nums.len()
                ),
            ));
        }

        scratch.clear();
        scratch.extend_from_slice(nums);
        Ok(())
    }

    /// Waits for a specific control command.
    async fn recv_command(&mut self, expected: Command) -> io::Result<()> {
        let rank = self.rank;

        match self.rx.recv().await? {
            Msg::Control(cmd) if cmd == expected => Ok(()),
            msg => Err(reject(rank, &msg)),
        }
    }

    async fn send(&mut self, msg: &Msg<'_>) -> io::Result<()> {
        self.tx.send(msg).await
    }
}

enum Topology<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Rank 0, connected to every other member, ordered by rank.
    Root { peers: Vec<Peer<R, W>> },
    /// Any other rank, connected only to the root.
    Leaf { root: Peer<R, W> },
}

/// A process group where every member talks to rank 0 and rank 0 performs the reductions.
///
/// Reductions are summed in rank order on the root and the result is sent back verbatim,
/// so every member ends up with a bitwise identical buffer.
pub struct StarGroup<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rank: usize,
    world_size: usize,
    timeout: Duration,
    topology: Topology<R, W>,
}

impl<R, W> StarGroup<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates the root member of a group.
    ///
    /// # Arguments
    /// * `peers` - One connection per non-root member, any order.
    /// * `timeout` - The maximum time a single collective may take.
    ///
    /// # Returns
    /// An `InvalidInput` error if the peers' ranks are not exactly `1..=peers.len()`.
    pub fn root(mut peers: Vec<Peer<R, W>>, timeout: Duration) -> io::Result<Self> {
        peers.sort_by_key(Peer::rank);

        if let Some((i, peer)) = peers
            .iter()
            .enumerate()
            .find(|(i, peer)| peer.rank != i + 1)
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("peer at position {i} has rank {}, expected {}", peer.rank, i + 1),
            ));
        }

        Ok(Self {
            rank: 0,
            world_size: peers.len() + 1,
            timeout,
            topology: Topology::Root { peers },
        })
    }

    /// Creates a non-root member of a group.
    ///
    /// # Arguments
    /// * `rank` - This member's rank, in `1..world_size`.
    /// * `world_size` - The amount of members in the group.
    /// * `root` - The connection to rank 0.
    /// * `timeout` - The maximum time a single collective may take.
    pub fn leaf(
        rank: usize,
        world_size: usize,
        root: Peer<R, W>,
        timeout: Duration,
    ) -> io::Result<Self> {
        if rank == 0 || rank >= world_size || root.rank != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid leaf rank {rank} for a group of {world_size}"),
            ));
        }

        Ok(Self {
            rank,
            world_size,
            timeout,
            topology: Topology::Leaf { root },
        })
    }

    /// Completes the group formation on the root by welcoming every member.
    pub(super) async fn welcome(&mut self) -> io::Result<()> {
        if let Topology::Root { peers } = &mut self.topology {
            let msg = Msg::Control(Command::Welcome);
            try_join_all(peers.iter_mut().map(|peer| peer.send(&msg))).await?;
        }

        Ok(())
    }

    /// Completes the group formation on a leaf by waiting for the root's welcome.
    pub(super) async fn await_welcome(&mut self) -> io::Result<()> {
        if let Topology::Leaf { root } = &mut self.topology {
            root.recv_command(Command::Welcome).await?;
        }

        Ok(())
    }

    async fn bounded<T, F>(timeout: Duration, op: &'static str, fut: F) -> io::Result<T>
    where
        F: Future<Output = io::Result<T>>,
    {
        tokio::time::timeout(timeout, fut).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{op} did not complete within {timeout:?}"),
            )
        })?
    }
}

impl<R, W> ProcessGroup for StarGroup<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn all_reduce_sum(&mut self, buf: &mut [f32]) -> io::Result<()> {
        let timeout = self.timeout;
        let len = buf.len();

        let op = async {
            match &mut self.topology {
                Topology::Root { peers } => {
                    try_join_all(peers.iter_mut().map(|peer| peer.recv_numbers(true, len)))
                        .await?;

                    for peer in peers.iter() {
                        buf.iter_mut().zip(&peer.scratch).for_each(|(b, g)| *b += g);
                    }

                    let msg = Msg::Data(Payload::Params(buf));
                    try_join_all(peers.iter_mut().map(|peer| peer.send(&msg))).await?;
                }
                Topology::Leaf { root } => {
                    root.send(&Msg::Data(Payload::Gradient(buf))).await?;
                    root.recv_numbers(false, len).await?;
                    buf.copy_from_slice(&root.scratch);
                }
            }

            Ok::<_, io::Error>(())
        };

        Self::bounded(timeout, "all-reduce", op).await
    }

    async fn broadcast(&mut self, buf: &mut [f32]) -> io::Result<()> {
        let timeout = self.timeout;
        let len = buf.len();

        let op = async {
            match &mut self.topology {
                Topology::Root { peers } => {
                    let msg = Msg::Data(Payload::Params(buf));
                    try_join_all(peers.iter_mut().map(|peer| peer.send(&msg))).await?;
                }
                Topology::Leaf { root } => {
                    root.recv_numbers(false, len).await?;
                    buf.copy_from_slice(&root.scratch);
                }
            }

            Ok::<_, io::Error>(())
        };

        Self::bounded(timeout, "broadcast", op).await
    }

    async fn barrier(&mut self) -> io::Result<()> {
        let timeout = self.timeout;
        let op = async {
            let msg = Msg::Control(Command::Barrier);

            match &mut self.topology {
                Topology::Root { peers } => {
                    try_join_all(
                        peers
                            .iter_mut()
                            .map(|peer| peer.recv_command(Command::Barrier)),
                    )
                    .await?;

                    try_join_all(peers.iter_mut().map(|peer| peer.send(&msg))).await?;
                }
                Topology::Leaf { root } => {
                    root.send(&msg).await?;
                    root.recv_command(Command::Barrier).await?;
                }
            }

            Ok::<_, io::Error>(())
        };

        Self::bounded(timeout, "barrier", op).await
    }

    async fn abort(&mut self, reason: &str) {
        let msg = Msg::Err(reason.into());

        let peers = match &mut self.topology {
            Topology::Root { peers } => peers.iter_mut().collect::<Vec<_>>(),
            Topology::Leaf { root } => vec![root],
        };

        let sends = peers.into_iter().map(|peer| {
            let msg = &msg;
            async move { (peer.rank, peer.send(msg).await) }
        });

        for (rank, res) in join_all(sends).await {
            if let Err(e) = res {
                warn!(rank = rank; "failed to notify peer of the abort: {e}");
            }
        }
    }

    async fn shutdown(mut self) -> io::Result<()> {
        let msg = Msg::Control(Command::Disconnect);

        match &mut self.topology {
            Topology::Root { peers } => {
                try_join_all(peers.iter_mut().map(|peer| peer.send(&msg))).await?;
            }
            Topology::Leaf { root } => root.send(&msg).await?,
        }

        debug!(rank = self.rank; "left the group");
        Ok(())
    }
}

/// Turns an unexpected message from `rank` into an io error.
fn reject(rank: usize, msg: &Msg<'_>) -> io::Error {
    match msg {
        Msg::Err(detail) => io::Error::new(
            io::ErrorKind::ConnectionAborted,
            format!("rank {rank} aborted: {detail}"),
        ),
        Msg::Control(Command::Disconnect) => io::Error::new(
            io::ErrorKind::ConnectionAborted,
            format!("rank {rank} left the group in the middle of a collective"),
        ),
        other => io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected message from rank {rank}: got {}", other.kind()),
        ),
    }
}
