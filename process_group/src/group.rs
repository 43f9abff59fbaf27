use std::fmt::Display;

use comms::{
    FrameReceiver, FrameSender,
    msg::{Command, Msg},
};
use log::{debug, warn};
use tokio::io::{self, AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};

use crate::{
    GroupErr, ROOT, Result, WorkerContext,
    context::derive_seed,
    device::Device,
};

const MEMORY_LINK_SIZE: usize = 64 * 1024;

/// A group linked through in-memory pipes, all ranks live in the same process.
pub type MemoryGroup = ProcessGroup<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

/// A bidirectional channel to another rank.
pub(crate) struct Link<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub(crate) rank: usize,
    pub(crate) rx: FrameReceiver<R>,
    pub(crate) tx: FrameSender<W>,
}

enum Topology<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Rank 0, holds a link to every other rank sorted by rank.
    Root { peers: Vec<Link<R, W>> },
    /// Any other rank, only talks to the root.
    Member { root: Link<R, W> },
}

/// Handle of this process inside a fixed-size group of cooperating processes.
///
/// All collectives are blocking from the caller's point of view and must be
/// called by every rank in the same order. There is no timeout, a rank that
/// never reaches a collective stalls the whole group.
pub struct ProcessGroup<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    rank: usize,
    world_size: usize,
    topology: Topology<R, W>,
    seq: u64,
    buf: Vec<u32>,
}

impl<R, W> ProcessGroup<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub(crate) fn root(world_size: usize, peers: Vec<Link<R, W>>) -> Self {
        debug_assert_eq!(peers.len() + 1, world_size);

        Self {
            rank: ROOT,
            world_size,
            topology: Topology::Root { peers },
            seq: 0,
            buf: Vec::new(),
        }
    }

    pub(crate) fn member(rank: usize, world_size: usize, root: Link<R, W>) -> Self {
        Self {
            rank,
            world_size,
            topology: Topology::Member { root },
            seq: 0,
            buf: Vec::new(),
        }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn is_root(&self) -> bool {
        self.rank == ROOT
    }

    /// Builds this rank's `WorkerContext`.
    ///
    /// # Args
    /// * `local_rank` - The rank inside this host, recorded in the context.
    /// * `visible_devices` - The amount of devices visible to this process.
    /// * `global_seed` - The run's seed, shared by every rank.
    ///
    /// # Errors
    /// Returns `GroupErr::NoDevice` if there are no visible devices.
    pub fn context(
        &self,
        local_rank: usize,
        visible_devices: usize,
        global_seed: i64,
    ) -> Result<WorkerContext> {
        let device = Device::for_rank(self.rank, visible_devices).ok_or(GroupErr::NoDevice)?;

        Ok(WorkerContext {
            rank: self.rank,
            world_size: self.world_size,
            local_rank,
            device,
            seed: derive_seed(global_seed, self.rank, self.world_size),
        })
    }

    /// Blocks until every rank of the group has reached this same barrier.
    ///
    /// # Errors
    /// Returns an error on link failures, on protocol violations or if another
    /// rank reported a failure instead of arriving.
    pub async fn barrier(&mut self) -> Result<()> {
        self.seq += 1;
        let seq = self.seq;
        let Self {
            rank,
            topology,
            buf,
            ..
        } = self;

        match topology {
            Topology::Root { peers } => {
                for peer in peers.iter_mut() {
                    expect(peer, buf, Command::Barrier { seq }, "barrier").await?;
                }

                let msg = Msg::Control(Command::Release { seq });
                for peer in peers.iter_mut() {
                    peer.tx.send(&msg).await?;
                }
            }
            Topology::Member { root } => {
                root.tx.send(&Msg::Control(Command::Barrier { seq })).await?;
                expect(root, buf, Command::Release { seq }, "release").await?;
            }
        }

        debug!(rank = *rank, seq = seq; "barrier released");
        Ok(())
    }

    /// Propagates `value` as seen by `source` to every rank.
    ///
    /// # Args
    /// * `value` - The flag, only meaningful on the `source` rank.
    /// * `source` - The rank whose value wins.
    ///
    /// # Returns
    /// The `source`'s value, identical on every rank.
    pub async fn broadcast_flag(&mut self, value: bool, source: usize) -> Result<bool> {
        self.check_rank(source)?;
        let local = (self.rank == source).then_some(Ok(value));
        self.share(source, local).await
    }

    /// Takes a decision once on `source` and makes every rank agree on it.
    ///
    /// Only `source` runs `decide`. If it fails there, the failure is returned
    /// on `source` and reported to every other rank as `GroupErr::Remote`, so the
    /// whole group aborts together instead of stalling at the next collective.
    ///
    /// # Args
    /// * `source` - The rank that takes the decision.
    /// * `decide` - The decision itself.
    pub async fn decide_once<F, E>(&mut self, source: usize, decide: F) -> std::result::Result<bool, E>
    where
        F: FnOnce() -> std::result::Result<bool, E>,
        E: From<GroupErr> + Display,
    {
        self.check_rank(source)?;

        if self.rank != source {
            return Ok(self.share(source, None).await?);
        }

        match decide() {
            Ok(value) => Ok(self.share(source, Some(Ok(value))).await?),
            Err(e) => {
                if let Err(share_err) = self.share(source, Some(Err(e.to_string()))).await {
                    debug!(rank = self.rank; "could not propagate the failure: {share_err}");
                }
                Err(e)
            }
        }
    }

    /// Leaves the group.
    ///
    /// Members announce their departure, the root waits until every member has
    /// left. Must be called on every successful exit path.
    pub async fn leave(mut self) -> Result<()> {
        let Self {
            rank,
            topology,
            buf,
            ..
        } = &mut self;

        match topology {
            Topology::Root { peers } => {
                for peer in peers.iter_mut() {
                    expect(peer, buf, Command::Disconnect, "disconnect").await?;
                }
            }
            Topology::Member { root } => {
                root.tx.send(&Msg::Control(Command::Disconnect)).await?;
            }
        }

        debug!(rank = *rank; "left process group");
        Ok(())
    }

    fn check_rank(&self, rank: usize) -> Result<()> {
        if rank >= self.world_size {
            return Err(GroupErr::InvalidRank {
                rank,
                world_size: self.world_size,
            });
        }

        Ok(())
    }

    /// Moves the outcome of `source` to every rank, relaying through the root.
    async fn share(
        &mut self,
        source: usize,
        local: Option<std::result::Result<bool, String>>,
    ) -> Result<bool> {
        let Self { topology, buf, .. } = self;

        let outcome = match topology {
            Topology::Root { peers } => {
                let outcome = match local {
                    Some(outcome) => outcome,
                    None => {
                        let Some(peer) = peers.iter_mut().find(|peer| peer.rank == source) else {
                            return Err(GroupErr::InvalidRank {
                                rank: source,
                                world_size: peers.len() + 1,
                            });
                        };
                        recv_flag(peer, buf).await?
                    }
                };

                for peer in peers.iter_mut() {
                    send_outcome(peer, &outcome).await?;
                }

                outcome
            }
            Topology::Member { root } => {
                if let Some(outcome) = &local {
                    send_outcome(root, outcome).await?;
                }

                recv_flag(root, buf).await?
            }
        };

        outcome.map_err(GroupErr::Remote)
    }
}

impl MemoryGroup {
    /// Creates every rank of a group linked through in-memory pipes.
    ///
    /// # Returns
    /// The group handles sorted by rank, the first one is the root.
    pub fn in_memory(world_size: usize) -> Vec<Self> {
        let mut peers = Vec::with_capacity(world_size.saturating_sub(1));
        let mut members = Vec::with_capacity(world_size.saturating_sub(1));

        for rank in 1..world_size {
            let (root_end, member_end) = io::duplex(MEMORY_LINK_SIZE);

            let (rx, tx) = io::split(root_end);
            let (rx, tx) = comms::channel(rx, tx);
            peers.push(Link { rank, rx, tx });

            let (rx, tx) = io::split(member_end);
            let (rx, tx) = comms::channel(rx, tx);
            let root = Link { rank: ROOT, rx, tx };
            members.push(Self::member(rank, world_size, root));
        }

        let mut groups = Vec::with_capacity(world_size);
        groups.push(Self::root(world_size.max(1), peers));
        groups.extend(members);
        groups
    }
}

async fn recv_command<R, W>(link: &mut Link<R, W>, buf: &mut Vec<u32>) -> Result<Command>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let msg: Msg = link.rx.recv_into(buf).await?;
    match msg {
        Msg::Control(cmd) => Ok(cmd),
        Msg::Err(detail) => {
            warn!(rank = link.rank; "rank reported a failure: {detail}");
            Err(GroupErr::Remote(detail.into_owned()))
        }
        other => Err(GroupErr::UnexpectedMessage {
            rank: link.rank,
            expected: "control",
            got: other.kind().to_string(),
        }),
    }
}

async fn expect<R, W>(
    link: &mut Link<R, W>,
    buf: &mut Vec<u32>,
    expected: Command,
    name: &'static str,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let cmd = recv_command(link, buf).await?;
    if cmd != expected {
        return Err(GroupErr::UnexpectedMessage {
            rank: link.rank,
            expected: name,
            got: format!("{cmd:?}"),
        });
    }

    Ok(())
}

async fn recv_flag<R, W>(
    link: &mut Link<R, W>,
    buf: &mut Vec<u32>,
) -> Result<std::result::Result<bool, String>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match recv_command(link, buf).await {
        Ok(Command::Flag { value }) => Ok(Ok(value)),
        Ok(cmd) => Err(GroupErr::UnexpectedMessage {
            rank: link.rank,
            expected: "flag",
            got: format!("{cmd:?}"),
        }),
        Err(GroupErr::Remote(detail)) => Ok(Err(detail)),
        Err(e) => Err(e),
    }
}

async fn send_outcome<R, W>(
    link: &mut Link<R, W>,
    outcome: &std::result::Result<bool, String>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let msg = match outcome {
        Ok(value) => Msg::Control(Command::Flag { value: *value }),
        Err(detail) => Msg::Err(detail.as_str().into()),
    };

    link.tx.send(&msg).await?;
    Ok(())
}
