use std::{io, time::Duration};

use comms::msg::{Command, Msg};
use log::{debug, info};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use crate::{
    GroupErr, LaunchEnv, ProcessGroup, ROOT, Result, WorkerContext, device::Device, group::Link,
};

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(200);
const CONNECT_ATTEMPTS: usize = 600;

type TcpGroup = ProcessGroup<OwnedReadHalf, OwnedWriteHalf>;

/// Joins the process group described by the launch environment.
///
/// The root listens at `MASTER_ADDR:MASTER_PORT` until every other rank has
/// announced itself, the other ranks keep dialing the root until it is up.
/// Must be called before any random number is drawn.
///
/// # Args
/// * `env` - The identity handed out by the launcher.
/// * `visible_devices` - The amount of accelerators visible to this process.
/// * `global_seed` - The run's seed, shared by every rank.
///
/// # Errors
/// Returns `GroupErr::NoDevice` before touching the network if there is no
/// visible device, handshake errors if the launched ranks disagree on the group.
pub async fn connect(
    env: &LaunchEnv,
    visible_devices: usize,
    global_seed: i64,
) -> Result<(TcpGroup, WorkerContext)> {
    if Device::for_rank(env.rank, visible_devices).is_none() {
        return Err(GroupErr::NoDevice);
    }

    let group = if env.rank == ROOT {
        accept_members(env).await?
    } else {
        join_root(env).await?
    };

    let ctx = group.context(env.local_rank, visible_devices, global_seed)?;
    info!(
        rank = ctx.rank,
        seed = ctx.seed,
        world_size = ctx.world_size,
        device = ctx.device.ordinal;
        "joined process group"
    );

    Ok((group, ctx))
}

async fn accept_members(env: &LaunchEnv) -> Result<TcpGroup> {
    let expected = env.world_size - 1;
    let mut peers: Vec<Link<_, _>> = Vec::with_capacity(expected);

    if expected == 0 {
        return Ok(ProcessGroup::root(env.world_size, peers));
    }

    let listener = TcpListener::bind((env.master_addr.as_str(), env.master_port)).await?;
    info!(
        "waiting for {expected} rank(s) at {}:{}",
        env.master_addr, env.master_port
    );

    let mut buf: Vec<u32> = Vec::new();
    while peers.len() < expected {
        let (stream, addr) = listener.accept().await?;
        stream.set_nodelay(true)?;
        let (rx, tx) = stream.into_split();
        let (mut rx, tx) = comms::channel(rx, tx);

        let msg: Msg = rx.recv_into(&mut buf).await?;
        let (rank, world_size) = match msg {
            Msg::Control(Command::Join { rank, world_size }) => (rank, world_size),
            other => {
                return Err(GroupErr::Handshake(format!(
                    "expected a join from {addr}, got {}",
                    other.kind()
                )));
            }
        };

        if world_size != env.world_size {
            return Err(GroupErr::Handshake(format!(
                "rank {rank} at {addr} expects a world of size {world_size}, this one has {}",
                env.world_size
            )));
        }

        if rank == ROOT || rank >= env.world_size {
            return Err(GroupErr::InvalidRank {
                rank,
                world_size: env.world_size,
            });
        }

        if peers.iter().any(|peer| peer.rank == rank) {
            return Err(GroupErr::Handshake(format!(
                "rank {rank} joined twice, the second time from {addr}"
            )));
        }

        debug!(rank = rank; "rank joined from {addr}");
        peers.push(Link { rank, rx, tx });
    }

    peers.sort_by_key(|peer| peer.rank);
    Ok(ProcessGroup::root(env.world_size, peers))
}

async fn join_root(env: &LaunchEnv) -> Result<TcpGroup> {
    let stream = dial(&env.master_addr, env.master_port).await?;
    stream.set_nodelay(true)?;
    let (rx, tx) = stream.into_split();
    let (rx, mut tx) = comms::channel(rx, tx);

    let msg = Msg::Control(Command::Join {
        rank: env.rank,
        world_size: env.world_size,
    });
    tx.send(&msg).await?;

    let root = Link { rank: ROOT, rx, tx };
    Ok(ProcessGroup::member(env.rank, env.world_size, root))
}

async fn dial(host: &str, port: u16) -> io::Result<TcpStream> {
    let mut attempt = 1;

    loop {
        match TcpStream::connect((host, port)).await {
            Ok(stream) => return Ok(stream),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                debug!(attempt = attempt; "root at {host}:{port} not reachable yet: {e}");
                attempt += 1;
                time::sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}
