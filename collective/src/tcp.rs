use std::time::Duration;

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg},
};
use log::{debug, info, warn};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time,
};

use crate::{Collective, CollectiveErr, GroupConfig, Result};

type NetRx = OnoReceiver<OwnedReadHalf>;
type NetTx = OnoSender<OwnedWriteHalf>;

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// One connection of the star, seen from its other end.
struct Peer {
    rank: usize,
    rx: NetRx,
    tx: NetTx,
}

enum Role {
    /// Rank 0, relays every collective. Peers are sorted by rank.
    Host { peers: Vec<Peer> },
    Member { host: Peer },
}

/// A process group over tcp with rank 0 at the center of a star.
pub struct TcpGroup {
    rank: usize,
    world_size: usize,
    seq: u64,
    role: Role,
    buf: Vec<u32>,
}

impl TcpGroup {
    /// Establishes the group described by `cfg`.
    ///
    /// Rank 0 binds `cfg.addr:cfg.port` and waits for the others, the rest of
    /// the ranks keep trying to connect to it until `cfg.timeout` runs out.
    ///
    /// # Returns
    /// The joined group or an error if the rendezvous failed.
    pub async fn init(cfg: &GroupConfig) -> Result<Self> {
        validate_rank(cfg)?;

        if cfg.world_size.get() == 1 {
            return Ok(Self::new(cfg, Role::Host { peers: Vec::new() }));
        }

        if cfg.is_host() {
            let listener = TcpListener::bind((cfg.addr.as_str(), cfg.port)).await?;
            Self::host(listener, cfg).await
        } else {
            Self::join(cfg).await
        }
    }

    /// Hosts the rendezvous on an already bound `listener`.
    ///
    /// # Arguments
    /// * `listener` - Where the rest of the ranks will connect to.
    /// * `cfg` - The group configuration, its rank must be 0.
    pub async fn host(listener: TcpListener, cfg: &GroupConfig) -> Result<Self> {
        validate_rank(cfg)?;
        if !cfg.is_host() {
            return Err(CollectiveErr::InvalidRank {
                rank: cfg.rank,
                world_size: cfg.world_size.get(),
            });
        }

        let world_size = cfg.world_size.get();
        info!(world_size = world_size; "waiting for peers at {:?}", listener.local_addr());

        let mut buf = Vec::new();
        let mut peers = time::timeout(cfg.timeout, accept_peers(&listener, world_size, &mut buf))
            .await
            .map_err(|_| CollectiveErr::RendezvousTimeout {
                rank: cfg.rank,
                waited: cfg.timeout,
            })??;

        let welcome = Msg::Control(Command::Welcome { world_size });
        for peer in peers.iter_mut() {
            peer.tx.send(&welcome).await?;
        }

        info!(rank = 0; "process group of {world_size} assembled");
        Ok(Self::new(cfg, Role::Host { peers }))
    }

    /// Joins the rendezvous hosted by rank 0.
    pub async fn join(cfg: &GroupConfig) -> Result<Self> {
        validate_rank(cfg)?;

        let host = time::timeout(cfg.timeout, connect_host(cfg))
            .await
            .map_err(|_| CollectiveErr::RendezvousTimeout {
                rank: cfg.rank,
                waited: cfg.timeout,
            })??;

        info!(rank = cfg.rank; "joined process group of {}", cfg.world_size);
        Ok(Self::new(cfg, Role::Member { host }))
    }

    fn new(cfg: &GroupConfig, role: Role) -> Self {
        Self {
            rank: cfg.rank,
            world_size: cfg.world_size.get(),
            seq: 0,
            role,
            buf: Vec::new(),
        }
    }
}

impl Collective for TcpGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn barrier(&mut self) -> Result<()> {
        self.seq += 1;
        let Self { seq, role, buf, .. } = self;
        let seq = *seq;

        match role {
            Role::Host { peers } => {
                for peer in peers.iter_mut() {
                    match recv_control(peer, buf, "control/barrier").await? {
                        Command::Barrier { seq: got } if got == seq => {}
                        Command::Barrier { seq: got } => {
                            return Err(CollectiveErr::OutOfStep {
                                peer: peer.rank,
                                got,
                                expected: seq,
                            });
                        }
                        other => return Err(unexpected(peer.rank, "control/barrier", &other)),
                    }
                }

                let release = Msg::Control(Command::Release { seq });
                for peer in peers.iter_mut() {
                    peer.tx.send(&release).await?;
                }
            }
            Role::Member { host } => {
                host.tx.send(&Msg::Control(Command::Barrier { seq })).await?;

                match recv_control(host, buf, "control/release").await? {
                    Command::Release { seq: got } if got == seq => {}
                    Command::Release { seq: got } => {
                        return Err(CollectiveErr::OutOfStep {
                            peer: host.rank,
                            got,
                            expected: seq,
                        });
                    }
                    other => return Err(unexpected(host.rank, "control/release", &other)),
                }
            }
        }

        debug!(rank = self.rank, seq = seq; "passed barrier");
        Ok(())
    }

    async fn all_gather(&mut self, values: &[f32]) -> Result<Vec<Vec<f32>>> {
        let Self {
            rank,
            world_size,
            role,
            buf,
            ..
        } = self;

        let mut gathered = vec![Vec::new(); *world_size];

        match role {
            Role::Host { peers } => {
                gathered[*rank] = values.to_vec();

                for peer in peers.iter_mut() {
                    gathered[peer.rank] = recv_data(peer, buf).await?;
                }

                for peer in peers.iter_mut() {
                    for contribution in &gathered {
                        peer.tx.send(&Msg::Data(contribution)).await?;
                    }
                }
            }
            Role::Member { host } => {
                host.tx.send(&Msg::Data(values)).await?;

                for slot in gathered.iter_mut() {
                    *slot = recv_data(host, buf).await?;
                }
            }
        }

        Ok(gathered)
    }

    async fn destroy(self) -> Result<()> {
        let Self {
            rank,
            role,
            mut buf,
            ..
        } = self;

        let bye = Msg::Control(Command::Disconnect);

        match role {
            Role::Host { mut peers } => {
                for peer in peers.iter_mut() {
                    match recv_control(peer, &mut buf, "control/disconnect").await? {
                        Command::Disconnect => {}
                        other => return Err(unexpected(peer.rank, "control/disconnect", &other)),
                    }
                }

                for peer in peers.iter_mut() {
                    peer.tx.send(&bye).await?;
                    peer.tx.shutdown().await?;
                }
            }
            Role::Member { mut host } => {
                host.tx.send(&bye).await?;

                match recv_control(&mut host, &mut buf, "control/disconnect").await? {
                    Command::Disconnect => {}
                    other => return Err(unexpected(host.rank, "control/disconnect", &other)),
                }

                host.tx.shutdown().await?;
            }
        }

        info!(rank = rank; "process group destroyed");
        Ok(())
    }
}

fn validate_rank(cfg: &GroupConfig) -> Result<()> {
    if cfg.rank >= cfg.world_size.get() {
        return Err(CollectiveErr::InvalidRank {
            rank: cfg.rank,
            world_size: cfg.world_size.get(),
        });
    }

    Ok(())
}

/// Accepts connections until every rank in `1..world_size` has joined.
async fn accept_peers(
    listener: &TcpListener,
    world_size: usize,
    buf: &mut Vec<u32>,
) -> Result<Vec<Peer>> {
    let mut slots: Vec<Option<Peer>> = (1..world_size).map(|_| None).collect();
    let mut joined = 0;

    while joined < slots.len() {
        let (stream, addr) = listener.accept().await?;
        stream.set_nodelay(true)?;
        let (rx, tx) = stream.into_split();
        let (rx, tx) = comms::channel(rx, tx);

        // The rank isn't known until the peer introduces itself.
        let mut peer = Peer { rank: 0, rx, tx };

        let rank = match recv_control(&mut peer, buf, "control/join").await? {
            Command::Join {
                rank,
                world_size: theirs,
            } => {
                if theirs != world_size {
                    let err = CollectiveErr::WorldSizeMismatch {
                        rank,
                        got: theirs,
                        expected: world_size,
                    };
                    reject(&mut peer, &err).await;
                    return Err(err);
                }

                rank
            }
            other => return Err(unexpected(0, "control/join", &other)),
        };

        let Some(slot) = rank.checked_sub(1).and_then(|idx| slots.get_mut(idx)) else {
            let err = CollectiveErr::InvalidRank { rank, world_size };
            reject(&mut peer, &err).await;
            return Err(err);
        };

        if slot.is_some() {
            let err = CollectiveErr::DuplicateRank { rank };
            reject(&mut peer, &err).await;
            return Err(err);
        }

        debug!(rank = rank; "peer joined from {addr}");
        peer.rank = rank;
        *slot = Some(peer);
        joined += 1;
    }

    Ok(slots.into_iter().flatten().collect())
}

/// Connects to rank 0, retrying until it is listening, and introduces this rank.
async fn connect_host(cfg: &GroupConfig) -> Result<Peer> {
    let stream = loop {
        match TcpStream::connect((cfg.addr.as_str(), cfg.port)).await {
            Ok(stream) => break stream,
            Err(e) => {
                debug!(rank = cfg.rank; "rendezvous not reachable yet: {e}");
                time::sleep(RETRY_INTERVAL).await;
            }
        }
    };

    stream.set_nodelay(true)?;
    let (rx, tx) = stream.into_split();
    let (rx, tx) = comms::channel(rx, tx);
    let mut host = Peer { rank: 0, rx, tx };

    let join = Msg::Control(Command::Join {
        rank: cfg.rank,
        world_size: cfg.world_size.get(),
    });
    host.tx.send(&join).await?;

    let mut buf = Vec::new();
    match recv_control(&mut host, &mut buf, "control/welcome").await? {
        Command::Welcome { world_size } if world_size == cfg.world_size.get() => Ok(host),
        Command::Welcome { world_size } => Err(CollectiveErr::WorldSizeMismatch {
            rank: cfg.rank,
            got: cfg.world_size.get(),
            expected: world_size,
        }),
        other => Err(unexpected(0, "control/welcome", &other)),
    }
}

/// Tells a peer why it was turned away, it's fine if it's already gone.
async fn reject(peer: &mut Peer, err: &CollectiveErr) {
    let detail = err.to_string();
    if let Err(e) = peer.tx.send(&Msg::Err(detail.into())).await {
        warn!("failed to report rejection: {e}");
    }
}

async fn recv_control(peer: &mut Peer, buf: &mut Vec<u32>, expected: &'static str) -> Result<Command> {
    match peer.rx.recv_into(buf).await? {
        Msg::Control(cmd) => Ok(cmd),
        Msg::Err(detail) => Err(CollectiveErr::Remote {
            peer: peer.rank,
            detail: detail.into_owned(),
        }),
        other => Err(CollectiveErr::UnexpectedMessage {
            peer: peer.rank,
            expected,
            got: other.kind(),
        }),
    }
}

async fn recv_data(peer: &mut Peer, buf: &mut Vec<u32>) -> Result<Vec<f32>> {
    match peer.rx.recv_into(buf).await? {
        Msg::Data(values) => Ok(values.to_vec()),
        Msg::Err(detail) => Err(CollectiveErr::Remote {
            peer: peer.rank,
            detail: detail.into_owned(),
        }),
        other => Err(CollectiveErr::UnexpectedMessage {
            peer: peer.rank,
            expected: "data",
            got: other.kind(),
        }),
    }
}

fn unexpected(peer: usize, expected: &'static str, got: &Command) -> CollectiveErr {
    CollectiveErr::UnexpectedMessage {
        peer,
        expected,
        got: Msg::Control(got.clone()).kind(),
    }
}
