use std::{error::Error, fmt, io, time::Duration};

/// The collective module's result type.
pub type Result<T> = std::result::Result<T, CollectiveErr>;

/// Process group failures.
#[derive(Debug)]
pub enum CollectiveErr {
    Io(io::Error),
    InvalidRank {
        rank: usize,
        world_size: usize,
    },
    RendezvousTimeout {
        rank: usize,
        waited: Duration,
    },
    DuplicateRank {
        rank: usize,
    },
    WorldSizeMismatch {
        rank: usize,
        got: usize,
        expected: usize,
    },
    UnexpectedMessage {
        peer: usize,
        expected: &'static str,
        got: &'static str,
    },
    OutOfStep {
        peer: usize,
        got: u64,
        expected: u64,
    },
    LengthMismatch {
        peer: usize,
        got: usize,
        expected: usize,
    },
    Remote {
        peer: usize,
        detail: String,
    },
}

impl fmt::Display for CollectiveErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::InvalidRank { rank, world_size } => {
                write!(f, "rank {rank} is out of range for a group of {world_size}")
            }
            Self::RendezvousTimeout { rank, waited } => write!(
                f,
                "rank {rank} timed out after {waited:?} waiting for the group to assemble"
            ),
            Self::DuplicateRank { rank } => write!(f, "rank {rank} joined twice"),
            Self::WorldSizeMismatch {
                rank,
                got,
                expected,
            } => write!(
                f,
                "rank {rank} expects a world size of {got}, the group has {expected}"
            ),
            Self::UnexpectedMessage {
                peer,
                expected,
                got,
            } => write!(f, "unexpected message from rank {peer}: expected {expected}, got {got}"),
            Self::OutOfStep {
                peer,
                got,
                expected,
            } => write!(
                f,
                "rank {peer} is out of step: reached barrier {got}, expected {expected}"
            ),
            Self::LengthMismatch {
                peer,
                got,
                expected,
            } => write!(
                f,
                "rank {peer} contributed {got} values, expected {expected}"
            ),
            Self::Remote { peer, detail } => write!(f, "rank {peer} reported: {detail}"),
        }
    }
}

impl Error for CollectiveErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CollectiveErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
