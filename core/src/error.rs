use thiserror::Error;

use crate::socket::SocketId;

/// Failures reported by the bus engine.
///
/// These travel as synchronous results or inside an [`ActionReport`]
/// handed to a socket's completion handler; nothing in the engine panics
/// on a bus-level failure.
///
/// [`ActionReport`]: crate::socket::ActionReport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("BUSACK not received within {0}us")]
    BusAckTimeout(u64),
    #[error("bus action could not complete within {0}us")]
    ActionTimeout(u64),
    #[error("request cancelled before it completed")]
    Cancelled,
    #[error("another operation is already in progress")]
    AlreadyInProgress,
    #[error("read cycle was not decoded by any socket")]
    NotDecoded,
    #[error("socket table full ({0} sockets)")]
    TooManySockets(usize),
    #[error("unknown socket {0:?}")]
    UnknownSocket(SocketId),
    #[error("memory image block table full ({0} blocks)")]
    ImageFull(usize),
    #[error("bus is not held")]
    BusNotHeld,
    #[error("programmer is not attached to a socket")]
    NotAttached,
    #[error("register snippet at {0:#06x} would overlap the reset vector jump")]
    SnippetOverlapsVector(u16),
}
