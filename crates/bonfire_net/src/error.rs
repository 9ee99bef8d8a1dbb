//! Error types for the network layer
//!
//! Transient I/O failures surface as values the caller can retry on; they
//! are never fatal to the process.

use crate::protocol::CodecError;
use crate::PeerId;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// A listener or discovery socket could not be bound. For discovery
    /// sockets the caller degrades to the remaining path instead of failing
    /// the session.
    #[error("failed to bind {role} socket: {source}")]
    Bind {
        role: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    #[error("session is not connected")]
    NotConnected,

    #[error("no connected peer with id {0}")]
    UnknownPeer(PeerId),

    #[error("discovery probe I/O failed: {0}")]
    Probe(#[source] io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
