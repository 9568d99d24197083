//! Dual-engine remote-console (RCON) client for Half-Life-family game
//! servers: the GoldSrc UDP challenge/response wire with fragment
//! reassembly, and the Source TCP framed-packet wire. Connections are held
//! in a pool keyed by server id, one live session per server.

pub mod connection;
pub mod fragment;
pub mod goldsrc;
pub mod pool;
pub mod source;

use thiserror::Error;

pub use crate::connection::{ConnectOptions, ConnectionState, RconConnection};
pub use crate::pool::{Endpoint, PoolConfig, RconPool};

/// Engine generations with incompatible RCON wires. Source2009 speaks the
/// Source TCP wire; it is tracked separately because status output and
/// game codes differ.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EngineKind {
    GoldSrc,
    Source,
    Source2009,
}

impl EngineKind {
    pub fn uses_tcp(self) -> bool {
        !matches!(self, EngineKind::GoldSrc)
    }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RconError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("rcon authentication failed")]
    AuthFailed,

    #[error("timed out during {0}")]
    Timeout(&'static str),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("not connected")]
    NotConnected,

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("invalid credentials")]
    InvalidCredentials,
}
