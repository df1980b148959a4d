pub mod codec;
pub mod config;
pub mod destination;
pub mod fee;
pub mod node;
pub mod registry;
pub mod relayer;
pub mod scanner;
pub mod script;
pub mod types;
pub mod validation;

#[cfg(test)]
pub(crate) mod test_utils;

pub use codec::{BmcpMessage, EncodeOptions};
pub use config::Config;
pub use registry::{ChainDescriptor, ChainRegistry};
pub use types::{BlockPlacement, DetectedMessage, RelayOutcome, ScanCursor, StopHandle};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Bad protocol magic")]
    BadMagic,

    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("Message truncated")]
    Truncated,

    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),

    #[error("Size exceeded: {size} > {max}")]
    SizeExceeded { size: usize, max: usize },

    #[error("Change {change} sat is below the dust limit")]
    BelowDustLimit { change: i64 },

    #[error("Unknown chain selector: 0x{0:016x}")]
    UnknownChain(u64),

    #[error("Invalid target address: {0}")]
    InvalidTargetAddress(String),

    #[error("No calldata provided")]
    MissingCalldata,

    #[error("Deadline {deadline} has passed (now {now})")]
    DeadlineExpired { deadline: u32, now: u64 },

    #[error("Nonce {0} already relayed")]
    NonceReplayed(u32),

    #[error("Nonce 0xffffffff is reserved")]
    ReservedNonce,

    #[error("Malformed OP_RETURN script")]
    MalformedScript,

    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Destination rejected the call: {0}")]
    Rejected(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Errors talking to a node or API, as opposed to bad message data.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::RateLimited(_))
    }
}
