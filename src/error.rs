use thiserror::Error;

/// Failure to pull one frame out of a receive buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RespError {
    /// The buffer ends before the declared lengths are satisfied.
    #[error("incomplete frame")]
    Incomplete,

    #[error("invalid frame: {0}")]
    Invalid(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RdbError {
    #[error("snapshot truncated at byte {offset}")]
    Truncated { offset: usize },

    #[error("snapshot shorter than its 9-byte header")]
    InvalidHeader,

    #[error("unsupported string encoding 0x{0:02X}")]
    UnsupportedEncoding(u8),
}

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("primary closed the connection")]
    ConnectionClosed,

    #[error("bad built-in snapshot: {0}")]
    Hex(#[from] hex::FromHexError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("expected \"<host> <port>\", got {0:?}")]
    InvalidReplicaOf(String),
}
