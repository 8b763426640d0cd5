use thiserror::Error;

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("invalid node id length")]
    InvalidNodeId,

    #[error("timeout")]
    Timeout,

    #[error("too many outstanding queries")]
    RateLimited,

    #[error("lookup aborted")]
    Aborted,

    #[error("remote error {code}: {message}")]
    Remote { code: i64, message: String },
}

/// Why the local store refused a `put` or `announce_peer`.
///
/// Each variant maps onto the KRPC error code sent back to the writer, see
/// [`StoreError::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("invalid token")]
    InvalidToken,

    #[error("message too big")]
    MessageTooBig,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("salt too big")]
    SaltTooBig,

    #[error("CAS mismatch")]
    CasMismatch,

    #[error("sequence number less than current")]
    SequenceTooOld,

    #[error("invalid argument")]
    InvalidArgument,
}

impl StoreError {
    pub fn code(&self) -> i64 {
        use super::message::error_code;

        match self {
            StoreError::InvalidToken | StoreError::InvalidArgument => error_code::PROTOCOL,
            StoreError::MessageTooBig => error_code::MESSAGE_TOO_BIG,
            StoreError::InvalidSignature => error_code::INVALID_SIGNATURE,
            StoreError::SaltTooBig => error_code::SALT_TOO_BIG,
            StoreError::CasMismatch => error_code::CAS_MISMATCH,
            StoreError::SequenceTooOld => error_code::SEQUENCE_TOO_OLD,
        }
    }
}
