use thiserror::Error;

/// Errors produced while decoding or encoding bencode.
///
/// Decoding errors are expected in normal operation: any datagram from the
/// network may be garbage, and the DHT simply drops it.
#[derive(Debug, Error)]
pub enum BencodeError {
    /// The input ended inside a value, or a string length ran past the end.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// An integer was empty, non-numeric, out of range or had leading zeros.
    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// A byte-string length prefix was not a canonical decimal number.
    #[error("invalid string length")]
    InvalidStringLength,

    /// A value started with a byte that begins no bencode type, or a
    /// dictionary key was not a byte string.
    #[error("unexpected character: {0}")]
    UnexpectedChar(char),

    /// The datagram held more bytes after the top-level value.
    #[error("trailing data after value")]
    TrailingData,

    /// Lists and dictionaries were nested deeper than the decoder allows.
    #[error("nesting too deep")]
    NestingTooDeep,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
