//! Bencode encoding and decoding ([BEP-3]).
//!
//! Every KRPC message the DHT sends or receives is a bencoded dictionary,
//! and BEP-44 item targets are SHA-1 hashes of bencoded values, so this
//! codec is the serialization boundary of the whole crate.
//!
//! # Data Types
//!
//! | Type | Format | Example |
//! |------|--------|---------|
//! | Integer | `i<number>e` | `i42e` → 42 |
//! | Byte String | `<length>:<data>` | `4:ping` → "ping" |
//! | List | `l<items>e` | `li201e4:oopse` → [201, "oops"] |
//! | Dictionary | `d<key><value>...e` | `d1:y1:qe` → {"y": "q"} |
//!
//! # Examples
//!
//! ```
//! use rdht::bencode::{decode, encode, Value};
//!
//! // A KRPC ping query
//! let packet = b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t2:aa1:y1:qe";
//! let value = decode(packet).unwrap();
//!
//! assert_eq!(value.get_str(b"q"), Some("ping"));
//! assert_eq!(value.get_dict(b"a").map(|a| a.len()), Some(1));
//!
//! // Dictionaries are kept sorted, so re-encoding is canonical
//! assert_eq!(encode(&value).unwrap(), packet);
//! ```
//!
//! # Error Handling
//!
//! Decoding can fail for various reasons:
//!
//! - [`BencodeError::UnexpectedEof`] - Input ended unexpectedly
//! - [`BencodeError::InvalidInteger`] - Malformed integer (e.g., leading zeros)
//! - [`BencodeError::UnexpectedChar`] - Unexpected character in input
//! - [`BencodeError::NestingTooDeep`] - Recursion limit exceeded (max 64 levels)
//! - [`BencodeError::TrailingData`] - Extra data after the value
//!
//! [BEP-3]: http://bittorrent.org/beps/bep_0003.html

mod decode;
mod encode;
mod error;
mod value;

pub use decode::decode;
pub use encode::{encode, encoded_len};
pub use error::BencodeError;
pub use value::Value;

#[cfg(test)]
mod tests;
