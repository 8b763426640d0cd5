use bytes::Bytes;
use std::collections::BTreeMap;

/// A bencode value.
///
/// Bencode has four data types: integers, byte strings, lists, and dictionaries.
/// KRPC messages are dictionaries whose fields are mostly fixed-length byte
/// strings (node IDs, keys, signatures), so besides the plain accessors this
/// type offers keyed lookups that check both the type and the length.
///
/// # Examples
///
/// ```
/// use rdht::bencode::{decode, Value};
///
/// let reply = decode(b"d2:id20:abcdefghij01234567895:tokeni7ee").unwrap();
///
/// let id: Option<[u8; 20]> = reply.get_array(b"id");
/// assert_eq!(&id.unwrap()[..3], b"abc");
///
/// // Wrong type or wrong length both read as "missing"
/// assert_eq!(reply.get_bytes(b"token"), None);
/// assert_eq!(reply.get_array::<32>(b"id"), None);
/// assert_eq!(reply.get_int(b"token"), Some(7));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// A signed 64-bit integer.
    Integer(i64),
    /// A byte string (may or may not be valid UTF-8).
    Bytes(Bytes),
    /// An ordered list of values.
    List(Vec<Value>),
    /// A dictionary with byte string keys (sorted by key in bencode encoding).
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    /// Creates a byte string value from a UTF-8 string.
    pub fn string(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }

    /// Creates a byte string value by copying a slice.
    pub fn bytes(b: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(b))
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the value as a UTF-8 string, if it is a valid UTF-8 byte string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Returns the value as a fixed-size array, if it is a byte string of
    /// exactly `N` bytes.
    pub fn as_array<const N: usize>(&self) -> Option<[u8; N]> {
        let bytes = self.as_bytes()?;
        <[u8; N]>::try_from(bytes.as_ref()).ok()
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Consumes the value and returns the dictionary, if it is one.
    pub fn into_dict(self) -> Option<BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up a key in this value if it is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict()?.get(key)
    }

    pub fn get_bytes(&self, key: &[u8]) -> Option<&Bytes> {
        self.get(key)?.as_bytes()
    }

    pub fn get_str(&self, key: &[u8]) -> Option<&str> {
        self.get(key)?.as_str()
    }

    pub fn get_int(&self, key: &[u8]) -> Option<i64> {
        self.get(key)?.as_integer()
    }

    pub fn get_list(&self, key: &[u8]) -> Option<&Vec<Value>> {
        self.get(key)?.as_list()
    }

    pub fn get_dict(&self, key: &[u8]) -> Option<&BTreeMap<Bytes, Value>> {
        self.get(key)?.as_dict()
    }

    /// Looks up a byte string of exactly `N` bytes.
    pub fn get_array<const N: usize>(&self, key: &[u8]) -> Option<[u8; N]> {
        self.get(key)?.as_array()
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::bytes(b)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<BTreeMap<Bytes, Value>> for Value {
    fn from(d: BTreeMap<Bytes, Value>) -> Self {
        Value::Dict(d)
    }
}
