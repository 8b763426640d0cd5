use super::error::BencodeError;
use super::value::Value;
use std::io::Write;

/// Encodes a bencode value to a byte vector.
///
/// Dictionary keys come out sorted, which makes the output canonical: the
/// same value always hashes to the same BEP-44 target.
///
/// # Examples
///
/// ```
/// use rdht::bencode::{encode, Value};
/// use std::collections::BTreeMap;
/// use bytes::Bytes;
///
/// let mut error = BTreeMap::new();
/// error.insert(Bytes::from_static(b"y"), Value::string("e"));
/// error.insert(
///     Bytes::from_static(b"e"),
///     Value::List(vec![Value::Integer(203), Value::string("invalid token")]),
/// );
///
/// let encoded = encode(&Value::Dict(error)).unwrap();
/// assert_eq!(encoded, b"d1:eli203e13:invalid tokene1:y1:ee");
/// ```
pub fn encode(value: &Value) -> Result<Vec<u8>, BencodeError> {
    let mut buf = Vec::with_capacity(encoded_len(value));
    encode_value(value, &mut buf)?;
    Ok(buf)
}

/// Returns the number of bytes [`encode`] would produce, without allocating.
///
/// Used to enforce the BEP-44 limit on stored values before encoding them.
pub fn encoded_len(value: &Value) -> usize {
    match value {
        Value::Integer(i) => 2 + decimal_len(*i),
        Value::Bytes(b) => prefixed_len(b.len()),
        Value::List(l) => 2 + l.iter().map(encoded_len).sum::<usize>(),
        Value::Dict(d) => {
            2 + d
                .iter()
                .map(|(k, v)| prefixed_len(k.len()) + encoded_len(v))
                .sum::<usize>()
        }
    }
}

fn prefixed_len(len: usize) -> usize {
    decimal_len(len as i64) + 1 + len
}

fn decimal_len(mut n: i64) -> usize {
    let mut digits = if n < 0 { 2 } else { 1 };
    while n / 10 != 0 {
        n /= 10;
        digits += 1;
    }
    digits
}

fn encode_value<W: Write>(value: &Value, writer: &mut W) -> Result<(), BencodeError> {
    match value {
        Value::Integer(i) => {
            write!(writer, "i{}e", i)?;
        }
        Value::Bytes(b) => {
            write!(writer, "{}:", b.len())?;
            writer.write_all(b)?;
        }
        Value::List(l) => {
            writer.write_all(b"l")?;
            for item in l {
                encode_value(item, writer)?;
            }
            writer.write_all(b"e")?;
        }
        Value::Dict(d) => {
            writer.write_all(b"d")?;
            for (key, val) in d {
                write!(writer, "{}:", key.len())?;
                writer.write_all(key)?;
                encode_value(val, writer)?;
            }
            writer.write_all(b"e")?;
        }
    }
    Ok(())
}
