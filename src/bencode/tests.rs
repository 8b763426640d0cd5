use std::collections::BTreeMap;

use bytes::Bytes;

use super::*;

#[test]
fn test_decode_integer() {
    assert_eq!(decode(b"i42e").unwrap(), Value::Integer(42));
    assert_eq!(decode(b"i-42e").unwrap(), Value::Integer(-42));
    assert_eq!(decode(b"i0e").unwrap(), Value::Integer(0));
    assert_eq!(
        decode(b"i9223372036854775807e").unwrap(),
        Value::Integer(i64::MAX)
    );
}

#[test]
fn test_decode_integer_invalid() {
    assert!(decode(b"i-0e").is_err());
    assert!(decode(b"i03e").is_err());
    assert!(decode(b"ie").is_err());
    assert!(decode(b"i12").is_err());
    assert!(decode(b"i99999999999999999999e").is_err());
}

#[test]
fn test_decode_bytes() {
    assert_eq!(
        decode(b"4:ping").unwrap(),
        Value::Bytes(Bytes::from_static(b"ping"))
    );
    assert_eq!(
        decode(b"0:").unwrap(),
        Value::Bytes(Bytes::from_static(b""))
    );
}

#[test]
fn test_decode_bytes_length_past_end() {
    assert!(matches!(decode(b"5:abc"), Err(BencodeError::UnexpectedEof)));
    assert!(decode(b"18446744073709551615:x").is_err());
    assert!(decode(b"04:ping").is_err());
}

#[test]
fn test_decode_error_message() {
    let value = decode(b"d1:eli203e13:invalid tokene1:t2:xy1:y1:ee").unwrap();
    let error = value.get_list(b"e").unwrap();
    assert_eq!(error[0].as_integer(), Some(203));
    assert_eq!(error[1].as_str(), Some("invalid token"));
    assert_eq!(value.get_bytes(b"t").map(|t| t.as_ref()), Some(b"xy".as_slice()));
}

#[test]
fn test_decode_dict_non_string_key() {
    assert!(decode(b"di1e4:spame").is_err());
}

#[test]
fn test_nesting_limit() {
    let mut deep = vec![b'l'; 100];
    deep.extend(vec![b'e'; 100]);
    assert!(matches!(decode(&deep), Err(BencodeError::NestingTooDeep)));

    let mut shallow = vec![b'l'; 10];
    shallow.extend(vec![b'e'; 10]);
    assert!(decode(&shallow).is_ok());
}

#[test]
fn test_trailing_data_error() {
    assert!(matches!(
        decode(b"de1:x"),
        Err(BencodeError::TrailingData)
    ));
}

#[test]
fn test_encode_sorts_dict_keys() {
    let mut dict = BTreeMap::new();
    dict.insert(Bytes::from_static(b"y"), Value::string("q"));
    dict.insert(Bytes::from_static(b"t"), Value::string("aa"));
    dict.insert(Bytes::from_static(b"q"), Value::string("ping"));
    assert_eq!(
        encode(&Value::Dict(dict)).unwrap(),
        b"d1:q4:ping1:t2:aa1:y1:qe"
    );
}

#[test]
fn test_roundtrip_get_response() {
    let original: &[u8] =
        b"d1:rd2:id20:0123456789abcdefghij3:seqi4e5:token4:abcd1:v5:helloe1:t2:aa1:y1:re";
    let decoded = decode(original).unwrap();
    let encoded = encode(&decoded).unwrap();
    assert_eq!(encoded, original);
}

#[test]
fn test_encoded_len_matches_encode() {
    let mut inner = BTreeMap::new();
    inner.insert(Bytes::from_static(b"seq"), Value::Integer(-1234));
    inner.insert(Bytes::from_static(b"v"), Value::bytes(&[7u8; 300]));

    let values = [
        Value::Integer(0),
        Value::Integer(-10),
        Value::Integer(i64::MIN),
        Value::Bytes(Bytes::new()),
        Value::List(vec![Value::Integer(10), Value::string("abc")]),
        Value::Dict(inner),
    ];

    for value in &values {
        assert_eq!(encoded_len(value), encode(value).unwrap().len(), "{value:?}");
    }
}

#[test]
fn test_keyed_accessors() {
    let value = decode(b"d1:ai3e1:b3:xyz1:cle1:dde2:id20:abcdefghij0123456789e").unwrap();

    assert_eq!(value.get_int(b"a"), Some(3));
    assert_eq!(value.get_str(b"b"), Some("xyz"));
    assert!(value.get_list(b"c").is_some());
    assert!(value.get_dict(b"d").is_some());
    assert!(value.get_array::<20>(b"id").is_some());

    assert_eq!(value.get_int(b"b"), None);
    assert_eq!(value.get_array::<20>(b"b"), None);
    assert_eq!(value.get(b"missing"), None);
    assert_eq!(Value::Integer(1).get(b"a"), None);
}
