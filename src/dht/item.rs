//! BEP-44 items: immutable values addressed by their hash, and mutable values
//! addressed by an Ed25519 public key (plus optional salt).

use bytes::Bytes;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use sha1::{Digest, Sha1};

use super::node_id::NodeId;
use crate::bencode::{encode, BencodeError, Value};

pub const PUBLIC_KEY_LEN: usize = 32;
pub const SIGNATURE_LEN: usize = 64;

pub type PublicKey = [u8; PUBLIC_KEY_LEN];
pub type ItemSignature = [u8; SIGNATURE_LEN];

/// Target of an immutable item, given its bencoded value.
pub fn immutable_target(encoded_value: &[u8]) -> NodeId {
    NodeId(Sha1::digest(encoded_value).into())
}

/// Target of a mutable item: SHA-1 of the public key followed by the salt.
pub fn mutable_target(public_key: &PublicKey, salt: &[u8]) -> NodeId {
    let mut hasher = Sha1::new();
    hasher.update(public_key);
    hasher.update(salt);
    NodeId(hasher.finalize().into())
}

/// The byte string a mutable item signature covers:
/// `4:salt<len>:<salt>3:seqi<seq>e1:v<bencoded value>`, with the salt part
/// omitted when the salt is empty.
pub fn signature_buffer(encoded_value: &[u8], salt: &[u8], seq: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(encoded_value.len() + salt.len() + 40);
    if !salt.is_empty() {
        buf.extend_from_slice(b"4:salt");
        buf.extend_from_slice(salt.len().to_string().as_bytes());
        buf.push(b':');
        buf.extend_from_slice(salt);
    }
    buf.extend_from_slice(b"3:seqi");
    buf.extend_from_slice(seq.to_string().as_bytes());
    buf.extend_from_slice(b"e1:v");
    buf.extend_from_slice(encoded_value);
    buf
}

/// Derives a key pair from a 32-byte seed.
pub fn create_keypair(seed: &[u8; 32]) -> (PublicKey, SigningKey) {
    let signing_key = SigningKey::from_bytes(seed);
    (signing_key.verifying_key().to_bytes(), signing_key)
}

pub fn sign_mutable_item(
    encoded_value: &[u8],
    salt: &[u8],
    seq: i64,
    signing_key: &SigningKey,
) -> ItemSignature {
    signing_key
        .sign(&signature_buffer(encoded_value, salt, seq))
        .to_bytes()
}

pub fn verify_mutable_item(
    encoded_value: &[u8],
    salt: &[u8],
    seq: i64,
    public_key: &PublicKey,
    signature: &ItemSignature,
) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let signature = Signature::from_bytes(signature);
    key.verify_strict(&signature_buffer(encoded_value, salt, seq), &signature)
        .is_ok()
}

/// A signed, versioned value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutableItem {
    /// The bencoded value.
    pub value: Bytes,
    pub salt: Bytes,
    pub seq: i64,
    pub public_key: PublicKey,
    pub signature: ItemSignature,
}

impl MutableItem {
    pub fn sign(value: &Value, salt: &[u8], seq: i64, signing_key: &SigningKey) -> Result<Self, BencodeError> {
        let value = Bytes::from(encode(value)?);
        let signature = sign_mutable_item(&value, salt, seq, signing_key);
        Ok(Self {
            value,
            salt: Bytes::copy_from_slice(salt),
            seq,
            public_key: signing_key.verifying_key().to_bytes(),
            signature,
        })
    }

    pub fn target(&self) -> NodeId {
        mutable_target(&self.public_key, &self.salt)
    }

    pub fn verify(&self) -> bool {
        verify_mutable_item(&self.value, &self.salt, self.seq, &self.public_key, &self.signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// A bencoded value addressed by its SHA-1.
    Immutable(Bytes),
    Mutable(MutableItem),
}

impl Item {
    pub fn immutable(value: &Value) -> Result<Self, BencodeError> {
        Ok(Item::Immutable(Bytes::from(encode(value)?)))
    }

    pub fn target(&self) -> NodeId {
        match self {
            Item::Immutable(value) => immutable_target(value),
            Item::Mutable(item) => item.target(),
        }
    }

    /// The bencoded value.
    pub fn value(&self) -> &Bytes {
        match self {
            Item::Immutable(value) => value,
            Item::Mutable(item) => &item.value,
        }
    }

    pub fn seq(&self) -> Option<i64> {
        match self {
            Item::Immutable(_) => None,
            Item::Mutable(item) => Some(item.seq),
        }
    }

    /// Checks that the item really belongs under `target`.
    pub fn matches(&self, target: &NodeId) -> bool {
        match self {
            Item::Immutable(value) => immutable_target(value) == *target,
            Item::Mutable(item) => item.target() == *target && item.verify(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair() -> (PublicKey, SigningKey) {
        create_keypair(&[7u8; 32])
    }

    #[test]
    fn test_immutable_target_is_sha1_of_bencoding() {
        let item = Item::immutable(&Value::string("Hello World!")).unwrap();
        assert_eq!(item.value().as_ref(), b"12:Hello World!");
        // BEP-44 test vector
        assert_eq!(
            item.target().to_string(),
            "e5f96f6f38320f0f33959cb4d3d656452117aadb"
        );
    }

    #[test]
    fn test_signature_buffer_layout() {
        assert_eq!(
            signature_buffer(b"12:Hello World!", b"", 1),
            b"3:seqi1e1:v12:Hello World!".to_vec()
        );
        assert_eq!(
            signature_buffer(b"12:Hello World!", b"foobar", 1),
            b"4:salt6:foobar3:seqi1e1:v12:Hello World!".to_vec()
        );
    }

    #[test]
    fn test_mutable_sign_and_verify() {
        let (pk, sk) = keypair();
        let item = MutableItem::sign(&Value::string("Hello World!"), b"foobar", 1, &sk).unwrap();
        assert_eq!(item.public_key, pk);
        assert!(item.verify());
        assert_eq!(item.target(), mutable_target(&pk, b"foobar"));
        assert!(Item::Mutable(item.clone()).matches(&item.target()));
    }

    #[test]
    fn test_tampering_breaks_signature() {
        let (_, sk) = keypair();
        let item = MutableItem::sign(&Value::string("payload"), b"salt", 5, &sk).unwrap();

        let mut value = item.clone();
        let mut bytes = value.value.to_vec();
        bytes[3] ^= 1;
        value.value = Bytes::from(bytes);
        assert!(!value.verify());

        let mut salt = item.clone();
        salt.salt = Bytes::from_static(b"salu");
        assert!(!salt.verify());

        let mut seq = item.clone();
        seq.seq = 6;
        assert!(!seq.verify());

        let mut sig = item.clone();
        sig.signature[0] ^= 1;
        assert!(!sig.verify());
    }

    #[test]
    fn test_salt_changes_target() {
        let (pk, _) = keypair();
        assert_ne!(mutable_target(&pk, b""), mutable_target(&pk, b"a"));
    }

    #[test]
    fn test_immutable_matches_only_own_target() {
        let item = Item::immutable(&Value::Integer(42)).unwrap();
        assert!(item.matches(&item.target()));
        assert!(!item.matches(&NodeId::generate()));
    }
}
