use std::collections::BTreeMap;
use std::net::SocketAddr;

use bytes::Bytes;

use super::error::DhtError;
use super::item::{ItemSignature, PublicKey};
use super::node::{
    compact_endpoint, parse_compact_nodes, read_compact_endpoint, NodeEntry,
    COMPACT_NODE_V4_LEN, COMPACT_NODE_V6_LEN,
};
use super::node_id::{NodeId, NODE_ID_LEN};
use crate::bencode::{decode, encode, Value};
use crate::constants::CLIENT_VERSION;

pub type TransactionId = Bytes;

/// KRPC error codes (BEP-5, BEP-44).
pub mod error_code {
    pub const GENERIC: i64 = 201;
    pub const SERVER: i64 = 202;
    pub const PROTOCOL: i64 = 203;
    pub const METHOD_UNKNOWN: i64 = 204;
    pub const MESSAGE_TOO_BIG: i64 = 205;
    pub const INVALID_SIGNATURE: i64 = 206;
    pub const SALT_TOO_BIG: i64 = 207;
    pub const CAS_MISMATCH: i64 = 301;
    pub const SEQUENCE_TOO_OLD: i64 = 302;
}

/// Arguments of a BEP-44 `put`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutArgs {
    pub token: Bytes,
    /// The bencoded value.
    pub value: Bytes,
    pub public_key: Option<PublicKey>,
    pub signature: Option<ItemSignature>,
    pub seq: Option<i64>,
    pub salt: Bytes,
    pub cas: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DhtQuery {
    Ping,
    FindNode {
        target: NodeId,
    },
    GetPeers {
        info_hash: NodeId,
    },
    AnnouncePeer {
        info_hash: NodeId,
        port: u16,
        token: Bytes,
        implied_port: bool,
    },
    Get {
        target: NodeId,
        seq: Option<i64>,
    },
    Put(Box<PutArgs>),
    SampleInfohashes {
        target: NodeId,
    },
    /// A method we do not implement and cannot treat as `find_node`.
    Unknown {
        method: String,
    },
}

impl DhtQuery {
    pub fn method(&self) -> &str {
        match self {
            DhtQuery::Ping => "ping",
            DhtQuery::FindNode { .. } => "find_node",
            DhtQuery::GetPeers { .. } => "get_peers",
            DhtQuery::AnnouncePeer { .. } => "announce_peer",
            DhtQuery::Get { .. } => "get",
            DhtQuery::Put(_) => "put",
            DhtQuery::SampleInfohashes { .. } => "sample_infohashes",
            DhtQuery::Unknown { method } => method.as_str(),
        }
    }
}

/// The `r` dictionary of a reply. Which fields are present depends on the
/// query it answers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DhtResponse {
    pub id: NodeId,
    pub nodes: Vec<NodeEntry>,
    pub nodes6: Vec<NodeEntry>,
    pub token: Option<Bytes>,
    pub values: Vec<SocketAddr>,
    /// Bencoded item value.
    pub value: Option<Bytes>,
    pub public_key: Option<PublicKey>,
    pub signature: Option<ItemSignature>,
    pub seq: Option<i64>,
    pub samples: Vec<NodeId>,
    pub interval: Option<i64>,
    pub num: Option<i64>,
}

impl DhtResponse {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// All returned nodes, IPv4 first.
    pub fn all_nodes(&self) -> impl Iterator<Item = &NodeEntry> {
        self.nodes.iter().chain(self.nodes6.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Query { sender_id: NodeId, query: DhtQuery },
    Response(DhtResponse),
    Error { code: i64, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhtMessage {
    pub transaction_id: TransactionId,
    pub version: Option<Bytes>,
    /// The requester's endpoint as seen by the responder (BEP-42).
    pub ip: Option<SocketAddr>,
    pub body: MessageBody,
}

impl DhtMessage {
    pub fn query(transaction_id: TransactionId, our_id: NodeId, query: DhtQuery) -> Self {
        Self {
            transaction_id,
            version: Some(Bytes::from_static(CLIENT_VERSION)),
            ip: None,
            body: MessageBody::Query {
                sender_id: our_id,
                query,
            },
        }
    }

    pub fn response(transaction_id: TransactionId, response: DhtResponse, requester: SocketAddr) -> Self {
        Self {
            transaction_id,
            version: Some(Bytes::from_static(CLIENT_VERSION)),
            ip: Some(requester),
            body: MessageBody::Response(response),
        }
    }

    pub fn error(transaction_id: TransactionId, code: i64, message: &str) -> Self {
        Self {
            transaction_id,
            version: Some(Bytes::from_static(CLIENT_VERSION)),
            ip: None,
            body: MessageBody::Error {
                code,
                message: message.to_string(),
            },
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, DhtError> {
        let value = decode(data)?;

        let transaction_id = value
            .get_bytes(b"t")
            .cloned()
            .ok_or_else(|| DhtError::InvalidMessage("missing transaction id".into()))?;

        let msg_type = value
            .get_str(b"y")
            .ok_or_else(|| DhtError::InvalidMessage("missing message type".into()))?;

        let version = value.get_bytes(b"v").cloned();
        let ip = value.get_bytes(b"ip").and_then(|b| read_compact_endpoint(b));

        let body = match msg_type {
            "q" => parse_query(&value)?,
            "r" => parse_response(&value)?,
            "e" => parse_error(&value)?,
            _ => {
                return Err(DhtError::InvalidMessage(format!(
                    "unknown message type: {}",
                    msg_type
                )))
            }
        };

        Ok(Self {
            transaction_id,
            version,
            ip,
            body,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, DhtError> {
        let mut dict = BTreeMap::new();

        dict.insert(
            Bytes::from_static(b"t"),
            Value::Bytes(self.transaction_id.clone()),
        );
        if let Some(version) = &self.version {
            dict.insert(Bytes::from_static(b"v"), Value::Bytes(version.clone()));
        }
        if let Some(ip) = &self.ip {
            dict.insert(Bytes::from_static(b"ip"), Value::bytes(&compact_endpoint(ip)));
        }

        match &self.body {
            MessageBody::Query { sender_id, query } => {
                dict.insert(Bytes::from_static(b"y"), Value::string("q"));
                dict.insert(Bytes::from_static(b"q"), Value::string(query.method()));
                dict.insert(Bytes::from_static(b"a"), encode_query_args(sender_id, query)?);
            }
            MessageBody::Response(response) => {
                dict.insert(Bytes::from_static(b"y"), Value::string("r"));
                dict.insert(Bytes::from_static(b"r"), encode_response(response)?);
            }
            MessageBody::Error { code, message } => {
                dict.insert(Bytes::from_static(b"y"), Value::string("e"));
                dict.insert(
                    Bytes::from_static(b"e"),
                    Value::List(vec![Value::Integer(*code), Value::string(message)]),
                );
            }
        }

        Ok(encode(&Value::Dict(dict))?)
    }
}

/// Extracts the transaction ID of a reply or error, even if the rest of the
/// message does not parse. Queries yield `None`.
pub fn peek_transaction(data: &[u8]) -> Option<TransactionId> {
    let value = decode(data).ok()?;
    match value.get_str(b"y")? {
        "r" | "e" => value.get_bytes(b"t").cloned(),
        _ => None,
    }
}

fn invalid(reason: &str) -> DhtError {
    DhtError::InvalidMessage(reason.to_string())
}

fn node_id_arg(args: &Value, key: &[u8]) -> Option<NodeId> {
    args.get_array::<NODE_ID_LEN>(key).map(NodeId)
}

fn parse_query(value: &Value) -> Result<MessageBody, DhtError> {
    let method = value
        .get_str(b"q")
        .ok_or_else(|| invalid("missing query name"))?;
    let args = value.get(b"a").ok_or_else(|| invalid("missing query args"))?;
    if args.as_dict().is_none() {
        return Err(invalid("query args not a dict"));
    }

    let sender_id = node_id_arg(args, b"id").ok_or_else(|| invalid("missing id"))?;

    let query = match method {
        "ping" => DhtQuery::Ping,
        "find_node" => DhtQuery::FindNode {
            target: node_id_arg(args, b"target").ok_or_else(|| invalid("missing target"))?,
        },
        "get_peers" => DhtQuery::GetPeers {
            info_hash: node_id_arg(args, b"info_hash")
                .ok_or_else(|| invalid("missing info_hash"))?,
        },
        "announce_peer" => {
            let info_hash =
                node_id_arg(args, b"info_hash").ok_or_else(|| invalid("missing info_hash"))?;
            let port = args
                .get_int(b"port")
                .and_then(|p| u16::try_from(p).ok())
                .ok_or_else(|| invalid("missing port"))?;
            let token = args
                .get_bytes(b"token")
                .cloned()
                .ok_or_else(|| invalid("missing token"))?;
            let implied_port = args.get_int(b"implied_port").is_some_and(|v| v != 0);

            DhtQuery::AnnouncePeer {
                info_hash,
                port,
                token,
                implied_port,
            }
        }
        "get" => DhtQuery::Get {
            target: node_id_arg(args, b"target").ok_or_else(|| invalid("missing target"))?,
            seq: args.get_int(b"seq"),
        },
        "put" => {
            let token = args
                .get_bytes(b"token")
                .cloned()
                .ok_or_else(|| invalid("missing token"))?;
            let value = args.get(b"v").ok_or_else(|| invalid("missing v"))?;

            DhtQuery::Put(Box::new(PutArgs {
                token,
                value: Bytes::from(encode(value)?),
                public_key: args.get_array(b"k"),
                signature: args.get_array(b"sig"),
                seq: args.get_int(b"seq"),
                salt: args.get_bytes(b"salt").cloned().unwrap_or_default(),
                cas: args.get_int(b"cas"),
            }))
        }
        "sample_infohashes" => DhtQuery::SampleInfohashes {
            target: node_id_arg(args, b"target").ok_or_else(|| invalid("missing target"))?,
        },
        _ => match node_id_arg(args, b"target").or_else(|| node_id_arg(args, b"info_hash")) {
            Some(target) => DhtQuery::FindNode { target },
            None => DhtQuery::Unknown {
                method: method.to_string(),
            },
        },
    };

    Ok(MessageBody::Query { sender_id, query })
}

fn parse_response(value: &Value) -> Result<MessageBody, DhtError> {
    let r = value.get(b"r").ok_or_else(|| invalid("missing response dict"))?;
    if r.as_dict().is_none() {
        return Err(invalid("response not a dict"));
    }

    let id = node_id_arg(r, b"id").ok_or_else(|| invalid("missing id in response"))?;

    let nodes = r
        .get_bytes(b"nodes")
        .map(|data| parse_compact_nodes(data, COMPACT_NODE_V4_LEN))
        .unwrap_or_default();
    let nodes6 = r
        .get_bytes(b"nodes6")
        .map(|data| parse_compact_nodes(data, COMPACT_NODE_V6_LEN))
        .unwrap_or_default();

    let values = r
        .get_list(b"values")
        .map(|list| {
            list.iter()
                .filter_map(|v| v.as_bytes())
                .filter_map(|b| read_compact_endpoint(b))
                .collect()
        })
        .unwrap_or_default();

    let samples = r
        .get_bytes(b"samples")
        .map(|data| {
            data.chunks_exact(NODE_ID_LEN)
                .filter_map(|c| NodeId::from_bytes(c).ok())
                .collect()
        })
        .unwrap_or_default();

    let item_value = match r.get(b"v") {
        Some(v) => Some(Bytes::from(encode(v)?)),
        None => None,
    };

    Ok(MessageBody::Response(DhtResponse {
        id,
        nodes,
        nodes6,
        token: r.get_bytes(b"token").cloned(),
        values,
        value: item_value,
        public_key: r.get_array(b"k"),
        signature: r.get_array(b"sig"),
        seq: r.get_int(b"seq"),
        samples,
        interval: r.get_int(b"interval"),
        num: r.get_int(b"num"),
    }))
}

fn parse_error(value: &Value) -> Result<MessageBody, DhtError> {
    let error = value
        .get_list(b"e")
        .ok_or_else(|| invalid("missing error list"))?;

    let code = error.first().and_then(|v| v.as_integer()).unwrap_or(0);
    let message = error
        .get(1)
        .and_then(|v| v.as_str())
        .unwrap_or("unknown error")
        .to_string();

    Ok(MessageBody::Error { code, message })
}

fn id_value(id: &NodeId) -> Value {
    Value::bytes(id.as_bytes())
}

fn encode_query_args(sender_id: &NodeId, query: &DhtQuery) -> Result<Value, DhtError> {
    let mut args = BTreeMap::new();
    args.insert(Bytes::from_static(b"id"), id_value(sender_id));

    match query {
        DhtQuery::Ping | DhtQuery::Unknown { .. } => {}
        DhtQuery::FindNode { target } | DhtQuery::SampleInfohashes { target } => {
            args.insert(Bytes::from_static(b"target"), id_value(target));
        }
        DhtQuery::GetPeers { info_hash } => {
            args.insert(Bytes::from_static(b"info_hash"), id_value(info_hash));
        }
        DhtQuery::AnnouncePeer {
            info_hash,
            port,
            token,
            implied_port,
        } => {
            args.insert(Bytes::from_static(b"info_hash"), id_value(info_hash));
            args.insert(Bytes::from_static(b"port"), Value::Integer(*port as i64));
            args.insert(Bytes::from_static(b"token"), Value::Bytes(token.clone()));
            if *implied_port {
                args.insert(Bytes::from_static(b"implied_port"), Value::Integer(1));
            }
        }
        DhtQuery::Get { target, seq } => {
            args.insert(Bytes::from_static(b"target"), id_value(target));
            if let Some(seq) = seq {
                args.insert(Bytes::from_static(b"seq"), Value::Integer(*seq));
            }
        }
        DhtQuery::Put(put) => {
            args.insert(Bytes::from_static(b"token"), Value::Bytes(put.token.clone()));
            args.insert(Bytes::from_static(b"v"), decode(&put.value)?);
            if let Some(k) = &put.public_key {
                args.insert(Bytes::from_static(b"k"), Value::bytes(k));
            }
            if let Some(sig) = &put.signature {
                args.insert(Bytes::from_static(b"sig"), Value::bytes(sig));
            }
            if let Some(seq) = put.seq {
                args.insert(Bytes::from_static(b"seq"), Value::Integer(seq));
            }
            if !put.salt.is_empty() {
                args.insert(Bytes::from_static(b"salt"), Value::Bytes(put.salt.clone()));
            }
            if let Some(cas) = put.cas {
                args.insert(Bytes::from_static(b"cas"), Value::Integer(cas));
            }
        }
    }

    Ok(Value::Dict(args))
}

fn encode_response(response: &DhtResponse) -> Result<Value, DhtError> {
    let mut resp = BTreeMap::new();
    resp.insert(Bytes::from_static(b"id"), id_value(&response.id));

    if !response.nodes.is_empty() {
        let mut compact = Vec::with_capacity(response.nodes.len() * COMPACT_NODE_V4_LEN);
        for node in response.nodes.iter().filter(|n| n.addr.is_ipv4()) {
            node.write_compact(&mut compact);
        }
        resp.insert(Bytes::from_static(b"nodes"), Value::Bytes(Bytes::from(compact)));
    }
    if !response.nodes6.is_empty() {
        let mut compact = Vec::with_capacity(response.nodes6.len() * COMPACT_NODE_V6_LEN);
        for node in response.nodes6.iter().filter(|n| n.addr.is_ipv6()) {
            node.write_compact(&mut compact);
        }
        resp.insert(Bytes::from_static(b"nodes6"), Value::Bytes(Bytes::from(compact)));
    }
    if let Some(token) = &response.token {
        resp.insert(Bytes::from_static(b"token"), Value::Bytes(token.clone()));
    }
    if !response.values.is_empty() {
        let values = response
            .values
            .iter()
            .map(|addr| Value::bytes(&compact_endpoint(addr)))
            .collect();
        resp.insert(Bytes::from_static(b"values"), Value::List(values));
    }
    if let Some(value) = &response.value {
        resp.insert(Bytes::from_static(b"v"), decode(value)?);
    }
    if let Some(k) = &response.public_key {
        resp.insert(Bytes::from_static(b"k"), Value::bytes(k));
    }
    if let Some(sig) = &response.signature {
        resp.insert(Bytes::from_static(b"sig"), Value::bytes(sig));
    }
    if let Some(seq) = response.seq {
        resp.insert(Bytes::from_static(b"seq"), Value::Integer(seq));
    }
    if !response.samples.is_empty() {
        let mut samples = Vec::with_capacity(response.samples.len() * NODE_ID_LEN);
        for id in &response.samples {
            samples.extend_from_slice(id.as_bytes());
        }
        resp.insert(Bytes::from_static(b"samples"), Value::Bytes(Bytes::from(samples)));
    }
    if let Some(interval) = response.interval {
        resp.insert(Bytes::from_static(b"interval"), Value::Integer(interval));
    }
    if let Some(num) = response.num {
        resp.insert(Bytes::from_static(b"num"), Value::Integer(num));
    }

    Ok(Value::Dict(resp))
}
