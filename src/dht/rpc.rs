use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::dos_blocker::DosBlocker;
use super::error::DhtError;
use super::message::{peek_transaction, DhtMessage, DhtQuery, DhtResponse, MessageBody};
use super::node_id::NodeId;
use super::observer::ObserverKey;
use super::settings::DhtSettings;
use super::transport::Transport;

/// Identifies a traversal in the engine's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TraversalId(pub u64);

/// Who gets told about the outcome of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOwner {
    Traversal {
        traversal: TraversalId,
        observer: ObserverKey,
    },
    /// A standalone ping; the number lets the engine find a waiting caller.
    Ping(u64),
}

#[derive(Debug)]
struct Transaction {
    addr: SocketAddr,
    node_id: Option<NodeId>,
    sent: Instant,
    owner: TransactionOwner,
    short_timeout_fired: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    /// The node answered with a KRPC error.
    Error { code: i64, message: String },
    /// A reply arrived for the transaction but did not parse.
    Malformed,
    /// The reply came from a different node ID than the one we queried.
    WrongNode,
    /// The I/O layer reported the endpoint unreachable.
    Unreachable,
}

/// The single outcome of a transaction, or a short-timeout notice.
#[derive(Debug)]
pub enum RpcEvent {
    Reply {
        owner: TransactionOwner,
        addr: SocketAddr,
        rtt: Duration,
        response: Box<DhtResponse>,
        /// Our own endpoint as the responder sees it.
        reported_ip: Option<SocketAddr>,
    },
    Failure {
        owner: TransactionOwner,
        addr: SocketAddr,
        /// ID to report to the routing table; `None` if we never knew it.
        node_id: Option<NodeId>,
        kind: FailureKind,
    },
    /// The transaction is still open but slow.
    ShortTimeout { owner: TransactionOwner },
}

/// What to do with an incoming datagram.
#[derive(Debug)]
pub enum Incoming {
    /// Rate limited, undecodable, or a reply nobody waits for.
    Dropped,
    Query(DhtMessage),
    Event(RpcEvent),
}

/// Tracks outstanding queries and matches replies to them.
pub struct RpcManager {
    our_id: NodeId,
    transport: Arc<dyn Transport>,
    transactions: HashMap<u16, Transaction>,
    next_tid: u16,
    max_transactions: usize,
    timeout: Duration,
    short_timeout: Duration,
    dos_blocker: DosBlocker,
}

impl RpcManager {
    pub fn new(our_id: NodeId, transport: Arc<dyn Transport>, settings: &DhtSettings) -> Self {
        Self {
            our_id,
            transport,
            transactions: HashMap::new(),
            next_tid: rand::random(),
            max_transactions: settings.max_transactions,
            timeout: settings.query_timeout,
            short_timeout: settings.short_timeout,
            dos_blocker: DosBlocker::new(settings),
        }
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    /// Queries sent from now on carry `id`.
    pub fn set_our_id(&mut self, id: NodeId) {
        self.our_id = id;
    }

    pub fn num_outstanding(&self) -> usize {
        self.transactions.len()
    }

    pub fn dos_rejections(&self) -> u64 {
        self.dos_blocker.rejected()
    }

    fn allocate_tid(&mut self) -> Option<u16> {
        if self.transactions.len() >= self.max_transactions || self.transactions.len() > u16::MAX as usize {
            return None;
        }
        loop {
            let tid = self.next_tid;
            self.next_tid = self.next_tid.wrapping_add(1);
            if !self.transactions.contains_key(&tid) {
                return Some(tid);
            }
        }
    }

    /// Sends `query` to `addr`. On error nothing was sent and no event will
    /// follow.
    pub fn invoke(
        &mut self,
        query: DhtQuery,
        addr: SocketAddr,
        node_id: Option<NodeId>,
        owner: TransactionOwner,
        now: Instant,
    ) -> Result<(), DhtError> {
        let Some(tid) = self.allocate_tid() else {
            warn!(outstanding = self.transactions.len(), "too many outstanding DHT queries");
            return Err(DhtError::RateLimited);
        };

        let method = query.method().to_string();
        let msg = DhtMessage::query(Bytes::copy_from_slice(&tid.to_be_bytes()), self.our_id, query);
        let data = msg.encode().inspect_err(|e| {
            debug!(%addr, error = %e, "failed to encode DHT query");
        })?;

        self.transport.send_to(&data, addr).inspect_err(|e| {
            debug!(%addr, error = %e, "failed to send DHT query");
        })?;

        trace!(%addr, method = %method, tid, "sent DHT query");
        self.transactions.insert(
            tid,
            Transaction {
                addr,
                node_id,
                sent: now,
                owner,
                short_timeout_fired: false,
            },
        );
        Ok(())
    }

    /// Sends a reply or error for a query we received. The DOS blocker only
    /// looks at incoming traffic, so this never fails on rate limits.
    pub fn send_reply(&self, msg: &DhtMessage, addr: SocketAddr) -> bool {
        let sent = msg
            .encode()
            .map_err(|e| e.to_string())
            .and_then(|data| self.transport.send_to(&data, addr).map_err(|e| e.to_string()));
        match sent {
            Ok(()) => true,
            Err(e) => {
                debug!(%addr, error = %e, "failed to send DHT reply");
                false
            }
        }
    }

    /// Classifies an incoming datagram. Replies complete their transaction.
    pub fn incoming(&mut self, data: &[u8], from: SocketAddr, now: Instant) -> Incoming {
        if !self.dos_blocker.incoming(from.ip(), now) {
            return Incoming::Dropped;
        }

        let msg = match DhtMessage::parse(data) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(%from, error = %e, "failed to parse DHT message");
                // A broken reply still settles its transaction.
                return match peek_transaction(data).and_then(|t| self.take(&t, from)) {
                    Some(tx) => Incoming::Event(RpcEvent::Failure {
                        owner: tx.owner,
                        addr: tx.addr,
                        node_id: tx.node_id,
                        kind: FailureKind::Malformed,
                    }),
                    None => Incoming::Dropped,
                };
            }
        };

        let tid = msg.transaction_id.clone();
        let reported_ip = msg.ip;
        match msg.body {
            MessageBody::Query { .. } => Incoming::Query(msg),
            MessageBody::Response(response) => {
                let Some(tx) = self.take(&tid, from) else {
                    trace!(%from, "reply for unknown transaction");
                    return Incoming::Dropped;
                };

                if tx.node_id.is_some_and(|id| id != response.id) {
                    debug!(%from, "reply from unexpected node id");
                    return Incoming::Event(RpcEvent::Failure {
                        owner: tx.owner,
                        addr: tx.addr,
                        node_id: tx.node_id,
                        kind: FailureKind::WrongNode,
                    });
                }

                Incoming::Event(RpcEvent::Reply {
                    owner: tx.owner,
                    addr: tx.addr,
                    rtt: now.saturating_duration_since(tx.sent),
                    response: Box::new(response),
                    reported_ip,
                })
            }
            MessageBody::Error { code, message } => {
                let Some(tx) = self.take(&tid, from) else {
                    return Incoming::Dropped;
                };
                debug!(%from, code, message = %message, "DHT error reply");
                Incoming::Event(RpcEvent::Failure {
                    owner: tx.owner,
                    addr: tx.addr,
                    node_id: None,
                    kind: FailureKind::Error { code, message },
                })
            }
        }
    }

    /// Removes the transaction `tid` if it was sent to `from`'s address.
    fn take(&mut self, tid: &[u8], from: SocketAddr) -> Option<Transaction> {
        let tid = u16::from_be_bytes(<[u8; 2]>::try_from(tid).ok()?);
        match self.transactions.get(&tid) {
            Some(tx) if tx.addr.ip() == from.ip() => self.transactions.remove(&tid),
            Some(tx) => {
                debug!(expected = %tx.addr, %from, "reply from wrong address");
                None
            }
            None => None,
        }
    }

    /// Fails the oldest transaction to `addr`.
    pub fn unreachable(&mut self, addr: SocketAddr) -> Option<RpcEvent> {
        let tid = self
            .transactions
            .iter()
            .filter(|(_, tx)| tx.addr == addr)
            .min_by_key(|(_, tx)| tx.sent)
            .map(|(tid, _)| *tid)?;
        let tx = self.transactions.remove(&tid)?;
        Some(RpcEvent::Failure {
            owner: tx.owner,
            addr: tx.addr,
            node_id: tx.node_id,
            kind: FailureKind::Unreachable,
        })
    }

    /// Times out expired transactions and reports slow ones, oldest first.
    pub fn tick(&mut self, now: Instant) -> Vec<RpcEvent> {
        let mut expired = Vec::new();
        let mut events = Vec::new();

        for (tid, tx) in &mut self.transactions {
            let age = now.saturating_duration_since(tx.sent);
            if age >= self.timeout {
                expired.push((tx.sent, *tid));
            } else if age >= self.short_timeout && !tx.short_timeout_fired {
                tx.short_timeout_fired = true;
                events.push((tx.sent, RpcEvent::ShortTimeout { owner: tx.owner }));
            }
        }

        for (sent, tid) in expired {
            if let Some(tx) = self.transactions.remove(&tid) {
                trace!(addr = %tx.addr, tid, "DHT query timed out");
                events.push((
                    sent,
                    RpcEvent::Failure {
                        owner: tx.owner,
                        addr: tx.addr,
                        node_id: tx.node_id,
                        kind: FailureKind::Timeout,
                    },
                ));
            }
        }

        events.sort_by_key(|(sent, _)| *sent);
        events.into_iter().map(|(_, e)| e).collect()
    }
}
