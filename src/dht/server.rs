use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::engine::{DhtEngine, DhtMetrics};
use super::error::DhtError;
use super::item::{Item, MutableItem, PublicKey};
use super::node_id::NodeId;
use super::rpc::TraversalId;
use super::settings::DhtSettings;
use super::transport::Transport;
use super::traversal::{DoneCallback, LookupKind, LookupStatus, TraversalOutcome};
use crate::bencode::Value;
use crate::constants::{DHT_BOOTSTRAP_NODES, DHT_MAX_PACKET_SIZE, DHT_TICK_INTERVAL};

/// A DHT node on a UDP socket.
///
/// `DhtServer` drives a [`DhtEngine`] from a tokio event loop and exposes
/// its lookups as `async` functions. [`run`](Self::run) must be polled for
/// anything to happen: it reads the socket and fires the timers.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use rdht::constants::DEFAULT_PORT;
/// use rdht::dht::DhtServer;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let dht = Arc::new(DhtServer::bind(DEFAULT_PORT).await?);
///
/// let runner = dht.clone();
/// tokio::spawn(async move { runner.run().await });
///
/// dht.bootstrap().await?;
///
/// let info_hash = [0u8; 20];
/// let peers = dht.get_peers(info_hash).await?;
/// # Ok(())
/// # }
/// ```
///
/// [BEP-5]: http://bittorrent.org/beps/bep_0005.html
pub struct DhtServer {
    socket: Arc<UdpSocket>,
    engine: Arc<Mutex<DhtEngine>>,
    port: u16,
}

impl DhtServer {
    pub async fn bind(port: u16) -> Result<Self, DhtError> {
        Self::with_settings(port, DhtSettings::default()).await
    }

    pub async fn with_settings(port: u16, settings: DhtSettings) -> Result<Self, DhtError> {
        let socket = Arc::new(UdpSocket::bind(format!("0.0.0.0:{}", port)).await?);
        let local_addr = socket.local_addr()?;
        let our_id = NodeId::generate();

        let transport: Arc<dyn Transport> = socket.clone();
        let engine = DhtEngine::new(settings, our_id, transport, Instant::now());

        info!(%local_addr, %our_id, "DHT server bound");

        Ok(Self {
            socket,
            engine: Arc::new(Mutex::new(engine)),
            port: local_addr.port(),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Our current node ID. It changes once other nodes agree on an
    /// external address the initial ID does not verify against.
    pub fn our_id(&self) -> NodeId {
        *self.engine.lock().our_id()
    }

    pub fn metrics(&self) -> DhtMetrics {
        self.engine.lock().metrics()
    }

    pub fn lookup_status(&self) -> Vec<LookupStatus> {
        self.engine.lock().lookup_status(Instant::now())
    }

    /// Reads datagrams and ticks the engine until the socket fails.
    pub async fn run(&self) -> Result<(), DhtError> {
        let mut buf = vec![0u8; DHT_MAX_PACKET_SIZE];
        let mut tick_interval = tokio::time::interval(DHT_TICK_INTERVAL);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((n, addr)) => {
                            self.engine.lock().incoming(&buf[..n], addr, Instant::now());
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                            debug!(error = %e, "ICMP error on DHT socket");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                _ = tick_interval.tick() => {
                    self.engine.lock().tick(Instant::now());
                }
            }
        }
    }

    /// Resolves the well-known routers and fills the routing table from
    /// them. Returns the number of nodes in the table afterwards.
    pub async fn bootstrap(&self) -> Result<usize, DhtError> {
        info!("Starting DHT bootstrap");

        let resolved = futures::future::join_all(
            DHT_BOOTSTRAP_NODES
                .iter()
                .map(|&host| async move { (host, tokio::net::lookup_host(host).await) }),
        )
        .await;

        let mut routers = Vec::new();
        for (host, result) in resolved {
            match result {
                Ok(addrs) => routers.extend(addrs.filter(SocketAddr::is_ipv4).take(1)),
                Err(e) => warn!(host, error = %e, "failed to resolve bootstrap node"),
            }
        }

        {
            let mut engine = self.engine.lock();
            for addr in &routers {
                engine.add_router_node(*addr);
            }
        }

        let outcome = self
            .lookup(|engine, now, done| {
                let our_id = *engine.our_id();
                engine.bootstrap(our_id, &[], now, done)
            })
            .await?;

        let nodes = self.engine.lock().routing_table().node_count();
        info!(responses = outcome.responses, nodes, "DHT bootstrap complete");
        Ok(nodes)
    }

    pub async fn ping(&self, addr: SocketAddr) -> Result<NodeId, DhtError> {
        let (tx, rx) = oneshot::channel();
        self.engine.lock().ping(
            addr,
            Instant::now(),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        rx.await.map_err(|_| DhtError::Aborted)?
    }

    /// The live nodes closest to `target`.
    pub async fn find_node(&self, target: NodeId) -> Result<Vec<(NodeId, SocketAddr)>, DhtError> {
        let outcome = self
            .lookup(move |engine, now, done| engine.start_lookup(target, LookupKind::ClosestNodes, now, done))
            .await?;
        Ok(outcome.nodes)
    }

    pub async fn get_peers(&self, info_hash: [u8; 20]) -> Result<Vec<SocketAddr>, DhtError> {
        let target = NodeId(info_hash);
        let outcome = self
            .lookup(move |engine, now, done| engine.get_peers(target, now, None, done))
            .await?;

        info!(
            peers = outcome.peers.len(),
            responses = outcome.responses,
            "DHT get_peers finished"
        );
        Ok(outcome.peers)
    }

    /// Announces that we serve `info_hash` on `port`. Returns how many nodes
    /// accepted the announce.
    pub async fn announce(&self, info_hash: [u8; 20], port: u16) -> Result<usize, DhtError> {
        let target = NodeId(info_hash);
        let outcome = self
            .lookup(move |engine, now, done| engine.announce(target, port, false, now, done))
            .await?;
        Ok(outcome.stored)
    }

    /// The bencoded value stored under `target`, if any node has it.
    pub async fn get_immutable(&self, target: NodeId) -> Result<Option<Bytes>, DhtError> {
        let outcome = self
            .lookup(move |engine, now, done| engine.get_item(target, now, None, done))
            .await?;
        Ok(outcome.item.map(|item| item.value().clone()))
    }

    /// The newest version of a mutable item.
    pub async fn get_mutable(&self, public_key: PublicKey, salt: Bytes) -> Result<Option<MutableItem>, DhtError> {
        let outcome = self
            .lookup(move |engine, now, done| engine.get_mutable_item(&public_key, salt, now, None, done))
            .await?;
        Ok(match outcome.item {
            Some(Item::Mutable(item)) => Some(item),
            _ => None,
        })
    }

    /// Stores `value` and returns its target.
    pub async fn put_immutable(&self, value: &Value) -> Result<NodeId, DhtError> {
        let item = Item::immutable(value)?;
        let target = item.target();
        let outcome = self
            .lookup(move |engine, now, done| engine.put_item(item, None, now, done))
            .await?;
        debug!(%target, stored = outcome.stored, "immutable put finished");
        Ok(target)
    }

    /// Stores a signed item. Returns the outcome, whose `item` is the newest
    /// version the network had before the put.
    pub async fn put_mutable(&self, item: MutableItem, cas: Option<i64>) -> Result<TraversalOutcome, DhtError> {
        self.lookup(move |engine, now, done| engine.put_item(Item::Mutable(item), cas, now, done))
            .await
    }

    pub async fn sample_infohashes(&self, target: NodeId) -> Result<Vec<NodeId>, DhtError> {
        let outcome = self
            .lookup(move |engine, now, done| engine.sample_infohashes(target, now, None, done))
            .await?;
        Ok(outcome.samples)
    }

    async fn lookup<F>(&self, start: F) -> Result<TraversalOutcome, DhtError>
    where
        F: FnOnce(&mut DhtEngine, Instant, DoneCallback) -> TraversalId,
    {
        let (tx, rx) = oneshot::channel();
        {
            let mut engine = self.engine.lock();
            start(
                &mut engine,
                Instant::now(),
                Box::new(move |outcome| {
                    let _ = tx.send(outcome);
                }),
            );
        }
        rx.await.map_err(|_| DhtError::Aborted)
    }
}
