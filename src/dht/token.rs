use std::net::IpAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use sha1::{Digest, Sha1};
use tracing::debug;

use super::node_id::NodeId;
use crate::constants::DHT_TOKEN_LENGTH;

/// Write tokens handed out in `get_peers`/`get` replies.
///
/// A token is a truncated SHA-1 over a secret, the requester's IP and the
/// target. Secrets rotate periodically and the previous one stays valid, so
/// a token is honoured for one to two rotation intervals.
#[derive(Debug)]
pub struct TokenSecrets {
    current: [u8; 16],
    previous: [u8; 16],
    rotated_at: Instant,
    interval: Duration,
}

impl TokenSecrets {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            current: rand::random(),
            previous: rand::random(),
            rotated_at: now,
            interval,
        }
    }

    pub fn rotate(&mut self, now: Instant) {
        self.previous = self.current;
        self.current = rand::random();
        self.rotated_at = now;
        debug!("DHT token secret rotated");
    }

    /// Rotates if the interval elapsed.
    pub fn tick(&mut self, now: Instant) {
        if now.saturating_duration_since(self.rotated_at) >= self.interval {
            self.rotate(now);
        }
    }

    pub fn generate(&self, ip: IpAddr, target: &NodeId) -> Bytes {
        token_with_secret(&self.current, ip, target)
    }

    pub fn verify(&self, token: &[u8], ip: IpAddr, target: &NodeId) -> bool {
        token == token_with_secret(&self.current, ip, target).as_ref()
            || token == token_with_secret(&self.previous, ip, target).as_ref()
    }
}

fn token_with_secret(secret: &[u8; 16], ip: IpAddr, target: &NodeId) -> Bytes {
    let mut hasher = Sha1::new();
    hasher.update(secret);
    match ip {
        IpAddr::V4(v4) => hasher.update(v4.octets()),
        IpAddr::V6(v6) => hasher.update(v6.octets()),
    }
    hasher.update(target.as_bytes());

    let result = hasher.finalize();
    Bytes::copy_from_slice(&result[..DHT_TOKEN_LENGTH])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_survives_one_rotation() {
        let now = Instant::now();
        let interval = Duration::from_secs(300);
        let mut secrets = TokenSecrets::new(interval, now);
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let target = NodeId::generate();

        let token = secrets.generate(ip, &target);
        assert_eq!(token.len(), DHT_TOKEN_LENGTH);
        assert!(secrets.verify(&token, ip, &target));

        secrets.tick(now + Duration::from_secs(10));
        assert!(secrets.verify(&token, ip, &target));

        secrets.tick(now + interval);
        assert!(secrets.verify(&token, ip, &target));

        secrets.tick(now + interval * 2);
        assert!(!secrets.verify(&token, ip, &target));
    }

    #[test]
    fn test_token_bound_to_ip_and_target() {
        let secrets = TokenSecrets::new(Duration::from_secs(300), Instant::now());
        let ip: IpAddr = "1.2.3.4".parse().unwrap();
        let other: IpAddr = "1.2.3.5".parse().unwrap();
        let target = NodeId::generate();

        let token = secrets.generate(ip, &target);
        assert!(!secrets.verify(&token, other, &target));
        assert!(!secrets.verify(&token, ip, &NodeId::generate()));
        assert!(!secrets.verify(b"short", ip, &target));
    }
}
