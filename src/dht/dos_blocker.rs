use std::net::IpAddr;
use std::time::{Duration, Instant};

use tracing::warn;

use super::settings::DhtSettings;

#[derive(Debug, Clone)]
struct Slot {
    addr: IpAddr,
    window_start: Instant,
    count: u32,
    banned_until: Option<Instant>,
}

impl Slot {
    fn is_banned(&self, now: Instant) -> bool {
        self.banned_until.is_some_and(|until| now < until)
    }
}

/// Per-source message rate limiter.
///
/// Tracks a fixed number of source addresses. A source sending more than
/// `limit` messages within one window is banned for `block_timeout`, and
/// everything it sends while banned is rejected.
#[derive(Debug)]
pub struct DosBlocker {
    slots: Vec<Slot>,
    capacity: usize,
    limit: u32,
    window: Duration,
    block_timeout: Duration,
    rejected: u64,
}

impl DosBlocker {
    pub fn new(settings: &DhtSettings) -> Self {
        Self {
            slots: Vec::with_capacity(settings.dos_blocker_slots),
            capacity: settings.dos_blocker_slots.max(1),
            limit: settings.message_rate_limit,
            window: settings.rate_limit_window,
            block_timeout: settings.block_timeout,
            rejected: 0,
        }
    }

    /// Accounts one message from `addr`. Returns false if it must be dropped.
    pub fn incoming(&mut self, addr: IpAddr, now: Instant) -> bool {
        let idx = match self.slots.iter().position(|s| s.addr == addr) {
            Some(idx) => idx,
            None => self.claim_slot(addr, now),
        };
        let slot = &mut self.slots[idx];

        if let Some(until) = slot.banned_until {
            if now < until {
                self.rejected += 1;
                return false;
            }
            slot.banned_until = None;
            slot.count = 0;
            slot.window_start = now;
        }

        if now.saturating_duration_since(slot.window_start) >= self.window {
            slot.count = 0;
            slot.window_start = now;
        }

        slot.count += 1;
        if slot.count > self.limit {
            slot.banned_until = Some(now + self.block_timeout);
            self.rejected += 1;
            warn!(%addr, count = slot.count, "rate limit exceeded, banning source");
            return false;
        }
        true
    }

    /// Finds a slot for a source not tracked yet, evicting if the table is
    /// full: the unbanned slot with the fewest messages, oldest window first,
    /// or if every slot is banned, the ban that ends first.
    fn claim_slot(&mut self, addr: IpAddr, now: Instant) -> usize {
        let fresh = Slot {
            addr,
            window_start: now,
            count: 0,
            banned_until: None,
        };

        if self.slots.len() < self.capacity {
            self.slots.push(fresh);
            return self.slots.len() - 1;
        }

        let victim = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_banned(now))
            .min_by_key(|(_, s)| (s.count, s.window_start))
            .or_else(|| {
                self.slots
                    .iter()
                    .enumerate()
                    .min_by_key(|(_, s)| s.banned_until)
            })
            .map(|(i, _)| i)
            .unwrap_or(0);

        self.slots[victim] = fresh;
        victim
    }

    pub fn is_blocked(&self, addr: IpAddr, now: Instant) -> bool {
        self.slots
            .iter()
            .any(|s| s.addr == addr && s.is_banned(now))
    }

    /// Messages dropped so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}
