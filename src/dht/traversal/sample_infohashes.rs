use std::collections::HashSet;
use std::net::SocketAddr;

use super::{DataCallback, Finished, FoundData, Lookup, Summary};
use crate::dht::message::{DhtQuery, DhtResponse};
use crate::dht::node_id::NodeId;

/// BEP-51 crawl step: a node lookup that also collects the info-hash
/// samples each node returns.
pub struct SampleInfohashes {
    on_data: Option<DataCallback>,
    samples: Vec<NodeId>,
    seen: HashSet<NodeId>,
    /// Shortest interval any node asked for.
    interval: Option<i64>,
    /// Largest store size any node reported.
    num: Option<i64>,
}

impl SampleInfohashes {
    pub fn new(on_data: Option<DataCallback>) -> Self {
        Self {
            on_data,
            samples: Vec::new(),
            seen: HashSet::new(),
            interval: None,
            num: None,
        }
    }
}

impl Lookup for SampleInfohashes {
    fn name(&self) -> &'static str {
        "sample_infohashes"
    }

    fn query(&self, target: &NodeId, _node: Option<&NodeId>) -> DhtQuery {
        DhtQuery::SampleInfohashes { target: *target }
    }

    fn on_reply(&mut self, _node: &NodeId, addr: SocketAddr, response: &DhtResponse, _target: &NodeId) {
        if response.samples.is_empty() && response.num.is_none() {
            return;
        }

        for sample in &response.samples {
            if self.seen.insert(*sample) {
                self.samples.push(*sample);
            }
        }
        if let Some(interval) = response.interval {
            self.interval = Some(self.interval.map_or(interval, |cur| cur.min(interval)));
        }
        if let Some(num) = response.num {
            self.num = Some(self.num.map_or(num, |cur| cur.max(num)));
        }

        if let Some(on_data) = self.on_data.as_mut() {
            on_data(&FoundData::Samples {
                from: addr,
                samples: response.samples.clone(),
                interval: response.interval,
                num: response.num,
            });
        }
    }

    fn finish(self: Box<Self>, summary: Summary) -> Finished {
        let mut outcome = summary.outcome();
        outcome.samples = self.samples;
        outcome.interval = self.interval;
        outcome.num = self.num;
        Finished::Outcome(outcome)
    }
}
