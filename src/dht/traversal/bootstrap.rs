use super::{Finished, Lookup, Summary};
use crate::dht::message::DhtQuery;
use crate::dht::node_id::NodeId;

/// Fills an empty or cold routing table.
///
/// Seeds twice as wide and waits for twice as many live nodes as a normal
/// lookup. When done, every node it learned about but never queried gets a
/// ping so that the ones that answer enter the routing table as confirmed.
#[derive(Debug, Default)]
pub struct Bootstrap;

impl Lookup for Bootstrap {
    fn name(&self) -> &'static str {
        "bootstrap"
    }

    fn query(&self, target: &NodeId, _node: Option<&NodeId>) -> DhtQuery {
        DhtQuery::FindNode { target: *target }
    }

    fn results_target(&self, k: usize) -> usize {
        k * 2
    }

    fn seed_multiplier(&self) -> usize {
        2
    }

    fn finish(self: Box<Self>, summary: Summary) -> Finished {
        let outcome = summary.outcome();
        Finished::PingThen(summary.unqueried, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    #[test]
    fn test_pings_unqueried_nodes() {
        let addr: SocketAddr = "10.0.0.1:6881".parse().unwrap();
        let summary = Summary {
            target: NodeId::generate(),
            alive: vec![(NodeId::generate(), addr)],
            unqueried: vec!["10.0.0.2:6881".parse().unwrap()],
            results_target: 16,
            k: 8,
            responses: 1,
            timeouts: 0,
            invokes: 1,
        };

        match Box::new(Bootstrap).finish(summary) {
            Finished::PingThen(pings, outcome) => {
                assert_eq!(pings.len(), 1);
                assert_eq!(outcome.nodes[0].1, "10.0.0.1:6881".parse::<SocketAddr>().unwrap());
                assert_eq!(outcome.responses, 1);
            }
            _ => panic!("bootstrap must ping leftovers"),
        }
    }

    #[test]
    fn test_wider_than_a_lookup() {
        assert_eq!(Bootstrap.results_target(8), 16);
        assert_eq!(Bootstrap.seed_multiplier(), 2);
    }
}
