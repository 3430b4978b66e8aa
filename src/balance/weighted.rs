use std::sync::{Mutex, PoisonError};

use crate::config::Upstream;

/// Deterministic weighted round-robin: upstreams are sorted by descending
/// weight once at construction, then each is emitted `weight` times per
/// cycle. The sort is stable, so equal weights keep a fixed relative order
/// for the lifetime of the balancer.
pub struct WeightedRoundRobin {
    upstreams: Vec<Upstream>,
    state: Mutex<State>,
}

struct State {
    index: usize,
    remaining: u8,
}

impl WeightedRoundRobin {
    pub fn new(upstreams: &[Upstream]) -> Self {
        let mut upstreams = upstreams.to_vec();
        upstreams.sort_by(|a, b| b.weight.cmp(&a.weight));
        let remaining = upstreams[0].weight;
        Self {
            upstreams,
            state: Mutex::new(State { index: 0, remaining }),
        }
    }

    pub fn next(&self) -> String {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let address = self.upstreams[state.index].address.clone();
        state.remaining -= 1;
        if state.remaining == 0 {
            state.index = if state.index == self.upstreams.len() - 1 {
                0
            } else {
                state.index + 1
            };
            state.remaining = self.upstreams[state.index].weight;
        }
        address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream(address: &str, weight: u8) -> Upstream {
        Upstream { address: address.to_string(), weight }
    }

    #[test]
    fn emits_each_upstream_weight_times_per_cycle() {
        let lb = WeightedRoundRobin::new(&[upstream("A", 3), upstream("B", 1)]);
        let picked: Vec<String> = (0..8).map(|_| lb.next()).collect();
        assert_eq!(picked, ["A", "A", "A", "B", "A", "A", "A", "B"]);
    }

    #[test]
    fn sorts_by_descending_weight_at_construction() {
        let lb = WeightedRoundRobin::new(&[upstream("low", 1), upstream("high", 2)]);
        assert_eq!(lb.next(), "high");
        assert_eq!(lb.next(), "high");
        assert_eq!(lb.next(), "low");
        assert_eq!(lb.next(), "high");
    }

    #[test]
    fn equal_weights_keep_a_stable_order() {
        let lb = WeightedRoundRobin::new(&[upstream("first", 2), upstream("second", 2)]);
        let picked: Vec<String> = (0..8).map(|_| lb.next()).collect();
        assert_eq!(
            picked,
            ["first", "first", "second", "second", "first", "first", "second", "second"]
        );
    }

    #[test]
    fn cycle_window_counts_match_the_weights() {
        let lb = WeightedRoundRobin::new(&[upstream("a", 5), upstream("b", 3), upstream("c", 2)]);
        for _ in 0..3 {
            let window: Vec<String> = (0..10).map(|_| lb.next()).collect();
            assert_eq!(window.iter().filter(|a| *a == "a").count(), 5);
            assert_eq!(window.iter().filter(|a| *a == "b").count(), 3);
            assert_eq!(window.iter().filter(|a| *a == "c").count(), 2);
        }
    }
}
