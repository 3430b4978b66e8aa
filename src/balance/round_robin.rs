use std::sync::{Mutex, PoisonError};

use crate::config::Upstream;

/// Cycles through the upstream list in configuration order.
pub struct RoundRobin {
    addresses: Vec<String>,
    index: Mutex<usize>,
}

impl RoundRobin {
    pub fn new(upstreams: &[Upstream]) -> Self {
        Self {
            addresses: upstreams.iter().map(|u| u.address.clone()).collect(),
            index: Mutex::new(0),
        }
    }

    pub fn next(&self) -> String {
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        let address = self.addresses[*index].clone();
        *index = (*index + 1) % self.addresses.len();
        address
    }
}
