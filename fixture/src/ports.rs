//! Host port pool.
//!
//! A bounded range of candidate host ports. Reservations are recorded per
//! scope key under one lock, so concurrent starts never hand out the same
//! port. A candidate that some other process already holds is skipped.

use crate::scope::ScopeKey;
use errors::ProvisionError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{Ipv4Addr, TcpListener};

#[derive(Debug)]
pub struct PortPool {
    start: u16,
    end: u16,
    state: Mutex<PoolState>
}

#[derive(Debug)]
struct PoolState {
    reserved: HashMap<u16, ScopeKey>,
    cursor: u16
}

impl PortPool {
    pub fn new(start: u16, end: u16) -> Self {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        Self {
            start,
            end,
            state: Mutex::new(PoolState {
                reserved: HashMap::new(),
                cursor: start
            })
        }
    }

    pub fn from_config(config: &config::PortPoolConfig) -> Self {
        Self::new(config.range_start, config.range_end)
    }

    pub fn capacity(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    /// Ports not reserved by any scope.
    pub fn available(&self) -> usize {
        self.capacity() - self.state.lock().reserved.len()
    }

    /// Reserve `count` host ports for `scope`.
    ///
    /// Candidates are walked round-robin from where the previous reservation
    /// stopped, so a port released after a collision is not retried first.
    pub fn reserve(&self, scope: &ScopeKey, count: usize) -> Result<Vec<u16>, ProvisionError> {
        let mut state = self.state.lock();
        let mut picked = Vec::with_capacity(count);
        let capacity = self.capacity();
        let mut scanned = 0;

        while picked.len() < count && scanned < capacity {
            let candidate = state.cursor;
            state.cursor = if candidate == self.end { self.start } else { candidate + 1 };
            scanned += 1;

            if state.reserved.contains_key(&candidate) || !is_bindable(candidate) {
                continue;
            }
            picked.push(candidate);
        }

        if picked.len() < count {
            return Err(ProvisionError::PortExhausted {
                requested: count,
                available: picked.len()
            });
        }

        for port in &picked {
            state.reserved.insert(*port, scope.clone());
        }
        tracing::debug!("Reserved ports {:?} for {}", picked, scope);
        Ok(picked)
    }

    pub fn release(&self, ports: &[u16]) {
        let mut state = self.state.lock();
        for port in ports {
            state.reserved.remove(port);
        }
    }

    pub fn reserved_by(&self, scope: &ScopeKey) -> Vec<u16> {
        let state = self.state.lock();
        let mut ports: Vec<u16> = state
            .reserved
            .iter()
            .filter(|(_, owner)| *owner == scope)
            .map(|(port, _)| *port)
            .collect();
        ports.sort_unstable();
        ports
    }
}

fn is_bindable(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}
