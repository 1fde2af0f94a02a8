use ipnet::Ipv6Net;
use std::collections::HashSet;
use std::net::Ipv6Addr;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

use crate::service_registry::SidAllocator;

/// Default locator for locally allocated segment identifiers.
pub const DEFAULT_SID_LOCATOR: Ipv6Net = Ipv6Net::new_assert(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 0), 64);

/// Longest locator; the low 64 bits are always the SID's own.
const MAX_LOCATOR_LEN: u8 = 64;

struct SidState {
    last: u64,
    allocated: HashSet<u64>,
}

/// Allocates SIDs as `<locator>::<n>`.
///
/// A SID is never handed out twice while it is allocated.
pub struct PrefixSidAllocator {
    locator: Ipv6Net,
    state: Mutex<SidState>,
}

impl Default for PrefixSidAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_SID_LOCATOR)
    }
}

impl PrefixSidAllocator {
    /// Host bits of `locator` are cleared, and locators longer than /64 are
    /// widened to /64.
    pub fn new(locator: Ipv6Net) -> Self {
        let locator = if locator.prefix_len() > MAX_LOCATOR_LEN {
            Ipv6Net::new_assert(locator.addr(), MAX_LOCATOR_LEN)
        } else {
            locator
        };
        Self {
            locator: locator.trunc(),
            state: Mutex::new(SidState {
                last: 0,
                allocated: HashSet::new(),
            }),
        }
    }

    pub fn locator(&self) -> Ipv6Net {
        self.locator
    }

    pub fn allocated_count(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).allocated.len()
    }
}

impl SidAllocator for PrefixSidAllocator {
    fn sid(&self, connection_id: &str) -> String {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut candidate = state.last;
        loop {
            candidate = candidate.wrapping_add(1);
            // 0 is the locator itself.
            if candidate != 0 && !state.allocated.contains(&candidate) {
                break;
            }
        }
        state.last = candidate;
        state.allocated.insert(candidate);

        let sid = Ipv6Addr::from(u128::from(self.locator.network()) | u128::from(candidate)).to_string();
        debug!(connection_id, sid = %sid, "Allocated SID");
        sid
    }

    fn release(&self, sid: &str) {
        let Ok(addr) = sid.parse::<Ipv6Addr>() else {
            debug!("Ignoring release of malformed SID {}", sid);
            return;
        };
        // SIDs only ever use the first /64 of the locator.
        let block = Ipv6Net::new_assert(self.locator.network(), MAX_LOCATOR_LEN);
        if !block.contains(&addr) {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.allocated.remove(&(u128::from(addr) as u64)) {
            debug!(sid, "Released SID");
        }
    }
}
