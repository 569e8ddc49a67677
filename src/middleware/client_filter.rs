//! Client filter
//!
//! Rejects clients by user agent before any request reaches the gate.

use log::warn;

const IOS_MARKERS: [&str; 3] = ["iPhone", "iPad", "iOS"];

/// User-agent based admission check
#[derive(Debug, Clone, Copy)]
pub struct ClientFilter {
    block_ios: bool,
}

impl ClientFilter {
    pub fn new(block_ios: bool) -> Self {
        Self { block_ios }
    }

    /// Whether a client announcing `user_agent` may proceed
    pub fn allows(&self, user_agent: &str) -> bool {
        if self.block_ios && is_ios_agent(user_agent) {
            warn!("Blocked iOS client: {}", user_agent);
            return false;
        }
        true
    }
}

pub fn is_ios_agent(user_agent: &str) -> bool {
    IOS_MARKERS.iter().any(|marker| user_agent.contains(marker))
}
