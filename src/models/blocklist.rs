//! Scanner defense (C9) blocklist entries.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Why an IP was blocked.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Exceeded the request rate limit within the tracking window.
    RateLimit,
    /// Error rate (HTTP >= 400) exceeded the configured threshold.
    ErrorRate,
    /// Hit enough scanner-signature paths to cross the suspicious threshold.
    SuspiciousPaths,
}

/// A blocked remote address, persisted atomically to the blocklist file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocklistEntry {
    /// The blocked remote address.
    pub ip: IpAddr,
    /// When the block was imposed.
    pub blocked_at: chrono::DateTime<chrono::Utc>,
    /// When the block lifts.
    pub expires_at: chrono::DateTime<chrono::Utc>,
    /// Why the address was blocked.
    pub reason: BlockReason,
    /// Total requests observed from this address before (and including) the
    /// one that triggered the block.
    pub request_count: u64,
}

impl BlocklistEntry {
    /// Whether the block is still in effect at `now`.
    #[must_use]
    pub fn is_active(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        now < self.expires_at
    }
}
