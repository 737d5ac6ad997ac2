//! Per-IP abuse tracking, blocking, and persistence.
//!
//! An `Arc<RwLock<HashMap<...>>>` cache of per-IP request counters, backed
//! by a periodic background pruning task and a file-persisted blocklist.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, State};
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use ipnet::IpNet;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::ScannerConfig;
use crate::models::blocklist::{BlockReason, BlocklistEntry};
use crate::persistence::atomic;

struct IpStats {
    recent: VecDeque<Instant>,
    total_requests: u64,
    error_count: u64,
    suspicious_path_count: u32,
}

impl IpStats {
    fn new() -> Self {
        Self {
            recent: VecDeque::new(),
            total_requests: 0,
            error_count: 0,
            suspicious_path_count: 0,
        }
    }

    fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.error_count as f64 / self.total_requests as f64
        }
    }
}

/// Tracks recent request behaviour per remote address and blocks addresses
/// that cross the configured thresholds.
pub struct ScannerDefense {
    config: ScannerConfig,
    whitelist: Vec<IpNet>,
    stats: RwLock<HashMap<IpAddr, IpStats>>,
    blocklist: RwLock<HashMap<IpAddr, BlocklistEntry>>,
    blocklist_path: PathBuf,
}

impl ScannerDefense {
    /// Construct a defense instance, loading any persisted blocklist from
    /// `blocklist_path` if present.
    #[must_use]
    pub fn new(config: ScannerConfig, blocklist_path: PathBuf) -> Self {
        let whitelist = config
            .whitelist_cidrs
            .iter()
            .filter_map(|cidr| cidr.parse::<IpNet>().ok())
            .collect();

        let blocklist = std::fs::read(&blocklist_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Vec<BlocklistEntry>>(&bytes).ok())
            .map(|entries| entries.into_iter().map(|e| (e.ip, e)).collect())
            .unwrap_or_default();

        Self {
            config,
            whitelist,
            stats: RwLock::new(HashMap::new()),
            blocklist: RwLock::new(blocklist),
            blocklist_path,
        }
    }

    fn is_whitelisted(&self, ip: IpAddr) -> bool {
        let loopback = ip.is_loopback();
        loopback || self.whitelist.iter().any(|net| net.contains(&ip))
    }

    /// Whether `ip` is currently blocked (and not whitelisted).
    pub async fn is_blocked(&self, ip: IpAddr) -> bool {
        if self.is_whitelisted(ip) {
            return false;
        }
        self.blocklist
            .read()
            .await
            .get(&ip)
            .is_some_and(|entry| entry.is_active(chrono::Utc::now()))
    }

    /// Record one completed request from `ip` against `path`, blocking the
    /// address if any threshold is now exceeded.
    pub async fn record_request(&self, ip: IpAddr, path: &str, status: StatusCode) {
        if !self.config.enabled || self.is_whitelisted(ip) {
            return;
        }

        let block_reason = {
            let mut guard = self.stats.write().await;
            let stats = guard.entry(ip).or_insert_with(IpStats::new);

            let now = Instant::now();
            stats.recent.push_back(now);
            while stats.recent.len() > self.config.ring_buffer_size {
                stats.recent.pop_front();
            }
            stats.total_requests += 1;
            if status.as_u16() >= 400 {
                stats.error_count += 1;
            }
            if self
                .config
                .suspicious_path_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
            {
                stats.suspicious_path_count += 1;
            }

            let window = Duration::from_secs(self.config.rate_window_seconds);
            let within_window = stats
                .recent
                .iter()
                .filter(|t| now.duration_since(**t) <= window)
                .count();

            if within_window as u32 > self.config.rate_limit {
                Some(BlockReason::RateLimit)
            } else if stats.total_requests >= u64::from(self.config.min_requests_for_error_rate)
                && stats.error_rate() >= self.config.error_rate_threshold
            {
                Some(BlockReason::ErrorRate)
            } else if stats.suspicious_path_count >= self.config.suspicious_path_threshold {
                Some(BlockReason::SuspiciousPaths)
            } else {
                None
            }
        };

        if let Some(reason) = block_reason {
            self.block(ip, reason).await;
        }
    }

    async fn block(&self, ip: IpAddr, reason: BlockReason) {
        let request_count = self
            .stats
            .read()
            .await
            .get(&ip)
            .map_or(0, |s| s.total_requests);
        let now = chrono::Utc::now();
        let entry = BlocklistEntry {
            ip,
            blocked_at: now,
            expires_at: now
                + chrono::Duration::seconds(
                    i64::try_from(self.config.block_duration_seconds).unwrap_or(i64::MAX),
                ),
            reason,
            request_count,
        };
        let already_blocked = {
            let mut guard = self.blocklist.write().await;
            let was_active = guard
                .get(&ip)
                .is_some_and(|existing| existing.is_active(now));
            guard.insert(ip, entry);
            was_active
        };
        if !already_blocked {
            warn!(%ip, ?reason, "scanner defense blocking address");
            self.persist().await;
        }
    }

    /// Write the current (non-expired) blocklist atomically to disk.
    pub async fn persist(&self) {
        let now = chrono::Utc::now();
        let entries: Vec<BlocklistEntry> = self
            .blocklist
            .read()
            .await
            .values()
            .filter(|e| e.is_active(now))
            .cloned()
            .collect();
        if let Err(err) = atomic::write_json_atomic(&self.blocklist_path, &entries) {
            warn!(%err, "failed to persist scanner defense blocklist");
        }
    }

    /// Spawn the background task that prunes expired entries and stale
    /// per-IP stats every `prune_interval_seconds`.
    pub fn spawn_pruner(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let interval = Duration::from_secs(this.config.prune_interval_seconds);
            loop {
                tokio::time::sleep(interval).await;
                let now = chrono::Utc::now();
                let mut blocklist = this.blocklist.write().await;
                let before = blocklist.len();
                blocklist.retain(|_, entry| entry.is_active(now));
                let pruned = before - blocklist.len();
                drop(blocklist);
                if pruned > 0 {
                    info!(pruned, "scanner defense pruned expired blocks");
                    this.persist().await;
                }
            }
        });
    }
}

/// Axum middleware wrapping only the external listener.
///
/// Blocking itself happens earlier, at accept time (see
/// [`crate::hub::listener::FilteredListener`]), before any HTTP parsing — this
/// layer's job is just to record each completed response's outcome so the
/// next threshold check has fresh data.
pub async fn middleware(
    State(scanner): State<Arc<ScannerDefense>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let ip = addr.ip();
    let path = request.uri().path().to_owned();
    let response = next.run(request).await;
    scanner.record_request(ip, &path, response.status()).await;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ScannerConfig {
        ScannerConfig {
            enabled: true,
            ring_buffer_size: 10,
            rate_window_seconds: 60,
            rate_limit: 100,
            min_requests_for_error_rate: 3,
            error_rate_threshold: 0.5,
            suspicious_path_threshold: 2,
            block_duration_seconds: 3600,
            prune_interval_seconds: 300,
            whitelist_cidrs: vec![],
            suspicious_path_prefixes: vec!["/.env".to_owned(), "/.git/".to_owned()],
        }
    }

    #[tokio::test]
    async fn blocks_after_enough_suspicious_path_hits() {
        let dir = tempfile::tempdir().unwrap();
        let defense = ScannerDefense::new(test_config(), dir.path().join("blocklist.json"));
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        defense.record_request(ip, "/.env", StatusCode::NOT_FOUND).await;
        assert!(!defense.is_blocked(ip).await);
        defense.record_request(ip, "/.env", StatusCode::NOT_FOUND).await;

        assert!(defense.is_blocked(ip).await);
    }

    #[tokio::test]
    async fn whitelisted_addresses_are_never_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.whitelist_cidrs = vec!["203.0.113.0/24".to_owned()];
        let defense = ScannerDefense::new(config, dir.path().join("blocklist.json"));
        let ip: IpAddr = "203.0.113.7".parse().unwrap();

        for _ in 0..10 {
            defense.record_request(ip, "/.env", StatusCode::NOT_FOUND).await;
        }
        assert!(!defense.is_blocked(ip).await);
    }

    #[tokio::test]
    async fn persisted_blocklist_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocklist.json");
        let defense = ScannerDefense::new(test_config(), path.clone());
        let ip: IpAddr = "203.0.113.7".parse().unwrap();
        defense.record_request(ip, "/.env", StatusCode::NOT_FOUND).await;
        defense.record_request(ip, "/.env", StatusCode::NOT_FOUND).await;

        let reloaded = ScannerDefense::new(test_config(), path);
        assert!(reloaded.is_blocked(ip).await);
    }
}
