//! Per-client sliding-window rate limiter
//!
//! Each client owns a log of the timestamps of its allowed requests. A check
//! evicts every timestamp at or before `now - window` and then admits the
//! request only if fewer than `limit` remain, recording `now` on admission.
//!
//! Eviction and the conditional append run as one atomic step per client in
//! the [`RateWindowStore`], so two concurrent requests can never both see the
//! last free slot.

use crate::clock::{sub_duration, Clock};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Requests allowed per trailing window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn new(requests: u32, window: Duration) -> Self {
        Self { requests, window }
    }

    pub fn per_seconds(requests: u32, seconds: u64) -> Self {
        Self::new(requests, Duration::from_secs(seconds))
    }
}

/// Decision for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowDecision {
    pub allowed: bool,
    /// Timestamps in the window after the decision
    pub in_window: u32,
}

/// Keyed store of per-client timestamp logs
#[async_trait]
pub trait RateWindowStore: Send + Sync {
    /// Evict timestamps `<= now - window`, then append `now` if fewer than
    /// `limit` remain. Must be atomic per key.
    async fn try_acquire(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u32,
    ) -> Result<WindowDecision, StoreError>;

    /// Reachability check used by the health report
    async fn ping(&self) -> Result<(), StoreError>;
}

/// In-process window store
///
/// The dashmap entry guard holds the shard lock across evict-then-append.
#[derive(Debug, Default)]
pub struct InMemoryWindowStore {
    windows: DashMap<String, VecDeque<DateTime<Utc>>>,
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of clients with a window
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl RateWindowStore for InMemoryWindowStore {
    async fn try_acquire(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u32,
    ) -> Result<WindowDecision, StoreError> {
        let cutoff = sub_duration(now, window);
        let mut log = self.windows.entry(key.to_string()).or_default();

        while log.front().is_some_and(|t| *t <= cutoff) {
            log.pop_front();
        }

        let count = u32::try_from(log.len()).unwrap_or(u32::MAX);
        if count < limit {
            log.push_back(now);
            Ok(WindowDecision {
                allowed: true,
                in_window: count + 1,
            })
        } else {
            Ok(WindowDecision {
                allowed: false,
                in_window: count,
            })
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Registered clients and their limits
///
/// A client registered without an override uses the default limit.
/// Unregistered clients have no limit and are always denied.
#[derive(Debug, Clone)]
pub struct ClientLimits {
    default: RateLimit,
    clients: HashMap<String, Option<RateLimit>>,
}

impl ClientLimits {
    pub fn new(default: RateLimit) -> Self {
        Self {
            default,
            clients: HashMap::new(),
        }
    }

    /// Register a client, optionally overriding the default limit
    pub fn register(&mut self, client_id: impl Into<String>, limit: Option<RateLimit>) {
        self.clients.insert(client_id.into(), limit);
    }

    pub fn unregister(&mut self, client_id: &str) -> bool {
        self.clients.remove(client_id).is_some()
    }

    /// Effective limit for a client, `None` if unknown
    pub fn resolve(&self, client_id: &str) -> Option<RateLimit> {
        self.clients
            .get(client_id)
            .map(|limit| limit.unwrap_or(self.default))
    }

    pub fn default_limit(&self) -> RateLimit {
        self.default
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Sliding-window admission control
pub struct RateLimiter {
    store: Arc<dyn RateWindowStore>,
    limits: RwLock<ClientLimits>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateWindowStore>, limits: ClientLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            limits: RwLock::new(limits),
            clock,
        }
    }

    /// Check a request against the client's configured limit
    ///
    /// Unknown clients fail closed.
    pub async fn allow(&self, client_id: &str) -> Result<bool, StoreError> {
        let limit = self.limits.read().resolve(client_id);
        match limit {
            Some(limit) => self.allow_with(client_id, limit).await,
            None => {
                tracing::debug!(client_id = %client_id, "unknown client denied");
                Ok(false)
            }
        }
    }

    /// Check a request against an explicit limit
    pub async fn allow_with(&self, client_id: &str, limit: RateLimit) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let decision = self
            .store
            .try_acquire(client_id, now, limit.window, limit.requests)
            .await?;

        if !decision.allowed {
            tracing::debug!(
                client_id = %client_id,
                limit = limit.requests,
                window_secs = limit.window.as_secs(),
                "rate limited"
            );
        }
        Ok(decision.allowed)
    }

    /// Register or update a client at runtime
    pub fn register_client(&self, client_id: impl Into<String>, limit: Option<RateLimit>) {
        self.limits.write().register(client_id, limit);
    }

    pub fn unregister_client(&self, client_id: &str) -> bool {
        self.limits.write().unregister(client_id)
    }

    /// Effective limit for a client
    pub fn limit_for(&self, client_id: &str) -> Option<RateLimit> {
        self.limits.read().resolve(client_id)
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        self.store.ping().await
    }
}
