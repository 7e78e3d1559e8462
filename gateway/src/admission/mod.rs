//! Admission control for incoming events
//!
//! Every ingest request passes two gates before it is queued:
//!
//! ```text
//! request ──► RateLimiter ──► IdempotencyGuard ──► EventQueue
//!                 │                  │
//!                 └─► rate_limited   └─► duplicate
//! ```
//!
//! Both gates are atomic check-and-mutate operations against their backing
//! store, so they stay correct with any number of concurrent requests.

pub mod idempotency;
pub mod rate_limiter;

pub use idempotency::{Admission, IdempotencyGuard};
pub use rate_limiter::{
    ClientLimits, InMemoryWindowStore, RateLimit, RateLimiter, RateWindowStore, WindowDecision,
};
