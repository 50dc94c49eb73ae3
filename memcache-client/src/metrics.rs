//! Client metrics.
//!
//! Process-wide counters registered with `metriken`, so any exporter that
//! walks the metriken registry picks them up.

use metriken::{Counter, Gauge, metric};

// ── Commands ─────────────────────────────────────────────────────

#[metric(name = "memcache/get", description = "Keys looked up")]
pub static GET: Counter = Counter::new();

#[metric(name = "memcache/get/hit", description = "Keys found")]
pub static GET_HIT: Counter = Counter::new();

#[metric(name = "memcache/get/miss", description = "Keys not found")]
pub static GET_MISS: Counter = Counter::new();

#[metric(name = "memcache/store", description = "Store requests (set, add, replace)")]
pub static STORE: Counter = Counter::new();

#[metric(
    name = "memcache/store/failure",
    description = "Store requests that failed or were rejected as too large"
)]
pub static STORE_FAILURE: Counter = Counter::new();

#[metric(name = "memcache/delete", description = "Delete requests")]
pub static DELETE: Counter = Counter::new();

// ── Connections ──────────────────────────────────────────────────

#[metric(
    name = "memcache/connections/opened",
    description = "Connections opened"
)]
pub static CONNECTIONS_OPENED: Counter = Counter::new();

#[metric(
    name = "memcache/connections/closed",
    description = "Connections closed"
)]
pub static CONNECTIONS_CLOSED: Counter = Counter::new();

#[metric(
    name = "memcache/connections/active",
    description = "Currently open connections"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

// ── Failures ─────────────────────────────────────────────────────

#[metric(
    name = "memcache/pool/exhausted",
    description = "Acquires that timed out waiting for a connection"
)]
pub static POOL_EXHAUSTED: Counter = Counter::new();

#[metric(
    name = "memcache/errors/transport",
    description = "Transport faults contained as misses or failed writes"
)]
pub static TRANSPORT_ERRORS: Counter = Counter::new();
