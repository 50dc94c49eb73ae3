//! Blocking memcached client with per-node connection pools.
//!
//! Keys are spread over a weighted cluster with ketama consistent hashing.
//! Each node gets a bounded pool of lazily opened connections speaking the
//! text or binary protocol. Values carry type flags compatible with
//! libmemcached, so text, bytes, integers and serialized documents
//! come back as what was stored.
//!
//! A cache treats a dead node as a miss, not an outage: reads return
//! [`Lookup::Failure`] and writes [`Store::Failure`] instead of an error, and
//! the fault is logged with `tracing`. Errors are reserved for caller
//! mistakes and resource limits, see [`Error`].
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use memcache_client::{Client, ClientConfig, Lookup, Store, Ttl, Value};
//!
//! let config = ClientConfig {
//!     min_compress_len: 150 * 1024,
//!     ..ClientConfig::from_location("10.0.0.1:11211;10.0.0.2:11211")?
//! }
//! .with_env_credentials();
//! let client = Client::new(config)?;
//!
//! assert_eq!(client.set("answer", 42i64, Duration::from_secs(60))?, Store::Stored);
//! assert_eq!(client.incr("answer", 1)?, 43);
//!
//! let profile = Value::serialize(&vec!["admin", "ops"])?;
//! client.set("roles", profile, Ttl::Never)?;
//! if let Lookup::Hit(value) = client.get("roles")? {
//!     let roles: Vec<String> = value.deserialize()?;
//!     assert_eq!(roles, ["admin", "ops"]);
//! }
//! # Ok::<(), memcache_client::Error>(())
//! ```

mod client;
mod compress;
mod config;
mod connection;
mod error;
mod expiry;
pub mod key;
pub mod metrics;
mod outcome;
mod pool;
mod selector;
mod session;
mod value;

pub use client::{Client, ITEM_OVERHEAD};
pub use config::{ClientConfig, DEFAULT_PORT, NodeConfig, PASSWORD_ENV, Protocol, USERNAME_ENV};
pub use error::{Error, Result};
pub use expiry::{MAX_RELATIVE_EXPTIME, Ttl};
pub use outcome::{Failure, Lookup, Store};
pub use session::Session;
pub use value::{Value, flags};
