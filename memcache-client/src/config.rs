//! Client configuration.
//!
//! ```
//! use std::time::Duration;
//! use memcache_client::{ClientConfig, Protocol};
//!
//! let mut config = ClientConfig::from_location("10.0.0.1:11211;10.0.0.2:11211:2").unwrap();
//! config.protocol = Protocol::Binary;
//! config.acquire_timeout = Some(Duration::from_millis(250));
//! assert_eq!(config.servers[1].weight, 2);
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable read by [`ClientConfig::with_env_credentials`].
pub const USERNAME_ENV: &str = "MEMCACHE_USERNAME";
/// Environment variable read by [`ClientConfig::with_env_credentials`].
pub const PASSWORD_ENV: &str = "MEMCACHE_PASSWORD";

/// memcached's standard port, used when an address omits one.
pub const DEFAULT_PORT: u16 = 11211;

/// Wire protocol spoken on every connection of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Text,
    Binary,
}

/// One server of the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// `host:port`; also the node's identity on the hash ring.
    pub address: String,
    /// Relative share of the key space. Must be at least 1.
    pub weight: u32,
}

impl NodeConfig {
    pub fn new(address: impl Into<String>, weight: u32) -> Self {
        Self {
            address: address.into(),
            weight,
        }
    }

    /// Parse `host[:port[:weight]]`. IPv6 hosts are written in brackets:
    /// `[::1]:11211:2`.
    pub fn parse(server: &str) -> Result<Self> {
        let server = server.trim();
        let (host, rest) = if let Some(v6) = server.strip_prefix('[') {
            let end = v6
                .find(']')
                .ok_or_else(|| Error::Config(format!("unterminated IPv6 address: {server}")))?;
            (&server[..end + 2], &v6[end + 1..])
        } else {
            match server.find(':') {
                Some(at) => (&server[..at], &server[at..]),
                None => (server, ""),
            }
        };
        if host.is_empty() || host == "[]" {
            return Err(Error::Config(format!("missing host in server: {server:?}")));
        }

        let mut parts = match rest {
            "" => Vec::new(),
            rest => rest
                .strip_prefix(':')
                .ok_or_else(|| Error::Config(format!("invalid server: {server}")))?
                .split(':')
                .collect(),
        };
        if parts.len() > 2 {
            return Err(Error::Config(format!("invalid server: {server}")));
        }
        let weight = match parts.get(1) {
            Some(weight) => weight
                .parse::<u32>()
                .ok()
                .filter(|&w| w > 0)
                .ok_or_else(|| Error::Config(format!("invalid weight in server: {server}")))?,
            None => 1,
        };
        parts.truncate(1);
        let port = match parts.first() {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| Error::Config(format!("invalid port in server: {server}")))?,
            None => DEFAULT_PORT,
        };

        Ok(Self::new(format!("{host}:{port}"), weight))
    }
}

impl FromStr for NodeConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

/// Configuration for a [`Client`](crate::Client).
#[derive(Clone)]
pub struct ClientConfig {
    /// The cluster. Keys are spread over it with ketama hashing.
    pub servers: Vec<NodeConfig>,
    /// Text (default) or binary protocol for all connections.
    pub protocol: Protocol,
    /// Username for authentication. `None` skips authentication.
    pub username: Option<String>,
    /// Password for authentication. Only used when `username` is set.
    pub password: Option<String>,
    /// Values at least this many bytes are zlib-compressed. 0 disables compression.
    pub min_compress_len: usize,
    /// zlib level, 0 (store) to 9 (best).
    pub compress_level: u32,
    /// Maximum connections per node (minimum 1).
    pub pool_size: usize,
    /// How long `acquire` waits for a free connection. `None` waits forever.
    pub acquire_timeout: Option<Duration>,
    /// TCP connect timeout. `None` uses the OS default.
    pub connect_timeout: Option<Duration>,
    /// Socket read and write timeout. `None` blocks indefinitely.
    pub io_timeout: Option<Duration>,
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout: Option<Duration>,
    /// Seconds used for [`Ttl::Default`](crate::Ttl::Default).
    pub default_ttl: u32,
    /// The server's item size limit (memcached `-I`).
    pub max_item_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: vec![NodeConfig::new(format!("127.0.0.1:{DEFAULT_PORT}"), 1)],
            protocol: Protocol::Text,
            username: None,
            password: None,
            min_compress_len: 0,
            compress_level: 1,
            pool_size: 10,
            acquire_timeout: Some(Duration::from_secs(1)),
            connect_timeout: Some(Duration::from_secs(1)),
            io_timeout: Some(Duration::from_secs(1)),
            idle_timeout: None,
            default_ttl: 300,
            max_item_size: 1024 * 1024,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("servers", &self.servers)
            .field("protocol", &self.protocol)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("min_compress_len", &self.min_compress_len)
            .field("compress_level", &self.compress_level)
            .field("pool_size", &self.pool_size)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("default_ttl", &self.default_ttl)
            .field("max_item_size", &self.max_item_size)
            .finish()
    }
}

impl ClientConfig {
    /// Default configuration for the servers in `location`, separated by
    /// `;` or `,`.
    pub fn from_location(location: &str) -> Result<Self> {
        let servers = location
            .split([';', ','])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(NodeConfig::parse)
            .collect::<Result<Vec<_>>>()?;
        if servers.is_empty() {
            return Err(Error::Config(format!("no servers in {location:?}")));
        }
        Ok(Self {
            servers,
            ..Self::default()
        })
    }

    /// Fill credentials that are not set explicitly from `MEMCACHE_USERNAME`
    /// and `MEMCACHE_PASSWORD`.
    pub fn with_env_credentials(mut self) -> Self {
        if self.username.is_none() {
            self.username = std::env::var(USERNAME_ENV).ok().filter(|v| !v.is_empty());
        }
        if self.password.is_none() {
            self.password = std::env::var(PASSWORD_ENV).ok().filter(|v| !v.is_empty());
        }
        self
    }

    /// Check the configuration for values the client cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::Config("at least one server is required".into()));
        }
        if self.servers.len() > usize::from(u16::MAX) {
            return Err(Error::Config("too many servers".into()));
        }
        if let Some(node) = self.servers.iter().find(|n| n.weight == 0) {
            return Err(Error::Config(format!("server {node} has weight 0")));
        }
        if self.compress_level > 9 {
            return Err(Error::Config(format!(
                "compress_level {} is outside 0..=9",
                self.compress_level
            )));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(Error::Config("password given without username".into()));
        }
        if self.max_item_size <= crate::client::ITEM_OVERHEAD {
            return Err(Error::Config(format!(
                "max_item_size {} leaves no room for data",
                self.max_item_size
            )));
        }
        Ok(())
    }

    pub(crate) fn credentials(&self) -> Option<(&str, &str)> {
        let username = self.username.as_deref()?;
        Some((username, self.password.as_deref().unwrap_or("")))
    }
}
