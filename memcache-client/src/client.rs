//! The cache client.
//!
//! [`Client`] validates keys, encodes typed values, picks the node for each
//! key and runs the request on a pooled connection. Node and link faults are
//! contained here: reads report [`Lookup::Failure`], writes report
//! [`Store::Failure`] or `false`, and the fault is logged. Caller mistakes
//! (bad keys, unserializable values) and resource limits (pool exhausted,
//! authentication) come back as [`Error`].

use std::collections::HashMap;
use std::hash::Hash;

use protocol_memcache::StorageCommand;
use tracing::{debug, info, warn};

use crate::compress::{self, Compressor};
use crate::config::ClientConfig;
use crate::connection::{Connection, Item, StoreItem};
use crate::error::{Error, Result};
use crate::expiry::Ttl;
use crate::key;
use crate::metrics::{
    DELETE, GET, GET_HIT, GET_MISS, STORE, STORE_FAILURE, TRANSPORT_ERRORS,
};
use crate::outcome::{Failure, Lookup, Store};
use crate::pool::{NodePool, PooledConnection};
use crate::selector::Selector;
use crate::session::Session;
use crate::value::Value;

/// Bytes memcached spends on item bookkeeping, counted against
/// `max_item_size` together with the key and the payload.
pub const ITEM_OVERHEAD: usize = 48;

/// Where an operation gets its connections from.
pub(crate) enum Lease<'s, 'c> {
    /// Check out per operation and return right after.
    Pool,
    /// Keep one connection per node for the life of a [`Session`].
    Session(&'s mut [Option<PooledConnection<'c>>]),
}

/// A blocking memcached client over a weighted, ketama-hashed cluster.
///
/// `Client` is `Send + Sync`; share it between threads with an `Arc`.
///
/// ```no_run
/// use memcache_client::{Client, ClientConfig, Lookup, Ttl};
///
/// let client = Client::new(ClientConfig::from_location("127.0.0.1:11211")?)?;
/// client.set("greeting", "hello", Ttl::Default)?;
/// if let Lookup::Hit(value) = client.get("greeting")? {
///     assert_eq!(value.as_str(), Some("hello"));
/// }
/// # Ok::<(), memcache_client::Error>(())
/// ```
pub struct Client {
    config: ClientConfig,
    selector: Selector,
    pools: Vec<NodePool>,
    compressor: Compressor,
}

impl Client {
    /// Build a client. No connection is opened until the first request.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let selector = Selector::new(&config.servers);
        let pools = config
            .servers
            .iter()
            .map(|node| NodePool::new(&node.address, &config))
            .collect();
        let compressor = Compressor::new(config.min_compress_len, config.compress_level);
        info!(
            servers = config.servers.len(),
            protocol = ?config.protocol,
            pool_size = config.pool_size,
            "memcache client created"
        );
        Ok(Self {
            config,
            selector,
            pools,
            compressor,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Start a unit of work that reuses one connection per node until the
    /// session is dropped.
    pub fn session(&self) -> Session<'_> {
        Session::new(self, self.pools.len())
    }

    /// Look up `key`. A miss is `Lookup::Miss`, never an error.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Lookup> {
        self.get_in(&mut Lease::Pool, key.as_ref())
    }

    /// Store only if `key` does not exist yet.
    pub fn add(
        &self,
        key: impl AsRef<[u8]>,
        value: impl Into<Value>,
        ttl: impl Into<Ttl>,
    ) -> Result<Store> {
        let value = value.into();
        self.store_in(&mut Lease::Pool, StorageCommand::Add, key.as_ref(), &value, ttl.into())
    }

    /// Store unconditionally. When the value is too large the old item is
    /// deleted so later reads miss instead of returning stale data.
    pub fn set(
        &self,
        key: impl AsRef<[u8]>,
        value: impl Into<Value>,
        ttl: impl Into<Ttl>,
    ) -> Result<Store> {
        let value = value.into();
        self.store_in(&mut Lease::Pool, StorageCommand::Set, key.as_ref(), &value, ttl.into())
    }

    /// Store only if `key` already exists.
    pub fn replace(
        &self,
        key: impl AsRef<[u8]>,
        value: impl Into<Value>,
        ttl: impl Into<Ttl>,
    ) -> Result<Store> {
        let value = value.into();
        self.store_in(
            &mut Lease::Pool,
            StorageCommand::Replace,
            key.as_ref(),
            &value,
            ttl.into(),
        )
    }

    /// Returns `false` when the key was absent or the node failed.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        self.delete_in(&mut Lease::Pool, key.as_ref())
    }

    /// Add `delta` to a counter and return the new value. A negative delta
    /// decrements; memcached stops decrementing at zero.
    pub fn incr(&self, key: impl AsRef<[u8]>, delta: i64) -> Result<u64> {
        self.counter_in(&mut Lease::Pool, key.as_ref(), delta >= 0, delta.unsigned_abs())
    }

    /// Subtract `delta` from a counter and return the new value.
    pub fn decr(&self, key: impl AsRef<[u8]>, delta: i64) -> Result<u64> {
        self.counter_in(&mut Lease::Pool, key.as_ref(), delta < 0, delta.unsigned_abs())
    }

    /// Fetch many keys with one round trip per node. The map holds only hits.
    pub fn get_many<K>(&self, keys: &[K]) -> Result<HashMap<K, Value>>
    where
        K: AsRef<[u8]> + Eq + Hash + Clone,
    {
        self.get_many_in(&mut Lease::Pool, keys)
    }

    /// Store many items, pipelined per node. Returns the keys that were not
    /// stored.
    pub fn set_many<K, V>(
        &self,
        items: impl IntoIterator<Item = (K, V)>,
        ttl: impl Into<Ttl>,
    ) -> Result<Vec<K>>
    where
        K: AsRef<[u8]>,
        V: Into<Value>,
    {
        self.set_many_in(&mut Lease::Pool, items, ttl.into())
    }

    /// Delete many keys, pipelined per node. Returns how many existed.
    pub fn delete_many<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<usize> {
        self.delete_many_in(&mut Lease::Pool, keys)
    }

    pub fn has_key(&self, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.get(key)?.is_hit())
    }

    /// Invalidate every item on every node. Not atomic across nodes; returns
    /// the number of nodes flushed.
    pub fn flush_all(&self) -> Result<usize> {
        let mut flushed = 0;
        for node in 0..self.pools.len() {
            match self.run(&mut Lease::Pool, node, Connection::flush_all) {
                Ok(()) => flushed += 1,
                Err(err) => self.skip_node(node, &err),
            }
        }
        Ok(flushed)
    }

    /// Server version of every reachable node, keyed by address.
    pub fn versions(&self) -> HashMap<String, String> {
        (0..self.pools.len())
            .filter_map(|node| match self.run(&mut Lease::Pool, node, Connection::version) {
                Ok(version) => Some((self.pools[node].node().to_owned(), version)),
                Err(err) => {
                    self.skip_node(node, &err);
                    None
                }
            })
            .collect()
    }

    /// Close all idle pooled connections. The client stays usable and
    /// reconnects on demand.
    pub fn close(&self) {
        let closed: usize = self.pools.iter().map(NodePool::close_idle).sum();
        debug!(closed, "closed idle connections");
    }

    // ── Shared by Client and Session ─────────────────────────────────

    pub(crate) fn get_in<'c>(&'c self, lease: &mut Lease<'_, 'c>, key: &[u8]) -> Result<Lookup> {
        key::validate(key)?;
        GET.increment();
        let node = self.selector.select(key);
        match self.run(lease, node, |conn| conn.get(key)) {
            Ok(Some(item)) => {
                GET_HIT.increment();
                Ok(self.decode(item))
            }
            Ok(None) => {
                GET_MISS.increment();
                Ok(Lookup::Miss)
            }
            Err(err) => self.contain(node, err).map(Lookup::Failure),
        }
    }

    pub(crate) fn store_in<'c>(
        &'c self,
        lease: &mut Lease<'_, 'c>,
        command: StorageCommand,
        key: &[u8],
        value: &Value,
        ttl: Ttl,
    ) -> Result<Store> {
        key::validate(key)?;
        STORE.increment();
        let (data, flags) = self.encode(value)?;
        let node = self.selector.select(key);

        if self.oversize(key, &data) {
            STORE_FAILURE.increment();
            warn!(
                key = %String::from_utf8_lossy(key),
                size = data.len(),
                limit = self.config.max_item_size,
                "value too large to cache"
            );
            if command == StorageCommand::Set {
                self.discard_stale(lease, node, &[key]);
            }
            return Ok(Store::Failure(Failure::TooLarge));
        }

        let item = StoreItem {
            key,
            data: &data,
            flags,
            exptime: ttl.exptime(self.config.default_ttl),
        };
        match self.run(lease, node, |conn| conn.store(command, &item)) {
            Ok(true) => Ok(Store::Stored),
            Ok(false) => Ok(Store::NotStored),
            Err(err) => {
                let failure = self.contain(node, err)?;
                STORE_FAILURE.increment();
                if failure == Failure::TooLarge && command == StorageCommand::Set {
                    self.discard_stale(lease, node, &[key]);
                }
                Ok(Store::Failure(failure))
            }
        }
    }

    pub(crate) fn delete_in<'c>(&'c self, lease: &mut Lease<'_, 'c>, key: &[u8]) -> Result<bool> {
        key::validate(key)?;
        DELETE.increment();
        let node = self.selector.select(key);
        match self.run(lease, node, |conn| conn.delete(key)) {
            Ok(deleted) => Ok(deleted),
            Err(err) => self.contain(node, err).map(|_| false),
        }
    }

    pub(crate) fn counter_in<'c>(
        &'c self,
        lease: &mut Lease<'_, 'c>,
        key: &[u8],
        increment: bool,
        delta: u64,
    ) -> Result<u64> {
        key::validate(key)?;
        let node = self.selector.select(key);
        self.run(lease, node, |conn| conn.counter(increment, key, delta))
    }

    pub(crate) fn get_many_in<'c, K>(
        &'c self,
        lease: &mut Lease<'_, 'c>,
        keys: &[K],
    ) -> Result<HashMap<K, Value>>
    where
        K: AsRef<[u8]> + Eq + Hash + Clone,
    {
        key::validate_all(keys)?;
        let mut found = HashMap::with_capacity(keys.len());
        if keys.is_empty() {
            return Ok(found);
        }
        GET.add(keys.len() as u64);

        let requested: HashMap<&[u8], &K> = keys.iter().map(|k| (k.as_ref(), k)).collect();
        for (node, group) in self.selector.select_many(keys) {
            let items = match self.run(lease, node, |conn| conn.get_multi(&group)) {
                Ok(items) => items,
                Err(err) => {
                    self.skip_node(node, &err);
                    continue;
                }
            };
            for item in items {
                let Some(&key) = requested.get(item.key.as_slice()) else {
                    debug!(key = %String::from_utf8_lossy(&item.key), "server returned an unrequested key");
                    continue;
                };
                if let Lookup::Hit(value) = self.decode(item) {
                    found.insert(key.clone(), value);
                }
            }
        }

        GET_HIT.add(found.len() as u64);
        GET_MISS.add(requested.len().saturating_sub(found.len()) as u64);
        Ok(found)
    }

    pub(crate) fn set_many_in<'c, K, V>(
        &'c self,
        lease: &mut Lease<'_, 'c>,
        items: impl IntoIterator<Item = (K, V)>,
        ttl: Ttl,
    ) -> Result<Vec<K>>
    where
        K: AsRef<[u8]>,
        V: Into<Value>,
    {
        let items: Vec<(K, V)> = items.into_iter().collect();
        for (key, _) in &items {
            key::validate(key.as_ref())?;
        }
        STORE.add(items.len() as u64);

        let mut entries = Vec::with_capacity(items.len());
        for (key, value) in items {
            let (data, flags) = self.encode(&value.into())?;
            entries.push((key, data, flags));
        }

        let exptime = ttl.exptime(self.config.default_ttl);
        let mut failed = vec![false; entries.len()];
        let mut stale = Vec::new();
        for (i, (key, data, _)) in entries.iter().enumerate() {
            if self.oversize(key.as_ref(), data) {
                warn!(
                    key = %String::from_utf8_lossy(key.as_ref()),
                    size = data.len(),
                    limit = self.config.max_item_size,
                    "value too large to cache"
                );
                failed[i] = true;
                stale.push(i);
            }
        }

        let sendable: Vec<usize> = (0..entries.len()).filter(|&i| !failed[i]).collect();
        let sendable_keys: Vec<&[u8]> = sendable.iter().map(|&i| entries[i].0.as_ref()).collect();
        for (node, positions) in self.selector.group(&sendable_keys) {
            let batch: Vec<StoreItem<'_>> = positions
                .iter()
                .map(|&p| {
                    let (key, data, flags) = &entries[sendable[p]];
                    StoreItem {
                        key: key.as_ref(),
                        data,
                        flags: *flags,
                        exptime,
                    }
                })
                .collect();

            match self.run(lease, node, |conn| conn.store_many(StorageCommand::Set, &batch)) {
                Ok(results) => {
                    for (&p, result) in positions.iter().zip(results) {
                        let i = sendable[p];
                        match result {
                            Ok(true) => {}
                            Ok(false) => failed[i] = true,
                            Err(err) => {
                                debug!(error = %err, "store rejected");
                                if Failure::from_error(&err) == Failure::TooLarge {
                                    stale.push(i);
                                }
                                failed[i] = true;
                            }
                        }
                    }
                }
                Err(err) => {
                    self.skip_node(node, &err);
                    for &p in &positions {
                        failed[sendable[p]] = true;
                    }
                }
            }
        }

        if !stale.is_empty() {
            let stale_keys: Vec<&[u8]> = stale.iter().map(|&i| entries[i].0.as_ref()).collect();
            for (node, group) in self.selector.select_many(&stale_keys) {
                self.discard_stale(lease, node, &group);
            }
        }

        let not_stored: Vec<K> = entries
            .into_iter()
            .zip(failed)
            .filter_map(|((key, _, _), failed)| failed.then_some(key))
            .collect();
        STORE_FAILURE.add(not_stored.len() as u64);
        Ok(not_stored)
    }

    pub(crate) fn delete_many_in<'c, K: AsRef<[u8]>>(
        &'c self,
        lease: &mut Lease<'_, 'c>,
        keys: &[K],
    ) -> Result<usize> {
        key::validate_all(keys)?;
        DELETE.add(keys.len() as u64);
        let mut deleted = 0;
        for (node, group) in self.selector.select_many(keys) {
            match self.run(lease, node, |conn| conn.delete_many(&group)) {
                Ok(results) => deleted += results.iter().filter(|r| matches!(r, Ok(true))).count(),
                Err(err) => self.skip_node(node, &err),
            }
        }
        Ok(deleted)
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Run `op` on a connection to `node`, taken from the lease.
    fn run<'c, T>(
        &'c self,
        lease: &mut Lease<'_, 'c>,
        node: usize,
        op: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let pool = &self.pools[node];
        match lease {
            Lease::Pool => {
                let mut conn = pool.acquire(&self.config)?;
                op(&mut *conn)
            }
            Lease::Session(slots) => {
                let slot = &mut slots[node];
                // an unhealthy connection goes back (and is closed) before
                // a replacement is acquired
                let held = slot.take().filter(|conn| conn.is_healthy());
                let conn = match held {
                    Some(conn) => conn,
                    None => pool.acquire(&self.config)?,
                };
                let conn = slot.insert(conn);
                op(&mut **conn)
            }
        }
    }

    /// Turn a node fault into a [`Failure`]. Other errors are passed back.
    fn contain(&self, node: usize, err: Error) -> Result<Failure> {
        if !err.is_transport() {
            return Err(err);
        }
        TRANSPORT_ERRORS.increment();
        warn!(node = %self.pools[node].node(), error = %err, "memcache request failed");
        Ok(Failure::from_error(&err))
    }

    /// Batch operations report a failed node through their result instead.
    fn skip_node(&self, node: usize, err: &Error) {
        if err.is_transport() {
            TRANSPORT_ERRORS.increment();
        }
        warn!(node = %self.pools[node].node(), error = %err, "skipping node");
    }

    /// Best-effort delete of items whose replacement was rejected.
    fn discard_stale<'c>(&'c self, lease: &mut Lease<'_, 'c>, node: usize, keys: &[&[u8]]) {
        if let Err(err) = self.run(lease, node, |conn| conn.delete_many(keys)) {
            debug!(node = %self.pools[node].node(), error = %err, "could not delete stale items");
        }
    }

    fn encode(&self, value: &Value) -> Result<(Vec<u8>, u32)> {
        let (data, flags) = value.encode();
        self.compressor.compress(data, flags)
    }

    fn decode(&self, item: Item) -> Lookup {
        let flags = item.flags;
        match compress::decompress(item.data, flags).and_then(|data| Value::decode(data, flags)) {
            Ok(value) => Lookup::Hit(value),
            Err(err) => {
                warn!(key = %String::from_utf8_lossy(&item.key), error = %err, "undecodable item");
                Lookup::Failure(Failure::Corrupt(err.to_string()))
            }
        }
    }

    fn oversize(&self, key: &[u8], data: &[u8]) -> bool {
        key.len() + data.len() > self.config.max_item_size.saturating_sub(ITEM_OVERHEAD)
    }
}
