//! Session affinity: one connection per node for a unit of work.

use std::collections::HashMap;
use std::hash::Hash;

use protocol_memcache::StorageCommand;

use crate::client::{Client, Lease};
use crate::error::Result;
use crate::expiry::Ttl;
use crate::outcome::{Lookup, Store};
use crate::pool::PooledConnection;
use crate::value::Value;

/// A unit of work bound to one connection per node.
///
/// The first operation that touches a node checks a connection out of that
/// node's pool; later operations on the same node reuse it. Everything is
/// returned to the pools when the session is dropped. A connection that
/// breaks mid-session is replaced on next use.
///
/// ```no_run
/// use memcache_client::{Client, ClientConfig, Ttl};
///
/// let client = Client::new(ClientConfig::default())?;
/// let mut session = client.session();
/// session.set("a", 1i64, Ttl::Default)?;
/// session.incr("a", 41)?;
/// drop(session);
/// # Ok::<(), memcache_client::Error>(())
/// ```
pub struct Session<'c> {
    client: &'c Client,
    slots: Vec<Option<PooledConnection<'c>>>,
}

impl<'c> Session<'c> {
    pub(crate) fn new(client: &'c Client, nodes: usize) -> Self {
        Self {
            client,
            slots: (0..nodes).map(|_| None).collect(),
        }
    }

    /// Number of connections currently held.
    pub fn held(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn lease(&mut self) -> Lease<'_, 'c> {
        Lease::Session(&mut self.slots[..])
    }

    pub fn get(&mut self, key: impl AsRef<[u8]>) -> Result<Lookup> {
        let client = self.client;
        client.get_in(&mut self.lease(), key.as_ref())
    }

    pub fn add(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl Into<Value>,
        ttl: impl Into<Ttl>,
    ) -> Result<Store> {
        self.store(StorageCommand::Add, key.as_ref(), value.into(), ttl.into())
    }

    pub fn set(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl Into<Value>,
        ttl: impl Into<Ttl>,
    ) -> Result<Store> {
        self.store(StorageCommand::Set, key.as_ref(), value.into(), ttl.into())
    }

    pub fn replace(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl Into<Value>,
        ttl: impl Into<Ttl>,
    ) -> Result<Store> {
        self.store(StorageCommand::Replace, key.as_ref(), value.into(), ttl.into())
    }

    fn store(&mut self, command: StorageCommand, key: &[u8], value: Value, ttl: Ttl) -> Result<Store> {
        let client = self.client;
        client.store_in(&mut self.lease(), command, key, &value, ttl)
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) -> Result<bool> {
        let client = self.client;
        client.delete_in(&mut self.lease(), key.as_ref())
    }

    pub fn incr(&mut self, key: impl AsRef<[u8]>, delta: i64) -> Result<u64> {
        let client = self.client;
        client.counter_in(&mut self.lease(), key.as_ref(), delta >= 0, delta.unsigned_abs())
    }

    pub fn decr(&mut self, key: impl AsRef<[u8]>, delta: i64) -> Result<u64> {
        let client = self.client;
        client.counter_in(&mut self.lease(), key.as_ref(), delta < 0, delta.unsigned_abs())
    }

    pub fn get_many<K>(&mut self, keys: &[K]) -> Result<HashMap<K, Value>>
    where
        K: AsRef<[u8]> + Eq + Hash + Clone,
    {
        let client = self.client;
        client.get_many_in(&mut self.lease(), keys)
    }

    pub fn set_many<K, V>(
        &mut self,
        items: impl IntoIterator<Item = (K, V)>,
        ttl: impl Into<Ttl>,
    ) -> Result<Vec<K>>
    where
        K: AsRef<[u8]>,
        V: Into<Value>,
    {
        let client = self.client;
        client.set_many_in(&mut self.lease(), items, ttl.into())
    }

    pub fn delete_many<K: AsRef<[u8]>>(&mut self, keys: &[K]) -> Result<usize> {
        let client = self.client;
        client.delete_many_in(&mut self.lease(), keys)
    }

    pub fn has_key(&mut self, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.get(key)?.is_hit())
    }
}
