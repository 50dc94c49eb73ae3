//! Client-side request encoding for Memcache ASCII protocol.
//!
//! Requests are appended to a [`BytesMut`], so several requests can be
//! encoded back to back and written to the socket in a single call.

use bytes::{BufMut, BytesMut};

/// The storage verbs sharing the `<cmd> <key> <flags> <exptime> <bytes>` layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageCommand {
    /// Store unconditionally.
    Set,
    /// Store only if the key does not already exist.
    Add,
    /// Store only if the key already exists.
    Replace,
}

impl StorageCommand {
    fn verb(self) -> &'static [u8] {
        match self {
            StorageCommand::Set => b"set",
            StorageCommand::Add => b"add",
            StorageCommand::Replace => b"replace",
        }
    }
}

/// A request builder for encoding Memcache commands.
#[derive(Debug, Clone)]
pub enum Request<'a> {
    /// GET command: `get <key>\r\n`
    Get { key: &'a [u8] },
    /// Multi-GET command: `get <key1> <key2> ...\r\n`
    GetMulti { keys: &'a [&'a [u8]] },
    /// Storage command: `<cmd> <key> <flags> <exptime> <bytes>\r\n<data>\r\n`
    Store {
        command: StorageCommand,
        key: &'a [u8],
        value: &'a [u8],
        flags: u32,
        exptime: u32,
    },
    /// INCR command: `incr <key> <delta>\r\n`
    Incr { key: &'a [u8], delta: u64 },
    /// DECR command: `decr <key> <delta>\r\n`
    Decr { key: &'a [u8], delta: u64 },
    /// DELETE command: `delete <key>\r\n`
    Delete { key: &'a [u8] },
    /// FLUSH_ALL command: `flush_all\r\n`
    FlushAll,
    /// VERSION command: `version\r\n`
    Version,
    /// QUIT command: `quit\r\n`
    Quit,
    /// ASCII authentication, memcached's `-Y` mode:
    /// `set _auth 0 0 <bytes>\r\n<username> <password>\r\n`
    Auth {
        username: &'a [u8],
        password: &'a [u8],
    },
}

impl<'a> Request<'a> {
    /// Create a GET request.
    #[inline]
    pub fn get(key: &'a [u8]) -> Self {
        Request::Get { key }
    }

    /// Create a multi-GET request.
    #[inline]
    pub fn get_multi(keys: &'a [&'a [u8]]) -> Self {
        Request::GetMulti { keys }
    }

    /// Create a SET request.
    #[inline]
    pub fn set(key: &'a [u8], value: &'a [u8]) -> StorageRequest<'a> {
        StorageRequest::new(StorageCommand::Set, key, value)
    }

    /// Create an ADD request (store only if key does not exist).
    #[inline]
    pub fn add(key: &'a [u8], value: &'a [u8]) -> StorageRequest<'a> {
        StorageRequest::new(StorageCommand::Add, key, value)
    }

    /// Create a REPLACE request (store only if key already exists).
    #[inline]
    pub fn replace(key: &'a [u8], value: &'a [u8]) -> StorageRequest<'a> {
        StorageRequest::new(StorageCommand::Replace, key, value)
    }

    /// Create an INCR request.
    #[inline]
    pub fn incr(key: &'a [u8], delta: u64) -> Self {
        Request::Incr { key, delta }
    }

    /// Create a DECR request.
    #[inline]
    pub fn decr(key: &'a [u8], delta: u64) -> Self {
        Request::Decr { key, delta }
    }

    /// Create a DELETE request.
    #[inline]
    pub fn delete(key: &'a [u8]) -> Self {
        Request::Delete { key }
    }

    /// Create a FLUSH_ALL request.
    #[inline]
    pub fn flush_all() -> Self {
        Request::FlushAll
    }

    /// Create a VERSION request.
    #[inline]
    pub fn version() -> Self {
        Request::Version
    }

    /// Create a QUIT request.
    #[inline]
    pub fn quit() -> Self {
        Request::Quit
    }

    /// Create an ASCII authentication request.
    #[inline]
    pub fn auth(username: &'a [u8], password: &'a [u8]) -> Self {
        Request::Auth { username, password }
    }

    /// Upper bound of the encoded size, used to reserve buffer space.
    pub fn encoded_len(&self) -> usize {
        // " <u32> <u32> <usize>\r\n" plus the data terminator
        const STORAGE_ARGS: usize = 1 + 10 + 1 + 10 + 1 + 20 + 2 + 2;
        match self {
            Request::Get { key } => 6 + key.len(),
            Request::GetMulti { keys } => 5 + keys.iter().map(|k| 1 + k.len()).sum::<usize>(),
            Request::Store {
                command, key, value, ..
            } => command.verb().len() + 1 + key.len() + STORAGE_ARGS + value.len(),
            Request::Incr { key, .. } | Request::Decr { key, .. } => 28 + key.len(),
            Request::Delete { key } => 9 + key.len(),
            Request::FlushAll => 11,
            Request::Version => 9,
            Request::Quit => 6,
            Request::Auth { username, password } => 40 + username.len() + password.len(),
        }
    }

    /// Append the encoded request to `buf`.
    ///
    /// Returns the number of bytes written.
    pub fn encode(&self, buf: &mut BytesMut) -> usize {
        let start = buf.len();
        buf.reserve(self.encoded_len());
        match self {
            Request::Get { key } => encode_keys(buf, &[*key]),
            Request::GetMulti { keys } => encode_keys(buf, keys),
            Request::Store {
                command,
                key,
                value,
                flags,
                exptime,
            } => encode_storage(buf, command.verb(), key, value, *flags, *exptime),
            Request::Incr { key, delta } => encode_incr_decr(buf, b"incr", key, *delta),
            Request::Decr { key, delta } => encode_incr_decr(buf, b"decr", key, *delta),
            Request::Delete { key } => {
                buf.put_slice(b"delete ");
                buf.put_slice(key);
                buf.put_slice(b"\r\n");
            }
            Request::FlushAll => encode_simple(buf, b"flush_all"),
            Request::Version => encode_simple(buf, b"version"),
            Request::Quit => encode_simple(buf, b"quit"),
            Request::Auth { username, password } => encode_auth(buf, username, password),
        }
        buf.len() - start
    }
}

/// Builder for SET/ADD/REPLACE requests with optional flags and exptime.
#[derive(Debug, Clone)]
pub struct StorageRequest<'a> {
    command: StorageCommand,
    key: &'a [u8],
    value: &'a [u8],
    flags: u32,
    exptime: u32,
}

impl<'a> StorageRequest<'a> {
    fn new(command: StorageCommand, key: &'a [u8], value: &'a [u8]) -> Self {
        Self {
            command,
            key,
            value,
            flags: 0,
            exptime: 0,
        }
    }

    /// Set the flags value.
    #[inline]
    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Set the wire expiration (0, relative seconds, or a UNIX timestamp).
    #[inline]
    pub fn exptime(mut self, exptime: u32) -> Self {
        self.exptime = exptime;
        self
    }

    /// Build the final request.
    #[inline]
    pub fn build(self) -> Request<'a> {
        Request::Store {
            command: self.command,
            key: self.key,
            value: self.value,
            flags: self.flags,
            exptime: self.exptime,
        }
    }

    /// Append the encoded request to `buf`.
    #[inline]
    pub fn encode(&self, buf: &mut BytesMut) -> usize {
        self.clone().build().encode(buf)
    }
}

/// `get <key1> <key2> ...\r\n`
fn encode_keys(buf: &mut BytesMut, keys: &[&[u8]]) {
    if keys.is_empty() {
        return;
    }
    buf.put_slice(b"get");
    for key in keys {
        buf.put_u8(b' ');
        buf.put_slice(key);
    }
    buf.put_slice(b"\r\n");
}

/// `<cmd> <key> <flags> <exptime> <bytes>\r\n<data>\r\n`
fn encode_storage(
    buf: &mut BytesMut,
    cmd: &[u8],
    key: &[u8],
    value: &[u8],
    flags: u32,
    exptime: u32,
) {
    let mut num = itoa::Buffer::new();

    buf.put_slice(cmd);
    buf.put_u8(b' ');
    buf.put_slice(key);
    buf.put_u8(b' ');
    buf.put_slice(num.format(flags).as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(num.format(exptime).as_bytes());
    buf.put_u8(b' ');
    buf.put_slice(num.format(value.len()).as_bytes());
    buf.put_slice(b"\r\n");

    buf.put_slice(value);
    buf.put_slice(b"\r\n");
}

/// `<cmd> <key> <delta>\r\n`
fn encode_incr_decr(buf: &mut BytesMut, cmd: &[u8], key: &[u8], delta: u64) {
    let mut num = itoa::Buffer::new();
    buf.put_slice(cmd);
    buf.put_u8(b' ');
    buf.put_slice(key);
    buf.put_u8(b' ');
    buf.put_slice(num.format(delta).as_bytes());
    buf.put_slice(b"\r\n");
}

fn encode_auth(buf: &mut BytesMut, username: &[u8], password: &[u8]) {
    let mut num = itoa::Buffer::new();
    let len = username.len() + 1 + password.len();
    buf.put_slice(b"set _auth 0 0 ");
    buf.put_slice(num.format(len).as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(username);
    buf.put_u8(b' ');
    buf.put_slice(password);
    buf.put_slice(b"\r\n");
}

fn encode_simple(buf: &mut BytesMut, cmd: &[u8]) {
    buf.put_slice(cmd);
    buf.put_slice(b"\r\n");
}
