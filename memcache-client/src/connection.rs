//! A single blocking connection to one memcached node.
//!
//! A connection is owned by exactly one caller at a time, so requests and
//! responses are strictly paired. Batched operations pipeline all requests
//! in one write and then read exactly as many responses back, in order.
//!
//! Any socket error, EOF, or framing error marks the connection unhealthy.
//! The pool discards unhealthy connections instead of reusing them.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use protocol_memcache::binary::{
    BinaryRequest, COUNTER_NO_CREATE, Opcode, ParsedBinaryResponse, Status,
};
use protocol_memcache::{ParseError, Request, Response, StorageCommand};
use tracing::debug;

use crate::config::{ClientConfig, Protocol};
use crate::error::{Error, Result};
use crate::metrics::{CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED, CONNECTIONS_OPENED};

const READ_CHUNK: usize = 16 * 1024;

/// Keys per text `get` line. Large batches become several pipelined gets.
const TEXT_GET_BATCH: usize = 100;

/// An item read from the server, before decompression and decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Item {
    pub key: Vec<u8>,
    pub flags: u32,
    pub data: Vec<u8>,
}

/// One entry of a pipelined store.
pub(crate) struct StoreItem<'a> {
    pub key: &'a [u8],
    pub data: &'a [u8],
    pub flags: u32,
    pub exptime: u32,
}

pub(crate) struct Connection {
    node: String,
    stream: TcpStream,
    protocol: Protocol,
    read_buf: BytesMut,
    write_buf: BytesMut,
    max_value_len: usize,
    next_opaque: u32,
    healthy: bool,
    last_used: Instant,
}

impl Connection {
    /// Connect to `node` and authenticate if credentials are configured.
    pub(crate) fn open(node: &str, config: &ClientConfig) -> Result<Self> {
        let stream = connect_stream(node, nonzero(config.connect_timeout))?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(nonzero(config.io_timeout))?;
        stream.set_write_timeout(nonzero(config.io_timeout))?;

        CONNECTIONS_OPENED.increment();
        CONNECTIONS_ACTIVE.increment();
        debug!(node, protocol = ?config.protocol, "connection opened");

        let mut conn = Self {
            node: node.to_owned(),
            stream,
            protocol: config.protocol,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::with_capacity(READ_CHUNK),
            max_value_len: config.max_item_size,
            next_opaque: 0,
            healthy: true,
            last_used: Instant::now(),
        };

        if let Some((username, password)) = config.credentials() {
            conn.authenticate(username, password)?;
        }
        Ok(conn)
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    #[cfg(test)]
    pub(crate) fn poison(&mut self) {
        self.healthy = false;
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub(crate) fn get(&mut self, key: &[u8]) -> Result<Option<Item>> {
        self.guarded(|conn| match conn.protocol {
            Protocol::Text => {
                Request::get(key).encode(&mut conn.write_buf);
                conn.flush()?;
                match conn.recv_text()? {
                    Response::Items(mut values) => match values.pop() {
                        None => Ok(None),
                        Some(value) if values.is_empty() && value.key == key => Ok(Some(Item {
                            key: value.key,
                            flags: value.flags,
                            data: value.data,
                        })),
                        Some(_) => Err(Error::UnexpectedResponse),
                    },
                    other => Err(text_error(other)),
                }
            }
            Protocol::Binary => {
                let opaque = conn.opaque();
                BinaryRequest::encode_get(&mut conn.write_buf, key, opaque);
                conn.flush()?;
                conn.recv_binary(opaque, |response| match response {
                    ParsedBinaryResponse::Value { flags, value, .. } => Ok(Some(Item {
                        key: key.to_vec(),
                        flags,
                        data: value.to_vec(),
                    })),
                    ParsedBinaryResponse::Error {
                        status: Status::KeyNotFound,
                        ..
                    } => Ok(None),
                    other => Err(binary_error(&other)),
                })
            }
        })
    }

    /// Fetch many keys in one round trip. Misses are simply absent.
    pub(crate) fn get_multi(&mut self, keys: &[&[u8]]) -> Result<Vec<Item>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        self.guarded(|conn| match conn.protocol {
            Protocol::Text => conn.get_multi_text(keys),
            Protocol::Binary => conn.get_multi_binary(keys),
        })
    }

    fn get_multi_text(&mut self, keys: &[&[u8]]) -> Result<Vec<Item>> {
        let batches: Vec<&[&[u8]]> = keys.chunks(TEXT_GET_BATCH).collect();
        for batch in &batches {
            Request::get_multi(batch).encode(&mut self.write_buf);
        }
        self.flush()?;

        let mut items = Vec::with_capacity(keys.len());
        for _ in &batches {
            match self.recv_text()? {
                Response::Items(values) => items.extend(values.into_iter().map(|v| Item {
                    key: v.key,
                    flags: v.flags,
                    data: v.data,
                })),
                other => return Err(text_error(other)),
            }
        }
        Ok(items)
    }

    fn get_multi_binary(&mut self, keys: &[&[u8]]) -> Result<Vec<Item>> {
        let first = self.next_opaque;
        for key in keys {
            let opaque = self.opaque();
            BinaryRequest::encode_getkq(&mut self.write_buf, key, opaque);
        }
        let noop = self.opaque();
        BinaryRequest::encode_noop(&mut self.write_buf, noop);
        self.flush()?;

        // quiet gets only answer hits (and errors), the noop closes the batch
        let mut items = Vec::new();
        loop {
            let reply = self.recv_binary_any(|response| {
                let opaque = response.opaque();
                let in_batch = opaque.wrapping_sub(first) < keys.len() as u32;
                match response {
                    ParsedBinaryResponse::Success {
                        opcode: Opcode::Noop,
                        ..
                    } if opaque == noop => Ok(None),
                    ParsedBinaryResponse::Value {
                        flags, key, value, ..
                    } if in_batch => {
                        let key = key.unwrap_or(keys[opaque.wrapping_sub(first) as usize]);
                        Ok(Some(Some(Item {
                            key: key.to_vec(),
                            flags,
                            data: value.to_vec(),
                        })))
                    }
                    ParsedBinaryResponse::Error { status, .. } if in_batch => {
                        debug!(status = status.as_str(), "quiet get failed for one key");
                        Ok(Some(None))
                    }
                    _ => Err(Error::Protocol(ParseError::Protocol(
                        "response outside the pipelined batch",
                    ))),
                }
            })?;
            match reply {
                None => return Ok(items),
                Some(Some(item)) => items.push(item),
                Some(None) => {}
            }
        }
    }

    /// Store one item. `Ok(false)` when an ADD or REPLACE condition failed.
    pub(crate) fn store(&mut self, command: StorageCommand, item: &StoreItem<'_>) -> Result<bool> {
        let mut results = self.store_many(command, std::slice::from_ref(item))?;
        results.pop().ok_or(Error::UnexpectedResponse)?
    }

    /// Pipeline several stores. The outer error means the batch broke down;
    /// the inner results are the per-item server replies.
    pub(crate) fn store_many(
        &mut self,
        command: StorageCommand,
        items: &[StoreItem<'_>],
    ) -> Result<Vec<Result<bool>>> {
        self.guarded(|conn| {
            let mut opaques = Vec::with_capacity(items.len());
            for item in items {
                match conn.protocol {
                    Protocol::Text => {
                        let request = match command {
                            StorageCommand::Set => Request::set(item.key, item.data),
                            StorageCommand::Add => Request::add(item.key, item.data),
                            StorageCommand::Replace => Request::replace(item.key, item.data),
                        };
                        request
                            .flags(item.flags)
                            .exptime(item.exptime)
                            .encode(&mut conn.write_buf);
                    }
                    Protocol::Binary => {
                        let opcode = match command {
                            StorageCommand::Set => Opcode::Set,
                            StorageCommand::Add => Opcode::Add,
                            StorageCommand::Replace => Opcode::Replace,
                        };
                        let opaque = conn.opaque();
                        opaques.push(opaque);
                        BinaryRequest::encode_store(
                            &mut conn.write_buf,
                            opcode,
                            item.key,
                            item.data,
                            item.flags,
                            item.exptime,
                            opaque,
                        );
                    }
                }
            }
            conn.flush()?;

            let mut results = Vec::with_capacity(items.len());
            for i in 0..items.len() {
                let result = match conn.protocol {
                    Protocol::Text => match conn.recv_text()? {
                        Response::Stored => Ok(true),
                        Response::NotStored | Response::Exists => Ok(false),
                        other if other.is_error() => Err(text_error(other)),
                        _ => return Err(Error::UnexpectedResponse),
                    },
                    Protocol::Binary => conn.recv_binary(opaques[i], |response| {
                        Ok(match response {
                            ParsedBinaryResponse::Success { .. } => Ok(true),
                            ParsedBinaryResponse::Error {
                                status:
                                    Status::KeyExists | Status::KeyNotFound | Status::ItemNotStored,
                                ..
                            } => Ok(false),
                            error @ ParsedBinaryResponse::Error { .. } => Err(binary_error(&error)),
                            _ => return Err(Error::UnexpectedResponse),
                        })
                    })?,
                };
                results.push(result);
            }
            Ok(results)
        })
    }

    /// `Ok(false)` when the key did not exist.
    pub(crate) fn delete(&mut self, key: &[u8]) -> Result<bool> {
        let mut results = self.delete_many(&[key])?;
        results.pop().ok_or(Error::UnexpectedResponse)?
    }

    pub(crate) fn delete_many(&mut self, keys: &[&[u8]]) -> Result<Vec<Result<bool>>> {
        self.guarded(|conn| {
            let mut opaques = Vec::with_capacity(keys.len());
            for key in keys {
                match conn.protocol {
                    Protocol::Text => {
                        Request::delete(key).encode(&mut conn.write_buf);
                    }
                    Protocol::Binary => {
                        let opaque = conn.opaque();
                        opaques.push(opaque);
                        BinaryRequest::encode_delete(&mut conn.write_buf, Opcode::Delete, key, opaque);
                    }
                }
            }
            conn.flush()?;

            let mut results = Vec::with_capacity(keys.len());
            for i in 0..keys.len() {
                let result = match conn.protocol {
                    Protocol::Text => match conn.recv_text()? {
                        Response::Deleted => Ok(true),
                        Response::NotFound => Ok(false),
                        other if other.is_error() => Err(text_error(other)),
                        _ => return Err(Error::UnexpectedResponse),
                    },
                    Protocol::Binary => conn.recv_binary(opaques[i], |response| {
                        Ok(match response {
                            ParsedBinaryResponse::Success { .. } => Ok(true),
                            ParsedBinaryResponse::Error {
                                status: Status::KeyNotFound,
                                ..
                            } => Ok(false),
                            error @ ParsedBinaryResponse::Error { .. } => Err(binary_error(&error)),
                            _ => return Err(Error::UnexpectedResponse),
                        })
                    })?,
                };
                results.push(result);
            }
            Ok(results)
        })
    }

    /// INCR or DECR. Missing keys are never created.
    pub(crate) fn counter(&mut self, increment: bool, key: &[u8], delta: u64) -> Result<u64> {
        self.guarded(|conn| match conn.protocol {
            Protocol::Text => {
                let request = if increment {
                    Request::incr(key, delta)
                } else {
                    Request::decr(key, delta)
                };
                request.encode(&mut conn.write_buf);
                conn.flush()?;
                match conn.recv_text()? {
                    Response::Numeric(value) => Ok(value),
                    Response::NotFound => Err(Error::NotFound),
                    Response::ClientError(msg) if is_non_numeric(&msg) => Err(Error::NotNumeric),
                    other => Err(text_error(other)),
                }
            }
            Protocol::Binary => {
                let opcode = if increment {
                    Opcode::Increment
                } else {
                    Opcode::Decrement
                };
                let opaque = conn.opaque();
                BinaryRequest::encode_counter(
                    &mut conn.write_buf,
                    opcode,
                    key,
                    delta,
                    0,
                    COUNTER_NO_CREATE,
                    opaque,
                );
                conn.flush()?;
                conn.recv_binary(opaque, |response| match response {
                    ParsedBinaryResponse::Counter { value, .. } => Ok(value),
                    other => Err(binary_error(&other)),
                })
            }
        })
    }

    pub(crate) fn flush_all(&mut self) -> Result<()> {
        self.guarded(|conn| match conn.protocol {
            Protocol::Text => {
                Request::flush_all().encode(&mut conn.write_buf);
                conn.flush()?;
                match conn.recv_text()? {
                    Response::Ok => Ok(()),
                    other => Err(text_error(other)),
                }
            }
            Protocol::Binary => {
                let opaque = conn.opaque();
                BinaryRequest::encode_flush(&mut conn.write_buf, opaque);
                conn.flush()?;
                conn.recv_binary(opaque, |response| match response {
                    ParsedBinaryResponse::Success { .. } => Ok(()),
                    other => Err(binary_error(&other)),
                })
            }
        })
    }

    pub(crate) fn version(&mut self) -> Result<String> {
        self.guarded(|conn| match conn.protocol {
            Protocol::Text => {
                Request::version().encode(&mut conn.write_buf);
                conn.flush()?;
                match conn.recv_text()? {
                    Response::Version(v) => Ok(String::from_utf8_lossy(&v).into_owned()),
                    other => Err(text_error(other)),
                }
            }
            Protocol::Binary => {
                let opaque = conn.opaque();
                BinaryRequest::encode_version(&mut conn.write_buf, opaque);
                conn.flush()?;
                conn.recv_binary(opaque, |response| match response {
                    ParsedBinaryResponse::Version { version, .. } => {
                        Ok(String::from_utf8_lossy(version).into_owned())
                    }
                    other => Err(binary_error(&other)),
                })
            }
        })
    }

    fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        let result = match self.protocol {
            Protocol::Text => {
                Request::auth(username.as_bytes(), password.as_bytes()).encode(&mut self.write_buf);
                self.flush()
                    .and_then(|()| self.recv_text())
                    .and_then(|response| match response {
                        Response::Stored => Ok(()),
                        Response::ClientError(msg) | Response::ServerError(msg) => {
                            Err(Error::Auth(String::from_utf8_lossy(&msg).into_owned()))
                        }
                        _ => Err(Error::Auth("unexpected reply to authentication".into())),
                    })
            }
            Protocol::Binary => {
                let opaque = self.opaque();
                BinaryRequest::encode_sasl_plain(
                    &mut self.write_buf,
                    username.as_bytes(),
                    password.as_bytes(),
                    opaque,
                );
                self.flush().and_then(|()| {
                    self.recv_binary(opaque, |response| match response {
                        ParsedBinaryResponse::Success { .. } => Ok(()),
                        ParsedBinaryResponse::Error {
                            status, message, ..
                        } => Err(Error::Auth(if message.is_empty() {
                            status.as_str().to_owned()
                        } else {
                            String::from_utf8_lossy(message).into_owned()
                        })),
                        _ => Err(Error::Auth("unexpected reply to authentication".into())),
                    })
                })
            }
        };
        match &result {
            Ok(()) => debug!(node = %self.node, username, "authenticated"),
            Err(_) => self.healthy = false,
        }
        result
    }

    // ── I/O ──────────────────────────────────────────────────────────

    /// Run one exchange, marking the connection unhealthy if it broke the stream.
    fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if !self.healthy {
            return Err(Error::Connection(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection is unhealthy",
            )));
        }
        let result = op(self);
        if let Err(err) = &result
            && err.poisons_connection()
        {
            debug!(node = %self.node, error = %err, "connection poisoned");
            self.healthy = false;
        }
        self.last_used = Instant::now();
        result
    }

    fn opaque(&mut self) -> u32 {
        let opaque = self.next_opaque;
        self.next_opaque = self.next_opaque.wrapping_add(1);
        opaque
    }

    fn flush(&mut self) -> Result<()> {
        let result = self.stream.write_all(&self.write_buf);
        self.write_buf.clear();
        Ok(result?)
    }

    fn fill(&mut self) -> Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(Error::Connection(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by server",
                    )));
                }
                Ok(n) => {
                    self.read_buf.extend_from_slice(&chunk[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn recv_text(&mut self) -> Result<Response> {
        loop {
            match Response::parse_with_limit(&self.read_buf, self.max_value_len) {
                Ok((response, consumed)) => {
                    self.read_buf.advance(consumed);
                    return Ok(response);
                }
                Err(e) if e.is_incomplete() => self.fill()?,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read one binary frame and hand it to `handle`, whatever its opaque.
    fn recv_binary_any<T>(
        &mut self,
        handle: impl FnOnce(ParsedBinaryResponse<'_>) -> Result<T>,
    ) -> Result<T> {
        loop {
            match ParsedBinaryResponse::parse_with_limit(&self.read_buf, self.max_value_len) {
                Ok((response, consumed)) => {
                    let result = handle(response);
                    self.read_buf.advance(consumed);
                    return result;
                }
                Err(e) if e.is_incomplete() => self.fill()?,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read one binary frame that must answer the request tagged `opaque`.
    fn recv_binary<T>(
        &mut self,
        opaque: u32,
        handle: impl FnOnce(ParsedBinaryResponse<'_>) -> Result<T>,
    ) -> Result<T> {
        self.recv_binary_any(|response| {
            if response.opaque() != opaque {
                return Err(Error::Protocol(ParseError::Protocol("opaque mismatch")));
            }
            handle(response)
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        CONNECTIONS_CLOSED.increment();
        CONNECTIONS_ACTIVE.decrement();
        debug!(node = %self.node, healthy = self.healthy, "connection closed");
    }
}

fn nonzero(timeout: Option<Duration>) -> Option<Duration> {
    timeout.filter(|t| !t.is_zero())
}

fn connect_stream(address: &str, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let Some(timeout) = timeout else {
        return TcpStream::connect(address);
    };
    let mut last_err = None;
    for addr in address.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{address} did not resolve to any address"),
        )
    }))
}

fn is_non_numeric(msg: &[u8]) -> bool {
    memchr::memmem::find(msg, b"non-numeric").is_some()
}

fn text_error(response: Response) -> Error {
    match response {
        Response::Error => Error::Server("ERROR".into()),
        Response::ClientError(msg) => {
            Error::Server(format!("CLIENT_ERROR {}", String::from_utf8_lossy(&msg)))
        }
        Response::ServerError(msg) => Error::Server(String::from_utf8_lossy(&msg).into_owned()),
        _ => Error::UnexpectedResponse,
    }
}

fn binary_error(response: &ParsedBinaryResponse<'_>) -> Error {
    let ParsedBinaryResponse::Error { status, message, .. } = response else {
        return Error::UnexpectedResponse;
    };
    match status {
        Status::KeyNotFound => Error::NotFound,
        Status::NonNumericValue => Error::NotNumeric,
        s if s.is_auth_failure() => Error::Auth(s.as_str().to_owned()),
        s if message.is_empty() => Error::Server(s.as_str().to_owned()),
        s => Error::Server(format!(
            "{}: {}",
            s.as_str(),
            String::from_utf8_lossy(message)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_errors_map_to_server() {
        assert!(matches!(text_error(Response::Error), Error::Server(m) if m == "ERROR"));
        assert!(matches!(
            text_error(Response::ServerError(b"object too large for cache".to_vec())),
            Error::Server(m) if m == "object too large for cache"
        ));
        assert!(matches!(
            text_error(Response::ClientError(b"bad data chunk".to_vec())),
            Error::Server(m) if m == "CLIENT_ERROR bad data chunk"
        ));
        assert!(matches!(text_error(Response::Stored), Error::UnexpectedResponse));
    }

    #[test]
    fn binary_errors_map_by_status() {
        let error = |status| ParsedBinaryResponse::Error {
            opcode: Opcode::Set,
            status,
            opaque: 0,
            message: b"",
        };
        assert!(matches!(binary_error(&error(Status::KeyNotFound)), Error::NotFound));
        assert!(matches!(
            binary_error(&error(Status::NonNumericValue)),
            Error::NotNumeric
        ));
        assert!(matches!(binary_error(&error(Status::AuthError)), Error::Auth(_)));
        assert!(matches!(
            binary_error(&error(Status::ValueTooLarge)),
            Error::Server(m) if crate::outcome::is_too_large(&m)
        ));
        assert!(matches!(
            binary_error(&ParsedBinaryResponse::Error {
                opcode: Opcode::Set,
                status: Status::OutOfMemory,
                opaque: 0,
                message: b"slab full",
            }),
            Error::Server(m) if m == "Out of memory: slab full"
        ));
    }

    #[test]
    fn non_numeric_detection() {
        assert!(is_non_numeric(
            b"cannot increment or decrement non-numeric value"
        ));
        assert!(!is_non_numeric(b"invalid numeric delta argument"));
    }

    #[test]
    fn zero_timeouts_mean_none() {
        assert_eq!(nonzero(Some(Duration::ZERO)), None);
        assert_eq!(nonzero(Some(Duration::from_millis(5))), Some(Duration::from_millis(5)));
        assert_eq!(nonzero(None), None);
    }

    #[test]
    fn connect_refused_is_a_connection_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = Connection::open(&addr, &ClientConfig::default())
            .err()
            .expect("nothing listens on a released port");
        assert!(matches!(err, Error::Connection(_)), "{err}");
    }
}
