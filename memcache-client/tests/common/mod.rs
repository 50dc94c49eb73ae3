//! In-process memcached stand-in for hermetic client tests.
//!
//! Speaks enough of the text and binary protocols for the client: storage
//! commands, get/multi-get, delete, incr/decr, flush_all, version, and
//! authentication. The protocol is picked per connection from the first
//! byte, like memcached does.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use protocol_memcache::binary::{
    BinaryResponse, COUNTER_NO_CREATE, HEADER_SIZE, Opcode, REQUEST_MAGIC, RequestHeader, Status,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub flags: u32,
    pub exptime: u32,
    pub data: Vec<u8>,
    stored_at: Instant,
}

impl Entry {
    fn new(flags: u32, exptime: u32, data: Vec<u8>) -> Self {
        Self {
            flags,
            exptime,
            data,
            stored_at: Instant::now(),
        }
    }

    /// memcached's rule: up to 30 days is relative, beyond is a UNIX time.
    fn expired(&self) -> bool {
        match u64::from(self.exptime) {
            0 => false,
            secs if secs <= 60 * 60 * 24 * 30 => {
                self.stored_at.elapsed() >= Duration::from_secs(secs)
            }
            at => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .is_ok_and(|now| now.as_secs() >= at),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockOptions {
    /// Require `(username, password)` before any other command.
    pub credentials: Option<(String, String)>,
    /// Largest value accepted, like memcached's `-I`.
    pub max_item_size: usize,
}

impl Default for MockOptions {
    fn default() -> Self {
        Self {
            credentials: None,
            max_item_size: 1024 * 1024,
        }
    }
}

struct Shared {
    options: MockOptions,
    items: Mutex<HashMap<Vec<u8>, Entry>>,
    streams: Mutex<Vec<TcpStream>>,
    accepted: AtomicUsize,
    commands: AtomicUsize,
    stopped: AtomicBool,
}

impl Shared {
    /// The item table with expired entries already dropped.
    fn items(&self) -> MutexGuard<'_, HashMap<Vec<u8>, Entry>> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.retain(|_, entry| !entry.expired());
        items
    }
}

pub struct MockServer {
    addr: String,
    shared: Arc<Shared>,
}

impl MockServer {
    pub fn start() -> Self {
        Self::with_options(MockOptions::default())
    }

    pub fn with_options(options: MockOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let shared = Arc::new(Shared {
            options,
            items: Mutex::new(HashMap::new()),
            streams: Mutex::new(Vec::new()),
            accepted: AtomicUsize::new(0),
            commands: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        });

        let accept_shared = Arc::clone(&shared);
        thread::spawn(move || {
            for stream in listener.incoming() {
                if accept_shared.stopped.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(stream) = stream else { continue };
                accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                if let Ok(clone) = stream.try_clone() {
                    accept_shared.streams.lock().unwrap().push(clone);
                }
                let conn_shared = Arc::clone(&accept_shared);
                thread::spawn(move || {
                    // errors just end the connection
                    let _ = serve(stream, &conn_shared);
                });
            }
        });

        Self { addr, shared }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Commands processed so far, across all connections.
    pub fn commands(&self) -> usize {
        self.shared.commands.load(Ordering::SeqCst)
    }

    pub fn entry(&self, key: &str) -> Option<Entry> {
        self.shared.items().get(key.as_bytes()).cloned()
    }

    pub fn insert(&self, key: &str, flags: u32, data: &[u8]) {
        self.shared.items().insert(
            key.as_bytes().to_vec(),
            Entry::new(flags, 0, data.to_vec()),
        );
    }

    pub fn len(&self) -> usize {
        self.shared.items().len()
    }

    /// Cut every open connection, as a restarting server would.
    pub fn disconnect_all(&self) {
        for stream in self.shared.streams.lock().unwrap().drain(..) {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        // wake the accept loop
        let _ = TcpStream::connect(&self.addr);
        self.disconnect_all();
    }
}

/// An address nothing listens on.
pub fn dead_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

fn serve(stream: TcpStream, shared: &Shared) -> io::Result<()> {
    let mut first = [0u8; 1];
    if stream.peek(&mut first)? == 0 {
        return Ok(());
    }
    let writer = stream.try_clone()?;
    let reader = BufReader::new(stream);
    if first[0] == REQUEST_MAGIC {
        serve_binary(reader, writer, shared)
    } else {
        serve_text(reader, writer, shared)
    }
}

// ── Text protocol ───────────────────────────────────────────────────

fn serve_text(
    mut reader: BufReader<TcpStream>,
    mut writer: TcpStream,
    shared: &Shared,
) -> io::Result<()> {
    let mut authenticated = shared.options.credentials.is_none();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(());
        }
        shared.commands.fetch_add(1, Ordering::SeqCst);
        let text = String::from_utf8_lossy(&line).trim_end().to_string();
        let parts: Vec<&str> = text.split(' ').collect();
        let reply = match parts.as_slice() {
            [cmd @ ("set" | "add" | "replace"), key, flags, exptime, len] => {
                let len: usize = len.parse().unwrap_or(0);
                let mut data = vec![0u8; len + 2];
                reader.read_exact(&mut data)?;
                data.truncate(len);
                if !authenticated {
                    authenticated = check_text_auth(shared, &data);
                    if authenticated {
                        b"STORED\r\n".to_vec()
                    } else {
                        b"CLIENT_ERROR authentication failure\r\n".to_vec()
                    }
                } else {
                    text_store(shared, cmd, key, flags, exptime, data)
                }
            }
            _ if !authenticated => b"CLIENT_ERROR unauthenticated\r\n".to_vec(),
            ["get" | "gets", keys @ ..] if !keys.is_empty() => {
                let items = shared.items();
                let mut out = Vec::new();
                for key in keys {
                    if let Some(entry) = items.get(key.as_bytes()) {
                        out.extend_from_slice(
                            format!("VALUE {key} {} {}\r\n", entry.flags, entry.data.len())
                                .as_bytes(),
                        );
                        out.extend_from_slice(&entry.data);
                        out.extend_from_slice(b"\r\n");
                    }
                }
                out.extend_from_slice(b"END\r\n");
                out
            }
            ["delete", key] => match shared.items().remove(key.as_bytes()) {
                Some(_) => b"DELETED\r\n".to_vec(),
                None => b"NOT_FOUND\r\n".to_vec(),
            },
            [cmd @ ("incr" | "decr"), key, delta] => {
                let delta: u64 = delta.parse().unwrap_or(0);
                match counter(shared, key.as_bytes(), *cmd == "incr", delta) {
                    Ok(value) => format!("{value}\r\n").into_bytes(),
                    Err(Status::KeyNotFound) => b"NOT_FOUND\r\n".to_vec(),
                    Err(_) => {
                        b"CLIENT_ERROR cannot increment or decrement non-numeric value\r\n"
                            .to_vec()
                    }
                }
            }
            ["flush_all"] => {
                shared.items().clear();
                b"OK\r\n".to_vec()
            }
            ["version"] => b"VERSION 1.6.0-mock\r\n".to_vec(),
            ["quit"] => return Ok(()),
            _ => b"ERROR\r\n".to_vec(),
        };
        writer.write_all(&reply)?;
    }
}

fn check_text_auth(shared: &Shared, data: &[u8]) -> bool {
    let Some((user, pass)) = &shared.options.credentials else {
        return true;
    };
    data == format!("{user} {pass}").as_bytes()
}

fn text_store(
    shared: &Shared,
    cmd: &str,
    key: &str,
    flags: &str,
    exptime: &str,
    data: Vec<u8>,
) -> Vec<u8> {
    let entry = Entry::new(
        flags.parse().unwrap_or(0),
        exptime.parse().unwrap_or(0),
        data,
    );
    let command = match cmd {
        "add" => Opcode::Add,
        "replace" => Opcode::Replace,
        _ => Opcode::Set,
    };
    match store(shared, command, key.as_bytes(), entry) {
        Status::NoError => b"STORED\r\n".to_vec(),
        Status::ValueTooLarge => b"SERVER_ERROR object too large for cache\r\n".to_vec(),
        _ => b"NOT_STORED\r\n".to_vec(),
    }
}

// ── Shared semantics ────────────────────────────────────────────────

fn store(shared: &Shared, command: Opcode, key: &[u8], entry: Entry) -> Status {
    let mut items = shared.items();
    if entry.data.len() > shared.options.max_item_size {
        // memcached drops the old item so readers do not see stale data
        if command == Opcode::Set {
            items.remove(key);
        }
        return Status::ValueTooLarge;
    }
    let exists = items.contains_key(key);
    match command {
        Opcode::Add if exists => Status::KeyExists,
        Opcode::Replace if !exists => Status::KeyNotFound,
        _ => {
            items.insert(key.to_vec(), entry);
            Status::NoError
        }
    }
}

fn counter(shared: &Shared, key: &[u8], increment: bool, delta: u64) -> Result<u64, Status> {
    let mut items = shared.items();
    let entry = items.get_mut(key).ok_or(Status::KeyNotFound)?;
    let current: u64 = std::str::from_utf8(&entry.data)
        .ok()
        .and_then(|s| s.trim_end().parse().ok())
        .ok_or(Status::NonNumericValue)?;
    let next = if increment {
        current.wrapping_add(delta)
    } else {
        current.saturating_sub(delta)
    };
    let mut data = next.to_string().into_bytes();
    if !increment && data.len() < entry.data.len() {
        // memcached decrements in place and pads with spaces
        data.resize(entry.data.len(), b' ');
    }
    entry.data = data;
    Ok(next)
}

// ── Binary protocol ─────────────────────────────────────────────────

fn serve_binary(
    mut reader: BufReader<TcpStream>,
    mut writer: TcpStream,
    shared: &Shared,
) -> io::Result<()> {
    let mut authenticated = shared.options.credentials.is_none();
    let mut header_buf = [0u8; HEADER_SIZE];
    loop {
        match reader.read_exact(&mut header_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
        shared.commands.fetch_add(1, Ordering::SeqCst);
        let header = RequestHeader::parse(&header_buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let mut body = vec![0u8; header.total_body_length as usize];
        reader.read_exact(&mut body)?;

        let extras_end = header.extras_length as usize;
        let key_end = extras_end + header.key_length as usize;
        let extras = &body[..extras_end];
        let key = &body[extras_end..key_end];
        let value = &body[key_end..];
        let opaque = header.opaque;
        let opcode = header.opcode;

        let mut out = BytesMut::new();
        if !authenticated {
            match opcode {
                Opcode::SaslListMechs => {
                    BinaryResponse::encode_status(&mut out, opcode, opaque, Status::NoError, b"PLAIN");
                }
                Opcode::SaslAuth => {
                    authenticated = key == b"PLAIN" && check_sasl_plain(shared, value);
                    let status = if authenticated {
                        Status::NoError
                    } else {
                        Status::AuthError
                    };
                    BinaryResponse::encode_status(&mut out, opcode, opaque, status, b"");
                }
                _ => {
                    BinaryResponse::encode_status(
                        &mut out,
                        opcode,
                        opaque,
                        Status::AuthRequired,
                        b"",
                    );
                }
            }
            writer.write_all(&out)?;
            continue;
        }

        match opcode {
            Opcode::Get | Opcode::GetQ | Opcode::GetK | Opcode::GetKQ => {
                let with_key = matches!(opcode, Opcode::GetK | Opcode::GetKQ);
                match shared.items().get(key) {
                    Some(entry) => {
                        BinaryResponse::encode_value(
                            &mut out,
                            opcode,
                            opaque,
                            entry.flags,
                            with_key.then_some(key),
                            &entry.data,
                        );
                    }
                    None if opcode.is_quiet() => {}
                    None => {
                        BinaryResponse::encode_status(
                            &mut out,
                            opcode,
                            opaque,
                            Status::KeyNotFound,
                            b"Not found",
                        );
                    }
                }
            }
            Opcode::Set
            | Opcode::Add
            | Opcode::Replace
            | Opcode::SetQ
            | Opcode::AddQ
            | Opcode::ReplaceQ => {
                let entry = Entry::new(
                    u32::from_be_bytes(extras[..4].try_into().unwrap()),
                    u32::from_be_bytes(extras[4..8].try_into().unwrap()),
                    value.to_vec(),
                );
                let status = store(shared, opcode.to_non_quiet(), key, entry);
                let message: &[u8] = match status {
                    Status::NoError => b"",
                    Status::ValueTooLarge => b"Too large.",
                    _ => b"Not stored.",
                };
                if !(opcode.is_quiet() && status == Status::NoError) {
                    BinaryResponse::encode_status(&mut out, opcode, opaque, status, message);
                }
            }
            Opcode::Delete | Opcode::DeleteQ => {
                let status = match shared.items().remove(key) {
                    Some(_) => Status::NoError,
                    None => Status::KeyNotFound,
                };
                if !(opcode.is_quiet() && status == Status::NoError) {
                    BinaryResponse::encode_status(&mut out, opcode, opaque, status, b"");
                }
            }
            Opcode::Increment | Opcode::Decrement => {
                let delta = u64::from_be_bytes(extras[..8].try_into().unwrap());
                let expiration = u32::from_be_bytes(extras[16..20].try_into().unwrap());
                assert_eq!(expiration, COUNTER_NO_CREATE, "client must not auto-create");
                match counter(shared, key, opcode == Opcode::Increment, delta) {
                    Ok(value) => {
                        BinaryResponse::encode_counter(&mut out, opcode, opaque, value);
                    }
                    Err(status) => {
                        BinaryResponse::encode_status(&mut out, opcode, opaque, status, b"");
                    }
                }
            }
            Opcode::Flush => {
                shared.items().clear();
                BinaryResponse::encode_status(&mut out, opcode, opaque, Status::NoError, b"");
            }
            Opcode::Noop => {
                BinaryResponse::encode_status(&mut out, opcode, opaque, Status::NoError, b"");
            }
            Opcode::Version => {
                BinaryResponse::encode_version(&mut out, opaque, b"1.6.0-mock");
            }
            Opcode::Quit => return Ok(()),
            _ => {
                BinaryResponse::encode_status(
                    &mut out,
                    opcode,
                    opaque,
                    Status::UnknownCommand,
                    b"",
                );
            }
        }
        if !out.is_empty() {
            writer.write_all(&out)?;
        }
    }
}

fn check_sasl_plain(shared: &Shared, payload: &[u8]) -> bool {
    let Some((user, pass)) = &shared.options.credentials else {
        return true;
    };
    let mut expected = vec![0u8];
    expected.extend_from_slice(user.as_bytes());
    expected.push(0);
    expected.extend_from_slice(pass.as_bytes());
    payload == expected
}
