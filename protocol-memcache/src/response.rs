//! Text protocol replies.
//!
//! Every reply is one CRLF-terminated line, except retrievals, which are a
//! run of `VALUE <key> <flags> <bytes> [<cas>]` headers each followed by a
//! data block, closed by `END`.

use std::str::FromStr;

use crate::DEFAULT_MAX_VALUE_LEN;
use crate::error::ParseError;

/// One item of a retrieval reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub key: Vec<u8>,
    pub flags: u32,
    pub data: Vec<u8>,
    /// Only sent in reply to `gets`.
    pub cas: Option<u64>,
}

/// A parsed text reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Retrieval reply; empty when every key missed.
    Items(Vec<Item>),
    Stored,
    NotStored,
    Deleted,
    NotFound,
    Exists,
    Ok,
    /// New counter value after INCR/DECR.
    Numeric(u64),
    Version(Vec<u8>),
    /// Unknown command.
    Error,
    ClientError(Vec<u8>),
    ServerError(Vec<u8>),
}

impl Response {
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Response::Error | Response::ClientError(_) | Response::ServerError(_)
        )
    }

    #[inline]
    pub fn is_miss(&self) -> bool {
        match self {
            Response::Items(items) => items.is_empty(),
            Response::NotFound => true,
            _ => false,
        }
    }

    /// Parse one reply from the front of `data`, returning it with the number
    /// of bytes it occupied.
    #[inline]
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ParseError> {
        Self::parse_with_limit(data, DEFAULT_MAX_VALUE_LEN)
    }

    /// Like [`Response::parse`], rejecting data blocks over `max_value_len`
    /// as soon as their header is seen.
    pub fn parse_with_limit(
        data: &[u8],
        max_value_len: usize,
    ) -> Result<(Self, usize), ParseError> {
        let mut cursor = Cursor { data, pos: 0 };
        let first = cursor.peek_line()?;

        if first.starts_with(b"VALUE ") {
            let items = parse_items(&mut cursor, max_value_len)?;
            return Ok((Response::Items(items), cursor.pos));
        }

        let line = cursor.line()?;
        let response = match line {
            b"STORED" => Response::Stored,
            b"NOT_STORED" => Response::NotStored,
            b"DELETED" => Response::Deleted,
            b"NOT_FOUND" => Response::NotFound,
            b"EXISTS" => Response::Exists,
            b"END" => Response::Items(Vec::new()),
            b"OK" => Response::Ok,
            b"ERROR" => Response::Error,
            _ => {
                if let Some(msg) = line.strip_prefix(b"CLIENT_ERROR") {
                    Response::ClientError(trim_message(msg))
                } else if let Some(msg) = line.strip_prefix(b"SERVER_ERROR") {
                    Response::ServerError(trim_message(msg))
                } else if let Some(version) = line.strip_prefix(b"VERSION ") {
                    Response::Version(version.to_vec())
                } else {
                    Response::Numeric(parse_counter(line)?)
                }
            }
        };
        Ok((response, cursor.pos))
    }
}

/// Reads CRLF-terminated lines and raw blocks off a buffer.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek_line(&self) -> Result<&'a [u8], ParseError> {
        let data: &'a [u8] = self.data;
        let rest = &data[self.pos..];
        memchr::memmem::find(rest, b"\r\n")
            .map(|end| &rest[..end])
            .ok_or(ParseError::Incomplete)
    }

    fn line(&mut self) -> Result<&'a [u8], ParseError> {
        let line = self.peek_line()?;
        self.pos += line.len() + 2;
        Ok(line)
    }

    /// `len` bytes of data followed by CRLF.
    fn block(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        let data: &'a [u8] = self.data;
        let rest = &data[self.pos..];
        if rest.len() < len + 2 {
            return Err(ParseError::Incomplete);
        }
        if &rest[len..len + 2] != b"\r\n" {
            return Err(ParseError::Protocol("missing data terminator"));
        }
        self.pos += len + 2;
        Ok(&rest[..len])
    }
}

fn parse_items(cursor: &mut Cursor<'_>, max_value_len: usize) -> Result<Vec<Item>, ParseError> {
    let mut items = Vec::new();
    loop {
        let line = cursor.line()?;
        if line == b"END" {
            return Ok(items);
        }
        let Some(header) = line.strip_prefix(b"VALUE ") else {
            return Err(ParseError::Protocol("expected VALUE or END"));
        };

        let mut fields = header.split(|&b| b == b' ').filter(|f| !f.is_empty());
        let (Some(key), Some(flags), Some(len)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(ParseError::Protocol("invalid VALUE line"));
        };
        let cas = fields.next().map(parse_num::<u64>).transpose()?;
        if fields.next().is_some() {
            return Err(ParseError::Protocol("invalid VALUE line"));
        }

        let flags = parse_num::<u32>(flags)?;
        let len = parse_num::<usize>(len)?;
        if len > max_value_len {
            return Err(ParseError::ValueTooLarge {
                len,
                limit: max_value_len,
            });
        }

        let data = cursor.block(len)?;
        items.push(Item {
            key: key.to_vec(),
            flags,
            data: data.to_vec(),
            cas,
        });
    }
}

fn trim_message(msg: &[u8]) -> Vec<u8> {
    msg.strip_prefix(b" ").unwrap_or(msg).to_vec()
}

/// INCR/DECR reply. Some servers pad decremented values with spaces.
fn parse_counter(line: &[u8]) -> Result<u64, ParseError> {
    let end = line.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    let digits = &line[..end];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::Protocol("unknown response"));
    }
    parse_num(digits)
}

fn parse_num<T: FromStr>(field: &[u8]) -> Result<T, ParseError> {
    std::str::from_utf8(field)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ParseError::InvalidNumber)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(wire: &[u8]) -> Vec<Item> {
        match Response::parse(wire).unwrap() {
            (Response::Items(items), consumed) => {
                assert_eq!(consumed, wire.len());
                items
            }
            (other, _) => panic!("expected items, got {other:?}"),
        }
    }

    #[test]
    fn status_lines() {
        let cases: &[(&[u8], Response)] = &[
            (b"STORED\r\n", Response::Stored),
            (b"NOT_STORED\r\n", Response::NotStored),
            (b"DELETED\r\n", Response::Deleted),
            (b"NOT_FOUND\r\n", Response::NotFound),
            (b"EXISTS\r\n", Response::Exists),
            (b"OK\r\n", Response::Ok),
            (b"ERROR\r\n", Response::Error),
        ];
        for (wire, expected) in cases {
            assert_eq!(Response::parse(wire).unwrap(), (expected.clone(), wire.len()));
        }
    }

    #[test]
    fn all_keys_missed() {
        assert!(items(b"END\r\n").is_empty());
        assert!(Response::Items(Vec::new()).is_miss());
        assert!(Response::NotFound.is_miss());
        assert!(!Response::Stored.is_miss());
    }

    #[test]
    fn multi_get_reply() {
        let got = items(b"VALUE a 0 3\r\nfoo\r\nVALUE b:2 8 0\r\n\r\nVALUE c 1 2 77\r\nhi\r\nEND\r\n");
        assert_eq!(got.len(), 3);
        assert_eq!((got[0].key.as_slice(), got[0].data.as_slice()), (&b"a"[..], &b"foo"[..]));
        assert_eq!(got[1].flags, 8);
        assert!(got[1].data.is_empty());
        assert_eq!(got[2].cas, Some(77));
        assert_eq!(got[0].cas, None);
    }

    #[test]
    fn data_may_contain_crlf() {
        let got = items(b"VALUE k 0 4\r\n\r\n\r\n\r\nEND\r\n");
        assert_eq!(got[0].data, b"\r\n\r\n");
    }

    #[test]
    fn consumes_one_reply_at_a_time() {
        let wire = b"DELETED\r\nVALUE k 0 1\r\nx\r\nEND\r\n";
        let (first, used) = Response::parse(wire).unwrap();
        assert_eq!(first, Response::Deleted);
        let (second, rest) = Response::parse(&wire[used..]).unwrap();
        assert!(matches!(second, Response::Items(ref v) if v.len() == 1));
        assert_eq!(used + rest, wire.len());
    }

    #[test]
    fn error_lines() {
        let (resp, _) = Response::parse(b"SERVER_ERROR object too large for cache\r\n").unwrap();
        assert!(resp.is_error());
        assert_eq!(resp, Response::ServerError(b"object too large for cache".to_vec()));

        let (resp, _) = Response::parse(b"CLIENT_ERROR bad data chunk\r\n").unwrap();
        assert_eq!(resp, Response::ClientError(b"bad data chunk".to_vec()));

        assert!(Response::Error.is_error());
    }

    #[test]
    fn counters() {
        assert_eq!(Response::parse(b"42\r\n").unwrap(), (Response::Numeric(42), 4));
        assert_eq!(Response::parse(b"9  \r\n").unwrap(), (Response::Numeric(9), 5));
        assert_eq!(
            Response::parse(b"99999999999999999999\r\n"),
            Err(ParseError::InvalidNumber)
        );
        assert_eq!(
            Response::parse(b"   \r\n"),
            Err(ParseError::Protocol("unknown response"))
        );
    }

    #[test]
    fn version() {
        assert_eq!(
            Response::parse(b"VERSION 1.6.21\r\n").unwrap().0,
            Response::Version(b"1.6.21".to_vec())
        );
    }

    #[test]
    fn partial_input() {
        for wire in [
            &b"STOR"[..],
            b"VALUE k 0 7\r\nmyva",
            b"VALUE k 0 7\r\nmyvalue\r\n",
            b"VALUE k 0 7\r\nmyvalue\r\nEN",
        ] {
            assert_eq!(Response::parse(wire), Err(ParseError::Incomplete), "{wire:?}");
        }
    }

    #[test]
    fn malformed_replies() {
        assert_eq!(
            Response::parse(b"WHAT\r\n"),
            Err(ParseError::Protocol("unknown response"))
        );
        assert_eq!(
            Response::parse(b"VALUE k 0 2\r\nabcd\r\nEND\r\n"),
            Err(ParseError::Protocol("missing data terminator"))
        );
        assert_eq!(
            Response::parse(b"VALUE k 0 1\r\na\r\nSTORED\r\n"),
            Err(ParseError::Protocol("expected VALUE or END"))
        );
        assert_eq!(
            Response::parse(b"VALUE k\r\n"),
            Err(ParseError::Protocol("invalid VALUE line"))
        );
        assert_eq!(
            Response::parse(b"VALUE k 0 1 2 3\r\n"),
            Err(ParseError::Protocol("invalid VALUE line"))
        );
        assert_eq!(
            Response::parse(b"VALUE k x 1\r\na\r\nEND\r\n"),
            Err(ParseError::InvalidNumber)
        );
    }

    #[test]
    fn oversize_block_rejected_from_header() {
        assert_eq!(
            Response::parse_with_limit(b"VALUE k 0 10\r\n", 4),
            Err(ParseError::ValueTooLarge { len: 10, limit: 4 })
        );
    }
}
