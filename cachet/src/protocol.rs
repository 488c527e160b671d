use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::LengthDelimitedCodec;

// Command type identifiers
pub const CMD_PING: u8 = 0x00;
pub const CMD_SET: u8 = 0x01;
pub const CMD_GET: u8 = 0x02;
pub const CMD_GETS: u8 = 0x03;
pub const CMD_CAS: u8 = 0x04;
pub const CMD_DELETE: u8 = 0x05;

// Response type identifiers
pub const RESP_PONG: u8 = 0x00;
pub const RESP_STORED: u8 = 0x01;
pub const RESP_VALUE: u8 = 0x02;
pub const RESP_NOT_FOUND: u8 = 0x03;
pub const RESP_EXISTS: u8 = 0x04;
pub const RESP_DELETED: u8 = 0x05;
pub const RESP_ERROR: u8 = 0x06;

pub const MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Identifies a request on a pipelined connection; responses echo it back.
pub type RequestId = u32;

/// Length-delimited codec with a 4-byte big-endian length prefix.
/// Client and server must agree on it.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Ping,
    Set { key: Bytes, value: Bytes, ttl_ms: u64 },
    Get { key: Bytes },
    Gets { key: Bytes },
    Cas { key: Bytes, cas: u64, value: Bytes, ttl_ms: u64 },
    Delete { key: Bytes },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Pong,
    Stored,
    Value { value: Bytes, cas: u64 },
    NotFound,
    Exists,
    Deleted,
    Error { msg: String },
}

impl Request {
    /// Encode a Request into Bytes for transmission
    ///
    /// Every frame starts with [cmd: u8][id: u32]. Bodies:
    /// - PING: (none)
    /// - SET: [ttl_ms: u64][key_len: u32][value_len: u32][key bytes][value bytes]
    /// - GET / GETS / DELETE: [key_len: u32][key bytes]
    /// - CAS: [cas: u64][ttl_ms: u64][key_len: u32][value_len: u32][key bytes][value bytes]
    pub fn encode(&self, id: RequestId) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Request::Ping => {
                buf.put_u8(CMD_PING);
                buf.put_u32(id);
            }
            Request::Set { key, value, ttl_ms } => {
                buf.put_u8(CMD_SET);
                buf.put_u32(id);
                buf.put_u64(*ttl_ms);
                put_key_value(&mut buf, key, value);
            }
            Request::Get { key } => {
                buf.put_u8(CMD_GET);
                buf.put_u32(id);
                put_key(&mut buf, key);
            }
            Request::Gets { key } => {
                buf.put_u8(CMD_GETS);
                buf.put_u32(id);
                put_key(&mut buf, key);
            }
            Request::Cas {
                key,
                cas,
                value,
                ttl_ms,
            } => {
                buf.put_u8(CMD_CAS);
                buf.put_u32(id);
                buf.put_u64(*cas);
                buf.put_u64(*ttl_ms);
                put_key_value(&mut buf, key, value);
            }
            Request::Delete { key } => {
                buf.put_u8(CMD_DELETE);
                buf.put_u32(id);
                put_key(&mut buf, key);
            }
        }

        buf.freeze()
    }

    /// Decode a Request from a frame already extracted by LengthDelimitedCodec
    pub fn decode(mut buf: Bytes) -> Result<(RequestId, Self), String> {
        if buf.remaining() < 5 {
            return Err("Invalid request: missing command or id".to_string());
        }

        let cmd = buf.get_u8();
        let id = buf.get_u32();

        let request = match cmd {
            CMD_PING => Request::Ping,
            CMD_SET => {
                let ttl_ms = get_u64(&mut buf, "SET ttl")?;
                let (key, value) = get_key_value(&mut buf, "SET")?;
                Request::Set { key, value, ttl_ms }
            }
            CMD_GET => Request::Get {
                key: get_key(&mut buf, "GET")?,
            },
            CMD_GETS => Request::Gets {
                key: get_key(&mut buf, "GETS")?,
            },
            CMD_CAS => {
                let cas = get_u64(&mut buf, "CAS check value")?;
                let ttl_ms = get_u64(&mut buf, "CAS ttl")?;
                let (key, value) = get_key_value(&mut buf, "CAS")?;
                Request::Cas {
                    key,
                    cas,
                    value,
                    ttl_ms,
                }
            }
            CMD_DELETE => Request::Delete {
                key: get_key(&mut buf, "DELETE")?,
            },
            _ => return Err(format!("Unknown command: 0x{:02X}", cmd)),
        };

        Ok((id, request))
    }
}

impl Response {
    /// Encode a Response into Bytes for transmission
    ///
    /// Every frame starts with [type: u8][id: u32]. Bodies:
    /// - VALUE: [cas: u64][value_len: u32][value bytes]
    /// - ERROR: [msg_len: u32][msg bytes]
    /// - everything else: (none)
    pub fn encode(&self, id: RequestId) -> Bytes {
        let mut buf = BytesMut::new();

        match self {
            Response::Pong => {
                buf.put_u8(RESP_PONG);
                buf.put_u32(id);
            }
            Response::Stored => {
                buf.put_u8(RESP_STORED);
                buf.put_u32(id);
            }
            Response::Value { value, cas } => {
                buf.put_u8(RESP_VALUE);
                buf.put_u32(id);
                buf.put_u64(*cas);
                buf.put_u32(value.len() as u32);
                buf.put_slice(value);
            }
            Response::NotFound => {
                buf.put_u8(RESP_NOT_FOUND);
                buf.put_u32(id);
            }
            Response::Exists => {
                buf.put_u8(RESP_EXISTS);
                buf.put_u32(id);
            }
            Response::Deleted => {
                buf.put_u8(RESP_DELETED);
                buf.put_u32(id);
            }
            Response::Error { msg } => {
                buf.put_u8(RESP_ERROR);
                buf.put_u32(id);
                let msg_bytes = msg.as_bytes();
                buf.put_u32(msg_bytes.len() as u32);
                buf.put_slice(msg_bytes);
            }
        }

        buf.freeze()
    }

    /// Decode a Response from Bytes received from the network
    pub fn decode(mut buf: Bytes) -> Result<(RequestId, Self), String> {
        if buf.remaining() < 5 {
            return Err("Invalid response: missing type or id".to_string());
        }

        let resp_type = buf.get_u8();
        let id = buf.get_u32();

        let response = match resp_type {
            RESP_PONG => Response::Pong,
            RESP_STORED => Response::Stored,
            RESP_VALUE => {
                let cas = get_u64(&mut buf, "VALUE check value")?;
                let value = get_sized(&mut buf, "VALUE")?;
                Response::Value { value, cas }
            }
            RESP_NOT_FOUND => Response::NotFound,
            RESP_EXISTS => Response::Exists,
            RESP_DELETED => Response::Deleted,
            RESP_ERROR => {
                let msg_bytes = get_sized(&mut buf, "ERROR")?;
                let msg = String::from_utf8_lossy(&msg_bytes).to_string();
                Response::Error { msg }
            }
            _ => return Err(format!("Unknown response type: 0x{:02X}", resp_type)),
        };

        Ok((id, response))
    }
}

fn put_key(buf: &mut BytesMut, key: &Bytes) {
    buf.put_u32(key.len() as u32);
    buf.put_slice(key);
}

fn put_key_value(buf: &mut BytesMut, key: &Bytes, value: &Bytes) {
    buf.put_u32(key.len() as u32);
    buf.put_u32(value.len() as u32);
    buf.put_slice(key);
    buf.put_slice(value);
}

fn get_u64(buf: &mut Bytes, what: &str) -> Result<u64, String> {
    if buf.remaining() < 8 {
        return Err(format!("Invalid {}: missing 8 byte field", what));
    }
    Ok(buf.get_u64())
}

/// Reads a [len: u32][bytes] field.
fn get_sized(buf: &mut Bytes, what: &str) -> Result<Bytes, String> {
    if buf.remaining() < 4 {
        return Err(format!("Invalid {}: missing length", what));
    }
    let len = buf.get_u32() as usize;

    if buf.remaining() < len {
        return Err(format!(
            "Invalid {}: expected {} bytes, got {}",
            what,
            len,
            buf.remaining()
        ));
    }

    // zero-copy slice of the frame
    Ok(buf.copy_to_bytes(len))
}

fn get_key(buf: &mut Bytes, what: &str) -> Result<Bytes, String> {
    get_sized(buf, what)
}

fn get_key_value(buf: &mut Bytes, what: &str) -> Result<(Bytes, Bytes), String> {
    if buf.remaining() < 8 {
        return Err(format!("Invalid {}: missing key/value length fields", what));
    }
    let key_len = buf.get_u32() as usize;
    let value_len = buf.get_u32() as usize;

    if buf.remaining() < key_len + value_len {
        return Err(format!(
            "Invalid {}: expected {} bytes, got {}",
            what,
            key_len + value_len,
            buf.remaining()
        ));
    }

    let key = buf.copy_to_bytes(key_len);
    let value = buf.copy_to_bytes(value_len);
    Ok((key, value))
}
