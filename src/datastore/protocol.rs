//! protocol.rs
//! Session wire format between DataStore and TagClient.
//!
//! Every message is one frame: 4-byte big-endian length followed by a JSON body.
//! Requests are tagged by `op`, responses by `status`.
//! Tag values are finite `f64`s; JSON has no NaN or infinity, so writers refuse them.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::datastore::namespace::Namespace;

const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Read { tag: String },
    Write { tag: String, values: Vec<f64> },
    WriteAt { tag: String, index: usize, value: f64 },
    Browse,
    Namespace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    UnknownTag,
    LengthMismatch,
    NotWritable,
    BadAddress,
    BadRequest,
    IndexOutOfRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagInfo {
    pub address: String,
    pub len: usize,
    pub writable: bool,
    pub writes: u64,
    /// Milliseconds since the last write (or since the store was built).
    pub age_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Values { values: Vec<f64> },
    Written,
    Tags { tags: Vec<TagInfo> },
    Namespace { namespace: Namespace },
    Error { code: ErrorCode, message: String },
}

impl Response {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }
}

pub fn write_frame<W: Write>(mut stream: W, payload: &[u8]) -> io::Result<()> {
    if payload.len() > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("frame too large: {} bytes", payload.len()),
        ));
    }
    let len = payload.len() as u32;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(payload)?;
    stream.flush()
}

pub fn read_frame<R: Read>(mut stream: R) -> io::Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;

    if len == 0 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "empty frame"));
    }
    if len > MAX_FRAME_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", len),
        ));
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

pub fn send<W: Write, T: Serialize>(stream: W, message: &T) -> io::Result<()> {
    let json = serde_json::to_vec(message).map_err(io::Error::other)?;
    write_frame(stream, &json)
}

pub fn receive<R: Read, T: DeserializeOwned>(stream: R) -> io::Result<T> {
    let payload = read_frame(stream)?;
    serde_json::from_slice(&payload).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
