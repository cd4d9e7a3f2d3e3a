//! Frame Codec
//!
//! Turns a `(MessageType, Payload)` pair into bytes and back. Decoding is strict:
//! a bad magic, an unsupported version, an unknown type code, an oversized or
//! short payload, or a body that does not inflate into a JSON object all raise
//! [`ClusterError::Protocol`].

use super::types::{HEADER_LEN, MAGIC, MAX_PAYLOAD_LEN, MessageType, VERSION};
use crate::error::{ClusterError, Result};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::io::{self, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// String-keyed body of a frame.
pub type Payload = serde_json::Map<String, Value>;

/// One complete protocol message.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Payload,
}

impl Frame {
    pub fn new(message_type: MessageType, payload: Payload) -> Self {
        Self {
            message_type,
            payload,
        }
    }

    /// Builds a frame from any body that serializes to a JSON object.
    pub fn from_message<T: Serialize>(message_type: MessageType, message: &T) -> Result<Self> {
        match serde_json::to_value(message) {
            Ok(Value::Object(payload)) => Ok(Self::new(message_type, payload)),
            Ok(other) => Err(ClusterError::Protocol(format!(
                "{message_type} body must be a map, got {other}"
            ))),
            Err(e) => Err(ClusterError::Protocol(format!(
                "failed to serialize {message_type} body: {e}"
            ))),
        }
    }

    /// Reads the payload back into a typed body.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.payload.clone())).map_err(|e| {
            ClusterError::Protocol(format!("malformed {} body: {e}", self.message_type))
        })
    }

    /// An ERROR frame with a single `error` field.
    pub fn error(message: impl Into<String>) -> Self {
        let mut payload = Payload::new();
        payload.insert("error".to_string(), Value::String(message.into()));
        Self::new(MessageType::Error, payload)
    }
}

/// Parsed fixed-size header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub message_type: MessageType,
    pub payload_len: usize,
}

pub fn parse_header(bytes: &[u8; HEADER_LEN]) -> Result<Header> {
    if bytes[0..4] != MAGIC {
        return Err(ClusterError::Protocol(format!(
            "invalid magic bytes {:02x?}",
            &bytes[0..4]
        )));
    }

    if bytes[4] != VERSION {
        return Err(ClusterError::Protocol(format!(
            "unsupported protocol version {}",
            bytes[4]
        )));
    }

    let message_type = MessageType::try_from(bytes[5])?;
    let payload_len = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;

    if payload_len > MAX_PAYLOAD_LEN {
        return Err(ClusterError::Protocol(format!(
            "declared payload of {payload_len} bytes exceeds limit of {MAX_PAYLOAD_LEN}"
        )));
    }

    Ok(Header {
        message_type,
        payload_len,
    })
}

pub fn encode(message_type: MessageType, payload: &Payload) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(payload).map_err(|e| {
        ClusterError::Protocol(format!("failed to serialize {message_type} payload: {e}"))
    })?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    if compressed.len() > MAX_PAYLOAD_LEN {
        return Err(ClusterError::Protocol(format!(
            "compressed payload of {} bytes exceeds limit of {MAX_PAYLOAD_LEN}",
            compressed.len()
        )));
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + compressed.len());
    frame.extend_from_slice(&MAGIC);
    frame.push(VERSION);
    frame.push(message_type.code());
    frame.extend_from_slice(&(compressed.len() as u32).to_be_bytes());
    frame.extend_from_slice(&compressed);

    Ok(frame)
}

pub fn decode(data: &[u8]) -> Result<Frame> {
    let header_bytes: &[u8; HEADER_LEN] = data
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or_else(|| {
            ClusterError::Protocol(format!(
                "frame too short: {} bytes, header needs {HEADER_LEN}",
                data.len()
            ))
        })?;

    let header = parse_header(header_bytes)?;

    let body = data
        .get(HEADER_LEN..HEADER_LEN + header.payload_len)
        .ok_or_else(|| {
            ClusterError::Protocol(format!(
                "incomplete frame: declared {} payload bytes, got {}",
                header.payload_len,
                data.len() - HEADER_LEN
            ))
        })?;

    Ok(Frame::new(header.message_type, decode_payload(body)?))
}

fn decode_payload(body: &[u8]) -> Result<Payload> {
    let mut inflated = Vec::new();
    ZlibDecoder::new(body)
        .take(MAX_PAYLOAD_LEN as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| ClusterError::Protocol(format!("payload decompression failed: {e}")))?;

    if inflated.len() > MAX_PAYLOAD_LEN {
        return Err(ClusterError::Protocol(
            "decompressed payload exceeds frame limit".to_string(),
        ));
    }

    serde_json::from_slice::<Payload>(&inflated)
        .map_err(|e| ClusterError::Protocol(format!("payload is not a JSON map: {e}")))
}

/// Reads exactly one frame: the fixed header first, then the declared payload.
///
/// `read_exact` keeps reading until each buffer is full, so frames split across
/// several TCP segments are reassembled. EOF before either part is complete is a
/// protocol error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| truncated(e, "header"))?;

    let header = parse_header(&header)?;

    let mut body = vec![0u8; header.payload_len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| truncated(e, "payload"))?;

    Ok(Frame::new(header.message_type, decode_payload(&body)?))
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode(frame.message_type, &frame.payload)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

fn truncated(err: io::Error, part: &str) -> ClusterError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        ClusterError::Protocol(format!("connection closed mid-{part}"))
    } else {
        ClusterError::Io(err)
    }
}
