//! Discovery probe: learn a remote server's protocol version before a worker
//! is launched against it.
//!
//! The default probe speaks the Java-edition status handshake:
//!
//! ```text
//! C→S  [len][0x00][varint protocol=-1][string host][u16 port][varint next=1]
//! C→S  [len][0x00]
//! S→C  [len][0x00][string json]   json.version.protocol is the answer
//! ```

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Upper bound on a status response frame.
const MAX_FRAME_LEN: i32 = 1 << 20;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connection failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed status response: {0}")]
    Malformed(String),
}

/// Bounded-time status query against a remote target.
pub trait DiscoveryProbe: Send + Sync + 'static {
    /// Resolve the protocol version number the server reports.
    fn probe(&self, host: &str, port: u16) -> BoxFuture<'static, Result<i32, ProbeError>>;
}

/// Java-edition server list ping.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatusPingProbe;

impl DiscoveryProbe for StatusPingProbe {
    fn probe(&self, host: &str, port: u16) -> BoxFuture<'static, Result<i32, ProbeError>> {
        let host = host.to_string();
        async move { status_ping(&host, port).await }.boxed()
    }
}

/// Run the status handshake and return `version.protocol`.
pub async fn status_ping(host: &str, port: u16) -> Result<i32, ProbeError> {
    let mut stream = TcpStream::connect((host, port))
        .await
        .map_err(ProbeError::Connect)?;

    let mut handshake = Vec::new();
    write_varint(&mut handshake, 0x00);
    write_varint(&mut handshake, -1);
    write_string(&mut handshake, host);
    handshake.extend_from_slice(&port.to_be_bytes());
    write_varint(&mut handshake, 1);

    stream.write_all(&frame(&handshake)).await?;
    stream.write_all(&frame(&[0x00])).await?;
    stream.flush().await?;

    let body = read_frame(&mut stream).await?;
    let mut cursor = body.as_slice();
    let packet_id = decode_varint(&mut cursor)?;
    if packet_id != 0x00 {
        return Err(ProbeError::Malformed(format!("unexpected packet id {:#04x}", packet_id)));
    }
    let json = decode_string(&mut cursor)?;
    parse_protocol(&json)
}

/// Extract `version.protocol` from a status JSON document.
pub fn parse_protocol(json: &str) -> Result<i32, ProbeError> {
    #[derive(Deserialize)]
    struct Status {
        version: Version,
    }
    #[derive(Deserialize)]
    struct Version {
        protocol: i32,
    }

    serde_json::from_str::<Status>(json)
        .map(|status| status.version.protocol)
        .map_err(|e| ProbeError::Malformed(e.to_string()))
}

pub(crate) fn write_varint(buf: &mut Vec<u8>, value: i32) {
    let mut value = value as u32;
    loop {
        if value & !0x7f == 0 {
            buf.push(value as u8);
            return;
        }
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
}

pub(crate) fn write_string(buf: &mut Vec<u8>, value: &str) {
    write_varint(buf, value.len() as i32);
    buf.extend_from_slice(value.as_bytes());
}

/// Prefix `payload` with its VarInt length.
pub(crate) fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 5);
    write_varint(&mut out, payload.len() as i32);
    out.extend_from_slice(payload);
    out
}

fn decode_varint(cursor: &mut &[u8]) -> Result<i32, ProbeError> {
    let mut result: u32 = 0;
    for shift in 0..5 {
        let (&byte, rest) = cursor
            .split_first()
            .ok_or_else(|| ProbeError::Malformed("truncated varint".into()))?;
        *cursor = rest;
        result |= ((byte & 0x7f) as u32) << (7 * shift);
        if byte & 0x80 == 0 {
            return Ok(result as i32);
        }
    }
    Err(ProbeError::Malformed("varint too long".into()))
}

fn decode_string(cursor: &mut &[u8]) -> Result<String, ProbeError> {
    let len = decode_varint(cursor)?;
    if len < 0 || len as usize > cursor.len() {
        return Err(ProbeError::Malformed(format!("string length {} out of range", len)));
    }
    let (bytes, rest) = cursor.split_at(len as usize);
    *cursor = rest;
    String::from_utf8(bytes.to_vec()).map_err(|e| ProbeError::Malformed(e.to_string()))
}

async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32, ProbeError> {
    let mut result: u32 = 0;
    for shift in 0..5 {
        let byte = reader.read_u8().await?;
        result |= ((byte & 0x7f) as u32) << (7 * shift);
        if byte & 0x80 == 0 {
            return Ok(result as i32);
        }
    }
    Err(ProbeError::Malformed("varint too long".into()))
}

pub(crate) async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProbeError> {
    let len = read_varint(reader).await?;
    if len <= 0 || len > MAX_FRAME_LEN {
        return Err(ProbeError::Malformed(format!("frame length {} out of range", len)));
    }
    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(body)
}
