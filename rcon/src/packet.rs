//! Source-RCON framing.
//!
//! ```text
//! | size: i32 LE | id: i32 LE | type: i32 LE | body: ASCII | 0x00 | 0x00 |
//! ```
//!
//! `size` counts every byte after itself, so the smallest valid packet
//! (empty body) has a size of 10.

use std::io::{
    self,
    ErrorKind,
};
use tokio::io::{
    AsyncRead,
    AsyncReadExt as _,
    AsyncWrite,
    AsyncWriteExt as _,
};

pub const SERVERDATA_AUTH: i32 = 3;
pub const SERVERDATA_AUTH_RESPONSE: i32 = 2;
pub const SERVERDATA_EXECCOMMAND: i32 = 2;
pub const SERVERDATA_RESPONSE_VALUE: i32 = 0;

/// Id the server answers an auth request with when the password is wrong.
pub const AUTH_FAILED_ID: i32 = -1;

const MIN_PACKET_SIZE: usize = 10;
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub packet_type: i32,
    pub body: String,
}

impl Packet {
    pub fn new(id: i32, packet_type: i32, body: impl Into<String>) -> Self {
        Self {
            id,
            packet_type,
            body: body.into(),
        }
    }

    pub fn auth(id: i32, password: &str) -> Self {
        Self::new(id, SERVERDATA_AUTH, password)
    }

    pub fn command(id: i32, command: &str) -> Self {
        Self::new(id, SERVERDATA_EXECCOMMAND, command)
    }

    pub fn encode(&self) -> Vec<u8> {
        let body = self.body.as_bytes();
        let size = (body.len() + MIN_PACKET_SIZE) as i32;
        let mut buf = Vec::with_capacity(body.len() + MIN_PACKET_SIZE + 4);
        buf.extend_from_slice(&size.to_le_bytes());
        buf.extend_from_slice(&self.id.to_le_bytes());
        buf.extend_from_slice(&self.packet_type.to_le_bytes());
        buf.extend_from_slice(body);
        buf.extend_from_slice(&[0, 0]);
        buf
    }

    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode()).await?;
        writer.flush().await
    }

    /// Reads exactly one packet. Framing violations surface as
    /// [`ErrorKind::InvalidData`], everything else is a transport error.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Self> {
        let size = reader.read_i32_le().await?;
        let size = usize::try_from(size).unwrap_or(0);
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&size) {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                format!("packet size {size} outside {MIN_PACKET_SIZE}..={MAX_PACKET_SIZE}"),
            ));
        }

        let mut payload = vec![0u8; size];
        reader.read_exact(&mut payload).await?;
        Self::decode_payload(&payload)
    }

    fn decode_payload(payload: &[u8]) -> io::Result<Self> {
        let (header, rest) = payload.split_at(8);
        let id = i32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let packet_type = i32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let Some(body) = rest.strip_suffix(&[0, 0]) else {
            return Err(io::Error::new(ErrorKind::InvalidData, "packet is missing its terminators"));
        };

        Ok(Self {
            id,
            packet_type,
            body: String::from_utf8_lossy(body).into_owned(),
        })
    }
}
