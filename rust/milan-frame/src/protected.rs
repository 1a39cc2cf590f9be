//! Protected stream protocol: `varint_length ‖ payload ‖ 8_byte_mac_le`.
//!
//! The default framing over reliable byte streams. The length prefix is
//! a varint capped at ten bytes; a clean EOF at a frame boundary is
//! reported as `eof`, anything torn mid-frame as `data_mismatch`.

use bytes::Bytes;
use milan_wire::{Error, Result, varint};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::DEFAULT_MAX_PACKET_SIZE;
use crate::mac::Mac;

/// Result of reading a length prefix from the stream.
enum VarintRead {
    Value(u64),
    /// Stream ended cleanly before any prefix byte: graceful close.
    CleanEof,
}

async fn read_varint<R: AsyncRead + Unpin>(reader: &mut R) -> Result<VarintRead> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    for i in 0..varint::MAX_VARINT_LEN {
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                if i == 0 {
                    return Ok(VarintRead::CleanEof);
                }
                return Err(Error::data_mismatch(
                    "stream ended before the length prefix terminated",
                ));
            }
            Err(e) => return Err(e.into()),
        }

        let group = (byte[0] & 0x7f) as u64;
        if shift == 63 && group > 1 {
            return Err(Error::data_mismatch("length prefix overflows 64 bits"));
        }
        value |= group << shift;
        if byte[0] & 0x80 == 0 {
            return Ok(VarintRead::Value(value));
        }
        shift += 7;
    }

    Err(Error::data_mismatch("length prefix exceeded 10 bytes"))
}

/// Writing half of the protected stream protocol.
pub struct ProtectedWriter<W> {
    io: W,
    mac: Mac,
    max_packet_size: usize,
}

impl<W: AsyncWrite + Unpin> ProtectedWriter<W> {
    pub fn new(io: W, mac: Mac) -> Self {
        Self::with_max_packet_size(io, mac, DEFAULT_MAX_PACKET_SIZE)
    }

    pub fn with_max_packet_size(io: W, mac: Mac, max_packet_size: usize) -> Self {
        ProtectedWriter {
            io,
            mac,
            max_packet_size,
        }
    }

    /// Frame and send one payload.
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_packet_size {
            return Err(Error::out_of_range(format!(
                "payload of {} bytes exceeds the {} byte packet cap",
                payload.len(),
                self.max_packet_size
            )));
        }

        let mut prefix = [0u8; varint::MAX_VARINT_LEN];
        let prefix_len = varint::encode(payload.len() as u64, &mut prefix);
        let tag = self.mac.compute(payload).to_le_bytes();

        self.io.write_all(&prefix[..prefix_len]).await?;
        self.io.write_all(payload).await?;
        self.io.write_all(&tag).await?;
        self.io.flush().await?;
        Ok(())
    }
}

/// Reading half of the protected stream protocol.
pub struct ProtectedReader<R> {
    io: R,
    mac: Mac,
    max_packet_size: usize,
}

impl<R: AsyncRead + Unpin> ProtectedReader<R> {
    pub fn new(io: R, mac: Mac) -> Self {
        Self::with_max_packet_size(io, mac, DEFAULT_MAX_PACKET_SIZE)
    }

    pub fn with_max_packet_size(io: R, mac: Mac, max_packet_size: usize) -> Self {
        ProtectedReader {
            io,
            mac,
            max_packet_size,
        }
    }

    /// Receive and verify one payload.
    pub async fn recv(&mut self) -> Result<Bytes> {
        let len = match read_varint(&mut self.io).await? {
            VarintRead::Value(len) => len as usize,
            VarintRead::CleanEof => return Err(Error::eof("connection closed")),
        };

        if len > self.max_packet_size {
            return Err(Error::out_of_range(format!(
                "incoming packet of {} bytes exceeds the {} byte cap",
                len, self.max_packet_size
            )));
        }

        let mut payload = vec![0u8; len];
        self.io.read_exact(&mut payload).await.map_err(torn)?;

        let mut tag = [0u8; 8];
        self.io.read_exact(&mut tag).await.map_err(torn)?;
        self.mac.verify(&payload, &tag)?;

        Ok(Bytes::from(payload))
    }
}

fn torn(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::data_mismatch("stream ended inside a frame")
    } else {
        e.into()
    }
}
