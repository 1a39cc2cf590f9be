//! Serial-line protocol for character devices.
//!
//! Each frame is `cobs(payload ‖ mac_le) ‖ 0x00`. The zero terminator is
//! the only zero byte on the line, so a receiver can resynchronize after
//! corruption by skipping to the next delimiter.

use bytes::Bytes;
use milan_wire::{Error, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::DEFAULT_MAX_PACKET_SIZE;
use crate::cobs;
use crate::mac::Mac;

/// Writing half of the serial-line protocol.
pub struct SerialLineWriter<W> {
    io: W,
    mac: Mac,
    max_packet_size: usize,
}

impl<W: AsyncWrite + Unpin> SerialLineWriter<W> {
    pub fn new(io: W, mac: Mac) -> Self {
        Self::with_max_packet_size(io, mac, DEFAULT_MAX_PACKET_SIZE)
    }

    pub fn with_max_packet_size(io: W, mac: Mac, max_packet_size: usize) -> Self {
        SerialLineWriter {
            io,
            mac,
            max_packet_size,
        }
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.max_packet_size {
            return Err(Error::out_of_range(format!(
                "payload of {} bytes exceeds the {} byte packet cap",
                payload.len(),
                self.max_packet_size
            )));
        }

        let mut sealed = Vec::with_capacity(payload.len() + 8);
        sealed.extend_from_slice(payload);
        sealed.extend_from_slice(&self.mac.compute(payload).to_le_bytes());

        let stuffed = cobs::encode(&sealed);
        self.io.write_all(&stuffed).await?;
        self.io.write_all(&[0]).await?;
        self.io.flush().await?;
        Ok(())
    }
}

/// Reading half of the serial-line protocol.
pub struct SerialLineReader<R> {
    io: BufReader<R>,
    mac: Mac,
    max_packet_size: usize,
    scratch: Vec<u8>,
}

impl<R: AsyncRead + Unpin> SerialLineReader<R> {
    pub fn new(io: R, mac: Mac) -> Self {
        Self::with_max_packet_size(io, mac, DEFAULT_MAX_PACKET_SIZE)
    }

    pub fn with_max_packet_size(io: R, mac: Mac, max_packet_size: usize) -> Self {
        SerialLineReader {
            io: BufReader::new(io),
            mac,
            max_packet_size,
            scratch: Vec::new(),
        }
    }

    pub async fn recv(&mut self) -> Result<Bytes> {
        self.scratch.clear();
        let n = self.io.read_until(0, &mut self.scratch).await?;
        if n == 0 {
            return Err(Error::eof("connection closed"));
        }
        if self.scratch.last() != Some(&0) {
            return Err(Error::data_mismatch("stream ended inside a frame"));
        }
        self.scratch.pop();

        // COBS inflates by at most one byte per 254, so this bound also
        // caps the decoded size.
        if self.scratch.len() > self.max_packet_size + self.max_packet_size / 254 + 10 {
            return Err(Error::out_of_range("incoming frame exceeds the packet cap"));
        }

        let mut sealed = cobs::decode(&self.scratch)?;
        if sealed.len() < 8 {
            return Err(Error::data_mismatch("frame too short for its mac"));
        }
        let tag_start = sealed.len() - 8;
        let mut tag = [0u8; 8];
        tag.copy_from_slice(&sealed[tag_start..]);
        sealed.truncate(tag_start);
        self.mac.verify(&sealed, &tag)?;

        Ok(Bytes::from(sealed))
    }
}
