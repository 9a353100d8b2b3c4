//! Compressed protocol framing.
//!
//! Once `CLIENT_COMPRESS` is negotiated every write is wrapped in a
//! compressed packet with a 7-byte header: compressed length (3), sequence
//! (1) and uncompressed length (3). An uncompressed length of 0 means the
//! body is sent as-is. The compressed sequence restarts with every command,
//! independently of the inner packet sequence.

#![allow(clippy::cast_possible_truncation)]

use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::protocol::MAX_PACKET_SIZE;

pub const HEADER_SIZE: usize = 7;

/// Bodies shorter than this are not worth compressing.
pub const MIN_COMPRESS_LENGTH: usize = 50;

/// A stream speaking the compressed protocol.
///
/// Writes are buffered until `flush`, which emits one or more compressed
/// packets.
#[derive(Debug)]
pub struct CompressedStream<S> {
    inner: S,
    sequence_id: u8,
    write_buf: Vec<u8>,
    read_buf: Vec<u8>,
    read_pos: usize,
}

impl<S: Read + Write> CompressedStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            sequence_id: 0,
            write_buf: Vec::new(),
            read_buf: Vec::new(),
            read_pos: 0,
        }
    }

    /// Start a new command.
    pub fn reset_sequence(&mut self) {
        self.sequence_id = 0;
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn write_frame(&mut self, body: &[u8]) -> io::Result<()> {
        let (payload, uncompressed_len) = if body.len() < MIN_COMPRESS_LENGTH {
            (body.to_vec(), 0)
        } else {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(body)?;
            let compressed = encoder.finish()?;
            if compressed.len() < body.len() {
                (compressed, body.len())
            } else {
                (body.to_vec(), 0)
            }
        };

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
        frame.push(self.sequence_id);
        frame.extend_from_slice(&(uncompressed_len as u32).to_le_bytes()[..3]);
        frame.extend_from_slice(&payload);
        self.sequence_id = self.sequence_id.wrapping_add(1);
        self.inner.write_all(&frame)
    }

    fn fill(&mut self) -> io::Result<bool> {
        let mut header = [0u8; HEADER_SIZE];
        match self.inner.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e),
        }

        let compressed_len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        let uncompressed_len = u32::from_le_bytes([header[4], header[5], header[6], 0]) as usize;
        self.sequence_id = header[3].wrapping_add(1);

        let mut body = vec![0u8; compressed_len];
        self.inner.read_exact(&mut body)?;

        let data = if uncompressed_len == 0 {
            body
        } else {
            let mut out = Vec::with_capacity(uncompressed_len);
            ZlibDecoder::new(body.as_slice()).read_to_end(&mut out)?;
            if out.len() != uncompressed_len {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "compressed packet inflated to {} bytes, header said {}",
                        out.len(),
                        uncompressed_len
                    ),
                ));
            }
            out
        };

        self.read_buf.drain(..self.read_pos);
        self.read_pos = 0;
        self.read_buf.extend_from_slice(&data);
        Ok(true)
    }
}

impl<S: Read + Write> Read for CompressedStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.read_pos >= self.read_buf.len() {
            if !self.fill()? {
                return Ok(0);
            }
        }
        let available = &self.read_buf[self.read_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.read_pos += n;
        Ok(n)
    }
}

impl<S: Read + Write> Write for CompressedStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let pending = std::mem::take(&mut self.write_buf);
        for chunk in pending.chunks(MAX_PACKET_SIZE) {
            self.write_frame(chunk)?;
        }
        self.inner.flush()
    }
}
