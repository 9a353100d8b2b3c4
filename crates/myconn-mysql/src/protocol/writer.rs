//! Encoding of protocol data types into packet payloads.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::{MAX_PACKET_SIZE, PacketHeader};

/// Growable payload buffer.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buffer: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::with_capacity(128)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16_le(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u24_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes()[..3]);
    }

    pub fn write_u32_le(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64_le(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a length-encoded integer (1, 3, 4 or 9 bytes).
    pub fn write_lenenc_int(&mut self, value: u64) {
        match value {
            0..=250 => self.write_u8(value as u8),
            251..=0xFFFF => {
                self.write_u8(0xFC);
                self.write_u16_le(value as u16);
            }
            0x1_0000..=0xFF_FFFF => {
                self.write_u8(0xFD);
                self.write_u24_le(value as u32);
            }
            _ => {
                self.write_u8(0xFE);
                self.write_u64_le(value);
            }
        }
    }

    pub fn write_lenenc_bytes(&mut self, data: &[u8]) {
        self.write_lenenc_int(data.len() as u64);
        self.buffer.extend_from_slice(data);
    }

    pub fn write_lenenc_string(&mut self, s: &str) {
        self.write_lenenc_bytes(s.as_bytes());
    }

    pub fn write_null_string(&mut self, s: &str) {
        self.buffer.extend_from_slice(s.as_bytes());
        self.buffer.push(0);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn write_zeros(&mut self, count: usize) {
        self.buffer.resize(self.buffer.len() + count, 0);
    }

    /// Frame the buffered payload starting at `sequence_id`.
    pub fn build_packet(&self, sequence_id: u8) -> Vec<u8> {
        frame_payload(&self.buffer, sequence_id).0
    }
}

/// Split `payload` into framed packets.
///
/// Returns the framed bytes and the next sequence id. A payload that is an
/// exact multiple of [`MAX_PACKET_SIZE`] is terminated by an empty packet.
pub fn frame_payload(payload: &[u8], mut sequence_id: u8) -> (Vec<u8>, u8) {
    let mut framed = Vec::with_capacity(payload.len() + PacketHeader::SIZE);
    let mut last_len = 0;

    for chunk in payload.chunks(MAX_PACKET_SIZE) {
        let header = PacketHeader {
            payload_length: chunk.len() as u32,
            sequence_id,
        };
        framed.extend_from_slice(&header.to_bytes());
        framed.extend_from_slice(chunk);
        sequence_id = sequence_id.wrapping_add(1);
        last_len = chunk.len();
    }

    if payload.is_empty() || last_len == MAX_PACKET_SIZE {
        let header = PacketHeader {
            payload_length: 0,
            sequence_id,
        };
        framed.extend_from_slice(&header.to_bytes());
        sequence_id = sequence_id.wrapping_add(1);
    }

    (framed, sequence_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenenc_int_widths() {
        let cases: [(u64, &[u8]); 4] = [
            (0x42, &[0x42]),
            (0x1234, &[0xFC, 0x34, 0x12]),
            (0x0012_3456, &[0xFD, 0x56, 0x34, 0x12]),
            (
                0x0807_0605_0403_0201,
                &[0xFE, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
            ),
        ];
        for (value, expected) in cases {
            let mut writer = PacketWriter::new();
            writer.write_lenenc_int(value);
            assert_eq!(writer.as_bytes(), expected, "value {value:#x}");
        }
    }

    #[test]
    fn test_strings() {
        let mut writer = PacketWriter::new();
        writer.write_null_string("root");
        writer.write_lenenc_string("db");
        assert_eq!(writer.as_bytes(), b"root\0\x02db");
    }

    #[test]
    fn test_build_packet() {
        let mut writer = PacketWriter::new();
        writer.write_u8(0x0e);
        assert_eq!(writer.build_packet(0), vec![0x01, 0x00, 0x00, 0x00, 0x0e]);
    }

    #[test]
    fn test_frame_payload_sequence() {
        let (framed, next) = frame_payload(b"SELECT 1", 3);
        assert_eq!(&framed[..4], &[8, 0, 0, 3]);
        assert_eq!(next, 4);

        let (framed, next) = frame_payload(&[], 0);
        assert_eq!(framed, vec![0, 0, 0, 0]);
        assert_eq!(next, 1);
    }

    #[test]
    fn test_frame_payload_exact_max_gets_terminator() {
        let payload = vec![0u8; MAX_PACKET_SIZE];
        let (framed, next) = frame_payload(&payload, 0);
        assert_eq!(framed.len(), MAX_PACKET_SIZE + 8);
        assert_eq!(&framed[MAX_PACKET_SIZE + 4..], &[0, 0, 0, 1]);
        assert_eq!(next, 2);
    }
}
