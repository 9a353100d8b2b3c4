//! Decoding of protocol data types from a packet payload.

#![allow(clippy::cast_possible_truncation)]

use crate::protocol::{EofPacket, ErrPacket, OkPacket};

/// Cursor over a packet payload.
///
/// Every read returns `None` instead of panicking when the payload is short.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Read exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(len)?;
        let bytes = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.read_bytes(N)?.try_into().ok()
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_array::<1>().map(|b| b[0])
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub fn read_u24_le(&mut self) -> Option<u32> {
        self.read_array::<3>()
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_u64_le(&mut self) -> Option<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Read a length-encoded integer.
    ///
    /// `0xFB` (NULL) and `0xFF` (reserved) yield `None`.
    pub fn read_lenenc_int(&mut self) -> Option<u64> {
        match self.read_u8()? {
            first @ 0x00..=0xFA => Some(u64::from(first)),
            0xFC => self.read_u16_le().map(u64::from),
            0xFD => self.read_u24_le().map(u64::from),
            0xFE => self.read_u64_le(),
            0xFB | 0xFF => None,
        }
    }

    pub fn read_lenenc_bytes(&mut self) -> Option<&'a [u8]> {
        let len = usize::try_from(self.read_lenenc_int()?).ok()?;
        self.read_bytes(len)
    }

    pub fn read_lenenc_string(&mut self) -> Option<String> {
        self.read_lenenc_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Read a NUL-terminated string. A missing terminator consumes the rest.
    pub fn read_null_string(&mut self) -> Option<String> {
        let rest = self.data.get(self.pos..)?;
        let (text, consumed) = match rest.iter().position(|&b| b == 0) {
            Some(nul) => (&rest[..nul], nul + 1),
            None => (rest, rest.len()),
        };
        self.pos += consumed;
        Some(String::from_utf8_lossy(text).into_owned())
    }

    pub fn read_string(&mut self, len: usize) -> Option<String> {
        self.read_bytes(len)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = self.data.get(self.pos..).unwrap_or_default();
        self.pos = self.data.len();
        rest
    }

    pub fn read_rest_string(&mut self) -> String {
        String::from_utf8_lossy(self.read_rest()).into_owned()
    }

    pub fn skip(&mut self, n: usize) -> bool {
        self.read_bytes(n).is_some()
    }

    /// OK packet: `0x00`, affected rows, last insert id, status, warnings, info.
    pub fn parse_ok_packet(&mut self) -> Option<OkPacket> {
        if matches!(self.peek(), Some(0x00 | 0xFE)) {
            self.skip(1);
        }

        Some(OkPacket {
            affected_rows: self.read_lenenc_int()?,
            last_insert_id: self.read_lenenc_int()?,
            status_flags: self.read_u16_le()?,
            warnings: self.read_u16_le()?,
            info: self.read_rest_string(),
        })
    }

    /// ERR packet: `0xFF`, code, optional `#` + 5-byte SQL state, message.
    pub fn parse_err_packet(&mut self) -> Option<ErrPacket> {
        if self.peek() == Some(0xFF) {
            self.skip(1);
        }

        let error_code = self.read_u16_le()?;
        let sql_state = if self.peek() == Some(b'#') {
            self.skip(1);
            self.read_string(5)?
        } else {
            String::new()
        };

        Some(ErrPacket {
            error_code,
            sql_state,
            error_message: self.read_rest_string(),
        })
    }

    /// EOF packet: `0xFE`, warnings, status.
    pub fn parse_eof_packet(&mut self) -> Option<EofPacket> {
        if self.peek() == Some(0xFE) {
            self.skip(1);
        }

        Some(EofPacket {
            warnings: self.read_u16_le()?,
            status_flags: self.read_u16_le()?,
        })
    }
}
