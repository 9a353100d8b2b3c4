//! MySQL client/server protocol primitives.
//!
//! Every packet starts with a 4-byte header: a 3-byte little-endian payload
//! length followed by a 1-byte sequence number. Payloads of 2^24 - 1 bytes or
//! more are split across consecutive packets.

pub mod reader;
pub mod writer;

pub use reader::PacketReader;
pub use writer::{PacketWriter, frame_payload};

/// Maximum payload size for a single MySQL packet (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// Capability flags exchanged during the handshake.
///
/// Values are the protocol's, bit for bit.
#[allow(dead_code)]
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_COMPRESS: u32 = 1 << 5;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Capabilities every session asks for, before per-connection flags
    /// (compression, TLS) are OR-ed in.
    pub const BASE_CLIENT_FLAGS: u32 = CLIENT_PROTOCOL_41
        | CLIENT_SECURE_CONNECTION
        | CLIENT_LONG_PASSWORD
        | CLIENT_LONG_FLAG
        | CLIENT_TRANSACTIONS
        | CLIENT_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CLIENT_DEPRECATE_EOF;
}

/// Command codes (COM_xxx) issued by this driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Quit connection
    Quit = 0x01,
    /// Switch default database
    InitDb = 0x02,
    /// Text protocol query
    Query = 0x03,
    /// Liveness check
    Ping = 0x0e,
}

/// Server status flags carried by OK/EOF packets.
#[allow(dead_code)]
pub mod server_status {
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
}

/// Character sets and their default collation ids.
pub mod charset {
    pub const LATIN1_SWEDISH_CI: u8 = 8;
    pub const UTF8_GENERAL_CI: u8 = 33;
    pub const UTF8MB4_GENERAL_CI: u8 = 45;
    pub const BINARY: u8 = 63;
    pub const UTF8MB4_0900_AI_CI: u8 = 255;

    /// Collation byte sent in the handshake response.
    ///
    /// Only the handshake needs a numeric id; the session charset itself is
    /// applied by name afterwards, so unknown names fall back to utf8mb4.
    pub fn collation_for(name: &str) -> u8 {
        match name.to_ascii_lowercase().as_str() {
            "latin1" => LATIN1_SWEDISH_CI,
            "utf8" | "utf8mb3" => UTF8_GENERAL_CI,
            "binary" => BINARY,
            "ascii" => 11,
            "cp1251" => 51,
            "gbk" => 28,
            "big5" => 1,
            "sjis" => 13,
            "ucs2" => 35,
            "utf16" => 54,
            "utf32" => 60,
            _ => UTF8MB4_0900_AI_CI,
        }
    }

    /// Whether a charset name is safe to interpolate into `SET NAMES`.
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
    }
}

/// A packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    pub const SIZE: usize = 4;

    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        Self {
            payload_length: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0]),
            sequence_id: bytes[3],
        }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        let len = self.payload_length.to_le_bytes();
        [len[0], len[1], len[2], self.sequence_id]
    }
}

/// Server response packet classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// OK packet (0x00)
    Ok,
    /// Error packet (0xFF)
    Error,
    /// EOF packet (0xFE, short)
    Eof,
    /// Local infile request (0xFB)
    LocalInfile,
    /// Anything else (column count, column definition, row)
    Data,
}

impl PacketType {
    pub fn classify(payload: &[u8]) -> Self {
        match payload.first() {
            Some(0x00) => PacketType::Ok,
            Some(0xFF) => PacketType::Error,
            // 0xFE also starts long lenenc ints; EOF is always shorter than 9 bytes
            Some(0xFE) if payload.len() < 9 => PacketType::Eof,
            Some(0xFB) => PacketType::LocalInfile,
            _ => PacketType::Data,
        }
    }
}

/// Parsed OK packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

/// Parsed ERR packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub error_code: u16,
    /// SQL state (5 characters, empty before the handshake completes)
    pub sql_state: String,
    pub error_message: String,
}

/// Parsed EOF packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_payload_at_protocol_root() {
        let (framed, next) = frame_payload(&[Command::Ping as u8], 0);
        assert_eq!(framed, vec![1, 0, 0, 0, 0x0e]);
        assert_eq!(next, 1);
    }

    #[test]
    fn test_packet_header_bytes() {
        let header = PacketHeader {
            payload_length: 0x0012_3456,
            sequence_id: 7,
        };
        assert_eq!(header.to_bytes(), [0x56, 0x34, 0x12, 7]);
        assert_eq!(PacketHeader::from_bytes(&header.to_bytes()), header);
    }

    #[test]
    fn test_packet_classification() {
        assert_eq!(PacketType::classify(&[0x00, 0, 0, 2, 0, 0, 0]), PacketType::Ok);
        assert_eq!(PacketType::classify(&[0xFF, 0x15, 0x04]), PacketType::Error);
        assert_eq!(PacketType::classify(&[0xFE, 0, 0, 2, 0]), PacketType::Eof);
        assert_eq!(PacketType::classify(&[0xFE; 12]), PacketType::Data);
        assert_eq!(PacketType::classify(&[0xFB, b'x']), PacketType::LocalInfile);
        assert_eq!(PacketType::classify(&[0x02]), PacketType::Data);
    }

    #[test]
    fn test_compress_and_ssl_flag_values() {
        assert_eq!(capabilities::CLIENT_COMPRESS, 32);
        assert_eq!(capabilities::CLIENT_SSL, 2048);
        assert_eq!(capabilities::BASE_CLIENT_FLAGS & capabilities::CLIENT_SSL, 0);
        assert_eq!(capabilities::BASE_CLIENT_FLAGS & capabilities::CLIENT_COMPRESS, 0);
    }

    #[test]
    fn test_charset_names() {
        assert_eq!(charset::collation_for("latin1"), charset::LATIN1_SWEDISH_CI);
        assert_eq!(charset::collation_for("UTF8"), charset::UTF8_GENERAL_CI);
        assert_eq!(charset::collation_for("unknown"), charset::UTF8MB4_0900_AI_CI);

        assert!(charset::is_valid_name("utf8mb4"));
        assert!(!charset::is_valid_name(""));
        assert!(!charset::is_valid_name("utf8; DROP TABLE x"));
    }
}
