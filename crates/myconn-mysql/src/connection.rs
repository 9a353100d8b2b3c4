//! Wire client.
//!
//! [`MySqlConnector`] performs the handshake described by a
//! [`HandshakePlan`]: connect, read the server greeting, optionally upgrade to
//! TLS, authenticate, switch on compression, run the init command. The
//! resulting [`MySqlConnection`] is the [`ClientHandle`] a
//! [`Session`](crate::Session) drives.

// Packet sizes are bounded by the 3-byte length field
#![allow(clippy::cast_possible_truncation)]

use std::fmt;
use std::io::{self, Read, Write};

use myconn_core::{ConnectError, Error, ExecError, ProtocolError};

use crate::auth::{self, AuthPlugin};
use crate::compress::CompressedStream;
use crate::negotiator::{ClientHandle, Connector, HandshakePlan, PERSISTENT_PREFIX};
use crate::params::DEFAULT_PORT;
use crate::protocol::{
    Command, ErrPacket, MAX_PACKET_SIZE, OkPacket, PacketHeader, PacketReader, PacketType,
    PacketWriter, capabilities, charset, frame_payload, server_status,
};
use crate::result::{ColumnDef, QueryResult, ResultSet};
use crate::tls;
use crate::transport::{PlainStream, Transport};

/// Largest packet the client accepts.
pub const MAX_ALLOWED_PACKET: u32 = 16 * 1024 * 1024;

/// Greeting protocol version this client speaks.
const PROTOCOL_VERSION: u8 = 10;

/// Upper bound on authentication round trips.
const MAX_AUTH_ROUNDS: usize = 8;

/// The server's initial handshake packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerGreeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub capabilities: u32,
    pub charset: u8,
    pub status_flags: u16,
    pub auth_plugin: String,
    pub auth_data: Vec<u8>,
}

impl ServerGreeting {
    /// Parse a greeting payload. An ERR payload (too many connections, host
    /// blocked) becomes a handshake failure carrying the server message.
    pub fn parse(payload: &[u8]) -> Result<Self, ConnectError> {
        if PacketType::classify(payload) == PacketType::Error {
            let err = parse_err(payload);
            return Err(ConnectError::handshake(format!(
                "Server refused connection: {} ({})",
                err.error_message, err.error_code
            )));
        }

        let mut reader = PacketReader::new(payload);
        let missing = |field: &str| ConnectError::handshake(format!("Malformed greeting: missing {field}"));

        let protocol_version = reader.read_u8().ok_or_else(|| missing("protocol version"))?;
        if protocol_version != PROTOCOL_VERSION {
            return Err(ConnectError::handshake(format!(
                "Unsupported protocol version: {protocol_version}"
            )));
        }

        let server_version = reader.read_null_string().ok_or_else(|| missing("server version"))?;
        let connection_id = reader.read_u32_le().ok_or_else(|| missing("connection id"))?;
        let mut auth_data = reader
            .read_bytes(8)
            .ok_or_else(|| missing("auth data"))?
            .to_vec();
        reader.skip(1);

        let caps_lower = reader.read_u16_le().ok_or_else(|| missing("capability flags"))?;
        let charset = reader.read_u8().unwrap_or(charset::UTF8MB4_GENERAL_CI);
        let status_flags = reader.read_u16_le().unwrap_or(0);
        let caps_upper = reader.read_u16_le().unwrap_or(0);
        let capabilities = u32::from(caps_lower) | (u32::from(caps_upper) << 16);

        let auth_data_len = usize::from(reader.read_u8().unwrap_or(0));
        reader.skip(10);

        if capabilities & capabilities::CLIENT_SECURE_CONNECTION != 0 {
            let len = auth_data_len.saturating_sub(8).max(13);
            if let Some(rest) = reader.read_bytes(len.min(reader.remaining())) {
                let rest = rest.strip_suffix(&[0]).unwrap_or(rest);
                auth_data.extend_from_slice(rest);
            }
        }

        let auth_plugin = if capabilities & capabilities::CLIENT_PLUGIN_AUTH != 0 {
            reader.read_null_string().unwrap_or_default()
        } else {
            String::new()
        };
        let auth_plugin = if auth_plugin.is_empty() {
            AuthPlugin::NativePassword.name().to_string()
        } else {
            auth_plugin
        };

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            capabilities,
            charset,
            status_flags,
            auth_plugin,
            auth_data,
        })
    }
}

fn parse_err(payload: &[u8]) -> ErrPacket {
    PacketReader::new(payload)
        .parse_err_packet()
        .unwrap_or_else(|| ErrPacket {
            error_code: 0,
            sql_state: String::new(),
            error_message: "malformed error packet".to_string(),
        })
}

fn protocol_error(message: impl Into<String>, raw: &[u8]) -> Error {
    Error::Protocol(ProtocolError {
        message: message.into(),
        raw_data: Some(raw.to_vec()),
    })
}

fn server_error(err: &ErrPacket) -> Error {
    Error::Exec(ExecError::server(
        err.error_code,
        err.sql_state.clone(),
        err.error_message.clone(),
    ))
}

/// Packet framing over any byte stream.
#[derive(Debug)]
struct PacketStream<S> {
    stream: S,
    sequence_id: u8,
}

impl<S: Read + Write> PacketStream<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            sequence_id: 0,
        }
    }

    /// Read one logical packet, joining continuation packets.
    fn read_packet(&mut self) -> Result<Vec<u8>, Error> {
        let mut payload = Vec::new();
        loop {
            let mut header = [0u8; PacketHeader::SIZE];
            self.stream.read_exact(&mut header)?;
            let header = PacketHeader::from_bytes(&header);
            self.sequence_id = header.sequence_id.wrapping_add(1);

            let len = header.payload_length as usize;
            let start = payload.len();
            payload.resize(start + len, 0);
            self.stream.read_exact(&mut payload[start..])?;

            if len < MAX_PACKET_SIZE {
                return Ok(payload);
            }
        }
    }

    fn write_packet(&mut self, payload: &[u8]) -> Result<(), Error> {
        let (framed, next) = frame_payload(payload, self.sequence_id);
        self.sequence_id = next;
        self.write_raw(&framed)
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    fn into_parts(self) -> (S, u8) {
        (self.stream, self.sequence_id)
    }
}

/// Transport after authentication, with or without compression.
#[derive(Debug)]
enum Channel {
    Direct(Transport),
    Compressed(CompressedStream<Transport>),
}

impl Channel {
    fn transport(&self) -> &Transport {
        match self {
            Channel::Direct(t) => t,
            Channel::Compressed(c) => c.get_ref(),
        }
    }

    fn reset_sequence(&mut self) {
        if let Channel::Compressed(c) = self {
            c.reset_sequence();
        }
    }
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Channel::Direct(t) => t.read(buf),
            Channel::Compressed(c) => c.read(buf),
        }
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Channel::Direct(t) => t.write(buf),
            Channel::Compressed(c) => c.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Channel::Direct(t) => t.flush(),
            Channel::Compressed(c) => c.flush(),
        }
    }
}

/// Where the wire client actually connects, with the persistent marker
/// stripped off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: Option<String>,
    pub port: u16,
    pub socket: Option<std::path::PathBuf>,
    pub persistent: bool,
}

impl Endpoint {
    pub fn from_plan(plan: &HandshakePlan) -> Self {
        let (host, persistent) = match plan.target.host.as_deref() {
            Some(h) => match h.strip_prefix(PERSISTENT_PREFIX) {
                Some(stripped) => (Some(stripped.to_string()), true),
                None => (Some(h.to_string()), false),
            },
            None => (None, false),
        };
        Self {
            host,
            port: plan.target.port.unwrap_or(DEFAULT_PORT),
            socket: plan.target.socket.clone(),
            persistent,
        }
    }

    /// Name used for TLS SNI and certificate checks.
    fn server_name(&self) -> &str {
        self.host.as_deref().unwrap_or("localhost")
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.socket, &self.host) {
            (Some(path), _) => write!(f, "{}", path.display()),
            (None, Some(host)) => write!(f, "{host}:{}", self.port),
            (None, None) => write!(f, "localhost:{}", self.port),
        }
    }
}

#[cfg(feature = "tls")]
fn upgrade_to_tls(
    stream: PlainStream,
    plan: &HandshakePlan,
    endpoint: &Endpoint,
) -> Result<Transport, ConnectError> {
    let ssl = plan.ssl.clone().unwrap_or_default();
    let config = tls::client_config(&ssl, plan.verify)?;
    let stream = tls::TlsStream::new(stream, config, endpoint.server_name())?;
    tracing::debug!(cipher = ?stream.cipher_suite(), "TLS established");
    Ok(Transport::Tls(Box::new(stream)))
}

#[cfg(not(feature = "tls"))]
fn upgrade_to_tls(
    _stream: PlainStream,
    plan: &HandshakePlan,
    _endpoint: &Endpoint,
) -> Result<Transport, ConnectError> {
    let ssl = plan.ssl.clone().unwrap_or_default();
    tls::client_config(&ssl, plan.verify)?;
    Err(ConnectError::handshake("TLS support is not compiled in"))
}

/// A connection to a MySQL server.
pub struct MySqlConnection {
    packets: PacketStream<Channel>,
    greeting: ServerGreeting,
    client_caps: u32,
    endpoint: Endpoint,
    database: String,
    charset: Option<String>,
    affected_rows: u64,
    last_insert_id: u64,
    warnings: u16,
    status_flags: u16,
}

impl fmt::Debug for MySqlConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("endpoint", &self.endpoint)
            .field("connection_id", &self.greeting.connection_id)
            .field("server_version", &self.greeting.server_version)
            .field("database", &self.database)
            .field("encrypted", &self.is_encrypted())
            .field("compressed", &self.is_compressed())
            .finish_non_exhaustive()
    }
}

impl MySqlConnection {
    /// Perform the full handshake described by `plan`.
    #[tracing::instrument(level = "debug", skip(plan), fields(user = %plan.username))]
    pub fn establish(plan: &HandshakePlan) -> Result<Self, ConnectError> {
        let endpoint = Endpoint::from_plan(plan);
        let stream = match &endpoint.socket {
            Some(path) => PlainStream::connect_socket(path),
            None => PlainStream::connect_tcp(
                endpoint.host.as_deref().unwrap_or("localhost"),
                endpoint.port,
                plan.connect_timeout,
            ),
        }
        .map_err(|e| ConnectError::handshake_with(format!("Failed to connect to {endpoint}"), e))?;
        stream
            .set_timeout(Some(plan.connect_timeout))
            .map_err(|e| ConnectError::handshake_with("Failed to set handshake timeout", e))?;
        tracing::debug!(%endpoint, persistent = endpoint.persistent, "Connected");

        let mut plain = PacketStream::new(stream);
        let greeting_payload = plain
            .read_packet()
            .map_err(|e| ConnectError::handshake_with("Failed to read server greeting", e))?;
        let greeting = ServerGreeting::parse(&greeting_payload)?;
        tracing::debug!(
            server_version = %greeting.server_version,
            connection_id = greeting.connection_id,
            "Server greeting"
        );

        let collation = charset::collation_for(&plan.charset);
        let mut requested = capabilities::BASE_CLIENT_FLAGS | plan.flags;
        if !plan.database.is_empty() {
            requested |= capabilities::CLIENT_CONNECT_WITH_DB;
        }

        let use_ssl = plan.wants_ssl() && tls::server_supports_ssl(greeting.capabilities);
        if plan.wants_ssl() && !use_ssl {
            if !plan.plaintext_fallback {
                return Err(ConnectError::handshake(
                    "SSL connection requested but the server does not support SSL",
                ));
            }
            tracing::warn!("Server does not support SSL, continuing unencrypted");
        }
        let client_caps = requested & greeting.capabilities;

        let (mut stream, seq) = plain.into_parts();
        let mut packets = if use_ssl {
            let request =
                tls::build_ssl_request_packet(client_caps, MAX_ALLOWED_PACKET, collation, seq);
            stream
                .write_all(&request)
                .and_then(|()| stream.flush())
                .map_err(|e| ConnectError::handshake_with("Failed to send SSL request", e))?;
            let mut packets = PacketStream::new(upgrade_to_tls(stream, plan, &endpoint)?);
            packets.sequence_id = seq.wrapping_add(1);
            packets
        } else {
            let mut packets = PacketStream::new(Transport::Plain(stream));
            packets.sequence_id = seq;
            packets
        };

        authenticate(&mut packets, plan, &greeting, client_caps, collation)?;

        let (transport, _) = packets.into_parts();
        let channel = if client_caps & capabilities::CLIENT_COMPRESS != 0 {
            tracing::debug!("Compression enabled");
            Channel::Compressed(CompressedStream::new(transport))
        } else {
            Channel::Direct(transport)
        };

        let mut conn = Self {
            packets: PacketStream::new(channel),
            greeting,
            client_caps,
            endpoint,
            database: plan.database.clone(),
            charset: None,
            affected_rows: 0,
            last_insert_id: 0,
            warnings: 0,
            status_flags: 0,
        };

        if let Some(init) = &plan.init_command {
            conn.query(init)
                .map_err(|e| ConnectError::handshake_with("Init command failed", e))?;
        }

        conn.packets
            .stream
            .transport()
            .set_timeout(None)
            .map_err(|e| ConnectError::handshake_with("Failed to clear handshake timeout", e))?;

        Ok(conn)
    }

    pub fn greeting(&self) -> &ServerGreeting {
        &self.greeting
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn connection_id(&self) -> u32 {
        self.greeting.connection_id
    }

    /// The host carried the `p:` marker.
    pub fn is_persistent(&self) -> bool {
        self.endpoint.persistent
    }

    pub fn is_encrypted(&self) -> bool {
        self.packets.stream.transport().is_encrypted()
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.packets.stream, Channel::Compressed(_))
    }

    /// Default database as last confirmed by the server.
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    fn start_command(&mut self, command: Command, body: &[u8]) -> Result<(), Error> {
        self.packets.sequence_id = 0;
        self.packets.stream.reset_sequence();

        let mut writer = PacketWriter::with_capacity(body.len() + 1);
        writer.write_u8(command as u8);
        writer.write_bytes(body);
        self.packets.write_packet(writer.as_bytes())
    }

    fn apply_ok(&mut self, ok: &OkPacket) {
        self.affected_rows = ok.affected_rows;
        self.last_insert_id = ok.last_insert_id;
        self.warnings = ok.warnings;
        self.status_flags = ok.status_flags;
    }

    /// Read a simple OK/ERR response.
    fn read_ok(&mut self) -> Result<OkPacket, Error> {
        let payload = self.packets.read_packet()?;
        match PacketType::classify(&payload) {
            PacketType::Ok => PacketReader::new(&payload)
                .parse_ok_packet()
                .ok_or_else(|| protocol_error("Malformed OK packet", &payload)),
            PacketType::Error => Err(server_error(&parse_err(&payload))),
            _ => Err(protocol_error("Expected OK packet", &payload)),
        }
    }

    /// Read one complete result (one statement's worth of packets).
    fn read_result(&mut self) -> Result<QueryResult, Error> {
        let payload = self.packets.read_packet()?;
        match PacketType::classify(&payload) {
            PacketType::Ok => {
                let ok = PacketReader::new(&payload)
                    .parse_ok_packet()
                    .ok_or_else(|| protocol_error("Malformed OK packet", &payload))?;
                self.apply_ok(&ok);
                Ok(QueryResult::Done(ok))
            }
            PacketType::Error => Err(server_error(&parse_err(&payload))),
            PacketType::LocalInfile => {
                // Decline the file transfer so the server finishes the statement.
                self.packets.write_packet(&[])?;
                let _ = self.read_ok();
                Err(Error::Exec(ExecError::server(
                    2068,
                    "HY000",
                    "LOAD DATA LOCAL INFILE is not supported",
                )))
            }
            PacketType::Eof | PacketType::Data => {
                let rows = self.read_rows(&payload)?;
                self.affected_rows = rows.len() as u64;
                Ok(QueryResult::Rows(rows))
            }
        }
    }

    fn read_rows(&mut self, first: &[u8]) -> Result<ResultSet, Error> {
        let column_count = PacketReader::new(first)
            .read_lenenc_int()
            .ok_or_else(|| protocol_error("Invalid column count", first))?;

        let mut columns = Vec::with_capacity(column_count.min(4096) as usize);
        for _ in 0..column_count {
            let payload = self.packets.read_packet()?;
            columns.push(parse_column_def(&payload)?);
        }

        let deprecate_eof = self.client_caps & capabilities::CLIENT_DEPRECATE_EOF != 0;
        if !deprecate_eof {
            let payload = self.packets.read_packet()?;
            if PacketType::classify(&payload) != PacketType::Eof {
                return Err(protocol_error("Expected EOF after column definitions", &payload));
            }
        }

        let mut rs = ResultSet::new(columns);
        loop {
            let payload = self.packets.read_packet()?;
            match PacketType::classify(&payload) {
                PacketType::Eof => {
                    let mut reader = PacketReader::new(&payload);
                    if deprecate_eof {
                        if let Some(ok) = reader.parse_ok_packet() {
                            self.warnings = ok.warnings;
                            self.status_flags = ok.status_flags;
                        }
                    } else if let Some(eof) = reader.parse_eof_packet() {
                        self.warnings = eof.warnings;
                        self.status_flags = eof.status_flags;
                    }
                    return Ok(rs);
                }
                PacketType::Error => return Err(server_error(&parse_err(&payload))),
                _ => rs.rows.push(parse_text_row(&payload, rs.columns.len())),
            }
        }
    }

    /// Only one result is returned per call; later ones are read and dropped.
    fn drain_more_results(&mut self) -> Result<(), Error> {
        let (affected_rows, last_insert_id) = (self.affected_rows, self.last_insert_id);
        while self.status_flags & server_status::SERVER_MORE_RESULTS_EXISTS != 0 {
            self.read_result()?;
        }
        self.affected_rows = affected_rows;
        self.last_insert_id = last_insert_id;
        Ok(())
    }
}

fn parse_column_def(data: &[u8]) -> Result<ColumnDef, Error> {
    let mut reader = PacketReader::new(data);
    let bad = || protocol_error("Malformed column definition", data);

    let _catalog = reader.read_lenenc_bytes().ok_or_else(bad)?;
    let schema = reader.read_lenenc_string().ok_or_else(bad)?;
    let table = reader.read_lenenc_string().ok_or_else(bad)?;
    let _org_table = reader.read_lenenc_bytes().ok_or_else(bad)?;
    let name = reader.read_lenenc_string().ok_or_else(bad)?;
    let org_name = reader.read_lenenc_string().ok_or_else(bad)?;
    let _fixed_len = reader.read_lenenc_int();

    Ok(ColumnDef {
        schema,
        table,
        name,
        org_name,
        charset: reader.read_u16_le().ok_or_else(bad)?,
        column_length: reader.read_u32_le().ok_or_else(bad)?,
        column_type: reader.read_u8().ok_or_else(bad)?,
        flags: reader.read_u16_le().ok_or_else(bad)?,
        decimals: reader.read_u8().ok_or_else(bad)?,
    })
}

/// Text protocol row: one lenenc string per column, `0xFB` for NULL.
fn parse_text_row(data: &[u8], columns: usize) -> Vec<Option<Vec<u8>>> {
    let mut reader = PacketReader::new(data);
    (0..columns)
        .map(|_| {
            if reader.peek() == Some(0xFB) {
                reader.skip(1);
                None
            } else {
                reader.read_lenenc_bytes().map(<[u8]>::to_vec)
            }
        })
        .collect()
}

/// Send the handshake response and run the authentication exchange.
fn authenticate<S: Read + Write>(
    packets: &mut PacketStream<S>,
    plan: &HandshakePlan,
    greeting: &ServerGreeting,
    client_caps: u32,
    collation: u8,
) -> Result<(), ConnectError> {
    let encrypted = client_caps & capabilities::CLIENT_SSL != 0;
    let mut plugin = AuthPlugin::from_name(&greeting.auth_plugin);
    let mut seed = greeting.auth_data.clone();
    let response = plugin.initial_response(&plan.password, &seed, encrypted);

    let mut writer = PacketWriter::new();
    writer.write_u32_le(client_caps);
    writer.write_u32_le(MAX_ALLOWED_PACKET);
    writer.write_u8(collation);
    writer.write_zeros(23);
    writer.write_null_string(&plan.username);
    if client_caps & capabilities::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
        writer.write_lenenc_bytes(&response);
    } else {
        writer.write_u8(response.len() as u8);
        writer.write_bytes(&response);
    }
    if client_caps & capabilities::CLIENT_CONNECT_WITH_DB != 0 {
        writer.write_null_string(&plan.database);
    }
    if client_caps & capabilities::CLIENT_PLUGIN_AUTH != 0 {
        writer.write_null_string(plugin.name());
    }

    let io_failure = |e: Error| ConnectError::handshake_with("Authentication exchange failed", e);
    packets.write_packet(writer.as_bytes()).map_err(io_failure)?;

    for _ in 0..MAX_AUTH_ROUNDS {
        let payload = packets.read_packet().map_err(io_failure)?;
        match payload.first() {
            Some(0x00) => {
                tracing::debug!(plugin = plugin.name(), "Authenticated");
                return Ok(());
            }
            Some(0xFF) => {
                let err = parse_err(&payload);
                return Err(ConnectError::handshake(format!(
                    "Authentication failed: {} ({})",
                    err.error_message, err.error_code
                )));
            }
            Some(0xFE) => {
                let mut reader = PacketReader::new(&payload[1..]);
                let name = reader.read_null_string().unwrap_or_default();
                plugin = AuthPlugin::from_name(&name);
                seed = reader.read_rest().to_vec();
                tracing::debug!(plugin = plugin.name(), "Auth switch");
                let response = plugin.initial_response(&plan.password, &seed, encrypted);
                packets.write_packet(&response).map_err(io_failure)?;
            }
            Some(0x01) => {
                let data = &payload[1..];
                match data {
                    [auth::caching_sha2::FAST_AUTH_SUCCESS] => {}
                    [auth::caching_sha2::PERFORM_FULL_AUTH] if encrypted => {
                        packets
                            .write_packet(&auth::cleartext(&plan.password))
                            .map_err(io_failure)?;
                    }
                    [auth::caching_sha2::PERFORM_FULL_AUTH] => {
                        packets
                            .write_packet(&[auth::caching_sha2::REQUEST_PUBLIC_KEY])
                            .map_err(io_failure)?;
                    }
                    pem if pem.starts_with(b"-----BEGIN") => {
                        let encrypted_password = auth::rsa_encrypt_password(&plan.password, &seed, pem)
                            .map_err(ConnectError::handshake)?;
                        packets.write_packet(&encrypted_password).map_err(io_failure)?;
                    }
                    _ => {
                        return Err(ConnectError::handshake(format!(
                            "Unexpected authentication data from server ({} bytes)",
                            data.len()
                        )));
                    }
                }
            }
            _ => {
                return Err(ConnectError::handshake(
                    "Unexpected packet during authentication",
                ));
            }
        }
    }

    Err(ConnectError::handshake("Too many authentication round trips"))
}

impl ClientHandle for MySqlConnection {
    fn query(&mut self, sql: &str) -> Result<QueryResult, Error> {
        self.start_command(Command::Query, sql.as_bytes())?;
        match self.read_result() {
            Ok(result) => {
                self.drain_more_results()?;
                Ok(result)
            }
            Err(e) => {
                self.affected_rows = 0;
                Err(e)
            }
        }
    }

    fn select_db(&mut self, database: &str) -> Result<(), Error> {
        self.start_command(Command::InitDb, database.as_bytes())?;
        let ok = self.read_ok()?;
        self.status_flags = ok.status_flags;
        self.database = database.to_string();
        Ok(())
    }

    fn ping(&mut self) -> Result<(), Error> {
        self.start_command(Command::Ping, &[])?;
        self.read_ok().map(|_| ())
    }

    fn server_info(&mut self) -> Result<String, Error> {
        Ok(self.greeting.server_version.clone())
    }

    fn set_charset(&mut self, name: &str) -> Result<(), Error> {
        if !charset::is_valid_name(name) {
            return Err(Error::Exec(ExecError::server(
                2019,
                "HY000",
                format!("Can't initialize character set {name}"),
            )));
        }
        self.query(&format!("SET NAMES {name}"))?;
        self.charset = Some(name.to_string());
        Ok(())
    }

    fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    fn last_insert_id(&self) -> u64 {
        self.last_insert_id
    }

    fn warnings(&self) -> u16 {
        self.warnings
    }

    fn close(mut self) {
        if self.start_command(Command::Quit, &[]).is_err() {
            tracing::debug!("COM_QUIT not delivered");
        }
        let _ = self.packets.stream.transport().shutdown();
    }
}

/// [`Connector`] backed by the built-in wire client.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlConnector;

impl Connector for MySqlConnector {
    type Handle = MySqlConnection;

    fn real_connect(&self, plan: &HandshakePlan) -> Result<MySqlConnection, ConnectError> {
        MySqlConnection::establish(plan)
    }
}
