//! Wire client against a scripted server on a loopback socket.
//!
//! The fake server speaks just enough of the protocol to cover the handshake
//! (native password auth), the init command, `SET NAMES`, `COM_INIT_DB`,
//! `COM_PING`, OK responses and text result sets terminated by an OK packet.
//! With the `tls` feature it also accepts the SSL request and finishes the
//! upgrade with the certificates under `tests/fixtures/tls`.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;

use myconn_core::{ConnectError, ExecErrorKind, MemorySink, SelectErrorKind, Severity};
use myconn_mysql::auth;
use myconn_mysql::compress::CompressedStream;
use myconn_mysql::protocol::{PacketReader, PacketWriter, capabilities, charset, server_status};
use myconn_mysql::{
    ClientProfile, ClientVersion, ConnectionParameters, MySqlConnector, QueryResult, TlsOptions,
    TransportNegotiator,
};

const SERVER_VERSION: &str = "8.0.36-loopback";
const SEED: [u8; 20] = [
    0x3d, 0x12, 0x6b, 0x55, 0x21, 0x7e, 0x08, 0x44, 0x19, 0x5a, 0x33, 0x60, 0x0f, 0x71, 0x2c,
    0x4e, 0x68, 0x05, 0x37, 0x52,
];
const PASSWORD: &str = "secret";

#[derive(Clone, Default)]
struct Script {
    compress: bool,
    /// Advertise `CLIENT_SSL` and accept the upgrade with this config
    #[cfg(feature = "tls")]
    tls: Option<Arc<rustls::ServerConfig>>,
}

struct FakeServer {
    port: u16,
    thread: JoinHandle<Vec<String>>,
}

impl FakeServer {
    fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let thread = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            run_server(stream, script)
        });
        Self { port, thread }
    }

    /// Everything the client sent, in order.
    fn log(self) -> Vec<String> {
        self.thread.join().unwrap()
    }

    fn params(&self) -> ConnectionParameters {
        ConnectionParameters::new()
            .host("127.0.0.1")
            .port(self.port)
            .username("app")
            .password(PASSWORD)
            .database("app")
    }
}

fn legacy_negotiator(sink: Arc<MemorySink>) -> TransportNegotiator<MySqlConnector> {
    TransportNegotiator::new(MySqlConnector, ClientProfile::new(ClientVersion::new(5, 6, 0)))
        .with_sink(sink)
}

#[cfg(feature = "tls")]
fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/tls/{name}", env!("CARGO_MANIFEST_DIR"))
}

/// Server side of the upgrade: a leaf for 127.0.0.1/localhost signed by
/// `ca.pem`.
#[cfg(feature = "tls")]
fn server_tls_config() -> Arc<rustls::ServerConfig> {
    use std::fs::File;
    use std::io::BufReader;

    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(fixture("server.pem")).unwrap()))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(fixture("server.key")).unwrap()))
        .unwrap()
        .unwrap();
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .unwrap();
    Arc::new(config)
}

fn read_packet<S: Read>(stream: &mut S) -> Option<(u8, Vec<u8>)> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).ok()?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).ok()?;
    Some((header[3], payload))
}

fn write_packet<S: Write>(stream: &mut S, seq: u8, payload: &[u8]) {
    let len = u32::try_from(payload.len()).unwrap().to_le_bytes();
    stream.write_all(&[len[0], len[1], len[2], seq]).unwrap();
    stream.write_all(payload).unwrap();
}

fn greeting(caps: u32) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(10);
    w.write_null_string(SERVER_VERSION);
    w.write_u32_le(7);
    w.write_bytes(&SEED[..8]);
    w.write_u8(0);
    w.write_u16_le((caps & 0xFFFF) as u16);
    w.write_u8(charset::UTF8MB4_GENERAL_CI);
    w.write_u16_le(server_status::SERVER_STATUS_AUTOCOMMIT);
    w.write_u16_le((caps >> 16) as u16);
    w.write_u8(21);
    w.write_zeros(10);
    w.write_bytes(&SEED[8..]);
    w.write_u8(0);
    w.write_null_string("mysql_native_password");
    w.into_bytes()
}

fn ok_packet(affected_rows: u64, last_insert_id: u64) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0x00);
    w.write_lenenc_int(affected_rows);
    w.write_lenenc_int(last_insert_id);
    w.write_u16_le(server_status::SERVER_STATUS_AUTOCOMMIT);
    w.write_u16_le(0);
    w.into_bytes()
}

fn err_packet(code: u16, message: &str) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_u8(0xFF);
    w.write_u16_le(code);
    w.write_u8(b'#');
    w.write_bytes(b"42000");
    w.write_bytes(message.as_bytes());
    w.into_bytes()
}

fn column_def(name: &str, column_type: u8) -> Vec<u8> {
    let mut w = PacketWriter::new();
    w.write_lenenc_string("def");
    w.write_lenenc_string("app");
    w.write_lenenc_string("users");
    w.write_lenenc_string("users");
    w.write_lenenc_string(name);
    w.write_lenenc_string(name);
    w.write_lenenc_int(0x0c);
    w.write_u16_le(u16::from(charset::UTF8MB4_GENERAL_CI));
    w.write_u32_le(255);
    w.write_u8(column_type);
    w.write_u16_le(0);
    w.write_u8(0);
    w.write_zeros(2);
    w.into_bytes()
}

/// `SELECT id, name FROM users`: two columns, two rows, one NULL.
fn users_result() -> Vec<Vec<u8>> {
    let mut packets = vec![vec![2u8], column_def("id", 3), column_def("name", 253)];

    let mut row = PacketWriter::new();
    row.write_lenenc_string("1");
    row.write_lenenc_string("ada");
    packets.push(row.into_bytes());

    let mut row = PacketWriter::new();
    row.write_lenenc_string("2");
    row.write_u8(0xFB);
    packets.push(row.into_bytes());

    // OK packet in EOF position
    let mut end = PacketWriter::new();
    end.write_u8(0xFE);
    end.write_lenenc_int(0);
    end.write_lenenc_int(0);
    end.write_u16_le(server_status::SERVER_STATUS_AUTOCOMMIT);
    end.write_u16_le(0);
    packets.push(end.into_bytes());
    packets
}

/// `SHOW STATUS LIKE 'ssl_cipher'`: empty `Value` on a plaintext session.
fn ssl_cipher_result(cipher: &str) -> Vec<Vec<u8>> {
    let mut packets = vec![
        vec![2u8],
        column_def("Variable_name", 253),
        column_def("Value", 253),
    ];
    let mut row = PacketWriter::new();
    row.write_lenenc_string("Ssl_cipher");
    row.write_lenenc_string(cipher);
    packets.push(row.into_bytes());

    let mut end = PacketWriter::new();
    end.write_u8(0xFE);
    end.write_lenenc_int(0);
    end.write_lenenc_int(0);
    end.write_u16_le(server_status::SERVER_STATUS_AUTOCOMMIT);
    end.write_u16_le(0);
    packets.push(end.into_bytes());
    packets
}

fn run_server(mut stream: TcpStream, script: Script) -> Vec<String> {
    let mut caps = capabilities::BASE_CLIENT_FLAGS | capabilities::CLIENT_CONNECT_WITH_DB;
    if script.compress {
        caps |= capabilities::CLIENT_COMPRESS;
    }
    #[cfg(feature = "tls")]
    if script.tls.is_some() {
        caps |= capabilities::CLIENT_SSL;
    }
    write_packet(&mut stream, 0, &greeting(caps));

    let Some((seq, response)) = read_packet(&mut stream) else {
        return vec!["no handshake response".to_string()];
    };

    // A 32-byte packet is the SSL request, not a handshake response.
    #[cfg(feature = "tls")]
    if let (Some(config), 32) = (script.tls.clone(), response.len()) {
        let conn = rustls::ServerConnection::new(config).unwrap();
        let mut tls = rustls::StreamOwned::new(conn, stream);
        let mut log = vec!["TLS".to_string()];
        let Some((seq, response)) = read_packet(&mut tls) else {
            log.push("TLS handshake failed".to_string());
            return log;
        };
        authenticate_and_serve(tls, seq, &response, true, &mut log);
        return log;
    }

    let mut log = Vec::new();
    authenticate_and_serve(stream, seq, &response, false, &mut log);
    log
}

fn authenticate_and_serve<S: Read + Write>(
    mut stream: S,
    seq: u8,
    response: &[u8],
    encrypted: bool,
    log: &mut Vec<String>,
) {
    let mut reader = PacketReader::new(response);
    let client_caps = reader.read_u32_le().unwrap();
    reader.skip(4 + 1 + 23);
    let user = reader.read_null_string().unwrap();
    let scramble = reader.read_lenenc_bytes().unwrap().to_vec();
    let database = reader.read_null_string().unwrap_or_default();

    log.push(format!("AUTH {user} {database}"));
    if scramble != auth::mysql_native_password(PASSWORD, &SEED) {
        write_packet(
            &mut stream,
            seq.wrapping_add(1),
            &err_packet(1045, "Access denied for user 'app'@'localhost'"),
        );
        stream.flush().unwrap();
        return;
    }
    write_packet(&mut stream, seq.wrapping_add(1), &ok_packet(0, 0));
    stream.flush().unwrap();

    if client_caps & capabilities::CLIENT_COMPRESS != 0 {
        log.push("COMPRESS".to_string());
        serve_commands(&mut CompressedStream::new(stream), encrypted, log);
    } else {
        serve_commands(&mut stream, encrypted, log);
    }
}

fn serve_commands<S: Read + Write>(stream: &mut S, encrypted: bool, log: &mut Vec<String>) {
    while let Some((seq, packet)) = read_packet(stream) {
        let reply_seq = seq.wrapping_add(1);
        let body = String::from_utf8_lossy(&packet[1..]).into_owned();
        let replies = match packet[0] {
            0x01 => {
                log.push("QUIT".to_string());
                return;
            }
            0x02 => {
                log.push(format!("INIT_DB {body}"));
                if body == "app" || body == "foo" {
                    vec![ok_packet(0, 0)]
                } else {
                    vec![err_packet(1049, &format!("Unknown database '{body}'"))]
                }
            }
            0x03 => {
                log.push(format!("QUERY {body}"));
                if body == "DELETE FROM users WHERE 1=1" {
                    vec![ok_packet(3, 0)]
                } else if body == "DELETE FROM users" {
                    vec![ok_packet(0, 0)]
                } else if body == "SELECT id, name FROM users" {
                    users_result()
                } else if body == "SHOW STATUS LIKE 'ssl_cipher'" {
                    ssl_cipher_result(if encrypted { "TLS_AES_128_GCM_SHA256" } else { "" })
                } else if body.starts_with("INSERT") {
                    vec![ok_packet(1, 42)]
                } else if body.starts_with("BROKEN") {
                    vec![err_packet(1064, "You have an error in your SQL syntax")]
                } else {
                    vec![ok_packet(0, 0)]
                }
            }
            0x0e => {
                log.push("PING".to_string());
                vec![ok_packet(0, 0)]
            }
            other => vec![err_packet(1047, &format!("Unknown command {other}"))],
        };

        for (offset, payload) in replies.iter().enumerate() {
            write_packet(stream, reply_seq.wrapping_add(offset as u8), payload);
        }
        stream.flush().unwrap();
    }
}

#[test]
fn test_handshake_runs_init_command_and_charset() {
    let server = FakeServer::start(Script::default());
    let session = myconn_mysql::connect(&server.params().strict_mode(true)).unwrap();

    let conn = session.handle().unwrap();
    assert_eq!(conn.connection_id(), 7);
    assert_eq!(conn.charset(), Some("utf8mb4"));
    assert!(!conn.is_encrypted());
    assert!(!conn.is_compressed());
    assert!(!conn.is_persistent());
    session.close();

    let log = server.log();
    assert_eq!(log[0], "AUTH app app");
    assert!(log[1].starts_with("QUERY SET SESSION sql_mode"));
    assert!(log[1].contains("STRICT_ALL_TABLES"));
    assert_eq!(log[2], "QUERY SET NAMES utf8mb4");
    assert_eq!(log.last().map(String::as_str), Some("QUIT"));
}

#[test]
fn test_statements_over_the_wire() {
    let server = FakeServer::start(Script::default());
    let mut session = myconn_mysql::connect(&server.params()).unwrap();

    session.execute("DELETE FROM users").unwrap();
    assert_eq!(session.affected_rows(), 3);

    let rows = session
        .execute("SELECT id, name FROM users")
        .unwrap()
        .into_rows()
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.text(0, "NAME").as_deref(), Some("ada"));
    assert_eq!(rows.value(1, "name"), None);
    assert_eq!(rows.columns[0].table, "users");
    assert_eq!(session.affected_rows(), 2);

    let result = session.execute("INSERT INTO users (name) VALUES ('grace')").unwrap();
    assert!(matches!(result, QueryResult::Done(_)));
    assert_eq!(session.affected_rows(), 1);
    assert_eq!(session.last_insert_id(), 42);

    let err = session.execute("BROKEN").unwrap_err();
    assert_eq!(err.kind, ExecErrorKind::Server);
    assert_eq!(err.code, Some(1064));
    assert_eq!(err.sqlstate.as_deref(), Some("42000"));
    assert_eq!(session.affected_rows(), 0);

    assert_eq!(session.version(), Some(SERVER_VERSION));
    session.close();

    let log = server.log();
    assert!(log.contains(&"QUERY DELETE FROM users WHERE 1=1".to_string()));
    assert!(!log.contains(&"QUERY DELETE FROM users".to_string()));
}

#[test]
fn test_select_database_and_ping() {
    let server = FakeServer::start(Script::default());
    let mut session = myconn_mysql::connect(&server.params()).unwrap();

    session.set_database("foo").unwrap();
    assert_eq!(session.database(), "foo");
    assert_eq!(session.handle().unwrap().database(), "foo");

    let err = session.set_database("nope").unwrap_err();
    assert_eq!(err.kind, SelectErrorKind::Rejected);
    assert_eq!(err.code, Some(1049));
    assert_eq!(session.database(), "foo");

    session.reconnect();
    assert!(session.is_connected());
    session.close();

    let log = server.log();
    assert!(log.contains(&"INIT_DB foo".to_string()));
    assert!(log.contains(&"INIT_DB nope".to_string()));
    assert!(log.contains(&"PING".to_string()));
}

#[test]
fn test_compressed_session() {
    let server = FakeServer::start(Script {
        compress: true,
        ..Script::default()
    });
    let mut session = myconn_mysql::connect(&server.params().compress(true)).unwrap();
    assert!(session.handle().unwrap().is_compressed());

    let rows = session
        .execute("SELECT id, name FROM users")
        .unwrap()
        .into_rows()
        .unwrap();
    assert_eq!(rows.len(), 2);

    // long enough to be deflated on the way out
    let long_insert = format!("INSERT INTO users (name) VALUES ('{}')", "x".repeat(200));
    session.execute(&long_insert).unwrap();
    assert_eq!(session.last_insert_id(), 42);
    session.close();

    let log = server.log();
    assert_eq!(log[1], "COMPRESS");
    assert!(log.contains(&format!("QUERY {long_insert}")));
}

#[test]
fn test_wrong_password_fails_handshake() {
    let server = FakeServer::start(Script::default());
    let err = myconn_mysql::connect(&server.params().password("wrong")).unwrap_err();
    assert!(matches!(err, ConnectError::HandshakeFailed { .. }));
    assert!(err.to_string().contains("Access denied"));
    assert_eq!(server.log().len(), 1);
}

#[test]
fn test_tls_required_but_unsupported_by_server() {
    let server = FakeServer::start(Script::default());
    let params = server
        .params()
        .tls(TlsOptions::new().ca("/nonexistent/ca.pem"));
    let err = myconn_mysql::connect(&params).unwrap_err();
    assert!(matches!(err, ConnectError::HandshakeFailed { .. }));
    assert!(err.to_string().contains("does not support SSL"));
}

#[test]
fn test_unreachable_server() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let params = ConnectionParameters::new().host("127.0.0.1").port(port);
    let err = myconn_mysql::connect(&params).unwrap_err();
    assert!(matches!(err, ConnectError::HandshakeFailed { .. }));
}

#[test]
fn test_legacy_client_catches_plaintext_fallback() {
    let server = FakeServer::start(Script::default());
    let sink = Arc::new(MemorySink::new());
    let params = server
        .params()
        .tls(TlsOptions::new().ca("/nonexistent/ca.pem"));

    let err = legacy_negotiator(sink.clone()).connect(&params).unwrap_err();
    assert!(matches!(err, ConnectError::SslDowngraded));
    assert_eq!(sink.at_least(Severity::Error).len(), 1);
    assert_eq!(
        server.log(),
        vec!["AUTH app app", "QUERY SHOW STATUS LIKE 'ssl_cipher'", "QUIT"]
    );
}

#[cfg(feature = "tls")]
#[test]
fn test_tls_upgrade_with_verified_certificate() {
    let server = FakeServer::start(Script {
        tls: Some(server_tls_config()),
        ..Script::default()
    });
    let tls = TlsOptions::new().ca(fixture("ca.pem")).verify_server_cert(true);
    let mut session = myconn_mysql::connect(&server.params().tls(tls)).unwrap();
    assert!(session.handle().unwrap().is_encrypted());

    let rows = session
        .execute("SELECT id, name FROM users")
        .unwrap()
        .into_rows()
        .unwrap();
    assert_eq!(rows.len(), 2);
    session.execute("DELETE FROM users").unwrap();
    assert_eq!(session.affected_rows(), 3);
    session.close();

    let log = server.log();
    assert_eq!(log[0], "TLS");
    assert_eq!(log[1], "AUTH app app");
    assert_eq!(log[2], "QUERY SET NAMES utf8mb4");
    assert_eq!(log.last().map(String::as_str), Some("QUIT"));
}

#[cfg(feature = "tls")]
#[test]
fn test_legacy_client_confirms_encrypted_session() {
    let server = FakeServer::start(Script {
        tls: Some(server_tls_config()),
        ..Script::default()
    });
    let sink = Arc::new(MemorySink::new());
    let tls = TlsOptions::new().ca(fixture("ca.pem")).verify_server_cert(true);

    let session = legacy_negotiator(sink.clone())
        .connect(&server.params().tls(tls))
        .unwrap();
    assert!(session.is_connected());
    assert!(session.handle().unwrap().is_encrypted());
    assert!(sink.events().is_empty());
    session.close();

    let log = server.log();
    assert_eq!(log[1], "AUTH app app");
    assert_eq!(log[2], "QUERY SHOW STATUS LIKE 'ssl_cipher'");
    assert_eq!(log[3], "QUERY SET NAMES utf8mb4");
}

#[cfg(feature = "tls")]
#[test]
fn test_untrusted_certificate_fails_handshake() {
    let server = FakeServer::start(Script {
        tls: Some(server_tls_config()),
        ..Script::default()
    });
    let tls = TlsOptions::new()
        .ca(fixture("other-ca.pem"))
        .verify_server_cert(true);

    let err = myconn_mysql::connect(&server.params().tls(tls)).unwrap_err();
    assert!(matches!(err, ConnectError::HandshakeFailed { .. }));
    assert!(err.to_string().contains("TLS handshake failed"));
    assert!(!server.log().iter().any(|line| line.starts_with("AUTH")));
}

#[cfg(feature = "tls")]
#[test]
fn test_unverified_tls_accepts_any_certificate() {
    let server = FakeServer::start(Script {
        tls: Some(server_tls_config()),
        ..Script::default()
    });
    let tls = TlsOptions::new()
        .ca(fixture("other-ca.pem"))
        .verify_server_cert(false);

    let session = myconn_mysql::connect(&server.params().tls(tls)).unwrap();
    assert!(session.handle().unwrap().is_encrypted());
    session.close();
    assert_eq!(server.log()[0], "TLS");
}
