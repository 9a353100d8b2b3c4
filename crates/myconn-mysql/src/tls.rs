//! TLS for the wire client, built on rustls.
//!
//! The upgrade happens in the middle of the handshake:
//!
//! 1. Server greeting advertises `CLIENT_SSL`
//! 2. Client sends the 32-byte SSL request (flags, max packet, collation)
//! 3. TLS handshake on the raw stream
//! 4. Handshake response and authentication continue inside TLS
//!
//! Certificate checking follows [`VerifyPolicy`]. `LibraryDefault` verifies
//! against configured trust anchors and otherwise only encrypts, which is what
//! the C client does when no verification option is set.

#![allow(clippy::cast_possible_truncation)]

use myconn_core::ConnectError;

use crate::negotiator::{SslParams, VerifyPolicy};
use crate::protocol::{PacketWriter, capabilities};

#[cfg(feature = "tls")]
use std::io::{Read, Write};
#[cfg(feature = "tls")]
use std::path::Path;
#[cfg(feature = "tls")]
use std::sync::Arc;

/// Build the SSL request packet sent before the TLS handshake.
///
/// Layout: capability flags with `CLIENT_SSL` (4), max packet size (4),
/// collation (1), 23 reserved zero bytes.
pub fn build_ssl_request_packet(
    client_caps: u32,
    max_packet_size: u32,
    collation: u8,
    sequence_id: u8,
) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(32);
    writer.write_u32_le(client_caps | capabilities::CLIENT_SSL);
    writer.write_u32_le(max_packet_size);
    writer.write_u8(collation);
    writer.write_zeros(23);
    writer.build_packet(sequence_id)
}

pub const fn server_supports_ssl(server_caps: u32) -> bool {
    server_caps & capabilities::CLIENT_SSL != 0
}

fn tls_error(message: impl Into<String>) -> ConnectError {
    ConnectError::handshake(message)
}

/// Map an OpenSSL cipher name to the rustls suite name. Names already in
/// rustls form pass through.
pub fn rustls_suite_name(name: &str) -> String {
    let mapped = match name.trim() {
        "TLS_AES_128_GCM_SHA256" => "TLS13_AES_128_GCM_SHA256",
        "TLS_AES_256_GCM_SHA384" => "TLS13_AES_256_GCM_SHA384",
        "TLS_CHACHA20_POLY1305_SHA256" => "TLS13_CHACHA20_POLY1305_SHA256",
        "ECDHE-ECDSA-AES128-GCM-SHA256" => "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256",
        "ECDHE-ECDSA-AES256-GCM-SHA384" => "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
        "ECDHE-ECDSA-CHACHA20-POLY1305" => "TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256",
        "ECDHE-RSA-AES128-GCM-SHA256" => "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256",
        "ECDHE-RSA-AES256-GCM-SHA384" => "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
        "ECDHE-RSA-CHACHA20-POLY1305" => "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
        other => other,
    };
    mapped.to_ascii_uppercase()
}

/// Split a colon (or comma) separated cipher list into rustls suite names.
pub fn parse_cipher_list(list: &str) -> Vec<String> {
    list.split([':', ','])
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(rustls_suite_name)
        .collect()
}

/// Build the rustls client configuration for a handshake.
#[cfg(feature = "tls")]
pub fn client_config(
    ssl: &SslParams,
    verify: VerifyPolicy,
) -> Result<Arc<rustls::ClientConfig>, ConnectError> {
    let provider = Arc::new(crypto_provider(ssl.cipher.as_deref())?);
    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
        .map_err(|e| tls_error(format!("Failed to set TLS versions: {e}")))?;

    let builder = match (verify, ssl.has_trust_anchor()) {
        (VerifyPolicy::DontVerify, _) | (VerifyPolicy::LibraryDefault, false) => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier)),
        (VerifyPolicy::Verify | VerifyPolicy::LibraryDefault, true) => {
            builder.with_root_certificates(configured_roots(ssl)?)
        }
        (VerifyPolicy::Verify, false) => {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots)
        }
    };

    add_client_auth(builder, ssl).map(Arc::new)
}

#[cfg(not(feature = "tls"))]
pub fn client_config(_ssl: &SslParams, _verify: VerifyPolicy) -> Result<(), ConnectError> {
    Err(tls_error(
        "TLS support requires the 'tls' feature of myconn-mysql",
    ))
}

#[cfg(feature = "tls")]
fn crypto_provider(cipher: Option<&str>) -> Result<rustls::crypto::CryptoProvider, ConnectError> {
    let provider = rustls::crypto::ring::default_provider();
    let Some(list) = cipher else {
        return Ok(provider);
    };

    let wanted = parse_cipher_list(list);
    let cipher_suites: Vec<_> = provider
        .cipher_suites
        .iter()
        .filter(|suite| wanted.contains(&format!("{:?}", suite.suite())))
        .copied()
        .collect();

    if cipher_suites.is_empty() {
        return Err(tls_error(format!("No supported cipher in '{list}'")));
    }
    tracing::debug!(count = cipher_suites.len(), "Restricted TLS cipher suites");

    Ok(rustls::crypto::CryptoProvider {
        cipher_suites,
        ..provider
    })
}

/// Root store from the configured CA bundle and CA directory.
#[cfg(feature = "tls")]
fn configured_roots(ssl: &SslParams) -> Result<rustls::RootCertStore, ConnectError> {
    let mut roots = rustls::RootCertStore::empty();

    if let Some(ca) = &ssl.ca {
        let certs = read_certs(Path::new(ca))?;
        if certs.is_empty() {
            return Err(tls_error(format!("No certificates found in CA file '{ca}'")));
        }
        for cert in certs {
            roots
                .add(cert)
                .map_err(|e| tls_error(format!("Failed to add CA certificate: {e}")))?;
        }
    }

    if let Some(dir) = &ssl.capath {
        let added = load_ca_directory(&mut roots, Path::new(dir))?;
        tracing::debug!(dir = %dir, added, "Loaded CA directory");
    }

    if roots.is_empty() {
        return Err(tls_error("No usable CA certificates configured"));
    }
    Ok(roots)
}

/// Add every parseable certificate in `dir`. Unreadable or non-PEM files are
/// skipped, as OpenSSL does for hashed CA directories.
#[cfg(feature = "tls")]
fn load_ca_directory(roots: &mut rustls::RootCertStore, dir: &Path) -> Result<usize, ConnectError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| tls_error(format!("Failed to read CA directory '{}': {e}", dir.display())))?;

    let mut added = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(certs) = read_certs(&path) else {
            continue;
        };
        for cert in certs {
            if roots.add(cert).is_ok() {
                added += 1;
            }
        }
    }
    Ok(added)
}

#[cfg(feature = "tls")]
fn read_certs(path: &Path) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, ConnectError> {
    let file = std::fs::File::open(path)
        .map_err(|e| tls_error(format!("Failed to open '{}': {e}", path.display())))?;
    let mut reader = std::io::BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("Failed to parse certificates in '{}': {e}", path.display())))
}

/// Client certificate authentication needs both the certificate and the key.
#[cfg(feature = "tls")]
fn add_client_auth(
    builder: rustls::ConfigBuilder<rustls::ClientConfig, rustls::client::WantsClientCert>,
    ssl: &SslParams,
) -> Result<rustls::ClientConfig, ConnectError> {
    match (&ssl.cert, &ssl.key) {
        (Some(cert_path), Some(key_path)) => {
            let certs = read_certs(Path::new(cert_path))?;
            if certs.is_empty() {
                return Err(tls_error(format!(
                    "No certificates found in client cert file '{cert_path}'"
                )));
            }

            let key_file = std::fs::File::open(key_path)
                .map_err(|e| tls_error(format!("Failed to open client key '{key_path}': {e}")))?;
            let key = rustls_pemfile::private_key(&mut std::io::BufReader::new(key_file))
                .map_err(|e| tls_error(format!("Failed to parse client key: {e}")))?
                .ok_or_else(|| tls_error(format!("No private key found in '{key_path}'")))?;

            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| tls_error(format!("Failed to configure client auth: {e}")))
        }
        (None, None) => Ok(builder.with_no_client_auth()),
        _ => Err(tls_error(
            "Client certificate and key must be configured together",
        )),
    }
}

/// Accepts any server certificate.
#[cfg(feature = "tls")]
#[derive(Debug)]
struct NoVerifier;

#[cfg(feature = "tls")]
impl rustls::client::danger::ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Encrypted stream over an established transport.
#[cfg(feature = "tls")]
pub struct TlsStream<S: Read + Write> {
    conn: rustls::ClientConnection,
    stream: S,
}

#[cfg(feature = "tls")]
impl<S: Read + Write> std::fmt::Debug for TlsStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsStream")
            .field("protocol_version", &self.conn.protocol_version())
            .field("cipher_suite", &self.cipher_suite())
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> TlsStream<S> {
    /// Run the TLS handshake over `stream`.
    pub fn new(
        mut stream: S,
        config: Arc<rustls::ClientConfig>,
        server_name: &str,
    ) -> Result<Self, ConnectError> {
        let name = rustls::pki_types::ServerName::try_from(server_name.to_string())
            .map_err(|e| tls_error(format!("Invalid server name '{server_name}': {e}")))?;

        let mut conn = rustls::ClientConnection::new(config, name)
            .map_err(|e| tls_error(format!("Failed to create TLS connection: {e}")))?;

        while conn.is_handshaking() {
            while conn.wants_write() {
                conn.write_tls(&mut stream)
                    .map_err(|e| ConnectError::handshake_with("TLS handshake write failed", e))?;
            }
            if conn.wants_read() {
                let n = conn
                    .read_tls(&mut stream)
                    .map_err(|e| ConnectError::handshake_with("TLS handshake read failed", e))?;
                if n == 0 {
                    return Err(tls_error("Server closed the connection during TLS handshake"));
                }
                conn.process_new_packets()
                    .map_err(|e| ConnectError::handshake_with("TLS handshake failed", e))?;
            }
        }

        Ok(Self { conn, stream })
    }

    /// Negotiated cipher suite, in rustls naming.
    pub fn cipher_suite(&self) -> Option<String> {
        self.conn
            .negotiated_cipher_suite()
            .map(|suite| format!("{:?}", suite.suite()))
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Read for TlsStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            match self.conn.reader().read(buf) {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }

            if !self.conn.wants_read() {
                return Ok(0);
            }
            if self.conn.read_tls(&mut self.stream)? == 0 {
                return Ok(0);
            }
            self.conn
                .process_new_packets()
                .map_err(|e| std::io::Error::other(format!("TLS error: {e}")))?;
        }
    }
}

#[cfg(feature = "tls")]
impl<S: Read + Write> Write for TlsStream<S> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.conn.writer().write(buf)?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.conn.writer().flush()?;
        while self.conn.wants_write() {
            self.conn.write_tls(&mut self.stream)?;
        }
        self.stream.flush()
    }
}

/// Stand-in used when the `tls` feature is off; it can never be built.
#[cfg(not(feature = "tls"))]
#[derive(Debug)]
pub struct TlsStream<S> {
    inner: S,
}

#[cfg(not(feature = "tls"))]
impl<S> TlsStream<S> {
    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

#[cfg(not(feature = "tls"))]
impl<S> std::io::Read for TlsStream<S> {
    fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        Err(std::io::Error::other("TLS support is not compiled in"))
    }
}

#[cfg(not(feature = "tls"))]
impl<S> std::io::Write for TlsStream<S> {
    fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
        Err(std::io::Error::other("TLS support is not compiled in"))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::charset;

    #[test]
    fn test_build_ssl_request_packet() {
        let packet = build_ssl_request_packet(
            capabilities::BASE_CLIENT_FLAGS,
            16 * 1024 * 1024,
            charset::UTF8MB4_GENERAL_CI,
            1,
        );

        assert_eq!(packet.len(), 36);
        assert_eq!(&packet[..4], &[32, 0, 0, 1]);
        let caps = u32::from_le_bytes([packet[4], packet[5], packet[6], packet[7]]);
        assert!(caps & capabilities::CLIENT_SSL != 0);
        assert_eq!(packet[12], charset::UTF8MB4_GENERAL_CI);
        assert!(packet[13..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_server_supports_ssl() {
        assert!(server_supports_ssl(capabilities::CLIENT_SSL | capabilities::CLIENT_PROTOCOL_41));
        assert!(!server_supports_ssl(capabilities::CLIENT_PROTOCOL_41));
    }

    #[test]
    fn test_cipher_list_names() {
        assert_eq!(
            parse_cipher_list("ECDHE-RSA-AES128-GCM-SHA256:TLS_AES_256_GCM_SHA384: "),
            vec![
                "TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256".to_string(),
                "TLS13_AES_256_GCM_SHA384".to_string(),
            ]
        );
        assert_eq!(rustls_suite_name("tls13_aes_128_gcm_sha256"), "TLS13_AES_128_GCM_SHA256");
    }

    #[cfg(feature = "tls")]
    mod with_rustls {
        use super::*;

        fn params() -> SslParams {
            SslParams::default()
        }

        #[test]
        fn test_dont_verify_and_default_without_anchor_build() {
            assert!(client_config(&params(), VerifyPolicy::DontVerify).is_ok());
            assert!(client_config(&params(), VerifyPolicy::LibraryDefault).is_ok());
            assert!(client_config(&params(), VerifyPolicy::Verify).is_ok());
        }

        #[test]
        fn test_cipher_filter() {
            let ssl = SslParams {
                cipher: Some("TLS_AES_128_GCM_SHA256".to_string()),
                ..params()
            };
            let provider = crypto_provider(ssl.cipher.as_deref()).unwrap();
            assert_eq!(provider.cipher_suites.len(), 1);

            let ssl = SslParams {
                cipher: Some("RC4-MD5".to_string()),
                ..params()
            };
            assert!(client_config(&ssl, VerifyPolicy::DontVerify).is_err());
        }

        #[test]
        fn test_missing_ca_file_fails() {
            let ssl = SslParams {
                ca: Some("/nonexistent/ca.pem".to_string()),
                ..params()
            };
            assert!(client_config(&ssl, VerifyPolicy::Verify).is_err());
        }

        #[test]
        fn test_empty_ca_directory_fails() {
            let dir = tempfile::tempdir().unwrap();
            let mut junk = std::fs::File::create(dir.path().join("README")).unwrap();
            writeln!(junk, "not a certificate").unwrap();

            let ssl = SslParams {
                capath: Some(dir.path().display().to_string()),
                ..params()
            };
            let err = client_config(&ssl, VerifyPolicy::Verify).unwrap_err();
            assert!(err.to_string().contains("CA certificates"));
        }

        #[test]
        fn test_cert_without_key_fails() {
            let ssl = SslParams {
                cert: Some("/client.pem".to_string()),
                ..params()
            };
            assert!(client_config(&ssl, VerifyPolicy::DontVerify).is_err());
        }
    }
}
