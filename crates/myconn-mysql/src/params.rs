//! Connection parameters.
//!
//! These values arrive already validated from the configuration layer and are
//! never mutated once handed to the
//! [`TransportNegotiator`](crate::negotiator::TransportNegotiator).

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default TCP port used when none is configured.
pub const DEFAULT_PORT: u16 = 3306;

/// Handshake timeout. Statement execution has no timeout of its own.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection charset.
pub const DEFAULT_CHARSET: &str = "utf8mb4";

/// Hosts starting with this character are Unix socket paths.
pub const SOCKET_PATH_PREFIX: char = '/';

/// Username and password.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// TLS material and verification preference.
///
/// A value with every field empty means "no TLS", not "TLS with defaults".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    /// Client private key (PEM)
    pub key: Option<String>,
    /// Client certificate (PEM)
    pub cert: Option<String>,
    /// CA bundle (PEM)
    pub ca: Option<String>,
    /// Directory of trusted CA certificates (PEM)
    pub capath: Option<String>,
    /// Permitted cipher suites, colon separated
    pub cipher: Option<String>,
    /// `None` leaves verification to the client library default
    pub verify_server_cert: Option<bool>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

impl TlsOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, path: impl Into<String>) -> Self {
        self.key = Some(path.into());
        self
    }

    pub fn cert(mut self, path: impl Into<String>) -> Self {
        self.cert = Some(path.into());
        self
    }

    pub fn ca(mut self, path: impl Into<String>) -> Self {
        self.ca = Some(path.into());
        self
    }

    pub fn capath(mut self, dir: impl Into<String>) -> Self {
        self.capath = Some(dir.into());
        self
    }

    pub fn cipher(mut self, list: impl Into<String>) -> Self {
        self.cipher = Some(list.into());
        self
    }

    pub fn verify_server_cert(mut self, verify: bool) -> Self {
        self.verify_server_cert = Some(verify);
        self
    }

    pub fn key_path(&self) -> Option<&str> {
        non_empty(self.key.as_ref())
    }

    pub fn cert_path(&self) -> Option<&str> {
        non_empty(self.cert.as_ref())
    }

    pub fn ca_path(&self) -> Option<&str> {
        non_empty(self.ca.as_ref())
    }

    pub fn ca_directory(&self) -> Option<&str> {
        non_empty(self.capath.as_ref())
    }

    pub fn cipher_list(&self) -> Option<&str> {
        non_empty(self.cipher.as_ref())
    }

    /// TLS is requested only when at least one material field is non-empty.
    /// `verify_server_cert` alone does not request TLS.
    pub fn is_requested(&self) -> bool {
        self.key_path().is_some()
            || self.cert_path().is_some()
            || self.ca_path().is_some()
            || self.ca_directory().is_some()
            || self.cipher_list().is_some()
    }
}

/// Where the connection goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportTarget {
    /// Unix domain socket
    Socket(PathBuf),
    /// TCP; `None` port means the driver default
    Tcp { host: String, port: Option<u16> },
}

impl TransportTarget {
    /// Classify a configured host string.
    ///
    /// A host beginning with `/` is a socket path and the port is ignored.
    /// A port of 0 counts as unset.
    pub fn from_host(host: &str, port: Option<u16>) -> Self {
        if host.starts_with(SOCKET_PATH_PREFIX) {
            TransportTarget::Socket(PathBuf::from(host))
        } else {
            TransportTarget::Tcp {
                host: host.to_string(),
                port: port.filter(|&p| p != 0),
            }
        }
    }

    pub fn is_socket(&self) -> bool {
        matches!(self, TransportTarget::Socket(_))
    }
}

/// Everything needed to open one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionParameters {
    /// Hostname, IP address, or socket path
    pub host: String,
    pub port: Option<u16>,
    #[serde(flatten)]
    pub credentials: Credentials,
    pub database: String,
    /// Request a persistent connection (`p:` host marker)
    pub persistent: bool,
    /// Request protocol compression
    pub compress: bool,
    /// `Some(true)` forces STRICT_ALL_TABLES, `Some(false)` strips strict
    /// modes, `None` leaves the server default untouched
    pub strict_mode: Option<bool>,
    pub tls: Option<TlsOptions>,
    pub charset: String,
    /// Rewrite unconditional deletes so the affected row count is reported
    pub delete_hack: bool,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            credentials: Credentials::default(),
            database: String::new(),
            persistent: false,
            compress: false,
            strict_mode: None,
            tls: None,
            charset: DEFAULT_CHARSET.to_string(),
            delete_hack: true,
        }
    }
}

impl ConnectionParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hostname or socket path.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.credentials.username = username.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.credentials.password = password.into();
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn persistent(mut self, enabled: bool) -> Self {
        self.persistent = enabled;
        self
    }

    pub fn compress(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    pub fn strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = Some(strict);
        self
    }

    pub fn tls(mut self, tls: TlsOptions) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    pub fn delete_hack(mut self, enabled: bool) -> Self {
        self.delete_hack = enabled;
        self
    }

    pub fn target(&self) -> TransportTarget {
        TransportTarget::from_host(&self.host, self.port)
    }

    /// TLS options, only when they actually request TLS.
    pub fn requested_tls(&self) -> Option<&TlsOptions> {
        self.tls.as_ref().filter(|tls| tls.is_requested())
    }
}
