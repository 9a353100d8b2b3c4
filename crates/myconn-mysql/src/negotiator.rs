//! Transport negotiation.
//!
//! [`TransportNegotiator::plan`] turns validated [`ConnectionParameters`] into
//! a [`HandshakePlan`]: where to connect, which capability flags to send,
//! which TLS material to load and how to verify the server. The plan is handed
//! to a [`Connector`], and the resulting handle is validated (TLS actually in
//! use, charset applied) before a [`Session`] is returned.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use myconn_core::{ConnectError, DiagnosticSink, Error, Severity, TracingSink};

use crate::params::{CONNECT_TIMEOUT, ConnectionParameters, TlsOptions, TransportTarget};
use crate::profile::{ClientProfile, DowngradeCheck};
use crate::protocol::{capabilities, charset};
use crate::result::QueryResult;
use crate::session::Session;
use crate::sql_mode::SqlModeEdit;

/// Host prefix that asks the driver for a persistent connection.
pub const PERSISTENT_PREFIX: &str = "p:";

/// Status query used to confirm TLS is in use.
pub const SSL_CIPHER_QUERY: &str = "SHOW STATUS LIKE 'ssl_cipher'";

/// Diagnostic recorded when the server accepted an unencrypted session.
pub const SSL_DOWNGRADE_MESSAGE: &str =
    "MySQLi was configured for an SSL connection, but got an unencrypted connection instead!";

/// A live client handle, as produced by a [`Connector`].
///
/// Errors are reported as [`myconn_core::Error`]; the session maps them to
/// its per-operation error types.
pub trait ClientHandle {
    /// Run one statement and return the server's result.
    fn query(&mut self, sql: &str) -> Result<QueryResult, Error>;

    /// Switch the default database.
    fn select_db(&mut self, database: &str) -> Result<(), Error>;

    /// Check that the server still answers.
    fn ping(&mut self) -> Result<(), Error>;

    /// Server version string.
    fn server_info(&mut self) -> Result<String, Error>;

    /// Apply a connection charset.
    fn set_charset(&mut self, charset: &str) -> Result<(), Error>;

    /// Rows affected by the most recent statement.
    fn affected_rows(&self) -> u64;

    /// Auto-increment id generated by the most recent insert, 0 if none.
    fn last_insert_id(&self) -> u64;

    /// Warning count reported for the most recent statement.
    fn warnings(&self) -> u16;

    /// Terminate the connection.
    fn close(self);
}

/// Performs the actual handshake described by a plan.
pub trait Connector {
    type Handle: ClientHandle;

    /// Open a connection and authenticate according to `plan`.
    ///
    /// # Arguments
    /// * `plan` - Target, credentials, capability flags and TLS material
    ///
    /// # Returns
    /// A handle ready for statements, or `ConnectError::HandshakeFailed`.
    fn real_connect(&self, plan: &HandshakePlan) -> Result<Self::Handle, ConnectError>;
}

/// Resolved connection target. Exactly one of `host` and `socket` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// TCP host, with the persistent marker when requested
    pub host: Option<String>,
    /// `None` means the driver default port
    pub port: Option<u16>,
    /// Unix socket path, set when the host named a socket
    pub socket: Option<PathBuf>,
}

impl ResolvedTarget {
    fn resolve(params: &ConnectionParameters) -> Self {
        match params.target() {
            TransportTarget::Socket(path) => Self {
                host: None,
                port: None,
                socket: Some(path),
            },
            TransportTarget::Tcp { host, port } => {
                let host = if params.persistent {
                    format!("{PERSISTENT_PREFIX}{host}")
                } else {
                    host
                };
                Self {
                    host: Some(host),
                    port,
                    socket: None,
                }
            }
        }
    }
}

/// TLS material, containing only the fields that were actually configured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SslParams {
    pub key: Option<String>,
    pub cert: Option<String>,
    pub ca: Option<String>,
    pub capath: Option<String>,
    pub cipher: Option<String>,
}

impl SslParams {
    /// Copy the configured key, certificate, CA and cipher settings.
    pub fn from_options(tls: &TlsOptions) -> Self {
        Self {
            key: tls.key_path().map(str::to_string),
            cert: tls.cert_path().map(str::to_string),
            ca: tls.ca_path().map(str::to_string),
            capath: tls.ca_directory().map(str::to_string),
            cipher: tls.cipher_list().map(str::to_string),
        }
    }

    /// A trust anchor was configured explicitly.
    pub fn has_trust_anchor(&self) -> bool {
        self.ca.is_some() || self.capath.is_some()
    }
}

/// How the server certificate is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPolicy {
    /// Enforce verification
    Verify,
    /// Explicitly skip verification
    DontVerify,
    /// Whatever the client library does when nothing is set
    LibraryDefault,
}

/// Everything the connector needs for one handshake.
#[derive(Clone)]
pub struct HandshakePlan {
    pub target: ResolvedTarget,
    pub username: String,
    pub password: String,
    pub database: String,
    /// Per-connection capability flags (`CLIENT_COMPRESS`, `CLIENT_SSL`)
    pub flags: u32,
    pub connect_timeout: Duration,
    pub init_command: Option<String>,
    pub ssl: Option<SslParams>,
    pub verify: VerifyPolicy,
    /// Continue unencrypted when the server cannot do TLS
    pub plaintext_fallback: bool,
    /// Charset used for the handshake collation byte
    pub charset: String,
}

impl HandshakePlan {
    pub fn wants_ssl(&self) -> bool {
        self.flags & capabilities::CLIENT_SSL != 0
    }

    pub fn wants_compression(&self) -> bool {
        self.flags & capabilities::CLIENT_COMPRESS != 0
    }
}

impl fmt::Debug for HandshakePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandshakePlan")
            .field("target", &self.target)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("flags", &format_args!("{:#x}", self.flags))
            .field("connect_timeout", &self.connect_timeout)
            .field("init_command", &self.init_command)
            .field("ssl", &self.ssl)
            .field("verify", &self.verify)
            .field("plaintext_fallback", &self.plaintext_fallback)
            .field("charset", &self.charset)
            .finish()
    }
}

/// Builds and validates sessions.
pub struct TransportNegotiator<C> {
    connector: C,
    profile: ClientProfile,
    sink: Arc<dyn DiagnosticSink>,
    delete_hack: Option<bool>,
}

impl<C: Connector> TransportNegotiator<C> {
    pub fn new(connector: C, profile: ClientProfile) -> Self {
        Self {
            connector,
            profile,
            sink: Arc::new(TracingSink),
            delete_hack: None,
        }
    }

    /// Report diagnostics to `sink` instead of `tracing`.
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Override the parameters' affected-rows correction setting.
    pub fn delete_hack(mut self, enabled: bool) -> Self {
        self.delete_hack = Some(enabled);
        self
    }

    /// Capabilities of the client library in use.
    pub fn profile(&self) -> &ClientProfile {
        &self.profile
    }

    /// The connector performing handshakes.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Compute the handshake plan for `params`.
    pub fn plan(&self, params: &ConnectionParameters) -> HandshakePlan {
        let target = ResolvedTarget::resolve(params);
        tracing::debug!(
            host = ?target.host,
            port = ?target.port,
            socket = ?target.socket,
            "Resolved connection target"
        );

        let mut flags = 0;
        if params.compress {
            flags |= capabilities::CLIENT_COMPRESS;
        }

        let init_command = SqlModeEdit::from_strict(params.strict_mode).map(SqlModeEdit::init_command);

        let (ssl, verify) = match params.requested_tls() {
            Some(tls) => {
                flags |= capabilities::CLIENT_SSL;
                (
                    Some(SslParams::from_options(tls)),
                    self.verify_policy(tls.verify_server_cert),
                )
            }
            None => (None, VerifyPolicy::LibraryDefault),
        };

        tracing::debug!(flags = format_args!("{flags:#x}"), ?verify, "Computed client flags");

        HandshakePlan {
            target,
            username: params.credentials.username.clone(),
            password: params.credentials.password.clone(),
            database: params.database.clone(),
            flags,
            connect_timeout: CONNECT_TIMEOUT,
            init_command,
            ssl,
            verify,
            plaintext_fallback: self.profile.falls_back_to_plaintext(),
            charset: params.charset.clone(),
        }
    }

    fn verify_policy(&self, requested: Option<bool>) -> VerifyPolicy {
        match requested {
            None => VerifyPolicy::LibraryDefault,
            Some(true) if self.profile.verify_server_cert => VerifyPolicy::Verify,
            Some(false) if self.profile.dont_verify_server_cert => VerifyPolicy::DontVerify,
            Some(verify) => {
                self.sink.record(
                    Severity::Warning,
                    &format!(
                        "Client library {} cannot set verify_server_cert={verify}; \
                         using its default certificate verification",
                        self.profile.version
                    ),
                );
                VerifyPolicy::LibraryDefault
            }
        }
    }

    /// Open a session.
    ///
    /// Fails with `HandshakeFailed` when the connector does, `SslDowngraded`
    /// when TLS was requested but the session is unencrypted, and
    /// `CharsetUnavailable` when the charset cannot be applied. No handle
    /// survives a failure.
    #[tracing::instrument(level = "debug", skip(self, params), fields(host = %params.host, database = %params.database))]
    pub fn connect(
        &self,
        params: &ConnectionParameters,
    ) -> Result<Session<C::Handle>, ConnectError> {
        let plan = self.plan(params);

        if !plan.charset.is_empty() && !charset::is_valid_name(&plan.charset) {
            return Err(self.charset_failure(&plan.charset));
        }

        let mut handle = self.connector.real_connect(&plan).map_err(|e| {
            tracing::warn!(error = %e, "Handshake failed");
            e
        })?;

        if plan.wants_ssl() && self.profile.downgrade_check() == DowngradeCheck::CipherQuery {
            if !Self::ssl_in_use(&mut handle) {
                handle.close();
                self.sink.record(Severity::Error, SSL_DOWNGRADE_MESSAGE);
                return Err(ConnectError::SslDowngraded);
            }
            tracing::debug!("TLS confirmed by ssl_cipher status");
        }

        if !plan.charset.is_empty() {
            if let Err(e) = handle.set_charset(&plan.charset) {
                tracing::debug!(error = %e, charset = %plan.charset, "SET NAMES failed");
                handle.close();
                return Err(self.charset_failure(&plan.charset));
            }
        }

        let delete_hack = self.delete_hack.unwrap_or(params.delete_hack);
        tracing::info!(database = %params.database, "Session established");
        Ok(Session::new(
            handle,
            params.database.clone(),
            delete_hack,
            Arc::clone(&self.sink),
        ))
    }

    /// A failed query or an empty cipher both count as unencrypted.
    fn ssl_in_use(handle: &mut C::Handle) -> bool {
        match handle.query(SSL_CIPHER_QUERY) {
            Ok(QueryResult::Rows(rs)) => rs.value(0, "Value").is_some_and(|v| !v.is_empty()),
            Ok(QueryResult::Done(_)) => false,
            Err(e) => {
                tracing::debug!(error = %e, "ssl_cipher query failed");
                false
            }
        }
    }

    fn charset_failure(&self, name: &str) -> ConnectError {
        self.sink.record(
            Severity::Error,
            &format!("Database: Unable to set the configured connection charset ('{name}')."),
        );
        ConnectError::CharsetUnavailable(name.to_string())
    }
}

impl<C: fmt::Debug> fmt::Debug for TransportNegotiator<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportNegotiator")
            .field("connector", &self.connector)
            .field("profile", &self.profile)
            .field("delete_hack", &self.delete_hack)
            .finish_non_exhaustive()
    }
}
