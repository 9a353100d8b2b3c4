//! Client library profile.
//!
//! Behavior that depends on the client library version is decided once, when
//! the profile is built, instead of being detected at connect time.

use std::fmt;

/// A `major.minor.patch` client library version, ordered field by field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

/// Last client version that silently falls back to plaintext when TLS setup
/// fails.
pub const SSL_DOWNGRADE_THRESHOLD: ClientVersion = ClientVersion::new(5, 7, 3);

/// Version reported by this crate's own wire client.
pub const NATIVE_CLIENT_VERSION: ClientVersion = ClientVersion::new(8, 0, 0);

impl ClientVersion {
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse the first dotted number group of a client info string, so
    /// `"5.7.3"`, `"mysqlnd 5.0.12-dev - 20150407"` and `"8.0"` all work.
    pub fn parse(info: &str) -> Option<Self> {
        let start = info.find(|c: char| c.is_ascii_digit())?;
        let rest = &info[start..];
        let end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());

        let mut parts = rest[..end]
            .split('.')
            .filter(|p| !p.is_empty())
            .map(str::parse::<u16>);
        let major = parts.next()?.ok()?;
        let minor = parts.next().transpose().ok()?.unwrap_or(0);
        let patch = parts.next().transpose().ok()?.unwrap_or(0);
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Whether to confirm after the handshake that TLS is actually in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DowngradeCheck {
    /// Query `ssl_cipher` and fail if it is empty
    CipherQuery,
    /// The client cannot downgrade; nothing to check
    Skip,
}

/// Capabilities of the client library the negotiator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientProfile {
    pub version: ClientVersion,
    /// An option to enforce server certificate verification exists
    pub verify_server_cert: bool,
    /// An explicit "do not verify" option exists (setting the verify
    /// option to false is ignored by some library versions)
    pub dont_verify_server_cert: bool,
    downgrade_check: DowngradeCheck,
}

impl ClientProfile {
    /// Profile for a client library of the given version with both
    /// verification options available.
    pub fn new(version: ClientVersion) -> Self {
        let downgrade_check = if version <= SSL_DOWNGRADE_THRESHOLD {
            DowngradeCheck::CipherQuery
        } else {
            DowngradeCheck::Skip
        };
        Self {
            version,
            verify_server_cert: true,
            dont_verify_server_cert: true,
            downgrade_check,
        }
    }

    /// Profile of the built-in wire client.
    pub fn native() -> Self {
        Self::new(NATIVE_CLIENT_VERSION)
    }

    /// Profile from a client info string; unparseable strings are treated as
    /// the oldest possible client so the downgrade check stays on.
    pub fn from_client_info(info: &str) -> Self {
        Self::new(ClientVersion::parse(info).unwrap_or(ClientVersion::new(0, 0, 0)))
    }

    pub fn with_verify_server_cert(mut self, available: bool) -> Self {
        self.verify_server_cert = available;
        self
    }

    pub fn with_dont_verify_server_cert(mut self, available: bool) -> Self {
        self.dont_verify_server_cert = available;
        self
    }

    pub fn downgrade_check(&self) -> DowngradeCheck {
        self.downgrade_check
    }

    /// Clients at or below the threshold continue in plaintext when the
    /// server cannot do TLS.
    pub fn falls_back_to_plaintext(&self) -> bool {
        self.downgrade_check == DowngradeCheck::CipherQuery
    }
}

impl Default for ClientProfile {
    fn default() -> Self {
        Self::native()
    }
}
