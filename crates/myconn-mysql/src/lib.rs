//! MySQL session adapter for myconn.
//!
//! This crate turns validated connection parameters into one live,
//! introspectable session:
//!
//! - Target resolution (Unix socket vs TCP, persistent marker)
//! - Capability flags (compression, TLS) and TLS material assembly
//! - Certificate verification policy chosen from the client profile
//! - Strict-mode init command
//! - Post-handshake checks (TLS actually in use, charset applied)
//! - Statement execution with the unconditional-delete row count rewrite
//!
//! The wire client speaks protocol 4.1 from scratch over std sockets, with
//! rustls for TLS and zlib for the compressed protocol.
//!
//! # Example
//!
//! ```rust,ignore
//! use myconn_mysql::{ConnectionParameters, TlsOptions};
//!
//! let params = ConnectionParameters::new()
//!     .host("db.example.com")
//!     .username("app")
//!     .password("secret")
//!     .database("shop")
//!     .strict_mode(true)
//!     .tls(TlsOptions::new().ca("/etc/ssl/ca.pem").verify_server_cert(true));
//!
//! let mut session = myconn_mysql::connect(&params)?;
//! session.execute("DELETE FROM cart_items")?;
//! println!("removed {} rows", session.affected_rows());
//! ```

pub mod auth;
pub mod compress;
pub mod connection;
pub mod negotiator;
pub mod params;
pub mod profile;
pub mod protocol;
pub mod result;
pub mod session;
pub mod sql_mode;
pub mod statement;
pub mod tls;
pub mod transport;

pub use connection::{MySqlConnection, MySqlConnector};
pub use negotiator::{
    ClientHandle, Connector, HandshakePlan, ResolvedTarget, SslParams, TransportNegotiator,
    VerifyPolicy,
};
pub use params::{ConnectionParameters, Credentials, TlsOptions, TransportTarget};
pub use profile::{ClientProfile, ClientVersion, DowngradeCheck};
pub use result::{ColumnDef, QueryResult, ResultSet};
pub use session::{Session, SessionState};
pub use sql_mode::SqlModeEdit;
pub use statement::{escape_identifier, is_unconditional_delete, prep_query};

pub use myconn_core::{ConnectError, ExecError, SelectError};

/// Connect with the built-in wire client and its native profile.
pub fn connect(params: &ConnectionParameters) -> Result<Session<MySqlConnection>, ConnectError> {
    TransportNegotiator::new(MySqlConnector, ClientProfile::native()).connect(params)
}
