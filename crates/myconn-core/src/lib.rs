//! Core types shared by myconn drivers.
//!
//! - [`Error`] and the per-operation error types ([`ConnectError`],
//!   [`SelectError`], [`ExecError`])
//! - [`DiagnosticSink`] - the narrow interface through which drivers report
//!   operator-visible events

pub mod diagnostics;
pub mod error;

pub use diagnostics::{DiagnosticEvent, DiagnosticSink, MemorySink, Severity, TracingSink};
pub use error::{
    ConnectError, Error, ExecError, ExecErrorKind, ProtocolError, Result, SelectError,
    SelectErrorKind,
};
