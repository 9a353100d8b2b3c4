//! A negotiated session.

use std::fmt;
use std::sync::Arc;

use myconn_core::{
    DiagnosticSink, Error, ExecError, ExecErrorKind, SelectError, SelectErrorKind, Severity,
};

use crate::negotiator::ClientHandle;
use crate::result::QueryResult;
use crate::statement::prep_query;

/// Whether the session still owns a live handle.
#[derive(Debug)]
pub enum SessionState<H> {
    Active(H),
    Disconnected,
}

impl<H> SessionState<H> {
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active(_))
    }
}

/// One physical connection after a successful handshake.
///
/// Created by [`TransportNegotiator::connect`](crate::TransportNegotiator::connect).
/// Every operation takes `&mut self`; a session is not shared between callers.
pub struct Session<H> {
    state: SessionState<H>,
    database: String,
    server_version: Option<String>,
    affected_rows: u64,
    delete_hack: bool,
    sink: Arc<dyn DiagnosticSink>,
}

impl<H: ClientHandle> Session<H> {
    pub(crate) fn new(
        handle: H,
        database: String,
        delete_hack: bool,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            state: SessionState::Active(handle),
            database,
            server_version: None,
            affected_rows: 0,
            delete_hack,
            sink,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> &SessionState<H> {
        &self.state
    }

    /// The live handle, if any.
    pub fn handle(&self) -> Option<&H> {
        match &self.state {
            SessionState::Active(handle) => Some(handle),
            SessionState::Disconnected => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_active()
    }

    /// Last database successfully selected.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Whether unconditional deletes are rewritten to report affected rows.
    pub fn delete_hack(&self) -> bool {
        self.delete_hack
    }

    /// Check liveness; a failed ping marks the session disconnected.
    ///
    /// Does nothing when already disconnected and never fails.
    pub fn reconnect(&mut self) {
        let SessionState::Active(handle) = &mut self.state else {
            return;
        };
        if let Err(e) = handle.ping() {
            tracing::info!(error = %e, "Ping failed, marking session disconnected");
            if let SessionState::Active(dead) =
                std::mem::replace(&mut self.state, SessionState::Disconnected)
            {
                dead.close();
            }
        }
    }

    /// Switch the default database. An empty name re-selects the current one.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn set_database(&mut self, name: &str) -> Result<(), SelectError> {
        let target = if name.is_empty() {
            self.database.clone()
        } else {
            name.to_string()
        };

        let outcome = match &mut self.state {
            SessionState::Active(handle) => handle
                .select_db(&target)
                .map_err(|e| select_error(&target, e)),
            SessionState::Disconnected => Err(SelectError {
                kind: SelectErrorKind::Disconnected,
                database: target.clone(),
                message: "session is disconnected".to_string(),
                code: None,
            }),
        };

        match outcome {
            Ok(()) => {
                self.database = target;
                Ok(())
            }
            Err(e) => {
                self.sink.record(
                    Severity::Error,
                    &format!("Unable to select database '{}': {}", e.database, e.message),
                );
                Err(e)
            }
        }
    }

    /// Server version, fetched once and cached for the session's lifetime.
    ///
    /// `None` only when the version was never fetched and the handle is gone
    /// or cannot report it.
    pub fn version(&mut self) -> Option<&str> {
        if self.server_version.is_none() {
            if let SessionState::Active(handle) = &mut self.state {
                match handle.server_info() {
                    Ok(version) => self.server_version = Some(version),
                    Err(e) => tracing::debug!(error = %e, "Server version unavailable"),
                }
            }
        }
        self.server_version.as_deref()
    }

    /// Run one statement.
    ///
    /// The text is submitted verbatim apart from the unconditional-delete
    /// rewrite. A failure resets [`affected_rows`](Self::affected_rows) to 0
    /// and leaves the session usable.
    #[tracing::instrument(level = "debug", skip(self, sql))]
    pub fn execute(&mut self, sql: &str) -> Result<QueryResult, ExecError> {
        let prepared = prep_query(sql, self.delete_hack);
        tracing::trace!(sql = %prepared, "Executing");

        let SessionState::Active(handle) = &mut self.state else {
            self.affected_rows = 0;
            return Err(ExecError::disconnected().with_sql(prepared));
        };

        match handle.query(&prepared) {
            Ok(result) => {
                self.affected_rows = handle.affected_rows();
                Ok(result)
            }
            Err(e) => {
                self.affected_rows = 0;
                Err(exec_error(e).with_sql(prepared))
            }
        }
    }

    /// Rows affected by the most recent [`execute`](Self::execute).
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    /// Id generated by the last insert; 0 once disconnected.
    pub fn last_insert_id(&self) -> u64 {
        self.handle().map_or(0, ClientHandle::last_insert_id)
    }

    /// Warnings from the last statement; 0 once disconnected.
    pub fn warnings(&self) -> u16 {
        self.handle().map_or(0, ClientHandle::warnings)
    }

    /// Close the connection.
    pub fn close(self) {
        if let SessionState::Active(handle) = self.state {
            handle.close();
        }
    }
}

impl<H> fmt::Debug for Session<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("connected", &self.state.is_active())
            .field("database", &self.database)
            .field("server_version", &self.server_version)
            .field("affected_rows", &self.affected_rows)
            .field("delete_hack", &self.delete_hack)
            .finish_non_exhaustive()
    }
}

fn select_error(database: &str, err: Error) -> SelectError {
    let (kind, code, message) = match err {
        Error::Exec(e) if e.kind == ExecErrorKind::Server => {
            (SelectErrorKind::Rejected, e.code, e.message)
        }
        other => (SelectErrorKind::Transport, None, other.to_string()),
    };
    SelectError {
        kind,
        database: database.to_string(),
        message,
        code,
    }
}

fn exec_error(err: Error) -> ExecError {
    let (kind, message, source): (_, _, Option<Box<dyn std::error::Error + Send + Sync>>) =
        match err {
            Error::Exec(e) => return e,
            Error::Io(e) => (ExecErrorKind::Transport, e.to_string(), Some(Box::new(e))),
            Error::Protocol(e) => (ExecErrorKind::Protocol, e.to_string(), Some(Box::new(e))),
            other => (ExecErrorKind::Transport, other.to_string(), None),
        };
    ExecError {
        kind,
        message,
        code: None,
        sqlstate: None,
        sql: None,
        source,
    }
}
