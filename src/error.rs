//! Error types for rivulet.
//!
//! All errors that can occur inside the engine are represented by
//! [`RivuletError`]. Errors are propagated via `Result<T, RivuletError>`
//! throughout the codebase and surfaced to the embedding layer with their
//! original kind; the core never retries.
//!
//! # Error Classification
//!
//! Errors are classified into five categories that determine how the caller
//! reacts:
//! - **Protocol** — malformed or mis-chained server messages. The connection
//!   layer resyncs or resets.
//! - **Invariant** — duplicate add, missing remove/edit target. Programmer
//!   errors; the current push fails, source state is left unchanged.
//! - **Cursor** — a fetch cursor outlived a push. Fatal to the cursor only.
//! - **Usage** — bad arguments to the public API (unknown table, nested
//!   batch, unknown mutator). Never retried.
//! - **Internal** — bugs.

use std::time::Duration;

/// Primary error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum RivuletError {
    // ── Protocol errors — connection layer resyncs ───────────────────────
    /// A malformed poke or an unknown change type arrived from the server.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The base cookie in a connection request precedes the server's view;
    /// the client must perform a full reset.
    #[error("invalid connection request base cookie: {0}")]
    InvalidConnectionRequestBaseCookie(String),

    /// The server has no record of this client; a cold start is required.
    #[error("client not found: {0}")]
    ClientNotFound(String),

    /// Two consecutive pokes whose base/cookie do not chain.
    #[error("out-of-order poke: {0}")]
    OutOfOrder(String),

    /// Source columns or primary key disagree with the declared schema.
    #[error("schema version not supported: {0}")]
    SchemaVersionNotSupported(String),

    // ── Invariant violations — fail the push, state unchanged ────────────
    /// An `add` was pushed for a row that is already present.
    #[error("row already exists: {0}")]
    DuplicateRow(String),

    /// A `remove` or `edit` was pushed for a row that is not present.
    #[error("row not found: {0}")]
    RowNotFound(String),

    // ── Cursor errors — fatal to the iterator only ───────────────────────
    /// A fetch cursor was advanced after a subsequent push on its source.
    #[error("fetch cursor expired by a concurrent push")]
    ExpiredCursor,

    // ── Usage errors — never retried ─────────────────────────────────────
    /// The named table is not registered with the engine.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// The named mutator was never registered.
    #[error("unknown mutator: {0}")]
    UnknownMutator(String),

    /// `batch` was called while a batch was already open, or with a handle
    /// that does not belong to a batch.
    #[error("invalid batch call: {0}")]
    InvalidBatch(String),

    /// An invalid argument was provided to an API function.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Compiling this query would create a cycle in the operator graph.
    #[error("cycle detected in operator graph: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    // ── Internal errors — should not happen ──────────────────────────────
    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Classification of error severity for the embedding layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    Invariant,
    Cursor,
    Usage,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Protocol => write!(f, "PROTOCOL"),
            ErrorKind::Invariant => write!(f, "INVARIANT"),
            ErrorKind::Cursor => write!(f, "CURSOR"),
            ErrorKind::Usage => write!(f, "USAGE"),
            ErrorKind::Internal => write!(f, "INTERNAL"),
        }
    }
}

impl RivuletError {
    /// Classify the error for monitoring and caller dispatch.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RivuletError::InvalidMessage(_)
            | RivuletError::InvalidConnectionRequestBaseCookie(_)
            | RivuletError::ClientNotFound(_)
            | RivuletError::OutOfOrder(_)
            | RivuletError::SchemaVersionNotSupported(_) => ErrorKind::Protocol,

            RivuletError::DuplicateRow(_) | RivuletError::RowNotFound(_) => ErrorKind::Invariant,

            RivuletError::ExpiredCursor => ErrorKind::Cursor,

            RivuletError::UnknownTable(_)
            | RivuletError::UnknownMutator(_)
            | RivuletError::InvalidBatch(_)
            | RivuletError::InvalidArgument(_)
            | RivuletError::CycleDetected(_) => ErrorKind::Usage,

            RivuletError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether this error is fatal only to the cursor that produced it.
    ///
    /// The source itself stays healthy; the caller re-issues the fetch.
    pub fn is_fatal_to_cursor(&self) -> bool {
        matches!(self, RivuletError::ExpiredCursor)
    }

    /// Whether this error invalidates the poke buffer and requires the
    /// connection layer to resync from the server.
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            RivuletError::OutOfOrder(_) | RivuletError::InvalidConnectionRequestBaseCookie(_)
        )
    }

    /// Client backoff advice for errors that trigger a reconnect.
    ///
    /// `None` means the caller may reconnect immediately.
    pub fn backoff(&self) -> Option<Duration> {
        match self {
            RivuletError::InvalidConnectionRequestBaseCookie(_) => Some(Duration::from_secs(1)),
            RivuletError::ClientNotFound(_) => Some(Duration::from_secs(5)),
            _ => None,
        }
    }
}
