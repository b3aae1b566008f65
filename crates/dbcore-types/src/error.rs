//! Module: error
//! Responsibility: the shared error taxonomy used across every
//! component boundary — analyzer, lock manager, log manager, executors.
//! Does not own: component-specific error construction helpers; those
//! live next to the component that raises them and build a `DbError`.

use std::fmt;
use thiserror::Error as ThisError;

///
/// ErrorKind
///
/// The closed error taxonomy. Every error surfaced to a transaction
/// boundary carries exactly one of these.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    TableNotFound,
    ColumnNotFound,
    AmbiguousColumn,
    IncompatibleType,
    IndexNotFound,
    IndexExists,
    DuplicateKey,
    TxnAbort,
    DeadlockAbort,
    LockTimeout,
    IoError,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TableNotFound => "table_not_found",
            Self::ColumnNotFound => "column_not_found",
            Self::AmbiguousColumn => "ambiguous_column",
            Self::IncompatibleType => "incompatible_type",
            Self::IndexNotFound => "index_not_found",
            Self::IndexExists => "index_exists",
            Self::DuplicateKey => "duplicate_key",
            Self::TxnAbort => "txn_abort",
            Self::DeadlockAbort => "deadlock_abort",
            Self::LockTimeout => "lock_timeout",
            Self::IoError => "io_error",
            Self::Internal => "internal",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
///
/// Which component raised the error; lets the CLI and tests render
/// `origin:kind: message` the way the taxonomy is documented.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Value,
    Catalog,
    Storage,
    Index,
    Predicate,
    Lock,
    Wal,
    Txn,
    Executor,
    Planner,
    Analyzer,
    Parser,
    Session,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Value => "value",
            Self::Catalog => "catalog",
            Self::Storage => "storage",
            Self::Index => "index",
            Self::Predicate => "predicate",
            Self::Lock => "lock",
            Self::Wal => "wal",
            Self::Txn => "txn",
            Self::Executor => "executor",
            Self::Planner => "planner",
            Self::Analyzer => "analyzer",
            Self::Parser => "parser",
            Self::Session => "session",
        };
        write!(f, "{label}")
    }
}

///
/// DbError
///
/// Structured runtime error carrying a stable `ErrorKind` plus the
/// `ErrorOrigin` that raised it. Every fallible boundary in the engine
/// returns this type (or a `Result` alias over it).
///

#[derive(Debug, ThisError)]
#[error("{origin}:{kind}: {message}")]
pub struct DbError {
    pub kind: ErrorKind,
    pub origin: ErrorOrigin,
    pub message: String,
}

impl DbError {
    pub fn new(kind: ErrorKind, origin: ErrorOrigin, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_deadlock(&self) -> bool {
        matches!(self.kind, ErrorKind::DeadlockAbort)
    }

    #[must_use]
    pub const fn is_txn_abort(&self) -> bool {
        matches!(self.kind, ErrorKind::TxnAbort | ErrorKind::DeadlockAbort)
    }
}

pub type DbResult<T> = Result<T, DbError>;
