//! Error taxonomy for the ersatzlite connection broker.
//!
//! The underlying engine reports failures as a base result code in the low
//! byte plus optional extended bits. Calling code pattern-matches on the
//! *kind* of failure to decide between retry and fatal handling, so the
//! numeric-code-to-variant mapping here is a closed, auditable table rather
//! than ad hoc branching at each call site.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Base result codes of the underlying engine, as found in its public header.
///
/// Only the codes that classify to a distinct error kind are named here; the
/// full mnemonic table (including extended codes) lives in [`code_mnemonic`].
pub mod codes {
    pub const SQLITE_PERM: i32 = 3;
    pub const SQLITE_ABORT: i32 = 4;
    pub const SQLITE_BUSY: i32 = 5;
    pub const SQLITE_LOCKED: i32 = 6;
    pub const SQLITE_NOMEM: i32 = 7;
    pub const SQLITE_READONLY: i32 = 8;
    pub const SQLITE_INTERRUPT: i32 = 9;
    pub const SQLITE_IOERR: i32 = 10;
    pub const SQLITE_CORRUPT: i32 = 11;
    pub const SQLITE_FULL: i32 = 13;
    pub const SQLITE_CANTOPEN: i32 = 14;
    pub const SQLITE_TOOBIG: i32 = 18;
    pub const SQLITE_CONSTRAINT: i32 = 19;
    pub const SQLITE_MISMATCH: i32 = 20;
    pub const SQLITE_MISUSE: i32 = 21;
    pub const SQLITE_RANGE: i32 = 25;
    pub const SQLITE_NOTADB: i32 = 26;
    pub const SQLITE_DONE: i32 = 101;
}

/// Primary error type for broker, statement, and cursor-window operations.
///
/// Engine failures are translated into one of the engine-derived variants by
/// [`translate_engine_error`]; the remaining variants cover registry misses
/// and broker-internal faults. Collapsing kinds would silently change
/// caller-visible failure semantics, so each base code keeps its own variant.
#[derive(Error, Debug)]
pub enum ErsatzError {
    /// Callback or trigger requested abort (SQLITE_ABORT).
    #[error("{0}")]
    Abort(String),

    /// Access permission denied (SQLITE_PERM).
    #[error("{0}")]
    AccessPerm(String),

    /// Bind parameter or column index out of range (SQLITE_RANGE).
    #[error("{0}")]
    IndexOutOfRange(String),

    /// String or blob exceeds the size limit (SQLITE_TOOBIG).
    #[error("{0}")]
    BlobTooBig(String),

    /// Unable to open the database file (SQLITE_CANTOPEN).
    #[error("{0}")]
    CantOpen(String),

    /// Constraint violation (SQLITE_CONSTRAINT).
    #[error("{0}")]
    Constraint(String),

    /// Database image is malformed or not a database (SQLITE_CORRUPT,
    /// SQLITE_NOTADB).
    #[error("{0}")]
    Corrupt(String),

    /// Database file is locked (SQLITE_BUSY).
    #[error("{0}")]
    DatabaseLocked(String),

    /// Data type mismatch (SQLITE_MISMATCH), including cursor-window reads
    /// that request an incompatible cell type.
    #[error("{0}")]
    DatatypeMismatch(String),

    /// Disk I/O error (SQLITE_IOERR).
    #[error("{0}")]
    DiskIo(String),

    /// A step expected a row and got none (SQLITE_DONE).
    #[error("{0}")]
    NoRowsReturned(String),

    /// Database or disk is full (SQLITE_FULL).
    #[error("{0}")]
    Full(String),

    /// Library used incorrectly (SQLITE_MISUSE), or an API called out of
    /// order at the broker layer.
    #[error("{0}")]
    Misuse(String),

    /// Out of memory (SQLITE_NOMEM).
    #[error("{0}")]
    OutOfMemory(String),

    /// Attempt to write a read-only database (SQLITE_READONLY).
    #[error("{0}")]
    ReadOnlyDatabase(String),

    /// Table is locked (SQLITE_LOCKED).
    #[error("{0}")]
    TableLocked(String),

    /// Operation interrupted by a cancel request (SQLITE_INTERRUPT).
    #[error("{0}")]
    Interrupted(String),

    /// Any engine result code without a dedicated variant; the message
    /// carries the base code so nothing is lost.
    #[error("{message}")]
    Engine { code: i32, message: String },

    /// A handle did not resolve in its registry. Lists the live handles for
    /// diagnosability, mirroring the emulated binding's stale-pointer error.
    #[error("invalid {registry} handle {handle}; live handles: {live:?}")]
    HandleNotFound {
        registry: &'static str,
        handle: i64,
        live: Vec<i64>,
    },

    /// Broker-internal fault (worker thread died, channel broke).
    #[error("internal error: {0}")]
    Internal(String),
}

impl ErsatzError {
    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create a misuse error (API called out of order).
    pub fn misuse(msg: impl Into<String>) -> Self {
        Self::Misuse(msg.into())
    }

    /// The base engine result code this variant classifies, if any.
    pub const fn engine_code(&self) -> Option<i32> {
        match self {
            Self::Abort(_) => Some(codes::SQLITE_ABORT),
            Self::AccessPerm(_) => Some(codes::SQLITE_PERM),
            Self::IndexOutOfRange(_) => Some(codes::SQLITE_RANGE),
            Self::BlobTooBig(_) => Some(codes::SQLITE_TOOBIG),
            Self::CantOpen(_) => Some(codes::SQLITE_CANTOPEN),
            Self::Constraint(_) => Some(codes::SQLITE_CONSTRAINT),
            Self::Corrupt(_) => Some(codes::SQLITE_CORRUPT),
            Self::DatabaseLocked(_) => Some(codes::SQLITE_BUSY),
            Self::DatatypeMismatch(_) => Some(codes::SQLITE_MISMATCH),
            Self::DiskIo(_) => Some(codes::SQLITE_IOERR),
            Self::NoRowsReturned(_) => Some(codes::SQLITE_DONE),
            Self::Full(_) => Some(codes::SQLITE_FULL),
            Self::Misuse(_) => Some(codes::SQLITE_MISUSE),
            Self::OutOfMemory(_) => Some(codes::SQLITE_NOMEM),
            Self::ReadOnlyDatabase(_) => Some(codes::SQLITE_READONLY),
            Self::TableLocked(_) => Some(codes::SQLITE_LOCKED),
            Self::Interrupted(_) => Some(codes::SQLITE_INTERRUPT),
            Self::Engine { code, .. } => Some(*code & 0xff),
            Self::HandleNotFound { .. } | Self::Internal(_) => None,
        }
    }

    /// Whether this is a transient error that may succeed on retry.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::DatabaseLocked(_) | Self::TableLocked(_))
    }
}

/// Result type alias using `ErsatzError`.
pub type Result<T> = std::result::Result<T, ErsatzError>;

/// Mnemonic for an engine result code, extended codes included.
///
/// The table is closed: codes the engine does not document return `None` and
/// callers must not invent names for them.
#[allow(clippy::too_many_lines)]
pub const fn code_mnemonic(code: i32) -> Option<&'static str> {
    Some(match code {
        0 => "SQLITE_OK",
        1 => "SQLITE_ERROR",
        2 => "SQLITE_INTERNAL",
        3 => "SQLITE_PERM",
        4 => "SQLITE_ABORT",
        5 => "SQLITE_BUSY",
        6 => "SQLITE_LOCKED",
        7 => "SQLITE_NOMEM",
        8 => "SQLITE_READONLY",
        9 => "SQLITE_INTERRUPT",
        10 => "SQLITE_IOERR",
        11 => "SQLITE_CORRUPT",
        12 => "SQLITE_NOTFOUND",
        13 => "SQLITE_FULL",
        14 => "SQLITE_CANTOPEN",
        15 => "SQLITE_PROTOCOL",
        16 => "SQLITE_EMPTY",
        17 => "SQLITE_SCHEMA",
        18 => "SQLITE_TOOBIG",
        19 => "SQLITE_CONSTRAINT",
        20 => "SQLITE_MISMATCH",
        21 => "SQLITE_MISUSE",
        22 => "SQLITE_NOLFS",
        23 => "SQLITE_AUTH",
        24 => "SQLITE_FORMAT",
        25 => "SQLITE_RANGE",
        26 => "SQLITE_NOTADB",
        27 => "SQLITE_NOTICE",
        28 => "SQLITE_WARNING",
        100 => "SQLITE_ROW",
        101 => "SQLITE_DONE",
        // Extended result codes.
        256 => "SQLITE_OK_LOAD_PERMANENTLY",
        261 => "SQLITE_BUSY_RECOVERY",
        262 => "SQLITE_LOCKED_SHAREDCACHE",
        264 => "SQLITE_READONLY_RECOVERY",
        266 => "SQLITE_IOERR_READ",
        267 => "SQLITE_CORRUPT_VTAB",
        270 => "SQLITE_CANTOPEN_NOTEMPDIR",
        275 => "SQLITE_CONSTRAINT_CHECK",
        283 => "SQLITE_NOTICE_RECOVER_WAL",
        284 => "SQLITE_WARNING_AUTOINDEX",
        516 => "SQLITE_ABORT_ROLLBACK",
        517 => "SQLITE_BUSY_SNAPSHOT",
        520 => "SQLITE_READONLY_CANTLOCK",
        522 => "SQLITE_IOERR_SHORT_READ",
        526 => "SQLITE_CANTOPEN_ISDIR",
        531 => "SQLITE_CONSTRAINT_COMMITHOOK",
        539 => "SQLITE_NOTICE_RECOVER_ROLLBACK",
        776 => "SQLITE_READONLY_ROLLBACK",
        778 => "SQLITE_IOERR_WRITE",
        782 => "SQLITE_CANTOPEN_FULLPATH",
        787 => "SQLITE_CONSTRAINT_FOREIGNKEY",
        1032 => "SQLITE_READONLY_DBMOVED",
        1034 => "SQLITE_IOERR_FSYNC",
        1038 => "SQLITE_CANTOPEN_CONVPATH",
        1043 => "SQLITE_CONSTRAINT_FUNCTION",
        1290 => "SQLITE_IOERR_DIR_FSYNC",
        1299 => "SQLITE_CONSTRAINT_NOTNULL",
        1546 => "SQLITE_IOERR_TRUNCATE",
        1555 => "SQLITE_CONSTRAINT_PRIMARYKEY",
        1802 => "SQLITE_IOERR_FSTAT",
        1811 => "SQLITE_CONSTRAINT_TRIGGER",
        2058 => "SQLITE_IOERR_UNLOCK",
        2067 => "SQLITE_CONSTRAINT_UNIQUE",
        2314 => "SQLITE_IOERR_RDLOCK",
        2323 => "SQLITE_CONSTRAINT_VTAB",
        2570 => "SQLITE_IOERR_DELETE",
        2579 => "SQLITE_CONSTRAINT_ROWID",
        2826 => "SQLITE_IOERR_BLOCKED",
        3082 => "SQLITE_IOERR_NOMEM",
        3338 => "SQLITE_IOERR_ACCESS",
        3594 => "SQLITE_IOERR_CHECKRESERVEDLOCK",
        3850 => "SQLITE_IOERR_LOCK",
        4106 => "SQLITE_IOERR_CLOSE",
        4362 => "SQLITE_IOERR_DIR_CLOSE",
        4618 => "SQLITE_IOERR_SHMOPEN",
        4874 => "SQLITE_IOERR_SHMSIZE",
        5130 => "SQLITE_IOERR_SHMLOCK",
        5386 => "SQLITE_IOERR_SHMMAP",
        5642 => "SQLITE_IOERR_SEEK",
        5898 => "SQLITE_IOERR_DELETE_NOENT",
        6154 => "SQLITE_IOERR_MMAP",
        6410 => "SQLITE_IOERR_GETTEMPPATH",
        6666 => "SQLITE_IOERR_CONVPATH",
        _ => return None,
    })
}

// Some engine wrappers prefix messages with the numeric code, e.g.
// "[2067] UNIQUE constraint failed". The code is appended as a suffix
// instead, so the prefix is stripped.
static LEADING_CODE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[\d+\] ?").expect("static pattern"));

/// Format an engine message for callers: strip any redundant leading
/// `[code] ` prefix and append ` (code N SQLITE_X)`.
pub fn format_engine_message(raw_message: &str, code: i32) -> String {
    let stripped = LEADING_CODE_PREFIX.replace(raw_message, "");
    match code_mnemonic(code) {
        Some(mnemonic) => format!("{stripped} (code {code} {mnemonic})"),
        None => format!("{stripped} (code {code})"),
    }
}

/// Translate an engine result code and message into the closed taxonomy.
///
/// Classification is by the base code in the low byte, so extended codes
/// land on the same variant as their base (e.g. `SQLITE_CONSTRAINT_UNIQUE`
/// is a [`ErsatzError::Constraint`]). Codes without a dedicated variant fall
/// back to [`ErsatzError::Engine`] with the base code spelled out in the
/// message.
pub fn translate_engine_error(code: i32, raw_message: &str) -> ErsatzError {
    let message = format_engine_message(raw_message, code);
    match code & 0xff {
        codes::SQLITE_ABORT => ErsatzError::Abort(message),
        codes::SQLITE_PERM => ErsatzError::AccessPerm(message),
        codes::SQLITE_RANGE => ErsatzError::IndexOutOfRange(message),
        codes::SQLITE_TOOBIG => ErsatzError::BlobTooBig(message),
        codes::SQLITE_CANTOPEN => ErsatzError::CantOpen(message),
        codes::SQLITE_CONSTRAINT => ErsatzError::Constraint(message),
        codes::SQLITE_CORRUPT | codes::SQLITE_NOTADB => ErsatzError::Corrupt(message),
        codes::SQLITE_BUSY => ErsatzError::DatabaseLocked(message),
        codes::SQLITE_MISMATCH => ErsatzError::DatatypeMismatch(message),
        codes::SQLITE_IOERR => ErsatzError::DiskIo(message),
        codes::SQLITE_DONE => ErsatzError::NoRowsReturned(message),
        codes::SQLITE_FULL => ErsatzError::Full(message),
        codes::SQLITE_MISUSE => ErsatzError::Misuse(message),
        codes::SQLITE_NOMEM => ErsatzError::OutOfMemory(message),
        codes::SQLITE_READONLY => ErsatzError::ReadOnlyDatabase(message),
        codes::SQLITE_LOCKED => ErsatzError::TableLocked(message),
        codes::SQLITE_INTERRUPT => ErsatzError::Interrupted(message),
        base => ErsatzError::Engine {
            code,
            message: format!("{message}, base error code: {base}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonic_base_codes() {
        assert_eq!(code_mnemonic(0), Some("SQLITE_OK"));
        assert_eq!(code_mnemonic(5), Some("SQLITE_BUSY"));
        assert_eq!(code_mnemonic(19), Some("SQLITE_CONSTRAINT"));
        assert_eq!(code_mnemonic(101), Some("SQLITE_DONE"));
    }

    #[test]
    fn mnemonic_extended_codes() {
        assert_eq!(code_mnemonic(2067), Some("SQLITE_CONSTRAINT_UNIQUE"));
        assert_eq!(code_mnemonic(261), Some("SQLITE_BUSY_RECOVERY"));
        assert_eq!(code_mnemonic(6666), Some("SQLITE_IOERR_CONVPATH"));
        assert_eq!(code_mnemonic(99999), None);
    }

    #[test]
    fn format_strips_redundant_prefix() {
        assert_eq!(
            format_engine_message("[2067] UNIQUE constraint failed: t.a", 2067),
            "UNIQUE constraint failed: t.a (code 2067 SQLITE_CONSTRAINT_UNIQUE)"
        );
    }

    #[test]
    fn format_without_prefix() {
        assert_eq!(
            format_engine_message("database is locked", 5),
            "database is locked (code 5 SQLITE_BUSY)"
        );
    }

    #[test]
    fn format_unknown_code_omits_mnemonic() {
        assert_eq!(format_engine_message("boom", 9999), "boom (code 9999)");
    }

    #[test]
    fn translate_base_codes() {
        assert!(matches!(
            translate_engine_error(5, "database is locked"),
            ErsatzError::DatabaseLocked(_)
        ));
        assert!(matches!(
            translate_engine_error(101, "No rows returned from query"),
            ErsatzError::NoRowsReturned(_)
        ));
        assert!(matches!(
            translate_engine_error(9, "interrupted"),
            ErsatzError::Interrupted(_)
        ));
        assert!(matches!(
            translate_engine_error(26, "file is not a database"),
            ErsatzError::Corrupt(_)
        ));
    }

    #[test]
    fn translate_extended_code_uses_base() {
        let err = translate_engine_error(2067, "[2067] UNIQUE constraint failed: t.a");
        assert!(matches!(err, ErsatzError::Constraint(_)));
        assert_eq!(
            err.to_string(),
            "UNIQUE constraint failed: t.a (code 2067 SQLITE_CONSTRAINT_UNIQUE)"
        );
    }

    #[test]
    fn translate_fallback_names_base_code() {
        let err = translate_engine_error(17, "schema changed");
        match &err {
            ErsatzError::Engine { code, message } => {
                assert_eq!(*code, 17);
                assert_eq!(
                    message,
                    "schema changed (code 17 SQLITE_SCHEMA), base error code: 17"
                );
            }
            other => panic!("expected Engine fallback, got {other:?}"),
        }
        assert_eq!(err.engine_code(), Some(17));
    }

    #[test]
    fn engine_code_round_trip() {
        assert_eq!(
            translate_engine_error(5, "x").engine_code(),
            Some(codes::SQLITE_BUSY)
        );
        assert_eq!(
            translate_engine_error(1555, "x").engine_code(),
            Some(codes::SQLITE_CONSTRAINT)
        );
        assert_eq!(ErsatzError::internal("x").engine_code(), None);
    }

    #[test]
    fn handle_not_found_display() {
        let err = ErsatzError::HandleNotFound {
            registry: "connection",
            handle: 42,
            live: vec![1, 7],
        };
        assert_eq!(
            err.to_string(),
            "invalid connection handle 42; live handles: [1, 7]"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(translate_engine_error(5, "locked").is_transient());
        assert!(translate_engine_error(6, "table locked").is_transient());
        assert!(!translate_engine_error(19, "constraint").is_transient());
    }
}
