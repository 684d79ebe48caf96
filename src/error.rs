//! # Storage Errors
//!
//! Every fallible operation in blockdb returns `eyre::Result`. Failures that a
//! caller is expected to react to (a row that does not exist, a read that ran
//! past the end of a buffer) are raised as a [`StorageError`] inside the
//! report, raised with `bail!(StorageError::..)` or
//! `ensure!(cond, StorageError::..)`, so they can be classified without
//! string matching:
//!
//! ```ignore
//! match table.read_row(reference) {
//!     Ok(row) => ...,
//!     Err(e) if error_kind(&e) == Some(ErrorKind::NotFound) => ...,
//!     Err(e) => return Err(e),
//! }
//! ```
//!
//! Programmer errors (setting the page size twice, dropping a block that still
//! holds a mapped page) are not represented here. They panic.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    NotFound,
    Size,
    SchemaMismatch,
    Corrupt,
    Config,
    Constraint,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error during {op} on '{}': {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    #[error("size error: {0}")]
    Size(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("corrupt data: {0}")]
    Corrupt(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("constraint violated: {0}")]
    Constraint(String),
}

impl StorageError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn not_found(what: &'static str, name: impl ToString) -> Self {
        StorageError::NotFound {
            what,
            name: name.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Io { .. } => ErrorKind::Io,
            StorageError::NotFound { .. } => ErrorKind::NotFound,
            StorageError::Size(_) => ErrorKind::Size,
            StorageError::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            StorageError::Corrupt(_) => ErrorKind::Corrupt,
            StorageError::Config(_) => ErrorKind::Config,
            StorageError::Constraint(_) => ErrorKind::Constraint,
        }
    }
}

/// Returns the kind of the [`StorageError`] carried by `report`, if any.
pub fn error_kind(report: &eyre::Report) -> Option<ErrorKind> {
    report.downcast_ref::<StorageError>().map(StorageError::kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_message_embeds_path() {
        let err = StorageError::io(
            "open",
            "/tmp/missing.snapdb",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );

        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("/tmp/missing.snapdb"));
        assert!(err.to_string().contains("open"));
    }

    #[test]
    fn error_kind_survives_report_context() {
        use eyre::WrapErr;

        let result: eyre::Result<()> = Err(StorageError::not_found("column", "email").into());
        let report = result.wrap_err("failed to read row").unwrap_err();

        assert_eq!(error_kind(&report), Some(ErrorKind::NotFound));
    }

    #[test]
    fn bail_and_ensure_keep_the_kind() {
        fn check(size: usize) -> eyre::Result<()> {
            eyre::ensure!(size > 0, StorageError::Size("empty".to_string()));
            if size > 8 {
                eyre::bail!(StorageError::Corrupt(format!("{} bytes", size)));
            }
            Ok(())
        }

        assert_eq!(error_kind(&check(0).unwrap_err()), Some(ErrorKind::Size));
        assert_eq!(error_kind(&check(9).unwrap_err()), Some(ErrorKind::Corrupt));
        assert!(check(4).is_ok());
    }

    #[test]
    fn plain_reports_have_no_kind() {
        let report = eyre::eyre!("something else");

        assert_eq!(error_kind(&report), None);
    }
}
