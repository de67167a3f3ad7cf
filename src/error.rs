use std::path::PathBuf;
use thiserror::Error;

/// Every failure the ledger core can surface. Nothing opaque crosses this
/// boundary; the flow layer decides what to tell the user for each kind.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger file does not exist yet: {}", path.display())]
    StoreNotFound { path: PathBuf },

    #[error("cannot parse {value:?} as a coin amount")]
    Parse { value: String },

    #[error("no open position to close for {subject}")]
    NoOpenPosition { subject: String },

    #[error("ledger i/o failed while {op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl LedgerError {
    pub fn io(op: &'static str, source: std::io::Error) -> Self {
        Self::Io { op, source }
    }

    /// csv wraps its own parse failures; at the file level they are all i/o.
    pub fn csv(op: &'static str, source: csv::Error) -> Self {
        Self::Io {
            op,
            source: std::io::Error::other(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
