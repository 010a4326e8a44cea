//! Error types for parsing and forest construction.

use thiserror::Error;
use uuid::Uuid;

/// Errors from parsing `btrfs subvolume list` output.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The output had no header line.
    #[error("subvolume list output is empty")]
    Empty,

    /// The second line was not the dash separator of the tabular format.
    #[error("expected separator on line 2, got `{0}`")]
    BadSeparator(String),

    /// A column this tool depends on was not announced in the header.
    #[error("missing `{0}` column in subvolume list output")]
    MissingColumn(&'static str),

    /// A data row could not be interpreted.
    #[error("malformed subvolume list output at line {line}: {reason}")]
    Malformed {
        /// 1-based line number within the listing.
        line: usize,
        /// What went wrong with the row.
        reason: String,
    },
}

/// Inconsistencies detected while building a [`CowForest`](crate::CowForest).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CowError {
    /// Two subvolumes in one root claimed the same uuid.
    #[error("duplicate subvolume uuid {0}")]
    DuplicateUuid(Uuid),

    /// Following `parent_uuid` links revisited a subvolume.
    #[error("snapshot parent chain loops through uuid {0}")]
    Cycle(Uuid),
}
