//! The crate-wide error taxonomy. One variant per failure kind named in the
//! design: nothing is retried internally, every error surfaces to the
//! caller, and a failed mutation never auto-aborts the enclosing
//! transaction.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("schema invalid: {0}")]
    SchemaInvalid(String),

    #[error("unknown table `{0}`")]
    UnknownTable(String),

    #[error("unknown index `{1}` on table `{0}`")]
    UnknownIndex(String, String),

    #[error("argument mismatch for index `{1}` on table `{0}`: {2}")]
    ArgMismatch(String, String, String),

    #[error("unique constraint violation on index `{1}` of table `{0}`")]
    UniqueConstraintViolation(String, String),

    #[error("record is missing a value for required index `{1}` on table `{0}`")]
    MissingRequiredIndex(String, String),

    #[error("not found")]
    NotFound,

    #[error("operation on a closed transaction")]
    TxnClosed,

    #[error("`deletePrefix` is only supported on the primary index, got `{0}`")]
    DeletePrefixUnsupported(String),
}
