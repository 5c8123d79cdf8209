//! Record-level operations the control surface performs on top of the store.

pub mod accounts;
pub mod global;
pub mod targets;
pub mod versions;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("target not found")]
    TargetNotFound,
    #[error("account not found")]
    AccountNotFound,
    #[error("invalid host `{0}`")]
    InvalidHost(String),
    #[error("port must be between 1 and 65535")]
    InvalidPort,
    #[error("worker label must be 1-{max} characters", max = targets::MAX_LABEL_LEN)]
    InvalidLabel,
    #[error("{host}:{port} is already registered")]
    DuplicateAddress { host: String, port: u16 },
    #[error("owner already has the maximum of {limit} targets")]
    LimitReached { limit: usize },
    #[error("protocol {protocol} is already registered for `{family}`")]
    DuplicateVersion { family: String, protocol: i32 },
    #[error("`{0}` cannot be set directly")]
    ReservedKey(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Map a store `NotFound` onto the record-specific variant.
fn not_found_as(err: StoreError, missing: RecordError) -> RecordError {
    match err {
        StoreError::NotFound(_) => missing,
        other => RecordError::Store(other),
    }
}
