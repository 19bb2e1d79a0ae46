//! Store errors.

use thiserror::Error;

pub type StateResult<T> = Result<T, StateError>;

/// A failed store operation, carrying the backend's message.
///
/// Nothing here says whether a retry could succeed; callers that retry
/// (asset uploads) do so on every variant.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot open store: {0}")]
    Open(String),

    #[error("store transaction failed: {0}")]
    Transaction(String),

    #[error("store table unavailable: {0}")]
    Table(String),

    #[error("store read failed: {0}")]
    Read(String),

    #[error("store write failed: {0}")]
    Write(String),

    #[error("cannot encode record: {0}")]
    Encode(String),

    #[error("stored record is corrupt: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_step() {
        let err = StateError::Decode("expected value at line 1".into());
        assert_eq!(err.to_string(), "stored record is corrupt: expected value at line 1");
        assert!(StateError::Write("disk full".into()).to_string().starts_with("store write failed"));
    }
}
