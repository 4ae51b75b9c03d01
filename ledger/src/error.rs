use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("block {0} not found")]
    BlockNotFound(String),

    #[error("malformed wire block: {0}")]
    WireFormat(String),

    #[error("{0}")]
    Other(String),
}
