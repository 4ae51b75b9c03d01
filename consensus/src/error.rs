use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("election capacity reached ({0} active)")]
    ElectionCapacityReached(usize),

    #[error("{0}")]
    Other(String),
}
