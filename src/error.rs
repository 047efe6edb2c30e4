use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("computation cancelled")]
    Cancelled,
    #[error("no market paths to simulate")]
    EmptyEnsemble,
}
