use thiserror::Error;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("rollout cancelled")]
    Cancelled,

    #[error("peer {0} failed to deploy")]
    PeerFailed(String),
}

pub type RolloutResult<T> = Result<T, RolloutError>;

/// Why a coordinator is not in a clean, idle state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    #[error("deploy in progress")]
    Deploying,

    #[error("last deploy failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("no coordinator known for peer {0}")]
    UnknownPeer(String),
}
