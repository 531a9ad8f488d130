use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::tree::TreeError;

/// The server's error surface. Every fatal path is logged under a stable
/// `cy::` target so operators can grep for it.
#[derive(Debug, Error)]
pub enum CyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid: {0}")]
    Invalid(String),
    #[error("cancelled")]
    Cancelled,
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<TreeError> for CyError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::NotFound(id) => CyError::NotFound(format!("node {}", id)),
            TreeError::NotAGroup(id) => CyError::Invalid(format!("node {} is not a group", id)),
            TreeError::RemoveRoot => CyError::Invalid("the root group cannot be removed".into()),
            TreeError::Spawn(err) => CyError::Internal(err.to_string()),
        }
    }
}
