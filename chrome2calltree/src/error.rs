use crate::profile::NodeId;
use callgrind_parse::WriteError;
use thiserror::Error;

/// Errors that can occur while loading or converting a CPU profile.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid profile: {0}")]
    InvalidProfile(String),

    #[error("profile has no root node")]
    MissingRoot,

    #[error("node {parent} references unknown child node {child}")]
    UnknownNode { parent: NodeId, child: NodeId },

    #[error("node {0} is reachable from more than one parent")]
    SharedNode(NodeId),

    #[error("node ID {0} appears more than once")]
    DuplicateNode(NodeId),
}

impl From<WriteError> for ConvertError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::Io(e) => ConvertError::Io(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
