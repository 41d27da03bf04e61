use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No node at {0}")]
    NoNode(String),

    #[error("Node {0} still has children")]
    NotEmpty(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid instance payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid instance id: {0}")]
    InstanceId(#[from] corelib::Error),

    #[error("Session {0} is closed")]
    SessionClosed(u64),
}
