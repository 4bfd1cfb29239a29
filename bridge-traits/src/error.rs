use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<BridgeError> for std::io::Error {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Io(inner) => inner,
            other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
