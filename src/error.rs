use thiserror::Error;

/// The error kinds the core surfaces to any caller built on top of it (§7).
#[derive(Debug, Error)]
pub enum SilmarilError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("bad state: {0}")]
    BadState(String),

    #[error("integrity error: {0}")]
    IntegrityError(String),

    #[error("signature mismatch: {0}")]
    SignatureMismatch(String),

    #[error("daemon lock held")]
    LockHeld,

    #[error("network transient: {0}")]
    NetworkTransient(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, SilmarilError>;

impl From<std::io::Error> for SilmarilError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => SilmarilError::NotFound(e.to_string()),
            std::io::ErrorKind::AlreadyExists => SilmarilError::AlreadyExists(e.to_string()),
            _ => SilmarilError::Fatal(format!("io error: {e}")),
        }
    }
}

impl From<serde_json::Error> for SilmarilError {
    fn from(e: serde_json::Error) -> Self {
        SilmarilError::IntegrityError(format!("json error: {e}"))
    }
}
