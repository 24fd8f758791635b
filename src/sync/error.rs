use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(
        "mutagen is not installed or not in PATH.\n\
         Install it: https://mutagen.io/documentation/introduction/installation"
    )]
    NotInstalled,

    #[error("Failed to create sync session {0}: {1}")]
    CreateFailed(String, String),

    #[error("Sync session {0} halted with an error: {1}")]
    ErrorState(String, String),

    #[error(
        "Tunnel on port {0} is not reachable end to end.\n\
         The tunnel process is alive but the sandbox connection is gone."
    )]
    TunnelUnreachable(u16),

    #[error("Sync engine did not respond within {0}s")]
    Unresponsive(u64),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SyncError>;
