use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(
        "Sandbox CLI is not installed or not in PATH.\n\
         Set [sandbox] bin in config.toml to the control-plane binary."
    )]
    CliNotInstalled,

    #[error("Failed to create sandbox {0}: {1}")]
    CreateFailed(String, String),

    #[error("Sandbox unreachable after {attempts} attempts: {detail}")]
    Unreachable { attempts: u32, detail: String },

    #[error("Command failed in sandbox {0}: {1}")]
    ExecFailed(String, String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
