//! Sandbox control-plane adapter

pub mod cli;
pub mod control_interface;
pub mod error;

use std::time::Duration;

pub use cli::SbCli;
pub use control_interface::{ControlPlane, ExecRequest};
use error::{Result, SandboxError};
use tracing::{info, warn};

/// Base delay between creation/reachability retries; doubled per attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

pub struct Sandbox<'a, T: ControlPlane> {
    pub name: String,
    control: &'a T,
}

impl<'a, T: ControlPlane> Sandbox<'a, T> {
    pub fn new(resource: &str, control: &'a T) -> Self {
        Self {
            name: resource.to_string(),
            control,
        }
    }

    pub fn exists(&self) -> Result<bool> {
        self.control.sandbox_exists(&self.name)
    }

    /// Make sure the sandbox exists, creating it if needed. Creation and the
    /// first reachability check are retried with backoff: a sandbox that was
    /// just created is often not reachable for a few seconds.
    pub fn ensure_exists(&self, image: Option<&str>, attempts: u32) -> Result<()> {
        if !self.control.is_available() {
            return Err(SandboxError::CliNotInstalled);
        }

        if self.exists()? {
            return Ok(());
        }

        info!(sandbox = %self.name, "creating sandbox");
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match self.control.create_sandbox(&self.name, image) {
                Ok(()) => return Ok(()),
                Err(SandboxError::CreateFailed(_, detail)) => {
                    warn!(
                        sandbox = %self.name,
                        attempt,
                        "sandbox creation failed, retrying: {}",
                        detail
                    );
                    last_error = detail;
                    std::thread::sleep(RETRY_BASE_DELAY * attempt);
                }
                Err(other) => return Err(other),
            }
        }

        Err(SandboxError::Unreachable {
            attempts,
            detail: last_error,
        })
    }

    /// Run one provisioning step inside the sandbox. Fatal on non-zero exit,
    /// with captured output in the error.
    pub fn run_step(&self, script: &str, workdir: &str) -> Result<()> {
        let mut request = ExecRequest::shell(script);
        request.workdir = Some(workdir.to_string());

        let output = self.control.exec(&self.name, &request)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandboxError::ExecFailed(
                self.name.clone(),
                format!("`{}`: {}", script, stderr.trim()),
            ));
        }
        Ok(())
    }
}
