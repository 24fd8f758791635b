//! Control plane backed by the `sb` CLI

use std::process::Command;

use super::control_interface::{ControlPlane, ExecRequest};
use super::error::{Result, SandboxError};

pub struct SbCli {
    bin: String,
}

impl SbCli {
    pub fn new(bin: &str) -> Self {
        Self {
            bin: bin.to_string(),
        }
    }
}

impl Default for SbCli {
    fn default() -> Self {
        let bin = crate::config::Config::load()
            .map(|c| c.sandbox.bin)
            .unwrap_or_else(|_| "sb".to_string());
        Self { bin }
    }
}

impl ControlPlane for SbCli {
    fn is_available(&self) -> bool {
        Command::new(&self.bin)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn sandbox_exists(&self, name: &str) -> Result<bool> {
        let output = Command::new(&self.bin).args(["status", name]).output()?;
        Ok(output.status.success())
    }

    fn create_sandbox(&self, name: &str, image: Option<&str>) -> Result<()> {
        let mut args = vec!["create".to_string(), name.to_string()];
        if let Some(image) = image {
            args.push("--image".to_string());
            args.push(image.to_string());
        }

        let output = Command::new(&self.bin).args(&args).output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SandboxError::CreateFailed(
                name.to_string(),
                stderr.trim().to_string(),
            ));
        }
        Ok(())
    }

    fn exec(&self, name: &str, request: &ExecRequest) -> Result<std::process::Output> {
        let mut args = vec!["exec".to_string(), name.to_string()];

        for (key, value) in &request.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        if let Some(workdir) = &request.workdir {
            args.push("-w".to_string());
            args.push(workdir.clone());
        }
        if request.pty {
            args.push("-t".to_string());
        }
        args.push("--".to_string());
        args.extend(request.command.iter().cloned());

        let output = Command::new(&self.bin).args(&args).output()?;
        Ok(output)
    }

    fn forward_args(&self, name: &str, local_port: u16, remote_port: u16) -> Vec<String> {
        vec![
            self.bin.clone(),
            "forward".to_string(),
            name.to_string(),
            format!("{}:{}", local_port, remote_port),
        ]
    }
}
