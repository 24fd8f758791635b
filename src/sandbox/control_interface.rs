//! Control-plane seam
//!
//! Everything the coordinator needs from the sandbox control plane, behind a
//! trait so tests can substitute a fake. All operations are treated as slow
//! and fallible; success is exit status, diagnostics are captured output.

use super::error::Result;

/// A command to run inside a sandbox.
#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub workdir: Option<String>,
    pub pty: bool,
}

impl ExecRequest {
    pub fn shell(script: &str) -> Self {
        Self {
            command: vec!["sh".to_string(), "-lc".to_string(), script.to_string()],
            ..Default::default()
        }
    }
}

pub trait ControlPlane {
    /// Whether the control-plane CLI is usable at all.
    fn is_available(&self) -> bool;

    fn sandbox_exists(&self, name: &str) -> Result<bool>;

    fn create_sandbox(&self, name: &str, image: Option<&str>) -> Result<()>;

    fn exec(&self, name: &str, request: &ExecRequest) -> Result<std::process::Output>;

    /// The argv for the long-lived local-to-remote port-forward process.
    /// The caller owns spawning and supervising it; this only describes it,
    /// so the same argv doubles as the orphan-sweep signature.
    fn forward_args(&self, name: &str, local_port: u16, remote_port: u16) -> Vec<String>;
}
