//! Resource name derivation
//!
//! A resource name is the stable key every piece of coordination state hangs
//! off: registry directory, tunnel process signature, sync session name,
//! readiness marker. It must be identical across invocations from anywhere
//! inside the same project, so it is derived from repository identity (origin
//! URL when present, otherwise the repository workdir) rather than whatever
//! subdirectory the tool happens to be run from.

use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

const NAME_MAX: usize = 24;
const DIGEST_CHARS: usize = 8;

/// Derive the deterministic resource name for a local directory.
pub fn resource_name(path: &Path) -> Result<String> {
    let path = path
        .canonicalize()
        .with_context(|| format!("Cannot resolve path: {}", path.display()))?;

    let (base_dir, identity) = match git2::Repository::discover(&path) {
        Ok(repo) => {
            let workdir = repo.workdir().unwrap_or(&path).to_path_buf();
            let identity = repo
                .find_remote("origin")
                .ok()
                .and_then(|r| r.url().map(str::to_string))
                .unwrap_or_else(|| workdir.to_string_lossy().into_owned());
            (workdir, identity)
        }
        Err(_) => (path.clone(), path.to_string_lossy().into_owned()),
    };

    let base = base_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workdir".to_string());

    Ok(format!("{}-{}", sanitize(&base), short_digest(&identity)))
}

/// The local directory a resource name is rooted at: the repository workdir
/// when under version control, the directory itself otherwise.
pub fn local_root(path: &Path) -> Result<std::path::PathBuf> {
    let path = path
        .canonicalize()
        .with_context(|| format!("Cannot resolve path: {}", path.display()))?;

    match git2::Repository::discover(&path) {
        Ok(repo) => Ok(repo.workdir().unwrap_or(&path).to_path_buf()),
        Err(_) => Ok(path),
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .take(NAME_MAX)
        .collect();
    cleaned.trim_matches('-').to_string()
}

fn short_digest(identity: &str) -> String {
    let digest = Sha256::digest(identity.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..DIGEST_CHARS].to_string()
}
