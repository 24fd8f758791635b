//! Readiness cache - host-local "provisioning is done" markers
//!
//! One timestamped marker file per resource. A marker older than the
//! provisioning configuration is treated as absent, so config edits force
//! re-provisioning on the next connect. Losing the cache is harmless:
//! provisioning is idempotent and simply runs again.

use std::fs;
use std::path::PathBuf;

use anyhow::Result;

use crate::config;

#[derive(Debug, Clone)]
pub struct ReadinessCache {
    root: PathBuf,
    config_path: PathBuf,
}

impl ReadinessCache {
    pub fn new(root: PathBuf, config_path: PathBuf) -> Self {
        Self { root, config_path }
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::new(
            config::state_dir()?.join("ready"),
            config::Config::path()?,
        ))
    }

    fn marker_path(&self, resource: &str) -> PathBuf {
        self.root.join(format!("{}.ready", resource))
    }

    /// Whether provisioning for this resource is known complete and the
    /// provisioning configuration has not changed since.
    pub fn is_ready(&self, resource: &str) -> bool {
        let marker = self.marker_path(resource);
        let Ok(marker_mtime) = fs::metadata(&marker).and_then(|m| m.modified()) else {
            return false;
        };

        match fs::metadata(&self.config_path).and_then(|m| m.modified()) {
            Ok(config_mtime) => marker_mtime >= config_mtime,
            // No provisioning config on disk means nothing to invalidate against
            Err(_) => true,
        }
    }

    /// Touch the marker to now.
    pub fn mark_ready(&self, resource: &str) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::write(
            self.marker_path(resource),
            chrono::Utc::now().to_rfc3339(),
        )?;
        Ok(())
    }

    pub fn invalidate(&self, resource: &str) -> Result<()> {
        let marker = self.marker_path(resource);
        if marker.exists() {
            fs::remove_file(marker)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_not_ready_without_marker() {
        let temp = TempDir::new().unwrap();
        let cache = ReadinessCache::new(temp.path().join("ready"), temp.path().join("config.toml"));
        assert!(!cache.is_ready("res"));
    }

    #[test]
    fn test_ready_after_mark() {
        let temp = TempDir::new().unwrap();
        let cache = ReadinessCache::new(temp.path().join("ready"), temp.path().join("config.toml"));

        cache.mark_ready("res").unwrap();
        assert!(cache.is_ready("res"));
    }

    #[test]
    fn test_config_edit_invalidates_marker() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");
        let cache = ReadinessCache::new(temp.path().join("ready"), config_path.clone());

        cache.mark_ready("res").unwrap();
        assert!(cache.is_ready("res"));

        // A config written after the marker must invalidate it; mtime
        // resolution can be coarse, so put real distance between them
        std::thread::sleep(std::time::Duration::from_millis(1100));
        fs::write(&config_path, "[provision]\nsteps = [\"echo hi\"]\n").unwrap();
        assert!(!cache.is_ready("res"));

        // Re-marking repairs it
        std::thread::sleep(std::time::Duration::from_millis(1100));
        cache.mark_ready("res").unwrap();
        assert!(cache.is_ready("res"));
    }

    #[test]
    fn test_invalidate_removes_marker() {
        let temp = TempDir::new().unwrap();
        let cache = ReadinessCache::new(temp.path().join("ready"), temp.path().join("config.toml"));

        cache.mark_ready("res").unwrap();
        cache.invalidate("res").unwrap();
        assert!(!cache.is_ready("res"));
        // Invalidating an absent marker is fine
        cache.invalidate("res").unwrap();
    }

    #[test]
    fn test_markers_are_per_resource() {
        let temp = TempDir::new().unwrap();
        let cache = ReadinessCache::new(temp.path().join("ready"), temp.path().join("config.toml"));

        cache.mark_ready("alpha").unwrap();
        assert!(cache.is_ready("alpha"));
        assert!(!cache.is_ready("beta"));
    }
}
