//! CLI command implementations

pub mod connect;
pub mod definition;
pub mod resync;
pub mod status;
pub mod watch;

pub use definition::{Cli, Commands};

use std::path::PathBuf;

use anyhow::Result;

/// Resolve the directory a command operates on.
pub fn resolve_path(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(p),
        None => Ok(std::env::current_dir()?),
    }
}

/// Shorten a string to at most `max` bytes for display, cutting on a char
/// boundary. Conflict paths are arbitrary user filenames, so multibyte
/// content must not panic the slice.
pub fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = if max <= 3 { max } else { max - 3 };
    while !s.is_char_boundary(end) {
        end -= 1;
    }

    if max <= 3 {
        s[..end].to_string()
    } else {
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_shorter_than_max() {
        assert_eq!(truncate("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_longer_than_max() {
        assert_eq!(truncate("hello world", 8), "hello...");
    }

    #[test]
    fn test_truncate_with_small_max() {
        assert_eq!(truncate("hello", 3), "hel");
        assert_eq!(truncate("hello", 0), "");
    }

    #[test]
    fn test_truncate_multibyte_path_on_char_boundary() {
        // 4 + 80 bytes; a byte cut at 67 would land mid-character
        let path = format!("src/{}", "é".repeat(40));
        let out = truncate(&path, 70);
        assert!(out.ends_with("..."));
        assert!(out.len() <= 70);
        assert!(out.starts_with("src/é"));
    }

    #[test]
    fn test_truncate_multibyte_with_small_max() {
        assert_eq!(truncate("ééé", 2), "é");
        assert_eq!(truncate("ééé", 1), "");
    }

    #[test]
    fn test_resolve_path_explicit() {
        let p = resolve_path(Some(PathBuf::from("/tmp"))).unwrap();
        assert_eq!(p, PathBuf::from("/tmp"));
    }

    #[test]
    fn test_resolve_path_defaults_to_cwd() {
        let p = resolve_path(None).unwrap();
        assert_eq!(p, std::env::current_dir().unwrap());
    }
}
