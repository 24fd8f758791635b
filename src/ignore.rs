//! Ignore rule compilation
//!
//! Builds the ordered `--ignore` pattern list handed to the sync engine.
//! The engine resolves patterns last-match-wins, so ordering is load-bearing:
//! baseline patterns first, root gitignore rules next, nested gitignore rules
//! after (scoped to their directory), and the forced `!.git` re-inclusion
//! last so no rule can exclude repository metadata from the session.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

/// Always excluded: dependency directories, build output, OS metadata.
pub const BASELINE_IGNORES: &[&str] = &[
    "node_modules",
    ".venv",
    "venv",
    "target",
    "__pycache__",
    ".mypy_cache",
    ".DS_Store",
    "Thumbs.db",
];

/// Extra build-artifact directories excluded when the root is not under
/// version control and no gitignore files can tell us better.
const FALLBACK_IGNORES: &[&str] = &["dist", "build", "out", ".cache", ".next"];

/// Directories never descended into while discovering ignore files. These
/// are huge and never contain gitignore rules we want.
const SKIP_DESCENT: &[&str] = &[
    ".git",
    "node_modules",
    ".venv",
    "venv",
    "target",
    "__pycache__",
    ".cache",
];

/// Compile the ordered ignore rule list for a local root. Never fails:
/// unreadable ignore files are skipped with a warning.
pub fn compile(root: &Path) -> Vec<String> {
    let mut rules: Vec<String> = BASELINE_IGNORES.iter().map(|s| s.to_string()).collect();

    if git2::Repository::discover(root).is_err() {
        for pattern in FALLBACK_IGNORES {
            push_unique(&mut rules, pattern.to_string());
        }
        return rules;
    }

    let mut ignore_files = Vec::new();
    collect_ignore_files(root, &mut ignore_files);
    // Root rules before nested ones so nested negations can override them
    ignore_files.sort_by_key(|p| (p.components().count(), p.clone()));

    for file in ignore_files {
        let content = match fs::read_to_string(&file) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %file.display(), "skipping unreadable ignore file: {}", e);
                continue;
            }
        };

        let prefix = file
            .parent()
            .and_then(|dir| dir.strip_prefix(root).ok())
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(|rel| rel.to_string_lossy().into_owned());

        for line in content.lines() {
            if let Some(rule) = compile_line(line, prefix.as_deref()) {
                push_unique(&mut rules, rule);
            }
        }
    }

    // Branch and commit state must stay synchronized; appended last so it
    // wins over any rule excluding the git directory.
    rules.push("!.git".to_string());
    rules
}

/// Turn one gitignore line into a scoped engine pattern, or `None` for
/// comments and blanks.
fn compile_line(line: &str, prefix: Option<&str>) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }

    let (negated, body) = match trimmed.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, trimmed),
    };

    let body = body.trim_matches('/');
    if body.is_empty() {
        return None;
    }

    let scoped = match prefix {
        Some(p) => format!("{}/{}", p, body),
        None => body.to_string(),
    };

    Some(if negated {
        format!("!{}", scoped)
    } else {
        scoped
    })
}

fn push_unique(rules: &mut Vec<String>, rule: String) {
    if !rules.contains(&rule) {
        rules.push(rule);
    }
}

fn collect_ignore_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if path.is_dir() {
            if SKIP_DESCENT.contains(&name.as_ref()) {
                continue;
            }
            collect_ignore_files(&path, files);
        } else if name == ".gitignore" {
            files.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git_root() -> TempDir {
        let dir = TempDir::new().unwrap();
        git2::Repository::init(dir.path()).unwrap();
        dir
    }

    #[test]
    fn test_fallback_without_version_control() {
        let dir = TempDir::new().unwrap();
        let rules = compile(dir.path());

        assert!(rules.contains(&"node_modules".to_string()));
        assert!(rules.contains(&"dist".to_string()));
        assert!(!rules.contains(&"!.git".to_string()));
    }

    #[test]
    fn test_baseline_always_present() {
        let dir = git_root();
        let rules = compile(dir.path());
        for pattern in BASELINE_IGNORES {
            assert!(rules.contains(&pattern.to_string()), "missing {}", pattern);
        }
    }

    #[test]
    fn test_comments_and_blanks_skipped() {
        assert_eq!(compile_line("# a comment", None), None);
        assert_eq!(compile_line("   ", None), None);
        assert_eq!(compile_line("", None), None);
    }

    #[test]
    fn test_separator_trimming() {
        assert_eq!(compile_line("/build/", None), Some("build".to_string()));
        assert_eq!(compile_line("  logs/ ", None), Some("logs".to_string()));
    }

    #[test]
    fn test_negation_with_prefix() {
        assert_eq!(
            compile_line("!keep.txt", Some("important")),
            Some("!important/keep.txt".to_string())
        );
    }

    #[test]
    fn test_nested_negation_ordered_after_root_exclude() {
        let dir = git_root();
        std::fs::write(dir.path().join(".gitignore"), "build/\n").unwrap();
        let nested = dir.path().join("important");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join(".gitignore"), "!keep.txt\n").unwrap();

        let rules = compile(dir.path());
        let exclude = rules.iter().position(|r| r == "build").unwrap();
        let reinclude = rules
            .iter()
            .position(|r| r == "!important/keep.txt")
            .unwrap();
        assert!(
            exclude < reinclude,
            "re-inclusion must come after the exclusion for last-match-wins"
        );
    }

    #[test]
    fn test_dedup_against_baseline() {
        let dir = git_root();
        std::fs::write(dir.path().join(".gitignore"), "node_modules\ntarget/\n").unwrap();

        let rules = compile(dir.path());
        assert_eq!(
            rules.iter().filter(|r| *r == "node_modules").count(),
            1,
            "baseline patterns must not repeat"
        );
        assert_eq!(rules.iter().filter(|r| *r == "target").count(), 1);
    }

    #[test]
    fn test_git_dir_reinclusion_is_last() {
        let dir = git_root();
        std::fs::write(dir.path().join(".gitignore"), ".git\n").unwrap();

        let rules = compile(dir.path());
        assert_eq!(rules.last().unwrap(), "!.git");
    }

    #[test]
    fn test_no_descent_into_dependency_dirs() {
        let dir = git_root();
        let deps = dir.path().join("node_modules/pkg");
        std::fs::create_dir_all(&deps).unwrap();
        std::fs::write(deps.join(".gitignore"), "secret-pattern\n").unwrap();

        let rules = compile(dir.path());
        assert!(!rules.iter().any(|r| r.contains("secret-pattern")));
    }
}
