//! Parsing of the sync engine's free-text status report
//!
//! `mutagen sync list -l` prints one block per session separated by dashed
//! lines. Only the fields the coordinator acts on are extracted: the status
//! line, the conflict count, and a few sample conflicted paths for display.

use regex::Regex;
use std::sync::OnceLock;

/// How many conflicted paths we keep for user-facing reporting.
pub const CONFLICT_SAMPLE_CAP: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Absent,
    Initializing,
    Watching,
    Error,
    /// Watching, with divergent changes flagged on both sides. Usable, not
    /// an error.
    Conflicted,
}

impl SyncState {
    /// Whether the session is serving its purpose in this state.
    pub fn is_usable(self) -> bool {
        matches!(self, SyncState::Watching | SyncState::Conflicted)
    }
}

#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub state: SyncState,
    pub conflicts: u32,
    pub samples: Vec<String>,
}

impl SessionStatus {
    pub fn absent() -> Self {
        Self {
            state: SyncState::Absent,
            conflicts: 0,
            samples: Vec::new(),
        }
    }
}

fn conflict_count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Conflicts:\s*(\d+)").expect("static regex"))
}

/// Parse the status of the named session out of a full `sync list` report.
/// A session that does not appear in the report is absent; a missing
/// conflict count means zero conflicts, not unknown.
pub fn parse_session_status(report: &str, session_name: &str) -> SessionStatus {
    let Some(block) = session_block(report, session_name) else {
        return SessionStatus::absent();
    };

    let conflicts = conflict_count_re()
        .captures(block)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0);

    let state = if block_has_error(block) {
        SyncState::Error
    } else if conflicts > 0 {
        SyncState::Conflicted
    } else if block_is_watching(block) {
        SyncState::Watching
    } else {
        SyncState::Initializing
    };

    SessionStatus {
        state,
        conflicts,
        samples: conflict_samples(block),
    }
}

fn session_block<'a>(report: &'a str, session_name: &str) -> Option<&'a str> {
    for block in report.split("--------------------------------------------------------------------------------") {
        let named = block.lines().any(|line| {
            line.trim()
                .strip_prefix("Name:")
                .map(|rest| rest.trim() == session_name)
                .unwrap_or(false)
        });
        if named {
            return Some(block);
        }
    }
    None
}

fn block_is_watching(block: &str) -> bool {
    block
        .lines()
        .any(|line| line.trim().starts_with("Status:") && line.contains("Watching"))
}

fn block_has_error(block: &str) -> bool {
    block.lines().any(|line| {
        let trimmed = line.trim();
        (trimmed.starts_with("Status:") && trimmed.contains("Halted"))
            || trimmed.starts_with("Last error:")
    })
}

/// Sample conflicted paths: indented entries under the "Conflicts:" field,
/// with the engine's side markers stripped, capped for display.
fn conflict_samples(block: &str) -> Vec<String> {
    let mut samples = Vec::new();
    let mut in_conflicts = false;

    for line in block.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("Conflicts:") {
            in_conflicts = true;
            continue;
        }
        if !in_conflicts {
            continue;
        }
        if !line.starts_with(|c: char| c.is_whitespace()) || trimmed.is_empty() {
            break;
        }

        let path = trimmed
            .trim_start_matches("(alpha)")
            .trim_start_matches("(beta)")
            .trim_start_matches("(α)")
            .trim_start_matches("(β)")
            .trim();
        if path.is_empty() {
            continue;
        }
        if samples.len() < CONFLICT_SAMPLE_CAP {
            samples.push(path.to_string());
        }
    }

    samples
}
