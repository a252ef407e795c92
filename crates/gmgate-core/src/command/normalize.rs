//! Target marker normalization.
//!
//! Every marker the caller typed is stripped, then exactly one marker for
//! the authorized target is re-inserted where the verb expects it.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use super::policy::{classify, normalize_verb, TargetClass};
use crate::error::{GateError, GateResult};

/// Sigil the game server reads as "apply to this target".
pub const MARKER_SIGIL: char = '@';

/// `@UID` placeholders, `@<digits>`, and any other stray sigil.
static MARKER_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"@(?:UID|\d+)?").ok());

/// A validated in-game target identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetId(String);

impl TargetId {
    /// Parse a target identifier. Surrounding whitespace is trimmed; the
    /// result must be a single non-empty token without the marker sigil.
    pub fn parse(raw: &str) -> GateResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(GateError::Validation("target id must not be empty".to_string()));
        }
        if trimmed.chars().any(|c| c.is_whitespace() || c == MARKER_SIGIL) {
            return Err(GateError::Validation(format!(
                "target id '{}' must be a single token without '{}'",
                trimmed, MARKER_SIGIL
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value, when the identifier is all digits.
    pub fn as_number(&self) -> Option<u64> {
        self.0.parse().ok()
    }

    /// The in-text marker for this target, e.g. `@12345`.
    pub fn marker(&self) -> String {
        format!("{}{}", MARKER_SIGIL, self.0)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Command text ready for transmission, carrying at most one marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedCommand(String);

impl NormalizedCommand {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NormalizedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Remove every target marker and collapse whitespace.
pub fn strip_markers(command: &str) -> String {
    let stripped = match MARKER_PATTERN.as_ref() {
        Some(re) => re.replace_all(command, "").into_owned(),
        None => command.replace(MARKER_SIGIL, ""),
    };
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rewrite `command` so it targets `target` and nothing else.
pub fn normalize(command: &str, target: &TargetId) -> NormalizedCommand {
    let cleaned = strip_markers(command);
    let Some(verb_token) = cleaned.split(' ').next().filter(|t| !t.is_empty()) else {
        return NormalizedCommand(cleaned);
    };

    let marker = target.marker();
    let text = match classify(&normalize_verb(verb_token)) {
        TargetClass::None => cleaned,
        TargetClass::First => match cleaned.split_once(' ') {
            Some((verb, rest)) => format!("{} {} {}", verb, marker, rest),
            None => format!("{} {}", cleaned, marker),
        },
        TargetClass::Last => format!("{} {}", cleaned, marker),
    };
    NormalizedCommand(text)
}
