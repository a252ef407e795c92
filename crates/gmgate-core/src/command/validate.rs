//! Command validation and danger screening.
//!
//! Two independent checks run before anything touches the network:
//! - [`validate_syntax`] rejects malformed input and applies the per-verb
//!   structural rules from the policy table.
//! - [`screen_dangerous`] rejects deny-listed verbs outright, regardless of
//!   how well-formed they are.

use std::sync::LazyLock;

use regex::Regex;

use super::normalize::strip_markers;
use super::policy::{lookup, normalize_verb};
use crate::error::{GateError, GateResult};

// ============================================================================
// Constants
// ============================================================================

/// Maximum accepted command length in characters.
pub const MAX_COMMAND_LENGTH: usize = 500;

/// Shell-style separators that are never allowed in a command.
const FORBIDDEN_SEQUENCES: &[&str] = &[";", "&&", "|"];

/// Verbs that are never exposed through the gate, with the reason shown to the caller.
const DANGEROUS_VERBS: &[(&str, &str)] = &[
    ("account", "account management can create or delete server accounts"),
    ("ban", "banning players is reserved for server administrators"),
    ("unban", "unbanning players is reserved for server administrators"),
    ("permission", "permission changes can escalate privileges"),
    ("stop", "stopping the server affects every player"),
    ("reload", "reloading the server affects every player"),
];

const CLEAR_TARGETS: &[&str] = &["all", "wp", "art", "mat"];
const ACCOUNT_ACTIONS: &[&str] = &["create", "delete"];
const PERMISSION_ACTIONS: &[&str] = &["add", "remove"];
const TEAM_ACTIONS: &[&str] = &["add", "remove", "set"];

static GIVE_MODIFIERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^(\d+x|x\d+)$",
        r"^(lv|l|lvl)\d+$",
        r"^r\d+$",
        r"^c\d+$",
        r"^((lv|l|lvl)?\d+)?(r\d+)?(c\d+)?(x\d+)?$",
        r"^\d+\*$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

// ============================================================================
// Entry points
// ============================================================================

/// Validate command syntax and the verb's structural rule, if it has one.
///
/// Verbs without a structural rule pass unconditionally.
pub fn validate_syntax(command: &str) -> GateResult<()> {
    let command = command.trim();
    if command.is_empty() {
        return Err(GateError::Validation("command must not be empty".to_string()));
    }
    if command.chars().count() > MAX_COMMAND_LENGTH {
        return Err(GateError::Validation(format!(
            "command is too long (at most {} characters)",
            MAX_COMMAND_LENGTH
        )));
    }
    if FORBIDDEN_SEQUENCES.iter().any(|s| command.contains(s)) {
        return Err(GateError::Validation(
            "command contains disallowed characters".to_string(),
        ));
    }

    // Structural rules see the command as the server will, minus any
    // caller-supplied markers.
    let cleaned = strip_markers(command);
    let parts: Vec<&str> = cleaned.split_whitespace().collect();
    let Some((verb, args)) = parts.split_first() else {
        return Err(GateError::Validation("command has no verb".to_string()));
    };
    let verb = normalize_verb(verb);

    if let Some(validator) = lookup(&verb).and_then(|s| s.validator) {
        validator(args).map_err(GateError::Validation)?;
    }
    Ok(())
}

/// Reject deny-listed verbs.
///
/// The verb is read from the marker-stripped text, the same text the
/// normalizer classifies and forwards.
pub fn screen_dangerous(command: &str) -> GateResult<()> {
    let cleaned = strip_markers(command);
    let Some(first) = cleaned.split_whitespace().next() else {
        return Ok(());
    };
    let verb = normalize_verb(first);
    match DANGEROUS_VERBS.iter().find(|(v, _)| *v == verb) {
        Some((v, reason)) => Err(GateError::Dangerous(format!("'{}': {}", v, reason))),
        None => Ok(()),
    }
}

/// Whether a verb is on the deny-list.
pub fn is_dangerous_verb(verb: &str) -> bool {
    let verb = normalize_verb(verb);
    DANGEROUS_VERBS.iter().any(|(v, _)| *v == verb)
}

// ============================================================================
// Structural rules
// ============================================================================

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

fn one_of(value: &str, allowed: &[&str]) -> bool {
    let lower = value.to_lowercase();
    allowed.iter().any(|a| *a == lower)
}

fn is_give_modifier(arg: &str) -> bool {
    let lower = arg.to_lowercase();
    GIVE_MODIFIERS.iter().any(|re| re.is_match(&lower))
}

pub(crate) fn clear_args(args: &[&str]) -> Result<(), String> {
    let Some(target) = args.first() else {
        return Err("clear needs an argument: clear <all|wp|art|mat> [lv<level>] [r<refinement>] [<quality>*]".to_string());
    };
    if !one_of(target, CLEAR_TARGETS) {
        return Err("clear target must be one of all, wp, art, mat".to_string());
    }
    Ok(())
}

pub(crate) fn give_args(args: &[&str]) -> Result<(), String> {
    let Some(item) = args.first() else {
        return Err("give needs an item or avatar id: give <itemId|avatarId> [x<amount>] [lv<level>] [r<refinement>] [c<constellation>]".to_string());
    };
    if !is_digits(item) {
        return Err("give item/avatar id must be numeric".to_string());
    }
    for arg in &args[1..] {
        if !is_give_modifier(arg) {
            return Err(format!(
                "unsupported give modifier '{}' (expected x<amount>, lv<level>, r<refinement>, c<constellation>)",
                arg
            ));
        }
    }
    Ok(())
}

pub(crate) fn spawn_args(args: &[&str]) -> Result<(), String> {
    let Some(entity) = args.first() else {
        return Err("spawn needs an entity id: spawn <entityId> [amount] [level]".to_string());
    };
    if !is_digits(entity) {
        return Err("spawn entity id must be numeric".to_string());
    }
    if let Some(amount) = args.get(1) {
        if !is_digits(amount) && !amount.starts_with('x') {
            return Err("spawn amount must be numeric".to_string());
        }
    }
    Ok(())
}

pub(crate) fn prop_args(args: &[&str]) -> Result<(), String> {
    if args.is_empty() {
        return Err("prop needs arguments: prop <property> <value>".to_string());
    }
    Ok(())
}

pub(crate) fn account_args(args: &[&str]) -> Result<(), String> {
    if args.len() < 2 {
        return Err("account needs arguments: account <create|delete> <username> [uid]".to_string());
    }
    if !one_of(args[0], ACCOUNT_ACTIONS) {
        return Err("account action must be create or delete".to_string());
    }
    Ok(())
}

pub(crate) fn permission_args(args: &[&str]) -> Result<(), String> {
    if args.len() < 2 {
        return Err("permission needs arguments: permission <add|remove> <permission>".to_string());
    }
    if !one_of(args[0], PERMISSION_ACTIONS) {
        return Err("permission action must be add or remove".to_string());
    }
    Ok(())
}

pub(crate) fn teleport_args(args: &[&str]) -> Result<(), String> {
    if args.is_empty() {
        return Err("teleport needs arguments: tp <x> <y> <z> [sceneId]".to_string());
    }
    if args.len() < 3 {
        return Err("teleport needs three coordinates (x, y, z)".to_string());
    }
    Ok(())
}

pub(crate) fn team_args(args: &[&str]) -> Result<(), String> {
    let Some(action) = args.first() else {
        return Err("team needs an action: team <add|remove|set> [avatarId,...]".to_string());
    };
    if !one_of(action, TEAM_ACTIONS) {
        return Err("team action must be add, remove or set".to_string());
    }
    Ok(())
}

pub(crate) fn dungeon_args(args: &[&str]) -> Result<(), String> {
    let Some(id) = args.first() else {
        return Err("enterdungeon needs a dungeon id: enterdungeon <dungeonId>".to_string());
    };
    if !is_digits(id) {
        return Err("dungeon id must be numeric".to_string());
    }
    Ok(())
}

pub(crate) fn stat_args(args: &[&str]) -> Result<(), String> {
    if args.len() < 2 {
        return Err("setstats needs arguments: setstats <stat> <value>".to_string());
    }
    Ok(())
}

pub(crate) fn fetter_level_args(args: &[&str]) -> Result<(), String> {
    let Some(level) = args.first() else {
        return Err("setfetterlevel needs a level: setfetterlevel <level>".to_string());
    };
    if !is_digits(level) {
        return Err("friendship level must be numeric".to_string());
    }
    Ok(())
}

pub(crate) fn weather_args(args: &[&str]) -> Result<(), String> {
    match args.first() {
        Some(id) if !is_digits(id) => {
            Err("weather id must be numeric: weather [weatherId] [climateId]".to_string())
        }
        _ => Ok(()),
    }
}

pub(crate) fn build_args(args: &[&str]) -> Result<(), String> {
    let Some(name) = args.first() else {
        return Err("build needs a build name: build <buildName>".to_string());
    };
    if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err("build name may only contain letters and digits".to_string());
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
