//! Static verb policy table.
//!
//! Each known verb maps to a [`TargetClass`] describing where the target
//! marker belongs, plus an optional structural validator for its arguments.

use super::validate;

/// Where a verb expects the target marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetClass {
    /// Acts on the executor or the server; never carries a marker.
    None,
    /// Marker sits immediately after the verb (`give @1 202 x5`).
    First,
    /// Marker is appended after all arguments (`tp 1 2 3 @1`).
    Last,
}

/// Structural argument check. Receives the arguments after the verb.
pub type ArgValidator = fn(&[&str]) -> Result<(), String>;

#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub verb: &'static str,
    pub class: TargetClass,
    pub validator: Option<ArgValidator>,
}

const fn spec(verb: &'static str, class: TargetClass, validator: Option<ArgValidator>) -> CommandSpec {
    CommandSpec { verb, class, validator }
}

use TargetClass::{First, Last, None as NoTarget};

static POLICY_TABLE: &[CommandSpec] = &[
    // Item grants
    spec("give", First, Some(validate::give_args)),
    spec("giveall", First, Some(validate::give_args)),
    spec("giveart", Last, None),
    spec("givechar", Last, None),
    // Character management
    spec("avatar", Last, None),
    spec("char", Last, None),
    spec("setfetterlevel", Last, Some(validate::fetter_level_args)),
    spec("setfetter", Last, Some(validate::fetter_level_args)),
    spec("setconstellation", Last, None),
    spec("setconst", Last, None),
    spec("settalent", Last, None),
    spec("talent", Last, None),
    spec("weapon", Last, None),
    // Movement
    spec("tp", Last, Some(validate::teleport_args)),
    spec("teleport", Last, Some(validate::teleport_args)),
    spec("tpall", Last, None),
    // Quests
    spec("quest", First, None),
    // Player state
    spec("heal", Last, None),
    spec("setstats", Last, Some(validate::stat_args)),
    spec("stats", Last, Some(validate::stat_args)),
    spec("setworldlevel", Last, None),
    spec("setwl", Last, None),
    spec("energy", Last, None),
    // Combat
    spec("killall", Last, None),
    spec("killcharacter", Last, None),
    // Team and loadouts
    spec("team", Last, Some(validate::team_args)),
    spec("build", Last, Some(validate::build_args)),
    // Misc player-directed
    spec("mail", Last, None),
    spec("kick", Last, None),
    spec("ban", Last, None),
    spec("unban", Last, None),
    // Informational
    spec("help", NoTarget, None),
    spec("h", NoTarget, None),
    spec("list", NoTarget, None),
    spec("position", NoTarget, None),
    spec("pos", NoTarget, None),
    spec("status", NoTarget, None),
    // Server administration
    spec("reload", NoTarget, None),
    spec("stop", NoTarget, None),
    spec("account", NoTarget, Some(validate::account_args)),
    spec("announce", NoTarget, None),
    spec("announcement", NoTarget, None),
    spec("broadcast", NoTarget, None),
    spec("sendmessage", NoTarget, None),
    spec("say", NoTarget, None),
    spec("permission", NoTarget, Some(validate::permission_args)),
    // Executor-local effects
    spec("clear", NoTarget, Some(validate::clear_args)),
    spec("spawn", NoTarget, Some(validate::spawn_args)),
    spec("weather", NoTarget, Some(validate::weather_args)),
    spec("coop", NoTarget, None),
    spec("enterdungeon", NoTarget, Some(validate::dungeon_args)),
    spec("dungeon", NoTarget, Some(validate::dungeon_args)),
    spec("resetshop", NoTarget, None),
    spec("resetconst", NoTarget, None),
    spec("unlockall", NoTarget, None),
    spec("prop", NoTarget, Some(validate::prop_args)),
    spec("setprop", NoTarget, Some(validate::prop_args)),
    spec("godmode", NoTarget, None),
    spec("god", NoTarget, None),
    spec("nostamina", NoTarget, None),
    spec("ns", NoTarget, None),
    spec("unlimitedenergy", NoTarget, None),
    spec("ue", NoTarget, None),
];

/// Normalize a raw verb token: lower-case with one leading `/` removed.
pub fn normalize_verb(token: &str) -> String {
    let lower = token.to_lowercase();
    match lower.strip_prefix('/') {
        Some(rest) => rest.to_string(),
        None => lower,
    }
}

/// Look up a normalized verb in the policy table.
pub fn lookup(verb: &str) -> Option<&'static CommandSpec> {
    POLICY_TABLE.iter().find(|s| s.verb == verb)
}

/// Target class for a normalized verb.
/// Verbs missing from the table are treated as `Last`.
pub fn classify(verb: &str) -> TargetClass {
    lookup(verb).map(|s| s.class).unwrap_or(TargetClass::Last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_normalize_verb() {
        assert_eq!(normalize_verb("GIVE"), "give");
        assert_eq!(normalize_verb("/tp"), "tp");
        assert_eq!(normalize_verb("//tp"), "/tp"); // only one slash stripped
        assert_eq!(normalize_verb("heal"), "heal");
    }

    #[test]
    fn test_classify_known_verbs() {
        assert_eq!(classify("give"), TargetClass::First);
        assert_eq!(classify("giveall"), TargetClass::First);
        assert_eq!(classify("quest"), TargetClass::First);
        assert_eq!(classify("tp"), TargetClass::Last);
        assert_eq!(classify("heal"), TargetClass::Last);
        assert_eq!(classify("help"), TargetClass::None);
        assert_eq!(classify("clear"), TargetClass::None);
    }

    #[test]
    fn test_classify_unknown_defaults_to_last() {
        assert_eq!(classify("frobnicate"), TargetClass::Last);
        assert!(lookup("frobnicate").is_none());
    }

    #[test]
    fn test_policy_table_has_unique_verbs() {
        let mut seen = HashSet::new();
        for spec in POLICY_TABLE {
            assert!(seen.insert(spec.verb), "duplicate verb: {}", spec.verb);
            assert_eq!(spec.verb, spec.verb.to_lowercase());
        }
    }
}
