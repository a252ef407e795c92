//! GM command processing.
//!
//! This module provides:
//! - `policy`: the static verb table (target placement + structural rules)
//! - `normalize`: marker stripping and target re-insertion
//! - `validate`: syntax validation and the dangerous-verb screen

pub mod normalize;
pub mod policy;
pub mod validate;

pub use normalize::{normalize, strip_markers, NormalizedCommand, TargetId, MARKER_SIGIL};
pub use policy::{classify, lookup, normalize_verb, CommandSpec, TargetClass};
pub use validate::{is_dangerous_verb, screen_dangerous, validate_syntax, MAX_COMMAND_LENGTH};
