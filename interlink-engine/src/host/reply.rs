//! Reply-code action evaluation for outbound HL7 operations.
//!
//! `ReplyCodeActions` is a comma-separated list of `pattern=action` pairs
//! evaluated first-match against the `MSA-1` code of a received ACK, e.g.
//! `:?R=F,:?E=S,:*=S`.

// Layer 1: Standard library imports
use std::str::FromStr;

// Layer 2: Third-party crate imports
// (none)

// Layer 3: Internal module imports
use crate::error::EngineError;

/// Outcome mapped from an ACK code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    /// Record the send and complete the WAL entry.
    Success,
    /// Record a failure; the WAL entry is failed without retry.
    Fail,
    /// Raise the retry signal; re-queue subject to `MaxRetries`.
    Retry,
    /// Record a warning but treat as success.
    Warn,
}

impl FromStr for AckAction {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "S" => Ok(AckAction::Success),
            "F" => Ok(AckAction::Fail),
            "R" => Ok(AckAction::Retry),
            "W" => Ok(AckAction::Warn),
            other => Err(EngineError::configuration(format!(
                "unknown reply-code action: '{other}'"
            ))),
        }
    }
}

/// Parsed `pattern=action` list with first-match evaluation.
///
/// Patterns: `AA`/`AE`/`AR`/`CA`/`CE`/`CR` exact, `?E` any error code,
/// `?R` any reject code, `*` wildcard. Leading `:` on a pattern is
/// tolerated. An absent or empty list means `*=S`.
///
/// # Examples
///
/// ```rust
/// use interlink_engine::host::{AckAction, ReplyCodeActions};
///
/// let actions = ReplyCodeActions::parse(":?R=F,:?E=S,:*=S").unwrap();
/// assert_eq!(actions.action_for("AA"), AckAction::Success);
/// assert_eq!(actions.action_for("AE"), AckAction::Success);
/// assert_eq!(actions.action_for("AR"), AckAction::Fail);
/// assert_eq!(actions.action_for("CR"), AckAction::Fail);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyCodeActions {
    rules: Vec<(String, AckAction)>,
}

impl Default for ReplyCodeActions {
    fn default() -> Self {
        Self {
            rules: vec![("*".to_string(), AckAction::Success)],
        }
    }
}

impl ReplyCodeActions {
    /// Parse a `pattern=action` list; empty input yields the default `*=S`.
    pub fn parse(text: &str) -> Result<Self, EngineError> {
        let mut rules = Vec::new();
        for pair in text.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (pattern, action) = pair.split_once('=').ok_or_else(|| {
                EngineError::configuration(format!("malformed reply-code pair: '{pair}'"))
            })?;
            let pattern = pattern.trim().trim_start_matches(':').to_ascii_uppercase();
            match pattern.as_str() {
                "AA" | "AE" | "AR" | "CA" | "CE" | "CR" | "?E" | "?R" | "*" => {}
                other => {
                    return Err(EngineError::configuration(format!(
                        "unknown reply-code pattern: '{other}'"
                    )));
                }
            }
            rules.push((pattern, action.parse()?));
        }

        if rules.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self { rules })
    }

    /// First-match action for the given ACK code; no match means success.
    pub fn action_for(&self, ack_code: &str) -> AckAction {
        for (pattern, action) in &self.rules {
            let hit = match pattern.as_str() {
                "*" => true,
                "?E" => matches!(ack_code, "AE" | "CE"),
                "?R" => matches!(ack_code, "AR" | "CR"),
                exact => exact == ack_code,
            };
            if hit {
                return *action;
            }
        }
        AckAction::Success
    }
}
