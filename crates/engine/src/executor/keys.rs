//! Key name normalization and `+`-joined chord parsing for `key` steps.
//!
//! Names are lowercased and common aliases folded into one spelling so input
//! adapters only map a single vocabulary. Whether a name maps to a real key is
//! left to the adapter.

use super::errors::ExecutionError;

const ALIASES: &[(&str, &str)] = &[
    ("control", "ctrl"),
    ("return", "enter"),
    ("esc", "escape"),
    ("del", "delete"),
    ("ins", "insert"),
    ("pgup", "pageup"),
    ("pgdn", "pagedown"),
    ("page_up", "pageup"),
    ("page_down", "pagedown"),
    ("cmd", "meta"),
    ("command", "meta"),
    ("win", "meta"),
    ("super", "meta"),
    ("option", "alt"),
    ("spacebar", "space"),
    ("up_arrow", "up"),
    ("down_arrow", "down"),
    ("left_arrow", "left"),
    ("right_arrow", "right"),
];

/// One key or a chord of keys pressed together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    keys: Vec<String>,
}

impl KeyChord {
    /// Parses `"enter"`, `"ctrl+shift+s"`, or a literal `"+"`.
    pub fn parse(spec: &str) -> Result<Self, ExecutionError> {
        let trimmed = spec.trim();
        if trimmed == "+" {
            return Ok(Self { keys: vec!["+".into()] });
        }

        let mut keys = Vec::new();
        for part in trimmed.split('+') {
            let part = part.trim();
            if part.is_empty() {
                return Err(ExecutionError::Format {
                    param: "key",
                    message: format!("empty key name in '{spec}'"),
                });
            }
            keys.push(normalize_key_name(part));
        }
        Ok(Self { keys })
    }

    pub fn keys(&self) -> Vec<&str> {
        self.keys.iter().map(String::as_str).collect()
    }

    pub fn is_single(&self) -> bool {
        self.keys.len() == 1
    }
}

/// Lowercases `name` and folds known aliases.
pub fn normalize_key_name(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or(lowered)
}
