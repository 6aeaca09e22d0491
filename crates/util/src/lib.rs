//! Utility helpers shared by the Autostep engine and CLI.

pub mod async_runtime;
pub mod path_processing;
pub mod settings;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

pub use async_runtime::block_on_future;
pub use path_processing::{expand_tilde, resolve_against};
pub use settings::{EngineSettings, SettingsError, SettingsStore};

static SENSITIVE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: )([\w\-\.=:/+]+)",
        r"(?i)([A-Z0-9_]*?(?:KEY|TOKEN|SECRET|PASSWORD)=)([^\s]+)",
        r"(?i)(--password[= ])([^\s]+)",
    ]
    .into_iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Redacts values that look like secrets in a string.
///
/// Used before shell command lines are written to logs.
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for pattern in SENSITIVE_PATTERNS.iter() {
        redacted = pattern
            .replace_all(&redacted, |caps: &Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{prefix}<redacted>")
            })
            .to_string();
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::redact_sensitive;

    #[test]
    fn redacts_inline_tokens() {
        assert_eq!(redact_sensitive("API_TOKEN=abc123 ./deploy.sh"), "API_TOKEN=<redacted> ./deploy.sh");
        assert_eq!(redact_sensitive("login --password hunter2"), "login --password <redacted>");
    }

    #[test]
    fn leaves_plain_commands_untouched() {
        assert_eq!(redact_sensitive("echo hello"), "echo hello");
    }
}
