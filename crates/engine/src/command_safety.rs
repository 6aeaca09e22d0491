//! Denylist screening for `cmd_command` steps.
//!
//! Rules are `(pattern, reason)` data evaluated against the literal command
//! text before anything is spawned. The list is deliberately blunt: a step
//! file that needs one of these operations should wrap it in a script.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::warn;

/// A command rejected by the denylist.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("command rejected ({reason}): {command}")]
pub struct SecurityViolation {
    pub command: String,
    pub reason: &'static str,
}

struct DenyRule {
    pattern: Regex,
    reason: &'static str,
}

const DENY_PATTERNS: &[(&str, &str)] = &[
    // destructive filesystem operations
    (r"(?i)\brm\b.*\s(--(recursive|force)\b|-\w*[rf])", "recursive or forced file removal"),
    (r"(?i)\b(del|erase)\b.*\s/[sqf]\b", "recursive or forced file deletion"),
    (r"(?i)\b(rmdir|rd)\b.*\s/s\b", "recursive directory removal"),
    (r"(?i)\bremove-item\b.*-recurse", "recursive file removal"),
    (r"(?i)\bformat(\.com)?\s+[a-z]:", "disk formatting"),
    (r"(?i)\b(mkfs(\.\w+)?|diskpart|shred)\b", "disk formatting"),
    (r"(?i)\b(format-volume|clear-disk|initialize-disk)\b", "disk formatting"),
    (r"(?i)\bdd\b.*\bof=/dev/", "raw device writes"),
    // power state
    (r"(?i)\b(shutdown|reboot|poweroff|halt)\b", "shutdown or restart"),
    (r"(?i)\b(restart|stop)-computer\b", "shutdown or restart"),
    (r"(?i)\binit\s+[06]\b", "shutdown or restart"),
    // firewall
    (r"(?i)\bnetsh\b.*\b(adv)?firewall\b", "firewall changes"),
    (r"(?i)\b(iptables|ip6tables|nft|ufw|firewall-cmd)\b", "firewall changes"),
    (r"(?i)\b(set|new|remove|disable)-netfirewall\w*", "firewall changes"),
    // registry and services
    (r"(?i)\breg(\.exe)?\s+(delete|add|import|load|restore)\b", "registry changes"),
    (r"(?i)\bregedit\b", "registry changes"),
    (r"(?i)\b(set|new|remove)-itemproperty\b", "registry changes"),
    (r"(?i)\bsc(\.exe)?\s+(delete|stop|config|create)\b", "service changes"),
    (r"(?i)\bnet\s+(stop|user|localgroup)\b", "service or account changes"),
    (r"(?i)\b(stop|remove|set)-service\b", "service changes"),
    (r"(?i)\bsystemctl\s+(stop|disable|mask|kill)\b", "service changes"),
    // process termination
    (r"(?i)\b(taskkill|tskill|kill|pkill|killall)\b", "process termination"),
    (r"(?i)\bstop-process\b", "process termination"),
    // powershell evasion
    (r"(?i)\b(powershell|pwsh)(\.exe)?\b.*\s-(e|ec|enc|encodedcommand)\b", "encoded PowerShell command"),
    (r"(?i)-(ep|executionpolicy)\s+(bypass|unrestricted)", "PowerShell execution policy bypass"),
    (r"(?i)\b(invoke-expression|iex)\b", "PowerShell dynamic evaluation"),
    (r"(?i)frombase64string", "encoded payload"),
    // chaining and substitution
    (r"[;&|]", "command chaining"),
    (r"`|\$\(", "command substitution"),
    (r"[\x00-\x1F\x7F]", "control characters"),
];

static DENYLIST: Lazy<Vec<DenyRule>> = Lazy::new(|| {
    DENY_PATTERNS
        .iter()
        .filter_map(|(pattern, reason)| match Regex::new(pattern) {
            Ok(pattern) => Some(DenyRule { pattern, reason }),
            Err(error) => {
                warn!(%pattern, %error, "ignoring invalid denylist pattern");
                None
            }
        })
        .collect()
});

/// Rejects `command` when it matches any denylist rule.
pub fn check_command(command: &str) -> Result<(), SecurityViolation> {
    match DENYLIST.iter().find(|rule| rule.pattern.is_match(command)) {
        Some(rule) => Err(SecurityViolation {
            command: command.to_string(),
            reason: rule.reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(DENYLIST.len(), DENY_PATTERNS.len());
    }

    #[test]
    fn rejects_destructive_windows_commands() {
        for command in [r"del /s /q C:\", "shutdown /r /f", r"reg delete HKLM\Software\Vendor /f"] {
            let violation = check_command(command).expect_err(command);
            assert_eq!(violation.command, command);
        }
    }

    #[test]
    fn rejects_other_families() {
        let cases = [
            ("rm -rf /tmp/work", "recursive or forced file removal"),
            ("rm --recursive --force /home", "recursive or forced file removal"),
            ("rm -v --recursive /srv/data", "recursive or forced file removal"),
            ("rm -R build", "recursive or forced file removal"),
            (r"del /f C:\boot.ini", "recursive or forced file deletion"),
            ("Format-Volume -DriveLetter C", "disk formatting"),
            ("Clear-Disk -Number 1 -RemoveData", "disk formatting"),
            ("netsh advfirewall set allprofiles state off", "firewall changes"),
            ("sc stop Spooler", "service changes"),
            ("taskkill /im explorer.exe", "process termination"),
            ("powershell -enc SQBFAFgA", "encoded PowerShell command"),
            ("echo ok && notepad", "command chaining"),
            ("echo $(whoami)", "command substitution"),
            ("echo ok\nnotepad", "control characters"),
        ];
        for (command, reason) in cases {
            let violation = check_command(command).expect_err(command);
            assert_eq!(violation.reason, reason, "{command}");
        }
    }

    #[test]
    fn allows_ordinary_commands() {
        for command in [
            "echo hello",
            "notepad.exe C:\\notes\\todo.txt",
            "open -a Calculator",
            "python3 report.py --format csv",
            "rm notes.txt",
        ] {
            assert!(check_command(command).is_ok(), "{command}");
        }
    }
}
