//! Danger patterns checked before any host command is spawned.
//!
//! This is a best-effort safety net, not a sandbox: the patterns are plain
//! regular expressions over the command text and can be evaded by
//! obfuscation, variable indirection or chaining.

use once_cell::sync::Lazy;
use regex::Regex;

/// A named regular expression that refuses a command when it matches.
#[derive(Debug, Clone)]
pub struct DangerPattern {
    name: String,
    regex: Regex,
}

impl DangerPattern {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            regex: Regex::new(pattern)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_match(&self, command: &str) -> bool {
        self.regex.is_match(command)
    }
}

// Shell word boundary after a path argument.
const END: &str = r"(?:\s|;|&|\||$)";

fn builtin(name: &str, pattern: &str) -> DangerPattern {
    DangerPattern::new(name, pattern).expect("built-in danger pattern should compile")
}

/// The built-in denylist, in evaluation order.
pub static DEFAULT_DENYLIST: Lazy<Vec<DangerPattern>> = Lazy::new(|| {
    vec![
        builtin(
            "recursive-delete-root",
            &format!(
                r"\brm\s+(?:-[a-zA-Z-]+\s+)*(?:-[a-zA-Z]*[rR][a-zA-Z]*|--recursive)\s+(?:-[a-zA-Z-]+\s+)*(?:/\*?|~/?|\$HOME/?|\$\{{HOME\}}/?){END}|\brm\s.*--no-preserve-root"
            ),
        ),
        builtin("filesystem-format", r"\bmkfs(?:\.[a-z0-9]+)?\b|\bmke2fs\b"),
        builtin(
            "fork-bomb",
            r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        ),
        builtin(
            "raw-disk-write",
            r"\bdd\b[^;&|]*\bof=/dev/(?:sd|hd|nvme|vd|xvd|mmcblk|disk)|>\s*/dev/(?:sd[a-z]|hd[a-z]|nvme\d|vd[a-z]|xvd[a-z]|mmcblk\d|disk\d)",
        ),
        builtin(
            "system-shutdown",
            r"(?:^\s*|[;&|(]\s*|\bsudo\s+)(?:/s?bin/)?(?:shutdown|reboot|halt|poweroff)\b|\binit\s+[06]\b|\bsystemctl\s+(?:poweroff|reboot|halt|kexec)\b",
        ),
        builtin(
            "recursive-permission-root",
            &format!(
                r"\bch(?:mod|own|grp)\s+(?:-[a-zA-Z-]+\s+)*(?:-[a-zA-Z]*R[a-zA-Z]*|--recursive)\s+(?:-[a-zA-Z-]+\s+)*(?:\S+\s+)?/\*?{END}"
            ),
        ),
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    fn first_match(command: &str) -> Option<&'static str> {
        DEFAULT_DENYLIST
            .iter()
            .find(|p| p.is_match(command))
            .map(|p| p.name.as_str())
    }

    #[test]
    fn recursive_delete_of_root_is_refused() {
        for cmd in [
            "rm -rf /",
            "rm -fr /*",
            "sudo rm -r -f /",
            "rm --recursive --force ~",
            "rm -Rf $HOME",
            "ls; rm -rf / ",
            "rm -rf --no-preserve-root /",
        ] {
            assert_eq!(first_match(cmd), Some("recursive-delete-root"), "{cmd}");
        }
    }

    #[test]
    fn scoped_deletes_are_allowed() {
        for cmd in ["rm -rf /tmp/build", "rm -rf ./target", "rm file.txt", "rm -f /tmp/x"] {
            assert_eq!(first_match(cmd), None, "{cmd}");
        }
    }

    #[test]
    fn each_category_is_detected() {
        assert_eq!(first_match("mkfs.ext4 /dev/sdb1"), Some("filesystem-format"));
        assert_eq!(first_match(":(){ :|:& };:"), Some("fork-bomb"));
        assert_eq!(
            first_match("dd if=/dev/zero of=/dev/sda bs=1M"),
            Some("raw-disk-write")
        );
        assert_eq!(first_match("cat image > /dev/nvme0n1"), Some("raw-disk-write"));
        assert_eq!(first_match("sudo reboot"), Some("system-shutdown"));
        assert_eq!(first_match("shutdown -h now"), Some("system-shutdown"));
        assert_eq!(first_match("systemctl poweroff"), Some("system-shutdown"));
        assert_eq!(first_match("init 0"), Some("system-shutdown"));
        assert_eq!(first_match("chmod -R 777 /"), Some("recursive-permission-root"));
        assert_eq!(
            first_match("chown -R nobody:nogroup /"),
            Some("recursive-permission-root")
        );
    }

    #[test]
    fn ordinary_commands_pass() {
        for cmd in [
            "ls -la",
            "echo reboot later",
            "dd if=/dev/zero of=./disk.img bs=1M count=1",
            "chmod -R 755 /var/www",
            "git log --grep halt",
            "df -h /",
        ] {
            assert_eq!(first_match(cmd), None, "{cmd}");
        }
    }

    #[test]
    fn custom_patterns_compile_or_fail_cleanly() {
        assert!(DangerPattern::new("curl-pipe", r"curl\s.*\|\s*sh").is_ok());
        assert!(DangerPattern::new("broken", r"(unclosed").is_err());
    }
}
