//! Deterministic classification rules.
//!
//! Rules run against the normalised input (trimmed, ASCII lower-cased) in
//! list order and the first match wins. A broad rule listed before a
//! narrower one shadows it; the default order below is deliberate.

use std::fmt;
use std::sync::Arc;

use nexus_common::{kinds, Intent, Origin};
use regex::{Captures, Regex};
use serde_json::Value;

type Build = dyn Fn(&RuleMatch<'_>) -> Intent + Send + Sync;

/// A successful rule match. Capture offsets index both the normalised and
/// the trimmed original text, since ASCII lower-casing keeps byte offsets.
pub struct RuleMatch<'a> {
    pub origin: Origin,
    pub raw: &'a str,
    pub trimmed: &'a str,
    captures: Captures<'a>,
}

impl<'a> RuleMatch<'a> {
    /// Named capture with the original casing.
    pub fn text(&self, group: &str) -> Option<&'a str> {
        let m = self.captures.name(group)?;
        self.trimmed
            .get(m.start()..m.end())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Named capture from the normalised input.
    pub fn lower(&self, group: &str) -> Option<&'a str> {
        self.captures
            .name(group)
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
    }

    pub fn first_text(&self, groups: &[&str]) -> Option<&'a str> {
        groups.iter().find_map(|g| self.text(g))
    }

    pub fn intent(&self, kind: &str, action: &str) -> Intent {
        Intent::new(kind, action, self.origin, self.raw)
    }
}

#[derive(Clone)]
pub struct ClassificationRule {
    name: String,
    pattern: Regex,
    build: Arc<Build>,
}

impl fmt::Debug for ClassificationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassificationRule")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

impl ClassificationRule {
    pub fn new<F>(name: impl Into<String>, pattern: &str, build: F) -> Result<Self, regex::Error>
    where
        F: Fn(&RuleMatch<'_>) -> Intent + Send + Sync + 'static,
    {
        Ok(Self {
            name: name.into(),
            pattern: Regex::new(pattern)?,
            build: Arc::new(build),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn apply(&self, normalized: &str, trimmed: &str, raw: &str, origin: Origin) -> Option<Intent> {
        let captures = self.pattern.captures(normalized)?;
        let matched = RuleMatch {
            origin,
            raw,
            trimmed,
            captures,
        };
        Some((self.build)(&matched))
    }
}

/// Trim then ASCII lower-case.
pub fn normalize(input: &str) -> String {
    input.trim().to_ascii_lowercase()
}

fn rule<F>(name: &str, pattern: &str, build: F) -> ClassificationRule
where
    F: Fn(&RuleMatch<'_>) -> Intent + Send + Sync + 'static,
{
    ClassificationRule::new(name, pattern, build).expect("built-in classification rule should compile")
}

fn unit_secs(unit: &str) -> u64 {
    match unit.chars().next() {
        Some('s') => 1,
        Some('m') => 60,
        Some('h') => 3_600,
        Some('d') => 86_400,
        _ => 60,
    }
}

/// Built-in rules, in evaluation order.
pub fn default_rules() -> Vec<ClassificationRule> {
    vec![
        rule(
            "container-list",
            r"^(?:(?:docker|podman)\s+ps\b|(?:list|show)\s+(?:all\s+)?containers\b)",
            |m| m.intent(kinds::CONTAINER_COMMAND, "docker").with_param("op", "list"),
        ),
        rule(
            "container-op",
            r"^(?:(?:docker|podman)\s+)?(?P<op>start|stop|restart|inspect|logs)\s+(?:container\s+)?(?P<name>[a-z][a-z0-9_.\-]*)\s*$",
            |m| {
                m.intent(kinds::CONTAINER_COMMAND, "docker")
                    .with_param("op", m.lower("op").unwrap_or_default())
                    .with_param("name", m.text("name").unwrap_or_default())
            },
        ),
        rule(
            "container-cleanup",
            r"^(?:(?:docker|podman)\s+)?(?:cleanup|clean\s+up|prune)\b",
            |m| m.intent(kinds::CONTAINER_COMMAND, "docker").with_param("op", "cleanup"),
        ),
        rule(
            "tool-start",
            r"^(?:launch|start)\s+tool\s+(?P<tool>[a-z0-9_\-]+)",
            |m| {
                m.intent(kinds::CONTAINER_COMMAND, "docker")
                    .with_param("op", "start_tool")
                    .with_param("tool", m.lower("tool").unwrap_or_default())
            },
        ),
        rule(
            "shell",
            r"(?s)^(?:run|exec|sh|\$)\s*:?\s+(?P<command>.+)$",
            |m| {
                m.intent(kinds::SHELL_COMMAND, "shell")
                    .with_param("command", m.text("command").unwrap_or_default())
            },
        ),
        rule(
            "file-read",
            r"^(?:cat\s+(?P<cat>\S+)|(?:read|show)\s+file\s+(?P<named>\S+)|(?:read|show)\s+(?P<path>\S*[/.]\S*))\s*$",
            |m| {
                m.intent(kinds::FILE_OPERATION, "file")
                    .with_param("op", "read")
                    .with_param("path", m.first_text(&["cat", "named", "path"]).unwrap_or_default())
            },
        ),
        rule(
            "file-list",
            r"^(?:ls(?:\s+-[a-z]+)*(?:\s+(?P<dir>[^\s\-]\S*))?|list\s+files?(?:\s+in)?(?:\s+(?P<listed>\S+))?)\s*$",
            |m| {
                m.intent(kinds::FILE_OPERATION, "file")
                    .with_param("op", "list")
                    .with_param("path", m.first_text(&["dir", "listed"]).unwrap_or("."))
            },
        ),
        rule(
            "status",
            r"^(?:status|health|uptime)\b|\bhow\s+are\s+you\s+doing\b",
            |m| m.intent(kinds::STATUS_CHECK, "status"),
        ),
        rule(
            "logs",
            r"^(?:show\s+)?(?:daemon\s+)?logs?\b(?:\s+(?P<limit>\d+))?",
            |m| {
                let intent = m.intent(kinds::LOG_QUERY, "logs");
                match m.lower("limit").and_then(|l| l.parse::<u64>().ok()) {
                    Some(limit) => intent.with_param("limit", limit),
                    None => intent,
                }
            },
        ),
        rule(
            "cancel-job",
            r"^cancel\s+(?:job\s+)?(?P<id>[a-z0-9][a-z0-9\-]*)\s*$",
            |m| {
                m.intent(kinds::JOB_CANCEL, "cancel_job")
                    .with_param("jobId", m.text("id").unwrap_or_default())
            },
        ),
        rule(
            "remind",
            r"(?s)^(?:remind\s+me\s+)?in\s+(?P<n>\d+)\s*(?P<unit>s|secs?|seconds?|m|mins?|minutes?|h|hrs?|hours?|d|days?)\b\s*,?\s*(?:to\s+)?(?P<text>.+)$",
            |m| {
                let n: u64 = m.lower("n").and_then(|n| n.parse().ok()).unwrap_or(0);
                let delay = n.saturating_mul(unit_secs(m.lower("unit").unwrap_or("m")));
                m.intent(kinds::SCHEDULE_REQUEST, "schedule")
                    .with_param("delaySecs", delay)
                    .with_param("message", m.text("text").unwrap_or_default())
                    .with_param("intentKind", "reminder")
                    .with_param("intentAction", "remind")
            },
        ),
    ]
}

/// First-match evaluation over `rules`.
pub fn classify_with(rules: &[ClassificationRule], input: &str, origin: Origin) -> Option<(String, Intent)> {
    let trimmed = input.trim();
    let normalized = normalize(input);
    rules.iter().find_map(|rule| {
        rule.apply(&normalized, trimmed, input, origin)
            .map(|intent| (rule.name().to_string(), intent))
    })
}

pub(crate) fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(input: &str) -> Option<(String, Intent)> {
        classify_with(&default_rules(), input, Origin::ChatChannel)
    }

    fn rule_for(input: &str) -> Option<String> {
        classify(input).map(|(name, _)| name)
    }

    #[test]
    fn container_commands() {
        let (name, intent) = classify("docker ps").unwrap();
        assert_eq!(name, "container-list");
        assert_eq!(intent.action, "docker");
        assert_eq!(intent.param_str("op"), Some("list"));

        assert_eq!(rule_for("  Show all containers "), Some("container-list".into()));

        let (_, intent) = classify("Restart container Nexus-SearXNG").unwrap();
        assert_eq!(intent.param_str("op"), Some("restart"));
        assert_eq!(intent.param_str("name"), Some("Nexus-SearXNG"));

        assert_eq!(rule_for("docker prune"), Some("container-cleanup".into()));
        let (name, intent) = classify("start tool firecrawl").unwrap();
        assert_eq!(name, "tool-start");
        assert_eq!(intent.param_str("tool"), Some("firecrawl"));
    }

    #[test]
    fn shell_keeps_original_casing() {
        let (_, intent) = classify("run: echo Hello World").unwrap();
        assert_eq!(intent.kind, kinds::SHELL_COMMAND);
        assert_eq!(intent.param_str("command"), Some("echo Hello World"));

        let (_, intent) = classify("$ ls -la /tmp").unwrap();
        assert_eq!(intent.param_str("command"), Some("ls -la /tmp"));
    }

    #[test]
    fn files_and_status() {
        let (_, intent) = classify("cat /etc/hostname").unwrap();
        assert_eq!(intent.param_str("op"), Some("read"));
        assert_eq!(intent.param_str("path"), Some("/etc/hostname"));

        let (_, intent) = classify("ls -la notes").unwrap();
        assert_eq!(intent.param_str("op"), Some("list"));
        assert_eq!(intent.param_str("path"), Some("notes"));
        let (_, intent) = classify("ls").unwrap();
        assert_eq!(intent.param_str("path"), Some("."));

        assert_eq!(rule_for("status"), Some("status".into()));
        assert_eq!(rule_for("hey, how are you doing?"), Some("status".into()));
    }

    #[test]
    fn logs_and_container_logs_are_distinct() {
        let (name, intent) = classify("show logs 50").unwrap();
        assert_eq!(name, "logs");
        assert_eq!(intent.param_u64("limit"), Some(50));
        assert_eq!(rule_for("logs web"), Some("container-op".into()));
        assert_eq!(rule_for("show daemon logs"), Some("logs".into()));
    }

    #[test]
    fn jobs_and_reminders() {
        let (_, intent) = classify("cancel job 3f2a-77").unwrap();
        assert_eq!(intent.action, "cancel_job");
        assert_eq!(intent.param_str("jobId"), Some("3f2a-77"));

        let (_, intent) = classify("Remind me in 10 minutes to Stretch").unwrap();
        assert_eq!(intent.action, "schedule");
        assert_eq!(intent.param_u64("delaySecs"), Some(600));
        assert_eq!(intent.param_str("message"), Some("Stretch"));

        let (_, intent) = classify("in 2h check the backups").unwrap();
        assert_eq!(intent.param_u64("delaySecs"), Some(7_200));
        assert_eq!(intent.param_str("message"), Some("check the backups"));
    }

    #[test]
    fn unmatched_input_falls_through() {
        assert!(classify("what is the capital of france").is_none());
        assert!(classify("").is_none());
    }

    #[test]
    fn earlier_rule_shadows_later_one() {
        let rules = vec![
            ClassificationRule::new("broad", r"^docker", |m| m.intent("r1", "first")).unwrap(),
            ClassificationRule::new("narrow", r"^docker\s+ps", |m| m.intent("r2", "second")).unwrap(),
        ];
        let (name, intent) = classify_with(&rules, "docker ps", Origin::ToolProtocol).unwrap();
        assert_eq!(name, "broad");
        assert_eq!(intent.action, "first");
        assert_eq!(intent.origin, Origin::ToolProtocol);
        assert_eq!(intent.raw, "docker ps");
    }

    #[test]
    fn blank_values() {
        assert!(is_blank(None));
        assert!(is_blank(Some(&Value::String("  ".into()))));
        assert!(!is_blank(Some(&Value::from(0))));
    }
}
