use chrono::DateTime;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Open string-keyed argument map carried by intents and inbox entries.
pub type Parameters = Map<String, Value>;

/// Intent kinds produced by the built-in classification rules.
pub mod kinds {
    pub const SHELL_COMMAND: &str = "shell-command";
    pub const CONTAINER_COMMAND: &str = "container-command";
    pub const FILE_OPERATION: &str = "file-operation";
    pub const STATUS_CHECK: &str = "status-check";
    pub const LOG_QUERY: &str = "log-query";
    pub const SCHEDULE_REQUEST: &str = "schedule-request";
    pub const JOB_CANCEL: &str = "job-cancel";
    pub const FREEFORM_ASK: &str = "freeform-ask";
}

/// Where a request came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Origin {
    ToolProtocol,
    #[default]
    ChatChannel,
    ScheduledJob,
    DaemonSelf,
    Webhook,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::ToolProtocol => "tool_protocol",
            Origin::ChatChannel => "chat_channel",
            Origin::ScheduledJob => "scheduled_job",
            Origin::DaemonSelf => "daemon_self",
            Origin::Webhook => "webhook",
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Producers are loose about origin labels; anything unrecognised is
// treated as a chat message.
impl From<String> for Origin {
    fn from(raw: String) -> Self {
        Origin::from(raw.as_str())
    }
}

impl From<&str> for Origin {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "tool_protocol" | "mcp" | "tool" => Origin::ToolProtocol,
            "scheduled_job" | "scheduler" | "cron" | "job" => Origin::ScheduledJob,
            "daemon_self" | "daemon" | "self" => Origin::DaemonSelf,
            "webhook" | "hook" => Origin::Webhook,
            _ => Origin::ChatChannel,
        }
    }
}

/// A classified request. Built once per inbox entry and consumed by routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub kind: String,
    pub action: String,
    #[serde(default)]
    pub parameters: Parameters,
    pub origin: Origin,
    pub raw: String,
}

impl Intent {
    pub fn new(
        kind: impl Into<String>,
        action: impl Into<String>,
        origin: Origin,
        raw: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            action: action.into(),
            parameters: Parameters::new(),
            origin,
            raw: raw.into(),
        }
    }

    /// Generic ask intent used whenever classification cannot do better.
    pub fn freeform(origin: Origin, raw: impl Into<String>) -> Self {
        Self::new(kinds::FREEFORM_ASK, "ask", origin, raw)
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    /// Overlay entry-supplied parameters; on key collision the overlay wins.
    pub fn merge_parameters(mut self, overlay: Option<Parameters>) -> Self {
        if let Some(overlay) = overlay {
            for (key, value) in overlay {
                self.parameters.insert(key, value);
            }
        }
        self
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Numeric parameter, accepting either a JSON number or a numeric string.
    pub fn param_u64(&self, key: &str) -> Option<u64> {
        match self.parameters.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Uniform outcome of a handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub succeeded: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl TaskResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            message: message.into(),
            payload: None,
        }
    }

    pub fn ok_with(message: impl Into<String>, payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::ok(message)
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            message: message.into(),
            payload: None,
        }
    }

    pub fn failed_with(message: impl Into<String>, payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::failed(message)
        }
    }
}

/// Pre-classified intent carried by scheduled jobs so classification can be skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentHint {
    pub kind: String,
    pub action: String,
}

/// Wire format of a pending request on the inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxEntry {
    pub message: String,
    #[serde(default)]
    pub origin: Origin,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
    #[serde(default = "crate::now_ms", deserialize_with = "deserialize_timestamp")]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<IntentHint>,
}

impl InboxEntry {
    pub fn new(message: impl Into<String>, origin: Origin) -> Self {
        Self {
            message: message.into(),
            origin,
            request_id: None,
            parameters: None,
            timestamp: crate::now_ms(),
            job_id: None,
            intent: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = Some(parameters);
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_intent(mut self, kind: impl Into<String>, action: impl Into<String>) -> Self {
        self.intent = Some(IntentHint {
            kind: kind.into(),
            action: action.into(),
        });
        self
    }
}

// Timestamps arrive as epoch milliseconds from most producers, but some
// adapters send RFC 3339 strings.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        Float(f64),
        Text(String),
    }

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Millis(value) => Ok(value),
        RawTimestamp::Float(value) => Ok(value as i64),
        RawTimestamp::Text(raw) => {
            let trimmed = raw.trim();
            if let Ok(value) = trimmed.parse::<i64>() {
                return Ok(value);
            }
            DateTime::parse_from_rfc3339(trimmed)
                .map(|dt| dt.timestamp_millis())
                .map_err(|err| D::Error::custom(format!("invalid timestamp `{raw}`: {err}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn origin_parsing_is_lenient() {
        let parsed: Origin = serde_json::from_value(json!("mcp")).unwrap();
        assert_eq!(parsed, Origin::ToolProtocol);
        let parsed: Origin = serde_json::from_value(json!("cron")).unwrap();
        assert_eq!(parsed, Origin::ScheduledJob);
        let parsed: Origin = serde_json::from_value(json!("Daemon-Self")).unwrap();
        assert_eq!(parsed, Origin::DaemonSelf);
        let parsed: Origin = serde_json::from_value(json!("telegram")).unwrap();
        assert_eq!(parsed, Origin::ChatChannel);
        assert_eq!(serde_json::to_value(Origin::Webhook).unwrap(), json!("webhook"));
    }

    #[test]
    fn inbox_entry_accepts_producer_json() {
        let entry: InboxEntry = serde_json::from_value(json!({
            "message": "docker ps",
            "origin": "tool_protocol",
            "requestId": "r1",
            "parameters": {"verbose": true},
            "timestamp": 1_700_000_000_000i64
        }))
        .unwrap();

        assert_eq!(entry.request_id.as_deref(), Some("r1"));
        assert_eq!(entry.origin, Origin::ToolProtocol);
        assert_eq!(entry.timestamp, 1_700_000_000_000);
        assert_eq!(entry.parameters.unwrap()["verbose"], json!(true));
        assert!(entry.intent.is_none());
    }

    #[test]
    fn inbox_entry_accepts_rfc3339_timestamp() {
        let entry: InboxEntry = serde_json::from_value(json!({
            "message": "status",
            "origin": "webhook",
            "timestamp": "2024-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(entry.timestamp, 1_704_067_200_000);
    }

    #[test]
    fn inbox_entry_defaults_missing_fields() {
        let entry: InboxEntry = serde_json::from_value(json!({"message": "hi"})).unwrap();
        assert_eq!(entry.origin, Origin::ChatChannel);
        assert!(entry.request_id.is_none());
        assert!(entry.timestamp > 0);
    }

    #[test]
    fn entry_parameters_win_on_merge() {
        let mut overlay = Parameters::new();
        overlay.insert("command".into(), json!("uptime"));
        overlay.insert("extra".into(), json!(1));

        let intent = Intent::new(kinds::SHELL_COMMAND, "shell", Origin::ChatChannel, "run ls")
            .with_param("command", "ls")
            .merge_parameters(Some(overlay));

        assert_eq!(intent.param_str("command"), Some("uptime"));
        assert_eq!(intent.param_u64("extra"), Some(1));
    }

    #[test]
    fn task_result_omits_empty_payload() {
        let encoded = serde_json::to_value(TaskResult::ok("done")).unwrap();
        assert_eq!(encoded, json!({"succeeded": true, "message": "done"}));
    }
}
