use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const API_VERSION: &str = "1.0.0";

/// Name of the tool whose choices are plain answers rather than allow/deny options.
pub const QUESTION_TOOL: &str = "Question";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Choice {
    pub number: u8,
    pub text: String,
}

impl Choice {
    pub fn new(number: u8, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Allow,
    Deny,
    Cancelled,
    Expired,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Status::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Allow => "allow",
            Status::Deny => "deny",
            Status::Cancelled => "cancelled",
            Status::Expired => "expired",
        }
    }
}

/// A terminal status a caller is allowed to set directly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Deny,
    Cancelled,
}

impl From<Verdict> for Status {
    fn from(v: Verdict) -> Self {
        match v {
            Verdict::Allow => Status::Allow,
            Verdict::Deny => Status::Deny,
            Verdict::Cancelled => Status::Cancelled,
        }
    }
}

/// Coarse decision made by the responder, before it is mapped onto a choice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny,
    AllowAll,
}

impl Decision {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(Decision::Allow),
            "deny" => Some(Decision::Deny),
            "allow_all" => Some(Decision::AllowAll),
            _ => None,
        }
    }

    /// Status committed alongside the resolved action.
    pub fn status(self) -> Status {
        match self {
            Decision::Allow | Decision::AllowAll => Status::Allow,
            Decision::Deny => Status::Deny,
        }
    }
}

/// Snapshot of one registry record. Timestamps are milliseconds on the
/// registry's monotonic clock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    pub id: String,
    pub tool_name: String,
    pub message: String,
    pub subtitle: String,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_label: Option<String>,
    pub created_at: u64,
    pub expires_at: u64,
    pub status: Status,
    pub decided_at: Option<u64>,
    pub resolved_action: Option<String>,
}

impl Request {
    pub fn is_pending(&self) -> bool {
        self.status == Status::Pending
    }

    pub fn last_choice(&self) -> Option<&Choice> {
        self.choices.last()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateRequestBody {
    #[serde(default)]
    pub tool_name: Option<String>,
    #[serde(default)]
    pub tool_input: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub prompt_question: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub has_tmux: Option<bool>,
    #[serde(default, alias = "tmux_target")]
    pub correlation_key: Option<String>,
    #[serde(default, alias = "hostname")]
    pub origin_label: Option<String>,
    /// Pending timeout override, in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: String,
    pub tool_name: String,
    pub message: String,
    pub expires_at: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RespondBody {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub choice: Option<u8>,
    #[serde(default)]
    pub source: Option<String>,
}

/// What a polling producer sees.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseView {
    pub id: String,
    pub status: Status,
    pub decided_at: Option<u64>,
    pub resolved_action: Option<String>,
}

impl From<&Request> for ResponseView {
    fn from(r: &Request) -> Self {
        Self {
            id: r.id.clone(),
            status: r.status,
            decided_at: r.decided_at,
            resolved_action: r.resolved_action.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyBody {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "hostname")]
    pub origin_label: Option<String>,
    #[serde(default, alias = "tmux_target")]
    pub correlation_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub api_version: String,
    pub request_timeout_ms: u64,
}

/// Payload of the change stream consumed by presentation clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Changed {
        change: String,
        request_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<Status>,
        ts: String,
    },
    Notice {
        title: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        origin_label: Option<String>,
        ts: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(serde_json::to_value(Status::Cancelled).unwrap(), json!("cancelled"));
        assert_eq!(Status::Expired.as_str(), "expired");
        assert!(!Status::Pending.is_terminal());
        assert!(Status::Deny.is_terminal());
    }

    #[test]
    fn create_body_accepts_hook_field_names() {
        let body: CreateRequestBody = serde_json::from_value(json!({
            "tool_name": "Bash",
            "tool_input": {"command": "ls"},
            "tmux_target": "main:0.1",
            "hostname": "devbox",
            "choices": [{"number": 1, "text": "Yes"}, {"number": 3, "text": "No"}]
        }))
        .unwrap();
        assert_eq!(body.correlation_key.as_deref(), Some("main:0.1"));
        assert_eq!(body.origin_label.as_deref(), Some("devbox"));
        assert_eq!(body.choices.len(), 2);
        assert!(body.timeout.is_none());
    }

    #[test]
    fn notify_body_accepts_hook_field_names() {
        let body: NotifyBody = serde_json::from_value(json!({
            "title": "done",
            "tmux_target": "main:0.1",
            "hostname": "devbox"
        }))
        .unwrap();
        assert_eq!(body.correlation_key.as_deref(), Some("main:0.1"));
        assert_eq!(body.origin_label.as_deref(), Some("devbox"));
        assert!(body.message.is_none());
    }

    #[test]
    fn decision_parsing_rejects_unknown_values() {
        assert_eq!(Decision::from_wire("allow_all"), Some(Decision::AllowAll));
        assert_eq!(Decision::AllowAll.status(), Status::Allow);
        assert_eq!(Decision::from_wire("maybe"), None);
    }

    #[test]
    fn request_omits_absent_provenance() {
        let r = Request {
            id: "a".to_string(),
            tool_name: "Bash".to_string(),
            message: "m".to_string(),
            subtitle: "s".to_string(),
            choices: vec![],
            correlation_key: None,
            origin_label: None,
            created_at: 1,
            expires_at: 2,
            status: Status::Pending,
            decided_at: None,
            resolved_action: None,
        };
        let v = serde_json::to_value(&r).unwrap();
        assert!(v.get("correlation_key").is_none());
        assert_eq!(v["status"], "pending");
        assert_eq!(v["decided_at"], Value::Null);
    }

    #[test]
    fn stream_event_is_tagged() {
        let ev = StreamEvent::Changed {
            change: "created".to_string(),
            request_id: "r1".to_string(),
            status: Some(Status::Pending),
            ts: "2026-01-01T00:00:00Z".to_string(),
        };
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["type"], "changed");
        assert_eq!(v["status"], "pending");
    }
}
