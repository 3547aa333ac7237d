use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Jobs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Agent,
    Command,
    Http,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Agent => "agent",
            JobType::Command => "command",
            JobType::Http => "http",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(JobType::Agent),
            "command" => Some(JobType::Command),
            "http" => Some(JobType::Http),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Dispatched,
    Received,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Dispatched => "dispatched",
            JobStatus::Received => "received",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dispatched" => Some(JobStatus::Dispatched),
            "received" => Some(JobStatus::Received),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Position in the monotonic status order. Terminal states share rank.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Dispatched => 0,
            JobStatus::Received => 1,
            JobStatus::Running => 2,
            JobStatus::Completed | JobStatus::Failed => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRow {
    pub job_id: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub source: String,
    pub input: serde_json::Value,
    pub status: JobStatus,
    pub worker_id: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
    pub trace_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversations & messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRow {
    pub id: String,
    pub title: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observational memory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStateRow {
    pub conversation_id: String,
    pub observed_cursor_message_id: Option<i64>,
    pub unobserved_token_count: i64,
    pub observation_token_count: i64,
    pub last_observer_run: Option<String>,
    pub last_reflector_run: Option<String>,
    pub lock_version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationRow {
    pub id: i64,
    pub conversation_id: String,
    pub created_at: String,
    pub text: String,
    pub token_count: i64,
    pub tags: Option<String>,
    pub source_message_from: i64,
    pub source_message_to: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationLogRow {
    pub conversation_id: String,
    pub version: i64,
    pub text: String,
    pub token_count: i64,
    pub created_at: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Skills
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillRow {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    /// 0 = instruction-only, 1 = stdio MCP, 2/3 = HTTP MCP.
    pub tier: i64,
    pub transport: Option<String>,
    pub enabled: bool,
    pub config: serde_json::Value,
    pub stdio_command: Option<String>,
    pub stdio_args: Vec<String>,
    pub http_url: Option<String>,
    pub instruction_path: Option<String>,
    pub instruction_content: Option<String>,
    /// `system`, `agent`, or `extension`.
    pub owner: String,
    pub tags: Option<String>,
}

impl SkillRow {
    /// Tier invariants: tier-1 needs a stdio command, tier-2/3 an HTTP URL.
    pub fn validate(&self) -> Result<(), String> {
        match self.tier {
            0 => Ok(()),
            1 if self.stdio_command.is_none() => {
                Err("tier-1 skill requires stdio_command".into())
            }
            2 | 3 if self.http_url.is_none() => {
                Err(format!("tier-{} skill requires http_url", self.tier))
            }
            0..=3 => Ok(()),
            t => Err(format!("invalid tier {t}")),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Schedules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRow {
    pub id: String,
    pub name: String,
    /// 5-field cron expression.
    pub schedule: String,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub config: serde_json::Value,
    pub enabled: bool,
    pub last_run_at: Option<String>,
    pub last_status: Option<String>,
    pub last_output: Option<String>,
    pub consecutive_failures: i64,
    pub cooldown_until: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handoff
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffNoteRow {
    pub id: String,
    pub from_version: String,
    pub to_version: Option<String>,
    pub active_conversations: serde_json::Value,
    pub pending_schedules: serde_json::Value,
    pub agent_notes: Option<String>,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_order_is_monotonic() {
        assert!(JobStatus::Dispatched.rank() < JobStatus::Received.rank());
        assert!(JobStatus::Received.rank() < JobStatus::Running.rank());
        assert!(JobStatus::Running.rank() < JobStatus::Completed.rank());
        assert_eq!(JobStatus::Completed.rank(), JobStatus::Failed.rank());
    }

    #[test]
    fn skill_tier_invariants() {
        let mut skill = SkillRow {
            id: "s1".into(),
            name: "time".into(),
            version: "1.0.0".into(),
            description: String::new(),
            tier: 1,
            transport: Some("stdio".into()),
            enabled: true,
            config: serde_json::json!({}),
            stdio_command: None,
            stdio_args: vec![],
            http_url: None,
            instruction_path: None,
            instruction_content: None,
            owner: "system".into(),
            tags: None,
        };
        assert!(skill.validate().is_err());
        skill.stdio_command = Some("mcp-time".into());
        assert!(skill.validate().is_ok());

        skill.tier = 2;
        assert!(skill.validate().is_err());
        skill.http_url = Some("http://localhost:9000/mcp".into());
        assert!(skill.validate().is_ok());
    }
}
