use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Closed set of task lifecycle states (§3 "Status").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed)
    }
}

/// Execution mode is opaque passthrough to the agent; the scheduler never
/// branches on its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Standard,
    Interaction,
    Publish,
}

/// Closed set of task types. Only one variant exists today; new automation
/// targets get a new variant and a matching `AgentParams` arm, never a
/// string tag interpreted ad hoc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    SocialAccountOperator,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::SocialAccountOperator => "social-account-operator",
        }
    }
}

/// Hour-of-day validity window, `[start_hour, end_hour)`. Absence means no
/// restriction (§3 "Cadence & validity").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidHourRange {
    pub start_hour: u8,
    pub end_hour: u8,
}

impl ValidHourRange {
    pub fn new(start_hour: u8, end_hour: u8) -> Result<Self, SchedulerError> {
        if start_hour >= end_hour || end_hour > 24 {
            return Err(SchedulerError::Invalid(format!(
                "invalid valid_hour_range [{start_hour}, {end_hour})"
            )));
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        (self.start_hour as u32) <= hour && hour < (self.end_hour as u32)
    }
}

/// Cadence and validity fields carried by every task (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CadenceSpec {
    pub interval_seconds: u64,
    pub valid_hour_range: Option<ValidHourRange>,
    pub end_date: chrono::NaiveDate,
}

impl CadenceSpec {
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.interval_seconds == 0 {
            return Err(SchedulerError::Invalid(
                "interval_seconds must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Immutable identity fields (§3 "Task identity").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIdentity {
    pub task_id: uuid::Uuid,
    pub task_type: TaskType,
    pub account_id: String,
    pub account_name: String,
}

/// Parameters specific to the `social-account-operator` task type: topic,
/// style, audience, and note count, plus whatever else the agent wants that
/// the scheduler treats as opaque (§9 "Dynamic opaque parameters").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SocialOperatorParams {
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    #[serde(default)]
    pub note_count: Option<u32>,
    /// Anything beyond the named fields above, carried verbatim.
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Tagged sum of agent-specific parameters, keyed by `task_type`. Only one
/// variant exists today; the scheduler never inspects the payload, only
/// serializes and reconstructs it (§9 "Dynamic opaque parameters").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task_type", rename_all = "kebab-case")]
pub enum AgentParams {
    SocialAccountOperator(SocialOperatorParams),
}

impl AgentParams {
    pub fn task_type(&self) -> TaskType {
        match self {
            AgentParams::SocialAccountOperator(_) => TaskType::SocialAccountOperator,
        }
    }
}

/// Cheap login probe result (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStatus {
    LoggedIn,
    NotLoggedIn,
    Unknown,
}

/// Result of starting a credential-exchange attempt (§4.10 `BeginLogin`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeginLoginOutcome {
    QrCode {
        #[serde(with = "base64_bytes")]
        payload: Vec<u8>,
    },
    AlreadyLoggedIn,
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
