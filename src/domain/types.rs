//! # Domain Types
//!
//! Common data structures shared by the action parser, the agent loop,
//! the workspace store and the sandbox executor.

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// The closed set of action kinds the agent may propose.
///
/// `Other` keeps unknown kinds representable (they round-trip through the
/// parser and show up in results) without being dispatchable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    ReadFile,
    WriteFile,
    ListFiles,
    CreateDirectory,
    DeleteFile,
    RunCode,
    RunCommand,
    RunTest,
    ReadLogs,
    Other(String),
}

impl ActionKind {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "read_file" => Self::ReadFile,
            "write_file" => Self::WriteFile,
            "list_files" => Self::ListFiles,
            "create_directory" => Self::CreateDirectory,
            "delete_file" => Self::DeleteFile,
            "run_code" => Self::RunCode,
            "run_command" => Self::RunCommand,
            "run_test" => Self::RunTest,
            "read_logs" => Self::ReadLogs,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::ListFiles => "list_files",
            Self::CreateDirectory => "create_directory",
            Self::DeleteFile => "delete_file",
            Self::RunCode => "run_code",
            Self::RunCommand => "run_command",
            Self::RunTest => "run_test",
            Self::ReadLogs => "read_logs",
            Self::Other(s) => s.as_str(),
        }
    }
}

/// A typed instruction extracted from generated text: a kind plus a free-form
/// parameter map. Parameter values are kept verbatim as JSON values.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    pub params: serde_json::Map<String, Value>,
}

impl Action {
    pub fn new(kind: ActionKind, params: serde_json::Map<String, Value>) -> Self {
        Self { kind, params }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(|v| v.as_u64())
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Action", 2)?;
        s.serialize_field("type", self.kind.as_str())?;
        s.serialize_field("params", &self.params)?;
        s.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Error,
    Rejected,
}

/// The outcome of one processed action. Every action that enters the loop
/// produces exactly one of these, whether it was dispatched or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
    pub execution_time: f64,
}

impl ActionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Success,
            output: Some(output.into()),
            error: None,
            return_value: None,
            execution_time: 0.0,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ActionStatus::Error,
            output: None,
            error: Some(message.into()),
            return_value: None,
            execution_time: 0.0,
        }
    }

    pub fn rejected() -> Self {
        Self {
            status: ActionStatus::Rejected,
            output: None,
            error: Some("Action rejected".to_string()),
            return_value: None,
            execution_time: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One completed iteration of the loop, handed to the iteration hook.
/// Indices start at 1 and increase monotonically within a run.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRecord {
    pub index: u32,
    pub actions: Vec<(Action, ActionResult)>,
    pub raw_response: String,
}

/// Metadata for one file or directory under the workspace root.
/// Derived on demand from the filesystem, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: String,
    pub extension: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Exec,
    Eval,
}

impl ExecMode {
    /// Anything that is not explicitly "eval" runs as a script.
    pub fn from_wire(s: &str) -> Self {
        if s.eq_ignore_ascii_case("eval") {
            Self::Eval
        } else {
            Self::Exec
        }
    }
}

/// The outcome of one sandboxed child process invocation.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
    pub execution_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
}

/// Summary of a finished run, returned to the caller and printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub iterations: u32,
    pub total_files: usize,
    pub file_types: std::collections::HashMap<String, usize>,
    pub elapsed_time: f64,
    pub timestamp: String,
    pub workspace: String,
    pub files: Vec<FileEntry>,
}
