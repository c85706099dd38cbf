//! Core remediation type definitions.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a remediation session.
///
/// Uses UUID v4 for generation and provides a short form display
/// for human-readable output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new unique session identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Status of a remediation session in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session created but the router run has not started
    #[default]
    Pending,
    /// Router run in progress or session waiting for teardown
    Running,
    /// Session torn down after a successful run
    Completed,
    /// Run or handler failed
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Pending => write!(f, "pending"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A single issue reported by static analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedIssue {
    /// File the issue was found in.
    pub uri: String,
    /// Human-readable description of the issue.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

impl DetectedIssue {
    pub fn new(uri: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            message: message.into(),
            rule_id: None,
        }
    }
}

/// The input of a remediation session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueBatch {
    /// Migration profile the issues were detected against.
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub issues: Vec<DetectedIssue>,
}

impl IssueBatch {
    pub fn new(profile: impl Into<String>, issues: Vec<DetectedIssue>) -> Self {
        Self {
            profile: Some(profile.into()),
            issues,
        }
    }

    /// Whether the batch names a non-blank migration profile.
    pub fn has_profile(&self) -> bool {
        self.profile
            .as_deref()
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false)
    }

    /// Group the batch's issues into tasks, one per file.
    pub fn tasks(&self) -> Vec<Task> {
        group_tasks(
            self.issues
                .iter()
                .map(|issue| (issue.uri.as_str(), issue.message.as_str())),
        )
    }
}

/// A unit of remediation work bound to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// File URI; empty for synthetic tasks built from extra context.
    pub uri: String,
    /// Issue descriptions, in encounter order.
    pub issues: Vec<String>,
}

impl Task {
    pub fn new(uri: impl Into<String>, issues: Vec<String>) -> Self {
        Self {
            uri: uri.into(),
            issues,
        }
    }

    /// Wrap summarized extra context as a task with no file.
    pub fn synthetic(context: impl Into<String>) -> Self {
        Self {
            uri: String::new(),
            issues: vec![context.into()],
        }
    }

    pub fn has_uri(&self) -> bool {
        !self.uri.is_empty()
    }
}

/// A handler nomination produced by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NominatedAssignment {
    pub handler_name: String,
    pub instructions: String,
}

impl NominatedAssignment {
    pub fn new(handler_name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            handler_name: handler_name.into(),
            instructions: instructions.into(),
        }
    }
}

/// A task proposed by the human in response to a "need more tasks" prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSuggestion {
    pub uri: String,
    pub task: String,
}

impl TaskSuggestion {
    pub fn new(uri: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            task: task.into(),
        }
    }
}

/// Group `(uri, issue)` pairs into tasks keyed by uri.
///
/// Uris keep first-encounter order, as do issues within a uri. Blank issues
/// are dropped, and a uri left without issues produces no task.
pub fn group_tasks<'a, I>(pairs: I) -> Vec<Task>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut tasks: Vec<Task> = Vec::new();

    for (uri, issue) in pairs {
        let issue = issue.trim();
        if issue.is_empty() {
            continue;
        }
        match tasks.iter_mut().find(|t| t.uri == uri) {
            Some(task) => task.issues.push(issue.to_string()),
            None => tasks.push(Task::new(uri, vec![issue.to_string()])),
        }
    }

    tasks
}
