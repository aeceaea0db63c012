use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Athena deployment a query is executed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RegionTag {
    #[default]
    #[serde(rename = "ap-northeast-1")]
    ApNortheast1,
    #[serde(rename = "us-east-1")]
    UsEast1,
}

impl RegionTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionTag::ApNortheast1 => "ap-northeast-1",
            RegionTag::UsEast1 => "us-east-1",
        }
    }
}

impl fmt::Display for RegionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully routed query, ready for submission.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub sql: String,
    pub region: RegionTag,
    pub catalog: String,
    pub output_location: String,
    pub workgroup: String,
    /// Set once the engine has accepted the query.
    pub deadline: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Submitted,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Succeeded
                | ExecutionState::Failed
                | ExecutionState::Cancelled
                | ExecutionState::TimedOut
        )
    }

    /// Map an Athena state string. Unknown states are treated as still running.
    pub fn from_engine(state: &str) -> Self {
        match state {
            "QUEUED" => ExecutionState::Submitted,
            "SUCCEEDED" => ExecutionState::Succeeded,
            "FAILED" => ExecutionState::Failed,
            "CANCELLED" => ExecutionState::Cancelled,
            _ => ExecutionState::Running,
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionState::Submitted => "SUBMITTED",
            ExecutionState::Running => "RUNNING",
            ExecutionState::Succeeded => "SUCCEEDED",
            ExecutionState::Failed => "FAILED",
            ExecutionState::Cancelled => "CANCELLED",
            ExecutionState::TimedOut => "TIMED_OUT",
        };
        f.write_str(s)
    }
}

/// One submitted execution, owned and mutated only by its polling loop.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryExecution {
    pub id: String,
    pub state: ExecutionState,
    pub state_reason: Option<String>,
}

impl QueryExecution {
    pub fn submitted(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: ExecutionState::Submitted,
            state_reason: None,
        }
    }

    /// Apply a state change. Returns false (and changes nothing) once terminal.
    pub fn transition(&mut self, next: ExecutionState, reason: Option<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = next;
        self.state_reason = reason;
        true
    }
}

/// A single bounded page of results. Row 0 holds the header labels as Athena returns them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultTable {
    /// Build a table, keeping at most `max_rows` rows.
    pub fn bounded(columns: Vec<String>, mut rows: Vec<Vec<Option<String>>>, max_rows: usize) -> Self {
        rows.truncate(max_rows);
        Self { columns, rows }
    }

    /// Rows excluding the header row.
    pub fn data_row_count(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }

    pub fn has_data(&self) -> bool {
        self.rows.len() > 1
    }
}
