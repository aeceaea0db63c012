// Capability interface of a regional analytical engine.
use crate::models::{ExecutionState, QueryRequest, RegionTag};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("{operation} returned {status}: {message}")]
    Api {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("Failed to decode response: {0}")]
    Decode(String),
}

/// Status snapshot of one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub state: ExecutionState,
    pub reason: Option<String>,
}

/// A single page of results as returned by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPage {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    /// Set when the engine has more rows than were returned.
    pub next_token: Option<String>,
}

/// Submit / poll / fetch / cancel against one region's engine.
#[async_trait::async_trait]
pub trait AnalyticalEngineClient: Send + Sync {
    /// Submit a query and return its execution id.
    async fn start_query(&self, request: &QueryRequest) -> Result<String, EngineError>;

    async fn get_status(&self, execution_id: &str) -> Result<EngineStatus, EngineError>;

    /// Fetch the first page of results, at most `max_rows` rows.
    async fn get_results(&self, execution_id: &str, max_rows: usize) -> Result<ResultPage, EngineError>;

    async fn stop_query(&self, execution_id: &str) -> Result<(), EngineError>;

    fn region(&self) -> RegionTag;
}
