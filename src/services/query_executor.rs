// Query execution against the regional Athena deployments.
//
// Flow: deny-list check, rewrite, route, submit, poll on a fixed interval until a
// terminal state or the deadline, then fetch a single bounded page of results.
// Nothing here retries; the caller decides what to do with a failure.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{AthenaConfig, RegionConfig};
use crate::models::{ExecutionState, QueryExecution, QueryRequest, RegionTag, ResultTable};
use crate::services::engine::{AnalyticalEngineClient, EngineRegistry};
use crate::services::query_rewriter::QueryRewriter;
use crate::services::region_router::RegionRouter;
use crate::validation::SqlValidator;

/// Timing and size limits of the executor.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub poll_interval: Duration,
    /// Budget from submission to completion. Kept shorter than the request
    /// lifetime so a timeout can still be reported.
    pub deadline: Duration,
    pub max_result_rows: usize,
    pub workgroup: String,
}

impl ExecutorSettings {
    pub fn from_config(config: &AthenaConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            deadline: config.deadline(),
            max_result_rows: config.max_result_rows,
            workgroup: config.workgroup.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Rejected(String),

    #[error("Athena start error: {0}")]
    Submission(String),

    #[error("Failed to get query status: {0}")]
    Status(String),

    #[error("Failed to get query results: {0}")]
    ResultFetch(String),

    #[error("Athena query failed: {0}")]
    Failed(String),

    #[error("Athena query was cancelled{}", reason_suffix(.0))]
    Cancelled(Option<String>),

    #[error("Query timed out ({} seconds elapsed). Execution aborted.", .0.as_secs())]
    TimedOut(Duration),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default()
}

/// A failed execution together with what was attempted.
#[derive(Debug, Clone)]
pub struct ExecutionFailure {
    pub execution_id: Option<String>,
    pub region: RegionTag,
    /// SQL actually attempted (rewritten unless rejected before rewriting).
    pub sql: String,
    pub error: ExecutionError,
}

#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub execution_id: String,
    pub region: RegionTag,
    pub sql: String,
    pub table: ResultTable,
}

/// How the polling task ended.
#[derive(Debug)]
enum PollOutcome {
    Finished(QueryExecution),
    StatusError(String),
    /// Token fired before a terminal state was observed.
    Interrupted,
}

pub struct QueryExecutor {
    registry: Arc<EngineRegistry>,
    rewriter: QueryRewriter,
    router: RegionRouter,
    settings: ExecutorSettings,
}

impl QueryExecutor {
    pub fn new(registry: Arc<EngineRegistry>, rewriter: QueryRewriter, settings: ExecutorSettings) -> Self {
        let router = RegionRouter::from_config(registry.config());
        Self {
            registry,
            rewriter,
            router,
            settings,
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn router(&self) -> &RegionRouter {
        &self.router
    }

    pub fn region_config(&self, region: RegionTag) -> &RegionConfig {
        self.registry.config().region(region)
    }

    /// Execute `sql`, returning at most one page of results.
    ///
    /// `cancel` is the caller's cancellation signal; firing it stops polling and
    /// cancels the backend execution.
    pub async fn execute(&self, cancel: &CancellationToken, sql: &str) -> Result<ExecutionReport, ExecutionFailure> {
        if let Err(message) = SqlValidator::reject_mutations(sql) {
            tracing::warn!("Rejected query before submission: {}", message);
            return Err(ExecutionFailure {
                execution_id: None,
                region: self.router.select_region(sql),
                sql: sql.to_string(),
                error: ExecutionError::Rejected(message),
            });
        }

        let sql = self.rewriter.rewrite(sql);
        let region = self.router.select_region(&sql);
        let failure = |execution_id: Option<&str>, error: ExecutionError| ExecutionFailure {
            execution_id: execution_id.map(str::to_string),
            region,
            sql: sql.clone(),
            error,
        };

        let client = self
            .registry
            .get_or_create(region)
            .await
            .map_err(|e| failure(None, ExecutionError::Submission(e.to_string())))?;

        let region_config = self.registry.config().region(region);
        let mut request = QueryRequest {
            sql: sql.clone(),
            region,
            catalog: region_config.catalog.clone(),
            output_location: region_config.output_location.clone(),
            workgroup: self.settings.workgroup.clone(),
            deadline: Instant::now() + self.settings.deadline,
        };
        tracing::info!(
            "Executing query (region: {}, catalog: {}, output: {})",
            region,
            request.catalog,
            request.output_location
        );

        let execution_id = client.start_query(&request).await.map_err(|e| {
            tracing::error!("Athena start error: {}", e);
            failure(None, ExecutionError::Submission(e.to_string()))
        })?;
        tracing::info!("Started Athena query with ID: {}", execution_id);

        // The budget runs from the moment the engine accepted the query.
        let submitted_at = Instant::now();
        request.deadline = submitted_at + self.settings.deadline;

        self.await_completion(client.clone(), &request, &execution_id, submitted_at, cancel)
            .await
            .map_err(|error| failure(Some(execution_id.as_str()), error))?;

        let max_rows = self.settings.max_result_rows;
        let page = client.get_results(&execution_id, max_rows).await.map_err(|e| {
            tracing::error!("Failed to get query results for {}: {}", execution_id, e);
            failure(Some(execution_id.as_str()), ExecutionError::ResultFetch(e.to_string()))
        })?;

        // Only the first page is used, even when more data exists.
        if let Some(token) = &page.next_token {
            let preview: String = token.chars().take(10).collect();
            tracing::info!(
                "Additional data available, but using only first {} rows (NextToken: {}...)",
                max_rows,
                preview
            );
        }

        Ok(ExecutionReport {
            execution_id,
            region,
            sql,
            table: ResultTable::bounded(page.columns, page.rows, max_rows),
        })
    }

    /// Race the polling task against the deadline.
    async fn await_completion(
        &self,
        client: Arc<dyn AnalyticalEngineClient>,
        request: &QueryRequest,
        execution_id: &str,
        submitted_at: Instant,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        let poll_token = cancel.child_token();
        let mut poller = tokio::spawn(poll_until_terminal(
            client.clone(),
            execution_id.to_string(),
            self.settings.poll_interval,
            poll_token.clone(),
        ));

        let finished = tokio::select! {
            joined = &mut poller => Some(joined),
            _ = tokio::time::sleep_until(request.deadline) => None,
        };

        match finished {
            Some(Ok(PollOutcome::Finished(execution))) => match execution.state {
                ExecutionState::Succeeded => Ok(()),
                ExecutionState::Failed => {
                    let reason = execution.state_reason.unwrap_or_else(|| "Unknown error".to_string());
                    tracing::warn!("Athena query failed: {}\nQuery: {}", reason, request.sql);
                    Err(ExecutionError::Failed(reason))
                }
                ExecutionState::Cancelled => Err(ExecutionError::Cancelled(execution.state_reason)),
                other => Err(ExecutionError::Failed(format!(
                    "Athena query did not complete successfully. Final state: {}",
                    other
                ))),
            },
            Some(Ok(PollOutcome::StatusError(message))) => Err(ExecutionError::Status(message)),
            Some(Ok(PollOutcome::Interrupted)) => {
                tracing::info!("Query {} cancelled by caller", execution_id);
                cancel_backend(client.as_ref(), execution_id).await;
                Err(ExecutionError::Cancelled(Some("cancelled by caller".to_string())))
            }
            Some(Err(join_error)) => Err(ExecutionError::Status(format!("polling task failed: {}", join_error))),
            None => {
                // The poller notices the token on its next tick; no need to wait for it.
                poll_token.cancel();
                let elapsed = submitted_at.elapsed();
                tracing::warn!(
                    "Query timed out after {:?}. Cancelling query {}...",
                    elapsed,
                    execution_id
                );
                cancel_backend(client.as_ref(), execution_id).await;
                Err(ExecutionError::TimedOut(elapsed))
            }
        }
    }
}

async fn cancel_backend(client: &dyn AnalyticalEngineClient, execution_id: &str) {
    match client.stop_query(execution_id).await {
        Ok(()) => tracing::info!("Cancelled Athena query {}", execution_id),
        Err(e) => tracing::warn!("Failed to cancel query {}: {}", execution_id, e),
    }
}

/// Poll the execution status every `interval` until a terminal state, a status
/// error, or until `token` is cancelled.
async fn poll_until_terminal(
    client: Arc<dyn AnalyticalEngineClient>,
    execution_id: String,
    interval: Duration,
    token: CancellationToken,
) -> PollOutcome {
    let mut execution = QueryExecution::submitted(execution_id);
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts = 0u32;

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::debug!("Polling stopped for {} after {} attempts", execution.id, attempts);
                return PollOutcome::Interrupted;
            }
            _ = ticker.tick() => {
                attempts += 1;
                let status = match client.get_status(&execution.id).await {
                    Ok(status) => status,
                    Err(e) => {
                        tracing::error!("Failed to get query status for {}: {}", execution.id, e);
                        return PollOutcome::StatusError(e.to_string());
                    }
                };

                execution.transition(status.state, status.reason);
                tracing::info!("Query execution state: {} (attempt {})", execution.state, attempts);

                if execution.state.is_terminal() {
                    return PollOutcome::Finished(execution);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::engine::{EngineStatus, ResultPage};
    use crate::test_support::{athena_config, rewriter, MockEngine};
    use std::sync::atomic::Ordering;

    const AP_TABLE: &str = "amazon_security_lake_table_ap_northeast_1_waf_2_0";

    fn settings(deadline_ms: u64) -> ExecutorSettings {
        ExecutorSettings {
            poll_interval: Duration::from_millis(10),
            deadline: Duration::from_millis(deadline_ms),
            max_result_rows: 20,
            workgroup: "primary".to_string(),
        }
    }

    async fn executor_with(mocks: Vec<Arc<MockEngine>>, deadline_ms: u64) -> QueryExecutor {
        let registry = Arc::new(EngineRegistry::new(athena_config()));
        for mock in mocks {
            registry.insert(mock).await;
        }
        QueryExecutor::new(registry, rewriter(), settings(deadline_ms))
    }

    fn status(state: ExecutionState, reason: Option<&str>) -> EngineStatus {
        EngineStatus {
            state,
            reason: reason.map(str::to_string),
        }
    }

    fn page(data_rows: usize, next_token: Option<&str>) -> ResultPage {
        let mut rows = vec![vec![Some("action".to_string()), Some("count".to_string())]];
        rows.extend((0..data_rows).map(|i| vec![Some("BLOCK".to_string()), Some(i.to_string())]));
        ResultPage {
            columns: vec!["action".to_string(), "count".to_string()],
            rows,
            next_token: next_token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_successful_execution() {
        let mock = Arc::new(
            MockEngine::new(RegionTag::ApNortheast1)
                .with_statuses(vec![
                    Ok(status(ExecutionState::Running, None)),
                    Ok(status(ExecutionState::Succeeded, None)),
                ])
                .with_results(Ok(page(3, Some("next-page-token")))),
        );
        let executor = executor_with(vec![mock.clone()], 1_000).await;

        let sql = format!("SELECT action, count FROM {}", AP_TABLE);
        let report = executor.execute(&CancellationToken::new(), &sql).await.unwrap();

        assert_eq!(report.execution_id, "exec-1");
        assert_eq!(report.region, RegionTag::ApNortheast1);
        assert!(report
            .sql
            .contains("amazon_security_lake_glue_db_ap_northeast_1.amazon_security_lake_table_ap_northeast_1_waf_2_0"));
        assert_eq!(report.table.data_row_count(), 3);
        assert_eq!(mock.status_calls.load(Ordering::SeqCst), 2);
        assert_eq!(mock.stop_calls.load(Ordering::SeqCst), 0);

        let request = mock.last_request().unwrap();
        assert_eq!(request.catalog, "amazon_security_lake_glue_db_ap_northeast_1");
        assert_eq!(request.workgroup, "primary");
    }

    #[tokio::test]
    async fn test_routes_to_us_east_1_with_its_own_config() {
        let ap = Arc::new(MockEngine::new(RegionTag::ApNortheast1));
        let us = Arc::new(
            MockEngine::new(RegionTag::UsEast1).with_statuses(vec![Ok(status(ExecutionState::Succeeded, None))]),
        );
        let executor = executor_with(vec![ap.clone(), us.clone()], 1_000).await;

        let report = executor
            .execute(
                &CancellationToken::new(),
                "SELECT * FROM amazon_security_lake_table_us_east_1_waf_2_0 LIMIT 5",
            )
            .await
            .unwrap();

        assert_eq!(report.region, RegionTag::UsEast1);
        assert_eq!(ap.start_calls.load(Ordering::SeqCst), 0);
        assert_eq!(us.start_calls.load(Ordering::SeqCst), 1);
        let request = us.last_request().unwrap();
        assert_eq!(request.catalog, "amazon_security_lake_glue_db_us_east_1");
        assert_eq!(request.output_location, "s3://results-us-east-1/");
    }

    #[tokio::test]
    async fn test_denied_sql_is_never_submitted() {
        let mock = Arc::new(MockEngine::new(RegionTag::ApNortheast1));
        let executor = executor_with(vec![mock.clone()], 1_000).await;

        for sql in ["DROP TABLE x", "drop table x", "Drop Table x"] {
            let failure = executor.execute(&CancellationToken::new(), sql).await.unwrap_err();
            assert!(matches!(failure.error, ExecutionError::Rejected(_)));
            assert!(failure.execution_id.is_none());
        }
        assert_eq!(mock.start_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submission_error_is_terminal() {
        let mock = Arc::new(MockEngine::new(RegionTag::ApNortheast1).with_start(Err("AccessDenied".to_string())));
        let executor = executor_with(vec![mock.clone()], 1_000).await;

        let failure = executor.execute(&CancellationToken::new(), "SELECT 1").await.unwrap_err();
        assert!(matches!(failure.error, ExecutionError::Submission(ref m) if m.contains("AccessDenied")));
        assert!(failure.execution_id.is_none());
        assert_eq!(failure.region, RegionTag::ApNortheast1);
        assert_eq!(mock.start_calls.load(Ordering::SeqCst), 1);
        assert_eq!(mock.status_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_state_carries_reason() {
        let mock = Arc::new(MockEngine::new(RegionTag::ApNortheast1).with_statuses(vec![Ok(status(
            ExecutionState::Failed,
            Some("TABLE_NOT_FOUND: line 1:15"),
        ))]));
        let executor = executor_with(vec![mock.clone()], 1_000).await;

        let failure = executor.execute(&CancellationToken::new(), "SELECT 1").await.unwrap_err();
        assert_eq!(failure.execution_id.as_deref(), Some("exec-1"));
        assert_eq!(
            failure.error.to_string(),
            "Athena query failed: TABLE_NOT_FOUND: line 1:15"
        );
        assert_eq!(mock.results_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_state_without_reason_is_generic() {
        let mock = Arc::new(
            MockEngine::new(RegionTag::ApNortheast1).with_statuses(vec![Ok(status(ExecutionState::Failed, None))]),
        );
        let executor = executor_with(vec![mock], 1_000).await;

        let failure = executor.execute(&CancellationToken::new(), "SELECT 1").await.unwrap_err();
        assert_eq!(failure.error, ExecutionError::Failed("Unknown error".to_string()));
    }

    #[tokio::test]
    async fn test_cancelled_state_stops_polling() {
        let mock = Arc::new(
            MockEngine::new(RegionTag::ApNortheast1).with_statuses(vec![Ok(status(ExecutionState::Cancelled, None))]),
        );
        let executor = executor_with(vec![mock.clone()], 1_000).await;

        let failure = executor.execute(&CancellationToken::new(), "SELECT 1").await.unwrap_err();
        assert_eq!(failure.error, ExecutionError::Cancelled(None));
        assert_eq!(failure.error.to_string(), "Athena query was cancelled");
        assert_eq!(mock.status_calls.load(Ordering::SeqCst), 1);
        assert_eq!(mock.stop_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_status_error_is_reported() {
        let mock = Arc::new(
            MockEngine::new(RegionTag::ApNortheast1).with_statuses(vec![Err("ThrottlingException".to_string())]),
        );
        let executor = executor_with(vec![mock], 1_000).await;

        let failure = executor.execute(&CancellationToken::new(), "SELECT 1").await.unwrap_err();
        assert!(matches!(failure.error, ExecutionError::Status(ref m) if m.contains("ThrottlingException")));
    }

    #[tokio::test]
    async fn test_deadline_times_out_and_cancels_once() {
        // Default mock status is RUNNING forever.
        let mock = Arc::new(MockEngine::new(RegionTag::ApNortheast1));
        let executor = executor_with(vec![mock.clone()], 80).await;

        let failure = executor.execute(&CancellationToken::new(), "SELECT 1").await.unwrap_err();
        match failure.error {
            ExecutionError::TimedOut(elapsed) => assert!(elapsed >= Duration::from_millis(80)),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(failure.execution_id.as_deref(), Some("exec-1"));
        assert_eq!(mock.stop_calls.load(Ordering::SeqCst), 1);

        // The detached poller stops on its own.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let polls = mock.status_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mock.status_calls.load(Ordering::SeqCst), polls);
        assert_eq!(mock.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_starts_after_submission() {
        let mock = Arc::new(
            MockEngine::new(RegionTag::ApNortheast1)
                .with_start_delay(Duration::from_millis(150))
                .with_statuses(vec![Ok(status(ExecutionState::Succeeded, None))]),
        );
        let executor = executor_with(vec![mock.clone()], 100).await;

        let report = executor.execute(&CancellationToken::new(), "SELECT 1").await.unwrap();
        assert_eq!(report.execution_id, "exec-1");
        assert_eq!(mock.stop_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_routes_by_configured_secondary_catalog() {
        let mut config = athena_config();
        config.secondary.catalog = "waf_logs_virginia".to_string();
        config.secondary.table = "frontdoor_waf".to_string();

        let ap = Arc::new(MockEngine::new(RegionTag::ApNortheast1));
        let us = Arc::new(
            MockEngine::new(RegionTag::UsEast1).with_statuses(vec![Ok(status(ExecutionState::Succeeded, None))]),
        );
        let registry = Arc::new(EngineRegistry::new(config.clone()));
        registry.insert(ap.clone()).await;
        registry.insert(us.clone()).await;
        let executor = QueryExecutor::new(registry, QueryRewriter::from_config(&config).unwrap(), settings(1_000));

        let report = executor
            .execute(&CancellationToken::new(), "SELECT * FROM frontdoor_waf LIMIT 5")
            .await
            .unwrap();

        assert_eq!(report.region, RegionTag::UsEast1);
        assert_eq!(report.sql, "SELECT * FROM waf_logs_virginia.frontdoor_waf LIMIT 5");
        assert_eq!(ap.start_calls.load(Ordering::SeqCst), 0);
        assert_eq!(us.last_request().unwrap().catalog, "waf_logs_virginia");
    }

    #[tokio::test]
    async fn test_cancellation_failure_does_not_change_outcome() {
        let mock = Arc::new(MockEngine::new(RegionTag::ApNortheast1).with_stop_error("InvalidRequestException"));
        let executor = executor_with(vec![mock.clone()], 50).await;

        let failure = executor.execute(&CancellationToken::new(), "SELECT 1").await.unwrap_err();
        assert!(matches!(failure.error, ExecutionError::TimedOut(_)));
        assert_eq!(mock.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_external_cancellation() {
        let mock = Arc::new(MockEngine::new(RegionTag::ApNortheast1));
        let executor = executor_with(vec![mock.clone()], 5_000).await;
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            canceller.cancel();
        });

        let failure = executor.execute(&token, "SELECT 1").await.unwrap_err();
        assert_eq!(
            failure.error,
            ExecutionError::Cancelled(Some("cancelled by caller".to_string()))
        );
        assert_eq!(mock.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_result_fetch_error() {
        let mock = Arc::new(
            MockEngine::new(RegionTag::ApNortheast1)
                .with_statuses(vec![Ok(status(ExecutionState::Succeeded, None))])
                .with_results(Err("InternalServerException".to_string())),
        );
        let executor = executor_with(vec![mock], 1_000).await;

        let failure = executor.execute(&CancellationToken::new(), "SELECT 1").await.unwrap_err();
        assert!(matches!(failure.error, ExecutionError::ResultFetch(_)));
        assert_eq!(failure.execution_id.as_deref(), Some("exec-1"));
    }

    #[tokio::test]
    async fn test_results_are_bounded_to_one_page() {
        let mock = Arc::new(
            MockEngine::new(RegionTag::ApNortheast1)
                .with_statuses(vec![Ok(status(ExecutionState::Succeeded, None))])
                .with_results(Ok(page(40, Some("more")))),
        );
        let executor = executor_with(vec![mock.clone()], 1_000).await;

        let report = executor.execute(&CancellationToken::new(), "SELECT 1").await.unwrap();
        assert_eq!(report.table.rows.len(), 20);
        assert_eq!(mock.results_calls.load(Ordering::SeqCst), 1);
        assert_eq!(mock.last_max_rows(), Some(20));
    }

    #[test]
    fn test_timeout_message() {
        let error = ExecutionError::TimedOut(Duration::from_secs(45));
        assert_eq!(error.to_string(), "Query timed out (45 seconds elapsed). Execution aborted.");
    }
}
