// Shared fixtures and doubles for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::api::middleware::AppError;
use crate::config::{AthenaConfig, DisplayConfig, RegionConfig};
use crate::models::{ExecutionState, QueryRequest, RegionTag};
use crate::services::dedup_cache::{Clock, DedupCaches};
use crate::services::engine::{AnalyticalEngineClient, EngineError, EngineRegistry, EngineStatus, ResultPage};
use crate::services::llm_service::SqlGenerator;
use crate::services::orchestrator::Orchestrator;
use crate::services::query_executor::{ExecutorSettings, QueryExecutor};
use crate::services::query_rewriter::QueryRewriter;
use crate::services::slack_service::Notifier;

/// Clock that only moves when told to.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}

fn region(aws_region: &str, suffix: &str) -> RegionConfig {
    RegionConfig {
        aws_region: aws_region.to_string(),
        catalog: format!("amazon_security_lake_glue_db_{}", suffix),
        table: format!("amazon_security_lake_table_{}_waf_2_0", suffix),
        output_location: format!("s3://results-{}/", aws_region),
        endpoint: format!("https://signer.internal/athena/{}", aws_region),
    }
}

pub fn athena_config() -> AthenaConfig {
    AthenaConfig {
        workgroup: "primary".to_string(),
        api_key: None,
        timestamp_column: "time_dt".to_string(),
        local_utc_offset_hours: 9,
        poll_interval_ms: 2000,
        deadline_secs: 45,
        max_result_rows: 20,
        primary: region("ap-northeast-1", "ap_northeast_1"),
        secondary: region("us-east-1", "us_east_1"),
    }
}

pub fn rewriter() -> QueryRewriter {
    QueryRewriter::from_config(&athena_config()).unwrap()
}

/// Scripted engine. Statuses are served in order, then RUNNING forever.
pub struct MockEngine {
    region: RegionTag,
    start: Result<String, String>,
    start_delay: Duration,
    statuses: Mutex<VecDeque<Result<EngineStatus, String>>>,
    results: Result<ResultPage, String>,
    stop_error: Option<String>,
    requests: Mutex<Vec<QueryRequest>>,
    max_rows: Mutex<Option<usize>>,
    pub start_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub results_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
}

impl MockEngine {
    pub fn new(region: RegionTag) -> Self {
        Self {
            region,
            start: Ok("exec-1".to_string()),
            start_delay: Duration::ZERO,
            statuses: Mutex::new(VecDeque::new()),
            results: Ok(ResultPage::default()),
            stop_error: None,
            requests: Mutex::new(Vec::new()),
            max_rows: Mutex::new(None),
            start_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            results_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_start(mut self, start: Result<String, String>) -> Self {
        self.start = start;
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn with_statuses(self, statuses: Vec<Result<EngineStatus, String>>) -> Self {
        *self.statuses.lock().unwrap() = statuses.into();
        self
    }

    pub fn with_results(mut self, results: Result<ResultPage, String>) -> Self {
        self.results = results;
        self
    }

    pub fn with_stop_error(mut self, message: &str) -> Self {
        self.stop_error = Some(message.to_string());
        self
    }

    pub fn last_request(&self) -> Option<QueryRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    pub fn last_max_rows(&self) -> Option<usize> {
        *self.max_rows.lock().unwrap()
    }
}

fn api_error(operation: &'static str, message: &str) -> EngineError {
    EngineError::Api {
        operation,
        status: 400,
        message: message.to_string(),
    }
}

#[async_trait::async_trait]
impl AnalyticalEngineClient for MockEngine {
    async fn start_query(&self, request: &QueryRequest) -> Result<String, EngineError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        tokio::time::sleep(self.start_delay).await;
        self.start.clone().map_err(|m| api_error("StartQueryExecution", &m))
    }

    async fn get_status(&self, _execution_id: &str) -> Result<EngineStatus, EngineError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.statuses.lock().unwrap().pop_front() {
            Some(next) => next.map_err(|m| api_error("GetQueryExecution", &m)),
            None => Ok(EngineStatus {
                state: ExecutionState::Running,
                reason: None,
            }),
        }
    }

    async fn get_results(&self, _execution_id: &str, max_rows: usize) -> Result<ResultPage, EngineError> {
        self.results_calls.fetch_add(1, Ordering::SeqCst);
        *self.max_rows.lock().unwrap() = Some(max_rows);
        self.results.clone().map_err(|m| api_error("GetQueryResults", &m))
    }

    async fn stop_query(&self, _execution_id: &str) -> Result<(), EngineError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        match &self.stop_error {
            Some(message) => Err(api_error("StopQueryExecution", message)),
            None => Ok(()),
        }
    }

    fn region(&self) -> RegionTag {
        self.region
    }
}

pub struct MockGenerator {
    sql: Result<String, String>,
    summary: Result<String, String>,
    last_table: Mutex<Option<String>>,
    pub generate_calls: AtomicUsize,
    pub summarize_calls: AtomicUsize,
}

impl MockGenerator {
    pub fn new(sql: &str) -> Self {
        Self {
            sql: Ok(sql.to_string()),
            summary: Ok("Summary.".to_string()),
            last_table: Mutex::new(None),
            generate_calls: AtomicUsize::new(0),
            summarize_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            sql: Err(message.to_string()),
            ..Self::new("")
        }
    }

    pub fn with_summary(mut self, summary: &str) -> Self {
        self.summary = Ok(summary.to_string());
        self
    }

    pub fn with_summary_error(mut self, message: &str) -> Self {
        self.summary = Err(message.to_string());
        self
    }

    pub fn last_table(&self) -> Option<String> {
        self.last_table.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SqlGenerator for MockGenerator {
    async fn generate_sql(&self, _question: &str) -> Result<String, AppError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.sql.clone().map_err(AppError::LlmService)
    }

    async fn summarize(&self, _question: &str, _sql: &str, table_text: &str) -> Result<String, AppError> {
        self.summarize_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_table.lock().unwrap() = Some(table_text.to_string());
        self.summary.clone().map_err(AppError::LlmService)
    }
}

/// Records every message instead of sending it.
#[derive(Default)]
pub struct MockNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl MockNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Notifier for MockNotifier {
    async fn post_message(&self, channel: &str, text: &str) -> Result<(), AppError> {
        self.messages
            .lock()
            .unwrap()
            .push((channel.to_string(), text.to_string()));
        Ok(())
    }
}

/// An orchestrator wired to doubles, with handles to inspect them.
pub struct Harness {
    pub orchestrator: Orchestrator,
    pub engine: Arc<MockEngine>,
    pub generator: Arc<MockGenerator>,
    pub notifier: Arc<MockNotifier>,
}

pub async fn harness(generator: MockGenerator, engine: MockEngine) -> Harness {
    let display = DisplayConfig {
        show_sql: true,
        show_execution_id: true,
    };
    harness_with(generator, engine, display).await
}

pub async fn harness_with(generator: MockGenerator, engine: MockEngine, display: DisplayConfig) -> Harness {
    let engine = Arc::new(engine);
    let generator = Arc::new(generator);
    let notifier = Arc::new(MockNotifier::default());

    let registry = Arc::new(EngineRegistry::new(athena_config()));
    registry.insert(engine.clone()).await;
    let settings = ExecutorSettings {
        poll_interval: Duration::from_millis(10),
        deadline: Duration::from_millis(500),
        max_result_rows: 20,
        workgroup: "primary".to_string(),
    };
    let executor = QueryExecutor::new(registry, rewriter(), settings);

    let orchestrator = Orchestrator::new(
        generator.clone(),
        notifier.clone(),
        executor,
        DedupCaches::new(Arc::new(ManualClock::new())),
        display,
        Some("U_BOT".to_string()),
    );

    Harness {
        orchestrator,
        engine,
        generator,
        notifier,
    }
}
