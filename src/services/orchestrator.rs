// Request lifecycle of one chat question.
//
// Intake (filtering and dedup) runs synchronously while the webhook waits;
// generation, execution and the reply run afterwards in `handle_question`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::api::middleware::AppError;
use crate::config::DisplayConfig;
use crate::models::{RegionTag, SlackEventWrapper, EVENT_CALLBACK};
use crate::services::dedup_cache::{DedupCache, DedupCaches};
use crate::services::llm_service::SqlGenerator;
use crate::services::query_executor::{ExecutionFailure, ExecutionReport, QueryExecutor};
use crate::services::region_router::RegionRouter;
use crate::services::result_formatter::{FormatMode, ResultFormatter};
use crate::services::slack_service::Notifier;

const MIN_QUESTION_CHARS: usize = 3;
const NO_DATA_ANALYSIS: &str = "No data found. Please try different search criteria.";

/// A question accepted for processing.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub event_id: String,
    pub channel: String,
    pub user: String,
    pub text: String,
}

/// What the webhook should do with a delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Intake {
    /// URL verification; echo the value back.
    Challenge(String),
    /// Nothing to do; the value is the response status text.
    Ignored(&'static str),
    /// Tell the user why the question was not run.
    Rejected { channel: String, message: String },
    Accepted(Question),
}

pub struct Orchestrator {
    generator: Arc<dyn SqlGenerator>,
    notifier: Arc<dyn Notifier>,
    executor: QueryExecutor,
    caches: DedupCaches,
    display: DisplayConfig,
    bot_user_id: Option<String>,
}

impl Orchestrator {
    pub fn new(
        generator: Arc<dyn SqlGenerator>,
        notifier: Arc<dyn Notifier>,
        executor: QueryExecutor,
        caches: DedupCaches,
        display: DisplayConfig,
        bot_user_id: Option<String>,
    ) -> Self {
        Self {
            generator,
            notifier,
            executor,
            caches,
            display,
            bot_user_id,
        }
    }

    pub fn caches(&self) -> &DedupCaches {
        &self.caches
    }

    /// Decide what to do with a raw webhook delivery.
    pub fn receive(&self, body: &[u8], retry_num: Option<&str>) -> Result<Intake, AppError> {
        if let Some(retry_num) = retry_num {
            tracing::info!("Slack retry detected: {}", retry_num);
            return Ok(Intake::Ignored("retry ignored"));
        }

        let payload: serde_json::Value = serde_json::from_slice(body).map_err(|e| {
            tracing::warn!("Failed to parse payload: {}", e);
            AppError::InvalidPayload("invalid request".to_string())
        })?;

        if let Some(challenge) = payload.get("challenge").and_then(|c| c.as_str()) {
            tracing::info!("Responding to Slack URL verification challenge");
            return Ok(Intake::Challenge(challenge.to_string()));
        }

        let wrapper: SlackEventWrapper = serde_json::from_value(payload).map_err(|e| {
            tracing::warn!("Failed to parse event wrapper: {}", e);
            AppError::InvalidPayload("invalid event format".to_string())
        })?;

        Ok(self.intake(wrapper))
    }

    fn intake(&self, wrapper: SlackEventWrapper) -> Intake {
        if wrapper.kind != EVENT_CALLBACK {
            tracing::info!("Ignoring non-event callback request type: {}", wrapper.kind);
            return Intake::Ignored("ignored");
        }

        let event = wrapper.event;
        if !event.is_message() {
            tracing::info!("Ignoring non-message event type: {}", event.kind);
            return Intake::Ignored("ignored non-message event");
        }

        if self.bot_user_id.as_deref() == Some(event.user.as_str()) {
            tracing::info!("Ignoring bot's own message");
            return Intake::Ignored("ignored bot message");
        }

        if !wrapper.event_id.is_empty() {
            let key = DedupCache::event_key(&wrapper.event_id, &event.text, &event.channel);
            if !self.caches.inbound_events.should_process(&key) {
                tracing::info!("Ignoring duplicate event {}", wrapper.event_id);
                return Intake::Ignored("duplicate event");
            }
        }

        tracing::info!(
            "Processing event: ID={}, Type={}, User={}, Text='{}'",
            wrapper.event_id,
            event.kind,
            event.user,
            event.text
        );

        let text = self.strip_mention(&event.text);
        if text.is_empty() {
            tracing::info!("Ignoring empty message");
            return Intake::Ignored("ignored empty message");
        }
        if text.chars().count() < MIN_QUESTION_CHARS {
            tracing::info!("Rejecting too short question: '{}'", text);
            let error = AppError::RejectedInput(format!(
                "question is too short. Please describe what you want to know in at least {} characters.",
                MIN_QUESTION_CHARS
            ));
            return Intake::Rejected {
                channel: event.channel,
                message: error.to_string(),
            };
        }

        let query_key = DedupCache::query_key(&event.channel, &text);
        if !self.caches.recent_queries.should_process(&query_key) {
            tracing::info!("Ignoring duplicate query '{}'", text);
            return Intake::Ignored("duplicate query ignored");
        }

        Intake::Accepted(Question {
            event_id: wrapper.event_id,
            channel: event.channel,
            user: event.user,
            text,
        })
    }

    fn strip_mention(&self, text: &str) -> String {
        let text = text.trim();
        match &self.bot_user_id {
            Some(id) => text.replace(&format!("<@{}>", id), "").trim().to_string(),
            None => text.to_string(),
        }
    }

    /// Run a question end to end and post the reply. Returns the reply text.
    ///
    /// Only SQL generation failures are returned as errors; every other failure
    /// becomes a chat message.
    pub async fn handle_question(&self, question: Question, cancel: CancellationToken) -> Result<String, AppError> {
        let span = tracing::info_span!(
            "question",
            invocation = %Uuid::new_v4(),
            channel = %question.channel
        );
        self.run(question, cancel).instrument(span).await
    }

    async fn run(&self, question: Question, cancel: CancellationToken) -> Result<String, AppError> {
        tracing::info!("Processing query: {}", question.text);

        let sql = self.generator.generate_sql(&question.text).await.map_err(|e| {
            tracing::error!("SQL generation failed: {}", e);
            e
        })?;
        tracing::info!("Generated SQL: {}", sql);

        if RegionRouter::contains_region_hint(&question.text)
            && self.executor.router().select_region(&sql) == RegionTag::ApNortheast1
        {
            tracing::warn!("Question mentions us-east-1 but the generated SQL targets ap-northeast-1");
        }

        let message = match self.executor.execute(&cancel, &sql).await {
            Ok(report) => self.success_message(&question, &report).await,
            Err(failure) => self.failure_message(&failure),
        };

        self.notify(&question.channel, &message).await;
        Ok(message)
    }

    async fn success_message(&self, question: &Question, report: &ExecutionReport) -> String {
        let (table_text, analysis) = tokio::join!(
            async { ResultFormatter::format_table(&report.table, FormatMode::Display) },
            self.analyze(question, report)
        );

        let mut message = String::from("*WAF Log Search Result*\n\n");

        if self.display.show_sql {
            message.push_str(&format!("*Input Prompt:*\n```\n{}\n```\n\n", shorten(&question.text, 100)));
            message.push_str(&format!("*Executed Query:*\n```\n{}\n```\n\n", report.sql));
        }

        message.push_str(&format!("*Result:* {} rows\n", report.table.data_row_count()));
        if self.display.show_execution_id {
            let link = self.executor.region_config(report.region).console_link(&report.execution_id);
            message.push_str(&format!("*Athena QueryID:* `{}`\n", report.execution_id));
            message.push_str(&format!("*Console URL:* {}\n\n", link));
        }

        if report.table.has_data() {
            message.push_str("*Result Data:*\n");
            message.push_str(&table_text);
        } else {
            message.push_str("*Result Data:* No data available");
        }

        message.push_str(&format!("\n*Analysis Result:*\n{}", analysis));
        tracing::info!(
            "Prepared result message (region: {}, size: {})",
            report.region,
            message.len()
        );
        message
    }

    async fn analyze(&self, question: &Question, report: &ExecutionReport) -> String {
        if !report.table.has_data() {
            return NO_DATA_ANALYSIS.to_string();
        }

        let table_text = ResultFormatter::format_table(&report.table, FormatMode::Summarize);
        match self.generator.summarize(&question.text, &report.sql, &table_text).await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!("Result analysis failed: {}", e);
                format!("Analysis unavailable: {}", e)
            }
        }
    }

    fn failure_message(&self, failure: &ExecutionFailure) -> String {
        let mut message = format!("Query failed (region: {}): {}\n\n", failure.region, failure.error);
        message.push_str(&format!("Executed SQL:\n```\n{}\n```\n\n", failure.sql));
        if let Some(execution_id) = &failure.execution_id {
            let link = self.executor.region_config(failure.region).console_link(execution_id);
            message.push_str(&format!("Athena Console: {}", link));
        }
        tracing::warn!("Query failed: {}", message);
        message
    }

    /// Post a message unless an equivalent one went to the channel recently.
    /// Returns whether a send was attempted.
    pub async fn notify(&self, channel: &str, text: &str) -> bool {
        let key = DedupCache::message_key(channel, text);
        if !self.caches.outbound_messages.should_process(&key) {
            tracing::info!("Suppressing duplicate Slack message to channel {}", channel);
            return false;
        }

        if let Err(e) = self.notifier.post_message(channel, text).await {
            tracing::error!("Slack send error: {}", e);
        }
        true
    }
}

fn shorten(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars - 3).collect::<String>())
    } else {
        text.to_string()
    }
}
