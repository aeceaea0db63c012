use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::models::RegionTag;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub athena: AthenaConfig,
    pub llm: LlmConfig,
    pub slack: SlackConfig,
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Athena settings shared by both regions plus one record per region.
#[derive(Debug, Clone, Deserialize)]
pub struct AthenaConfig {
    pub workgroup: String,
    pub api_key: Option<String>,
    pub timestamp_column: String,
    pub local_utc_offset_hours: i64,
    pub poll_interval_ms: u64,
    pub deadline_secs: u64,
    pub max_result_rows: usize,
    pub primary: RegionConfig,
    pub secondary: RegionConfig,
}

/// Everything that differs between the two Athena deployments.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RegionConfig {
    pub aws_region: String,
    pub catalog: String,
    pub table: String,
    pub output_location: String,
    pub endpoint: String,
}

impl RegionConfig {
    /// Fully-qualified `catalog.table` name.
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.catalog, self.table)
    }

    /// Deep link to the Athena console history entry of an execution.
    pub fn console_link(&self, execution_id: &str) -> String {
        format!(
            "https://{region}.console.aws.amazon.com/athena/home?region={region}#/query-editor/history/{id}",
            region = self.aws_region,
            id = execution_id
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub model_id: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    pub api_url: String,
    pub bot_token: String,
    pub bot_user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    pub show_sql: bool,
    pub show_execution_id: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl AthenaConfig {
    pub fn region(&self, tag: RegionTag) -> &RegionConfig {
        match tag {
            RegionTag::ApNortheast1 => &self.primary,
            RegionTag::UsEast1 => &self.secondary,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

/// Display toggles are on unless the variable is literally "false".
fn toggle_enabled(value: &str) -> bool {
    value != "false"
}

fn require_gateway_url(var: &str, value: &str) -> Result<(), config::ConfigError> {
    if value.trim().is_empty() {
        return Err(config::ConfigError::Message(format!(
            "{} is required and must point at a request-signing gateway",
            var
        )));
    }
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| config::ConfigError::Message(format!("Invalid {}: {}", var, e)))
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("athena.workgroup", "primary")?
            .set_default("athena.timestamp_column", "time_dt")?
            .set_default("athena.local_utc_offset_hours", 9)?
            .set_default("athena.poll_interval_ms", 2000)?
            .set_default("athena.deadline_secs", 45)?
            .set_default("athena.max_result_rows", 20)?
            .set_default("athena.primary.aws_region", "ap-northeast-1")?
            .set_default("athena.primary.catalog", "amazon_security_lake_glue_db_ap_northeast_1")?
            .set_default("athena.primary.table", "amazon_security_lake_table_ap_northeast_1_waf_2_0")?
            .set_default("athena.primary.output_location", "s3://waf-query-results-ap-northeast-1/")?
            .set_default("athena.primary.endpoint", "")?
            .set_default("athena.secondary.aws_region", "us-east-1")?
            .set_default("athena.secondary.catalog", "amazon_security_lake_glue_db_us_east_1")?
            .set_default("athena.secondary.table", "amazon_security_lake_table_us_east_1_waf_2_0")?
            .set_default("athena.secondary.output_location", "s3://waf-query-results-us-east-1/")?
            .set_default("athena.secondary.endpoint", "")?
            .set_default("llm.gateway_url", "")?
            .set_default("llm.model_id", "apac.anthropic.claude-3-sonnet-20240229-v1:0")?
            .set_default("llm.max_tokens", 1000)?
            .set_default("slack.api_url", "https://slack.com/api/chat.postMessage")?
            .set_default("slack.bot_token", "")?
            .set_default("display.show_sql", true)?
            .set_default("display.show_execution_id", true)?
            .set_default("logging.level", "info")?;

        // Load from environment variables
        let overrides = [
            ("HOST", "server.host"),
            ("ATHENA_WORKGROUP", "athena.workgroup"),
            ("ATHENA_API_KEY", "athena.api_key"),
            ("ATHENA_DATABASE", "athena.primary.catalog"),
            ("ATHENA_OUTPUT_BUCKET", "athena.primary.output_location"),
            ("ATHENA_ENDPOINT", "athena.primary.endpoint"),
            ("ATHENA_DATABASE_US_EAST_1", "athena.secondary.catalog"),
            ("ATHENA_OUTPUT_BUCKET_US_EAST_1", "athena.secondary.output_location"),
            ("ATHENA_ENDPOINT_US_EAST_1", "athena.secondary.endpoint"),
            ("LLM_GATEWAY_URL", "llm.gateway_url"),
            ("LLM_API_KEY", "llm.api_key"),
            ("LLM_MODEL_ID", "llm.model_id"),
            ("SLACK_API_URL", "slack.api_url"),
            ("SLACK_BOT_TOKEN", "slack.bot_token"),
            ("SLACK_BOT_USER_ID", "slack.bot_user_id"),
            ("RUST_LOG", "logging.level"),
        ];
        for (var, key) in overrides {
            if let Ok(value) = env::var(var) {
                builder = builder.set_override(key, value)?;
            }
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", port.parse::<u16>().unwrap_or(3000))?;
        }

        if let Ok(show_sql) = env::var("SHOW_SQL_IN_SLACK") {
            builder = builder.set_override("display.show_sql", toggle_enabled(&show_sql))?;
        }

        if let Ok(show_id) = env::var("SHOW_QUERY_ID_IN_SLACK") {
            builder = builder.set_override("display.show_execution_id", toggle_enabled(&show_id))?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        // Requests go out unsigned, so every upstream must be a gateway that signs them.
        require_gateway_url("ATHENA_ENDPOINT", &self.athena.primary.endpoint)?;
        require_gateway_url("ATHENA_ENDPOINT_US_EAST_1", &self.athena.secondary.endpoint)?;
        require_gateway_url("LLM_GATEWAY_URL", &self.llm.gateway_url)?;
        if self.athena.max_result_rows == 0 {
            return Err(config::ConfigError::Message(
                "athena.max_result_rows must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
