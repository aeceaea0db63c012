use crate::api::middleware::AppError;
use crate::config::{AthenaConfig, LlmConfig};
use reqwest::Client as HttpClient;
use serde_json::{json, Value};

/// Natural language to SQL, and result summarization.
#[async_trait::async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Generate Athena SQL for a question. Fails if the model output is unusable.
    async fn generate_sql(&self, question: &str) -> Result<String, AppError>;

    /// Summarize a formatted result table for the user.
    async fn summarize(&self, question: &str, sql: &str, table_text: &str) -> Result<String, AppError>;
}

/// LLM service talking to a Bedrock-style Anthropic messages gateway
pub struct LlmService {
    gateway_url: String,
    api_key: Option<String>,
    model_id: String,
    max_tokens: u32,
    primary_table: String,
    secondary_table: String,
    http_client: HttpClient,
}

impl LlmService {
    pub fn new(config: &LlmConfig, athena: &AthenaConfig) -> Self {
        Self {
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model_id: config.model_id.clone(),
            max_tokens: config.max_tokens,
            primary_table: athena.primary.qualified_table(),
            secondary_table: athena.secondary.qualified_table(),
            http_client: HttpClient::new(),
        }
    }

    /// Prompt asking for a single Athena query
    pub fn build_sql_prompt(&self, question: &str) -> String {
        format!(
            r#"Generate an Athena SQL query based on the following user request.

### Table Information:
- Table: {primary} (WAF api table, ap-northeast-1)
- Table: {secondary} (WAF frontend table, us-east-1)

### Main Columns:
- time_dt (timestamp) - Event timestamp
- accountid (string) - AWS Account ID
- metadata.product.feature.uid (string) - WAF identifier
- http_request.url.hostname (string) - Request hostname
- src_endpoint.ip (string) - Source IP address
- unmapped['action'] - WAF action (ALLOW, BLOCK, COUNT)

### SQL Example:
SELECT
    unmapped['action'] AS action_type,
    COUNT(*) AS request_count
FROM {primary}
WHERE time_dt >= current_date - INTERVAL '1' DAY
GROUP BY unmapped['action']
ORDER BY request_count DESC
LIMIT 5;

### User Request: {question}

Please generate only the SQL query without any explanation."#,
            primary = self.primary_table,
            secondary = self.secondary_table,
            question = question
        )
    }

    pub fn build_summary_prompt(question: &str, sql: &str, table_text: &str) -> String {
        format!(
            r#"You are a security analyst reviewing AWS WAF logs.

User question: {question}

Executed query:
{sql}

Query results:
{table_text}

Summarize what these results show in a few short bullet points. Point out anything that looks like an attack or an anomaly. Answer in plain text."#
        )
    }

    /// Call the gateway and return the text of the first content block
    async fn call_llm_api(&self, prompt: &str) -> Result<String, AppError> {
        let url = format!("{}/model/{}/invoke", self.gateway_url, self.model_id);

        let mut request = self.http_client.post(&url).json(&json!({
            "anthropic_version": "bedrock-2023-05-31",
            "max_tokens": self.max_tokens,
            "messages": [
                {
                    "role": "user",
                    "content": [{ "type": "text", "text": prompt }],
                }
            ],
        }));

        // Add API key if available
        if let Some(api_key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::LlmService(format!("Failed to call LLM service: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::LlmService(format!(
                "LLM service returned error {}: {}",
                status, error_text
            )));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| AppError::LlmService(format!("Failed to parse LLM response: {}", e)))?;

        extract_text(&result)
    }
}

/// Text of `content[0].text` in an Anthropic messages response.
fn extract_text(response: &Value) -> Result<String, AppError> {
    let first = response["content"]
        .as_array()
        .and_then(|blocks| blocks.first())
        .ok_or_else(|| AppError::LlmService("Invalid content structure in LLM response".to_string()))?;

    first["text"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| AppError::LlmService("No text field in LLM content".to_string()))
}

/// Remove markdown code fences the model sometimes wraps SQL in.
pub fn clean_sql(text: &str) -> String {
    text.trim()
        .trim_start_matches("```sql")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
        .to_string()
}

#[async_trait::async_trait]
impl SqlGenerator for LlmService {
    async fn generate_sql(&self, question: &str) -> Result<String, AppError> {
        let prompt = self.build_sql_prompt(question);
        let sql = clean_sql(&self.call_llm_api(&prompt).await?);
        if sql.is_empty() {
            return Err(AppError::LlmService("LLM response does not contain SQL query".to_string()));
        }
        Ok(sql)
    }

    async fn summarize(&self, question: &str, sql: &str, table_text: &str) -> Result<String, AppError> {
        let prompt = Self::build_summary_prompt(question, sql, table_text);
        Ok(self.call_llm_api(&prompt).await?.trim().to_string())
    }
}
