use crate::api::middleware::AppError;
use crate::config::SlackConfig;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::json;

/// Outbound chat messages.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn post_message(&self, channel: &str, text: &str) -> Result<(), AppError>;
}

/// Slack `chat.postMessage` client
pub struct SlackService {
    api_url: String,
    token: String,
    http_client: HttpClient,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

impl SlackService {
    pub fn new(config: &SlackConfig) -> Self {
        let token = resolve_token(&config.bot_token);
        if token.is_empty() {
            tracing::warn!("Slack bot token is not set; messages will not be delivered");
        } else {
            tracing::info!("Loaded Slack token (length: {})", token.len());
        }

        Self {
            api_url: config.api_url.clone(),
            token,
            http_client: HttpClient::new(),
        }
    }
}

/// The stored secret is either the token itself or a JSON object holding it.
pub fn resolve_token(secret: &str) -> String {
    let secret = secret.trim();
    if !secret.starts_with('{') {
        return secret.to_string();
    }

    let parsed: serde_json::Value = match serde_json::from_str(secret) {
        Ok(value) => value,
        Err(_) => {
            tracing::warn!("Secret is not in JSON format, using as plain token");
            return secret.to_string();
        }
    };

    ["token", "slack_token", "SLACK_TOKEN"]
        .iter()
        .find_map(|key| parsed[*key].as_str().filter(|t| !t.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| {
            tracing::warn!("Token not found in secret JSON, using entire secret as token");
            secret.to_string()
        })
}

/// Short single-line preview of a message for logs.
fn preview(text: &str) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() > 100 {
        format!("{}...", flat.chars().take(97).collect::<String>())
    } else {
        flat
    }
}

#[async_trait::async_trait]
impl Notifier for SlackService {
    async fn post_message(&self, channel: &str, text: &str) -> Result<(), AppError> {
        if self.token.is_empty() || self.token == "DUMMY" {
            return Err(AppError::Notification(
                "Slack token is empty. Unable to send message to Slack.".to_string(),
            ));
        }

        tracing::info!("Sending to Slack - Channel: {}, preview: {}", channel, preview(text));

        let response = self
            .http_client
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .json(&json!({ "channel": channel, "text": text }))
            .send()
            .await
            .map_err(|e| AppError::Notification(format!("Slack request error: {}", e)))?;

        let status = response.status();
        let body: PostMessageResponse = response
            .json()
            .await
            .map_err(|e| AppError::Notification(format!("Failed to parse Slack response ({}): {}", status, e)))?;

        if body.ok {
            tracing::info!("Successfully sent Slack message to {}", channel);
            Ok(())
        } else {
            let error = body.error.unwrap_or_else(|| "Unknown error".to_string());
            Err(AppError::Notification(format!("Slack API error: {}", error)))
        }
    }
}
