use serde::Deserialize;

/// Envelope type Slack uses for real events.
pub const EVENT_CALLBACK: &str = "event_callback";

/// Slack Events API envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackEventWrapper {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub event: SlackEvent,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlackEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    pub event_ts: Option<String>,
}

impl SlackEvent {
    pub fn is_message(&self) -> bool {
        self.kind == "message" || self.kind == "app_mention"
    }
}
