pub mod slack_events;

pub use slack_events::AppState;
