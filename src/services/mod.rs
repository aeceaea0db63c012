pub mod dedup_cache; // Idempotency guards for events, questions and replies
pub mod engine; // Regional Athena clients
pub mod llm_service;
pub mod orchestrator;
pub mod query_executor;
pub mod query_rewriter;
pub mod region_router;
pub mod result_formatter;
pub mod slack_service;

pub use dedup_cache::*;
pub use llm_service::*;
pub use orchestrator::*;
pub use query_executor::*;
pub use query_rewriter::*;
pub use region_router::*;
pub use result_formatter::*;
pub use slack_service::*;
