// Regional analytical engine access
pub mod athena;
pub mod client;
pub mod registry;

pub use athena::AthenaHttpClient;
pub use client::{AnalyticalEngineClient, EngineError, EngineStatus, ResultPage};
pub use registry::EngineRegistry;
