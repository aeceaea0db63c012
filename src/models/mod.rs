pub mod query;
pub mod slack;

pub use query::*;
pub use slack::*;
