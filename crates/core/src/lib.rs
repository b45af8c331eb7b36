pub mod config;
pub mod error;
pub mod filter;
pub mod ids;
pub mod model;
pub mod pricing;
pub mod query;
pub mod time;

pub use error::{LlmTraceError, Result};
