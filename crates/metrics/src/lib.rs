pub mod errors;
pub mod latency;
