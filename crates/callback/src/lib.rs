pub mod adapter;
pub mod event;
pub mod pipeline;
pub mod telemetry;

pub use adapter::{AnomalySnapshot, CallbackAdapter};
pub use event::LifecycleEvent;
pub use pipeline::{Pipeline, PipelineConfig};
