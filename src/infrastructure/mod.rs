pub mod cache;
pub mod config;
pub mod llm;
pub mod model;
pub mod telemetry;
