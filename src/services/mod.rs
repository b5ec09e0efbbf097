pub mod executor;
pub mod orchestrator;
