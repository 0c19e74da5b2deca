pub mod collaborators;
pub mod mapper;
pub mod model;
pub mod orchestrator;
pub mod planner;
pub mod processor;
pub mod progress;
pub mod resolver;
pub mod simulated;

#[cfg(test)]
pub mod testing;

pub use orchestrator::{JobOrchestrator, NewJob, OrchestratorSettings};
pub use progress::JobProgress;
