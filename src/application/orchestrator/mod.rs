pub mod news;
pub mod playbook_manager;
pub mod prompt_builder;
pub mod reflection;
pub mod risk_gate;
pub mod snapshot_scheduler;
pub mod state_machine;

pub use news::NewsScheduler;
pub use playbook_manager::PlaybookManager;
pub use prompt_builder::PromptBuilder;
pub use reflection::ReflectionEngine;
pub use risk_gate::{RiskGate, RiskResult};
pub use snapshot_scheduler::SnapshotScheduler;
pub use state_machine::{Orchestrator, OrchestratorState};
