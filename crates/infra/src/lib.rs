//! Infrastructure layer: pipeline wiring, background workers, persistent stores.

pub mod orchestrator;
pub mod reaper;
pub mod workers;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "redis")]
pub mod redis_cache;
#[cfg(feature = "redis")]
pub mod redis_rate_limit;

pub use orchestrator::{JobOrchestrator, OrchestratorConfig};
pub use reaper::{ReaperConfig, StuckJobReaper};
