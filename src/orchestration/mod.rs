//! # Orchestration
//!
//! The engine core that wires every component together, and the background
//! maintenance loop it runs.

pub mod core;
pub mod maintenance;

pub use self::core::{AnalysisCore, AnalysisCoreBuilder};
pub use maintenance::{MaintenanceLoop, MaintenanceReport};
