//! Core experimentation types, stable hashing, deterministic A/B assignment,
//! and the store interfaces the engines persist through.

pub mod config;
pub mod error;
pub mod experimentation;
pub mod hashing;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::{ExperimentError, ExperimentResult};
pub use experimentation::ExperimentEngine;
pub use store::{BanditHandle, DefinitionStore, MemoryDefinitionStore, MemoryOutcomeStore, OutcomeStore};
