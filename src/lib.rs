//! Keeps Minecraft Bedrock dedicated server instances on the latest build:
//! snapshot, fetch, swap binaries, carry worlds and configuration over, restart.

pub mod archive;
pub mod backup;
pub mod cache;
pub mod config;
pub mod error;
pub mod instance;
pub mod lock;
pub mod logging;
pub mod orchestrator;
pub mod process;
pub mod resolver;
pub mod transplant;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::{UpdaterConfig, Version};
pub use instance::ServerInstance;
pub use orchestrator::{InstanceOutcome, RunSummary, Updater};
