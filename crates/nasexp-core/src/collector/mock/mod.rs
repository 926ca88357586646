//! In-memory capabilities and host fixtures for tests.

mod commands;
mod filesystem;
pub mod scenarios;

pub use commands::MockCommands;
pub use filesystem::MockFs;
