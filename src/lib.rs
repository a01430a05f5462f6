// Public API - the runner is the primary entry point
pub mod runner;

// Subsystems, public for embedding the engine directly
pub mod db;
pub mod dump;
pub mod engine;
pub mod error;
pub mod io;
pub mod telemetry;

mod config;

#[cfg(test)]
mod testing;
