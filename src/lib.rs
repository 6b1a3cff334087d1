//! Dependency-driven process manager for an allele-specific-expression
//! genomics pipeline. Each run takes a read-only snapshot of the file
//! store, classifies every stage's work as done, scheduled, or blocked,
//! and writes shell scripts for the runnable commands. Running the emitted
//! scripts and re-running the manager converges the pipeline.

pub mod config;
pub mod domain;
pub mod driver;
pub mod error;
pub mod manifest;
pub mod scripts;
pub mod snapshot;
pub mod stages;
pub mod store;
pub mod util;
