//! Snapvault command line front end
//!
//! Parses arguments, merges the config file, sets up logging and drives one
//! sync run through the engine.

pub mod app;
pub mod args;
pub mod config;
pub mod logging;
pub mod report;

pub use args::Cli;
