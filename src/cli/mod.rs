//! Command line interface module
//!
//! This module parses the command line, applies environment overrides and
//! runs the selected pull or push pipeline.

pub mod args;
pub mod runner;

pub use args::{Args, Command};
pub use runner::Runner;
