//! Command-line interface
//!
//! Argument parsing and the glue between the CLI flags and the library.

pub mod args;

pub use args::{Args, Command, ProfileKind, RunArgs, WorkerArgs};
