//! Firebase Analytics logcat viewer CLI library.
//!
//! This crate provides the `fa` command: line sources, filtering, display,
//! configuration and the subcommands built on `fa-core` and `fa-db`.

mod cli;
pub mod commands;
mod config;
pub mod display;
pub mod filter;
pub mod source;

pub use cli::{Cli, Commands};
pub use config::Config;
