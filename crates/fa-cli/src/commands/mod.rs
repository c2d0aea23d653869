//! CLI subcommand implementations.

pub mod events;
pub mod export;
pub mod import;
pub mod parse;
pub mod status;
pub mod util;
pub mod watch;
