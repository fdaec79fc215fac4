//! Command-line interface for tunedeck.
//!
//! One-shot commands for searching, downloading and listing the library,
//! plus the interactive shell that runs when no command is given.

mod commands;

pub use commands::{Cli, Commands, run_command};
