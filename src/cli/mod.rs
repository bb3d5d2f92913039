//! CLI module for zrescue - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
