//! Work guard CLI library.
//!
//! This crate provides the configuration surface for the nudge work guard:
//! every command is a single mutation of the stored guard state.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands, SitesAction};
pub use config::{Config, dirs_data_path};
