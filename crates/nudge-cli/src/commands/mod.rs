//! CLI subcommand implementations.

pub mod guard;
pub mod simulate;
pub mod sites;
pub mod snooze;
pub mod status;
pub mod util;
