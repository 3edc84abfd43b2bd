//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands::simulate::SimulateArgs;

/// Browser work guard.
///
/// Keeps you on your work site: tracks time away from it and focus time on
/// it, and intervenes when you drift.
#[derive(Debug, Parser)]
#[command(name = "nudge", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show guard state, timers and snooze.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Set the work URL (https:// is added when no scheme is given).
    Target {
        /// Work URL, e.g. `github.com/acme/app`.
        url: String,
    },

    /// Turn the guard on and start a fresh focus session.
    Start {
        /// Focus goal, e.g. `45`, `45m`, `1h30m` (defaults to the stored goal).
        #[arg(long)]
        goal: Option<String>,
    },

    /// Turn the guard off.
    Stop,

    /// Suppress interventions for a while.
    Snooze {
        /// Duration, e.g. `10`, `10m`, `1h`.
        duration: String,
    },

    /// End a snooze early.
    Unsnooze,

    /// Set the focus goal.
    Goal {
        /// Duration, e.g. `60`, `90m`, `2h`.
        duration: String,
    },

    /// Manage blocked entertainment sites.
    #[command(subcommand)]
    Sites(SitesAction),

    /// Replay a scripted browsing session against the controller.
    Simulate(SimulateArgs),
}

/// Entertainment site actions.
#[derive(Debug, Subcommand)]
pub enum SitesAction {
    /// List blocked sites.
    List,

    /// Block a site and its subdomains.
    Add {
        /// Site, e.g. `youtube.com`.
        site: String,
    },

    /// Unblock a site.
    Remove {
        /// Site, e.g. `youtube.com`.
        site: String,
    },
}
