//! Status command for showing the guard, its timers and the snooze.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use nudge_core::{GuardState, InterventionMode};
use nudge_store::SqliteStore;
use serde::Serialize;

use crate::Config;
use crate::commands::util::format_duration_ms;

/// Snapshot of the guard as shown to the user.
#[derive(Debug, Serialize)]
struct StatusReport {
    target_url: Option<String>,
    guard_active: bool,
    armed: bool,
    snoozed: bool,
    snooze_until: Option<String>,
    snooze_remaining_ms: Option<i64>,
    away_ms: i64,
    away_running: bool,
    focus_ms: i64,
    focus_running: bool,
    goal_minutes: u32,
    intervention: InterventionMode,
    away_threshold_minutes: u32,
    entertainment_sites: Vec<String>,
}

impl StatusReport {
    fn new(state: &GuardState, config: &Config, now: DateTime<Utc>) -> Self {
        let snoozed = state.is_snoozed_at(now);
        let snooze_until = state.snooze_until().filter(|_| snoozed);
        Self {
            target_url: state
                .has_target()
                .then(|| state.target_url().to_string()),
            guard_active: state.is_guard_active(),
            armed: state.is_armed(now),
            snoozed,
            snooze_until: snooze_until.map(|until| until.to_rfc3339_opts(SecondsFormat::Secs, true)),
            snooze_remaining_ms: snooze_until.map(|until| (until - now).num_milliseconds()),
            away_ms: state.away_duration_ms(now),
            away_running: state.away_started_at().is_some(),
            focus_ms: state.focus_duration_ms(now),
            focus_running: state.focus_started_at().is_some(),
            goal_minutes: state.goal_minutes(),
            intervention: config.intervention,
            away_threshold_minutes: config.away_threshold_minutes,
            entertainment_sites: state.entertainment_sites().to_vec(),
        }
    }
}

fn running_label(running: bool) -> &'static str {
    if running { " (running)" } else { "" }
}

pub fn run<W: Write>(
    writer: &mut W,
    store: &SqliteStore,
    config: &Config,
    now: DateTime<Utc>,
    json: bool,
) -> Result<()> {
    let state = store.state().context("failed to read guard state")?;
    let report = StatusReport::new(&state, config, now);

    if json {
        serde_json::to_writer_pretty(&mut *writer, &report)?;
        writeln!(writer)?;
        return Ok(());
    }

    writeln!(writer, "Work guard status")?;
    writeln!(writer, "Database: {}", config.database_path.display())?;
    writeln!(
        writer,
        "Work URL: {}",
        report.target_url.as_deref().unwrap_or("(not set)")
    )?;

    let guard = match (report.guard_active, report.armed) {
        (false, _) => "off",
        (true, true) => "on",
        (true, false) => "on (not armed)",
    };
    writeln!(writer, "Guard: {guard}")?;

    match (&report.snooze_until, report.snooze_remaining_ms) {
        (Some(until), Some(remaining)) => writeln!(
            writer,
            "Snooze: until {until} ({} left)",
            format_duration_ms(remaining)
        )?,
        _ => writeln!(writer, "Snooze: off")?,
    }

    writeln!(
        writer,
        "Away: {}{}",
        format_duration_ms(report.away_ms),
        running_label(report.away_running)
    )?;
    writeln!(
        writer,
        "Focus: {} of {}m goal{}",
        format_duration_ms(report.focus_ms),
        report.goal_minutes,
        running_label(report.focus_running)
    )?;
    writeln!(
        writer,
        "Intervention: {} after {}m away",
        report.intervention, report.away_threshold_minutes
    )?;
    writeln!(
        writer,
        "Blocked sites: {}",
        report.entertainment_sites.join(", ")
    )?;

    Ok(())
}
