//! Snooze commands.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use nudge_store::SqliteStore;

use crate::commands::util::parse_minutes;

/// Suppresses interventions for the given duration.
///
/// Timers pause while snoozed. The controller does that on the snooze edge,
/// so the state here only records the deadline.
pub fn snooze<W: Write>(
    writer: &mut W,
    store: &SqliteStore,
    duration: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let minutes = parse_minutes(duration)?;
    let until = store
        .modify(|s| s.snooze(minutes, now))
        .context("failed to update guard state")?
        .context("cannot snooze")?;
    tracing::info!(minutes, %until, "snoozed");
    writeln!(
        writer,
        "Snoozed for {minutes}m (until {})",
        until.with_timezone(&Local).format("%H:%M")
    )?;
    Ok(())
}

/// Ends a snooze early.
pub fn unsnooze<W: Write>(writer: &mut W, store: &SqliteStore, now: DateTime<Utc>) -> Result<()> {
    let was_snoozed = store
        .modify(|s| {
            let was_snoozed = s.is_snoozed_at(now);
            s.clear_snooze();
            was_snoozed
        })
        .context("failed to update guard state")?;
    if was_snoozed {
        tracing::info!("snooze cleared");
        writeln!(writer, "Snooze cleared.")?;
    } else {
        writeln!(writer, "Not snoozed.")?;
    }
    Ok(())
}
