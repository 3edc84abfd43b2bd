//! Guard lifecycle commands: target, start, stop and goal.
//!
//! Each command is a single store mutation. The running controller picks the
//! change up through the store's subscription.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use nudge_store::SqliteStore;

use crate::commands::util::parse_minutes;

/// Sets the work URL.
pub fn target<W: Write>(writer: &mut W, store: &SqliteStore, url: &str) -> Result<()> {
    let normalized = store
        .modify(|s| {
            s.set_target_url(url)?;
            Ok::<_, nudge_core::ValidationError>(s.target_url().to_string())
        })
        .context("failed to update guard state")??;
    tracing::info!(target_url = %normalized, "work URL set");
    writeln!(writer, "Work URL set to {normalized}")?;
    Ok(())
}

/// Turns the guard on with a fresh focus session.
///
/// Without `--goal` the stored goal is kept.
pub fn start<W: Write>(writer: &mut W, store: &SqliteStore, goal: Option<&str>) -> Result<()> {
    let goal = goal.map(parse_minutes).transpose()?;
    let goal_minutes = store
        .modify(|s| {
            let minutes = goal.unwrap_or_else(|| s.goal_minutes());
            s.start_guard(minutes).map(|()| minutes)
        })
        .context("failed to update guard state")?
        .context("cannot start the guard")?;
    tracing::info!(goal_minutes, "guard started");
    writeln!(writer, "Guard on. Focus goal: {goal_minutes}m")?;
    Ok(())
}

/// Turns the guard off.
pub fn stop<W: Write>(writer: &mut W, store: &SqliteStore, now: DateTime<Utc>) -> Result<()> {
    let was_active = store
        .modify(|s| {
            let was_active = s.is_guard_active();
            s.stop_guard(now);
            was_active
        })
        .context("failed to update guard state")?;
    if was_active {
        tracing::info!("guard stopped");
        writeln!(writer, "Guard off.")?;
    } else {
        writeln!(writer, "Guard was already off.")?;
    }
    Ok(())
}

/// Sets the focus goal without touching the running session.
pub fn goal<W: Write>(writer: &mut W, store: &SqliteStore, duration: &str) -> Result<()> {
    let minutes = parse_minutes(duration)?;
    store
        .modify(|s| s.set_goal_minutes(minutes))
        .context("failed to update guard state")??;
    writeln!(writer, "Focus goal set to {minutes}m")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn output_of(f: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> String {
        let mut output = Vec::new();
        f(&mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn target_adds_https_scheme() {
        let store = SqliteStore::open_in_memory().unwrap();
        let output = output_of(|w| target(w, &store, "github.com/acme/app"));
        assert_eq!(output, "Work URL set to https://github.com/acme/app\n");
        assert_eq!(store.state().unwrap().target_url(), "https://github.com/acme/app");
    }

    #[test]
    fn target_rejects_invalid_url() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut output = Vec::new();
        assert!(target(&mut output, &store, "   ").is_err());
        assert!(!store.state().unwrap().has_target());
    }

    #[test]
    fn start_requires_target() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut output = Vec::new();
        let err = start(&mut output, &store, None).unwrap_err();
        assert!(format!("{err:#}").contains("target URL cannot be empty"));
        assert!(!store.state().unwrap().is_guard_active());
    }

    #[test]
    fn start_uses_stored_goal_unless_given() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .modify(|s| s.set_target_url("work.example.com"))
            .unwrap()
            .unwrap();

        let output = output_of(|w| start(w, &store, None));
        assert_eq!(output, "Guard on. Focus goal: 60m\n");

        let output = output_of(|w| start(w, &store, Some("1h30m")));
        assert_eq!(output, "Guard on. Focus goal: 90m\n");
        assert_eq!(store.state().unwrap().goal_minutes(), 90);
    }

    #[test]
    fn stop_reports_previous_state() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        store
            .modify(|s| {
                s.set_target_url("work.example.com")?;
                s.start_guard(30)
            })
            .unwrap()
            .unwrap();

        assert_eq!(output_of(|w| stop(w, &store, now)), "Guard off.\n");
        assert_eq!(
            output_of(|w| stop(w, &store, now)),
            "Guard was already off.\n"
        );
    }

    #[test]
    fn goal_validates_range() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(output_of(|w| goal(w, &store, "45m")), "Focus goal set to 45m\n");

        let mut output = Vec::new();
        assert!(goal(&mut output, &store, "0").is_err());
        assert!(goal(&mut output, &store, "25h").is_err());
        assert_eq!(store.state().unwrap().goal_minutes(), 45);
    }
}
