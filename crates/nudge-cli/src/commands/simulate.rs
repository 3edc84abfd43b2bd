//! Simulate command: replay a scripted browsing session.
//!
//! The script is JSON lines, one step per line:
//!
//! ```text
//! {"at_secs": 0, "action": {"type": "open_tab", "url": "https://youtube.com"}}
//! {"at_secs": 90, "action": {"type": "send", "message": {"type": "SNOOZE", "minutes": 5}}}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped. The session starts
//! from the stored guard state but never writes back to it.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use nudge_core::sim::{BrowserAction, ScriptStep, Simulation, TimelineEntry};
use nudge_core::{GuardConfig, GuardMessage, GuardNotice, GuardState, Overlay};

use crate::commands::util::format_duration_ms;

/// Arguments for the simulate command.
#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Script of timed browser actions (JSON lines).
    pub script: PathBuf,

    /// Keep the clock running until this many seconds after the start.
    #[arg(long)]
    pub until: Option<u64>,

    /// Output the timeline as JSON lines.
    #[arg(long)]
    pub json: bool,
}

/// Parses a script, reporting the line of the first bad step.
pub fn parse_script(content: &str) -> Result<Vec<ScriptStep>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("invalid script step on line {}", index + 1))
        })
        .collect()
}

fn load_script(path: &Path) -> Result<Vec<ScriptStep>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_script(&content)
}

pub fn run<W: Write>(
    writer: &mut W,
    args: &SimulateArgs,
    state: GuardState,
    config: GuardConfig,
    start: DateTime<Utc>,
) -> Result<()> {
    let steps = load_script(&args.script)?;
    tracing::debug!(steps = steps.len(), "loaded simulation script");

    let rt = tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?;
    let (timeline, final_state, elapsed_secs, now) = rt.block_on(async {
        let mut sim = Simulation::new(state, config, start).await;
        sim.run_script(steps).await?;
        if let Some(until) = args.until {
            sim.advance_to(until).await?;
        }
        anyhow::Ok((
            sim.timeline().to_vec(),
            sim.store().snapshot(),
            sim.elapsed_secs(),
            sim.now(),
        ))
    })?;

    if args.json {
        for entry in &timeline {
            serde_json::to_writer(&mut *writer, entry)?;
            writeln!(writer)?;
        }
        return Ok(());
    }

    for entry in &timeline {
        let (at_secs, line) = describe(entry);
        writeln!(writer, "[{at_secs:>5}s] {line}")?;
    }
    writeln!(
        writer,
        "Finished after {}: guard {}, away {}, focus {}",
        format_duration_ms(i64::try_from(elapsed_secs).unwrap_or(i64::MAX).saturating_mul(1000)),
        if final_state.is_guard_active() { "on" } else { "off" },
        format_duration_ms(final_state.away_duration_ms(now)),
        format_duration_ms(final_state.focus_duration_ms(now)),
    )?;
    Ok(())
}

fn describe(entry: &TimelineEntry) -> (u64, String) {
    match entry {
        TimelineEntry::Browser { at_secs, action } => (*at_secs, describe_action(action)),
        TimelineEntry::Notice { at_secs, notice } => (*at_secs, describe_notice(notice)),
        TimelineEntry::Reply {
            at_secs,
            message,
            success,
        } => {
            let message = match message {
                GuardMessage::Snooze { minutes } => format!("snooze {minutes}m"),
                GuardMessage::OpenWorkTab => "open work tab".to_string(),
                GuardMessage::ShowCelebration { goal_minutes } => {
                    format!("show celebration ({goal_minutes}m)")
                }
            };
            let outcome = if *success { "ok" } else { "failed" };
            (*at_secs, format!("message: {message} -> {outcome}"))
        }
    }
}

fn describe_action(action: &BrowserAction) -> String {
    match action {
        BrowserAction::CreatedTab {
            tab_id,
            url,
            active,
        } => {
            let background = if *active { "" } else { " (background)" };
            format!("browser: opened tab {tab_id} at {url}{background}")
        }
        BrowserAction::ActivatedTab { tab_id } => format!("browser: activated tab {tab_id}"),
        BrowserAction::Navigated { tab_id, url } => {
            format!("browser: navigated tab {tab_id} to {url}")
        }
        BrowserAction::FocusedWindow { window_id } => {
            format!("browser: focused window {window_id}")
        }
        BrowserAction::Notified { title, message } => {
            format!("browser: notification \"{title}\": {message}")
        }
        BrowserAction::Injected { tab_id, overlay } => {
            let overlay = match overlay {
                Overlay::Countdown { seconds, .. } => format!("{seconds}s countdown"),
                Overlay::Blocked { hostname, .. } => format!("block page for {hostname}"),
                Overlay::Celebration { goal_minutes } => {
                    format!("celebration for {goal_minutes}m goal")
                }
            };
            format!("browser: showed {overlay} on tab {tab_id}")
        }
    }
}

fn describe_notice(notice: &GuardNotice) -> String {
    match notice {
        GuardNotice::Intervened { mode, away_ms } => {
            format!("guard: {mode} intervention after {} away", format_duration_ms(*away_ms))
        }
        GuardNotice::SiteBlocked { hostname } => format!("guard: blocked {hostname}"),
        GuardNotice::NewTabRedirected { tab_id } => {
            format!("guard: sent new tab {tab_id} to work")
        }
        GuardNotice::WorkTabOpened => "guard: opened a work tab".to_string(),
        GuardNotice::GoalReached { goal_minutes } => {
            format!("guard: {goal_minutes}m focus goal reached")
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    use insta::assert_snapshot;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    fn armed_state() -> GuardState {
        let mut state = GuardState::default();
        state.set_target_url("work.example.com").unwrap();
        state.start_guard(60).unwrap();
        state
    }

    #[test]
    fn parse_script_skips_comments_and_blank_lines() {
        let steps = parse_script(
            "# warm up\n\n{\"at_secs\": 0, \"action\": {\"type\": \"open_window\"}}\n",
        )
        .unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].at_secs, 0);
    }

    #[test]
    fn parse_script_reports_line_number() {
        let err = parse_script(
            "{\"at_secs\": 0, \"action\": {\"type\": \"blur\"}}\n{\"at_secs\": \"soon\"}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn simulate_reports_reminder_intervention() {
        let temp = tempfile::tempdir().unwrap();
        let script = temp.path().join("session.jsonl");
        std::fs::write(
            &script,
            "{\"at_secs\": 0, \"action\": {\"type\": \"open_tab\", \"url\": \"https://news.example.org\"}}\n",
        )
        .unwrap();

        let args = SimulateArgs {
            script,
            until: Some(120),
            json: false,
        };
        let config = GuardConfig {
            intervention: nudge_core::InterventionMode::Reminder,
            ..GuardConfig::default()
        };
        let mut output = Vec::new();
        run(&mut output, &args, armed_state(), config, t0()).unwrap();

        let output = String::from_utf8(output).unwrap();
        assert_snapshot!(output, @r#"
        [   60s] browser: notification "Back to work": You have been away from work.example.com. Time to get back to work.
        [   60s] browser: opened tab 2 at https://work.example.com
        [   60s] guard: reminder intervention after 1m 00s away
        Finished after 2m 00s: guard on, away 0s, focus 1m 00s
        "#);
    }

    #[test]
    fn simulate_json_output_is_one_entry_per_line() {
        let temp = tempfile::tempdir().unwrap();
        let script = temp.path().join("session.jsonl");
        std::fs::write(
            &script,
            "{\"at_secs\": 0, \"action\": {\"type\": \"send\", \"message\": {\"type\": \"SNOOZE\", \"minutes\": 5}}}\n",
        )
        .unwrap();

        let args = SimulateArgs {
            script,
            until: None,
            json: true,
        };
        let mut output = Vec::new();
        run(&mut output, &args, armed_state(), GuardConfig::default(), t0()).unwrap();

        let output = String::from_utf8(output).unwrap();
        let lines: Vec<serde_json::Value> = output
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["kind"], "reply");
        assert_eq!(lines[0]["success"], true);
    }

    #[test]
    fn simulate_rejects_out_of_order_steps() {
        let temp = tempfile::tempdir().unwrap();
        let script = temp.path().join("session.jsonl");
        std::fs::write(
            &script,
            "{\"at_secs\": 10, \"action\": {\"type\": \"blur\"}}\n{\"at_secs\": 5, \"action\": {\"type\": \"blur\"}}\n",
        )
        .unwrap();

        let args = SimulateArgs {
            script,
            until: None,
            json: false,
        };
        let mut output = Vec::new();
        let err = run(&mut output, &args, armed_state(), GuardConfig::default(), t0())
            .unwrap_err();
        assert!(err.to_string().contains("time order"), "{err}");
    }

    #[test]
    fn simulate_rejects_times_past_the_limit() {
        let temp = tempfile::tempdir().unwrap();
        let script = temp.path().join("session.jsonl");
        std::fs::write(
            &script,
            "{\"at_secs\": 18446744073709551615, \"action\": {\"type\": \"blur\"}}\n",
        )
        .unwrap();

        let mut args = SimulateArgs {
            script,
            until: None,
            json: false,
        };
        let mut output = Vec::new();
        let err = run(&mut output, &args, armed_state(), GuardConfig::default(), t0())
            .unwrap_err();
        assert!(err.to_string().contains("limit"), "{err}");

        std::fs::write(&args.script, "").unwrap();
        args.until = Some(u64::MAX);
        let err = run(&mut output, &args, armed_state(), GuardConfig::default(), t0())
            .unwrap_err();
        assert!(err.to_string().contains("limit"), "{err}");
        assert!(output.is_empty());
    }
}
