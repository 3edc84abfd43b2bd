//! Controller tuning knobs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What happens when the away threshold is crossed.
///
/// The two modes are behaviorally different and never mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterventionMode {
    /// Inject a countdown overlay into the active tab; when it reaches zero
    /// the overlay asks for the work tab and the away timer is reset then.
    /// Privileged pages and injection failures fall back to an immediate
    /// focus-or-create of the work tab.
    #[default]
    Countdown,
    /// Show an OS notification naming the work host, then focus or create
    /// the work tab and reset the away timer immediately.
    Reminder,
}

impl InterventionMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Countdown => "countdown",
            Self::Reminder => "reminder",
        }
    }
}

impl fmt::Display for InterventionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for InterventionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "countdown" => Ok(Self::Countdown),
            "reminder" => Ok(Self::Reminder),
            other => Err(format!("unknown intervention mode: {other}")),
        }
    }
}

/// Configuration for the intervention controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    /// Away time after which an intervention fires.
    /// Default: 60000 (1 minute).
    pub away_threshold_ms: i64,

    /// Intervention style at threshold.
    pub intervention: InterventionMode,

    /// Length of the countdown overlay.
    /// Default: 3.
    pub countdown_seconds: u32,

    /// Period of the work-tab liveness alarm.
    /// Default: 10.
    pub work_tab_check_minutes: u32,

    /// Period of the away-threshold alarm.
    /// Default: 1.
    pub away_check_minutes: u32,

    /// Snooze lengths offered on the blocking overlay.
    pub snooze_choices: Vec<u32>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            away_threshold_ms: 60_000, // 1 minute
            intervention: InterventionMode::Countdown,
            countdown_seconds: 3,
            work_tab_check_minutes: 10,
            away_check_minutes: 1,
            snooze_choices: vec![5, 10, 15],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intervention_mode_parses_and_displays() {
        assert_eq!(
            "reminder".parse::<InterventionMode>(),
            Ok(InterventionMode::Reminder)
        );
        assert_eq!(InterventionMode::Countdown.to_string(), "countdown");
        assert!("popup".parse::<InterventionMode>().is_err());
    }

    #[test]
    fn intervention_mode_serde_is_lowercase() {
        let json = serde_json::to_string(&InterventionMode::Reminder).unwrap();
        assert_eq!(json, "\"reminder\"");
    }
}
