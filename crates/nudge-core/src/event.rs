//! Event vocabulary consumed and produced by the controller.
//!
//! Host callbacks arrive as [`HostEvent`]s, which mirror what a browser
//! reports (tab ids, window ids). The controller resolves them into the
//! closed set of [`GuardEvent`]s its decision procedure runs on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::InterventionMode;
use crate::types::{TabId, WindowId};

/// Named recurring alarms. At most one alarm exists per name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmName {
    /// Coarse liveness check: is a work tab still open?
    WorkTabCheck,
    /// Fine check of away time against the threshold.
    AwayCheck,
}

impl AlarmName {
    /// Host-facing alarm name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WorkTabCheck => "nudge-check-work-tab",
            Self::AwayCheck => "nudge-away-check",
        }
    }
}

impl fmt::Display for AlarmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AlarmName {
    type Err = UnknownAlarm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nudge-check-work-tab" => Ok(Self::WorkTabCheck),
            "nudge-away-check" => Ok(Self::AwayCheck),
            _ => Err(UnknownAlarm(s.to_string())),
        }
    }
}

/// Error type for alarm names this crate did not create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownAlarm(String);

impl fmt::Display for UnknownAlarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown alarm: {}", self.0)
    }
}

impl std::error::Error for UnknownAlarm {}

/// Raw callbacks from the browser host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    /// A tab became the active tab of its window.
    TabActivated { tab_id: TabId },
    /// A tab's URL changed, or it finished loading.
    TabUpdated {
        tab_id: TabId,
        /// New URL, present only when the URL itself changed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        /// The page finished loading.
        #[serde(default)]
        complete: bool,
    },
    /// Window focus moved. `None` means no browser window has focus.
    WindowFocusChanged {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window_id: Option<WindowId>,
    },
    /// A named alarm fired.
    AlarmFired { name: AlarmName },
}

/// The closed set of inputs to the decision procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardEvent {
    /// The user is now looking at `url` (`None` if the tab has no URL).
    TabFocusChanged { url: Option<String> },
    /// The browser lost focus to another application.
    WindowBlurred,
    /// A tab navigated to, or finished loading, `url`.
    TabNavigated { tab_id: TabId, url: String },
    /// A named alarm fired.
    AlarmFired { name: AlarmName },
    /// Periodic focus-timer and goal poll.
    FocusPoll,
    /// The state store reported a change.
    StateChanged,
}

/// Requests sent to the controller by injected overlays and panels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardMessage {
    /// Suppress interventions for a while.
    Snooze { minutes: u32 },
    /// Focus the work tab (or open one) and reset the away timer.
    OpenWorkTab,
    /// Show the goal celebration on the active tab.
    ShowCelebration {
        #[serde(rename = "goalMinutes")]
        goal_minutes: u32,
    },
}

/// Reply to a [`GuardMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReply {
    pub success: bool,
}

impl MessageReply {
    pub const OK: Self = Self { success: true };
    pub const FAILED: Self = Self { success: false };
}

/// Notices broadcast to local presentation surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuardNotice {
    /// The away threshold was crossed and an intervention ran.
    Intervened {
        mode: InterventionMode,
        away_ms: i64,
    },
    /// An entertainment site was blocked.
    SiteBlocked { hostname: String },
    /// A new-tab page was sent to the work URL.
    NewTabRedirected { tab_id: TabId },
    /// No work tab was open, so one was created.
    WorkTabOpened,
    /// The focus goal was reached and the guard switched itself off.
    GoalReached { goal_minutes: u32 },
}
