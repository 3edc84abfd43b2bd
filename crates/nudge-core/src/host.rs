//! Seams between the controller and the outside world.
//!
//! The controller never talks to a browser or a database directly. It is
//! generic over these traits so the same decision procedure runs against a
//! real extension host, the SQLite store, or the in-memory doubles in
//! [`crate::sim`].
//!
//! # Failure Model
//!
//! Every call here is a suspension point and may fail because the tab or
//! window went away in the meantime. Callers treat [`HostError::is_transient`]
//! failures as "nothing to do this time"; the next event retries naturally.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use crate::event::AlarmName;
use crate::state::GuardState;
use crate::types::{TabId, WindowId};

/// Errors reported by host collaborators.
#[derive(Debug, Error)]
pub enum HostError {
    /// The tab was closed before the call landed.
    #[error("tab {0} no longer exists")]
    TabGone(TabId),
    /// The window was closed before the call landed.
    #[error("window {0} no longer exists")]
    WindowGone(WindowId),
    /// The page refused script injection (privileged page, missing permission).
    #[error("script injection denied on tab {tab_id}: {reason}")]
    InjectionDenied { tab_id: TabId, reason: String },
    /// The state store failed.
    #[error("state store error: {0}")]
    Store(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The host surface is not available right now.
    #[error("host unavailable: {0}")]
    Unavailable(String),
}

impl HostError {
    /// Failures caused by the user closing things mid-operation.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TabGone(_) | Self::WindowGone(_) | Self::InjectionDenied { .. }
        )
    }
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Persistent home of the single [`GuardState`] record.
///
/// `update` applies its closure atomically: no other update can interleave
/// between the read and the write it performs. Change notifications carry no
/// diff; subscribers re-load the full record.
pub trait StateStore: Send + Sync {
    /// Returns the current record, creating the default one on first use.
    fn load(&self) -> impl Future<Output = Result<GuardState, HostError>> + Send;

    /// Applies `apply` to the record, persists it, and returns the closure's result.
    fn update<F, R>(&self, apply: F) -> impl Future<Output = Result<R, HostError>> + Send
    where
        F: FnOnce(&mut GuardState) -> R + Send,
        R: Send;

    /// Revision counter bumped after every successful update.
    fn subscribe(&self) -> watch::Receiver<u64>;
}

/// Delay and period of a recurring alarm, in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmSchedule {
    pub delay_minutes: u32,
    pub period_minutes: u32,
}

impl AlarmSchedule {
    /// First fire after one period, then every period.
    pub const fn every(minutes: u32) -> Self {
        Self {
            delay_minutes: minutes,
            period_minutes: minutes,
        }
    }
}

/// Named recurring timers.
pub trait Scheduler: Send + Sync {
    fn exists(&self, name: AlarmName) -> impl Future<Output = Result<bool, HostError>> + Send;

    /// Creates (or replaces) the alarm called `name`.
    fn create(
        &self,
        name: AlarmName,
        schedule: AlarmSchedule,
    ) -> impl Future<Output = Result<(), HostError>> + Send;

    /// Cancels the alarm. Clearing a missing alarm is not an error.
    fn clear(&self, name: AlarmName) -> impl Future<Output = Result<(), HostError>> + Send;
}

/// What the controller knows about a tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: TabId,
    pub window_id: WindowId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub active: bool,
}

/// UI the controller can inject into a page.
///
/// Arguments are plain data; the injected code reports back only through
/// [`crate::event::GuardMessage`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Overlay {
    /// Full-screen countdown that sends `OPEN_WORK_TAB` when it reaches zero.
    Countdown { seconds: u32, work_url: String },
    /// Blocking page for an entertainment site, with snooze buttons.
    Blocked {
        hostname: String,
        work_url: String,
        snooze_minutes: Vec<u32>,
    },
    /// Goal celebration.
    Celebration { goal_minutes: u32 },
}

/// Tab and window control surface.
pub trait Browser: Send + Sync {
    /// Active tab of the last focused window.
    fn active_tab(&self) -> impl Future<Output = Result<Option<TabInfo>, HostError>> + Send;

    /// Active tab of a specific window.
    fn active_tab_in(
        &self,
        window_id: WindowId,
    ) -> impl Future<Output = Result<Option<TabInfo>, HostError>> + Send;

    fn tab(&self, tab_id: TabId) -> impl Future<Output = Result<TabInfo, HostError>> + Send;

    /// All open tabs across windows.
    fn tabs(&self) -> impl Future<Output = Result<Vec<TabInfo>, HostError>> + Send;

    fn create_tab(
        &self,
        url: &str,
        active: bool,
    ) -> impl Future<Output = Result<TabId, HostError>> + Send;

    fn activate_tab(&self, tab_id: TabId) -> impl Future<Output = Result<(), HostError>> + Send;

    fn navigate_tab(
        &self,
        tab_id: TabId,
        url: &str,
    ) -> impl Future<Output = Result<(), HostError>> + Send;

    fn focus_window(
        &self,
        window_id: WindowId,
    ) -> impl Future<Output = Result<(), HostError>> + Send;

    /// Shows an OS-level notification.
    fn notify(
        &self,
        title: &str,
        message: &str,
    ) -> impl Future<Output = Result<(), HostError>> + Send;

    /// Runs overlay UI inside the page of `tab_id`.
    fn inject(
        &self,
        tab_id: TabId,
        overlay: Overlay,
    ) -> impl Future<Output = Result<(), HostError>> + Send;
}
