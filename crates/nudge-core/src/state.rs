//! The persisted guard record and its named operations.
//!
//! `GuardState` is the single source of truth shared by the controller and
//! every presentation surface. Fields are private: all mutation goes through
//! the operations below, applied inside `StateStore::update`, so each one is
//! a single atomic get-modify-set against the store.
//!
//! Every time-dependent operation takes `now` explicitly.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{self, normalize_site, normalize_target_url};
use crate::timer::{SegmentTimer, segment_duration_ms};
use crate::types::{MAX_GOAL_MINUTES, MAX_SNOOZE_MINUTES, ValidationError, check_minutes};

/// Storage key the record lives under.
pub const STATE_KEY: &str = "guard-state";

/// Goal applied to a fresh install.
pub const DEFAULT_GOAL_MINUTES: u32 = 60;

/// Entertainment sites seeded on first install.
pub const DEFAULT_ENTERTAINMENT_SITES: &[&str] = &[
    "youtube.com",
    "bilibili.com",
    "pornhub.com",
    "reddit.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "facebook.com",
    "tiktok.com",
    "twitch.tv",
    "netflix.com",
];

/// The single persisted guard record.
///
/// Serialized as camelCase JSON with epoch-millisecond timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardState {
    #[serde(rename = "targetUrl")]
    target_url: String,

    #[serde(rename = "isNaggerActive")]
    guard_active: bool,

    #[serde(rename = "isSnoozed")]
    snoozed: bool,

    #[serde(
        rename = "snoozeUntil",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    snooze_until: Option<DateTime<Utc>>,

    #[serde(rename = "entertainmentSites")]
    entertainment_sites: Vec<String>,

    #[serde(
        rename = "lastNonWorkFocusStart",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    away_started_at: Option<DateTime<Utc>>,

    #[serde(rename = "awayFromWorkDuration")]
    away_accumulated_ms: i64,

    #[serde(rename = "goalTimeMinutes")]
    goal_minutes: u32,

    #[serde(rename = "accumulatedFocusTime")]
    focus_accumulated_ms: i64,

    #[serde(
        rename = "lastWorkFocusStart",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    focus_started_at: Option<DateTime<Utc>>,
}

impl Default for GuardState {
    fn default() -> Self {
        Self {
            target_url: String::new(),
            guard_active: false,
            snoozed: false,
            snooze_until: None,
            entertainment_sites: DEFAULT_ENTERTAINMENT_SITES
                .iter()
                .map(|site| (*site).to_string())
                .collect(),
            away_started_at: None,
            away_accumulated_ms: 0,
            goal_minutes: DEFAULT_GOAL_MINUTES,
            focus_accumulated_ms: 0,
            focus_started_at: None,
        }
    }
}

impl GuardState {
    // ========== Accessors ==========

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    pub fn has_target(&self) -> bool {
        !self.target_url.is_empty()
    }

    pub const fn is_guard_active(&self) -> bool {
        self.guard_active
    }

    /// Raw snooze flag. Prefer [`Self::is_snoozed_at`], which honours expiry.
    pub const fn snooze_flag(&self) -> bool {
        self.snoozed
    }

    pub const fn snooze_until(&self) -> Option<DateTime<Utc>> {
        self.snooze_until
    }

    pub fn entertainment_sites(&self) -> &[String] {
        &self.entertainment_sites
    }

    pub const fn goal_minutes(&self) -> u32 {
        self.goal_minutes
    }

    pub fn goal_ms(&self) -> i64 {
        i64::from(self.goal_minutes) * 60_000
    }

    pub const fn away_started_at(&self) -> Option<DateTime<Utc>> {
        self.away_started_at
    }

    pub const fn away_accumulated_ms(&self) -> i64 {
        self.away_accumulated_ms
    }

    pub const fn focus_started_at(&self) -> Option<DateTime<Utc>> {
        self.focus_started_at
    }

    pub const fn focus_accumulated_ms(&self) -> i64 {
        self.focus_accumulated_ms
    }

    // ========== Guard lifecycle ==========

    /// Sets the work destination after validating it.
    pub fn set_target_url(&mut self, raw: &str) -> Result<(), ValidationError> {
        self.target_url = normalize_target_url(raw)?;
        Ok(())
    }

    /// Activates the guard with a fresh focus goal.
    ///
    /// Requires a target URL. Resets the focus timer, which is the only place
    /// focus time is cleared after a goal completes.
    pub fn start_guard(&mut self, goal_minutes: u32) -> Result<(), ValidationError> {
        if !self.has_target() {
            return Err(ValidationError::Empty {
                field: "target URL",
            });
        }
        self.goal_minutes = check_minutes("goal minutes", goal_minutes, MAX_GOAL_MINUTES)?;
        self.focus_timer().reset();
        self.guard_active = true;
        Ok(())
    }

    /// Deactivates the guard, pausing focus time and dropping away time.
    pub fn stop_guard(&mut self, now: DateTime<Utc>) {
        self.guard_active = false;
        self.away_timer().reset();
        self.focus_timer().pause(now);
    }

    /// Flips the guard, using `goal_minutes` when turning it on.
    ///
    /// Returns the new active flag.
    pub fn toggle_guard(
        &mut self,
        goal_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<bool, ValidationError> {
        if self.guard_active {
            self.stop_guard(now);
        } else {
            self.start_guard(goal_minutes)?;
        }
        Ok(self.guard_active)
    }

    pub fn set_goal_minutes(&mut self, minutes: u32) -> Result<(), ValidationError> {
        self.goal_minutes = check_minutes("goal minutes", minutes, MAX_GOAL_MINUTES)?;
        Ok(())
    }

    /// Guard is on, has somewhere to send the user, and is not snoozed.
    pub fn is_armed(&self, now: DateTime<Utc>) -> bool {
        self.guard_active && self.has_target() && !self.is_snoozed_at(now)
    }

    // ========== Snooze ==========

    /// Suppresses interventions for `minutes`, returning the deadline.
    pub fn snooze(
        &mut self,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, ValidationError> {
        let minutes = check_minutes("snooze minutes", minutes, MAX_SNOOZE_MINUTES)?;
        let until = now + Duration::minutes(i64::from(minutes));
        self.snoozed = true;
        self.snooze_until = Some(until);
        Ok(until)
    }

    pub fn clear_snooze(&mut self) {
        self.snoozed = false;
        self.snooze_until = None;
    }

    /// Effective snooze state: an expired deadline counts as not snoozed even
    /// before [`Self::reconcile_snooze`] clears it.
    pub fn is_snoozed_at(&self, now: DateTime<Utc>) -> bool {
        self.snoozed && self.snooze_until.is_some_and(|until| now < until)
    }

    /// Clears a snooze whose deadline has passed.
    ///
    /// Returns `true` when something was cleared. A flag without a deadline
    /// can never expire on its own and is cleared as well.
    pub fn reconcile_snooze(&mut self, now: DateTime<Utc>) -> bool {
        if !self.snoozed {
            return false;
        }
        match self.snooze_until {
            Some(until) if now < until => false,
            _ => {
                self.clear_snooze();
                true
            }
        }
    }

    // ========== Site classification ==========

    /// Adds a site to the blocklist after normalizing it.
    ///
    /// Returns `false` if the normalized site was already listed.
    pub fn add_entertainment_site(&mut self, raw: &str) -> Result<bool, ValidationError> {
        let site = normalize_site(raw);
        if site.is_empty() {
            return Err(ValidationError::Empty { field: "site" });
        }
        if self.entertainment_sites.contains(&site) {
            return Ok(false);
        }
        self.entertainment_sites.push(site);
        Ok(true)
    }

    /// Removes a site, matching on its normalized form.
    pub fn remove_entertainment_site(&mut self, raw: &str) -> bool {
        let site = normalize_site(raw);
        let before = self.entertainment_sites.len();
        self.entertainment_sites.retain(|listed| *listed != site);
        self.entertainment_sites.len() != before
    }

    /// True if `url` shares a root domain with the target. False without a target.
    pub fn is_on_target_domain(&self, url: &str) -> bool {
        self.has_target() && domain::same_root_domain(url, &self.target_url)
    }

    pub fn is_entertainment_url(&self, url: &str) -> bool {
        domain::is_entertainment_url(url, &self.entertainment_sites)
    }

    // ========== Timers ==========

    pub const fn away_timer(&mut self) -> SegmentTimer<'_> {
        SegmentTimer::new(&mut self.away_started_at, &mut self.away_accumulated_ms)
    }

    pub const fn focus_timer(&mut self) -> SegmentTimer<'_> {
        SegmentTimer::new(&mut self.focus_started_at, &mut self.focus_accumulated_ms)
    }

    /// Current away time: accumulated plus the running segment.
    pub fn away_duration_ms(&self, now: DateTime<Utc>) -> i64 {
        segment_duration_ms(self.away_started_at, self.away_accumulated_ms, now)
    }

    /// Current focus time: accumulated plus the running segment.
    pub fn focus_duration_ms(&self, now: DateTime<Utc>) -> i64 {
        segment_duration_ms(self.focus_started_at, self.focus_accumulated_ms, now)
    }

    pub fn goal_reached(&self, now: DateTime<Utc>) -> bool {
        self.focus_duration_ms(now) >= self.goal_ms()
    }

    /// Ends an active session whose goal has been reached.
    ///
    /// Deactivates the guard and pauses (does not reset) the focus timer.
    /// Returns `true` only on the call that performs the transition, so the
    /// celebration fires once per goal.
    pub fn complete_goal(&mut self, now: DateTime<Utc>) -> bool {
        if !self.guard_active || !self.goal_reached(now) {
            return false;
        }
        self.guard_active = false;
        self.focus_timer().pause(now);
        self.away_timer().reset();
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 14, 0, 0).unwrap()
    }

    fn active_state() -> GuardState {
        let mut state = GuardState::default();
        state.set_target_url("https://work.example.com").unwrap();
        state.start_guard(1).unwrap();
        state
    }

    #[test]
    fn default_record_matches_first_install() {
        let state = GuardState::default();
        assert!(!state.is_guard_active());
        assert!(!state.has_target());
        assert_eq!(state.goal_minutes(), 60);
        assert_eq!(state.entertainment_sites().len(), 11);
        assert!(state.entertainment_sites().iter().any(|s| s == "youtube.com"));
    }

    #[test]
    fn serializes_with_extension_field_names() {
        let mut state = GuardState::default();
        state.set_target_url("work.example.com").unwrap();
        state.snooze(5, t0()).unwrap();

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["targetUrl"], "https://work.example.com");
        assert_eq!(json["isSnoozed"], true);
        assert_eq!(
            json["snoozeUntil"],
            (t0() + Duration::minutes(5)).timestamp_millis()
        );
        assert_eq!(json["lastNonWorkFocusStart"], serde_json::Value::Null);
        assert_eq!(json["goalTimeMinutes"], 60);

        let parsed: GuardState = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let parsed: GuardState =
            serde_json::from_str(r#"{"targetUrl":"https://a.example.com"}"#).unwrap();
        assert_eq!(parsed.target_url(), "https://a.example.com");
        assert_eq!(parsed.goal_minutes(), DEFAULT_GOAL_MINUTES);
    }

    #[test]
    fn start_guard_requires_target() {
        let mut state = GuardState::default();
        assert_eq!(
            state.start_guard(30),
            Err(ValidationError::Empty {
                field: "target URL"
            })
        );
        assert!(!state.is_guard_active());
    }

    #[test]
    fn start_guard_resets_focus_time() {
        let mut state = active_state();
        state.focus_timer().start(t0());
        state.focus_timer().pause(t0() + Duration::minutes(10));
        state.stop_guard(t0() + Duration::minutes(10));
        assert_eq!(state.focus_accumulated_ms(), 600_000);

        state.start_guard(25).unwrap();
        assert_eq!(state.focus_duration_ms(t0() + Duration::hours(1)), 0);
        assert_eq!(state.goal_minutes(), 25);
    }

    #[test]
    fn toggle_guard_flips_state() {
        let mut state = active_state();
        assert!(!state.toggle_guard(30, t0()).unwrap());
        assert!(state.toggle_guard(30, t0()).unwrap());
        assert_eq!(state.goal_minutes(), 30);
    }

    #[test]
    fn snooze_sets_deadline() {
        let mut state = active_state();
        let until = state.snooze(5, t0()).unwrap();
        assert_eq!(until, t0() + Duration::milliseconds(300_000));
        assert!(state.is_snoozed_at(t0()));
        assert!(!state.is_armed(t0()));
    }

    #[test]
    fn snooze_rejects_zero_minutes() {
        let mut state = active_state();
        assert!(state.snooze(0, t0()).is_err());
        assert!(!state.snooze_flag());
    }

    #[test]
    fn expired_snooze_reads_as_not_snoozed_before_reconcile() {
        let mut state = active_state();
        state.snooze(5, t0()).unwrap();
        let later = t0() + Duration::minutes(5);
        assert!(state.snooze_flag());
        assert!(!state.is_snoozed_at(later));

        assert!(!state.reconcile_snooze(t0() + Duration::minutes(4)));
        assert!(state.reconcile_snooze(later));
        assert!(!state.snooze_flag());
        assert_eq!(state.snooze_until(), None);
        assert!(!state.reconcile_snooze(later));
    }

    #[test]
    fn sites_are_normalized_and_deduplicated() {
        let mut state = GuardState::default();
        assert_eq!(state.add_entertainment_site("https://www.Hulu.com/"), Ok(true));
        assert_eq!(state.add_entertainment_site("hulu.com"), Ok(false));
        assert_eq!(
            state.entertainment_sites().last().map(String::as_str),
            Some("hulu.com")
        );
        assert!(state.add_entertainment_site("   ").is_err());

        assert!(state.remove_entertainment_site("www.hulu.com"));
        assert!(!state.remove_entertainment_site("hulu.com"));
    }

    #[test]
    fn classifies_urls() {
        let state = active_state();
        assert!(state.is_on_target_domain("https://docs.example.com/page"));
        assert!(!state.is_on_target_domain("https://youtube.com"));
        assert!(state.is_entertainment_url("https://www.youtube.com/watch?v=1"));
        assert!(!state.is_entertainment_url("https://work.example.com"));

        let no_target = GuardState::default();
        assert!(!no_target.is_on_target_domain("https://example.com"));
    }

    #[test]
    fn complete_goal_fires_once() {
        let mut state = active_state();
        state.focus_timer().resume(t0());
        let at_goal = t0() + Duration::seconds(61);

        assert!(!state.complete_goal(t0() + Duration::seconds(30)));
        assert!(state.complete_goal(at_goal));
        assert!(!state.is_guard_active());
        assert!(!state.complete_goal(at_goal + Duration::seconds(5)));

        // Paused, not reset.
        assert_eq!(state.focus_accumulated_ms(), 61_000);
        assert_eq!(state.focus_started_at(), None);
    }

    #[test]
    fn stop_guard_resets_away_and_pauses_focus() {
        let mut state = active_state();
        state.away_timer().start(t0());
        state.stop_guard(t0() + Duration::minutes(2));
        assert_eq!(state.away_duration_ms(t0() + Duration::minutes(3)), 0);
        assert!(state.away_started_at().is_none());
    }
}
