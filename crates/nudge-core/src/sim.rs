//! In-memory host doubles and a deterministic session driver.
//!
//! [`Simulation`] wires a [`GuardController`] to a [`MemoryStore`], a
//! [`SimBrowser`], a [`SimScheduler`] and a [`ManualClock`], then replays a
//! browsing session second by second: due alarms fire, the focus poll runs,
//! countdown overlays report back, and every host event the browser emits is
//! fed back into the controller.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::config::GuardConfig;
use crate::controller::GuardController;
use crate::domain::is_privileged_url;
use crate::event::{AlarmName, GuardEvent, GuardMessage, GuardNotice, HostEvent, MessageReply};
use crate::host::{
    AlarmSchedule, Browser, Clock, HostError, Overlay, Scheduler, StateStore, TabInfo,
};
use crate::state::GuardState;
use crate::types::{TabId, ValidationError, WindowId};

/// Upper bound on event rounds per pump; browser reactions can chain.
const MAX_PUMP_ROUNDS: usize = 32;

/// Longest session a simulation will step through (one week).
pub const MAX_SIM_SECS: u64 = 7 * 24 * 60 * 60;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ========== Clock ==========

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *lock(&self.now) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

// ========== Store ==========

/// `StateStore` over a shared in-memory record.
///
/// Updates that leave the record unchanged do not bump the revision.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<GuardState>>,
    revision: Arc<watch::Sender<u64>>,
}

impl MemoryStore {
    pub fn new(state: GuardState) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: Arc::new(Mutex::new(state)),
            revision: Arc::new(revision),
        }
    }

    /// Copy of the current record.
    pub fn snapshot(&self) -> GuardState {
        lock(&self.state).clone()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(GuardState::default())
    }
}

impl StateStore for MemoryStore {
    async fn load(&self) -> Result<GuardState, HostError> {
        Ok(self.snapshot())
    }

    async fn update<F, R>(&self, apply: F) -> Result<R, HostError>
    where
        F: FnOnce(&mut GuardState) -> R + Send,
        R: Send,
    {
        let (result, changed) = {
            let mut state = lock(&self.state);
            let before = state.clone();
            let result = apply(&mut state);
            (result, *state != before)
        };
        if changed {
            self.revision.send_modify(|revision| *revision += 1);
        }
        Ok(result)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }
}

// ========== Scheduler ==========

#[derive(Debug, Clone, Copy)]
struct SimAlarm {
    next_fire: DateTime<Utc>,
    period: Duration,
}

/// Alarm registry driven by a [`ManualClock`].
#[derive(Debug, Clone)]
pub struct SimScheduler {
    clock: ManualClock,
    alarms: Arc<Mutex<BTreeMap<AlarmName, SimAlarm>>>,
}

impl SimScheduler {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            alarms: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Names of all scheduled alarms.
    pub fn scheduled(&self) -> Vec<AlarmName> {
        lock(&self.alarms).keys().copied().collect()
    }

    pub fn is_scheduled(&self, name: AlarmName) -> bool {
        lock(&self.alarms).contains_key(&name)
    }

    pub fn next_fire(&self, name: AlarmName) -> Option<DateTime<Utc>> {
        lock(&self.alarms).get(&name).map(|alarm| alarm.next_fire)
    }

    /// Returns alarms due at `now` and schedules their next period.
    ///
    /// An alarm that missed several periods fires once.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<AlarmName> {
        let mut alarms = lock(&self.alarms);
        let mut due = Vec::new();
        for (name, alarm) in alarms.iter_mut() {
            if alarm.next_fire > now {
                continue;
            }
            due.push(*name);
            while alarm.next_fire <= now {
                alarm.next_fire += alarm.period;
            }
        }
        due
    }
}

impl Scheduler for SimScheduler {
    async fn exists(&self, name: AlarmName) -> Result<bool, HostError> {
        Ok(self.is_scheduled(name))
    }

    async fn create(&self, name: AlarmName, schedule: AlarmSchedule) -> Result<(), HostError> {
        let alarm = SimAlarm {
            next_fire: self.clock.now() + Duration::minutes(i64::from(schedule.delay_minutes)),
            period: Duration::minutes(i64::from(schedule.period_minutes.max(1))),
        };
        lock(&self.alarms).insert(name, alarm);
        Ok(())
    }

    async fn clear(&self, name: AlarmName) -> Result<(), HostError> {
        lock(&self.alarms).remove(&name);
        Ok(())
    }
}

// ========== Browser ==========

/// Something the controller asked the browser to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BrowserAction {
    CreatedTab {
        tab_id: TabId,
        url: String,
        active: bool,
    },
    ActivatedTab {
        tab_id: TabId,
    },
    Navigated {
        tab_id: TabId,
        url: String,
    },
    FocusedWindow {
        window_id: WindowId,
    },
    Notified {
        title: String,
        message: String,
    },
    Injected {
        tab_id: TabId,
        overlay: Overlay,
    },
}

#[derive(Debug, Clone)]
struct SimTab {
    id: TabId,
    window_id: WindowId,
    url: Option<String>,
}

#[derive(Debug)]
struct BrowserInner {
    tabs: Vec<SimTab>,
    windows: BTreeSet<WindowId>,
    active: BTreeMap<WindowId, TabId>,
    focused: Option<WindowId>,
    last_focused: WindowId,
    last_tab_id: u64,
    last_window_id: u64,
    deny_injection: bool,
    stale_active_tab: bool,
    events: Vec<HostEvent>,
    replies: Vec<(DateTime<Utc>, GuardMessage)>,
    actions: Vec<BrowserAction>,
}

impl BrowserInner {
    fn next_tab_id(&mut self) -> TabId {
        self.last_tab_id += 1;
        TabId::new(self.last_tab_id)
    }

    fn next_window_id(&mut self) -> WindowId {
        self.last_window_id += 1;
        WindowId::new(self.last_window_id)
    }

    fn find(&self, tab_id: TabId) -> Result<&SimTab, HostError> {
        self.tabs
            .iter()
            .find(|tab| tab.id == tab_id)
            .ok_or(HostError::TabGone(tab_id))
    }

    fn find_mut(&mut self, tab_id: TabId) -> Result<&mut SimTab, HostError> {
        self.tabs
            .iter_mut()
            .find(|tab| tab.id == tab_id)
            .ok_or(HostError::TabGone(tab_id))
    }

    fn info(&self, tab: &SimTab) -> TabInfo {
        TabInfo {
            id: tab.id,
            window_id: tab.window_id,
            url: tab.url.clone(),
            active: self.active.get(&tab.window_id) == Some(&tab.id),
        }
    }

    fn active_in(&self, window_id: WindowId) -> Option<TabInfo> {
        let tab_id = self.active.get(&window_id)?;
        self.find(*tab_id).ok().map(|tab| self.info(tab))
    }

    fn open(&mut self, window_id: WindowId, url: &str) -> TabId {
        let id = self.next_tab_id();
        self.tabs.push(SimTab {
            id,
            window_id,
            url: Some(url.to_string()),
        });
        id
    }

    fn activate(&mut self, tab_id: TabId) -> Result<(), HostError> {
        let window_id = self.find(tab_id)?.window_id;
        self.active.insert(window_id, tab_id);
        self.events.push(HostEvent::TabActivated { tab_id });
        Ok(())
    }

    fn focus(&mut self, window_id: WindowId) -> Result<(), HostError> {
        if !self.windows.contains(&window_id) {
            return Err(HostError::WindowGone(window_id));
        }
        self.focused = Some(window_id);
        self.last_focused = window_id;
        self.events.push(HostEvent::WindowFocusChanged {
            window_id: Some(window_id),
        });
        Ok(())
    }

    fn navigate(&mut self, tab_id: TabId, url: &str) -> Result<(), HostError> {
        self.find_mut(tab_id)?.url = Some(url.to_string());
        self.events.push(HostEvent::TabUpdated {
            tab_id,
            url: Some(url.to_string()),
            complete: true,
        });
        Ok(())
    }
}

/// Scriptable browser with tabs, windows and focus.
///
/// User-side methods (`open_tab`, `switch_to`, `blur`, ...) and
/// controller-side calls both queue the host events a real browser would
/// emit; drain them with [`SimBrowser::take_events`].
#[derive(Debug, Clone)]
pub struct SimBrowser {
    clock: ManualClock,
    inner: Arc<Mutex<BrowserInner>>,
}

impl SimBrowser {
    /// A browser with one focused, empty window.
    pub fn new(clock: ManualClock) -> Self {
        let first = WindowId::new(1);
        let inner = BrowserInner {
            tabs: Vec::new(),
            windows: BTreeSet::from([first]),
            active: BTreeMap::new(),
            focused: Some(first),
            last_focused: first,
            last_tab_id: 0,
            last_window_id: 1,
            deny_injection: false,
            stale_active_tab: false,
            events: Vec::new(),
            replies: Vec::new(),
            actions: Vec::new(),
        };
        Self {
            clock,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    // ----- user side -----

    /// Opens and activates a tab in the last focused window.
    pub fn open_tab(&self, url: &str) -> TabId {
        let mut inner = lock(&self.inner);
        let window_id = inner.last_focused;
        let tab_id = inner.open(window_id, url);
        inner.active.insert(window_id, tab_id);
        inner.events.push(HostEvent::TabActivated { tab_id });
        inner.events.push(HostEvent::TabUpdated {
            tab_id,
            url: Some(url.to_string()),
            complete: true,
        });
        tab_id
    }

    /// Opens a new window and focuses it.
    pub fn open_window(&self) -> WindowId {
        let mut inner = lock(&self.inner);
        let window_id = inner.next_window_id();
        inner.windows.insert(window_id);
        inner.focused = Some(window_id);
        inner.last_focused = window_id;
        inner.events.push(HostEvent::WindowFocusChanged {
            window_id: Some(window_id),
        });
        window_id
    }

    pub fn switch_to(&self, tab_id: TabId) -> Result<(), HostError> {
        let mut inner = lock(&self.inner);
        let window_id = inner.find(tab_id)?.window_id;
        if inner.focused != Some(window_id) {
            inner.focus(window_id)?;
        }
        inner.activate(tab_id)
    }

    pub fn navigate(&self, tab_id: TabId, url: &str) -> Result<(), HostError> {
        lock(&self.inner).navigate(tab_id, url)
    }

    /// Closes a tab; the last remaining tab of its window becomes active.
    pub fn close_tab(&self, tab_id: TabId) -> Result<(), HostError> {
        let mut inner = lock(&self.inner);
        let window_id = inner.find(tab_id)?.window_id;
        inner.tabs.retain(|tab| tab.id != tab_id);
        if inner.active.get(&window_id) == Some(&tab_id) {
            inner.active.remove(&window_id);
            let next = inner
                .tabs
                .iter()
                .rev()
                .find(|tab| tab.window_id == window_id)
                .map(|tab| tab.id);
            if let Some(next) = next {
                inner.activate(next)?;
            }
        }
        Ok(())
    }

    /// The user switched to another application.
    pub fn blur(&self) {
        let mut inner = lock(&self.inner);
        inner.focused = None;
        inner
            .events
            .push(HostEvent::WindowFocusChanged { window_id: None });
    }

    pub fn focus_window_now(&self, window_id: WindowId) -> Result<(), HostError> {
        lock(&self.inner).focus(window_id)
    }

    /// Makes every injection fail as on a locked-down page.
    pub fn set_deny_injection(&self, deny: bool) {
        lock(&self.inner).deny_injection = deny;
    }

    /// Makes active-tab queries fail as if the tab closed mid-query.
    pub fn set_stale_active_tab(&self, stale: bool) {
        lock(&self.inner).stale_active_tab = stale;
    }

    // ----- observation -----

    /// Drains queued host events.
    pub fn take_events(&self) -> Vec<HostEvent> {
        std::mem::take(&mut lock(&self.inner).events)
    }

    /// Drains overlay replies that are due at `now`.
    pub fn take_due_replies(&self, now: DateTime<Utc>) -> Vec<GuardMessage> {
        let mut inner = lock(&self.inner);
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.replies)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        inner.replies = pending;
        due.into_iter().map(|(_, message)| message).collect()
    }

    pub fn actions(&self) -> Vec<BrowserAction> {
        lock(&self.inner).actions.clone()
    }

    pub fn take_actions(&self) -> Vec<BrowserAction> {
        std::mem::take(&mut lock(&self.inner).actions)
    }

    /// URLs of all open tabs, in creation order.
    pub fn tab_urls(&self) -> Vec<Option<String>> {
        lock(&self.inner)
            .tabs
            .iter()
            .map(|tab| tab.url.clone())
            .collect()
    }

    pub fn active_tab_now(&self) -> Option<TabInfo> {
        let inner = lock(&self.inner);
        inner.active_in(inner.last_focused)
    }
}

impl Browser for SimBrowser {
    async fn active_tab(&self) -> Result<Option<TabInfo>, HostError> {
        let inner = lock(&self.inner);
        let active = inner.active_in(inner.last_focused);
        match active {
            Some(tab) if inner.stale_active_tab => Err(HostError::TabGone(tab.id)),
            active => Ok(active),
        }
    }

    async fn active_tab_in(&self, window_id: WindowId) -> Result<Option<TabInfo>, HostError> {
        let inner = lock(&self.inner);
        if !inner.windows.contains(&window_id) {
            return Err(HostError::WindowGone(window_id));
        }
        Ok(inner.active_in(window_id))
    }

    async fn tab(&self, tab_id: TabId) -> Result<TabInfo, HostError> {
        let inner = lock(&self.inner);
        let tab = inner.find(tab_id)?;
        Ok(inner.info(tab))
    }

    async fn tabs(&self) -> Result<Vec<TabInfo>, HostError> {
        let inner = lock(&self.inner);
        Ok(inner.tabs.iter().map(|tab| inner.info(tab)).collect())
    }

    async fn create_tab(&self, url: &str, active: bool) -> Result<TabId, HostError> {
        let mut inner = lock(&self.inner);
        let window_id = inner.last_focused;
        let tab_id = inner.open(window_id, url);
        inner.actions.push(BrowserAction::CreatedTab {
            tab_id,
            url: url.to_string(),
            active,
        });
        if active {
            inner.activate(tab_id)?;
        }
        inner.events.push(HostEvent::TabUpdated {
            tab_id,
            url: Some(url.to_string()),
            complete: true,
        });
        Ok(tab_id)
    }

    async fn activate_tab(&self, tab_id: TabId) -> Result<(), HostError> {
        let mut inner = lock(&self.inner);
        inner.activate(tab_id)?;
        inner.actions.push(BrowserAction::ActivatedTab { tab_id });
        Ok(())
    }

    async fn navigate_tab(&self, tab_id: TabId, url: &str) -> Result<(), HostError> {
        let mut inner = lock(&self.inner);
        inner.navigate(tab_id, url)?;
        inner.actions.push(BrowserAction::Navigated {
            tab_id,
            url: url.to_string(),
        });
        Ok(())
    }

    async fn focus_window(&self, window_id: WindowId) -> Result<(), HostError> {
        let mut inner = lock(&self.inner);
        inner.focus(window_id)?;
        inner.actions.push(BrowserAction::FocusedWindow { window_id });
        Ok(())
    }

    async fn notify(&self, title: &str, message: &str) -> Result<(), HostError> {
        lock(&self.inner).actions.push(BrowserAction::Notified {
            title: title.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    async fn inject(&self, tab_id: TabId, overlay: Overlay) -> Result<(), HostError> {
        let now = self.clock.now();
        let mut inner = lock(&self.inner);
        let tab = inner.find(tab_id)?;
        if inner.deny_injection || tab.url.as_deref().is_some_and(is_privileged_url) {
            return Err(HostError::InjectionDenied {
                tab_id,
                reason: "scripting not allowed on this page".to_string(),
            });
        }
        if let Overlay::Countdown { seconds, .. } = &overlay {
            let at = now + Duration::seconds(i64::from(*seconds));
            inner.replies.push((at, GuardMessage::OpenWorkTab));
        }
        inner
            .actions
            .push(BrowserAction::Injected { tab_id, overlay });
        Ok(())
    }
}

// ========== Session driver ==========

/// Errors from replaying a scripted action.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("script steps must be in time order (step at {at_secs}s after {current_secs}s)")]
    OutOfOrder { at_secs: u64, current_secs: u64 },

    #[error("simulated time {at_secs}s is past the {max_secs}s limit")]
    TooLong { at_secs: u64, max_secs: u64 },
}

/// One user action in a simulated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimAction {
    OpenTab { url: String },
    SwitchTab { tab: TabId },
    Navigate { tab: TabId, url: String },
    CloseTab { tab: TabId },
    OpenWindow,
    Blur,
    FocusWindow { window: WindowId },
    DenyInjection { deny: bool },
    SetTarget { url: String },
    Start {
        #[serde(default)]
        goal_minutes: Option<u32>,
    },
    Stop,
    Unsnooze,
    AddSite { site: String },
    Send { message: GuardMessage },
}

/// A timed line of a simulation script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptStep {
    pub at_secs: u64,
    pub action: SimAction,
}

/// What happened during a simulated session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineEntry {
    Browser {
        at_secs: u64,
        #[serde(flatten)]
        action: BrowserAction,
    },
    Notice {
        at_secs: u64,
        #[serde(flatten)]
        notice: GuardNotice,
    },
    Reply {
        at_secs: u64,
        message: GuardMessage,
        success: bool,
    },
}

type SimController = GuardController<MemoryStore, SimBrowser, SimScheduler, ManualClock>;

/// Deterministic replay of a browsing session against the controller.
pub struct Simulation {
    controller: SimController,
    store: MemoryStore,
    browser: SimBrowser,
    alarms: SimScheduler,
    clock: ManualClock,
    notices: broadcast::Receiver<GuardNotice>,
    started_at: DateTime<Utc>,
    timeline: Vec<TimelineEntry>,
}

impl Simulation {
    /// Builds the host doubles around `state` and starts the controller.
    pub async fn new(state: GuardState, config: GuardConfig, start: DateTime<Utc>) -> Self {
        let clock = ManualClock::new(start);
        let store = MemoryStore::new(state);
        let browser = SimBrowser::new(clock.clone());
        let alarms = SimScheduler::new(clock.clone());
        let mut controller = GuardController::new(
            store.clone(),
            browser.clone(),
            alarms.clone(),
            clock.clone(),
            config,
        );
        let notices = controller.subscribe_notices();
        if let Err(err) = controller.start().await {
            debug!(error = %err, "simulated controller failed to start");
        }
        Self {
            controller,
            store,
            browser,
            alarms,
            clock,
            notices,
            started_at: start,
            timeline: Vec::new(),
        }
    }

    pub const fn store(&self) -> &MemoryStore {
        &self.store
    }

    pub const fn browser(&self) -> &SimBrowser {
        &self.browser
    }

    pub const fn alarms(&self) -> &SimScheduler {
        &self.alarms
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whole seconds since the simulation started.
    pub fn elapsed_secs(&self) -> u64 {
        u64::try_from((self.clock.now() - self.started_at).num_seconds()).unwrap_or(0)
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    pub fn notices(&self) -> impl Iterator<Item = &GuardNotice> {
        self.timeline.iter().filter_map(|entry| match entry {
            TimelineEntry::Notice { notice, .. } => Some(notice),
            _ => None,
        })
    }

    /// Feeds queued browser events to the controller until none remain.
    pub async fn pump(&mut self) {
        for _ in 0..MAX_PUMP_ROUNDS {
            let events = self.browser.take_events();
            if events.is_empty() {
                break;
            }
            for event in events {
                self.controller.handle(event).await;
            }
        }
        self.record();
    }

    /// Advances time one second at a time, running overlay replies, due
    /// alarms and the focus poll at every step.
    pub async fn advance(&mut self, by: Duration) {
        let steps = by.num_seconds().max(0);
        for _ in 0..steps {
            self.clock.advance(Duration::seconds(1));
            let now = self.clock.now();

            for message in self.browser.take_due_replies(now) {
                self.send(message).await;
            }
            for name in self.alarms.take_due(now) {
                self.controller.handle(HostEvent::AlarmFired { name }).await;
                self.pump().await;
            }
            self.controller.dispatch(GuardEvent::FocusPoll).await;
            self.pump().await;
        }
    }

    /// Delivers a message as if an overlay or panel sent it.
    pub async fn send(&mut self, message: GuardMessage) -> MessageReply {
        let reply = self.controller.on_message(message.clone()).await;
        self.timeline.push(TimelineEntry::Reply {
            at_secs: self.elapsed_secs(),
            message,
            success: reply.success,
        });
        self.pump().await;
        reply
    }

    /// Applies a configuration-surface mutation, then lets the controller
    /// observe the change.
    pub async fn configure<F, R>(&mut self, apply: F) -> Result<R, SimError>
    where
        F: FnOnce(&mut GuardState) -> R + Send,
        R: Send,
    {
        let result = self.store.update(apply).await?;
        self.controller.dispatch(GuardEvent::StateChanged).await;
        self.pump().await;
        Ok(result)
    }

    /// Performs one scripted user action.
    pub async fn perform(&mut self, action: SimAction) -> Result<(), SimError> {
        let now = self.clock.now();
        match action {
            SimAction::OpenTab { url } => {
                self.browser.open_tab(&url);
            }
            SimAction::SwitchTab { tab } => self.browser.switch_to(tab)?,
            SimAction::Navigate { tab, url } => self.browser.navigate(tab, &url)?,
            SimAction::CloseTab { tab } => self.browser.close_tab(tab)?,
            SimAction::OpenWindow => {
                self.browser.open_window();
            }
            SimAction::Blur => self.browser.blur(),
            SimAction::FocusWindow { window } => self.browser.focus_window_now(window)?,
            SimAction::DenyInjection { deny } => self.browser.set_deny_injection(deny),
            SimAction::SetTarget { url } => {
                self.configure(move |s| s.set_target_url(&url)).await??;
            }
            SimAction::Start { goal_minutes } => {
                self.configure(move |s| {
                    let goal = goal_minutes.unwrap_or_else(|| s.goal_minutes());
                    s.start_guard(goal)
                })
                .await??;
            }
            SimAction::Stop => self.configure(move |s| s.stop_guard(now)).await?,
            SimAction::Unsnooze => self.configure(GuardState::clear_snooze).await?,
            SimAction::AddSite { site } => {
                self.configure(move |s| s.add_entertainment_site(&site))
                    .await??;
            }
            SimAction::Send { message } => {
                self.send(message).await;
            }
        }
        self.pump().await;
        Ok(())
    }

    /// Replays a script: advance to each step's time, then perform it.
    pub async fn run_script(&mut self, steps: Vec<ScriptStep>) -> Result<(), SimError> {
        for step in steps {
            let current_secs = self.elapsed_secs();
            if step.at_secs < current_secs {
                return Err(SimError::OutOfOrder {
                    at_secs: step.at_secs,
                    current_secs,
                });
            }
            self.advance_to(step.at_secs).await?;
            self.perform(step.action).await?;
        }
        Ok(())
    }

    /// Advances to `at_secs` after the start. Earlier times are a no-op.
    pub async fn advance_to(&mut self, at_secs: u64) -> Result<(), SimError> {
        let too_long = SimError::TooLong {
            at_secs,
            max_secs: MAX_SIM_SECS,
        };
        if at_secs > MAX_SIM_SECS {
            return Err(too_long);
        }
        let wait = at_secs.saturating_sub(self.elapsed_secs());
        let wait = i64::try_from(wait)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or(too_long)?;
        self.advance(wait).await;
        Ok(())
    }

    fn record(&mut self) {
        let at_secs = self.elapsed_secs();
        for action in self.browser.take_actions() {
            self.timeline.push(TimelineEntry::Browser { at_secs, action });
        }
        while let Ok(notice) = self.notices.try_recv() {
            self.timeline.push(TimelineEntry::Notice { at_secs, notice });
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn memory_store_bumps_revision_only_on_change() {
        let store = MemoryStore::default();
        let mut changes = store.subscribe();

        store.update(|s| s.clear_snooze()).await.unwrap();
        assert_eq!(store.revision(), 0);
        assert!(!changes.has_changed().unwrap());

        store.update(|s| s.set_goal_minutes(30)).await.unwrap().unwrap();
        assert_eq!(store.revision(), 1);
        assert!(changes.has_changed().unwrap());
        assert_eq!(store.snapshot().goal_minutes(), 30);
    }

    #[tokio::test]
    async fn scheduler_fires_on_period() {
        let clock = ManualClock::new(t0());
        let alarms = SimScheduler::new(clock.clone());
        alarms
            .create(AlarmName::AwayCheck, AlarmSchedule::every(1))
            .await
            .unwrap();

        assert!(alarms.take_due(t0() + Duration::seconds(59)).is_empty());
        assert_eq!(
            alarms.take_due(t0() + Duration::seconds(60)),
            vec![AlarmName::AwayCheck]
        );
        assert!(alarms.take_due(t0() + Duration::seconds(61)).is_empty());
        // Missed periods collapse into one fire.
        assert_eq!(alarms.take_due(t0() + Duration::minutes(5)).len(), 1);

        alarms.clear(AlarmName::AwayCheck).await.unwrap();
        assert!(alarms.scheduled().is_empty());
    }

    #[tokio::test]
    async fn browser_queues_host_events() {
        let browser = SimBrowser::new(ManualClock::new(t0()));
        let tab = browser.open_tab("https://youtube.com");
        let events = browser.take_events();
        assert_eq!(events[0], HostEvent::TabActivated { tab_id: tab });

        browser.blur();
        assert_eq!(
            browser.take_events(),
            vec![HostEvent::WindowFocusChanged { window_id: None }]
        );
        assert_eq!(
            browser.active_tab_now().and_then(|t| t.url).as_deref(),
            Some("https://youtube.com")
        );
    }

    #[tokio::test]
    async fn closed_tab_lookup_is_transient() {
        let browser = SimBrowser::new(ManualClock::new(t0()));
        let tab = browser.open_tab("https://a.example.com");
        browser.close_tab(tab).unwrap();
        let err = browser.tab(tab).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn privileged_pages_deny_injection() {
        let browser = SimBrowser::new(ManualClock::new(t0()));
        let tab = browser.open_tab("chrome://settings");
        let err = browser
            .inject(tab, Overlay::Celebration { goal_minutes: 5 })
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::InjectionDenied { .. }));
    }

    #[tokio::test]
    async fn advance_to_rejects_times_past_the_limit() {
        let mut sim = Simulation::new(GuardState::default(), GuardConfig::default(), t0()).await;
        sim.advance_to(30).await.unwrap();
        assert_eq!(sim.elapsed_secs(), 30);

        let err = sim.advance_to(MAX_SIM_SECS + 1).await.unwrap_err();
        assert!(matches!(err, SimError::TooLong { .. }));
        let err = sim.advance_to(u64::MAX).await.unwrap_err();
        assert!(matches!(err, SimError::TooLong { .. }));
        assert_eq!(sim.elapsed_secs(), 30);
    }

    #[test]
    fn script_steps_parse_from_json_lines() {
        let step: ScriptStep =
            serde_json::from_str(r#"{"at_secs":5,"action":{"type":"open_tab","url":"https://x.com"}}"#)
                .unwrap();
        assert_eq!(step.at_secs, 5);
        assert_eq!(
            step.action,
            SimAction::OpenTab {
                url: "https://x.com".into()
            }
        );

        let step: ScriptStep = serde_json::from_str(
            r#"{"at_secs":9,"action":{"type":"send","message":{"type":"SNOOZE","minutes":10}}}"#,
        )
        .unwrap();
        assert_eq!(
            step.action,
            SimAction::Send {
                message: GuardMessage::Snooze { minutes: 10 }
            }
        );
    }
}
