//! The intervention controller.
//!
//! `GuardController` correlates tab, window, alarm and store events into
//! timer transitions and interventions. It owns no persistent state: every
//! mutation is a single closure applied through [`StateStore::update`].
//! The only private state is the last observed `(active, snoozed)` edge
//! snapshot and whether a browser window currently has focus.
//!
//! Handlers never propagate errors to the host. Failures are logged and the
//! next event retries naturally.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{GuardConfig, InterventionMode};
use crate::domain::{self, hostname_of, is_new_tab_page, is_privileged_url, is_sign_in_url};
use crate::event::{AlarmName, GuardEvent, GuardMessage, GuardNotice, HostEvent, MessageReply};
use crate::host::{
    AlarmSchedule, Browser, Clock, HostError, Overlay, Scheduler, StateStore, TabInfo,
};
use crate::state::GuardState;
use crate::types::TabId;

/// How often the focus timer and goal are polled while running as an actor.
pub const FOCUS_POLL_INTERVAL: Duration = Duration::from_secs(1);

const NOTICE_CAPACITY: usize = 64;

/// Edge-relevant view of the state, diffed on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EdgeSnapshot {
    active: bool,
    snoozed: bool,
}

impl EdgeSnapshot {
    fn of(state: &GuardState, now: DateTime<Utc>) -> Self {
        Self {
            active: state.is_guard_active() && state.has_target(),
            snoozed: state.is_snoozed_at(now),
        }
    }
}

/// How a drift away from work moved the away timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AwayTransition {
    Started,
    Resumed,
}

fn log_failure(context: &str, err: &HostError) {
    if err.is_transient() {
        debug!(error = %err, "{context}: target went away, skipping");
    } else {
        warn!(error = %err, "{context} failed");
    }
}

/// Input accepted by [`GuardController::run`].
#[derive(Debug)]
pub enum ControllerInput {
    Host(HostEvent),
    Guard(GuardEvent),
    Message {
        message: GuardMessage,
        reply: oneshot::Sender<MessageReply>,
    },
}

/// Cloneable sender side of a running controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    inbox: mpsc::Sender<ControllerInput>,
}

impl ControllerHandle {
    /// Creates a handle and the inbox to pass to [`GuardController::run`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ControllerInput>) {
        let (inbox, receiver) = mpsc::channel(capacity);
        (Self { inbox }, receiver)
    }

    pub async fn send(&self, event: HostEvent) -> Result<(), HostError> {
        self.push(ControllerInput::Host(event)).await
    }

    pub async fn send_guard(&self, event: GuardEvent) -> Result<(), HostError> {
        self.push(ControllerInput::Guard(event)).await
    }

    /// Sends a message and waits for the controller's reply.
    pub async fn request(&self, message: GuardMessage) -> Result<MessageReply, HostError> {
        let (reply, response) = oneshot::channel();
        self.push(ControllerInput::Message { message, reply }).await?;
        response
            .await
            .map_err(|_| HostError::Unavailable("controller dropped the request".to_string()))
    }

    async fn push(&self, input: ControllerInput) -> Result<(), HostError> {
        self.inbox
            .send(input)
            .await
            .map_err(|_| HostError::Unavailable("controller is not running".to_string()))
    }
}

/// Reactive controller keeping timers and interventions consistent.
pub struct GuardController<S, B, A, C> {
    store: S,
    browser: B,
    alarms: A,
    clock: C,
    config: GuardConfig,
    last_seen: Option<EdgeSnapshot>,
    window_focused: bool,
    notices: broadcast::Sender<GuardNotice>,
}

impl<S, B, A, C> GuardController<S, B, A, C>
where
    S: StateStore,
    B: Browser,
    A: Scheduler,
    C: Clock,
{
    pub fn new(store: S, browser: B, alarms: A, clock: C, config: GuardConfig) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            store,
            browser,
            alarms,
            clock,
            config,
            last_seen: None,
            window_focused: true,
            notices,
        }
    }

    pub const fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub const fn browser(&self) -> &B {
        &self.browser
    }

    pub const fn alarms(&self) -> &A {
        &self.alarms
    }

    /// Subscribes to local notices (interventions, blocks, goal completion).
    pub fn subscribe_notices(&self) -> broadcast::Receiver<GuardNotice> {
        self.notices.subscribe()
    }

    /// Syncs alarms with the stored state and seeds the edge snapshot.
    pub async fn start(&mut self) -> Result<(), HostError> {
        let now = self.clock.now();
        let state = self.store.load().await?;
        let snapshot = EdgeSnapshot::of(&state, now);

        if snapshot.active {
            self.ensure_alarm(AlarmName::WorkTabCheck, self.config.work_tab_check_minutes)
                .await?;
        } else {
            self.alarms.clear(AlarmName::WorkTabCheck).await?;
        }
        if !snapshot.active || snapshot.snoozed {
            self.alarms.clear(AlarmName::AwayCheck).await?;
        }

        self.last_seen = Some(snapshot);
        info!(
            active = snapshot.active,
            snoozed = snapshot.snoozed,
            "controller started"
        );
        Ok(())
    }

    /// Resolves a raw host callback and dispatches the resulting events.
    pub async fn handle(&mut self, event: HostEvent) {
        match self.resolve(event).await {
            Ok(events) => {
                for event in events {
                    self.dispatch(event).await;
                }
            }
            Err(err) => log_failure("resolving host event", &err),
        }
    }

    /// Runs one event through the decision procedure, then reacts to any
    /// state edges it (or anyone else) produced.
    pub async fn dispatch(&mut self, event: GuardEvent) {
        debug!(?event, "dispatching");
        if let Err(err) = self.apply(event).await {
            log_failure("handling event", &err);
        }
        if let Err(err) = self.observe_edges().await {
            log_failure("reacting to state change", &err);
        }
    }

    /// Answers a request from an overlay or panel.
    pub async fn on_message(&mut self, message: GuardMessage) -> MessageReply {
        let reply = match message {
            GuardMessage::Snooze { minutes } => self.request_snooze(minutes).await,
            GuardMessage::OpenWorkTab => match self.open_work_tab().await {
                Ok(()) => MessageReply::OK,
                Err(err) => {
                    log_failure("opening work tab", &err);
                    MessageReply::FAILED
                }
            },
            GuardMessage::ShowCelebration { goal_minutes } => {
                match self.show_celebration(goal_minutes).await {
                    Ok(shown) => MessageReply { success: shown },
                    Err(err) => {
                        log_failure("showing celebration", &err);
                        MessageReply::FAILED
                    }
                }
            }
        };
        if let Err(err) = self.observe_edges().await {
            log_failure("reacting to state change", &err);
        }
        reply
    }

    /// Runs the controller as an actor until the inbox closes.
    ///
    /// Store changes become [`GuardEvent::StateChanged`] and a
    /// [`FOCUS_POLL_INTERVAL`] ticker drives [`GuardEvent::FocusPoll`].
    pub async fn run(mut self, mut inbox: mpsc::Receiver<ControllerInput>) {
        if let Err(err) = self.start().await {
            log_failure("starting controller", &err);
        }

        let mut changes = self.store.subscribe();
        let mut poll = tokio::time::interval(FOCUS_POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                input = inbox.recv() => match input {
                    Some(input) => self.accept(input).await,
                    None => break,
                },
                Ok(()) = changes.changed() => self.dispatch(GuardEvent::StateChanged).await,
                _ = poll.tick() => self.dispatch(GuardEvent::FocusPoll).await,
            }
        }
        info!("controller stopped");
    }

    async fn accept(&mut self, input: ControllerInput) {
        match input {
            ControllerInput::Host(event) => self.handle(event).await,
            ControllerInput::Guard(event) => self.dispatch(event).await,
            ControllerInput::Message { message, reply } => {
                let answer = self.on_message(message).await;
                if reply.send(answer).is_err() {
                    debug!("message sender went away before the reply");
                }
            }
        }
    }

    // ========== Event resolution ==========

    async fn resolve(&mut self, event: HostEvent) -> Result<Vec<GuardEvent>, HostError> {
        let events = match event {
            HostEvent::TabActivated { tab_id } => {
                let tab = self.browser.tab(tab_id).await?;
                vec![GuardEvent::TabFocusChanged { url: tab.url }]
            }
            HostEvent::TabUpdated {
                tab_id,
                url,
                complete,
            } => {
                let tab = self.browser.tab(tab_id).await?;
                let mut events = Vec::with_capacity(2);
                if url.is_some() && tab.active {
                    events.push(GuardEvent::TabFocusChanged {
                        url: tab.url.clone(),
                    });
                }
                let navigated = url.or_else(|| if complete { tab.url } else { None });
                if let Some(url) = navigated {
                    events.push(GuardEvent::TabNavigated { tab_id, url });
                }
                events
            }
            HostEvent::WindowFocusChanged { window_id: None } => vec![GuardEvent::WindowBlurred],
            HostEvent::WindowFocusChanged {
                window_id: Some(window_id),
            } => match self.browser.active_tab_in(window_id).await? {
                Some(TabInfo { url: Some(url), .. }) => {
                    vec![GuardEvent::TabFocusChanged { url: Some(url) }]
                }
                _ => {
                    self.window_focused = true;
                    Vec::new()
                }
            },
            HostEvent::AlarmFired { name } => vec![GuardEvent::AlarmFired { name }],
        };
        Ok(events)
    }

    async fn apply(&mut self, event: GuardEvent) -> Result<(), HostError> {
        match event {
            GuardEvent::TabFocusChanged { url } => {
                self.window_focused = true;
                self.evaluate_focus(url).await
            }
            GuardEvent::WindowBlurred => self.on_window_blurred().await,
            GuardEvent::TabNavigated { tab_id, url } => self.on_tab_navigated(tab_id, &url).await,
            GuardEvent::AlarmFired {
                name: AlarmName::AwayCheck,
            } => self.on_away_check().await,
            GuardEvent::AlarmFired {
                name: AlarmName::WorkTabCheck,
            } => self.on_work_tab_check().await,
            GuardEvent::FocusPoll => self.on_focus_poll().await,
            // Edges are observed after every dispatch.
            GuardEvent::StateChanged => Ok(()),
        }
    }

    // ========== Away timer ==========

    /// Tab-focus decision procedure.
    async fn evaluate_focus(&self, url: Option<String>) -> Result<(), HostError> {
        let now = self.clock.now();
        let state = self.store.load().await?;

        if !state.is_guard_active() || !state.has_target() {
            self.store.update(|s| s.away_timer().reset()).await?;
            return self.alarms.clear(AlarmName::AwayCheck).await;
        }

        if state.is_snoozed_at(now) {
            self.store
                .update(move |s| {
                    s.away_timer().pause(now);
                })
                .await?;
            return self.alarms.clear(AlarmName::AwayCheck).await;
        }

        let on_work = url
            .as_deref()
            .is_some_and(|url| state.is_on_target_domain(url));
        if on_work {
            self.store.update(|s| s.away_timer().reset()).await?;
            self.alarms.clear(AlarmName::AwayCheck).await?;
            debug!(url = ?url, "on work site, away timer reset");
            return Ok(());
        }

        let transition = self
            .store
            .update(move |s| {
                s.focus_timer().pause(now);
                let mut away = s.away_timer();
                if away.is_running() {
                    None
                } else if away.accumulated_ms() > 0 {
                    away.resume(now);
                    Some(AwayTransition::Resumed)
                } else {
                    away.start(now);
                    Some(AwayTransition::Started)
                }
            })
            .await?;
        if let Some(transition) = transition {
            debug!(url = ?url, ?transition, "away timer");
        }

        self.ensure_alarm(AlarmName::AwayCheck, self.config.away_check_minutes)
            .await
    }

    async fn on_window_blurred(&mut self) -> Result<(), HostError> {
        self.window_focused = false;
        let now = self.clock.now();
        self.store
            .update(move |s| {
                s.away_timer().pause(now);
                s.focus_timer().pause(now);
            })
            .await?;
        debug!("browser lost focus, timers paused");
        Ok(())
    }

    async fn on_away_check(&self) -> Result<(), HostError> {
        let now = self.clock.now();
        let state = self.reconciled_state(now).await?;
        if !state.is_armed(now) {
            debug!("away check skipped, guard not armed");
            return Ok(());
        }

        let away_ms = state.away_duration_ms(now);
        debug!(
            away_ms,
            threshold_ms = self.config.away_threshold_ms,
            "away check"
        );
        if away_ms >= self.config.away_threshold_ms {
            self.intervene(state.target_url().to_string(), away_ms)
                .await?;
        }
        Ok(())
    }

    // ========== Interventions ==========

    async fn intervene(&self, target_url: String, away_ms: i64) -> Result<(), HostError> {
        let mode = self.config.intervention;
        info!(%mode, away_ms, "away threshold crossed");

        match mode {
            InterventionMode::Reminder => {
                let host = hostname_of(&target_url).unwrap_or_else(|| target_url.clone());
                let message = format!("You have been away from {host}. Time to get back to work.");
                if let Err(err) = self.browser.notify("Back to work", &message).await {
                    log_failure("showing reminder notification", &err);
                }
                self.return_to_work(target_url).await?;
            }
            InterventionMode::Countdown => {
                if !self.inject_countdown(&target_url).await? {
                    self.return_to_work(target_url).await?;
                }
            }
        }

        self.publish(GuardNotice::Intervened { mode, away_ms });
        Ok(())
    }

    /// Injects the countdown into the active tab. `Ok(false)` means the
    /// caller must fall back to focusing the work tab directly.
    async fn inject_countdown(&self, work_url: &str) -> Result<bool, HostError> {
        let tab = match self.browser.active_tab().await {
            Ok(Some(tab)) => tab,
            Ok(None) => return Ok(false),
            Err(err) if err.is_transient() => return Ok(false),
            Err(err) => return Err(err),
        };
        if tab.url.as_deref().is_some_and(is_privileged_url) {
            debug!(tab_id = %tab.id, "active tab is privileged, skipping countdown");
            return Ok(false);
        }

        let overlay = Overlay::Countdown {
            seconds: self.config.countdown_seconds,
            work_url: work_url.to_string(),
        };
        match self.browser.inject(tab.id, overlay).await {
            Ok(()) => {
                info!(tab_id = %tab.id, "countdown overlay injected");
                Ok(true)
            }
            Err(err) => {
                log_failure("injecting countdown", &err);
                Ok(false)
            }
        }
    }

    /// Focuses or creates the work tab, then resets the away timer.
    async fn return_to_work(&self, target_url: String) -> Result<(), HostError> {
        self.focus_or_create(&target_url).await?;
        self.store.update(|s| s.away_timer().reset()).await?;
        self.alarms.clear(AlarmName::AwayCheck).await?;
        debug!("away timer reset after returning to work");
        Ok(())
    }

    async fn focus_or_create(&self, target_url: &str) -> Result<(), HostError> {
        let tabs = self.browser.tabs().await?;
        let existing = tabs.into_iter().find(|tab| {
            tab.url
                .as_deref()
                .is_some_and(|url| domain::same_root_domain(url, target_url))
        });

        if let Some(tab) = existing {
            self.browser.activate_tab(tab.id).await?;
            self.browser.focus_window(tab.window_id).await?;
            info!(tab_id = %tab.id, "focused existing work tab");
        } else {
            let tab_id = self.browser.create_tab(target_url, true).await?;
            info!(%tab_id, "created work tab");
        }
        Ok(())
    }

    async fn open_work_tab(&self) -> Result<(), HostError> {
        let state = self.store.load().await?;
        if state.has_target() {
            self.focus_or_create(state.target_url()).await?;
        }
        self.store.update(|s| s.away_timer().reset()).await?;
        self.alarms.clear(AlarmName::AwayCheck).await
    }

    async fn show_celebration(&self, goal_minutes: u32) -> Result<bool, HostError> {
        let Some(tab) = self.browser.active_tab().await? else {
            return Ok(false);
        };
        if tab.url.as_deref().is_some_and(is_privileged_url) {
            return Ok(false);
        }
        self.browser
            .inject(tab.id, Overlay::Celebration { goal_minutes })
            .await?;
        Ok(true)
    }

    // ========== Navigation ==========

    async fn on_tab_navigated(&self, tab_id: TabId, url: &str) -> Result<(), HostError> {
        if is_sign_in_url(url) {
            debug!(url, "sign-in page, leaving alone");
            return Ok(());
        }

        let now = self.clock.now();
        let state = self.store.load().await?;
        if !state.is_armed(now) {
            return Ok(());
        }

        if is_new_tab_page(url) {
            self.browser
                .navigate_tab(tab_id, state.target_url())
                .await?;
            info!(%tab_id, "redirected new tab to work");
            self.publish(GuardNotice::NewTabRedirected { tab_id });
            return Ok(());
        }

        if !state.is_entertainment_url(url) {
            return Ok(());
        }

        let hostname = hostname_of(url).unwrap_or_else(|| url.to_string());
        let overlay = Overlay::Blocked {
            hostname: hostname.clone(),
            work_url: state.target_url().to_string(),
            snooze_minutes: self.config.snooze_choices.clone(),
        };
        match self.browser.inject(tab_id, overlay).await {
            Ok(()) => {
                info!(%tab_id, %hostname, "blocked entertainment site");
                self.publish(GuardNotice::SiteBlocked { hostname });
            }
            Err(err) => log_failure("injecting blocking overlay", &err),
        }
        Ok(())
    }

    // ========== Alarms ==========

    async fn on_work_tab_check(&self) -> Result<(), HostError> {
        let now = self.clock.now();
        let state = self.store.load().await?;
        if !state.is_guard_active() {
            debug!("work tab check skipped, guard inactive");
            return Ok(());
        }

        let state = self.reconciled_state(now).await?;
        if state.is_snoozed_at(now) || !state.has_target() {
            debug!("work tab check skipped");
            return Ok(());
        }

        if self.has_work_tab(state.target_url()).await? {
            debug!("work tab exists");
            return Ok(());
        }

        let tab_id = self.browser.create_tab(state.target_url(), true).await?;
        info!(%tab_id, "no work tab open, opened one");
        self.publish(GuardNotice::WorkTabOpened);
        Ok(())
    }

    /// An unparseable target counts as "exists" so no duplicate tabs open.
    async fn has_work_tab(&self, target_url: &str) -> Result<bool, HostError> {
        if hostname_of(target_url).is_none() {
            return Ok(true);
        }
        let tabs = self.browser.tabs().await?;
        Ok(tabs.iter().any(|tab| {
            tab.url
                .as_deref()
                .is_some_and(|url| domain::same_root_domain(url, target_url))
        }))
    }

    async fn ensure_alarm(&self, name: AlarmName, minutes: u32) -> Result<(), HostError> {
        if self.alarms.exists(name).await? {
            return Ok(());
        }
        self.alarms.create(name, AlarmSchedule::every(minutes)).await?;
        debug!(%name, minutes, "alarm created");
        Ok(())
    }

    // ========== Focus timer ==========

    async fn on_focus_poll(&self) -> Result<(), HostError> {
        let now = self.clock.now();
        let state = self.reconciled_state(now).await?;

        let on_work = if state.is_armed(now) && self.window_focused {
            match self.browser.active_tab().await {
                Ok(tab) => tab
                    .and_then(|tab| tab.url)
                    .is_some_and(|url| state.is_on_target_domain(&url)),
                Err(err) if err.is_transient() => {
                    log_failure("reading active tab for focus poll", &err);
                    false
                }
                Err(err) => return Err(err),
            }
        } else {
            false
        };

        let completed = self
            .store
            .update(move |s| {
                if on_work {
                    s.focus_timer().resume(now);
                } else {
                    s.focus_timer().pause(now);
                }
                s.complete_goal(now).then(|| s.goal_minutes())
            })
            .await?;

        if let Some(goal_minutes) = completed {
            info!(goal_minutes, "focus goal reached, guard deactivated");
            self.publish(GuardNotice::GoalReached { goal_minutes });
            match self.show_celebration(goal_minutes).await {
                Ok(true) => {}
                Ok(false) => debug!("no injectable tab for celebration"),
                Err(err) => log_failure("showing celebration", &err),
            }
        }
        Ok(())
    }

    // ========== Snooze & edges ==========

    async fn request_snooze(&self, minutes: u32) -> MessageReply {
        let now = self.clock.now();
        match self.store.update(move |s| s.snooze(minutes, now)).await {
            Ok(Ok(until)) => {
                info!(minutes, %until, "snoozed");
                MessageReply::OK
            }
            Ok(Err(invalid)) => {
                warn!(error = %invalid, "rejected snooze request");
                MessageReply::FAILED
            }
            Err(err) => {
                log_failure("snoozing", &err);
                MessageReply::FAILED
            }
        }
    }

    /// Loads the state, clearing an expired snooze first if there is one.
    async fn reconciled_state(&self, now: DateTime<Utc>) -> Result<GuardState, HostError> {
        let state = self.store.load().await?;
        if state.snooze_flag() && !state.is_snoozed_at(now) {
            return self
                .store
                .update(move |s| {
                    s.reconcile_snooze(now);
                    s.clone()
                })
                .await;
        }
        Ok(state)
    }

    /// Re-runs the focus decision for the active tab. Timers stay paused
    /// while no browser window has focus.
    async fn reevaluate_active_tab(&self) -> Result<(), HostError> {
        if !self.window_focused {
            debug!("browser not focused, leaving timers paused");
            return Ok(());
        }
        let url = self.browser.active_tab().await?.and_then(|tab| tab.url);
        if url.is_some() {
            self.evaluate_focus(url).await?;
        }
        Ok(())
    }

    /// Diffs the stored state against the last seen snapshot and reacts to
    /// guard activation, deactivation, snooze start and snooze end.
    async fn observe_edges(&mut self) -> Result<(), HostError> {
        let now = self.clock.now();
        let state = self.store.load().await?;
        let current = EdgeSnapshot::of(&state, now);
        let Some(previous) = self.last_seen.replace(current) else {
            return Ok(());
        };

        if previous.active != current.active {
            if current.active {
                info!(goal_minutes = state.goal_minutes(), "guard activated");
                self.ensure_alarm(AlarmName::WorkTabCheck, self.config.work_tab_check_minutes)
                    .await?;
                self.reevaluate_active_tab().await?;
            } else {
                info!("guard deactivated");
                self.store
                    .update(move |s| {
                        s.away_timer().reset();
                        s.focus_timer().pause(now);
                    })
                    .await?;
                self.alarms.clear(AlarmName::WorkTabCheck).await?;
                self.alarms.clear(AlarmName::AwayCheck).await?;
            }
        }

        if previous.snoozed != current.snoozed {
            if current.snoozed {
                info!(until = ?state.snooze_until(), "snooze started, timers paused");
                self.store
                    .update(move |s| {
                        s.away_timer().pause(now);
                        s.focus_timer().pause(now);
                    })
                    .await?;
                self.alarms.clear(AlarmName::AwayCheck).await?;
            } else {
                info!("snooze ended");
                self.store
                    .update(move |s| {
                        s.reconcile_snooze(now);
                    })
                    .await?;
                self.reevaluate_active_tab().await?;
            }
        }
        Ok(())
    }

    fn publish(&self, notice: GuardNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }
}
