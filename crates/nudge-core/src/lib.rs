//! Core logic for the nudge work guard.
//!
//! This crate contains:
//! - Domain matching: work-site and entertainment-site classification
//! - The persisted `GuardState` record and its named operations
//! - Away and focus segment timers
//! - The intervention controller and the host traits it runs against
//! - In-memory host doubles for simulation and tests

pub mod config;
pub mod controller;
pub mod domain;
pub mod event;
pub mod host;
pub mod sim;
pub mod state;
pub mod timer;
mod types;

pub use config::{GuardConfig, InterventionMode};
pub use controller::{ControllerHandle, ControllerInput, GuardController};
pub use event::{AlarmName, GuardEvent, GuardMessage, GuardNotice, HostEvent, MessageReply};
pub use host::{
    AlarmSchedule, Browser, Clock, HostError, Overlay, Scheduler, StateStore, SystemClock,
    TabInfo,
};
pub use state::{DEFAULT_ENTERTAINMENT_SITES, DEFAULT_GOAL_MINUTES, GuardState, STATE_KEY};
pub use types::{MAX_GOAL_MINUTES, MAX_SNOOZE_MINUTES, TabId, ValidationError, WindowId};
