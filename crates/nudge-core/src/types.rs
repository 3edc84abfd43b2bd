//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest goal a user can set (one day).
pub const MAX_GOAL_MINUTES: u32 = 24 * 60;

/// Longest snooze a user can request (one day).
pub const MAX_SNOOZE_MINUTES: u32 = 24 * 60;

/// Validation errors for user-supplied values.
///
/// These are raised at the configuration surface, before anything reaches
/// the controller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// The value could not be parsed as a web URL.
    #[error("invalid URL {value:?}: {reason}")]
    InvalidUrl { value: String, reason: String },

    /// A numeric value fell outside its allowed range.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },
}

/// Checks that a minute count is within `1..=max`.
pub(crate) const fn check_minutes(
    field: &'static str,
    value: u32,
    max: u32,
) -> Result<u32, ValidationError> {
    if value == 0 || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min: 1,
            max,
        });
    }
    Ok(value)
}

/// Generates a numeric host identifier newtype with common trait implementations.
macro_rules! define_numeric_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a raw host identifier.
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw identifier.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_numeric_id!(
    /// A browser tab identifier.
    ///
    /// Tab IDs are assigned by the host and may go stale at any time when the
    /// tab is closed.
    TabId
);

define_numeric_id!(
    /// A browser window identifier.
    WindowId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_minutes_accepts_bounds() {
        assert_eq!(check_minutes("goal", 1, 60), Ok(1));
        assert_eq!(check_minutes("goal", 60, 60), Ok(60));
    }

    #[test]
    fn check_minutes_rejects_zero_and_overflow() {
        assert_eq!(
            check_minutes("snooze", 0, 60),
            Err(ValidationError::OutOfRange {
                field: "snooze",
                value: 0,
                min: 1,
                max: 60,
            })
        );
        assert!(check_minutes("snooze", 61, 60).is_err());
    }

    #[test]
    fn out_of_range_message_names_field() {
        let err = check_minutes("goal minutes", 0, MAX_GOAL_MINUTES).unwrap_err();
        assert_eq!(err.to_string(), "goal minutes must be between 1 and 1440, got 0");
    }

    #[test]
    fn tab_id_serializes_as_number() {
        let id = TabId::new(42);
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let parsed: TabId = serde_json::from_str("42").unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.to_string(), "42");
    }
}
