//! Pausable segment timers backing the away and focus accumulators.
//!
//! A timer is two persisted fields: the start of the running segment (or
//! `None` while paused) and the milliseconds accumulated by finished
//! segments. The running segment is only folded into the accumulator on
//! pause, so reads are pure.

use chrono::{DateTime, Utc};

/// Milliseconds between `start` and `now`, clamped at zero.
///
/// A wall clock that steps backwards must not make an accumulator shrink.
pub fn elapsed_ms(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - start).num_milliseconds().max(0)
}

/// Total duration of a timer given its persisted fields.
pub fn segment_duration_ms(
    started_at: Option<DateTime<Utc>>,
    accumulated_ms: i64,
    now: DateTime<Utc>,
) -> i64 {
    match started_at {
        Some(start) => accumulated_ms.saturating_add(elapsed_ms(start, now)),
        None => accumulated_ms,
    }
}

/// Mutable view over one timer's fields inside a `GuardState`.
#[derive(Debug)]
pub struct SegmentTimer<'a> {
    started_at: &'a mut Option<DateTime<Utc>>,
    accumulated_ms: &'a mut i64,
}

impl<'a> SegmentTimer<'a> {
    pub(crate) const fn new(
        started_at: &'a mut Option<DateTime<Utc>>,
        accumulated_ms: &'a mut i64,
    ) -> Self {
        Self {
            started_at,
            accumulated_ms,
        }
    }

    /// Starts a fresh run, discarding any previous accumulation.
    pub fn start(&mut self, now: DateTime<Utc>) {
        *self.started_at = Some(now);
        *self.accumulated_ms = 0;
    }

    /// Continues counting on top of the accumulated time.
    ///
    /// No-op while a segment is already running, so the running segment is
    /// never dropped.
    pub fn resume(&mut self, now: DateTime<Utc>) {
        if self.started_at.is_none() {
            *self.started_at = Some(now);
        }
    }

    /// Folds the running segment into the accumulator.
    ///
    /// Returns `false` (and changes nothing) when already paused.
    pub fn pause(&mut self, now: DateTime<Utc>) -> bool {
        let Some(start) = self.started_at.take() else {
            return false;
        };
        *self.accumulated_ms = self.accumulated_ms.saturating_add(elapsed_ms(start, now));
        true
    }

    /// Stops the timer and zeroes the accumulator.
    pub fn reset(&mut self) {
        *self.started_at = None;
        *self.accumulated_ms = 0;
    }

    pub const fn is_running(&self) -> bool {
        self.started_at.is_some()
    }

    pub const fn accumulated_ms(&self) -> i64 {
        *self.accumulated_ms
    }

    /// Accumulated time plus the running segment, if any.
    pub fn duration_ms(&self, now: DateTime<Utc>) -> i64 {
        segment_duration_ms(*self.started_at, *self.accumulated_ms, now)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn start_then_query_is_zero() {
        let (mut started, mut acc) = (None, 1234);
        let mut timer = SegmentTimer::new(&mut started, &mut acc);
        timer.start(t0());
        assert_eq!(timer.duration_ms(t0()), 0);
        assert!(timer.is_running());
    }

    #[test]
    fn running_timer_tracks_elapsed_time() {
        let (mut started, mut acc) = (None, 0);
        let mut timer = SegmentTimer::new(&mut started, &mut acc);
        timer.start(t0());
        assert_eq!(timer.duration_ms(t0() + Duration::seconds(90)), 90_000);
    }

    #[test]
    fn paused_timer_stays_constant() {
        let (mut started, mut acc) = (None, 0);
        let mut timer = SegmentTimer::new(&mut started, &mut acc);
        timer.start(t0());
        assert!(timer.pause(t0() + Duration::seconds(30)));
        assert_eq!(timer.duration_ms(t0() + Duration::seconds(30)), 30_000);
        assert_eq!(timer.duration_ms(t0() + Duration::hours(2)), 30_000);
    }

    #[test]
    fn pause_is_idempotent() {
        let (mut started, mut acc) = (None, 0);
        let mut timer = SegmentTimer::new(&mut started, &mut acc);
        timer.start(t0());
        assert!(timer.pause(t0() + Duration::seconds(10)));
        assert!(!timer.pause(t0() + Duration::seconds(50)));
        assert_eq!(timer.accumulated_ms(), 10_000);
    }

    #[test]
    fn resume_continues_from_paused_value() {
        let (mut started, mut acc) = (None, 0);
        let mut timer = SegmentTimer::new(&mut started, &mut acc);
        timer.start(t0());
        timer.pause(t0() + Duration::seconds(20));
        timer.resume(t0() + Duration::seconds(100));
        assert_eq!(timer.duration_ms(t0() + Duration::seconds(105)), 25_000);
    }

    #[test]
    fn resume_while_running_keeps_segment() {
        let (mut started, mut acc) = (None, 0);
        let mut timer = SegmentTimer::new(&mut started, &mut acc);
        timer.start(t0());
        timer.resume(t0() + Duration::seconds(40));
        assert_eq!(timer.duration_ms(t0() + Duration::seconds(60)), 60_000);
    }

    #[test]
    fn reset_zeroes_and_stops() {
        let (mut started, mut acc) = (None, 0);
        let mut timer = SegmentTimer::new(&mut started, &mut acc);
        timer.start(t0());
        timer.reset();
        assert!(!timer.is_running());
        assert_eq!(timer.duration_ms(t0() + Duration::minutes(5)), 0);
    }

    #[test]
    fn backwards_clock_never_shrinks_duration() {
        assert_eq!(elapsed_ms(t0(), t0() - Duration::seconds(5)), 0);
        assert_eq!(segment_duration_ms(Some(t0()), 700, t0() - Duration::seconds(5)), 700);
    }
}
