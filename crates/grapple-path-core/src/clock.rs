use time::{Date, OffsetDateTime};

use crate::now_utc;

/// Supplies the current instant and calendar day.
///
/// Injected so the recalculator never reads the system clock itself.
pub trait Clock {
    fn now(&self) -> OffsetDateTime;

    /// The calendar day in UTC.
    fn today(&self) -> Date {
        self.now().date()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        now_utc()
    }
}

/// A clock pinned to one instant, for tests and replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock {
    now: OffsetDateTime,
    today: Date,
}

impl FixedClock {
    #[must_use]
    pub fn at(now: OffsetDateTime) -> Self {
        Self {
            now,
            today: now.date(),
        }
    }

    /// Pins `today` to a calendar day that may differ from the instant's own
    /// date, as when a caller overrides the day on the command line.
    #[must_use]
    pub fn with_today(mut self, today: Date) -> Self {
        self.today = today;
        self
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.now
    }

    fn today(&self) -> Date {
        self.today
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    #[test]
    fn fixed_clock_reports_its_instant() {
        let clock = FixedClock::at(at("2026-02-07T23:59:00Z"));
        assert_eq!(clock.now(), at("2026-02-07T23:59:00Z"));
        assert_eq!(clock.today(), day("2026-02-07"));
    }

    #[test]
    fn today_can_be_overridden() {
        let clock = FixedClock::at(at("2026-02-07T12:00:00Z")).with_today(day("2026-02-09"));
        assert_eq!(clock.today(), day("2026-02-09"));
        assert_eq!(clock.now(), at("2026-02-07T12:00:00Z"));
    }

    #[test]
    fn system_clock_is_utc() {
        assert_eq!(SystemClock.now().offset(), time::UtcOffset::UTC);
    }
}
