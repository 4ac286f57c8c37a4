//! Fire times for delayed and recurring events

use std::str::FromStr;

use chrono::{DateTime, Duration, Months, NaiveDateTime, Utc};
use dss_core::{props, Event};
use thiserror::Error;
use tracing::warn;

/// Errors raised while deriving a schedule from an event
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("invalid relative offset '{0}'")]
    InvalidOffset(String),

    #[error("invalid time '{0}'")]
    InvalidTime(String),

    #[error("invalid recurrence rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },
}

/// Result type for schedule operations
pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Recurrence frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Secondly,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl FromStr for Frequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SECONDLY" => Ok(Frequency::Secondly),
            "MINUTELY" => Ok(Frequency::Minutely),
            "HOURLY" => Ok(Frequency::Hourly),
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            "YEARLY" => Ok(Frequency::Yearly),
            other => Err(format!("unknown frequency '{other}'")),
        }
    }
}

/// The subset of an iCal RRULE the scheduler understands
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub count: Option<u32>,
    pub until: Option<DateTime<Utc>>,
}

impl RecurrenceRule {
    /// Parse `FREQ=..;INTERVAL=..;COUNT=..;UNTIL=..`. Other parts are
    /// ignored with a warning.
    pub fn parse(rule: &str) -> ScheduleResult<Self> {
        let invalid = |reason: String| ScheduleError::InvalidRule {
            rule: rule.to_string(),
            reason,
        };

        let body = rule.trim().trim_start_matches("RRULE:");
        let mut frequency = None;
        let mut interval = 1;
        let mut count = None;
        let mut until = None;

        for part in body.split(';').filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| invalid(format!("malformed part '{part}'")))?;
            match key.to_ascii_uppercase().as_str() {
                "FREQ" => frequency = Some(value.parse::<Frequency>().map_err(invalid)?),
                "INTERVAL" => {
                    interval = value
                        .parse::<u32>()
                        .ok()
                        .filter(|i| *i > 0)
                        .ok_or_else(|| invalid(format!("bad interval '{value}'")))?
                }
                "COUNT" => {
                    count = Some(
                        value
                            .parse::<u32>()
                            .map_err(|_| invalid(format!("bad count '{value}'")))?,
                    )
                }
                "UNTIL" => {
                    until = Some(
                        parse_time(value).map_err(|_| invalid(format!("bad until '{value}'")))?,
                    )
                }
                other => warn!(rule, part = other, "Ignoring unsupported recurrence rule part"),
            }
        }

        Ok(Self {
            frequency: frequency.ok_or_else(|| invalid("missing FREQ".to_string()))?,
            interval,
            count,
            until,
        })
    }

    fn step(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let n = i64::from(self.interval);
        match self.frequency {
            Frequency::Secondly => from.checked_add_signed(Duration::seconds(n)),
            Frequency::Minutely => from.checked_add_signed(Duration::minutes(n)),
            Frequency::Hourly => from.checked_add_signed(Duration::hours(n)),
            Frequency::Daily => from.checked_add_signed(Duration::days(n)),
            Frequency::Weekly => from.checked_add_signed(Duration::weeks(n)),
            Frequency::Monthly => from.checked_add_months(Months::new(self.interval)),
            Frequency::Yearly => from.checked_add_months(Months::new(self.interval.saturating_mul(12))),
        }
    }
}

/// Iterator state over a recurrence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recurrence {
    rule: RecurrenceRule,
    next: Option<DateTime<Utc>>,
    produced: u32,
}

impl Recurrence {
    pub fn new(rule: RecurrenceRule, start: DateTime<Utc>) -> Self {
        let mut recurrence = Self {
            rule,
            next: Some(start),
            produced: 0,
        };
        recurrence.clamp();
        recurrence
    }

    pub fn next_occurrence(&self) -> Option<DateTime<Utc>> {
        self.next
    }

    /// Move past the current occurrence
    pub fn advance(&mut self) {
        if let Some(current) = self.next {
            self.produced += 1;
            self.next = self.rule.step(current);
            self.clamp();
        }
    }

    /// Skip every occurrence that lies before `now`, returning how many
    /// were skipped
    pub fn leap_adjust(&mut self, now: DateTime<Utc>) -> usize {
        let mut skipped = 0;
        while self.next.is_some_and(|next| next < now) {
            self.advance();
            skipped += 1;
        }
        skipped
    }

    fn clamp(&mut self) {
        if self.rule.count.is_some_and(|count| self.produced >= count) {
            self.next = None;
        }
        if let (Some(next), Some(until)) = (self.next, self.rule.until) {
            if next > until {
                self.next = None;
            }
        }
    }
}

/// When a scheduled event fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fires once
    Once(DateTime<Utc>),
    /// Fires on every occurrence of a recurrence
    Recurring(Recurrence),
}

impl Schedule {
    /// A single fire time `delay` after `now`
    ///
    /// Fails when the fire time is past the last representable instant.
    pub fn after(now: DateTime<Utc>, delay: Duration) -> ScheduleResult<Self> {
        now.checked_add_signed(delay)
            .map(Schedule::Once)
            .ok_or_else(|| ScheduleError::InvalidOffset(delay.num_seconds().to_string()))
    }

    /// Derive the schedule an event asks for through its `time` or
    /// `iCalStartTime` + `iCalRRule` properties
    ///
    /// `Ok(None)` means the event should be pushed straight to the queue:
    /// it carries no scheduling properties or asks for a `+0` offset.
    pub fn from_event(event: &Event, now: DateTime<Utc>) -> ScheduleResult<Option<Self>> {
        if let Some(time) = event.time() {
            if time.len() < 2 {
                return Err(ScheduleError::InvalidTime(time.to_string()));
            }
            if let Some(offset) = time.strip_prefix('+') {
                let seconds = offset
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| ScheduleError::InvalidOffset(offset.to_string()))?;
                return match seconds {
                    0 => Ok(None),
                    s if s > 0 => Duration::try_seconds(s)
                        .ok_or_else(|| ScheduleError::InvalidOffset(offset.to_string()))
                        .and_then(|delay| Schedule::after(now, delay))
                        .map(Some),
                    _ => Err(ScheduleError::InvalidOffset(offset.to_string())),
                };
            }
            return parse_time(time).map(|when| Some(Schedule::Once(when)));
        }

        match (
            event.property(props::ICAL_START_TIME),
            event.property(props::ICAL_RRULE),
        ) {
            (Some(start), Some(rule)) => {
                let start = parse_time(start)?;
                let rule = RecurrenceRule::parse(rule)?;
                let mut recurrence = Recurrence::new(rule, start);
                recurrence.leap_adjust(now);
                Ok(Some(Schedule::Recurring(recurrence)))
            }
            _ => Ok(None),
        }
    }

    pub fn next_occurrence(&self) -> Option<DateTime<Utc>> {
        match self {
            Schedule::Once(when) => Some(*when),
            Schedule::Recurring(recurrence) => recurrence.next_occurrence(),
        }
    }

    pub fn has_recurrence(&self) -> bool {
        matches!(self, Schedule::Recurring(_))
    }

    /// Whether the schedule is due at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_occurrence().is_some_and(|next| next <= now)
    }

    /// Consume the current occurrence after it fired. Returns the number of
    /// further occurrences skipped because they were already in the past,
    /// and whether the schedule will fire again.
    pub fn fired(&mut self, now: DateTime<Utc>) -> (usize, bool) {
        match self {
            Schedule::Once(_) => (0, false),
            Schedule::Recurring(recurrence) => {
                recurrence.advance();
                let skipped = recurrence.leap_adjust(now);
                (skipped, recurrence.next_occurrence().is_some())
            }
        }
    }
}

/// Parse an absolute time: RFC 3339, ISO-8601 without offset, or iCal basic
/// format (`YYYYMMDDTHHMMSS[Z]`). Times without an offset are taken as UTC.
pub fn parse_time(value: &str) -> ScheduleResult<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = value.trim_end_matches('Z');
    for format in ["%Y%m%dT%H%M%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(naive, format) {
            return Ok(dt.and_utc());
        }
    }
    Err(ScheduleError::InvalidTime(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, h, m, s).unwrap()
    }

    fn event_with(pairs: &[(&str, &str)]) -> Event {
        pairs
            .iter()
            .fold(Event::new("test").unwrap(), |e, (k, v)| e.with_property(*k, *v))
    }

    #[test]
    fn test_relative_offset() {
        let now = at(10, 0, 0);
        let schedule = Schedule::from_event(&event_with(&[("time", "+5")]), now)
            .unwrap()
            .unwrap();
        assert_eq!(schedule.next_occurrence(), Some(at(10, 0, 5)));
        assert!(!schedule.is_due(at(10, 0, 4)));
        assert!(schedule.is_due(at(10, 0, 5)));
    }

    #[test]
    fn test_zero_offset_means_push_directly() {
        let schedule = Schedule::from_event(&event_with(&[("time", "+0")]), at(10, 0, 0)).unwrap();
        assert!(schedule.is_none());
    }

    #[test]
    fn test_bad_offsets_are_rejected() {
        let now = at(10, 0, 0);
        for bad in ["+-3", "+abc", "x", ""] {
            assert!(
                Schedule::from_event(&event_with(&[("time", bad)]), now).is_err(),
                "accepted {bad:?}"
            );
        }
    }

    #[test]
    fn test_oversized_offsets_are_rejected() {
        let now = at(10, 0, 0);
        // beyond the range of a duration, then beyond the range of a date
        for huge in ["+99999999999999999", "+10000000000000"] {
            assert!(
                matches!(
                    Schedule::from_event(&event_with(&[("time", huge)]), now),
                    Err(ScheduleError::InvalidOffset(_))
                ),
                "accepted {huge:?}"
            );
        }
        assert!(Schedule::after(DateTime::<Utc>::MAX_UTC, Duration::seconds(1)).is_err());
    }

    #[test]
    fn test_absolute_times() {
        let expected = at(12, 30, 0);
        for value in ["20260301T123000Z", "20260301T123000", "2026-03-01T12:30:00Z"] {
            let schedule = Schedule::from_event(&event_with(&[("time", value)]), at(10, 0, 0))
                .unwrap()
                .unwrap();
            assert_eq!(schedule.next_occurrence(), Some(expected), "{value}");
        }
    }

    #[test]
    fn test_no_scheduling_properties() {
        assert!(Schedule::from_event(&event_with(&[]), at(0, 0, 0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_rrule_parse() {
        let rule = RecurrenceRule::parse("FREQ=MINUTELY;INTERVAL=5;COUNT=3;BYDAY=MO").unwrap();
        assert_eq!(rule.frequency, Frequency::Minutely);
        assert_eq!(rule.interval, 5);
        assert_eq!(rule.count, Some(3));
        assert!(RecurrenceRule::parse("INTERVAL=5").is_err());
        assert!(RecurrenceRule::parse("FREQ=FORTNIGHTLY").is_err());
    }

    #[test]
    fn test_recurrence_count_and_until() {
        let rule = RecurrenceRule::parse("FREQ=SECONDLY;INTERVAL=10;COUNT=2").unwrap();
        let mut r = Recurrence::new(rule, at(0, 0, 0));
        assert_eq!(r.next_occurrence(), Some(at(0, 0, 0)));
        r.advance();
        assert_eq!(r.next_occurrence(), Some(at(0, 0, 10)));
        r.advance();
        assert_eq!(r.next_occurrence(), None);

        let rule = RecurrenceRule::parse("FREQ=HOURLY;UNTIL=20260301T013000Z").unwrap();
        let mut r = Recurrence::new(rule, at(0, 0, 0));
        r.advance();
        assert_eq!(r.next_occurrence(), Some(at(1, 0, 0)));
        r.advance();
        assert_eq!(r.next_occurrence(), None);
    }

    #[test]
    fn test_fired_skips_missed_occurrences() {
        let event = event_with(&[
            ("iCalStartTime", "20260301T000000Z"),
            ("iCalRRule", "FREQ=MINUTELY"),
        ]);
        let mut schedule = Schedule::from_event(&event, at(0, 0, 0)).unwrap().unwrap();
        assert!(schedule.has_recurrence());
        assert!(schedule.is_due(at(0, 0, 0)));

        // clock leaps forward by five minutes before the next check
        let (skipped, again) = schedule.fired(at(0, 5, 30));
        assert!(again);
        assert_eq!(skipped, 5);
        assert_eq!(schedule.next_occurrence(), Some(at(0, 6, 0)));
    }

    #[test]
    fn test_recurrence_start_in_past_is_adjusted() {
        let event = event_with(&[
            ("iCalStartTime", "2026-03-01T00:00:00Z"),
            ("iCalRRule", "FREQ=HOURLY"),
        ]);
        let schedule = Schedule::from_event(&event, at(2, 30, 0)).unwrap().unwrap();
        assert_eq!(schedule.next_occurrence(), Some(at(3, 0, 0)));
    }

    #[test]
    fn test_once_does_not_repeat() {
        let mut schedule = Schedule::Once(at(1, 0, 0));
        assert_eq!(schedule.fired(at(1, 0, 0)), (0, false));
    }
}
