//! ABOUTME: Hand-rolled 5-field cron expression parser and evaluator
//! ABOUTME: Day-of-month and day-of-week combine with classic-cron OR semantics

use chrono::{DateTime, Datelike, Duration, Local, TimeZone, Timelike, Utc};
use ds_core::{Error, Result};
use std::collections::BTreeSet;

/// A parsed 5-field cron expression: `minute hour day-of-month month day-of-week`.
///
/// Minute, hour and month are ANDed as usual. The day fields follow classic
/// cron: if both day-of-month and day-of-week are restricted (non-`*`), the
/// day matches when *either* is satisfied; if only one is restricted, that
/// one alone governs; if both are `*`, every day matches. Day-of-week
/// accepts `0` and `7`, both meaning Sunday.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    days_of_week: BTreeSet<u32>,
    dom_is_wildcard: bool,
    dow_is_wildcard: bool,
}

/// One year, in minutes, bounding the forward search in [`CronExpr::next_after`].
const SEARCH_HORIZON_MINUTES: i64 = 365 * 24 * 60;

impl CronExpr {
    /// Parse a 5-field cron expression. Returns `Error::InvalidInput` for
    /// anything other than exactly 5 whitespace-separated fields, or a field
    /// that doesn't parse within its allowed range.
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::InvalidInput(format!(
                "cron expression must have 5 fields, got {}: {expression:?}",
                fields.len()
            )));
        }

        let minutes = parse_field(fields[0], 0, 59)?;
        let hours = parse_field(fields[1], 0, 23)?;
        let days_of_month = parse_field(fields[2], 1, 31)?;
        let months = parse_field(fields[3], 1, 12)?;
        let days_of_week = parse_field(fields[4], 0, 7)?;
        let dom_is_wildcard = fields[2] == "*";
        let dow_is_wildcard = fields[4] == "*";

        for (name, set) in [
            ("minute", &minutes),
            ("hour", &hours),
            ("day-of-month", &days_of_month),
            ("month", &months),
            ("day-of-week", &days_of_week),
        ] {
            if set.is_empty() {
                return Err(Error::InvalidInput(format!(
                    "cron field {name:?} in {expression:?} matches no value"
                )));
            }
        }

        Ok(CronExpr {
            source: expression.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_is_wildcard,
            dow_is_wildcard,
        })
    }

    /// The original expression text this was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether `t` satisfies this expression.
    ///
    /// `t` is a UTC instant but fields are matched in the deployment's
    /// local civil time, not UTC — the same `localtime()` decomposition the
    /// original evaluator used, so a `"0 9 * * *"` job fires at 9am on the
    /// host's wall clock regardless of UTC offset.
    ///
    /// Minute, hour and month must all match. The day is satisfied per
    /// classic cron's OR rule: both day fields wildcard matches every day;
    /// one wildcard defers entirely to the other; both restricted matches
    /// if either one does.
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        self.matches_civil(&t.with_timezone(&Local))
    }

    /// Core field comparison against an already-localized instant. Generic
    /// over the offset so tests can pin an arbitrary non-UTC offset instead
    /// of depending on the process's system timezone.
    fn matches_civil<Tz: TimeZone>(&self, t: &DateTime<Tz>) -> bool {
        let dow = fold_sunday(t.weekday().num_days_from_sunday());
        let day_ok = match (self.dom_is_wildcard, self.dow_is_wildcard) {
            (true, true) => true,
            (true, false) => self.days_of_week.contains(&dow),
            (false, true) => self.days_of_month.contains(&t.day()),
            (false, false) => {
                self.days_of_month.contains(&t.day()) || self.days_of_week.contains(&dow)
            }
        };
        self.minutes.contains(&t.minute())
            && self.hours.contains(&t.hour())
            && self.months.contains(&t.month())
            && day_ok
    }

    /// The next minute-aligned instant strictly after `from` that matches
    /// in local civil time, searching up to one year ahead. If no minute in
    /// that window matches,
    /// returns `from` unchanged — the same fallback the original evaluator
    /// uses rather than signalling an error for a job that can never fire.
    pub fn next_after(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let start = truncate_to_minute(from) + Duration::minutes(1);
        let mut candidate = start;
        for _ in 0..SEARCH_HORIZON_MINUTES {
            if self.matches(candidate) {
                return candidate;
            }
            candidate += Duration::minutes(1);
        }
        from
    }
}

fn fold_sunday(num_days_from_sunday: u32) -> u32 {
    if num_days_from_sunday == 0 {
        7
    } else {
        num_days_from_sunday
    }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t - Duration::seconds(t.second() as i64) - Duration::nanoseconds(t.nanosecond() as i64)
}

fn parse_field(field: &str, min: u32, max: u32) -> Result<BTreeSet<u32>> {
    if field == "*" {
        return Ok((min..=max).collect());
    }

    if let Some((base, step)) = field.split_once('/') {
        return parse_step(base, step, min, max);
    }

    if field.contains('-') {
        return parse_range(field, min, max);
    }

    if field.contains(',') {
        let mut values = BTreeSet::new();
        for item in field.split(',') {
            values.extend(parse_single(item, min, max)?);
        }
        return Ok(values);
    }

    parse_single(field, min, max)
}

fn parse_single(field: &str, min: u32, max: u32) -> Result<BTreeSet<u32>> {
    let value: u32 = field
        .parse()
        .map_err(|_| Error::InvalidInput(format!("cron field value {field:?} is not a number")))?;
    let mut values = BTreeSet::new();
    if (min..=max).contains(&value) {
        values.insert(value);
    }
    Ok(values)
}

fn parse_range(range: &str, min: u32, max: u32) -> Result<BTreeSet<u32>> {
    let (start, end) = range.split_once('-').ok_or_else(|| {
        Error::InvalidInput(format!("cron range {range:?} is missing '-'"))
    })?;
    let start: u32 = start
        .parse()
        .map_err(|_| Error::InvalidInput(format!("cron range start {start:?} is not a number")))?;
    let end: u32 = end
        .parse()
        .map_err(|_| Error::InvalidInput(format!("cron range end {end:?} is not a number")))?;

    let mut values = BTreeSet::new();
    if start <= end {
        for value in start..=end {
            if (min..=max).contains(&value) {
                values.insert(value);
            }
        }
    }
    Ok(values)
}

fn parse_step(base: &str, step: &str, min: u32, max: u32) -> Result<BTreeSet<u32>> {
    let step_value: u32 = step
        .parse()
        .map_err(|_| Error::InvalidInput(format!("cron step {step:?} is not a number")))?;
    if step_value == 0 {
        return Err(Error::InvalidInput("cron step value must be > 0".to_string()));
    }

    if base == "*" {
        let mut values = BTreeSet::new();
        let mut i = min;
        while i <= max {
            values.insert(i);
            i += step_value;
        }
        return Ok(values);
    }

    if base.contains('-') {
        let range_values = parse_range(base, min, max)?;
        let values = range_values
            .into_iter()
            .enumerate()
            .filter(|(i, _)| (*i as u32) % step_value == 0)
            .map(|(_, value)| value)
            .collect();
        return Ok(values);
    }

    Err(Error::InvalidInput(format!(
        "unsupported cron step base {base:?}, expected '*' or 'a-b'"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronExpr::parse("* * * *").is_err());
        assert!(CronExpr::parse("* * * * * *").is_err());
    }

    #[test]
    fn every_15_minutes_matches_quarter_hours_only() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        assert!(expr.matches(dt(2026, 1, 1, 10, 0)));
        assert!(expr.matches(dt(2026, 1, 1, 10, 15)));
        assert!(expr.matches(dt(2026, 1, 1, 10, 30)));
        assert!(expr.matches(dt(2026, 1, 1, 10, 45)));
        assert!(!expr.matches(dt(2026, 1, 1, 10, 1)));
        assert!(!expr.matches(dt(2026, 1, 1, 10, 44)));
    }

    #[test]
    fn weekday_range_noon() {
        // "0 12 * * 1-5": noon on weekdays (Mon=1 .. Fri=5).
        let expr = CronExpr::parse("0 12 * * 1-5").unwrap();
        // 2026-01-05 is a Monday.
        assert!(expr.matches(dt(2026, 1, 5, 12, 0)));
        assert!(expr.matches(dt(2026, 1, 9, 12, 0))); // Friday
        assert!(!expr.matches(dt(2026, 1, 10, 12, 0))); // Saturday
        assert!(!expr.matches(dt(2026, 1, 11, 12, 0))); // Sunday
        assert!(!expr.matches(dt(2026, 1, 5, 13, 0))); // wrong hour
    }

    #[test]
    fn sunday_folds_0_and_7_to_same_day() {
        let zero = CronExpr::parse("0 0 * * 0").unwrap();
        let seven = CronExpr::parse("0 0 * * 7").unwrap();
        // 2026-01-04 is a Sunday.
        assert!(zero.matches(dt(2026, 1, 4, 0, 0)));
        assert!(seven.matches(dt(2026, 1, 4, 0, 0)));
    }

    #[test]
    fn dom_and_dow_both_restricted_combine_with_or() {
        // The 1st of the month OR a Monday.
        let expr = CronExpr::parse("0 0 1 * 1").unwrap();
        // 2026-06-01 is a Monday and the 1st: both hold.
        assert!(expr.matches(dt(2026, 6, 1, 0, 0)));
        // 2026-01-01 is a Thursday: day-of-month matches, day-of-week
        // doesn't, but OR semantics only need one to hold.
        assert!(expr.matches(dt(2026, 1, 1, 0, 0)));
        // 2026-01-05 is a Monday but not the 1st: day-of-week alone holds.
        assert!(expr.matches(dt(2026, 1, 5, 0, 0)));
        // 2026-01-02 is neither the 1st nor a Monday: neither holds.
        assert!(!expr.matches(dt(2026, 1, 2, 0, 0)));
    }

    #[test]
    fn single_restricted_day_field_governs_alone() {
        // day-of-week wildcard: only day-of-month restricts.
        let dom_only = CronExpr::parse("0 0 15 * *").unwrap();
        assert!(dom_only.matches(dt(2026, 3, 15, 0, 0)));
        assert!(!dom_only.matches(dt(2026, 3, 16, 0, 0)));

        // day-of-month wildcard: only day-of-week restricts.
        let dow_only = CronExpr::parse("0 0 * * 1-5").unwrap();
        assert!(dow_only.matches(dt(2026, 1, 5, 0, 0))); // Monday
        assert!(!dow_only.matches(dt(2026, 1, 10, 0, 0))); // Saturday
    }

    #[test]
    fn next_after_is_strictly_later_and_matches() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        let from = dt(2026, 1, 1, 10, 3);
        let next = expr.next_after(from);
        assert!(next > from);
        assert!(expr.matches(next));
        assert_eq!(next, dt(2026, 1, 1, 10, 15));
    }

    #[test]
    fn next_after_falls_back_to_input_when_unmatchable() {
        // February never has a 30th, so this can never fire.
        let expr = CronExpr::parse("0 0 30 2 *").unwrap();
        let from = dt(2026, 1, 1, 0, 0);
        assert_eq!(expr.next_after(from), from);
    }

    #[test]
    fn matches_decomposes_in_local_civil_time_not_utc() {
        // "30 7 2 1 *": 07:30 on January 2nd, local time.
        let expr = CronExpr::parse("30 7 2 1 *").unwrap();
        // 2026-01-01T23:30Z is 2026-01-02T07:30 at UTC+8 — a different
        // calendar day and a different hour than the UTC instant itself.
        let utc_instant = dt(2026, 1, 1, 23, 30);
        let plus8 = chrono::FixedOffset::east_opt(8 * 3600).unwrap();
        let local = utc_instant.with_timezone(&plus8);
        assert!(expr.matches_civil(&local));
        assert!(!expr.matches_civil(&utc_instant));
    }

    #[test]
    fn rejects_empty_field_after_filtering_out_of_range() {
        assert!(CronExpr::parse("99 * * * *").is_err());
    }

    #[test]
    fn range_step_every_other_value() {
        let expr = CronExpr::parse("0-10/2 * * * *").unwrap();
        assert!(expr.matches(dt(2026, 1, 1, 0, 0)));
        assert!(expr.matches(dt(2026, 1, 1, 0, 2)));
        assert!(!expr.matches(dt(2026, 1, 1, 0, 1)));
    }

    #[test]
    fn list_field() {
        let expr = CronExpr::parse("0,30 * * * *").unwrap();
        assert!(expr.matches(dt(2026, 1, 1, 0, 0)));
        assert!(expr.matches(dt(2026, 1, 1, 0, 30)));
        assert!(!expr.matches(dt(2026, 1, 1, 0, 15)));
    }
}
