//! Intel fiscal calendar.
//!
//! The fiscal year rolls over on the last Saturday of December: that
//! Saturday is day one of `WW01` of the next fiscal year, and every seventh
//! day after it starts a new work week. Fiscal years therefore have 52 or
//! 53 work weeks.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ParseError;

static WORK_WEEK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9]{4})WW([0-9]{2})$").expect("valid work week regex"));

const SATURDAY_FROM_MONDAY: i64 = 5;
const MAX_WEEKS: u32 = 53;

/// Last Saturday on or before December 31 of `calendar_year`.
///
/// Years outside the range chrono can represent are clamped to it.
pub fn last_fiscal_boundary(calendar_year: i32) -> NaiveDate {
    let year = calendar_year.clamp(NaiveDate::MIN.year(), NaiveDate::MAX.year());
    let dec31 = NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(NaiveDate::MAX);
    let back = (i64::from(dec31.weekday().num_days_from_monday()) - SATURDAY_FROM_MONDAY)
        .rem_euclid(7);
    dec31 - Duration::days(back)
}

/// First day (a Saturday) of fiscal year `fiscal_year`.
///
/// The first representable fiscal year starts before `NaiveDate::MIN`; its
/// start is clamped to `NaiveDate::MIN`.
pub fn fiscal_year_start(fiscal_year: i32) -> NaiveDate {
    if fiscal_year <= NaiveDate::MIN.year() {
        return NaiveDate::MIN;
    }
    last_fiscal_boundary(fiscal_year - 1)
}

pub fn fiscal_year(d: NaiveDate) -> i32 {
    if d >= last_fiscal_boundary(d.year()) {
        d.year() + 1
    } else {
        d.year()
    }
}

/// Fiscal quarter of `d`.
///
/// Calendar Q1 maps to fiscal Q2, Q2 to Q3 and Q3 to Q4. October through
/// December is Q4 until the fiscal boundary, and Q1 of the next fiscal year
/// from the boundary on. This is the mapping the downstream dashboards were
/// built against; it is pending product-owner review.
pub fn fiscal_quarter(d: NaiveDate) -> u32 {
    match d.month() {
        1..=3 => 2,
        4..=6 => 3,
        7..=9 => 4,
        _ => {
            if d >= last_fiscal_boundary(d.year()) {
                1
            } else {
                4
            }
        }
    }
}

/// One-based week of `d` within its fiscal year.
pub fn week_number(d: NaiveDate) -> u32 {
    let boundary = last_fiscal_boundary(d.year());
    let days = if d >= boundary {
        (d - boundary).num_days()
    } else {
        // Counted from the previous December's boundary without building
        // that date, so the first representable year still numbers correctly.
        let jan1 = d.with_ordinal(1).unwrap_or(d);
        let prev_dec31 = i64::from(jan1.weekday().pred().num_days_from_monday());
        let back = (prev_dec31 - SATURDAY_FROM_MONDAY).rem_euclid(7);
        back + 1 + i64::from(d.ordinal0())
    };
    // days / 7 is below 54 for any date inside its fiscal year
    (days / 7 + 1) as u32
}

pub fn weeks_in_fiscal_year(fiscal_year: i32) -> u32 {
    let days = (fiscal_year_start(fiscal_year.saturating_add(1)) - fiscal_year_start(fiscal_year))
        .num_days();
    (days / 7) as u32
}

pub fn work_week(d: NaiveDate) -> WorkWeek {
    WorkWeek {
        year: fiscal_year(d),
        week: week_number(d),
    }
}

/// `"{fiscal_year}WW{week:02}"` for `d`.
pub fn work_week_label(d: NaiveDate) -> String {
    work_week(d).to_string()
}

/// Parses `YYYYWWnn` into `(year, week)`.
///
/// The label must be exactly four digits, the literal `WW`, and two digits.
/// Week `00` and weeks above 53 are rejected.
pub fn parse_work_week(label: &str) -> Result<(i32, u32), ParseError> {
    let caps = WORK_WEEK_RE
        .captures(label)
        .ok_or_else(|| ParseError::Format(label.to_string()))?;

    let year: i32 = caps[1]
        .parse()
        .map_err(|_| ParseError::Format(label.to_string()))?;
    let week: u32 = caps[2]
        .parse()
        .map_err(|_| ParseError::Format(label.to_string()))?;

    if week == 0 || week > MAX_WEEKS {
        return Err(ParseError::WeekOutOfRange {
            label: label.to_string(),
            week,
        });
    }

    Ok((year, week))
}

/// First and last calendar day of a work week.
///
/// Infallible: a `WorkWeek` is validated when built. Days past the ends of
/// chrono's range are clamped to `NaiveDate::MIN`/`NaiveDate::MAX`.
pub fn work_week_range(ww: WorkWeek) -> (NaiveDate, NaiveDate) {
    let start = fiscal_year_start(ww.year)
        .checked_add_signed(Duration::weeks(i64::from(ww.week) - 1))
        .unwrap_or(NaiveDate::MAX);
    let end = start
        .checked_add_signed(Duration::days(6))
        .unwrap_or(NaiveDate::MAX);
    (start, end)
}

pub fn current_work_week() -> WorkWeek {
    work_week(Utc::now().date_naive())
}

/// A fiscal work week that exists in the calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkWeek {
    year: i32,
    week: u32,
}

impl WorkWeek {
    pub fn new(year: i32, week: u32) -> Result<Self, ParseError> {
        let weeks = weeks_in_fiscal_year(year);
        if week == 0 || week > weeks {
            return Err(ParseError::WeekNotInYear { year, weeks });
        }
        Ok(Self { year, week })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn week(&self) -> u32 {
        self.week
    }

    pub fn start_date(&self) -> NaiveDate {
        work_week_range(*self).0
    }

    pub fn end_date(&self) -> NaiveDate {
        work_week_range(*self).1
    }

    /// The work week `weeks` weeks after (or before, when negative) this one.
    ///
    /// Returns `None` only when the result falls outside chrono's date range.
    pub fn offset(&self, weeks: i64) -> Option<Self> {
        self.start_date()
            .checked_add_signed(Duration::try_weeks(weeks)?)
            .map(work_week)
    }

    pub fn previous(&self) -> Option<Self> {
        self.offset(-1)
    }

    pub fn next(&self) -> Option<Self> {
        self.offset(1)
    }

    pub fn contains(&self, d: NaiveDate) -> bool {
        let (start, end) = work_week_range(*self);
        start <= d && d <= end
    }
}

impl fmt::Display for WorkWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}WW{:02}", self.year, self.week)
    }
}

impl FromStr for WorkWeek {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (year, week) = parse_work_week(s)?;
        WorkWeek::new(year, week)
    }
}

impl Serialize for WorkWeek {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WorkWeek {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        label.parse().map_err(serde::de::Error::custom)
    }
}

pub fn fiscal_date(d: NaiveDate) -> FiscalDate {
    FiscalDate::from_date(d)
}

/// Fiscal identifiers of one calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FiscalDate {
    pub date: NaiveDate,
    pub fiscal_year: i32,
    pub fiscal_quarter: u32,
    pub work_week: WorkWeek,
}

impl FiscalDate {
    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            date,
            fiscal_year: fiscal_year(date),
            fiscal_quarter: fiscal_quarter(date),
            work_week: work_week(date),
        }
    }

    pub fn label(&self) -> String {
        self.work_week.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn boundary_is_last_saturday_of_december() {
        assert_eq!(last_fiscal_boundary(2025), date(2025, 12, 27));
        assert_eq!(last_fiscal_boundary(2024), date(2024, 12, 28));
        assert_eq!(last_fiscal_boundary(2022), date(2022, 12, 31));
        assert_eq!(last_fiscal_boundary(2030), date(2030, 12, 28));

        for year in 1900..2100 {
            let boundary = last_fiscal_boundary(year);
            assert_eq!(boundary.weekday(), Weekday::Sat);
            assert_eq!(boundary.month(), 12);
            assert!(boundary.day() >= 25);
        }
    }

    #[test]
    fn fiscal_year_flips_on_boundary() {
        for year in [2024, 2025, 2030, 1999, 2100] {
            let boundary = last_fiscal_boundary(year);
            assert_eq!(fiscal_year(boundary), year + 1);
            assert_eq!(fiscal_year(boundary - Duration::days(1)), year);
        }
    }

    #[test]
    fn boundary_week_example() {
        let sat = date(2025, 12, 27);
        assert_eq!(fiscal_year(sat), 2026);
        assert_eq!(work_week_label(sat), "2026WW01");

        let fri = date(2025, 12, 26);
        assert_eq!(fiscal_year(fri), 2025);
        assert_eq!(work_week_label(fri), "2025WW52");
    }

    #[test]
    fn long_fiscal_year_has_week_53() {
        assert_eq!(weeks_in_fiscal_year(2022), 53);
        assert_eq!(weeks_in_fiscal_year(2025), 52);
        assert_eq!(work_week_label(date(2022, 12, 30)), "2022WW53");
        assert_eq!(work_week_label(date(2022, 12, 31)), "2023WW01");
    }

    #[test]
    fn quarters_follow_calendar_month_mapping() {
        assert_eq!(fiscal_quarter(date(2025, 1, 15)), 2);
        assert_eq!(fiscal_quarter(date(2025, 3, 31)), 2);
        assert_eq!(fiscal_quarter(date(2025, 5, 1)), 3);
        assert_eq!(fiscal_quarter(date(2025, 8, 20)), 4);
        assert_eq!(fiscal_quarter(date(2025, 10, 10)), 4);
        assert_eq!(fiscal_quarter(date(2025, 12, 26)), 4);
        assert_eq!(fiscal_quarter(date(2025, 12, 27)), 1);
        assert_eq!(fiscal_quarter(date(2025, 12, 31)), 1);
    }

    #[test]
    fn labels_step_weekly_and_reset_at_year_start() {
        let mut day = fiscal_year_start(2019);
        let end = date(2032, 6, 1);
        let mut prev = work_week(day);
        let mut days_in_week = 1;

        while day < end {
            day += Duration::days(1);
            let current = work_week(day);
            if current == prev {
                days_in_week += 1;
                assert!(days_in_week <= 7, "week {prev} longer than 7 days");
                continue;
            }

            assert_eq!(days_in_week, 7, "week {prev} shorter than 7 days");
            assert!(current > prev);
            if current.year() == prev.year() {
                assert_eq!(current.week(), prev.week() + 1);
            } else {
                assert_eq!(current.year(), prev.year() + 1);
                assert_eq!(current.week(), 1);
                assert_eq!(day, fiscal_year_start(current.year()));
                assert!(prev.week() == 52 || prev.week() == 53);
            }
            prev = current;
            days_in_week = 1;
        }
    }

    #[test]
    fn parse_round_trips_labels() {
        let mut day = date(2023, 11, 1);
        while day < date(2026, 2, 1) {
            let (year, week) = parse_work_week(&work_week_label(day)).unwrap();
            assert_eq!(year, fiscal_year(day));
            assert_eq!(week, week_number(day));
            day += Duration::days(3);
        }
        assert_eq!(parse_work_week("2025WW22").unwrap(), (2025, 22));
    }

    #[test]
    fn parse_rejects_malformed_labels() {
        for label in ["2025WW", "WW22", "202522", "", "2025WW223", "25WW22", "2025ww22", " 2025WW22"] {
            assert!(
                matches!(parse_work_week(label), Err(ParseError::Format(_))),
                "{label:?} should not parse"
            );
        }
        assert!(matches!(
            parse_work_week("2025WW00"),
            Err(ParseError::WeekOutOfRange { week: 0, .. })
        ));
        assert!(matches!(
            parse_work_week("2025WW54"),
            Err(ParseError::WeekOutOfRange { week: 54, .. })
        ));
    }

    #[test]
    fn work_week_rejects_week_missing_from_year() {
        assert!("2022WW53".parse::<WorkWeek>().is_ok());
        assert_eq!(
            "2025WW53".parse::<WorkWeek>(),
            Err(ParseError::WeekNotInYear {
                year: 2025,
                weeks: 52
            })
        );
    }

    #[test]
    fn range_covers_seven_days() {
        let ww: WorkWeek = "2026WW01".parse().unwrap();
        let (start, end) = work_week_range(ww);
        assert_eq!(start, date(2025, 12, 27));
        assert_eq!(end, date(2026, 1, 2));
        assert!(ww.contains(date(2025, 12, 30)));
        assert!(!ww.contains(date(2026, 1, 3)));
    }

    #[test]
    fn offset_crosses_long_and_short_years() {
        let ww: WorkWeek = "2023WW01".parse().unwrap();
        assert_eq!(ww.previous().unwrap().to_string(), "2022WW53");
        assert_eq!(ww.offset(-2).unwrap().to_string(), "2022WW52");

        let ww: WorkWeek = "2025WW52".parse().unwrap();
        assert_eq!(ww.next().unwrap().to_string(), "2026WW01");
        assert_eq!(ww.offset(0).unwrap(), ww);
    }

    #[test]
    fn extreme_years_do_not_panic() {
        for year in [-5000, 1, 9999, 100_000] {
            let d = date(year, 6, 15);
            let fd = FiscalDate::from_date(d);
            assert_eq!(fd.fiscal_year, year);
            assert_eq!(fd.fiscal_quarter, 3);
            assert!(fd.work_week.week() >= 24);
        }
        let _ = last_fiscal_boundary(i32::MAX);
        let _ = last_fiscal_boundary(i32::MIN);
    }

    #[test]
    fn last_representable_date_has_a_range() {
        let fd = fiscal_date(NaiveDate::MAX);
        assert_eq!(fd.work_week.week(), 1);
        let (start, end) = work_week_range(fd.work_week);
        assert_eq!(start, last_fiscal_boundary(NaiveDate::MAX.year()));
        assert_eq!(end, NaiveDate::MAX);
        assert!(fd.work_week.contains(NaiveDate::MAX));
        assert_eq!(fd.work_week.next(), None);
        assert_eq!(fd.label(), work_week_label(NaiveDate::MAX));
    }

    #[test]
    fn first_representable_year_counts_weeks_from_previous_december() {
        let first = work_week(NaiveDate::MIN);
        let later = work_week(NaiveDate::MIN + Duration::days(7));
        assert_eq!(later.year(), first.year());
        assert_eq!(later.week(), first.week() + 1);
        assert_eq!(fiscal_year_start(NaiveDate::MIN.year()), NaiveDate::MIN);
    }

    #[test]
    fn week_number_matches_day_count_from_year_start() {
        let mut day = date(2019, 1, 1);
        while day < date(2027, 1, 1) {
            let start = fiscal_year_start(fiscal_year(day));
            let expected = (day - start).num_days() / 7 + 1;
            assert_eq!(i64::from(week_number(day)), expected, "{day}");
            day += Duration::days(1);
        }
    }

    #[test]
    fn work_week_serializes_as_label() {
        let ww: WorkWeek = "2025WW07".parse().unwrap();
        assert_eq!(serde_json::to_string(&ww).unwrap(), "\"2025WW07\"");
        let back: WorkWeek = serde_json::from_str("\"2025WW07\"").unwrap();
        assert_eq!(back, ww);
    }
}
