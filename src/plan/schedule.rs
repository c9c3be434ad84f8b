// Interval -> next fire time mapping
//
// DAILY   -> +1 day
// WEEKLY  -> +7 days
// MONTHLY -> +1 calendar month, clamped to the last day of shorter months
//            (Jan 31 -> Feb 29 in a leap year)

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PlanError;

/// Recurring deposit cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Daily => "DAILY",
            Interval::Weekly => "WEEKLY",
            Interval::Monthly => "MONTHLY",
        }
    }

    pub fn all() -> Vec<Interval> {
        vec![Interval::Daily, Interval::Weekly, Interval::Monthly]
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Interval {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DAILY" => Ok(Interval::Daily),
            "WEEKLY" => Ok(Interval::Weekly),
            "MONTHLY" => Ok(Interval::Monthly),
            _ => Err(PlanError::UnknownInterval(s.to_string())),
        }
    }
}

/// Next time a plan with `interval` is due, given when it last fired
pub fn next_fire_time(interval: Interval, last_fire: DateTime<Utc>) -> DateTime<Utc> {
    let next = match interval {
        Interval::Daily => last_fire.checked_add_signed(Duration::days(1)),
        Interval::Weekly => last_fire.checked_add_signed(Duration::days(7)),
        Interval::Monthly => last_fire.checked_add_months(Months::new(1)),
    };

    next.unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_daily_adds_one_day() {
        assert_eq!(
            next_fire_time(Interval::Daily, utc(2024, 1, 1, 0)),
            utc(2024, 1, 2, 0)
        );
    }

    #[test]
    fn test_weekly_adds_seven_days_across_month_end() {
        assert_eq!(
            next_fire_time(Interval::Weekly, utc(2024, 1, 29, 15)),
            utc(2024, 2, 5, 15)
        );
    }

    #[test]
    fn test_monthly_is_calendar_month() {
        assert_eq!(
            next_fire_time(Interval::Monthly, utc(2024, 3, 15, 9)),
            utc(2024, 4, 15, 9)
        );
        assert_eq!(
            next_fire_time(Interval::Monthly, utc(2024, 12, 10, 0)),
            utc(2025, 1, 10, 0)
        );
    }

    #[test]
    fn test_monthly_clamps_to_end_of_shorter_month() {
        assert_eq!(
            next_fire_time(Interval::Monthly, utc(2024, 1, 31, 0)),
            utc(2024, 2, 29, 0)
        );
        assert_eq!(
            next_fire_time(Interval::Monthly, utc(2023, 1, 31, 0)),
            utc(2023, 2, 28, 0)
        );
    }

    #[test]
    fn test_interval_parsing() {
        assert_eq!("daily".parse::<Interval>().unwrap(), Interval::Daily);
        assert_eq!(" WEEKLY ".parse::<Interval>().unwrap(), Interval::Weekly);
        assert_eq!("Monthly".parse::<Interval>().unwrap(), Interval::Monthly);

        let err = "HOURLY".parse::<Interval>().unwrap_err();
        assert!(matches!(err, PlanError::UnknownInterval(ref v) if v == "HOURLY"));
    }

    #[test]
    fn test_interval_round_trips_through_display() {
        for interval in Interval::all() {
            assert_eq!(interval.to_string().parse::<Interval>().unwrap(), interval);
        }
    }
}
