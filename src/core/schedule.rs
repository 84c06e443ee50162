//! Pay schedule maths - turns a schedule and a date into a concrete period.
//!
//! Everything here is pure: no database, no clock. Month-based schedules work
//! on calendar months and clamp anchor days to the last valid day of shorter
//! months (a "31st" payday lands on Feb 28/29).

use crate::{
    entities::{Frequency, PaydayType},
    errors::{Error, Result},
};
use chrono::{Datelike, Months, NaiveDate, TimeDelta};

/// When income arrives. Exactly one shape per frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Once a month on `day` (1-31)
    Monthly {
        /// Day-of-month anchor
        day: u32,
    },
    /// Twice a month; the month splits at `second_day`
    Bimonthly {
        /// Kinsenas payday
        first_day: u32,
        /// Katapusan payday, also the first day of the second half
        second_day: u32,
    },
    /// Once a week on an ISO weekday (Monday = 1)
    Weekly {
        /// ISO weekday number
        weekday: u32,
    },
    /// Every day is its own period
    Daily,
}

/// One materialized pay period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    /// First day (inclusive)
    pub start: NaiveDate,
    /// Last day (inclusive)
    pub end: NaiveDate,
    /// Day the income is expected
    pub expected_pay_date: NaiveDate,
    /// Sub-period tag
    pub payday_type: PaydayType,
}

impl Schedule {
    /// Builds a monthly schedule, validating the anchor day.
    pub fn monthly(day: u32) -> Result<Self> {
        check_day_of_month(day)?;
        Ok(Self::Monthly { day })
    }

    /// Builds a bimonthly schedule; the kinsenas day must come first.
    pub fn bimonthly(first_day: u32, second_day: u32) -> Result<Self> {
        check_day_of_month(first_day)?;
        check_day_of_month(second_day)?;
        if first_day >= second_day {
            return Err(Error::validation(format!(
                "first payday ({first_day}) must come before second payday ({second_day})"
            )));
        }
        Ok(Self::Bimonthly {
            first_day,
            second_day,
        })
    }

    /// Builds a weekly schedule from an ISO weekday (Monday = 1).
    pub fn weekly(weekday: u32) -> Result<Self> {
        if !(1..=7).contains(&weekday) {
            return Err(Error::validation(format!(
                "day of week must be 1-7, got {weekday}"
            )));
        }
        Ok(Self::Weekly { weekday })
    }

    /// Rebuilds a schedule from its persisted columns.
    ///
    /// Each frequency requires its own anchors and forbids the others, so a
    /// row can never carry two half-populated shapes.
    pub fn from_parts(
        frequency: Frequency,
        day_1: Option<i32>,
        day_2: Option<i32>,
        day_of_week: Option<i32>,
    ) -> Result<Self> {
        match (frequency, day_1, day_2, day_of_week) {
            (Frequency::Monthly, Some(day), None, None) => Self::monthly(to_u32(day)?),
            (Frequency::Bimonthly, Some(first), Some(second), None) => {
                Self::bimonthly(to_u32(first)?, to_u32(second)?)
            }
            (Frequency::Weekly, None, None, Some(weekday)) => Self::weekly(to_u32(weekday)?),
            (Frequency::Daily, None, None, None) => Ok(Self::Daily),
            (frequency, ..) => Err(Error::validation(format!(
                "schedule fields do not match a {frequency:?} pay cycle"
            ))),
        }
    }

    /// Splits the schedule back into its persisted columns.
    #[must_use]
    pub fn to_parts(self) -> (Frequency, Option<i32>, Option<i32>, Option<i32>) {
        // Anchors are validated to 1..=31, so the casts cannot wrap.
        #[allow(clippy::cast_possible_wrap)]
        match self {
            Self::Monthly { day } => (Frequency::Monthly, Some(day as i32), None, None),
            Self::Bimonthly {
                first_day,
                second_day,
            } => (
                Frequency::Bimonthly,
                Some(first_day as i32),
                Some(second_day as i32),
                None,
            ),
            Self::Weekly { weekday } => (Frequency::Weekly, None, None, Some(weekday as i32)),
            Self::Daily => (Frequency::Daily, None, None, None),
        }
    }

    /// The schedule's frequency tag.
    #[must_use]
    pub const fn frequency(self) -> Frequency {
        match self {
            Self::Monthly { .. } => Frequency::Monthly,
            Self::Bimonthly { .. } => Frequency::Bimonthly,
            Self::Weekly { .. } => Frequency::Weekly,
            Self::Daily => Frequency::Daily,
        }
    }

    /// Computes the period containing `date`.
    pub fn period_for(self, date: NaiveDate) -> Result<Period> {
        match self {
            Self::Monthly { day } => {
                let (first, last) = month_bounds(date)?;
                Ok(Period {
                    start: first,
                    end: last,
                    expected_pay_date: clamp_to_month(first, last, day)?,
                    payday_type: PaydayType::Single,
                })
            }
            Self::Bimonthly {
                first_day,
                second_day,
            } => {
                let (first, last) = month_bounds(date)?;
                let split = clamp_to_month(first, last, second_day)?;
                if date >= split {
                    Ok(Period {
                        start: split,
                        end: last,
                        expected_pay_date: split,
                        payday_type: PaydayType::Katapusan,
                    })
                } else {
                    let end = shift(split, -1)?;
                    Ok(Period {
                        start: first,
                        end,
                        expected_pay_date: clamp_to_month(first, end, first_day)?,
                        payday_type: PaydayType::Kinsenas,
                    })
                }
            }
            Self::Weekly { weekday } => {
                let today = date.weekday().number_from_monday();
                let offset = (today + 7 - weekday) % 7;
                let start = shift(date, -i64::from(offset))?;
                Ok(Period {
                    start,
                    end: shift(start, 6)?,
                    expected_pay_date: start,
                    payday_type: PaydayType::Single,
                })
            }
            Self::Daily => Ok(Period {
                start: date,
                end: date,
                expected_pay_date: date,
                payday_type: PaydayType::Single,
            }),
        }
    }

    /// First expected pay date strictly after `date`.
    pub fn next_pay_date_after(self, date: NaiveDate) -> Result<NaiveDate> {
        let period = self.period_for(date)?;
        if period.expected_pay_date > date {
            return Ok(period.expected_pay_date);
        }
        let next = self.period_for(shift(period.end, 1)?)?;
        Ok(next.expected_pay_date)
    }
}

/// Days left in a period counting `today`, never negative.
#[must_use]
pub fn days_remaining(period_end: NaiveDate, today: NaiveDate) -> i64 {
    ((period_end - today).num_days() + 1).max(0)
}

/// How much can be spent per remaining day without running dry.
///
/// Zero once the period is over or the budget is gone.
#[must_use]
pub fn safe_daily_spend(remaining_budget: f64, days_left: i64) -> f64 {
    if days_left <= 0 || remaining_budget <= 0.0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let per_day = remaining_budget / days_left as f64;
    (per_day * 100.0).round() / 100.0
}

fn check_day_of_month(day: u32) -> Result<()> {
    if (1..=31).contains(&day) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "day of month must be 1-31, got {day}"
        )))
    }
}

fn to_u32(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::validation(format!("negative schedule day {value}")))
}

fn out_of_range(date: NaiveDate) -> Error {
    Error::validation(format!("date out of supported range near {date}"))
}

pub(crate) fn shift(date: NaiveDate, days: i64) -> Result<NaiveDate> {
    date.checked_add_signed(TimeDelta::days(days))
        .ok_or_else(|| out_of_range(date))
}

fn month_bounds(date: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    let first = date.with_day(1).ok_or_else(|| out_of_range(date))?;
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .ok_or_else(|| out_of_range(date))?;
    Ok((first, last))
}

fn clamp_to_month(first: NaiveDate, last: NaiveDate, day: u32) -> Result<NaiveDate> {
    first
        .with_day(day.clamp(1, last.day()))
        .ok_or_else(|| out_of_range(first))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::float_cmp)]
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_monthly_period_is_calendar_month() {
        let schedule = Schedule::monthly(25).unwrap();
        let period = schedule.period_for(d(2025, 3, 10)).unwrap();
        assert_eq!(period.start, d(2025, 3, 1));
        assert_eq!(period.end, d(2025, 3, 31));
        assert_eq!(period.expected_pay_date, d(2025, 3, 25));
        assert_eq!(period.payday_type, PaydayType::Single);
    }

    #[test]
    fn test_monthly_pay_date_clamps_in_short_months() {
        let schedule = Schedule::monthly(31).unwrap();
        let feb = schedule.period_for(d(2025, 2, 3)).unwrap();
        assert_eq!(feb.end, d(2025, 2, 28));
        assert_eq!(feb.expected_pay_date, d(2025, 2, 28));

        let leap = schedule.period_for(d(2024, 2, 3)).unwrap();
        assert_eq!(leap.expected_pay_date, d(2024, 2, 29));

        let april = schedule.period_for(d(2025, 4, 30)).unwrap();
        assert_eq!(april.expected_pay_date, d(2025, 4, 30));
    }

    #[test]
    fn test_bimonthly_splits_at_second_day() {
        let schedule = Schedule::bimonthly(15, 30).unwrap();

        let kinsenas = schedule.period_for(d(2025, 6, 2)).unwrap();
        assert_eq!(kinsenas.start, d(2025, 6, 1));
        assert_eq!(kinsenas.end, d(2025, 6, 29));
        assert_eq!(kinsenas.expected_pay_date, d(2025, 6, 15));
        assert_eq!(kinsenas.payday_type, PaydayType::Kinsenas);

        let katapusan = schedule.period_for(d(2025, 6, 30)).unwrap();
        assert_eq!(katapusan.start, d(2025, 6, 30));
        assert_eq!(katapusan.end, d(2025, 6, 30));
        assert_eq!(katapusan.payday_type, PaydayType::Katapusan);
    }

    #[test]
    fn test_bimonthly_in_february_clamps_split() {
        let schedule = Schedule::bimonthly(15, 30).unwrap();
        let katapusan = schedule.period_for(d(2025, 2, 28)).unwrap();
        assert_eq!(katapusan.start, d(2025, 2, 28));
        assert_eq!(katapusan.payday_type, PaydayType::Katapusan);

        let kinsenas = schedule.period_for(d(2025, 2, 27)).unwrap();
        assert_eq!(kinsenas.end, d(2025, 2, 27));
        assert_eq!(kinsenas.expected_pay_date, d(2025, 2, 15));
    }

    #[test]
    fn test_weekly_window_anchors_on_weekday() {
        // Friday paydays; 2025-06-11 is a Wednesday
        let schedule = Schedule::weekly(5).unwrap();
        let period = schedule.period_for(d(2025, 6, 11)).unwrap();
        assert_eq!(period.start, d(2025, 6, 6));
        assert_eq!(period.end, d(2025, 6, 12));
        assert_eq!(period.expected_pay_date, d(2025, 6, 6));

        let on_payday = schedule.period_for(d(2025, 6, 13)).unwrap();
        assert_eq!(on_payday.start, d(2025, 6, 13));
    }

    #[test]
    fn test_daily_period_is_the_day() {
        let period = Schedule::Daily.period_for(d(2025, 1, 9)).unwrap();
        assert_eq!(period.start, d(2025, 1, 9));
        assert_eq!(period.end, d(2025, 1, 9));
    }

    #[test]
    fn test_schedule_validation() {
        assert!(Schedule::monthly(0).is_err());
        assert!(Schedule::monthly(32).is_err());
        assert!(Schedule::bimonthly(20, 15).is_err());
        assert!(Schedule::bimonthly(15, 15).is_err());
        assert!(Schedule::weekly(0).is_err());
        assert!(Schedule::weekly(8).is_err());
    }

    #[test]
    fn test_from_parts_rejects_mixed_shapes() {
        assert!(Schedule::from_parts(Frequency::Monthly, Some(15), None, Some(3)).is_err());
        assert!(Schedule::from_parts(Frequency::Weekly, Some(1), None, Some(3)).is_err());
        assert!(Schedule::from_parts(Frequency::Daily, None, Some(2), None).is_err());
        assert!(Schedule::from_parts(Frequency::Bimonthly, Some(15), None, None).is_err());
        assert_eq!(
            Schedule::from_parts(Frequency::Bimonthly, Some(15), Some(30), None).unwrap(),
            Schedule::Bimonthly {
                first_day: 15,
                second_day: 30
            }
        );
    }

    #[test]
    fn test_parts_survive_a_trip_through_columns() {
        let schedule = Schedule::weekly(3).unwrap();
        let (frequency, d1, d2, dow) = schedule.to_parts();
        assert_eq!(Schedule::from_parts(frequency, d1, d2, dow).unwrap(), schedule);
    }

    #[test]
    fn test_next_pay_date_after() {
        let monthly = Schedule::monthly(25).unwrap();
        assert_eq!(
            monthly.next_pay_date_after(d(2025, 1, 10)).unwrap(),
            d(2025, 1, 25)
        );
        assert_eq!(
            monthly.next_pay_date_after(d(2025, 1, 25)).unwrap(),
            d(2025, 2, 25)
        );

        let bimonthly = Schedule::bimonthly(15, 30).unwrap();
        assert_eq!(
            bimonthly.next_pay_date_after(d(2025, 1, 20)).unwrap(),
            d(2025, 1, 30)
        );
        assert_eq!(
            bimonthly.next_pay_date_after(d(2025, 1, 31)).unwrap(),
            d(2025, 2, 15)
        );

        assert_eq!(
            Schedule::Daily.next_pay_date_after(d(2025, 1, 31)).unwrap(),
            d(2025, 2, 1)
        );
    }

    #[test]
    fn test_days_remaining_counts_today() {
        assert_eq!(days_remaining(d(2025, 1, 31), d(2025, 1, 31)), 1);
        assert_eq!(days_remaining(d(2025, 1, 31), d(2025, 1, 22)), 10);
        assert_eq!(days_remaining(d(2025, 1, 31), d(2025, 2, 2)), 0);
    }

    #[test]
    fn test_safe_daily_spend_edges() {
        assert_eq!(safe_daily_spend(1000.0, 4), 250.0);
        assert_eq!(safe_daily_spend(100.0, 3), 33.33);
        assert_eq!(safe_daily_spend(-5.0, 3), 0.0);
        assert_eq!(safe_daily_spend(500.0, 0), 0.0);
    }
}
