use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_YEAR: i32 = 1;
pub const MAX_YEAR: i32 = 9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CalendarError {
    #[error("month must be between 1 and 12, got {0}")]
    InvalidMonth(u32),
    #[error("year must be between {min} and {max}, got {0}", min = MIN_YEAR, max = MAX_YEAR)]
    YearOutOfRange(i32),
    #[error("{year}-{month:02} is before the plan start {start_year}-{start_month:02}")]
    BeforePlanStart {
        year: i32,
        month: u32,
        start_year: i32,
        start_month: u32,
    },
    #[error("{year}-{month:02} is too far past the plan start")]
    OutOfRange { year: i32, month: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanCalendar {
    pub start_year: i32,
    pub start_month: u32,
    pub current_age: u32,
}

impl PlanCalendar {
    pub fn new(start_year: i32, start_month: u32, current_age: u32) -> Result<Self, CalendarError> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&start_year) {
            return Err(CalendarError::YearOutOfRange(start_year));
        }
        if !(1..=12).contains(&start_month) {
            return Err(CalendarError::InvalidMonth(start_month));
        }
        Ok(Self {
            start_year,
            start_month,
            current_age,
        })
    }

    pub fn month_offset(&self, year: i32, month: u32) -> Result<u32, CalendarError> {
        if !(1..=12).contains(&month) {
            return Err(CalendarError::InvalidMonth(month));
        }
        let months = (year as i64 - self.start_year as i64) * 12 + month as i64
            - self.start_month as i64;
        if months < 0 {
            return Err(CalendarError::BeforePlanStart {
                year,
                month,
                start_year: self.start_year,
                start_month: self.start_month,
            });
        }
        u32::try_from(months).map_err(|_| CalendarError::OutOfRange { year, month })
    }

    pub fn year_month(&self, offset: u32) -> YearMonth {
        let zero_based = self.start_month as i64 - 1 + offset as i64;
        let year = self.start_year as i64 + zero_based.div_euclid(12);
        YearMonth {
            year: year.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            month: zero_based.rem_euclid(12) as u32 + 1,
        }
    }

    /// Age in whole years at the given offset, assuming the plan starts on a birthday.
    pub fn age_at(&self, offset: u32) -> u32 {
        self.current_age.saturating_add(offset / 12)
    }

    pub fn offset_for_age(&self, age: u32) -> u32 {
        age.saturating_sub(self.current_age).saturating_mul(12)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert_eq, proptest};

    fn calendar() -> PlanCalendar {
        PlanCalendar::new(2025, 3, 40).expect("valid calendar")
    }

    #[test]
    fn offset_zero_is_plan_start() {
        let cal = calendar();
        assert_eq!(cal.month_offset(2025, 3), Ok(0));
        assert_eq!(cal.year_month(0), YearMonth { year: 2025, month: 3 });
    }

    #[test]
    fn offsets_cross_year_boundaries() {
        let cal = calendar();
        assert_eq!(cal.month_offset(2025, 12), Ok(9));
        assert_eq!(cal.month_offset(2026, 1), Ok(10));
        assert_eq!(cal.year_month(10), YearMonth { year: 2026, month: 1 });
        assert_eq!(cal.year_month(22), YearMonth { year: 2027, month: 1 });
    }

    #[test]
    fn dates_before_start_are_rejected() {
        let err = calendar().month_offset(2025, 2).expect_err("must reject");
        assert!(matches!(err, CalendarError::BeforePlanStart { .. }));
    }

    #[test]
    fn invalid_months_are_rejected() {
        assert_eq!(calendar().month_offset(2026, 13), Err(CalendarError::InvalidMonth(13)));
        assert_eq!(PlanCalendar::new(2025, 0, 40), Err(CalendarError::InvalidMonth(0)));
    }

    #[test]
    fn ages_follow_offsets() {
        let cal = calendar();
        assert_eq!(cal.age_at(0), 40);
        assert_eq!(cal.age_at(11), 40);
        assert_eq!(cal.age_at(12), 41);
        assert_eq!(cal.offset_for_age(65), 300);
        assert_eq!(cal.offset_for_age(30), 0);
    }

    #[test]
    fn start_year_is_bounded() {
        assert_eq!(
            PlanCalendar::new(i32::MAX, 1, 40),
            Err(CalendarError::YearOutOfRange(i32::MAX))
        );
        assert_eq!(PlanCalendar::new(0, 1, 40), Err(CalendarError::YearOutOfRange(0)));
        let err = PlanCalendar::new(10_000, 1, 40).expect_err("must reject");
        assert!(err.to_string().contains("between 1 and 9999"));

        let last = PlanCalendar::new(MAX_YEAR, 12, 40).expect("valid calendar");
        assert_eq!(last.year_month(u32::MAX).month, 3);
        assert!(last.year_month(u32::MAX).year > MAX_YEAR);
    }

    #[test]
    fn hand_built_calendar_does_not_overflow() {
        let cal = PlanCalendar {
            start_year: i32::MAX,
            start_month: 1,
            current_age: u32::MAX,
        };
        assert_eq!(cal.year_month(12).year, i32::MAX);
        assert_eq!(cal.age_at(1200), u32::MAX);
        assert_eq!(
            PlanCalendar::new(2025, 1, 0).expect("valid").offset_for_age(u32::MAX),
            u32::MAX
        );
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_offset_round_trips_through_year_month(
            start_year in 1950i32..2100,
            start_month in 1u32..=12,
            current_age in 18u32..90,
            offset in 0u32..1200
        ) {
            let cal = PlanCalendar::new(start_year, start_month, current_age).expect("valid");
            let date = cal.year_month(offset);
            prop_assert_eq!(cal.month_offset(date.year, date.month), Ok(offset));
        }
    }
}
