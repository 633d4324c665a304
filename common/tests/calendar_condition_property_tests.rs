// Property-based tests for the holiday calendar and condition expressions

use chrono::{Datelike, NaiveDate, Weekday};
use common::calendar::{HolidayCalendar, HolidayReason, PublicHoliday};
use common::condition::{day_context, ConditionContext, ConditionEvaluator};
use common::models::Condition;
use proptest::prelude::*;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn any_date() -> impl Strategy<Value = NaiveDate> {
    (2020i32..2040, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn any_off_days() -> impl Strategy<Value = Vec<Weekday>> {
    prop::sample::subsequence(WEEKDAYS.to_vec(), 0..=7)
}

/// A date is an off-day exactly when its weekday is configured as one
#[test]
fn property_off_day_follows_weekday() {
    proptest!(|(date in any_date(), off_days in any_off_days())| {
        let calendar = HolidayCalendar::new(off_days.clone());
        let status = calendar.is_holiday(date);

        prop_assert_eq!(status.is_holiday, off_days.contains(&date.weekday()));
        prop_assert_eq!(status.is_holiday, status.reason != HolidayReason::None);
    });
}

/// A public holiday is reported as such even when it falls on an off-day
#[test]
fn property_public_holiday_wins_over_off_day() {
    proptest!(|(date in any_date(), off_days in any_off_days())| {
        let calendar = HolidayCalendar::new(off_days)
            .with_public_holidays(date.year(), vec![PublicHoliday::new(date.month(), date.day())]);
        let status = calendar.is_holiday(date);

        prop_assert!(status.is_holiday);
        prop_assert_eq!(status.reason, HolidayReason::PublicHoliday);
    });
}

/// Holiday tables are per year: the same month and day in another year is not a holiday
#[test]
fn property_public_holiday_is_scoped_to_its_year() {
    proptest!(|(date in any_date(), shift in 1i32..5)| {
        let calendar = HolidayCalendar::default()
            .with_public_holidays(date.year() + shift, vec![PublicHoliday::new(date.month(), date.day())]);

        prop_assert!(!calendar.is_public_holiday(date));
    });
}

/// `$isHoliday` and its negation always disagree
#[test]
fn property_holiday_conditions_are_complementary() {
    let evaluator = ConditionEvaluator::new().unwrap();

    proptest!(|(date in any_date(), off_days in any_off_days())| {
        let status = HolidayCalendar::new(off_days).is_holiday(date);
        let context = day_context(&status);

        let holiday = evaluator.evaluate("$isHoliday", &context).unwrap();
        let working = evaluator.evaluate("!$isHoliday", &context).unwrap();

        prop_assert_eq!(holiday, status.is_holiday);
        prop_assert_ne!(holiday, working);
    });
}

/// Numeric comparisons agree with Rust's ordering
#[test]
fn property_numeric_comparison_matches_ordering() {
    let evaluator = ConditionEvaluator::new().unwrap();

    proptest!(|(a in 0u32..10_000, b in 0u32..10_000)| {
        let context = ConditionContext::new();
        let check = |op: &str| evaluator
            .evaluate(&format!("{} {} {}", a, op, b), &context)
            .unwrap();

        prop_assert_eq!(check("<"), a < b);
        prop_assert_eq!(check("<="), a <= b);
        prop_assert_eq!(check(">"), a > b);
        prop_assert_eq!(check(">="), a >= b);
        prop_assert_eq!(check("==="), a == b);
        prop_assert_eq!(check("!=="), a != b);
    });
}

/// A list of conditions holds exactly when every member holds
#[test]
fn property_evaluate_all_is_conjunction() {
    let evaluator = ConditionEvaluator::new().unwrap();

    proptest!(|(values in prop::collection::vec(any::<bool>(), 0..8))| {
        let conditions: Vec<Condition> = values
            .iter()
            .map(|v| Condition::new(v.to_string()))
            .collect();

        let result = evaluator.evaluate_all(&conditions, &ConditionContext::new()).unwrap();
        prop_assert_eq!(result, values.iter().all(|v| *v));
    });
}

/// Text that is not an expression never evaluates
#[test]
fn property_malformed_expressions_are_rejected() {
    let evaluator = ConditionEvaluator::new().unwrap();

    proptest!(|(ident in "[a-z]{1,8}")| {
        let context = ConditionContext::new();
        let dangling = format!("{} &&", ident);
        let unbalanced = format!("({}", ident);
        let stray = format!("{} #", ident);
        prop_assert!(evaluator.evaluate(&dangling, &context).is_err());
        prop_assert!(evaluator.evaluate(&unbalanced, &context).is_err());
        prop_assert!(evaluator.evaluate(&stray, &context).is_err());
    });
}
