// Time-of-day parsing and per-day action ordering
//
// Actions carry a wall-clock "HH:MM" with no date. Each pass anchors them to
// the current local date in the scheduler timezone.

use crate::errors::ScheduleError;
use crate::models::Action;
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// An action anchored to an absolute instant for one day
#[derive(Debug, Clone, Copy)]
pub struct ScheduledAction<'a> {
    pub action: &'a Action,
    pub at: DateTime<Utc>,
}

/// Parse an "HH:MM" string. Anything that does not split into exactly two
/// numeric components is rejected.
pub fn parse_time_of_day(time: &str, resource: &str) -> Result<NaiveTime, ScheduleError> {
    let invalid = || ScheduleError::InvalidTime {
        time: time.to_string(),
        resource: resource.to_string(),
    };

    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() != 2 {
        return Err(invalid());
    }

    let hour: u32 = parts[0].trim().parse().map_err(|_| invalid())?;
    let minute: u32 = parts[1].trim().parse().map_err(|_| invalid())?;

    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(invalid)
}

/// Combine a local date with a time of day in `timezone`.
///
/// On a DST fold the earlier instant wins. A time inside a DST gap is read
/// with the offset in force before the gap, so it rolls forward by the gap
/// length (02:30 on a spring-forward day becomes 03:30).
pub fn absolute_time(
    date: NaiveDate,
    time: NaiveTime,
    timezone: Tz,
) -> Result<DateTime<Utc>, ScheduleError> {
    let local = date.and_time(time);
    match timezone.from_local_datetime(&local) {
        LocalResult::Single(local) => Ok(local.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            let before_gap = timezone
                .offset_from_local_datetime(&(local - Duration::days(1)))
                .earliest()
                .ok_or_else(|| ScheduleError::NonexistentLocalTime {
                    time: time.format("%H:%M").to_string(),
                    date: date.to_string(),
                    timezone: timezone.to_string(),
                })?;
            let utc = local - Duration::seconds(i64::from(before_gap.fix().local_minus_utc()));
            Ok(Utc.from_utc_datetime(&utc))
        }
    }
}

/// Anchor every action of a group to `date` and order them latest first.
///
/// A single bad time string fails the whole group.
pub fn sort_actions_by_time<'a>(
    actions: &'a [Action],
    date: NaiveDate,
    timezone: Tz,
    resource: &str,
) -> Result<Vec<ScheduledAction<'a>>, ScheduleError> {
    let mut scheduled = actions
        .iter()
        .map(|action| {
            let time = parse_time_of_day(&action.time, resource)?;
            let at = absolute_time(date, time, timezone)?;
            Ok(ScheduledAction { action, at })
        })
        .collect::<Result<Vec<_>, ScheduleError>>()?;

    scheduled.sort_by(|a, b| b.at.cmp(&a.at));
    Ok(scheduled)
}

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    Tz::from_str(name).map_err(|_| ScheduleError::InvalidTimezone(name.to_string()))
}

/// Timezone used when none is configured
pub fn default_timezone() -> Tz {
    chrono_tz::UTC
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionType;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 14).unwrap()
    }

    #[test]
    fn test_parse_valid_time() {
        let t = parse_time_of_day("08:05", "r").unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(8, 5, 0).unwrap());
    }

    #[test]
    fn test_parse_single_digit_components() {
        let t = parse_time_of_day("8:5", "r").unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(8, 5, 0).unwrap());
    }

    #[test]
    fn test_parse_rejects_wrong_component_count() {
        assert!(parse_time_of_day("08", "r").is_err());
        assert!(parse_time_of_day("08:00:00", "r").is_err());
    }

    #[test]
    fn test_parse_rejects_non_numeric_and_out_of_range() {
        assert!(parse_time_of_day("ab:00", "r").is_err());
        assert!(parse_time_of_day("24:00", "r").is_err());
        assert!(parse_time_of_day("12:60", "r").is_err());
    }

    #[test]
    fn test_sort_descending_by_time_of_day() {
        let actions = vec![
            Action::new(ActionType::VmStart, "09:00"),
            Action::new(ActionType::VmDeallocate, "18:30"),
            Action::new(ActionType::VmResize, "12:00"),
        ];
        let sorted = sort_actions_by_time(&actions, date(), default_timezone(), "r").unwrap();
        let times: Vec<&str> = sorted.iter().map(|s| s.action.time.as_str()).collect();
        assert_eq!(times, vec!["18:30", "12:00", "09:00"]);
    }

    #[test]
    fn test_sort_fails_whole_group_on_bad_time() {
        let actions = vec![
            Action::new(ActionType::VmStart, "09:00"),
            Action::new(ActionType::VmDeallocate, "1830"),
        ];
        let result = sort_actions_by_time(&actions, date(), default_timezone(), "r");
        assert!(matches!(result, Err(ScheduleError::InvalidTime { .. })));
    }

    #[test]
    fn test_absolute_time_applies_timezone() {
        let tz = parse_timezone("Asia/Jakarta").unwrap();
        let at = absolute_time(date(), NaiveTime::from_hms_opt(8, 0, 0).unwrap(), tz).unwrap();
        assert_eq!(at.to_rfc3339(), "2024-03-14T01:00:00+00:00");
    }

    #[test]
    fn test_absolute_time_in_dst_gap_rolls_forward() {
        let tz = parse_timezone("Europe/Berlin").unwrap();
        let gap_day = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let at = absolute_time(gap_day, NaiveTime::from_hms_opt(2, 30, 0).unwrap(), tz).unwrap();
        // 03:30 CEST
        assert_eq!(at.to_rfc3339(), "2024-03-31T01:30:00+00:00");
    }

    #[test]
    fn test_absolute_time_on_dst_fold_takes_earliest() {
        let tz = parse_timezone("Europe/Berlin").unwrap();
        let fold_day = NaiveDate::from_ymd_opt(2024, 10, 27).unwrap();
        let at = absolute_time(fold_day, NaiveTime::from_hms_opt(2, 30, 0).unwrap(), tz).unwrap();
        // 02:30 CEST, before the clocks go back
        assert_eq!(at.to_rfc3339(), "2024-10-27T00:30:00+00:00");
    }

    #[test]
    fn test_parse_invalid_timezone() {
        assert!(parse_timezone("Mars/Olympus").is_err());
    }
}
