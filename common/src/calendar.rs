// Holiday calendar: weekly off-days plus static per-year public holiday tables

use crate::errors::{StorageError, ValidationError};
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Why a date is a non-working day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HolidayReason {
    #[serde(rename = "")]
    None,
    #[serde(rename = "offday")]
    OffDay,
    #[serde(rename = "public_holiday")]
    PublicHoliday,
}

impl HolidayReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HolidayReason::None => "",
            HolidayReason::OffDay => "offday",
            HolidayReason::PublicHoliday => "public_holiday",
        }
    }
}

/// Result of a calendar lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolidayStatus {
    pub is_holiday: bool,
    pub reason: HolidayReason,
}

/// A public holiday within a year
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawHoliday")]
pub struct PublicHoliday {
    /// 1-based month
    pub month: u32,
    pub day: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl PublicHoliday {
    pub fn new(month: u32, day: u32) -> Self {
        Self {
            month,
            day,
            name: None,
        }
    }

    fn matches(&self, date: NaiveDate) -> bool {
        self.month == date.month() && self.day == date.day()
    }
}

/// Table entry as written on disk. Scraped tables carry a 0-based `monthIndex`.
#[derive(Deserialize)]
struct RawHoliday {
    #[serde(default)]
    month: Option<u32>,
    #[serde(default, alias = "monthIndex")]
    month_index: Option<u32>,
    day: u32,
    #[serde(default)]
    name: Option<String>,
}

impl TryFrom<RawHoliday> for PublicHoliday {
    type Error = String;

    fn try_from(raw: RawHoliday) -> Result<Self, Self::Error> {
        let month = match (raw.month, raw.month_index) {
            (Some(month), _) => month,
            (None, Some(index)) => index + 1,
            (None, None) => return Err("holiday entry needs `month` or `monthIndex`".to_string()),
        };
        if !(1..=12).contains(&month) || !(1..=31).contains(&raw.day) {
            return Err(format!("invalid holiday date {}-{}", month, raw.day));
        }
        Ok(Self {
            month,
            day: raw.day,
            name: raw.name,
        })
    }
}

/// HolidayCalendar answers whether a date is a non-working day
#[derive(Debug, Clone, Default)]
pub struct HolidayCalendar {
    off_days: Vec<Weekday>,
    public_holidays: HashMap<i32, Vec<PublicHoliday>>,
}

impl HolidayCalendar {
    pub fn new(off_days: Vec<Weekday>) -> Self {
        Self {
            off_days,
            public_holidays: HashMap::new(),
        }
    }

    pub fn with_public_holidays(mut self, year: i32, holidays: Vec<PublicHoliday>) -> Self {
        self.public_holidays.insert(year, holidays);
        self
    }

    /// Build a calendar from configured off-day names and a directory of
    /// `{year}.json` tables. Unreadable tables are skipped with a warning.
    pub fn load(off_day_names: &[String], holidays_dir: &Path) -> Result<Self, ValidationError> {
        let mut calendar = Self::new(parse_off_days(off_day_names)?);

        let entries = match std::fs::read_dir(holidays_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(
                    holidays_dir = %holidays_dir.display(),
                    error = %e,
                    "Holiday directory not readable, no public holidays loaded"
                );
                return Ok(calendar);
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(year) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<i32>().ok())
            else {
                debug!(path = %path.display(), "Skipping non-year holiday file");
                continue;
            };

            match read_holiday_table(&path) {
                Ok(holidays) => {
                    info!(year, count = holidays.len(), "Loaded public holidays");
                    calendar.public_holidays.insert(year, holidays);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load holiday table");
                }
            }
        }

        Ok(calendar)
    }

    pub fn off_days(&self) -> &[Weekday] {
        &self.off_days
    }

    pub fn is_public_holiday(&self, date: NaiveDate) -> bool {
        self.public_holidays
            .get(&date.year())
            .is_some_and(|holidays| holidays.iter().any(|h| h.matches(date)))
    }

    /// Public holiday takes precedence over off-day in the reported reason
    pub fn is_holiday(&self, date: NaiveDate) -> HolidayStatus {
        let reason = if self.is_public_holiday(date) {
            HolidayReason::PublicHoliday
        } else if self.off_days.contains(&date.weekday()) {
            HolidayReason::OffDay
        } else {
            HolidayReason::None
        };

        HolidayStatus {
            is_holiday: reason != HolidayReason::None,
            reason,
        }
    }
}

fn read_holiday_table(path: &Path) -> Result<Vec<PublicHoliday>, StorageError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Map weekday names (case-insensitive) to weekdays
pub fn parse_off_days(names: &[String]) -> Result<Vec<Weekday>, ValidationError> {
    names
        .iter()
        .map(|name| {
            name.trim()
                .parse::<Weekday>()
                .map_err(|_| ValidationError::InvalidOffDay(name.clone()))
        })
        .collect()
}
