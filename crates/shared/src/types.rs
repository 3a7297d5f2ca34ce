//! Common types used across TNS

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Teacher ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct TeacherId(pub i64);

impl From<i64> for TeacherId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TeacherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// School class ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct ClassId(pub i64);

impl From<i64> for ClassId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ClassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Whether a teacher can currently be reached by a kiosk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR")]
pub enum Availability {
    /// Not on campus. Initial state for every new teacher.
    #[default]
    Absent,
    Available,
    InClass,
    DoNotDisturb,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Absent => "Absent",
            Self::Available => "Available",
            Self::InClass => "InClass",
            Self::DoNotDisturb => "DoNotDisturb",
        }
    }
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Availability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Absent" => Ok(Self::Absent),
            "Available" => Ok(Self::Available),
            "InClass" => Ok(Self::InClass),
            "DoNotDisturb" => Ok(Self::DoNotDisturb),
            _ => Err(format!("Invalid availability: {}", s)),
        }
    }
}

/// School day of a timetable entry. Weekends have no entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
}

impl Weekday {
    /// Map a calendar weekday onto a school day; `None` for Saturday and Sunday
    pub fn from_chrono(day: chrono::Weekday) -> Option<Self> {
        match day {
            chrono::Weekday::Mon => Some(Self::Monday),
            chrono::Weekday::Tue => Some(Self::Tuesday),
            chrono::Weekday::Wed => Some(Self::Wednesday),
            chrono::Weekday::Thu => Some(Self::Thursday),
            chrono::Weekday::Fri => Some(Self::Friday),
            chrono::Weekday::Sat | chrono::Weekday::Sun => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monday => "Monday",
            Self::Tuesday => "Tuesday",
            Self::Wednesday => "Wednesday",
            Self::Thursday => "Thursday",
            Self::Friday => "Friday",
        }
    }
}

impl std::fmt::Display for Weekday {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which edge of a timetable entry a query matches against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleBoundary {
    /// Matches `time_in`
    Start,
    /// Matches `time_out`
    End,
}

// =============================================================================
// Rows
// =============================================================================

/// Teacher row as seen by the presence core
///
/// The credential columns stay with the persistence layer; only the push
/// target and the availability state are exposed here.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Teacher {
    pub id: TeacherId,
    pub full_name: String,
    pub availability: Availability,
    #[serde(skip)]
    pub push_token: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub availability_changed_at: Option<OffsetDateTime>,
}

impl Teacher {
    /// Push token usable for out-of-band delivery, ignoring empty strings
    pub fn push_target(&self) -> Option<&str> {
        self.push_token.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// One timetable slot
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct ScheduleEntry {
    pub id: i64,
    pub teacher_id: TeacherId,
    pub class_id: Option<ClassId>,
    pub subject: String,
    pub weekday: Weekday,
    pub time_in: NaiveTime,
    pub time_out: NaiveTime,
    pub is_break: bool,
}

impl ScheduleEntry {
    pub fn boundary_time(&self, boundary: ScheduleBoundary) -> NaiveTime {
        match boundary {
            ScheduleBoundary::Start => self.time_in,
            ScheduleBoundary::End => self.time_out,
        }
    }
}

/// School class row, read for message bodies only
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct SchoolClass {
    pub id: ClassId,
    pub name: String,
    pub grade: i32,
}

/// An availability-only write, batched per scheduler tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityChange {
    pub teacher_id: TeacherId,
    pub from: Availability,
    pub to: Availability,
}

/// Truncate a wall-clock time to minute precision
pub fn truncate_to_minute(t: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
}

/// Whether two wall-clock times fall in the same minute
pub fn same_minute(a: NaiveTime, b: NaiveTime) -> bool {
    a.hour() == b.hour() && a.minute() == b.minute()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_availability_default_is_absent() {
        assert_eq!(Availability::default(), Availability::Absent);
    }

    #[test]
    fn test_availability_str_round_trip() {
        for a in [
            Availability::Absent,
            Availability::Available,
            Availability::InClass,
            Availability::DoNotDisturb,
        ] {
            assert_eq!(a.as_str().parse::<Availability>().unwrap(), a);
        }
        assert!("Busy".parse::<Availability>().is_err());
    }

    #[test]
    fn test_availability_serializes_as_variant_name() {
        let json = serde_json::to_string(&Availability::DoNotDisturb).unwrap();
        assert_eq!(json, r#""DoNotDisturb""#);
    }

    #[test]
    fn test_weekday_from_chrono_skips_weekend() {
        assert_eq!(Weekday::from_chrono(chrono::Weekday::Mon), Some(Weekday::Monday));
        assert_eq!(Weekday::from_chrono(chrono::Weekday::Fri), Some(Weekday::Friday));
        assert_eq!(Weekday::from_chrono(chrono::Weekday::Sat), None);
        assert_eq!(Weekday::from_chrono(chrono::Weekday::Sun), None);
    }

    #[test]
    fn test_push_target_ignores_blank_tokens() {
        let mut teacher = Teacher {
            id: TeacherId(1),
            full_name: "Ana Cruz".to_string(),
            availability: Availability::Available,
            push_token: Some(String::new()),
            availability_changed_at: None,
        };
        assert_eq!(teacher.push_target(), None);

        teacher.push_token = Some("  ".to_string());
        assert_eq!(teacher.push_target(), None);

        teacher.push_token = Some("abc".to_string());
        assert_eq!(teacher.push_target(), Some("abc"));
    }

    #[test]
    fn test_minute_helpers() {
        let a = NaiveTime::from_hms_opt(9, 0, 42).unwrap();
        let b = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert!(same_minute(a, b));
        assert_eq!(truncate_to_minute(a), b);
        assert!(!same_minute(a, NaiveTime::from_hms_opt(9, 1, 0).unwrap()));
    }
}
