use std::str::FromStr;
use anyhow::anyhow;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, SecondsFormat, TimeDelta, Utc};
use rocket::serde::{Deserialize, Serialize};

pub const DEFAULT_CALENDAR_OFFSET: &str = "+05:30";

#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Debug, Clone, Copy)]
pub struct Timestamp(pub DateTime<FixedOffset>);

/// Which end of a calendar day a date-only string resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayBound {
    Start,
    End,
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from_fixed_offset(chrono::Local::now().fixed_offset())
    }
    pub fn from_fixed_offset(datetime: DateTime<FixedOffset>) -> Timestamp {
        let millis = datetime.timestamp_subsec_millis();
        let nanos = datetime.timestamp_subsec_nanos() - millis * 1_000_000;
        if let Some(dt) = datetime.checked_sub_signed(TimeDelta::nanoseconds(nanos as i64)) {
            Timestamp(dt)
        } else {
            Timestamp(datetime)
        }
    }
    pub fn from_local(local_dt: NaiveDateTime, offset: &FixedOffset) -> Option<Timestamp> {
        local_dt.and_local_timezone(*offset).single().map(Self::from_fixed_offset)
    }
    pub fn to_display_string(self) -> String {
        self.0.format("%F %R").to_string()
    }
    pub fn to_iso_string(self) -> String {
        if self.0.timestamp_subsec_millis() == 0 {
            self.0.to_rfc3339_opts(SecondsFormat::Secs, true)
        } else {
            self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
        }
    }
    pub fn from_iso_string(datetime_str: &str) -> Result<Self, anyhow::Error> {
        let dt = DateTime::parse_from_rfc3339(datetime_str)?;
        Ok(Self::from_fixed_offset(dt))
    }
    /// Parses the date strings coming from event forms.
    ///
    /// Accepts RFC 3339, a local `YYYY-MM-DDTHH:MM[:SS]` or a bare `YYYY-MM-DD`.
    /// Local forms are interpreted in `offset`; a bare date resolves to the
    /// first or last millisecond of that day depending on `bound`.
    pub fn parse_event_date(s: &str, offset: &FixedOffset, bound: DayBound) -> Result<Self, anyhow::Error> {
        let s = s.trim();
        if let Ok(dt) = Self::from_iso_string(s) {
            return Ok(dt);
        }
        let local = if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            let time = match bound {
                DayBound::Start => NaiveTime::MIN,
                DayBound::End => NaiveTime::from_hms_milli_opt(23, 59, 59, 999).ok_or(anyhow!("invalid end of day"))?,
            };
            date.and_time(time)
        } else {
            ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"].iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .ok_or(anyhow!("unrecognized date-time string: '{s}'"))?
        };
        Self::from_local(local, offset).ok_or(anyhow!("date-time '{s}' does not exist at offset {offset}"))
    }
    /// Calendar date of this instant as seen at `offset`.
    pub fn calendar_day(&self, offset: &FixedOffset) -> NaiveDate {
        self.0.with_timezone(offset).date_naive()
    }
}

impl From<DateTime<FixedOffset>> for Timestamp {
    fn from(value: DateTime<FixedOffset>) -> Self {
        Self::from_fixed_offset(value)
    }
}
impl<DB: sqlx::Database> sqlx::Type<DB> for Timestamp
where
    str: sqlx::Type<DB>,
{
    fn type_info() -> <DB as sqlx::Database>::TypeInfo {
        // TEXT columns only
        <&str as sqlx::Type<DB>>::type_info()
    }
}
impl<'r, DB: sqlx::Database> sqlx::Decode<'r, DB> for Timestamp
where
    &'r str: sqlx::Decode<'r, DB>,
{
    fn decode(value: <DB as sqlx::Database>::ValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let value = <&str as sqlx::Decode<DB>>::decode(value)?;
        Ok(Timestamp::from_iso_string(value)?)
    }
}

/// UTC offset used to decide which calendar day an instant falls on.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "String")]
pub struct CalendarOffset(pub FixedOffset);

impl Default for CalendarOffset {
    fn default() -> Self {
        Self(FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap_or(Utc.fix()))
    }
}
impl FromStr for CalendarOffset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "Z" || s == "UTC" {
            return Ok(CalendarOffset(Utc.fix()));
        }
        FixedOffset::from_str(s)
            .map(CalendarOffset)
            .map_err(|e| anyhow!("invalid calendar offset '{s}': {e}"))
    }
}
impl TryFrom<String> for CalendarOffset {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

pub(crate) fn datetime_str(iso_date_str: Option<&str>) -> String {
    let Some(s) = iso_date_str else {
        return "---".to_string()
    };
    if let Ok(dt) = Timestamp::from_iso_string(s) {
        dt.to_display_string()
    } else {
        s.to_string()
    }
}
