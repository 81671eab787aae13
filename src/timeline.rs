//! Temporal views over event lists: upcoming / ongoing / past buckets,
//! calendar day coloring, the six month participation trend and the
//! events of a selected day.
//!
//! Everything here is a pure function of the events and of `now`, which the
//! caller samples once per request.

use chrono::{Datelike, FixedOffset, NaiveDate, TimeDelta};
use itertools::Itertools;
use log::{debug, warn};
use rocket::serde::Serialize;
use crate::timestamp::Timestamp;

pub const TREND_MONTHS: i32 = 6;
pub const NEAR_EVENT_DAYS: i64 = 3;
pub const UPCOMING_PREVIEW_LEN: usize = 4;

/// What the timeline needs to know about an event.
pub trait Scheduled {
    type Id: PartialEq + Eq + std::hash::Hash + Clone;

    fn id(&self) -> Self::Id;
    fn starts(&self) -> Timestamp;
    fn ends(&self) -> Timestamp;
    /// Reported attendance, `None` when nobody recorded it.
    fn participants(&self) -> Option<u32>;

    fn is_well_formed(&self) -> bool {
        self.starts() <= self.ends()
    }
    fn calendar_day(&self, offset: &FixedOffset) -> NaiveDate {
        self.starts().calendar_day(offset)
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Upcoming,
    Ongoing,
    Past,
}

impl Bucket {
    /// Exclusive placement of a well-formed event relative to `now`.
    /// An event starting or ending exactly at `now` is ongoing.
    pub fn of<E: Scheduled>(event: &E, now: Timestamp) -> Option<Bucket> {
        if !event.is_well_formed() {
            return None;
        }
        if event.ends() < now {
            Some(Bucket::Past)
        } else if event.starts() <= now {
            Some(Bucket::Ongoing)
        } else {
            Some(Bucket::Upcoming)
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct Buckets<E> {
    pub upcoming: Vec<E>,
    pub ongoing: Vec<E>,
    pub past: Vec<E>,
}

impl<E> Default for Buckets<E> {
    fn default() -> Self {
        Self { upcoming: vec![], ongoing: vec![], past: vec![] }
    }
}

impl<E: Scheduled> Buckets<E> {
    /// Upcoming, ongoing and past events chained in that order.
    pub fn iter(&self) -> impl Iterator<Item = &E> {
        self.upcoming.iter().chain(self.ongoing.iter()).chain(self.past.iter())
    }
    pub fn len(&self) -> usize {
        self.upcoming.len() + self.ongoing.len() + self.past.len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn classify<E: Scheduled + Clone>(events: &[E], now: Timestamp) -> Buckets<E> {
    let mut buckets = Buckets::default();
    for event in events {
        match Bucket::of(event, now) {
            Some(Bucket::Upcoming) => buckets.upcoming.push(event.clone()),
            Some(Bucket::Ongoing) => buckets.ongoing.push(event.clone()),
            Some(Bucket::Past) => buckets.past.push(event.clone()),
            None => {
                warn!("Skipping event with end before start, start: {}, end: {}",
                    event.starts().to_iso_string(), event.ends().to_iso_string());
            }
        }
    }
    debug!("Classified {} of {} events", buckets.len(), events.len());
    buckets
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DayCategory {
    Upcoming,
    Ongoing,
    Past,
    None,
}

/// Color of a calendar cell. Upcoming wins over ongoing, ongoing over past.
pub fn color_of<E: Scheduled>(day: NaiveDate, buckets: &Buckets<E>, offset: &FixedOffset) -> DayCategory {
    let on_day = |events: &[E]| events.iter().any(|e| e.calendar_day(offset) == day);
    if on_day(&buckets.upcoming) {
        DayCategory::Upcoming
    } else if on_day(&buckets.ongoing) {
        DayCategory::Ongoing
    } else if on_day(&buckets.past) {
        DayCategory::Past
    } else {
        DayCategory::None
    }
}

/// Events starting on `day`, first occurrence wins when an id repeats.
pub fn events_on<E: Scheduled + Clone>(day: NaiveDate, buckets: &Buckets<E>, offset: &FixedOffset) -> Vec<E> {
    buckets.iter()
        .filter(|e| e.calendar_day(offset) == day)
        .unique_by(|e| e.id())
        .cloned()
        .collect()
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MonthBucket {
    pub label: String,
    /// 0 = January
    pub month_index: u32,
    pub year: i32,
    pub participants_total: u64,
    pub events: u32,
    /// Events in this month without a participant figure.
    pub unreported_events: u32,
}

/// (year, zero based month) `back` months before the given month,
/// `None` when the year leaves the `i32` range.
fn months_back(year: i32, month0: u32, back: i64) -> Option<(i32, u32)> {
    let total = i64::from(year) * 12 + i64::from(month0) - back;
    let year = i32::try_from(total.div_euclid(12)).ok()?;
    Some((year, total.rem_euclid(12) as u32))
}

fn month_label(year: i32, month0: u32) -> String {
    NaiveDate::from_ymd_opt(year, month0 + 1, 1)
        .map(|d| d.format("%b").to_string())
        .unwrap_or_default()
}

/// Participation per month for the trailing six months, oldest first,
/// ending with the month of `now`.
pub fn aggregate<E: Scheduled>(events: &[E], now: Timestamp, offset: &FixedOffset) -> Vec<MonthBucket> {
    let today = now.calendar_day(offset);
    let mut months = (0..TREND_MONTHS).rev()
        .filter_map(|back| months_back(today.year(), today.month0(), i64::from(back)))
        .map(|(year, month_index)| {
            MonthBucket {
                label: month_label(year, month_index),
                month_index,
                year,
                participants_total: 0,
                events: 0,
                unreported_events: 0,
            }
        })
        .collect::<Vec<_>>();
    for event in events {
        let day = event.calendar_day(offset);
        let Some(month) = months.iter_mut().find(|m| m.month_index == day.month0() && m.year == day.year()) else {
            continue;
        };
        month.events += 1;
        match event.participants() {
            Some(n) => month.participants_total += u64::from(n),
            None => month.unreported_events += 1,
        }
    }
    months
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub day: u32,
    pub category: DayCategory,
    pub is_today: bool,
    pub has_events: bool,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CalendarMonth {
    pub year: i32,
    /// 1 = January
    pub month: u32,
    pub label: String,
    /// Empty cells before the 1st, Sunday first.
    pub leading_blanks: u32,
    pub days: Vec<CalendarDay>,
}

/// Month grid for `year`/`month` (1 based). `month` outside 1..=12 wraps into
/// the neighbouring years, so month navigation can just add or subtract.
/// Returns `None` for months outside the range chrono can represent.
pub fn calendar_month<E: Scheduled>(year: i32, month: i32, buckets: &Buckets<E>, today: NaiveDate, offset: &FixedOffset) -> Option<CalendarMonth> {
    let (year, month0) = months_back(year, 0, 1 - i64::from(month))?;
    let first = NaiveDate::from_ymd_opt(year, month0 + 1, 1)?;
    let (next_year, next_month0) = months_back(year, month0, -1)?;
    let next_first = NaiveDate::from_ymd_opt(next_year, next_month0 + 1, 1)?;
    let days = first.iter_days()
        .take_while(|d| *d < next_first)
        .map(|date| {
            let category = color_of(date, buckets, offset);
            CalendarDay {
                date,
                day: date.day(),
                category,
                is_today: date == today,
                has_events: category != DayCategory::None,
            }
        })
        .collect();
    Some(CalendarMonth {
        year,
        month: month0 + 1,
        label: first.format("%B %Y").to_string(),
        leading_blanks: first.weekday().num_days_from_sunday(),
        days,
    })
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Completed,
    Today,
    Upcoming,
}

/// Badge shown next to an event in the day view.
pub fn status_of<E: Scheduled>(event: &E, now: Timestamp, offset: &FixedOffset) -> EventStatus {
    if event.ends() < now {
        EventStatus::Completed
    } else if event.calendar_day(offset) == now.calendar_day(offset) {
        EventStatus::Today
    } else {
        EventStatus::Upcoming
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingCard<E> {
    pub event: E,
    pub days_until: i64,
    pub hours_until: i64,
    pub is_near: bool,
}

/// First few upcoming events with a countdown.
pub fn upcoming_preview<E: Scheduled + Clone>(upcoming: &[E], now: Timestamp) -> Vec<UpcomingCard<E>> {
    upcoming.iter()
        .sorted_by_key(|e| e.starts())
        .take(UPCOMING_PREVIEW_LEN)
        .map(|event| {
            let until = event.starts().0.signed_duration_since(now.0);
            UpcomingCard {
                event: event.clone(),
                days_until: until.num_days(),
                hours_until: (until - TimeDelta::days(until.num_days())).num_hours(),
                is_near: until < TimeDelta::days(NEAR_EVENT_DAYS),
            }
        })
        .collect()
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OngoingProgress<E> {
    pub event: E,
    pub progress_percent: u8,
    pub hours_remaining: i64,
    pub minutes_remaining: i64,
}

pub fn ongoing_progress<E: Scheduled + Clone>(ongoing: &[E], now: Timestamp) -> Vec<OngoingProgress<E>> {
    ongoing.iter()
        .map(|event| {
            let total = event.ends().0.signed_duration_since(event.starts().0).num_milliseconds();
            let elapsed = now.0.signed_duration_since(event.starts().0).num_milliseconds();
            let progress_percent = if total <= 0 {
                100
            } else {
                (elapsed.clamp(0, total) * 100 / total) as u8
            };
            let remaining = event.ends().0.signed_duration_since(now.0);
            OngoingProgress {
                event: event.clone(),
                progress_percent,
                hours_remaining: remaining.num_hours(),
                minutes_remaining: remaining.num_minutes() % 60,
            }
        })
        .collect()
}
