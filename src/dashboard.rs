use chrono::{Datelike, FixedOffset, NaiveDate};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::serde::Serialize;
use rocket::{Build, Rocket, State};
use rocket_dyn_templates::{context, Template};
use crate::auth::Coordinator;
use crate::club::ClubRef;
use crate::db::DbPool;
use crate::event::{load_events, EventRecord};
use crate::timeline::{aggregate, calendar_month, classify, events_on, ongoing_progress, status_of, upcoming_preview,
                      Buckets, CalendarDay, CalendarMonth, EventStatus, MonthBucket, OngoingProgress, UpcomingCard};
use crate::timestamp::Timestamp;
use crate::AppConfig;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_events: usize,
    /// Events the coordinator's club hosts or co-hosts.
    pub club_events: usize,
    pub total_participants: u64,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub now: Timestamp,
    pub club: ClubRef,
    #[serde(flatten)]
    pub buckets: Buckets<EventRecord>,
    pub upcoming_preview: Vec<UpcomingCard<EventRecord>>,
    pub ongoing_progress: Vec<OngoingProgress<EventRecord>>,
    pub participation: Vec<MonthBucket>,
    pub calendar: Option<CalendarMonth>,
    pub stats: DashboardStats,
}

/// Everything the coordinator dashboard shows, computed for a single `now`.
///
/// `events` are all visible events; the participation trend and the stats
/// narrow them down to the events of `club`. The calendar shows `month` of
/// `year`, defaulting to the month of `now`.
pub fn build_dashboard(events: &[EventRecord], club: &ClubRef, now: Timestamp, offset: &FixedOffset, year: Option<i32>, month: Option<i32>) -> DashboardView {
    let today = now.calendar_day(offset);
    let buckets = classify(events, now);
    let club_events = events.iter()
        .filter(|e| e.is_hosted_by(club.id))
        .cloned()
        .collect::<Vec<_>>();
    let participation = aggregate(&club_events, now, offset);
    let calendar = calendar_month(
        year.unwrap_or(today.year()),
        month.unwrap_or(today.month() as i32),
        &buckets,
        today,
        offset,
    );
    let stats = DashboardStats {
        total_events: events.len(),
        club_events: club_events.len(),
        total_participants: club_events.iter().filter_map(|e| e.participants).map(u64::from).sum(),
    };
    DashboardView {
        now,
        club: club.clone(),
        upcoming_preview: upcoming_preview(&buckets.upcoming, now),
        ongoing_progress: ongoing_progress(&buckets.ongoing, now),
        buckets,
        participation,
        calendar,
        stats,
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DayEvent {
    pub event: EventRecord,
    pub status: EventStatus,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DaySelection {
    pub date: NaiveDate,
    pub events: Vec<DayEvent>,
}

pub fn select_day(events: &[EventRecord], day: NaiveDate, now: Timestamp, offset: &FixedOffset) -> DaySelection {
    let buckets = classify(events, now);
    let events = events_on(day, &buckets, offset).into_iter()
        .map(|event| DayEvent {
            status: status_of(&event, now, offset),
            event,
        })
        .collect();
    DaySelection { date: day, events }
}

/// Rows of seven cells, Sunday first, padded with `None` on both ends.
pub fn calendar_weeks(calendar: &CalendarMonth) -> Vec<Vec<Option<CalendarDay>>> {
    let mut cells = vec![None; calendar.leading_blanks as usize];
    cells.extend(calendar.days.iter().cloned().map(Some));
    while cells.len() % 7 != 0 {
        cells.push(None);
    }
    cells.chunks(7).map(|week| week.to_vec()).collect()
}

/// Dashboard data is best effort, a failed read renders as no events.
async fn fetch_events(db: &DbPool) -> Vec<EventRecord> {
    match load_events(None, db).await {
        Ok(events) => events,
        Err(err) => {
            error!("Failed to fetch events for dashboard: {err}");
            vec![]
        }
    }
}

/// A requested month without a calendar lies outside the supported dates.
fn check_calendar(view: &DashboardView, year: Option<i32>, month: Option<i32>) -> Result<(), Custom<String>> {
    if view.calendar.is_none() && (year.is_some() || month.is_some()) {
        return Err(Custom(Status::BadRequest, format!("Month out of range, year: {year:?}, month: {month:?}")));
    }
    Ok(())
}

#[get("/api/v1/club/dashboard?<year>&<month>")]
async fn get_dashboard(year: Option<i32>, month: Option<i32>, coordinator: Coordinator, cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<Json<DashboardView>, Custom<String>> {
    let now = Timestamp::now();
    let events = fetch_events(db).await;
    let view = build_dashboard(&events, &coordinator.club, now, cfg.offset(), year, month);
    check_calendar(&view, year, month)?;
    Ok(Json(view))
}

#[get("/api/v1/club/calendar/<date>")]
async fn get_calendar_day(date: &str, _coordinator: Coordinator, cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<Json<DaySelection>, Custom<String>> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| Custom(Status::BadRequest, format!("Invalid date '{date}', expected YYYY-MM-DD: {e}")))?;
    let now = Timestamp::now();
    let events = fetch_events(db).await;
    Ok(Json(select_day(&events, day, now, cfg.offset())))
}

#[derive(Serialize)]
struct MonthLink {
    year: i32,
    month: i32,
}

#[get("/dashboard?<year>&<month>")]
async fn get_dashboard_page(year: Option<i32>, month: Option<i32>, coordinator: Coordinator, cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<Template, Custom<String>> {
    let now = Timestamp::now();
    let events = fetch_events(db).await;
    let view = build_dashboard(&events, &coordinator.club, now, cfg.offset(), year, month);
    check_calendar(&view, year, month)?;
    let calendar = view.calendar.as_ref();
    let weeks = calendar.map(calendar_weeks).unwrap_or_default();
    let prev_month = calendar.map(|c| MonthLink { year: c.year, month: c.month as i32 - 1 });
    let next_month = calendar.map(|c| MonthLink { year: c.year, month: c.month as i32 + 1 });
    Ok(Template::render("dashboard", context! {
        actor: &coordinator.actor,
        view: &view,
        weeks,
        prev_month,
        next_month,
    }))
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
            get_dashboard,
            get_calendar_day,
            get_dashboard_page,
        ])
}
