use chrono::FixedOffset;
use clubhub_proc_macros::ChangedFields;
use itertools::Itertools;
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::serde::{Deserialize, Serialize};
use rocket::{Build, Rocket, State};
use sqlx::{query, query_as, FromRow};
use crate::auth::{Actor, Coordinator};
use crate::club::{list_clubs, ClubId, ClubRecord, ClubRef, ClubRefs};
use crate::db::DbPool;
use crate::timeline::Scheduled;
use crate::timestamp::{DayBound, Timestamp};
use crate::util::{anyhow_to_custom_error, event_to_custom_error, sqlx_to_anyhow, sqlx_to_custom_error};
use crate::AppConfig;

pub type EventId = i64;

#[derive(thiserror::Error, Debug)]
pub enum EventError {
    #[error("event name must not be empty")]
    EmptyName,
    #[error("invalid {field}: {reason}")]
    InvalidDate { field: &'static str, reason: String },
    #[error("event ends ({end}) before it starts ({start})")]
    EndBeforeStart { start: String, end: String },
    #[error("unknown club id: {0}")]
    UnknownClub(ClubId),
    #[error("nothing to update")]
    NothingToUpdate,
    #[error("only coordinators of the primary club can modify this event")]
    NotOwner,
}

#[derive(Serialize, Deserialize, FromRow, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: EventId,
    #[serde(alias = "eventName")]
    pub name: String,
    pub description: Option<String>,
    pub photo: Option<String>,
    pub venue: Option<String>,
    pub duration: Option<String>,
    pub category: Option<String>,
    pub max_points: Option<i64>,
    pub number_of_winners: Option<i64>,
    #[serde(alias = "participantsCount")]
    pub participants: Option<u32>,
    pub date: Timestamp,
    pub end_date: Timestamp,
    #[serde(rename = "clubIds")]
    pub clubs: ClubRefs,
    #[serde(default)]
    pub created: Option<chrono::DateTime<chrono::Utc>>,
}
impl EventRecord {
    pub fn is_hosted_by(&self, club_id: ClubId) -> bool {
        self.clubs.contains(club_id)
    }
    pub fn is_owned_by(&self, club_id: ClubId) -> bool {
        self.clubs.primary().is_some_and(|c| c.id == club_id)
    }
}
impl Scheduled for EventRecord {
    type Id = EventId;

    fn id(&self) -> EventId {
        self.id
    }
    fn starts(&self) -> Timestamp {
        self.date
    }
    fn ends(&self) -> Timestamp {
        self.end_date
    }
    fn participants(&self) -> Option<u32> {
        self.participants
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct EventList {
    pub events: Vec<EventRecord>,
}

/// Event as submitted by the create form. `club_ids` lists the collateral
/// clubs, the coordinator's own club is always the primary one.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PostedEvent {
    #[serde(alias = "eventName")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub max_points: Option<i64>,
    #[serde(default)]
    pub number_of_winners: Option<i64>,
    #[serde(default, alias = "participantsCount")]
    pub participants: Option<u32>,
    pub date: String,
    pub end_date: String,
    #[serde(default)]
    pub club_ids: Vec<ClubId>,
}

#[derive(Serialize, Deserialize, ChangedFields, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct EventPatch {
    #[serde(default, alias = "eventName")]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub max_points: Option<i64>,
    #[serde(default)]
    pub number_of_winners: Option<i64>,
    #[serde(default, alias = "participantsCount")]
    pub participants: Option<u32>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub club_ids: Option<Vec<ClubId>>,
}

fn parse_date(field: &'static str, value: &str, offset: &FixedOffset, bound: DayBound) -> Result<Timestamp, EventError> {
    Timestamp::parse_event_date(value, offset, bound)
        .map_err(|e| EventError::InvalidDate { field, reason: e.to_string() })
}
fn check_window(date: Timestamp, end_date: Timestamp) -> Result<(), EventError> {
    if end_date < date {
        return Err(EventError::EndBeforeStart { start: date.to_iso_string(), end: end_date.to_iso_string() });
    }
    Ok(())
}
fn check_name(name: &str) -> Result<String, EventError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EventError::EmptyName);
    }
    Ok(name.to_string())
}

/// Hosting clubs with `primary` first, followed by the known collateral clubs
/// in request order. Repeated ids and the primary club itself are skipped.
pub fn hosting_clubs(primary: &ClubRef, collateral: &[ClubId], clubs: &[ClubRecord]) -> Result<ClubRefs, EventError> {
    let primary = clubs.iter().find(|c| c.id == primary.id)
        .map(|c| c.to_ref())
        .unwrap_or_else(|| primary.clone());
    let mut refs = vec![primary];
    for club_id in collateral.iter().unique() {
        if refs.iter().any(|c| c.id == *club_id) {
            continue;
        }
        let club = clubs.iter().find(|c| c.id == *club_id).ok_or(EventError::UnknownClub(*club_id))?;
        refs.push(club.to_ref());
    }
    Ok(ClubRefs(refs))
}

impl PostedEvent {
    pub fn into_record(self, primary: &ClubRef, clubs: &[ClubRecord], offset: &FixedOffset) -> Result<EventRecord, EventError> {
        let name = check_name(&self.name)?;
        let date = parse_date("date", &self.date, offset, DayBound::Start)?;
        let end_date = parse_date("endDate", &self.end_date, offset, DayBound::End)?;
        check_window(date, end_date)?;
        Ok(EventRecord {
            id: 0,
            name,
            description: self.description,
            photo: self.photo,
            venue: self.venue,
            duration: self.duration,
            category: self.category,
            max_points: self.max_points,
            number_of_winners: self.number_of_winners,
            participants: self.participants,
            date,
            end_date,
            clubs: hosting_clubs(primary, &self.club_ids, clubs)?,
            created: None,
        })
    }
}

impl EventPatch {
    /// Validates the whole patch first, `event` is left untouched on error.
    pub fn apply(self, event: &mut EventRecord, clubs: &[ClubRecord], offset: &FixedOffset) -> Result<(), EventError> {
        if !self.has_changes() {
            return Err(EventError::NothingToUpdate);
        }
        let name = self.name.as_deref().map(check_name).transpose()?;
        let date = match &self.date {
            Some(date) => parse_date("date", date, offset, DayBound::Start)?,
            None => event.date,
        };
        let end_date = match &self.end_date {
            Some(end_date) => parse_date("endDate", end_date, offset, DayBound::End)?,
            None => event.end_date,
        };
        check_window(date, end_date)?;
        let hosts = match &self.club_ids {
            Some(club_ids) => {
                let primary = event.clubs.primary().cloned().ok_or(EventError::NotOwner)?;
                Some(hosting_clubs(&primary, club_ids, clubs)?)
            }
            None => None,
        };
        if let Some(name) = name {
            event.name = name;
        }
        if let Some(hosts) = hosts {
            event.clubs = hosts;
        }
        event.date = date;
        event.end_date = end_date;
        macro_rules! assign {
            ($($fld:ident),+) => {
                $(
                    if let Some(val) = self.$fld { event.$fld = Some(val); }
                )+
            };
        }
        assign!(description, photo, venue, duration, category, max_points, number_of_winners, participants);
        Ok(())
    }
}

/// Lists events ordered by start, optionally only those hosted by `club_id`.
pub async fn load_events(club_id: Option<ClubId>, db: &DbPool) -> Result<Vec<EventRecord>, sqlx::Error> {
    let mut events = match club_id {
        Some(club_id) => sqlx::query_as::<_, EventRecord>("SELECT * FROM events
                    WHERE EXISTS (SELECT 1 FROM json_each(events.clubs) WHERE json_extract(json_each.value, '$.id') = ?)")
            .bind(club_id)
            .fetch_all(&db.0)
            .await?,
        None => sqlx::query_as::<_, EventRecord>("SELECT * FROM events")
            .fetch_all(&db.0)
            .await?,
    };
    // dates may carry different offsets, text order is not chronological
    events.sort_by_key(|e| (e.date, e.id));
    Ok(events)
}
pub async fn load_event(event_id: EventId, db: &DbPool) -> Result<EventRecord, sqlx::Error> {
    sqlx::query_as::<_, EventRecord>("SELECT * FROM events WHERE id=?")
        .bind(event_id)
        .fetch_one(&db.0)
        .await
}
pub async fn save_event(event: &EventRecord, db: &DbPool) -> anyhow::Result<EventId> {
    let clubs = event.clubs.to_json()?;
    let id = if event.id > 0 {
        query("UPDATE events SET name=?, description=?, photo=?, venue=?, duration=?, category=?,
                    max_points=?, number_of_winners=?, participants=?, date=?, end_date=?, clubs=?
                WHERE id=?")
            .bind(&event.name)
            .bind(&event.description)
            .bind(&event.photo)
            .bind(&event.venue)
            .bind(&event.duration)
            .bind(&event.category)
            .bind(event.max_points)
            .bind(event.number_of_winners)
            .bind(event.participants)
            .bind(event.date.to_iso_string())
            .bind(event.end_date.to_iso_string())
            .bind(clubs)
            .bind(event.id)
            .execute(&db.0)
            .await.map_err(sqlx_to_anyhow)?;
        event.id
    } else {
        let id: (EventId, ) = query_as("INSERT INTO events
                    (name, description, photo, venue, duration, category, max_points, number_of_winners,
                     participants, date, end_date, clubs)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id")
            .bind(&event.name)
            .bind(&event.description)
            .bind(&event.photo)
            .bind(&event.venue)
            .bind(&event.duration)
            .bind(&event.category)
            .bind(event.max_points)
            .bind(event.number_of_winners)
            .bind(event.participants)
            .bind(event.date.to_iso_string())
            .bind(event.end_date.to_iso_string())
            .bind(clubs)
            .fetch_one(&db.0)
            .await.map_err(sqlx_to_anyhow)?;
        info!("Event created, id: {}, name: {}", id.0, event.name);
        id.0
    };
    Ok(id)
}
async fn drop_event(event_id: EventId, db: &DbPool) -> Result<(), sqlx::Error> {
    let res = query("DELETE FROM events WHERE id=?")
        .bind(event_id)
        .execute(&db.0).await?;
    if res.rows_affected() == 0 {
        return Err(sqlx::Error::RowNotFound);
    }
    Ok(())
}

#[derive(Debug, FromForm)]
struct EventFilter {
    #[field(name = "clubId")]
    club_id: Option<ClubId>,
}

#[get("/api/v1/club/events?<filter..>")]
async fn get_events(filter: EventFilter, _actor: Actor, db: &State<DbPool>) -> Result<Json<EventList>, Custom<String>> {
    let events = load_events(filter.club_id, db).await.map_err(sqlx_to_custom_error)?;
    Ok(Json(EventList { events }))
}
#[get("/api/v1/club/events/<event_id>")]
async fn get_event(event_id: EventId, _actor: Actor, db: &State<DbPool>) -> Result<Json<EventRecord>, Custom<String>> {
    let event = load_event(event_id, db).await.map_err(sqlx_to_custom_error)?;
    Ok(Json(event))
}
#[post("/api/v1/club/events", data = "<posted_event>")]
async fn post_event(posted_event: Json<PostedEvent>, coordinator: Coordinator, cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<Json<EventRecord>, Custom<String>> {
    let clubs = list_clubs(db).await.map_err(sqlx_to_custom_error)?;
    let event = posted_event.into_inner()
        .into_record(&coordinator.club, &clubs, cfg.offset())
        .map_err(event_to_custom_error)?;
    let event_id = save_event(&event, db).await.map_err(anyhow_to_custom_error)?;
    info!("Coordinator {} created event {event_id} for club {}", coordinator.actor.email, coordinator.club.name);
    let reloaded_event = load_event(event_id, db).await.map_err(sqlx_to_custom_error)?;
    Ok(Json(reloaded_event))
}
#[patch("/api/v1/club/events/<event_id>", data = "<patch>")]
async fn patch_event(event_id: EventId, patch: Json<EventPatch>, coordinator: Coordinator, cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<Json<EventRecord>, Custom<String>> {
    let mut event = load_event(event_id, db).await.map_err(sqlx_to_custom_error)?;
    if !event.is_owned_by(coordinator.club.id) {
        return Err(event_to_custom_error(EventError::NotOwner));
    }
    let patch = patch.into_inner();
    let changed = patch.changed_fields();
    let clubs = list_clubs(db).await.map_err(sqlx_to_custom_error)?;
    patch.apply(&mut event, &clubs, cfg.offset()).map_err(event_to_custom_error)?;
    save_event(&event, db).await.map_err(anyhow_to_custom_error)?;
    info!("Event {event_id} updated by {}, fields: {}", coordinator.actor.email, changed.join(", "));
    let reloaded_event = load_event(event_id, db).await.map_err(sqlx_to_custom_error)?;
    Ok(Json(reloaded_event))
}
#[delete("/api/v1/club/events/<event_id>")]
async fn delete_event(event_id: EventId, coordinator: Coordinator, db: &State<DbPool>) -> Result<Status, Custom<String>> {
    let event = load_event(event_id, db).await.map_err(sqlx_to_custom_error)?;
    if !event.is_owned_by(coordinator.club.id) {
        return Err(event_to_custom_error(EventError::NotOwner));
    }
    drop_event(event_id, db).await.map_err(sqlx_to_custom_error)?;
    info!("Event {event_id} deleted by {}", coordinator.actor.email);
    Ok(Status::NoContent)
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
            get_events,
            get_event,
            post_event,
            patch_event,
            delete_event,
        ])
}
