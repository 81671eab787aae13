use std::fs;
use std::path::Path;
use anyhow::anyhow;
use chrono::FixedOffset;
use rocket::http::Status;
use rocket::response::Redirect;
use rocket::response::status::Custom;
use rocket::serde::Deserialize;
use rocket::{Build, Rocket, State};
use crate::auth::{save_user, Role, UserRecord};
use crate::club::{list_clubs, save_club, ClubRecord};
use crate::db::DbPool;
use crate::event::{load_events, save_event, PostedEvent};
use crate::util::{anyhow_to_custom_error, sqlx_to_anyhow};
use crate::AppConfig;

pub const DEMO_DATA_DIR: &str = "tests/data";

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct SeedData {
    pub clubs: Vec<SeedClub>,
    pub users: Vec<SeedUser>,
    pub events: Vec<SeedEvent>,
}
#[derive(Deserialize, Debug)]
pub struct SeedClub {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub description: String,
}
#[derive(Deserialize, Debug)]
pub struct SeedUser {
    pub email: String,
    pub name: String,
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default)]
    pub club: Option<String>,
}
fn default_role() -> Role {
    Role::Student
}
/// Demo event, `clubs` are club names with the primary club first.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SeedEvent {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub participants: Option<u32>,
    pub date: String,
    pub end_date: String,
    pub clubs: Vec<String>,
}

fn load_seed(content: &str) -> anyhow::Result<SeedData> {
    Ok(serde_yaml::from_str(content)?)
}
fn load_seed_file(file: &Path) -> anyhow::Result<SeedData> {
    info!("Loading demo data from file: {}", file.to_string_lossy());
    let content = fs::read_to_string(file)?;
    load_seed(&content)
}
pub(crate) fn load_seed_dir(data_dir: &str) -> anyhow::Result<Vec<SeedData>> {
    info!("Loading demo data from: {data_dir}");
    let mut seeds = Vec::new();
    for entry in fs::read_dir(data_dir)? {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                error!("Cannot read demo data dir: {data_dir} - {e}");
                return Err(anyhow!("{e}"))
            }
        };
        if !matches!(path.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")) {
            continue;
        }
        match load_seed_file(&path) {
            Ok(seed) => seeds.push(seed),
            Err(e) => {
                error!("Cannot read demo data file: {} - {e}", path.to_string_lossy());
                return Err(anyhow!("{e}"))
            }
        }
    }
    Ok(seeds)
}

fn club_by_name<'a>(clubs: &'a [ClubRecord], name: &str) -> anyhow::Result<&'a ClubRecord> {
    clubs.iter().find(|c| c.name == name).ok_or_else(|| anyhow!("Unknown club: {name}"))
}

/// Stores clubs, users and events of `seed`. Events whose name is already
/// taken are skipped, so loading the same data twice is harmless.
pub(crate) async fn apply_seed(seed: &SeedData, offset: &FixedOffset, db: &DbPool) -> anyhow::Result<()> {
    for club in &seed.clubs {
        save_club(&ClubRecord {
            id: 0,
            name: club.name.clone(),
            image: club.image.clone(),
            description: club.description.clone(),
        }, db).await.map_err(sqlx_to_anyhow)?;
    }
    let clubs = list_clubs(db).await.map_err(sqlx_to_anyhow)?;
    for user in &seed.users {
        let club_id = match &user.club {
            Some(name) => Some(club_by_name(&clubs, name)?.id),
            None => None,
        };
        if user.role == Role::Coordinator && club_id.is_none() {
            return Err(anyhow!("Coordinator {} has no club", user.email));
        }
        save_user(&UserRecord {
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            club_id,
        }, db).await.map_err(sqlx_to_anyhow)?;
    }
    let existing = load_events(None, db).await.map_err(sqlx_to_anyhow)?;
    for event in &seed.events {
        if existing.iter().any(|e| e.name == event.name) {
            debug!("Demo event already present: {}", event.name);
            continue;
        }
        let Some((primary, collateral)) = event.clubs.split_first() else {
            return Err(anyhow!("Event {} has no hosting club", event.name));
        };
        let primary = club_by_name(&clubs, primary)?.to_ref();
        let club_ids = collateral.iter()
            .map(|name| club_by_name(&clubs, name).map(|c| c.id))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let record = PostedEvent {
            name: event.name.clone(),
            description: event.description.clone(),
            venue: event.venue.clone(),
            category: event.category.clone(),
            participants: event.participants,
            date: event.date.clone(),
            end_date: event.end_date.clone(),
            club_ids,
            ..Default::default()
        }.into_record(&primary, &clubs, offset)?;
        save_event(&record, db).await?;
    }
    info!("Demo data loaded, clubs: {}, users: {}, events: {}", seed.clubs.len(), seed.users.len(), seed.events.len());
    Ok(())
}

#[get("/demo/create")]
async fn get_demo_create(cfg: &State<AppConfig>, db: &State<DbPool>) -> Result<Redirect, Custom<String>> {
    if !cfg.demo_enabled() {
        return Err(Custom(Status::NotFound, "Demo data is disabled".to_string()));
    }
    let seeds = load_seed_dir(DEMO_DATA_DIR).map_err(anyhow_to_custom_error)?;
    for seed in &seeds {
        apply_seed(seed, cfg.offset(), db).await.map_err(anyhow_to_custom_error)?;
    }
    Ok(Redirect::to("/"))
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
            get_demo_create,
        ])
}
