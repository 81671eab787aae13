use rocket::{Build, Rocket, State};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::serde::{Deserialize, Serialize};
use sqlx::FromRow;
use crate::auth::{Actor, Coordinator};
use crate::db::DbPool;
use crate::impl_sqlx_json_text_type_and_decode;
use crate::util::sqlx_to_custom_error;

pub type ClubId = i64;

#[derive(Serialize, Deserialize, FromRow, Clone, Debug, PartialEq)]
pub struct ClubRecord {
    pub id: ClubId,
    pub name: String,
    pub image: Option<String>,
    #[serde(default)]
    pub description: String,
}
impl ClubRecord {
    pub fn to_ref(&self) -> ClubRef {
        ClubRef {
            id: self.id,
            name: self.name.clone(),
            image: self.image.clone(),
        }
    }
}

/// Club as listed on an event.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ClubRef {
    #[serde(alias = "_id")]
    pub id: ClubId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Hosting clubs of an event, primary club first.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ClubRefs(pub Vec<ClubRef>);
impl_sqlx_json_text_type_and_decode!(ClubRefs);

impl ClubRefs {
    pub fn primary(&self) -> Option<&ClubRef> {
        self.0.first()
    }
    pub fn contains(&self, club_id: ClubId) -> bool {
        self.0.iter().any(|c| c.id == club_id)
    }
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ClubList {
    pub clubs: Vec<ClubRecord>,
}

pub async fn list_clubs(db: &DbPool) -> Result<Vec<ClubRecord>, sqlx::Error> {
    sqlx::query_as::<_, ClubRecord>("SELECT * FROM clubs ORDER BY name")
        .fetch_all(&db.0)
        .await
}
pub async fn load_club(club_id: ClubId, db: &DbPool) -> Result<ClubRecord, sqlx::Error> {
    sqlx::query_as::<_, ClubRecord>("SELECT * FROM clubs WHERE id=?")
        .bind(club_id)
        .fetch_one(&db.0)
        .await
}
pub async fn save_club(club: &ClubRecord, db: &DbPool) -> Result<ClubId, sqlx::Error> {
    let id: (ClubId, ) = sqlx::query_as("INSERT INTO clubs (name, image, description) VALUES (?, ?, ?)
                ON CONFLICT(name) DO UPDATE SET image=excluded.image, description=excluded.description
                RETURNING id")
        .bind(&club.name)
        .bind(&club.image)
        .bind(&club.description)
        .fetch_one(&db.0)
        .await?;
    Ok(id.0)
}

#[get("/api/v1/club")]
async fn get_clubs(_actor: Actor, db: &State<DbPool>) -> Result<Json<ClubList>, Custom<String>> {
    let clubs = list_clubs(db).await.map_err(sqlx_to_custom_error)?;
    Ok(Json(ClubList { clubs }))
}
#[get("/api/v1/club/<club_id>")]
async fn get_club(club_id: ClubId, _actor: Actor, db: &State<DbPool>) -> Result<Json<ClubRecord>, Custom<String>> {
    let club = load_club(club_id, db).await.map_err(sqlx_to_custom_error)?;
    Ok(Json(club))
}
/// Clubs a coordinator can co-list on an event, everyone but their own club.
#[get("/api/v1/club/collateral")]
async fn get_collateral_clubs(coordinator: Coordinator, db: &State<DbPool>) -> Result<Json<ClubList>, Custom<String>> {
    let clubs = list_clubs(db).await.map_err(sqlx_to_custom_error)?
        .into_iter()
        .filter(|c| c.id != coordinator.club.id)
        .collect();
    Ok(Json(ClubList { clubs }))
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
            get_clubs,
            get_club,
            get_collateral_clubs,
        ])
}
