use std::fmt::{Display, Formatter};
use std::str::FromStr;
use anyhow::{anyhow, Context};
use chrono::TimeDelta;
use rand::Rng;
use reqwest::header::AUTHORIZATION;
use rocket::{Build, Request, Rocket, State};
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::outcome::try_outcome;
use rocket::request::{FromRequest, Outcome};
use rocket::response::{Debug, Redirect};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::serde::{Deserialize, Serialize};
use rocket_oauth2::{OAuth2, TokenResponse};
use serde_json::Value;
use sqlx::FromRow;
use crate::club::{load_club, ClubId, ClubRef};
use crate::db::DbPool;
use crate::timestamp::Timestamp;
use crate::util::sqlx_to_custom_error;
use crate::{impl_sqlx_text_type_and_decode, AppConfig, Session, SessionId, SharedAppState};

pub const SESSION_COOKIE: &str = "clubhub_session";
const SESSION_ID_LEN: usize = 40;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Coordinator,
}
impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Student => f.write_str("student"),
            Role::Coordinator => f.write_str("coordinator"),
        }
    }
}
impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "student" => Ok(Role::Student),
            "coordinator" => Ok(Role::Coordinator),
            _ => Err(anyhow!("unknown role: '{s}'")),
        }
    }
}
impl_sqlx_text_type_and_decode!(Role);

#[derive(Serialize, Deserialize, FromRow, Clone, Debug)]
pub struct UserRecord {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub club_id: Option<ClubId>,
}

/// Identity of the caller, resolved from the session on every request.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub club_id: Option<ClubId>,
    pub club_name: Option<String>,
    pub exp: Timestamp,
}
impl Actor {
    pub fn club(&self) -> Option<ClubRef> {
        let (Some(id), Some(name)) = (self.club_id, &self.club_name) else {
            return None;
        };
        Some(ClubRef { id, name: name.clone(), image: None })
    }
}

/// An actor holding the coordinator role of `club`.
#[derive(Clone, Debug)]
pub struct Coordinator {
    pub actor: Actor,
    pub club: ClubRef,
}

fn session_id_from_request(request: &Request<'_>) -> Option<SessionId> {
    if let Some(token) = request.headers().get_one("Authorization").and_then(|h| h.strip_prefix("Bearer ")) {
        return Some(SessionId(token.trim().to_string()));
    }
    request.cookies().get_private(SESSION_COOKIE).map(|c| SessionId(c.value().to_string()))
}

pub fn actor(session_id: &SessionId, state: &SharedAppState, now: Timestamp) -> Result<Actor, String> {
    let actor = state.read().map_err(|e| e.to_string())?
        .sessions.get(session_id).map(|s| s.actor.clone()).ok_or("Unknown session".to_string())?;
    if actor.exp < now {
        state.write().map_err(|e| e.to_string())?.sessions.remove(session_id);
        return Err("Session expired".to_string());
    }
    Ok(actor)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Actor {
    type Error = String;
    async fn from_request(request: &'r Request<'_>) -> Outcome<Actor, String> {
        let Some(session_id) = session_id_from_request(request) else {
            return Outcome::Error((Status::Unauthorized, "Login required".to_string()));
        };
        let Outcome::Success(state) = request.guard::<&State<SharedAppState>>().await else {
            return Outcome::Error((Status::InternalServerError, "Session state not managed".to_string()));
        };
        match actor(&session_id, state, Timestamp::now()) {
            Ok(actor) => Outcome::Success(actor),
            Err(e) => Outcome::Error((Status::Unauthorized, e)),
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Coordinator {
    type Error = String;
    async fn from_request(request: &'r Request<'_>) -> Outcome<Coordinator, String> {
        let actor = try_outcome!(request.guard::<Actor>().await);
        match (actor.role, actor.club()) {
            (Role::Coordinator, Some(club)) => Outcome::Success(Coordinator { actor, club }),
            _ => Outcome::Error((Status::Forbidden, "Club coordinator role required".to_string())),
        }
    }
}

pub fn generate_random_string(len: usize) -> String {
    const WOWELS: &[u8] = b"aeiouy";
    const CONSONANTS: &[u8] = b"bcdfghjklmnopqrstvwxz";
    let mut rng = rand::rng();
    (0..len)
        .map(|n| {
            let charset = if n % 2 == 0 { CONSONANTS } else { WOWELS };
            charset[rng.random_range(0..charset.len())] as char
        })
        .collect()
}

pub async fn load_user(email: &str, db: &DbPool) -> Result<Option<UserRecord>, sqlx::Error> {
    sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE email=?")
        .bind(email)
        .fetch_optional(&db.0)
        .await
}
pub async fn save_user(user: &UserRecord, db: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT OR REPLACE INTO users (email, name, role, club_id) VALUES (?, ?, ?, ?)")
        .bind(&user.email)
        .bind(&user.name)
        .bind(user.role.to_string())
        .bind(user.club_id)
        .execute(&db.0)
        .await?;
    Ok(())
}

/// Resolves the user's club and registers a new session for them.
async fn open_session(user: &UserRecord, cfg: &AppConfig, state: &SharedAppState, db: &DbPool) -> Result<(SessionId, Actor), Custom<String>> {
    let club = match user.club_id {
        Some(club_id) => Some(load_club(club_id, db).await.map_err(sqlx_to_custom_error)?),
        None => None,
    };
    let exp = Timestamp(Timestamp::now().0 + TimeDelta::hours(cfg.session_ttl_hours));
    let actor = Actor {
        email: user.email.clone(),
        name: user.name.clone(),
        role: user.role,
        club_id: club.as_ref().map(|c| c.id),
        club_name: club.map(|c| c.name),
        exp,
    };
    let session_id = SessionId(generate_random_string(SESSION_ID_LEN));
    let mut state = state.write().map_err(|e| Custom(Status::InternalServerError, e.to_string()))?;
    state.purge_expired(Timestamp::now());
    state.sessions.insert(session_id.clone(), Session { actor: actor.clone() });
    info!("User log in, email: {}, role: {}, club: {:?}", actor.email, actor.role, actor.club_name);
    Ok((session_id, actor))
}
fn set_session_cookie(cookies: &CookieJar<'_>, session_id: &SessionId) {
    cookies.add_private(
        Cookie::build((SESSION_COOKIE, session_id.0.clone()))
            .same_site(SameSite::Lax)
            .build()
    );
}

#[derive(Clone, serde::Serialize)]
struct UserInfo {
    name: String,
    email: String,
}
impl TryFrom<&GoogleUserInfo> for UserInfo {
    type Error = anyhow::Error;

    fn try_from(info: &GoogleUserInfo) -> Result<Self, Self::Error> {
        fn to_string(val: &Value) -> String {
            val.as_str().map(|s| s.to_string()).unwrap_or_default()
        }
        let email = to_string(&info.email);
        if email.is_empty() {
            return Err(anyhow!("User email must be set"));
        };
        Ok(Self {
            name: to_string(&info.name),
            email,
        })
    }
}

/// User information to be retrieved from the Google People API.
#[derive(serde::Deserialize)]
struct GoogleUserInfo {
    name: Value,
    email: Value,
}

#[get("/login")]
fn login(cfg: &State<AppConfig>) -> Redirect {
    // must be the same host as redirect_uri, otherwise the rocket-oauth2 state cookie check fails
    Redirect::to(format!("{}/login/google", cfg.public_url.trim_end_matches('/')))
}

#[get("/login/google")]
fn google_login(oauth2: OAuth2<GoogleUserInfo>, cookies: &CookieJar<'_>) -> Result<Redirect, Debug<rocket_oauth2::Error>> {
    Ok(oauth2.get_redirect(cookies, &["profile", "email"])?)
}

#[get("/auth/google")]
async fn google_auth(token: TokenResponse<GoogleUserInfo>, cookies: &CookieJar<'_>, cfg: &State<AppConfig>, state: &State<SharedAppState>, db: &State<DbPool>) -> Result<Redirect, Debug<anyhow::Error>> {
    let response = reqwest::Client::builder()
        .build()
        .context("failed to build reqwest client")?
        .get("https://www.googleapis.com/oauth2/v2/userinfo")
        .header(AUTHORIZATION, format!("Bearer {}", token.access_token()))
        .send()
        .await
        .context("failed to complete request")?;
    let google_user_info: GoogleUserInfo = response
        .json()
        .await
        .context("failed to deserialize response")?;
    let user_info = UserInfo::try_from(&google_user_info)?;
    let user = match load_user(&user_info.email, db).await.context("failed to load user")? {
        Some(user) => user,
        None => {
            let user = UserRecord {
                email: user_info.email.clone(),
                name: user_info.name.clone(),
                role: Role::Student,
                club_id: None,
            };
            save_user(&user, db).await.context("failed to enroll user")?;
            info!("New student enrolled: {}", user.email);
            user
        }
    };
    let (session_id, actor) = open_session(&user, cfg, state, db).await
        .map_err(|e| anyhow!("{}", e.1))?;
    set_session_cookie(cookies, &session_id);
    if actor.role == Role::Coordinator {
        Ok(Redirect::to("/dashboard"))
    } else {
        Ok(Redirect::to("/"))
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub token: String,
    pub actor: Actor,
}

/// Password-less login for demo deployments and tests.
#[get("/login/demo?<email>")]
async fn demo_login(email: &str, cookies: &CookieJar<'_>, cfg: &State<AppConfig>, state: &State<SharedAppState>, db: &State<DbPool>) -> Result<Json<LoginResponse>, Custom<String>> {
    if !cfg.demo_enabled() {
        return Err(Custom(Status::NotFound, "Demo login is disabled".to_string()));
    }
    let user = load_user(email, db).await.map_err(sqlx_to_custom_error)?
        .ok_or(Custom(Status::Unauthorized, format!("Unknown user: {email}")))?;
    let (session_id, actor) = open_session(&user, cfg, state, db).await?;
    set_session_cookie(cookies, &session_id);
    Ok(Json(LoginResponse { token: session_id.0, actor }))
}

#[get("/logout")]
fn logout(cookies: &CookieJar<'_>, state: &State<SharedAppState>) -> Redirect {
    if let Some(cookie) = cookies.get_private(SESSION_COOKIE) {
        if let Ok(mut state) = state.write() {
            state.sessions.remove(&SessionId(cookie.value().to_string()));
        }
        cookies.remove_private(SESSION_COOKIE);
    }
    Redirect::to("/")
}

#[get("/api/v1/me")]
fn get_me(actor: Actor) -> Json<Actor> {
    Json(actor)
}

pub fn extend(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket.mount("/", routes![
            login,
            google_login,
            google_auth,
            demo_login,
            logout,
            get_me,
        ])
        .attach(OAuth2::<GoogleUserInfo>::fairing("google"))
}
