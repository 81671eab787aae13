#[macro_use] extern crate rocket;

use std::collections::HashMap;
use std::sync::RwLock;
use chrono::FixedOffset;
use rocket::fairing::AdHoc;
use rocket::fs::FileServer;
use rocket::State;
use rocket_dyn_templates::{Template, context, handlebars};
use rocket_dyn_templates::handlebars::{Handlebars, Helper};
use serde::Deserialize;
use crate::auth::Actor;
use crate::db::{DbPool, DbPoolFairing};
use crate::event::load_events;
use crate::timeline::{classify, upcoming_preview};
use crate::timestamp::{datetime_str, CalendarOffset, Timestamp};

#[cfg(test)]
mod tests;
mod auth;
mod club;
mod dashboard;
mod db;
mod event;
mod seed;
mod timeline;
mod timestamp;
mod util;

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
struct AppConfig {
    public_url: String,
    calendar_utc_offset: CalendarOffset,
    session_ttl_hours: i64,
    demo_data: bool,
}
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            public_url: "http://localhost:8000".to_string(),
            calendar_utc_offset: CalendarOffset::default(),
            session_ttl_hours: 24,
            demo_data: false,
        }
    }
}
impl AppConfig {
    fn offset(&self) -> &FixedOffset {
        &self.calendar_utc_offset.0
    }
    fn demo_enabled(&self) -> bool {
        self.demo_data || cfg!(test)
    }
}

struct Session {
    actor: Actor,
}
#[derive(Eq, Hash, PartialEq, Clone, Debug)]
struct SessionId(String);

struct AppState {
    sessions: HashMap<SessionId, Session>,
}
impl AppState {
    fn new() -> Self {
        Self {
            sessions: Default::default(),
        }
    }
    fn purge_expired(&mut self, now: Timestamp) {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.actor.exp >= now);
        let purged = before - self.sessions.len();
        if purged > 0 {
            debug!("Purged {purged} expired sessions");
        }
    }
}
type SharedAppState = RwLock<AppState>;

#[get("/")]
async fn index(actor: Option<Actor>, cfg: &State<AppConfig>, db: &State<DbPool>) -> Template {
    let now = Timestamp::now();
    let events = load_events(None, db).await.unwrap_or_else(|err| {
        error!("Failed to fetch events for index page: {err}");
        vec![]
    });
    let buckets = classify(&events, now);
    let upcoming = upcoming_preview(&buckets.upcoming, now);
    Template::render("index", context! {
        actor,
        upcoming,
        ongoing: &buckets.ongoing,
        demo: cfg.demo_enabled(),
    })
}

#[launch]
fn rocket() -> _ {
    let rocket = rocket::build()
        .attach(Template::custom(|engines| {
            let handlebars = &mut engines.handlebars;

            handlebars.register_helper("stringify",
                                       Box::new(|h: &Helper, _r: &Handlebars, _: &handlebars::Context, _rc: &mut handlebars::RenderContext, out: &mut dyn handlebars::Output| -> handlebars::HelperResult {
                                           let param = h.param(0).ok_or(handlebars::RenderErrorReason::ParamNotFoundForIndex("stringify", 0))?;
                                           let json = serde_json::to_string(param.value()).unwrap_or_else(|_| "Invalid JSON".to_string());
                                           out.write(json.as_ref())?;
                                           Ok(())
                                       }));
            handlebars.register_helper("datetime",
                                       Box::new(|h: &Helper, _r: &Handlebars, _: &handlebars::Context, _rc: &mut handlebars::RenderContext, out: &mut dyn handlebars::Output| -> handlebars::HelperResult {
                                           let val = h.param(0).ok_or(handlebars::RenderErrorReason::ParamNotFoundForIndex("datetime", 0))?.value();
                                           let s = datetime_str(val.as_str());
                                           out.write(&s)?;
                                           Ok(())
                                       }));
        }))
        .attach(DbPoolFairing())
        .attach(AdHoc::config::<AppConfig>())
        .mount("/", FileServer::from("./static"))
        .mount("/", routes![
            index,
        ]);
    let rocket = auth::extend(rocket);
    let rocket = club::extend(rocket);
    let rocket = event::extend(rocket);
    let rocket = dashboard::extend(rocket);
    let rocket = seed::extend(rocket);

    rocket.manage(SharedAppState::new(AppState::new()))
}
