use chrono::TimeDelta;
use rocket::local::blocking::Client;
use rocket::http::{ContentType, Header, Status};
use serde_json::Value;
use crate::auth::LoginResponse;
use crate::club::{ClubId, ClubList};
use crate::db::DbPool;
use crate::event::{EventId, EventList, EventPatch, EventRecord, PostedEvent};
use crate::timestamp::Timestamp;

const GEEKS_COORDINATOR: &str = "coordinator@electrogeeks.example";
const ROBOTICS_COORDINATOR: &str = "coordinator@robotics.example";
const STUDENT: &str = "student@campus.example";

fn create_test_server() -> Client {
    let client = Client::tracked(super::rocket()).unwrap();
    {
        let resp = client.get("/demo/create").dispatch();
        assert_eq!(resp.status(), Status::SeeOther);
    }
    client
}

fn login(client: &Client, email: &str) -> Header<'static> {
    let resp = client.get(format!("/login/demo?email={email}")).dispatch();
    assert_eq!(resp.status(), Status::Ok);
    let login = resp.into_json::<LoginResponse>().unwrap();
    assert_eq!(login.actor.email, email);
    Header::new("Authorization", format!("Bearer {}", login.token))
}

fn club_id(client: &Client, auth: &Header<'static>, name: &str) -> ClubId {
    let resp = client.get("/api/v1/club").header(auth.clone()).dispatch();
    assert_eq!(resp.status(), Status::Ok);
    let clubs = resp.into_json::<ClubList>().unwrap();
    clubs.clubs.iter().find(|c| c.name == name).map(|c| c.id).unwrap()
}

fn shifted(delta: TimeDelta) -> String {
    Timestamp(Timestamp::now().0 + delta).to_iso_string()
}

fn post_event(client: &Client, auth: &Header<'static>, event: &PostedEvent) -> EventRecord {
    let resp = client.post("/api/v1/club/events")
        .header(auth.clone())
        .json(event)
        .dispatch();
    assert_eq!(resp.status(), Status::Ok);
    resp.into_json::<EventRecord>().unwrap()
}

fn ids(value: &Value) -> Vec<EventId> {
    value.as_array().unwrap().iter().filter_map(|e| e["id"].as_i64()).collect()
}

#[test]
fn login_required() {
    let client = create_test_server();
    for uri in ["/api/v1/me", "/api/v1/club", "/api/v1/club/events", "/api/v1/club/dashboard"] {
        let resp = client.get(uri).dispatch();
        assert_eq!(resp.status(), Status::Unauthorized, "{uri}");
    }
    let resp = client.get("/api/v1/me")
        .header(Header::new("Authorization", "Bearer nosuchsession"))
        .dispatch();
    assert_eq!(resp.status(), Status::Unauthorized);

    let resp = client.get("/login/demo?email=nobody@campus.example").dispatch();
    assert_eq!(resp.status(), Status::Unauthorized);
}

#[test]
fn index_page() {
    let client = create_test_server();
    let resp = client.get("/").dispatch();
    assert_eq!(resp.status(), Status::Ok);
    assert_eq!(resp.content_type(), Some(ContentType::HTML));
}

#[test]
fn student_cannot_manage_events() {
    let client = create_test_server();
    let student = login(&client, STUDENT);

    let resp = client.get("/api/v1/me").header(student.clone()).dispatch();
    assert_eq!(resp.status(), Status::Ok);
    let me = resp.into_json::<Value>().unwrap();
    assert_eq!(me["role"], "student");

    let resp = client.get("/api/v1/club/events").header(student.clone()).dispatch();
    assert_eq!(resp.status(), Status::Ok);

    let event = PostedEvent {
        name: "Hackathon".to_string(),
        date: "2030-01-01".to_string(),
        end_date: "2030-01-02".to_string(),
        ..Default::default()
    };
    let resp = client.post("/api/v1/club/events").header(student.clone()).json(&event).dispatch();
    assert_eq!(resp.status(), Status::Forbidden);

    let resp = client.get("/api/v1/club/dashboard").header(student.clone()).dispatch();
    assert_eq!(resp.status(), Status::Forbidden);
    let resp = client.get("/api/v1/club/collateral").header(student).dispatch();
    assert_eq!(resp.status(), Status::Forbidden);
}

#[test]
fn create_and_list_events() {
    let client = create_test_server();
    let geeks = login(&client, GEEKS_COORDINATOR);
    let robotics_id = club_id(&client, &geeks, "Robotics");
    let drama_id = club_id(&client, &geeks, "Drama");
    let geeks_id = club_id(&client, &geeks, "Electrogeeks");

    let resp = client.get("/api/v1/club/collateral").header(geeks.clone()).dispatch();
    let collateral = resp.into_json::<ClubList>().unwrap();
    assert!(collateral.clubs.iter().all(|c| c.id != geeks_id));
    assert_eq!(collateral.clubs.len(), 2);

    let posted = PostedEvent {
        name: "  Arduino Bootcamp ".to_string(),
        venue: Some("Lab 1".to_string()),
        date: "2030-01-01".to_string(),
        end_date: "2030-01-01".to_string(),
        club_ids: vec![robotics_id, geeks_id, robotics_id],
        ..Default::default()
    };
    let event = post_event(&client, &geeks, &posted);
    assert_eq!(event.name, "Arduino Bootcamp");
    assert_eq!(event.clubs.0.iter().map(|c| c.id).collect::<Vec<_>>(), vec![geeks_id, robotics_id]);
    assert_eq!(event.date, Timestamp::from_iso_string("2030-01-01T00:00:00+05:30").unwrap());
    assert_eq!(event.end_date, Timestamp::from_iso_string("2030-01-01T23:59:59.999+05:30").unwrap());
    assert!(event.participants.is_none());

    let resp = client.get(format!("/api/v1/club/events/{}", event.id)).header(geeks.clone()).dispatch();
    assert_eq!(resp.status(), Status::Ok);
    assert_eq!(resp.into_json::<EventRecord>().unwrap(), event);

    let resp = client.get("/api/v1/club/events").header(geeks.clone()).dispatch();
    let all = resp.into_json::<EventList>().unwrap().events;
    assert_eq!(all.len(), 4);
    assert!(all.windows(2).all(|w| w[0].date <= w[1].date));

    let resp = client.get(format!("/api/v1/club/events?clubId={robotics_id}")).header(geeks.clone()).dispatch();
    let robotics_events = resp.into_json::<EventList>().unwrap().events;
    let names = robotics_events.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["Line Follower Challenge", "Arduino Bootcamp"]);

    let resp = client.get(format!("/api/v1/club/events?clubId={drama_id}")).header(geeks.clone()).dispatch();
    let drama_events = resp.into_json::<EventList>().unwrap().events;
    assert_eq!(drama_events.len(), 1);

    let resp = client.get("/api/v1/club/events?clubId=4242").header(geeks.clone()).dispatch();
    assert!(resp.into_json::<EventList>().unwrap().events.is_empty());

    let resp = client.get("/api/v1/club/events/9999").header(geeks).dispatch();
    assert_eq!(resp.status(), Status::NotFound);
}

#[test]
fn reject_invalid_events() {
    let client = create_test_server();
    let geeks = login(&client, GEEKS_COORDINATOR);

    let inverted = PostedEvent {
        name: "Backwards".to_string(),
        date: "2030-01-02T10:00:00+05:30".to_string(),
        end_date: "2030-01-01T10:00:00+05:30".to_string(),
        ..Default::default()
    };
    let resp = client.post("/api/v1/club/events").header(geeks.clone()).json(&inverted).dispatch();
    assert_eq!(resp.status(), Status::UnprocessableEntity);

    let bad_date = PostedEvent {
        name: "Someday".to_string(),
        date: "next tuesday".to_string(),
        end_date: "2030-01-01".to_string(),
        ..Default::default()
    };
    let resp = client.post("/api/v1/club/events").header(geeks.clone()).json(&bad_date).dispatch();
    assert_eq!(resp.status(), Status::UnprocessableEntity);

    let unknown_club = PostedEvent {
        name: "Ghost".to_string(),
        date: "2030-01-01".to_string(),
        end_date: "2030-01-01".to_string(),
        club_ids: vec![4242],
        ..Default::default()
    };
    let resp = client.post("/api/v1/club/events").header(geeks.clone()).json(&unknown_club).dispatch();
    assert_eq!(resp.status(), Status::UnprocessableEntity);

    let event = post_event(&client, &geeks, &PostedEvent {
        name: "Circuit Quiz".to_string(),
        date: "2030-02-01T10:00:00+05:30".to_string(),
        end_date: "2030-02-01T12:00:00+05:30".to_string(),
        ..Default::default()
    });
    let patch = EventPatch {
        end_date: Some("2030-02-01T09:00:00+05:30".to_string()),
        venue: Some("Room 5".to_string()),
        ..Default::default()
    };
    let resp = client.patch(format!("/api/v1/club/events/{}", event.id)).header(geeks.clone()).json(&patch).dispatch();
    assert_eq!(resp.status(), Status::UnprocessableEntity);
    let resp = client.get(format!("/api/v1/club/events/{}", event.id)).header(geeks.clone()).dispatch();
    assert_eq!(resp.into_json::<EventRecord>().unwrap(), event);

    let resp = client.patch(format!("/api/v1/club/events/{}", event.id)).header(geeks).json(&EventPatch::default()).dispatch();
    assert_eq!(resp.status(), Status::UnprocessableEntity);
}

#[test]
fn update_and_delete_event() {
    let client = create_test_server();
    let geeks = login(&client, GEEKS_COORDINATOR);
    let robotics = login(&client, ROBOTICS_COORDINATOR);
    let robotics_id = club_id(&client, &geeks, "Robotics");

    let event = post_event(&client, &geeks, &PostedEvent {
        name: "PCB Design".to_string(),
        date: "2030-03-01T10:00:00+05:30".to_string(),
        end_date: "2030-03-01T12:00:00+05:30".to_string(),
        club_ids: vec![robotics_id],
        ..Default::default()
    });

    let patch = EventPatch {
        participants: Some(30),
        end_date: Some("2030-03-01T13:00:00+05:30".to_string()),
        ..Default::default()
    };
    let resp = client.patch(format!("/api/v1/club/events/{}", event.id)).header(robotics.clone()).json(&patch).dispatch();
    assert_eq!(resp.status(), Status::Forbidden);
    let resp = client.patch(format!("/api/v1/club/events/{}", event.id)).header(geeks.clone()).json(&patch).dispatch();
    assert_eq!(resp.status(), Status::Ok);
    let updated = resp.into_json::<EventRecord>().unwrap();
    assert_eq!(updated.participants, Some(30));
    assert_eq!(updated.end_date, Timestamp::from_iso_string("2030-03-01T13:00:00+05:30").unwrap());
    assert_eq!(updated.name, event.name);

    let resp = client.delete(format!("/api/v1/club/events/{}", event.id)).header(robotics).dispatch();
    assert_eq!(resp.status(), Status::Forbidden);
    let resp = client.delete(format!("/api/v1/club/events/{}", event.id)).header(geeks.clone()).dispatch();
    assert_eq!(resp.status(), Status::NoContent);
    let resp = client.get(format!("/api/v1/club/events/{}", event.id)).header(geeks.clone()).dispatch();
    assert_eq!(resp.status(), Status::NotFound);
    let resp = client.delete(format!("/api/v1/club/events/{}", event.id)).header(geeks).dispatch();
    assert_eq!(resp.status(), Status::NotFound);
}

#[test]
fn dashboard_classifies_events() {
    let client = create_test_server();
    let geeks = login(&client, GEEKS_COORDINATOR);

    let upcoming = post_event(&client, &geeks, &PostedEvent {
        name: "Drone Talk".to_string(),
        date: shifted(TimeDelta::days(2)),
        end_date: shifted(TimeDelta::days(2) + TimeDelta::hours(2)),
        ..Default::default()
    });
    let ongoing = post_event(&client, &geeks, &PostedEvent {
        name: "Build Night".to_string(),
        participants: Some(12),
        date: shifted(TimeDelta::hours(-1)),
        end_date: shifted(TimeDelta::hours(1)),
        ..Default::default()
    });
    let past = post_event(&client, &geeks, &PostedEvent {
        name: "Kit Handout".to_string(),
        participants: Some(8),
        date: shifted(TimeDelta::days(-3)),
        end_date: shifted(TimeDelta::days(-3) + TimeDelta::hours(1)),
        ..Default::default()
    });

    let resp = client.get("/api/v1/club/dashboard").header(geeks.clone()).dispatch();
    assert_eq!(resp.status(), Status::Ok);
    let view = resp.into_json::<Value>().unwrap();
    assert_eq!(ids(&view["upcoming"]), vec![upcoming.id]);
    assert_eq!(ids(&view["ongoing"]), vec![ongoing.id]);
    assert!(ids(&view["past"]).contains(&past.id));
    assert_eq!(view["past"].as_array().unwrap().len(), 4);
    assert_eq!(view["stats"]["totalEvents"], 6);
    // Spring Play is hosted by Drama only
    assert_eq!(view["stats"]["clubEvents"], 5);
    assert_eq!(view["upcomingPreview"][0]["isNear"], true);
    assert_eq!(view["ongoingProgress"][0]["event"]["id"], ongoing.id);
    assert_eq!(view["participation"].as_array().unwrap().len(), 6);
    assert_eq!(view["club"]["name"], "Electrogeeks");

    let resp = client.get("/dashboard").header(geeks).dispatch();
    assert_eq!(resp.status(), Status::Ok);
}

#[test]
fn calendar_month_and_day() {
    let client = create_test_server();
    let geeks = login(&client, GEEKS_COORDINATOR);

    let resp = client.get("/api/v1/club/dashboard?year=2024&month=3").header(geeks.clone()).dispatch();
    let view = resp.into_json::<Value>().unwrap();
    let calendar = &view["calendar"];
    assert_eq!(calendar["label"], "March 2024");
    // March 1st 2024 is a Friday
    assert_eq!(calendar["leadingBlanks"], 5);
    let days = calendar["days"].as_array().unwrap();
    assert_eq!(days.len(), 31);
    assert_eq!(days[1]["category"], "past");
    assert_eq!(days[2]["category"], "none");

    let resp = client.get("/api/v1/club/calendar/2024-03-02").header(geeks.clone()).dispatch();
    assert_eq!(resp.status(), Status::Ok);
    let selection = resp.into_json::<Value>().unwrap();
    let events = selection["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["event"]["name"], "Line Follower Challenge");
    assert_eq!(events[0]["status"], "completed");

    let resp = client.get("/api/v1/club/calendar/2024-03-03").header(geeks.clone()).dispatch();
    let selection = resp.into_json::<Value>().unwrap();
    assert!(selection["events"].as_array().unwrap().is_empty());

    let resp = client.get("/api/v1/club/calendar/2024-13-01").header(geeks).dispatch();
    assert_eq!(resp.status(), Status::BadRequest);
}

#[test]
fn logout_ends_session() {
    let client = create_test_server();
    login(&client, STUDENT);
    let resp = client.get("/api/v1/me").dispatch();
    assert_eq!(resp.status(), Status::Ok);
    let resp = client.get("/logout").dispatch();
    assert_eq!(resp.status(), Status::SeeOther);
    let resp = client.get("/api/v1/me").dispatch();
    assert_eq!(resp.status(), Status::Unauthorized);
}

#[rocket::async_test]
async fn dashboard_survives_event_store_failure() {
    use rocket::local::asynchronous::Client;

    let client = Client::tracked(super::rocket()).await.unwrap();
    let resp = client.get("/demo/create").dispatch().await;
    assert_eq!(resp.status(), Status::SeeOther);
    let resp = client.get(format!("/login/demo?email={GEEKS_COORDINATOR}")).dispatch().await;
    assert_eq!(resp.status(), Status::Ok);
    let login = resp.into_json::<LoginResponse>().await.unwrap();
    let auth = Header::new("Authorization", format!("Bearer {}", login.token));

    let db = client.rocket().state::<DbPool>().unwrap();
    sqlx::query("DROP TABLE events").execute(&db.0).await.unwrap();

    let resp = client.get("/api/v1/club/dashboard").header(auth.clone()).dispatch().await;
    assert_eq!(resp.status(), Status::Ok);
    let view = resp.into_json::<Value>().await.unwrap();
    for bucket in ["upcoming", "ongoing", "past"] {
        assert!(view[bucket].as_array().unwrap().is_empty(), "{bucket}");
    }
    let participation = view["participation"].as_array().unwrap();
    assert_eq!(participation.len(), 6);
    assert!(participation.iter().all(|m| m["participantsTotal"] == 0 && m["events"] == 0));
    assert_eq!(view["stats"]["totalEvents"], 0);
    assert_eq!(view["stats"]["clubEvents"], 0);

    let resp = client.get("/api/v1/club/calendar/2024-03-02").header(auth).dispatch().await;
    assert_eq!(resp.status(), Status::Ok);
    let resp = client.get("/").dispatch().await;
    assert_eq!(resp.status(), Status::Ok);
}

#[test]
fn dashboard_rejects_out_of_range_month() {
    let client = create_test_server();
    let geeks = login(&client, GEEKS_COORDINATOR);
    for query in ["year=2000000000&month=1", "month=2147483647", "year=-2147483648&month=-2147483648"] {
        let resp = client.get(format!("/api/v1/club/dashboard?{query}")).header(geeks.clone()).dispatch();
        assert_eq!(resp.status(), Status::BadRequest, "{query}");
        let resp = client.get(format!("/dashboard?{query}")).header(geeks.clone()).dispatch();
        assert_eq!(resp.status(), Status::BadRequest, "{query}");
    }
    let resp = client.get("/api/v1/club/dashboard?year=2024&month=13").header(geeks).dispatch();
    assert_eq!(resp.status(), Status::Ok);
    let view = resp.into_json::<Value>().unwrap();
    assert_eq!(view["calendar"]["label"], "January 2025");
}
