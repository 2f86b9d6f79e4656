use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use tokio::net::TcpListener;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Config, NoTls, SimpleQueryMessage};
use ulid::Ulid;

use carebook::engine::Engine;
use carebook::wire::{self, CarebookFactory};

const PASSWORD: &str = "carebook";
const ADMIN: &str = "admin";

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let dir = std::env::temp_dir().join(format!("carebook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("carebook.wal")).unwrap());
    let factory = CarebookFactory::new(engine, PASSWORD.into(), ADMIN.into());

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let factory = factory.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, factory, None).await;
            });
        }
    });

    addr
}

async fn connect(addr: SocketAddr, user: &str) -> Result<tokio_postgres::Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("carebook")
        .user(user)
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

fn next_monday() -> NaiveDate {
    let mut date = Utc::now().date_naive() + Duration::days(1);
    while date.weekday().num_days_from_sunday() != 1 {
        date += Duration::days(1);
    }
    date
}

fn rows(messages: Vec<SimpleQueryMessage>) -> Vec<tokio_postgres::SimpleQueryRow> {
    messages
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(r) => Some(r),
            _ => None,
        })
        .collect()
}

fn code(err: &tokio_postgres::Error) -> Option<&SqlState> {
    err.as_db_error().map(|e| e.code())
}

struct Setup {
    addr: SocketAddr,
    counselor: Ulid,
    client: Ulid,
}

/// Admin registers a counselor and a client; the counselor opens Monday 09:00-11:00.
async fn setup() -> Setup {
    let addr = start_test_server().await;
    let counselor = Ulid::new();
    let client = Ulid::new();

    let admin = connect(addr, ADMIN).await.unwrap();
    admin
        .batch_execute(&format!(
            "INSERT INTO profiles (id, user_type, full_name) VALUES ('{counselor}', 'counselor', 'Dr. Ada')"
        ))
        .await
        .unwrap();
    admin
        .batch_execute(&format!(
            "INSERT INTO profiles (id, user_type, full_name) VALUES ('{client}', 'client', 'Sam')"
        ))
        .await
        .unwrap();

    let c = connect(addr, &counselor.to_string()).await.unwrap();
    c.batch_execute(&format!(
        "INSERT INTO weekly_availability (id, counselor_id, day_of_week, start_time, end_time) \
         VALUES ('{}', '{counselor}', 1, '09:00', '11:00')",
        Ulid::new()
    ))
    .await
    .unwrap();

    Setup { addr, counselor, client }
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_login_is_refused() {
    let addr = start_test_server().await;
    assert!(connect(addr, "nobody").await.is_err());
    assert!(connect(addr, &Ulid::new().to_string()).await.is_err());
}

#[tokio::test]
async fn book_then_slot_disappears() {
    let s = setup().await;
    let monday = next_monday();
    let client = connect(s.addr, &s.client.to_string()).await.unwrap();

    let slots_sql = format!(
        "SELECT * FROM available_slots WHERE counselor_id = '{}' AND date = '{monday}'",
        s.counselor
    );
    let before = rows(client.simple_query(&slots_sql).await.unwrap());
    let starts: Vec<_> = before.iter().map(|r| r.get("start_time").unwrap().to_string()).collect();
    assert_eq!(starts, vec!["09:00:00", "10:00:00"]);
    assert_eq!(before[0].get("end_time"), Some("10:00:00"));

    client
        .batch_execute(&format!(
            "INSERT INTO appointments (id, counselor_id, appointment_date, start_time, notes) \
             VALUES ('{}', '{}', '{monday}', '09:00', 'intro')",
            Ulid::new(),
            s.counselor
        ))
        .await
        .unwrap();

    let after = rows(client.simple_query(&slots_sql).await.unwrap());
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].get("start_time"), Some("10:00:00"));

    let mine = rows(
        client
            .simple_query(&format!("SELECT * FROM appointments WHERE user_id = '{}'", s.client))
            .await
            .unwrap(),
    );
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].get("status"), Some("pending"));
    assert_eq!(mine[0].get("notes"), Some("intro"));
}

#[tokio::test]
async fn double_booking_is_a_unique_violation() {
    let s = setup().await;
    let monday = next_monday();
    let first = connect(s.addr, &s.client.to_string()).await.unwrap();

    let other = Ulid::new();
    let admin = connect(s.addr, ADMIN).await.unwrap();
    admin
        .batch_execute(&format!("INSERT INTO profiles VALUES ('{other}', 'client', NULL)"))
        .await
        .unwrap();
    let second = connect(s.addr, &other.to_string()).await.unwrap();

    let book = |id: Ulid| {
        format!(
            "INSERT INTO appointments (id, counselor_id, appointment_date, start_time) \
             VALUES ('{id}', '{}', '{monday}', '10:00')",
            s.counselor
        )
    };
    first.batch_execute(&book(Ulid::new())).await.unwrap();
    let err = second.batch_execute(&book(Ulid::new())).await.unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::UNIQUE_VIOLATION));
}

#[tokio::test]
async fn client_cannot_edit_schedule() {
    let s = setup().await;
    let client = connect(s.addr, &s.client.to_string()).await.unwrap();
    let err = client
        .batch_execute(&format!(
            "INSERT INTO weekly_availability VALUES ('{}', '{}', 2, '09:00', '10:00')",
            Ulid::new(),
            s.counselor
        ))
        .await
        .unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::INSUFFICIENT_PRIVILEGE));
}

#[tokio::test]
async fn blocked_date_and_status() {
    let s = setup().await;
    let monday = next_monday();
    let counselor = connect(s.addr, &s.counselor.to_string()).await.unwrap();

    counselor
        .batch_execute(&format!(
            "INSERT INTO date_overrides (id, counselor_id, override_date, is_available, reason) \
             VALUES ('{}', '{}', '{monday}', false, 'training')",
            Ulid::new(),
            s.counselor
        ))
        .await
        .unwrap();

    let status = rows(
        counselor
            .simple_query(&format!(
                "SELECT * FROM date_status WHERE counselor_id = '{}' AND date = '{monday}'",
                s.counselor
            ))
            .await
            .unwrap(),
    );
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].get("blocked"), Some("t"));
    assert_eq!(status[0].get("selectable"), Some("f"));

    let slots = rows(
        counselor
            .simple_query(&format!(
                "SELECT * FROM available_slots WHERE counselor_id = '{}' AND date = '{monday}'",
                s.counselor
            ))
            .await
            .unwrap(),
    );
    assert!(slots.is_empty());

    let err = counselor
        .batch_execute(&format!(
            "INSERT INTO date_overrides VALUES ('{}', '{}', '{monday}', true, '13:00', '15:00', NULL)",
            Ulid::new(),
            s.counselor
        ))
        .await
        .unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::UNIQUE_VIOLATION));
}

#[tokio::test]
async fn extended_protocol_booking() {
    let s = setup().await;
    let monday = next_monday().to_string();
    let counselor = s.counselor.to_string();
    let client = connect(s.addr, &s.client.to_string()).await.unwrap();

    let id = Ulid::new().to_string();
    client
        .execute(
            "INSERT INTO appointments (id, counselor_id, appointment_date, start_time) VALUES ($1, $2, $3, $4)",
            &[&id, &counselor, &monday, &"10:00"],
        )
        .await
        .unwrap();

    let slots = client
        .query(
            "SELECT * FROM available_slots WHERE counselor_id = $1 AND date = $2",
            &[&counselor, &monday],
        )
        .await
        .unwrap();
    let starts: Vec<String> = slots.iter().map(|r| r.get("start_time")).collect();
    assert_eq!(starts, vec!["09:00:00".to_string()]);
}

#[tokio::test]
async fn bound_notes_keep_dollars_and_quotes() {
    let s = setup().await;
    let monday = next_monday().to_string();
    let counselor = s.counselor.to_string();
    let user = s.client.to_string();
    let client = connect(s.addr, &user).await.unwrap();

    let notes = "please bill $1 to insurance, it's $2'); --";
    let id = Ulid::new().to_string();
    client
        .execute(
            "INSERT INTO appointments (id, counselor_id, appointment_date, start_time, notes) \
             VALUES ($1, $2, $3, $4, $5)",
            &[&id, &counselor, &monday, &"09:00", &notes],
        )
        .await
        .unwrap();

    let appts = client
        .query("SELECT *\nFROM appointments\nWHERE user_id = $1", &[&user])
        .await
        .unwrap();
    assert_eq!(appts.len(), 1);
    let stored: String = appts[0].get("notes");
    assert_eq!(stored, notes);
    let stored_id: String = appts[0].get("id");
    assert_eq!(stored_id, id);
}

#[tokio::test]
async fn cancel_over_the_wire_frees_slot() {
    let s = setup().await;
    let monday = next_monday();
    let client = connect(s.addr, &s.client.to_string()).await.unwrap();
    let appt = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO appointments VALUES ('{appt}', '{}', '{monday}', '09:00', NULL)",
            s.counselor
        ))
        .await
        .unwrap();

    let err = client
        .batch_execute(&format!("UPDATE appointments SET status = 'confirmed' WHERE id = '{appt}'"))
        .await
        .unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::INSUFFICIENT_PRIVILEGE));

    client
        .batch_execute(&format!("UPDATE appointments SET status = 'cancelled' WHERE id = '{appt}'"))
        .await
        .unwrap();

    let slots = rows(
        client
            .simple_query(&format!(
                "SELECT * FROM available_slots WHERE counselor_id = '{}' AND date = '{monday}'",
                s.counselor
            ))
            .await
            .unwrap(),
    );
    assert_eq!(slots.len(), 2);
}

#[tokio::test]
async fn bad_sql_reports_syntax_error() {
    let s = setup().await;
    let admin = connect(s.addr, ADMIN).await.unwrap();
    let err = admin.batch_execute("SELEKT nonsense").await.unwrap_err();
    assert_eq!(code(&err), Some(&SqlState::SYNTAX_ERROR));
}
