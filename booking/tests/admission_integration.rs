use std::collections::HashSet;

use sqlx::Row;
use tokio::task::JoinSet;
use uuid::Uuid;

use booking::config::AppConfig;
use booking::metrics::counters::Counters;
use booking::reservation::response::ReserveResponse;
use booking::reservation::types::{ReservationRequest, ReserveOutcome};
use booking::service::BookingService;

/// Isolated, uniquely named in-memory SQLite database per test.
async fn setup() -> BookingService {
    let url = format!("sqlite:file:{}?mode=memory&cache=shared", Uuid::new_v4());
    BookingService::bootstrap(AppConfig::for_database(url))
        .await
        .expect("bootstrap")
}

fn request(event_id: &str, user: &str) -> ReservationRequest {
    ReservationRequest::new(event_id, user, format!("{user}@example.com"), "Launch Party")
}

async fn outbox_statuses(svc: &BookingService) -> Vec<String> {
    let rows = sqlx::query("SELECT payload FROM outbox WHERE kind = 'fulfill' ORDER BY seq")
        .fetch_all(&svc.db.pool)
        .await
        .unwrap();

    rows.iter()
        .map(|r| {
            let payload: String = r.get("payload");
            let v: serde_json::Value = serde_json::from_str(&payload).unwrap();
            v["status"].as_str().unwrap().to_string()
        })
        .collect()
}

#[tokio::test]
async fn concurrent_reserves_never_oversell() {
    let svc = setup().await;
    svc.inventory.seed_event("evt-1", 5).await.unwrap();

    let mut set = JoinSet::new();
    for i in 0..20 {
        let c = svc.coordinator.clone();
        set.spawn(async move { c.reserve(request("evt-1", &format!("u{i}"))).await });
    }

    let mut reserved = 0;
    let mut waitlisted = 0;
    let mut ids = HashSet::new();
    while let Some(res) = set.join_next().await {
        let outcome = res.expect("task panicked").expect("reserve failed");
        ids.insert(outcome.booking_id());
        match outcome {
            ReserveOutcome::Reserved(_) => reserved += 1,
            ReserveOutcome::Waitlisted { .. } => waitlisted += 1,
        }
    }

    assert_eq!(reserved, 5);
    assert_eq!(waitlisted, 15);
    assert_eq!(ids.len(), 20, "every request gets its own id");

    let snap = svc.inventory.snapshot("evt-1").await.unwrap().unwrap();
    assert_eq!(snap.remaining_seats, 0);

    // Every decision has exactly one instruction, granted or not.
    let statuses = outbox_statuses(&svc).await;
    assert_eq!(statuses.len(), 20);
    assert_eq!(statuses.iter().filter(|s| *s == "confirmed").count(), 5);
    assert_eq!(statuses.iter().filter(|s| *s == "waiting").count(), 15);
}

#[tokio::test]
async fn last_seat_has_exactly_one_winner() {
    let svc = setup().await;
    svc.inventory.seed_event("evt-1", 1).await.unwrap();

    let a = svc.coordinator.clone();
    let b = svc.coordinator.clone();
    let (ra, rb) = tokio::join!(
        a.reserve(request("evt-1", "alice")),
        b.reserve(request("evt-1", "bob"))
    );

    let responses = [
        ReserveResponse::from(ra.unwrap()),
        ReserveResponse::from(rb.unwrap()),
    ];

    let winners: Vec<_> = responses.iter().filter(|r| r.status == "RESERVED").collect();
    let losers: Vec<_> = responses.iter().filter(|r| r.status == "WAITLISTED").collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(losers.len(), 1);
    assert!(winners[0].reservation_id.is_some());
    assert!(losers[0].reservation_id.is_none());
}

#[tokio::test]
async fn zero_capacity_and_unknown_events_waitlist() {
    let svc = setup().await;
    svc.inventory.seed_event("sold-out", 0).await.unwrap();

    let full = svc.coordinator.reserve(request("sold-out", "u1")).await.unwrap();
    let unknown = svc.coordinator.reserve(request("never-seeded", "u2")).await.unwrap();

    assert!(matches!(full, ReserveOutcome::Waitlisted { .. }));
    assert!(matches!(unknown, ReserveOutcome::Waitlisted { .. }));
    assert_eq!(Counters::read(&svc.counters.reserve_waitlisted), 2);
    assert_eq!(outbox_statuses(&svc).await, vec!["waiting", "waiting"]);
}

#[tokio::test]
async fn grants_bump_the_inventory_version() {
    let svc = setup().await;
    svc.inventory.seed_event("evt-1", 3).await.unwrap();
    let before = svc.inventory.snapshot("evt-1").await.unwrap().unwrap();

    svc.coordinator.reserve(request("evt-1", "u1")).await.unwrap();
    svc.coordinator.reserve(request("evt-1", "u2")).await.unwrap();

    let after = svc.inventory.snapshot("evt-1").await.unwrap().unwrap();
    assert_eq!(after.remaining_seats, 1);
    assert_eq!(after.version, before.version + 2);
}

#[tokio::test]
async fn reseeding_resets_capacity() {
    let svc = setup().await;
    svc.inventory.seed_event("evt-1", 1).await.unwrap();
    svc.coordinator.reserve(request("evt-1", "u1")).await.unwrap();

    svc.inventory.seed_event("evt-1", 4).await.unwrap();

    let snap = svc.inventory.snapshot("evt-1").await.unwrap().unwrap();
    assert_eq!(snap.remaining_seats, 4);
}
