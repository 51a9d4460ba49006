use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use booking::bookings::model::BookingStatus;
use booking::config::AppConfig;
use booking::error::NotifyError;
use booking::metrics::counters::Counters;
use booking::notify::NotificationDispatcher;
use booking::reservation::types::{ReservationRequest, ReserveOutcome};
use booking::service::BookingService;

/// Records every notification it is asked to send.
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, Uuid, BookingStatus)>>,
}

#[async_trait]
impl NotificationDispatcher for RecordingNotifier {
    async fn send(
        &self,
        recipient: &str,
        _event_name: &str,
        reservation_id: &Uuid,
        status: BookingStatus,
    ) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .push((recipient.to_string(), *reservation_id, status));
        Ok(())
    }
}

async fn setup() -> BookingService {
    let url = format!("sqlite:file:{}?mode=memory&cache=shared", Uuid::new_v4());
    let mut cfg = AppConfig::for_database(url);
    cfg.finalizer_workers = 3;
    BookingService::bootstrap(cfg).await.expect("bootstrap")
}

async fn wait_for_status(svc: &BookingService, id: Uuid, want: BookingStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let got = svc
            .coordinator
            .status(&id.to_string())
            .await
            .unwrap()
            .map(|b| b.status);
        if got == Some(want) {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "booking {id} stuck at {got:?}, wanted {want}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn workers_finalize_promote_and_notify() {
    let svc = setup().await;
    svc.inventory.seed_event("evt-1", 2).await.unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let workers = svc.start_workers(notifier.clone());
    assert_eq!(workers.len(), 4);

    let mut outcomes = Vec::new();
    for i in 0..4 {
        let r = ReservationRequest::new("evt-1", format!("u{i}"), format!("u{i}@example.com"), "Gala");
        outcomes.push(svc.coordinator.reserve(r).await.unwrap());
        tokio::time::sleep(Duration::from_millis(3)).await;
    }

    let confirmed: Vec<_> = outcomes
        .iter()
        .filter(|o| matches!(o, ReserveOutcome::Reserved(_)))
        .map(|o| o.booking_id())
        .collect();
    let waiting: Vec<_> = outcomes
        .iter()
        .filter(|o| matches!(o, ReserveOutcome::Waitlisted { .. }))
        .map(|o| o.booking_id())
        .collect();
    assert_eq!(confirmed.len(), 2);
    assert_eq!(waiting.len(), 2);

    for id in &confirmed {
        wait_for_status(&svc, *id, BookingStatus::Confirmed).await;
    }
    for id in &waiting {
        wait_for_status(&svc, *id, BookingStatus::Waiting).await;
    }

    svc.coordinator
        .cancel(&confirmed[0].to_string())
        .await
        .unwrap();

    // Earliest waiter takes the freed seat; the other keeps waiting.
    wait_for_status(&svc, waiting[0], BookingStatus::Confirmed).await;
    wait_for_status(&svc, waiting[1], BookingStatus::Waiting).await;

    assert_eq!(workers.shutdown(Duration::from_secs(2)).await, 0);

    let sent = notifier.sent.lock().clone();
    assert!(sent.contains(&(
        "u0@example.com".to_string(),
        confirmed[0],
        BookingStatus::Confirmed
    )));
    let promoted_notices = sent
        .iter()
        .filter(|(_, id, st)| *id == waiting[0] && *st == BookingStatus::Confirmed)
        .count();
    assert_eq!(promoted_notices, 1);

    assert_eq!(Counters::read(&svc.counters.promoted), 1);
    assert_eq!(Counters::read(&svc.counters.dead_lettered), 0);
    assert_eq!(
        svc.inventory.snapshot("evt-1").await.unwrap().unwrap().remaining_seats,
        0
    );
}
