//! Wiring: one pool, one set of counters, every component built from config.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::bookings::repository_sqlx::SqlxBookingStore;
use crate::config::AppConfig;
use crate::db::Db;
use crate::finalizer::BookingFinalizer;
use crate::inventory::SeatInventory;
use crate::metrics::counters::Counters;
use crate::notify::NotificationDispatcher;
use crate::outbox::relay::OutboxRelay;
use crate::queue::retry::RetryPolicy;
use crate::queue::sqlx_queue::SqlxFulfillmentQueue;
use crate::reservation::coordinator::ReservationCoordinator;
use crate::reservation::repository_sqlx::SqlxReservationRepository;
use crate::runtime::Supervisor;

pub struct BookingService {
    pub cfg: AppConfig,
    pub db: Db,
    pub counters: Counters,
    pub inventory: SeatInventory,
    pub coordinator: ReservationCoordinator,
    pub queue: Arc<SqlxFulfillmentQueue>,
    pub bookings: Arc<SqlxBookingStore>,
    reservations: Arc<SqlxReservationRepository>,
}

impl BookingService {
    /// Connects, creates the schema and builds every component.
    pub async fn bootstrap(cfg: AppConfig) -> anyhow::Result<Self> {
        let db = Db::connect(&cfg.database_url, cfg.db_max_connections)
            .await
            .with_context(|| format!("failed to connect to {}", cfg.database_url))?;
        db.migrate().await.context("schema migration failed")?;

        let counters = Counters::default();
        let reservations = Arc::new(SqlxReservationRepository::new(db.pool.clone()));
        let retry = RetryPolicy {
            max_attempts: cfg.max_delivery_attempts,
            base_delay: cfg.retry_base_delay,
            max_delay: cfg.retry_max_delay,
        };
        let queue = Arc::new(SqlxFulfillmentQueue::new(
            db.pool.clone(),
            cfg.queue_routing_key.clone(),
            cfg.queue_visibility_timeout,
            retry,
        ));

        info!(
            routing_key = %cfg.queue_routing_key,
            max_connections = cfg.db_max_connections,
            "booking service ready"
        );

        Ok(Self {
            inventory: SeatInventory::new(db.pool.clone()),
            coordinator: ReservationCoordinator::new(reservations.clone(), counters.clone()),
            bookings: Arc::new(SqlxBookingStore::new(db.pool.clone())),
            queue,
            reservations,
            counters,
            db,
            cfg,
        })
    }

    pub fn relay(&self) -> OutboxRelay {
        OutboxRelay::new(
            self.reservations.clone(),
            self.queue.clone(),
            self.cfg.relay_batch_size,
            self.cfg.relay_poll_interval,
            self.counters.clone(),
        )
        .with_retention(self.cfg.outbox_retention, self.cfg.outbox_sweep_interval)
    }

    pub fn finalizer(
        &self,
        worker_id: usize,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> BookingFinalizer {
        BookingFinalizer::new(
            self.bookings.clone(),
            self.queue.clone(),
            notifier,
            self.counters.clone(),
            worker_id,
            self.cfg.finalizer_poll_interval,
        )
    }

    /// Spawns one relay and `finalizer_workers` finalizers.
    pub fn start_workers(&self, notifier: Arc<dyn NotificationDispatcher>) -> Supervisor {
        let mut sup = Supervisor::new();

        let relay = self.relay();
        sup.spawn("outbox_relay", move |rx| relay.run(rx));

        for worker_id in 0..self.cfg.finalizer_workers.max(1) {
            let f = self.finalizer(worker_id, notifier.clone());
            sup.spawn("finalizer", move |rx| f.run(rx));
        }

        sup
    }
}
