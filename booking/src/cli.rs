use clap::{Parser, Subcommand};
use common::logger::{TraceId, root_span};
use serde::Serialize;
use serde_json::json;
use tracing::{Instrument, info};

use crate::metrics::counters::Counters;
use crate::notify;
use crate::reservation::response::{CancelResponse, ReserveResponse, StatusResponse};
use crate::reservation::types::{PromoteOutcome, ReservationRequest};
use crate::service::BookingService;

#[derive(Debug, Parser)]
#[clap(name = "booking", version, about = "Seat reservation and fulfillment pipeline")]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the outbox relay and finalizer workers until ctrl-c.
    Serve,

    /// Create an event's seat counter, or reset it.
    SeedEvent {
        #[clap(long)]
        event_id: String,
        #[clap(long)]
        seats: u32,
    },

    /// Reserve one seat. Finalization happens in `serve`.
    Reserve {
        #[clap(long)]
        event_id: String,
        #[clap(long)]
        user_id: String,
        #[clap(long)]
        email: String,
        #[clap(long)]
        event_name: String,
    },

    Cancel { reservation_id: String },

    Status { reservation_id: String },

    /// Promote the earliest waiting booking of an event.
    Promote {
        #[clap(long)]
        event_id: String,
    },

    /// List parked queue messages.
    DeadLetters {
        #[clap(long, default_value = "50")]
        limit: usize,
    },
}

pub async fn run(cli: Cli, svc: BookingService) -> anyhow::Result<()> {
    let span = root_span(cli.command.name(), &TraceId::default());
    execute(cli.command, svc).instrument(span).await
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Serve => "serve",
            Command::SeedEvent { .. } => "seed_event",
            Command::Reserve { .. } => "reserve",
            Command::Cancel { .. } => "cancel",
            Command::Status { .. } => "status",
            Command::Promote { .. } => "promote",
            Command::DeadLetters { .. } => "dead_letters",
        }
    }
}

async fn execute(command: Command, svc: BookingService) -> anyhow::Result<()> {
    match command {
        Command::Serve => serve(svc).await,

        Command::SeedEvent { event_id, seats } => {
            svc.inventory.seed_event(&event_id, seats).await?;
            let snap = svc.inventory.snapshot(&event_id).await?;
            print_json(&json!({
                "event_id": event_id,
                "remaining_seats": snap.map(|s| s.remaining_seats),
                "version": snap.map(|s| s.version),
            }))
        }

        Command::Reserve {
            event_id,
            user_id,
            email,
            event_name,
        } => {
            let outcome = svc
                .coordinator
                .reserve(ReservationRequest::new(event_id, user_id, email, event_name))
                .await?;
            print_json(&ReserveResponse::from(outcome))
        }

        Command::Cancel { reservation_id } => {
            let outcome = svc.coordinator.cancel(&reservation_id).await?;
            print_json(&CancelResponse::from(outcome))
        }

        Command::Status { reservation_id } => {
            let booking = svc.coordinator.status(&reservation_id).await?;
            print_json(&StatusResponse::from(booking))
        }

        Command::Promote { event_id } => {
            let body = match svc.coordinator.promote(&event_id).await? {
                PromoteOutcome::Promoted(id) => {
                    json!({ "status": "PROMOTED", "reservation_id": id.to_string() })
                }
                PromoteOutcome::NoneWaiting => {
                    json!({ "status": "NONE_WAITING", "reservation_id": null })
                }
            };
            print_json(&body)
        }

        Command::DeadLetters { limit } => {
            let parked = svc.queue.dead_letters(limit).await?;
            let rows: Vec<_> = parked
                .into_iter()
                .map(|d| {
                    json!({
                        "message_id": d.message_id,
                        "attempts": d.attempts,
                        "last_error": d.last_error,
                        "payload": d.payload,
                    })
                })
                .collect();
            print_json(&rows)
        }
    }
}

async fn serve(svc: BookingService) -> anyhow::Result<()> {
    let notifier = notify::from_config(&svc.cfg)?;
    let workers = svc.start_workers(notifier);

    info!(workers = workers.len(), "workers running; press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    let aborted = workers.shutdown(svc.cfg.shutdown_grace).await;
    let c = &svc.counters;
    info!(
        aborted,
        relayed = Counters::read(&c.relayed),
        finalized = Counters::read(&c.finalized),
        redelivered = Counters::read(&c.redelivered),
        dead_lettered = Counters::read(&c.dead_lettered),
        notify_failed = Counters::read(&c.notify_failed),
        "booking service stopped"
    );

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
