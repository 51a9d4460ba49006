pub mod bookings;
pub mod config;
pub mod db;
pub mod finalizer;
pub mod inventory;
pub mod metrics;
pub mod notify;
pub mod outbox;
pub mod queue;
pub mod reservation;
pub mod runtime;
pub mod service;

pub mod cli;
pub mod error;
pub mod time;
