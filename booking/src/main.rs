use booking::cli::{self, Cli};
use booking::config::AppConfig;
use booking::service::BookingService;
use clap::Parser;
use common::logger::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging first: config parsing may warn.
    init_tracing("booking", AppConfig::json_logs_from_env());
    let cfg = AppConfig::from_env();

    let svc = BookingService::bootstrap(cfg).await?;
    cli::run(cli, svc).await
}
