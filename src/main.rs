mod cli;
mod commands;
mod constants;
mod error;
mod models;
mod realtime;
mod server;
mod services;
mod utils;
mod worker;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    if let Err(e) = cli::run().await {
        tracing::error!(error = %e, "fatal error");
        std::process::exit(1);
    }
}
