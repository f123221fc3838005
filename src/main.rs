use graceful::config::Config;
use graceful::{demo, listen_and_serve, listen_and_serve_tls, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "graceful=info,graceful_demo=info".into()),
        )
        .init();

    // Load configuration from CLI args, environment variables, and config file
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };

    tracing::info!("Starting graceful-demo");
    tracing::info!("  Listening on: {}", config.bind_addr());
    if config.grace_period.is_zero() {
        tracing::info!("  Grace period: unbounded");
    } else {
        tracing::info!(
            "  Grace period: {}",
            humantime::format_duration(config.grace_period)
        );
    }

    let server = Server::new(demo::router(config.handler_delay)).with_addr(config.bind_addr());

    let result = match &config.tls {
        Some(tls) => {
            tracing::info!("  TLS: {}", tls.cert.display());
            listen_and_serve_tls(&server, &tls.cert, &tls.key, config.grace_period).await
        }
        None => listen_and_serve(&server, config.grace_period).await,
    };

    match result {
        Ok(()) => tracing::info!("Server stopped ({:?})", server.session_state()),
        Err(e) => {
            tracing::error!("Server error: {}", e);
            std::process::exit(1);
        }
    }
}
