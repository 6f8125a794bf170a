use std::sync::Arc;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use editlet::{EditService, EventLogger, GeminiBackend, ServerConfig, serve};

fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("editlet=info"));

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let backend = Arc::new(GeminiBackend::from_env()?);
    let events = EventLogger::from_env();
    if !events.is_enabled() {
        tracing::info!("DISCORD_WEBHOOK_URL not set, generation events disabled");
    }

    let service = Arc::new(EditService::new(backend).with_events(events));

    serve(ServerConfig::from_env()?, service).await
}
