use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coursepay::{api, config::Settings, service::ServiceContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coursepay=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Misconfigured money handling must not start on defaults
    let settings = Settings::new()?;

    tracing::info!("Starting Coursepay on {}:{}", settings.server.host, settings.server.port);
    if settings.auth.api_token.as_deref().map_or(true, str::is_empty) {
        tracing::warn!("auth.api_token is not set; /api is unauthenticated");
    }

    let service_context = Arc::new(ServiceContext::from_settings(&settings).await?);

    let app = api::create_app(service_context, Arc::new(settings.clone()));

    let listener = tokio::net::TcpListener::bind(
        format!("{}:{}", settings.server.host, settings.server.port)
    ).await?;

    tracing::info!("Server listening on http://{}:{}", settings.server.host, settings.server.port);

    axum::serve(listener, app).await?;

    Ok(())
}
