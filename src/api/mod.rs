pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use std::sync::Arc;

use crate::{config::Settings, service::ServiceContext};
use state::AppState;

pub fn create_app(service_context: Arc<ServiceContext>, settings: Arc<Settings>) -> Router {
    let app_state = AppState::new(service_context, settings);

    Router::new()
        // Root and health endpoints
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))

        // Provider callbacks authenticate by signature, not API token
        .route("/webhooks/:gateway", post(handlers::webhooks::receive))

        // API routes
        .nest("/api", api_routes(app_state.clone()))

        .with_state(app_state)

        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .nest("/payments", payment_routes())
        .nest("/refunds", refund_routes())
        .nest("/payouts", payout_routes())
        .nest("/instructors", instructor_routes())
        .layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth::require_api_token,
        ))
}

fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(handlers::payments::checkout))
        .route("/user/:user_id", get(handlers::payments::list_by_user))
        .route("/:reference", get(handlers::payments::get))
        .route("/:reference/verify", post(handlers::payments::verify))
        .route("/:reference/cancel", post(handlers::payments::cancel))
        .route("/:reference/refunds", get(handlers::payments::list_refunds))
}

fn refund_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::refunds::create))
        .route("/:id", get(handlers::refunds::get))
        .route("/:id/approve", post(handlers::refunds::approve))
        .route("/:id/reject", post(handlers::refunds::reject))
}

fn payout_routes() -> Router<AppState> {
    Router::new()
        .route("/calculate", post(handlers::payouts::calculate))
        .route("/process", post(handlers::payouts::process_bulk))
        .route("/instructor/:instructor_id", get(handlers::payouts::list_by_instructor))
        .route("/:id", get(handlers::payouts::get))
        .route("/:id/process", post(handlers::payouts::process))
        .route("/:id/retry", post(handlers::payouts::retry))
}

fn instructor_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/:id/bank-account",
            get(handlers::bank_accounts::get).put(handlers::bank_accounts::save),
        )
        .route("/:id/bank-account/verify", post(handlers::bank_accounts::verify))
        .route(
            "/:id/bank-account/auto-payout",
            post(handlers::bank_accounts::set_auto_payout),
        )
}
