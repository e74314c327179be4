//! Departmental voting backend.
//!
//! Students sign up, submit a payment proof for the fixed fee, and — once
//! an admin approves the payment — vote exactly once per poll. Admins
//! create polls, review payments, and deactivate polls (soft delete).
//!
//!
//!
//! # Architecture
//!
//! - All decisions live in [`policy`], a pure module operating on
//!   snapshots. No I/O, fully unit-testable.
//! - All state lives in a versioned document store ([`store`]): Redis in
//!   production, in-process memory for dev and tests. Overwrites are
//!   compare-and-swap only.
//! - The vote path ([`polls::cast_vote`]) is a bounded optimistic loop:
//!   snapshot, evaluate, conditional write. The store's version check
//!   serializes all writers of the same poll document, so N concurrent
//!   accepted votes produce a tally of exactly N, and a user racing
//!   themselves from two tabs gets one increment and one `AlreadyVoted`.
//! - Roles are session claims decided at signup/login against the
//!   configured admin address, not re-derived per request.
//!
//!
//!
//! # Running
//!
//! ```sh
//! VOTE_PEPPER=dev RUST_LOG=info cargo run -p ballot
//! ```
//!
//! `VOTE_STORE=memory` runs without Redis. See [`config::Config`] for the
//! full set of knobs.
use std::time::Duration;

use axum::{
    Router,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

pub mod auth;
pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod policy;
pub mod polls;
pub mod routes;
pub mod state;
pub mod store;

use routes::{
    anonymous_handler, create_poll_handler, deactivate_poll_handler, events_handler,
    list_payments_handler, list_polls_handler, login_handler, logout_handler, me_handler,
    review_payment_handler, signup_handler, submit_proof_handler, vote_handler,
};
use state::AppState;

pub async fn start_server() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Initializing state...");
    let state = AppState::new().await;

    info!("Starting server...");

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60));

    let app = router(state.clone()).layer(cors);

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await.unwrap();
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    println!("Server shutting down...");
}

pub fn router(state: std::sync::Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/anonymous", post(anonymous_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/me", get(me_handler))
        .route("/polls", get(list_polls_handler).post(create_poll_handler))
        .route("/polls/{id}/deactivate", post(deactivate_poll_handler))
        .route("/polls/{id}/vote", post(vote_handler))
        .route(
            "/payments",
            get(list_payments_handler).post(submit_proof_handler),
        )
        .route("/payments/{id}/status", post(review_payment_handler))
        .route("/events", get(events_handler))
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal(SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
