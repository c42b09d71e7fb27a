use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};

use crate::api::{handlers, state::AppState};

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/poller/status", get(handlers::get_poller_status))
        .route("/api/applications", post(handlers::create_application))
        .route("/api/applications/:id", get(handlers::get_application))
        // KYC
        .route("/api/applications/:id/kyc/approve", post(handlers::approve_kyc))
        .route("/api/applications/:id/kyc/reject", post(handlers::reject_kyc))
        .route("/api/applications/:id/kyc/revoke", post(handlers::revoke_kyc))
        // Governance review
        .route(
            "/api/applications/:id/governance-review/approve",
            post(handlers::approve_governance_review),
        )
        .route(
            "/api/applications/:id/governance-review/reject",
            post(handlers::reject_governance_review),
        )
        // Allocation
        .route(
            "/api/applications/:id/rkh-approvals",
            post(handlers::update_rkh_approvals),
        )
        .route(
            "/api/applications/:id/datacap-allocation",
            post(handlers::update_datacap_allocation),
        )
        .route("/api/applications/:id/refresh", post(handlers::request_datacap_refresh))
        // Records
        .route("/api/applications/:id/multisig", post(handlers::set_allocator_multisig))
        .route(
            "/api/applications/:id/pull-request",
            post(handlers::set_application_pull_request),
        )
        .route("/api/applications/:id/edit", post(handlers::edit_application))
        .with_state(state)
        .layer(cors)
}
