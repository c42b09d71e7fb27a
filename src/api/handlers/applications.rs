use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::api::{
    state::AppState,
    types::{
        ApiResult, ApplicationResponse, GovernanceApprovalRequest, MultisigRequest,
        PullRequestRequest, RefreshRequest, RkhApprovalsRequest,
    },
};
use crate::domain::ApplicationIngest;
use crate::service::CreateApplication;

/// POST /api/applications
pub async fn create_application(
    State(state): State<AppState>,
    Json(req): Json<CreateApplication>,
) -> std::result::Result<(StatusCode, Json<ApplicationResponse>), crate::api::ApiError> {
    let application = state.service.create_application(req).await?;
    Ok((StatusCode::CREATED, Json(application.into())))
}

/// GET /api/applications/:id
pub async fn get_application(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApplicationResponse> {
    Ok(Json(state.service.get(&id).await?.into()))
}

/// POST /api/applications/:id/kyc/approve
pub async fn approve_kyc(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApplicationResponse> {
    Ok(Json(state.service.approve_kyc(&id).await?.into()))
}

/// POST /api/applications/:id/kyc/reject
pub async fn reject_kyc(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApplicationResponse> {
    Ok(Json(state.service.reject_kyc(&id).await?.into()))
}

/// POST /api/applications/:id/kyc/revoke
pub async fn revoke_kyc(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApplicationResponse> {
    Ok(Json(state.service.revoke_kyc(&id).await?.into()))
}

/// POST /api/applications/:id/governance-review/approve
pub async fn approve_governance_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<GovernanceApprovalRequest>,
) -> ApiResult<ApplicationResponse> {
    let application = state
        .service
        .approve_governance_review(
            &id,
            req.final_datacap,
            &req.allocator_type,
            req.is_mdma_allocator,
        )
        .await?;
    Ok(Json(application.into()))
}

/// POST /api/applications/:id/governance-review/reject
pub async fn reject_governance_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApplicationResponse> {
    Ok(Json(state.service.reject_governance_review(&id).await?.into()))
}

/// POST /api/applications/:id/rkh-approvals
pub async fn update_rkh_approvals(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RkhApprovalsRequest>,
) -> ApiResult<ApplicationResponse> {
    let application = state.service.update_rkh_approvals(&id, req.approvals).await?;
    Ok(Json(application.into()))
}

/// POST /api/applications/:id/datacap-allocation
pub async fn update_datacap_allocation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ApplicationResponse> {
    Ok(Json(state.service.update_datacap_allocation(&id).await?.into()))
}

/// POST /api/applications/:id/refresh
///
/// Body is optional; `{"issue_number": 12}` also tracks the refresh issue.
pub async fn request_datacap_refresh(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Option<Json<RefreshRequest>>,
) -> ApiResult<ApplicationResponse> {
    let issue_number = req.and_then(|Json(r)| r.issue_number);
    let application = state
        .service
        .request_datacap_refresh(&id, issue_number)
        .await?;
    Ok(Json(application.into()))
}

/// POST /api/applications/:id/multisig
pub async fn set_allocator_multisig(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MultisigRequest>,
) -> ApiResult<ApplicationResponse> {
    let application = state
        .service
        .set_allocator_multisig(&id, req.actor_id, req.address, req.threshold, req.signers)
        .await?;
    Ok(Json(application.into()))
}

/// POST /api/applications/:id/pull-request
pub async fn set_application_pull_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PullRequestRequest>,
) -> ApiResult<ApplicationResponse> {
    let application = state
        .service
        .set_application_pull_request(&id, req.number, req.url, req.comment_id)
        .await?;
    Ok(Json(application.into()))
}

/// POST /api/applications/:id/edit
pub async fn edit_application(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(ingest): Json<ApplicationIngest>,
) -> ApiResult<ApplicationResponse> {
    Ok(Json(state.service.edit(&id, ingest).await?.into()))
}
