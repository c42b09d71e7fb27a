use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Application, ApplicationState};
use crate::error::GovernanceError;
use crate::reconciliation::TickReport;

/// Error body: `{ "code": "...", "message": "..." }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(pub GovernanceError);

impl From<GovernanceError> for ApiError {
    fn from(err: GovernanceError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        }
        let body = ErrorBody {
            code: self.0.code().to_string(),
            message: self.0.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationResponse {
    pub version: i64,
    #[serde(flatten)]
    pub state: ApplicationState,
}

impl From<Application> for ApplicationResponse {
    fn from(application: Application) -> Self {
        let snapshot = application.snapshot();
        Self {
            version: snapshot.version,
            state: snapshot.state,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GovernanceApprovalRequest {
    pub final_datacap: Decimal,
    pub allocator_type: String,
    #[serde(default)]
    pub is_mdma_allocator: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RkhApprovalsRequest {
    pub approvals: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub issue_number: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MultisigRequest {
    pub actor_id: String,
    pub address: String,
    pub threshold: u32,
    #[serde(default)]
    pub signers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestRequest {
    pub number: u64,
    pub url: String,
    pub comment_id: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollerStatusResponse {
    pub enabled: bool,
    pub running: bool,
    pub ticks: u64,
    pub last_run: Option<chrono::DateTime<chrono::Utc>>,
    pub last_report: Option<TickReport>,
}
