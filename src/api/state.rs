use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::reconciliation::ApprovalPoller;
use crate::service::ApplicationService;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ApplicationService>,

    /// Present when the approval poller runs in this process
    pub poller: Option<Arc<ApprovalPoller>>,

    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(service: Arc<ApplicationService>) -> Self {
        Self {
            service,
            poller: None,
            start_time: Utc::now(),
        }
    }

    pub fn with_poller(mut self, poller: Arc<ApprovalPoller>) -> Self {
        self.poller = Some(poller);
        self
    }
}
