use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report the repository health along with the number of live room hubs.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let rooms = state.hubs().len();
    match state.store().health_check().await {
        Ok(()) => HealthResponse::ok(rooms),
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            HealthResponse::degraded(rooms)
        }
    }
}
