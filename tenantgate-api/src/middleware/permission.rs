/// Permission gate for handlers
///
/// Call [`require`] before any business operation. Denials return 403;
/// evaluation failures return 500 and never fall through to the handler.

use crate::app::AppState;
use crate::error::ApiError;
use tenantgate_shared::context::RequestContext;
use tenantgate_shared::CoreError;

pub async fn require(
    state: &AppState,
    ctx: &RequestContext,
    module: &str,
    action: &str,
) -> Result<(), ApiError> {
    state
        .permissions
        .authorize(ctx, module, action)
        .await
        .map_err(|e| match e {
            CoreError::Infrastructure(_) => {
                ApiError::InternalError(format!("Permission evaluation failed: {}", e))
            }
            other => other.into(),
        })
}
